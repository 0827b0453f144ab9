//! Retrieval over the vector index plus grounded answer generation.

mod answer;
mod api;
mod cache;
mod retrieve;

pub use answer::{AnswerCommand, AnswerComposer, ComposedAnswer};
pub use api::{
  AnswerRequest, AnswerResponse, ChunkDetail, ChunkPage, ComponentHealth, HealthReport, SearchRequest,
  SearchResponse, SearchService, status_code,
};
pub use cache::QueryEmbeddingCache;
pub use retrieve::{RetrievalEngine, SearchMode, SearchQuery, SearchResultItem, extract_keywords};
