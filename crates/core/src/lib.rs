mod chunk;
mod config;
mod error;
mod job;

pub use chunk::{ChunkKind, EmbeddingRecord, TextChunk, normalized_content_hash};
pub use config::{
  ChunkingConfig, Config, ConfigError, EmbedderKind, EmbeddingConfig, EngineConfig, ExtractConfig, LlmConfig,
  VectorConfig, parse_byte_size,
};
pub use error::{CoreError, ErrorKind};
pub use job::{JobKind, JobStatus, ProcessingJob, ProcessingMetadata};
