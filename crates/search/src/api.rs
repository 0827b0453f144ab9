//! Typed contracts for the search surface. The HTTP transport lives
//! outside the core; these are the request/response shapes and the
//! error-to-status table it mounts.

use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use sift_core::{CoreError, ErrorKind, TextChunk};
use store::ChunkStore;
use tracing::debug;
use uuid::Uuid;
use vector::{Filter, VectorIndex};

use crate::answer::{AnswerCommand, AnswerComposer};
use crate::retrieve::{RetrievalEngine, SearchMode, SearchQuery, SearchResultItem};

const MAX_PAGE_SIZE: usize = 100;
const MAX_CONTEXT_LIMIT: usize = 20;

/// HTTP status for an error kind.
pub fn status_code(kind: ErrorKind) -> u16 {
  match kind {
    ErrorKind::Validation => 400,
    ErrorKind::NotFound => 404,
    ErrorKind::Conflict => 409,
    ErrorKind::FileTooLarge => 413,
    ErrorKind::UnsupportedFileType => 415,
    ErrorKind::ExternalService => 502,
    ErrorKind::Timeout => 504,
    ErrorKind::Internal => 500,
  }
}

fn default_limit() -> usize {
  10
}

fn default_threshold() -> f32 {
  0.7
}

fn default_context_limit() -> usize {
  5
}

fn default_temperature() -> f32 {
  0.7
}

fn default_max_tokens() -> u32 {
  1000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchRequest {
  pub query: String,
  #[serde(default)]
  pub mode: SearchMode,
  #[serde(default = "default_limit")]
  pub limit: usize,
  #[serde(default = "default_threshold")]
  pub threshold: f32,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub filters: Option<Filter>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResponse {
  pub results: Vec<SearchResultItem>,
  pub total: usize,
  pub search_time_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnswerRequest {
  pub question: String,
  #[serde(default = "default_context_limit")]
  pub context_limit: usize,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub filters: Option<Filter>,
  #[serde(default = "default_temperature")]
  pub temperature: f32,
  #[serde(default = "default_max_tokens")]
  pub max_tokens: u32,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub system_prompt: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnswerResponse {
  pub answer: String,
  pub sources: Vec<SearchResultItem>,
  pub confidence: f32,
  pub tokens_used: u32,
  pub generation_time_ms: u64,
  pub search_time_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkDetail {
  pub id: Uuid,
  pub document_id: Uuid,
  pub content: String,
  pub kind: String,
  pub sequence_number: u32,
  pub start_offset: usize,
  pub end_offset: usize,
  pub embedded: bool,
  pub created_at: chrono::DateTime<chrono::Utc>,
}

impl From<TextChunk> for ChunkDetail {
  fn from(chunk: TextChunk) -> Self {
    Self {
      id: chunk.id,
      document_id: chunk.document_id,
      content: chunk.content,
      kind: chunk.kind.as_str().to_string(),
      sequence_number: chunk.sequence_number,
      start_offset: chunk.start_offset,
      end_offset: chunk.end_offset,
      embedded: chunk.embedding_id.is_some(),
      created_at: chunk.created_at,
    }
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkPage {
  pub items: Vec<ChunkDetail>,
  pub page: usize,
  pub size: usize,
  pub total: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
  pub healthy: bool,
  pub response_time_ms: u64,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub detail: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
  pub healthy: bool,
  pub vector_index: ComponentHealth,
  pub llm: ComponentHealth,
}

/// Service facade behind the search endpoints.
pub struct SearchService {
  retrieval: RetrievalEngine,
  composer: AnswerComposer,
  chunks: Arc<dyn ChunkStore>,
  vectors: Arc<dyn VectorIndex>,
  llm: Arc<dyn llm::LlmClient>,
  answer_model: String,
}

impl SearchService {
  pub fn new(
    retrieval: RetrievalEngine,
    composer: AnswerComposer,
    chunks: Arc<dyn ChunkStore>,
    vectors: Arc<dyn VectorIndex>,
    llm_client: Arc<dyn llm::LlmClient>,
  ) -> Self {
    let answer_model = llm_client.model_id().to_string();
    Self {
      retrieval,
      composer,
      chunks,
      vectors,
      llm: llm_client,
      answer_model,
    }
  }

  /// `POST /search`.
  pub async fn search(&self, user_id: Uuid, request: SearchRequest) -> Result<SearchResponse, CoreError> {
    let started = Instant::now();
    let mut query = SearchQuery::new(user_id, request.query)
      .with_mode(request.mode)
      .with_limit(request.limit)
      .with_threshold(request.threshold);
    if let Some(filters) = request.filters {
      query = query.with_filters(filters);
    }

    let results = self.retrieval.search(&query).await?;
    Ok(SearchResponse {
      total: results.len(),
      results,
      search_time_ms: started.elapsed().as_millis() as u64,
    })
  }

  /// `POST /search/answer`: retrieve context, then compose.
  pub async fn answer(&self, user_id: Uuid, request: AnswerRequest) -> Result<AnswerResponse, CoreError> {
    if request.context_limit == 0 || request.context_limit > MAX_CONTEXT_LIMIT {
      return Err(CoreError::validation(format!(
        "context_limit must be in 1..={MAX_CONTEXT_LIMIT}"
      )));
    }

    let search_started = Instant::now();
    let mut query = SearchQuery::new(user_id, request.question.clone())
      .with_mode(SearchMode::Hybrid)
      .with_limit(request.context_limit)
      .with_threshold(0.0);
    if let Some(filters) = request.filters.clone() {
      query = query.with_filters(filters);
    }
    let chunks = self.retrieval.search(&query).await?;
    let search_time_ms = search_started.elapsed().as_millis() as u64;

    if chunks.is_empty() {
      return Err(CoreError::not_found("no relevant context found for the question"));
    }

    let mut command = AnswerCommand::new(user_id, request.question, chunks, &self.answer_model);
    command.max_tokens = request.max_tokens;
    command.temperature = request.temperature;
    command.system_prompt = request.system_prompt;
    let composed = self.composer.compose(command).await?;

    debug!(user_id = %user_id, sources = composed.sources.len(), "Answer produced");
    Ok(AnswerResponse {
      answer: composed.answer_text,
      sources: composed.sources,
      confidence: composed.confidence,
      tokens_used: composed.tokens_used,
      generation_time_ms: composed.generation_ms,
      search_time_ms,
    })
  }

  /// `GET /chunks/{id}`.
  pub async fn chunk(&self, id: Uuid) -> Result<ChunkDetail, CoreError> {
    let chunk = self
      .chunks
      .find_by_id(id)
      .await?
      .ok_or_else(|| CoreError::not_found(format!("chunk {id}")))?;
    Ok(chunk.into())
  }

  /// `GET /documents/{id}/chunks?page&size`, size capped at 100.
  pub async fn document_chunks(&self, document_id: Uuid, page: usize, size: usize) -> Result<ChunkPage, CoreError> {
    if size == 0 || size > MAX_PAGE_SIZE {
      return Err(CoreError::validation(format!("size must be in 1..={MAX_PAGE_SIZE}")));
    }
    let all = self.chunks.find_by_document(document_id).await?;
    let total = all.len();
    let items: Vec<ChunkDetail> = all
      .into_iter()
      .skip(page.saturating_mul(size))
      .take(size)
      .map(ChunkDetail::from)
      .collect();
    Ok(ChunkPage {
      items,
      page,
      size,
      total,
    })
  }

  /// `GET /search/health`.
  pub async fn health(&self) -> HealthReport {
    let vector_started = Instant::now();
    let vector_index = match self.vectors.health().await {
      Ok(elapsed) => ComponentHealth {
        healthy: true,
        response_time_ms: elapsed.as_millis() as u64,
        detail: None,
      },
      Err(e) => ComponentHealth {
        healthy: false,
        response_time_ms: vector_started.elapsed().as_millis() as u64,
        detail: Some(e.to_string()),
      },
    };

    let llm_started = Instant::now();
    let llm = match self.llm.health().await {
      Ok(elapsed) => ComponentHealth {
        healthy: true,
        response_time_ms: elapsed.as_millis() as u64,
        detail: None,
      },
      Err(e) => ComponentHealth {
        healthy: false,
        response_time_ms: llm_started.elapsed().as_millis() as u64,
        detail: Some(e.to_string()),
      },
    };

    HealthReport {
      healthy: vector_index.healthy && llm.healthy,
      vector_index,
      llm,
    }
  }
}

#[cfg(test)]
mod tests {
  use pretty_assertions::assert_eq;

  use super::*;

  #[test]
  fn test_status_table() {
    assert_eq!(status_code(ErrorKind::Validation), 400);
    assert_eq!(status_code(ErrorKind::NotFound), 404);
    assert_eq!(status_code(ErrorKind::Conflict), 409);
    assert_eq!(status_code(ErrorKind::FileTooLarge), 413);
    assert_eq!(status_code(ErrorKind::UnsupportedFileType), 415);
    assert_eq!(status_code(ErrorKind::ExternalService), 502);
    assert_eq!(status_code(ErrorKind::Timeout), 504);
    assert_eq!(status_code(ErrorKind::Internal), 500);
  }

  #[test]
  fn test_request_defaults() {
    let request: SearchRequest = serde_json::from_str(r#"{"query": "rust"}"#).unwrap();
    assert_eq!(request.limit, 10);
    assert_eq!(request.mode, SearchMode::Semantic);
    assert!((request.threshold - 0.7).abs() < 1e-6);

    let answer: AnswerRequest = serde_json::from_str(r#"{"question": "why"}"#).unwrap();
    assert_eq!(answer.context_limit, 5);
    assert_eq!(answer.max_tokens, 1000);
  }
}
