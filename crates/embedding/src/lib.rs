//! Batch text embedding: provider contract, rate limiting, batching.

mod batch;
mod hash;
mod openai;
mod rate_limit;

use std::sync::Arc;

pub use batch::{Embedder, Embedding, TokenUsage};
pub use hash::HashEmbedder;
pub use openai::OpenAiEmbedder;
pub use rate_limit::{RequestWindow, Slot, WindowConfig};

use sift_core::{CoreError, EmbedderKind, EmbeddingConfig, ErrorKind};

/// How text is framed before embedding. Instruction-tuned embedding
/// models treat queries and documents differently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EmbeddingMode {
  #[default]
  Document,
  Query,
}

/// A provider turning a batch of texts into vectors. Order and length are
/// preserved: `embed_batch(texts).len() == texts.len()`, element-wise.
#[async_trait::async_trait]
pub trait EmbeddingProvider: Send + Sync {
  fn name(&self) -> &str;
  fn model_id(&self) -> &str;
  fn dimensions(&self) -> usize;

  /// Largest batch the provider accepts in one request.
  fn max_batch_size(&self) -> usize {
    100
  }

  async fn embed_batch(&self, texts: &[&str], mode: EmbeddingMode) -> Result<Vec<Vec<f32>>, EmbeddingError>;
}

impl dyn EmbeddingProvider {
  pub fn from_config(config: &EmbeddingConfig) -> Result<Arc<dyn EmbeddingProvider>, EmbeddingError> {
    match config.provider {
      EmbedderKind::OpenAi => Ok(Arc::new(OpenAiEmbedder::new(config)?)),
      EmbedderKind::Hash => Ok(Arc::new(HashEmbedder::new(&config.model, config.dimension))),
    }
  }
}

#[derive(Debug, thiserror::Error)]
pub enum EmbeddingError {
  #[error("no api key configured for provider")]
  NoApiKey,
  #[error("rate limited by provider")]
  RateLimited { retry_after: Option<std::time::Duration> },
  #[error("provider error: {0}")]
  Provider(String),
  #[error("network error: {0}")]
  Network(String),
  #[error("request timed out")]
  Timeout,
  #[error("batch size mismatch: expected {expected}, got {got}")]
  BatchMismatch { expected: usize, got: usize },
}

impl From<EmbeddingError> for CoreError {
  fn from(err: EmbeddingError) -> Self {
    let kind = match &err {
      EmbeddingError::NoApiKey => ErrorKind::Validation,
      EmbeddingError::Timeout => ErrorKind::Timeout,
      _ => ErrorKind::ExternalService,
    };
    CoreError::new(kind, err.to_string())
  }
}
