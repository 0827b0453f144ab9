//! Batch orchestration over a provider: splitting, pacing, token clamps,
//! and rate-limit retries.

use std::sync::Arc;
use std::time::Duration;

use sift_core::EmbeddingConfig;
use tracing::{debug, trace, warn};

use crate::{EmbeddingError, EmbeddingMode, EmbeddingProvider};

/// Hard cap on texts per provider request, regardless of configuration.
const PROVIDER_HARD_CAP: usize = 100;
/// Bounded retries for rate-limit signals before the batch fails.
const MAX_RATE_LIMIT_RETRIES: u32 = 5;
/// Rough chars-per-token factor used for the clamp.
const CHARS_PER_TOKEN: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TokenUsage {
  pub prompt_tokens: u32,
  pub total_tokens: u32,
}

/// One embedded text: the vector plus its provenance.
#[derive(Debug, Clone, PartialEq)]
pub struct Embedding {
  pub vector: Vec<f32>,
  pub model: String,
  pub dimension: usize,
  pub usage: TokenUsage,
  /// Whether the input was cut to the model's token budget.
  pub truncated: bool,
}

/// Cut `text` to roughly `max_tokens`, never mid-word.
fn clamp_to_budget(text: &str, max_tokens: usize) -> (String, bool) {
  let budget_chars = max_tokens.saturating_mul(CHARS_PER_TOKEN).max(1);
  let chars: Vec<char> = text.chars().collect();
  if chars.len() <= budget_chars {
    return (text.to_string(), false);
  }

  let mut cut = budget_chars;
  if let Some(ws) = (1..=budget_chars).rev().find(|&i| chars[i - 1].is_whitespace()) {
    cut = ws - 1;
  }
  if cut == 0 {
    cut = budget_chars;
  }
  (chars[..cut].iter().collect(), true)
}

fn approx_tokens(text: &str) -> u32 {
  (text.chars().count() / CHARS_PER_TOKEN).max(1) as u32
}

/// The engine-facing embedder: batches inputs, paces requests, clamps
/// oversized texts, and retries rate-limited batches in place.
pub struct Embedder {
  provider: Arc<dyn EmbeddingProvider>,
  batch_size: usize,
  batch_pause: Duration,
  max_tokens: usize,
}

impl Embedder {
  pub fn new(provider: Arc<dyn EmbeddingProvider>, config: &EmbeddingConfig) -> Self {
    let batch_size = config
      .batch_size
      .min(provider.max_batch_size())
      .min(PROVIDER_HARD_CAP)
      .max(1);
    Self {
      provider,
      batch_size,
      batch_pause: Duration::from_millis(config.batch_pause_ms),
      max_tokens: config.max_tokens.max(1),
    }
  }

  pub fn model_id(&self) -> &str {
    self.provider.model_id()
  }

  pub fn dimensions(&self) -> usize {
    self.provider.dimensions()
  }

  /// Embed all texts, preserving order and length.
  pub async fn embed(&self, texts: &[String], mode: EmbeddingMode) -> Result<Vec<Embedding>, EmbeddingError> {
    if texts.is_empty() {
      return Ok(Vec::new());
    }

    let clamped: Vec<(String, bool)> = texts.iter().map(|t| clamp_to_budget(t, self.max_tokens)).collect();
    let truncated_count = clamped.iter().filter(|(_, t)| *t).count();
    if truncated_count > 0 {
      warn!(truncated = truncated_count, total = texts.len(), "Inputs clamped to token budget");
    }

    let mut out = Vec::with_capacity(texts.len());
    for (batch_index, batch) in clamped.chunks(self.batch_size).enumerate() {
      if batch_index > 0 && !self.batch_pause.is_zero() {
        // Smooth the request rate between consecutive batches.
        tokio::time::sleep(self.batch_pause).await;
      }

      let refs: Vec<&str> = batch.iter().map(|(t, _)| t.as_str()).collect();
      let vectors = self.embed_batch_with_retry(&refs, mode, batch_index).await?;
      if vectors.len() != batch.len() {
        return Err(EmbeddingError::BatchMismatch {
          expected: batch.len(),
          got: vectors.len(),
        });
      }

      for (vector, (text, truncated)) in vectors.into_iter().zip(batch) {
        let prompt_tokens = approx_tokens(text);
        out.push(Embedding {
          vector,
          model: self.provider.model_id().to_string(),
          dimension: self.provider.dimensions(),
          usage: TokenUsage {
            prompt_tokens,
            total_tokens: prompt_tokens,
          },
          truncated: *truncated,
        });
      }
    }

    debug!(texts = texts.len(), batches = texts.len().div_ceil(self.batch_size), "Embedding complete");
    Ok(out)
  }

  /// Retry the same batch on rate-limit signals; fail on anything else.
  async fn embed_batch_with_retry(
    &self,
    batch: &[&str],
    mode: EmbeddingMode,
    batch_index: usize,
  ) -> Result<Vec<Vec<f32>>, EmbeddingError> {
    let mut attempt = 0u32;
    loop {
      match self.provider.embed_batch(batch, mode).await {
        Ok(vectors) => return Ok(vectors),
        Err(EmbeddingError::RateLimited { retry_after }) if attempt < MAX_RATE_LIMIT_RETRIES => {
          let backoff = retry_after.unwrap_or_else(|| Duration::from_millis(500 * 2u64.pow(attempt)));
          attempt += 1;
          trace!(
            batch_index,
            attempt,
            backoff_ms = backoff.as_millis(),
            "Rate limited, retrying same batch"
          );
          tokio::time::sleep(backoff).await;
        }
        Err(err) => return Err(err),
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use std::sync::Mutex;

  use async_trait::async_trait;
  use pretty_assertions::assert_eq;

  use super::*;

  struct RecordingProvider {
    dimension: usize,
    batch_sizes: Mutex<Vec<usize>>,
    rate_limits_remaining: Mutex<u32>,
  }

  impl RecordingProvider {
    fn new(dimension: usize) -> Self {
      Self {
        dimension,
        batch_sizes: Mutex::new(Vec::new()),
        rate_limits_remaining: Mutex::new(0),
      }
    }

    fn rate_limiting(dimension: usize, times: u32) -> Self {
      Self {
        rate_limits_remaining: Mutex::new(times),
        ..Self::new(dimension)
      }
    }
  }

  #[async_trait]
  impl EmbeddingProvider for RecordingProvider {
    fn name(&self) -> &str {
      "recording"
    }

    fn model_id(&self) -> &str {
      "test-model"
    }

    fn dimensions(&self) -> usize {
      self.dimension
    }

    async fn embed_batch(&self, texts: &[&str], _mode: EmbeddingMode) -> Result<Vec<Vec<f32>>, EmbeddingError> {
      {
        let mut remaining = self.rate_limits_remaining.lock().unwrap();
        if *remaining > 0 {
          *remaining -= 1;
          return Err(EmbeddingError::RateLimited {
            retry_after: Some(Duration::from_millis(1)),
          });
        }
      }
      self.batch_sizes.lock().unwrap().push(texts.len());
      // Vector encodes the text length so order is checkable.
      Ok(texts.iter().map(|t| vec![t.len() as f32; self.dimension]).collect())
    }
  }

  fn config(batch_size: usize, max_tokens: usize) -> EmbeddingConfig {
    EmbeddingConfig {
      batch_size,
      batch_pause_ms: 0,
      max_tokens,
      ..EmbeddingConfig::default()
    }
  }

  #[tokio::test]
  async fn test_batch_splitting_respects_limits() {
    let provider = Arc::new(RecordingProvider::new(4));
    let embedder = Embedder::new(provider.clone(), &config(50, 1000));

    let texts: Vec<String> = (0..120).map(|i| format!("text {i}")).collect();
    let out = embedder.embed(&texts, EmbeddingMode::Document).await.unwrap();

    assert_eq!(out.len(), 120);
    assert_eq!(*provider.batch_sizes.lock().unwrap(), vec![50, 50, 20]);
  }

  #[tokio::test]
  async fn test_configured_batch_size_is_hard_capped() {
    let provider = Arc::new(RecordingProvider::new(4));
    let embedder = Embedder::new(provider.clone(), &config(500, 1000));

    let texts: Vec<String> = (0..150).map(|i| format!("t{i}")).collect();
    embedder.embed(&texts, EmbeddingMode::Document).await.unwrap();

    for size in provider.batch_sizes.lock().unwrap().iter() {
      assert!(*size <= 100);
    }
  }

  #[tokio::test]
  async fn test_order_and_length_preserved() {
    let provider = Arc::new(RecordingProvider::new(2));
    let embedder = Embedder::new(provider, &config(2, 1000));

    let texts = vec!["a".to_string(), "bbb".to_string(), "cc".to_string()];
    let out = embedder.embed(&texts, EmbeddingMode::Document).await.unwrap();

    assert_eq!(out.len(), 3);
    assert_eq!(out[0].vector[0], 1.0);
    assert_eq!(out[1].vector[0], 3.0);
    assert_eq!(out[2].vector[0], 2.0);
    for embedding in &out {
      assert_eq!(embedding.model, "test-model");
      assert_eq!(embedding.dimension, 2);
    }
  }

  #[tokio::test]
  async fn test_rate_limit_retries_same_batch() {
    let provider = Arc::new(RecordingProvider::rate_limiting(4, 2));
    let embedder = Embedder::new(provider.clone(), &config(10, 1000));

    let texts = vec!["hello".to_string()];
    let out = embedder.embed(&texts, EmbeddingMode::Document).await.unwrap();

    assert_eq!(out.len(), 1);
    // Two rate limits swallowed, one successful call recorded.
    assert_eq!(*provider.batch_sizes.lock().unwrap(), vec![1]);
  }

  #[tokio::test]
  async fn test_token_clamp_cuts_on_word_boundary() {
    let provider = Arc::new(RecordingProvider::new(2));
    // 2 tokens * 4 chars = 8 char budget.
    let embedder = Embedder::new(provider, &config(10, 2));

    let texts = vec!["alpha beta gamma delta".to_string(), "tiny".to_string()];
    let out = embedder.embed(&texts, EmbeddingMode::Document).await.unwrap();

    assert!(out[0].truncated);
    assert!(!out[1].truncated);
    // Clamped to "alpha" (cut at the space before "beta").
    assert_eq!(out[0].vector[0], 5.0);
  }

  #[test]
  fn test_clamp_without_whitespace_cuts_hard() {
    let (clamped, truncated) = clamp_to_budget(&"x".repeat(100), 4);
    assert!(truncated);
    assert_eq!(clamped.chars().count(), 16);
  }
}
