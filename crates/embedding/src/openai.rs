//! OpenAI-compatible HTTP embedding provider.

use std::{sync::Arc, time::Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sift_core::EmbeddingConfig;
use tokio::sync::Mutex;
use tracing::{debug, error, trace, warn};

use crate::{
  EmbeddingError, EmbeddingMode, EmbeddingProvider,
  rate_limit::{RequestWindow, Slot, WindowConfig},
};

const QUERY_INSTRUCTION: &str = "Given a search query, retrieve relevant passages";

#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
  model: &'a str,
  input: Vec<&'a str>,
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
  data: Vec<EmbedData>,
}

#[derive(Debug, Deserialize)]
struct EmbedData {
  embedding: Vec<f32>,
}

#[derive(Clone)]
pub struct OpenAiEmbedder {
  client: reqwest::Client,
  url: String,
  api_key: String,
  model: String,
  dimension: usize,
  limiter: Arc<Mutex<RequestWindow>>,
}

impl OpenAiEmbedder {
  pub fn new(config: &EmbeddingConfig) -> Result<Self, EmbeddingError> {
    let api_key = config
      .api_key
      .clone()
      .or_else(|| std::env::var("SIFT_EMBEDDING_API_KEY").ok())
      .filter(|k| !k.is_empty())
      .ok_or(EmbeddingError::NoApiKey)?;

    debug!(model = %config.model, dimension = config.dimension, url = %config.url, "OpenAI embedder initialized");
    Ok(Self {
      client: reqwest::Client::new(),
      url: config.url.clone(),
      api_key,
      model: config.model.clone(),
      dimension: config.dimension,
      limiter: Arc::new(Mutex::new(RequestWindow::new(WindowConfig::default()))),
    })
  }

  /// Wait for a window slot, bounded by the limiter's `max_wait`.
  async fn acquire_slot(&self) -> Result<Slot, EmbeddingError> {
    let start = Instant::now();
    loop {
      let (result, max_wait) = {
        let mut limiter = self.limiter.lock().await;
        (limiter.try_acquire(), limiter.max_wait())
      };
      match result {
        Ok(slot) => return Ok(slot),
        Err(wait) => {
          if start.elapsed() + wait > max_wait {
            warn!(elapsed_ms = start.elapsed().as_millis(), "Rate-limit wait budget exceeded");
            return Err(EmbeddingError::RateLimited { retry_after: Some(wait) });
          }
          trace!(wait_ms = wait.as_millis(), "Waiting for rate-limit slot");
          tokio::time::sleep(wait).await;
        }
      }
    }
  }

  async fn refund_slot(&self, slot: Slot) {
    self.limiter.lock().await.refund(slot);
  }

  fn format_text<'a>(&self, text: &'a str, mode: EmbeddingMode) -> std::borrow::Cow<'a, str> {
    match mode {
      EmbeddingMode::Query => std::borrow::Cow::Owned(format!("Instruct: {QUERY_INSTRUCTION}\nQuery:{text}")),
      EmbeddingMode::Document => std::borrow::Cow::Borrowed(text),
    }
  }
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbedder {
  fn name(&self) -> &str {
    "openai"
  }

  fn model_id(&self) -> &str {
    &self.model
  }

  fn dimensions(&self) -> usize {
    self.dimension
  }

  async fn embed_batch(&self, texts: &[&str], mode: EmbeddingMode) -> Result<Vec<Vec<f32>>, EmbeddingError> {
    if texts.is_empty() {
      return Ok(Vec::new());
    }

    let formatted: Vec<std::borrow::Cow<'_, str>> = texts.iter().map(|t| self.format_text(t, mode)).collect();
    let input: Vec<&str> = formatted.iter().map(|c| c.as_ref()).collect();

    let slot = self.acquire_slot().await?;
    let request = EmbedRequest {
      model: &self.model,
      input,
    };

    trace!(batch_size = texts.len(), model = %self.model, "Sending embedding request");
    let start = Instant::now();

    let response = match self
      .client
      .post(&self.url)
      .header("Authorization", format!("Bearer {}", self.api_key))
      .json(&request)
      .send()
      .await
    {
      Ok(resp) => resp,
      Err(e) => {
        // The request never reached the provider; give the slot back.
        self.refund_slot(slot).await;
        if e.is_timeout() {
          return Err(EmbeddingError::Timeout);
        }
        return Err(EmbeddingError::Network(e.to_string()));
      }
    };

    let status = response.status();
    if !status.is_success() {
      let retry_after = response
        .headers()
        .get("retry-after")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok())
        .map(std::time::Duration::from_secs);
      let body = response.text().await.unwrap_or_default();

      if status.as_u16() == 429 {
        warn!(batch_size = texts.len(), model = %self.model, "Provider rate limit hit");
        return Err(EmbeddingError::RateLimited { retry_after });
      }
      if status.is_server_error() {
        // Server-side failure did not consume provider capacity.
        self.refund_slot(slot).await;
      }
      error!(status = %status, model = %self.model, "Embedding request failed");
      return Err(EmbeddingError::Provider(format!("{status}: {body}")));
    }

    let parsed: EmbedResponse = response
      .json()
      .await
      .map_err(|e| EmbeddingError::Provider(format!("malformed response: {e}")))?;

    if parsed.data.len() != texts.len() {
      return Err(EmbeddingError::BatchMismatch {
        expected: texts.len(),
        got: parsed.data.len(),
      });
    }

    trace!(
      batch_size = texts.len(),
      elapsed_ms = start.elapsed().as_millis(),
      "Embedding batch complete"
    );
    Ok(parsed.data.into_iter().map(|d| d.embedding).collect())
  }
}
