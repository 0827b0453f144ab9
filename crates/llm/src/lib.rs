//! LLM call contract and clients.

mod openai;
mod scripted;

use std::time::Duration;

pub use openai::OpenAiChatClient;
pub use scripted::ScriptedClient;

use async_trait::async_trait;
use sift_core::{CoreError, ErrorKind};

#[derive(Debug, thiserror::Error)]
pub enum LlmError {
  #[error("no api key configured for provider")]
  NoApiKey,
  #[error("rate limited by provider")]
  RateLimited,
  /// Non-success response. 4xx means the call can never succeed as
  /// issued; 5xx is a transient provider fault.
  #[error("provider returned {status}: {message}")]
  Provider { status: u16, message: String },
  #[error("network error: {0}")]
  Network(String),
  #[error("request timed out")]
  Timeout,
  #[error("malformed response: {0}")]
  Malformed(String),
}

pub type Result<T> = std::result::Result<T, LlmError>;

impl From<LlmError> for CoreError {
  fn from(err: LlmError) -> Self {
    let kind = match &err {
      LlmError::NoApiKey => ErrorKind::Validation,
      LlmError::Timeout => ErrorKind::Timeout,
      // A 4xx answer will not change on retry.
      LlmError::Provider { status, .. } if *status < 500 => ErrorKind::Validation,
      _ => ErrorKind::ExternalService,
    };
    CoreError::new(kind, err.to_string())
  }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChatRequest {
  pub model: String,
  pub system: Option<String>,
  pub prompt: String,
  pub max_tokens: u32,
  pub temperature: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChatResponse {
  pub text: String,
  pub tokens_used: u32,
  pub model: String,
}

/// A chat-completion provider.
#[async_trait]
pub trait LlmClient: Send + Sync {
  fn model_id(&self) -> &str;

  async fn generate(&self, request: ChatRequest) -> Result<ChatResponse>;

  /// Liveness probe; returns the round-trip time.
  async fn health(&self) -> Result<Duration>;
}
