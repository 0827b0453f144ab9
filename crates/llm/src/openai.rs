//! OpenAI-compatible chat-completions client.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sift_core::LlmConfig;
use tracing::{debug, error, trace};

use crate::{ChatRequest, ChatResponse, LlmClient, LlmError, Result};

#[derive(Debug, Serialize)]
struct WireMessage<'a> {
  role: &'static str,
  content: &'a str,
}

#[derive(Debug, Serialize)]
struct WireRequest<'a> {
  model: &'a str,
  messages: Vec<WireMessage<'a>>,
  max_tokens: u32,
  temperature: f32,
}

#[derive(Debug, Deserialize)]
struct WireResponse {
  choices: Vec<WireChoice>,
  #[serde(default)]
  usage: Option<WireUsage>,
  #[serde(default)]
  model: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireChoice {
  message: WireChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct WireChoiceMessage {
  content: String,
}

#[derive(Debug, Deserialize)]
struct WireUsage {
  #[serde(default)]
  total_tokens: u32,
}

pub struct OpenAiChatClient {
  client: reqwest::Client,
  url: String,
  api_key: String,
  model: String,
}

impl OpenAiChatClient {
  pub fn new(config: &LlmConfig) -> Result<Self> {
    let api_key = config
      .api_key
      .clone()
      .or_else(|| std::env::var("SIFT_LLM_API_KEY").ok())
      .filter(|k| !k.is_empty())
      .ok_or(LlmError::NoApiKey)?;

    debug!(model = %config.model, url = %config.url, "LLM client initialized");
    Ok(Self {
      client: reqwest::Client::new(),
      url: config.url.clone(),
      api_key,
      model: config.model.clone(),
    })
  }
}

#[async_trait]
impl LlmClient for OpenAiChatClient {
  fn model_id(&self) -> &str {
    &self.model
  }

  async fn generate(&self, request: ChatRequest) -> Result<ChatResponse> {
    let mut messages = Vec::with_capacity(2);
    if let Some(system) = request.system.as_deref() {
      messages.push(WireMessage {
        role: "system",
        content: system,
      });
    }
    messages.push(WireMessage {
      role: "user",
      content: &request.prompt,
    });

    let wire = WireRequest {
      model: &request.model,
      messages,
      max_tokens: request.max_tokens,
      temperature: request.temperature,
    };

    trace!(model = %request.model, prompt_chars = request.prompt.len(), "Sending chat request");
    let start = Instant::now();

    let response = self
      .client
      .post(&self.url)
      .header("Authorization", format!("Bearer {}", self.api_key))
      .json(&wire)
      .send()
      .await
      .map_err(|e| {
        if e.is_timeout() {
          LlmError::Timeout
        } else {
          LlmError::Network(e.to_string())
        }
      })?;

    let status = response.status();
    if !status.is_success() {
      let body = response.text().await.unwrap_or_default();
      if status.as_u16() == 429 {
        return Err(LlmError::RateLimited);
      }
      error!(status = %status, "Chat request failed");
      return Err(LlmError::Provider {
        status: status.as_u16(),
        message: body,
      });
    }

    let parsed: WireResponse = response.json().await.map_err(|e| LlmError::Malformed(e.to_string()))?;
    let text = parsed
      .choices
      .into_iter()
      .next()
      .map(|c| c.message.content)
      .ok_or_else(|| LlmError::Malformed("no choices in response".into()))?;

    trace!(elapsed_ms = start.elapsed().as_millis(), "Chat response received");
    Ok(ChatResponse {
      text,
      tokens_used: parsed.usage.map(|u| u.total_tokens).unwrap_or(0),
      model: parsed.model.unwrap_or_else(|| request.model.clone()),
    })
  }

  async fn health(&self) -> Result<Duration> {
    let start = Instant::now();
    self
      .generate(ChatRequest {
        model: self.model.clone(),
        system: None,
        prompt: "ping".into(),
        max_tokens: 1,
        temperature: 0.0,
      })
      .await?;
    Ok(start.elapsed())
  }
}
