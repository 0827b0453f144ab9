//! Scripted client for tests and offline runs: replays queued responses.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::{ChatRequest, ChatResponse, LlmClient, LlmError, Result};

pub struct ScriptedClient {
  model: String,
  script: Mutex<VecDeque<Result<String>>>,
}

impl ScriptedClient {
  pub fn new(model: &str) -> Self {
    Self {
      model: model.to_string(),
      script: Mutex::new(VecDeque::new()),
    }
  }

  /// Queue a canned answer.
  pub fn push_answer(&self, text: &str) {
    self.script.lock().unwrap().push_back(Ok(text.to_string()));
  }

  /// Queue a failure.
  pub fn push_error(&self, err: LlmError) {
    self.script.lock().unwrap().push_back(Err(err));
  }
}

#[async_trait]
impl LlmClient for ScriptedClient {
  fn model_id(&self) -> &str {
    &self.model
  }

  async fn generate(&self, request: ChatRequest) -> Result<ChatResponse> {
    let next = self.script.lock().unwrap().pop_front();
    let text = match next {
      Some(Ok(text)) => text,
      Some(Err(err)) => return Err(err),
      // Nothing scripted: echo a grounded-looking default.
      None => format!("Answer to: {}", request.prompt.lines().last().unwrap_or_default()),
    };
    let tokens_used = (text.split_whitespace().count() + request.prompt.split_whitespace().count()) as u32;
    Ok(ChatResponse {
      text,
      tokens_used,
      model: self.model.clone(),
    })
  }

  async fn health(&self) -> Result<Duration> {
    Ok(Duration::from_millis(1))
  }
}
