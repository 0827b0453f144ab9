//! Answer composition: grounded prompt assembly and confidence scoring.

use std::sync::Arc;
use std::time::Instant;

use llm::{ChatRequest, LlmClient};
use sift_core::CoreError;
use tracing::debug;
use uuid::Uuid;

use crate::retrieve::SearchResultItem;

const MAX_QUESTION_CHARS: usize = 1000;
const MAX_CONTEXT_CHUNKS: usize = 20;
const MIN_MAX_TOKENS: u32 = 50;
const MAX_MAX_TOKENS: u32 = 4000;

#[derive(Debug, Clone)]
pub struct AnswerCommand {
  pub user_id: Uuid,
  pub question: String,
  pub chunks: Vec<SearchResultItem>,
  pub model: String,
  pub max_tokens: u32,
  pub temperature: f32,
  pub system_prompt: Option<String>,
  pub include_sources: bool,
  pub language: String,
}

impl AnswerCommand {
  pub fn new(user_id: Uuid, question: impl Into<String>, chunks: Vec<SearchResultItem>, model: &str) -> Self {
    Self {
      user_id,
      question: question.into(),
      chunks,
      model: model.to_string(),
      max_tokens: 1000,
      temperature: 0.7,
      system_prompt: None,
      include_sources: true,
      language: "en".to_string(),
    }
  }

  fn validate(&self) -> Result<(), CoreError> {
    let question_len = self.question.trim().chars().count();
    if question_len == 0 {
      return Err(CoreError::validation("question must not be empty"));
    }
    if question_len > MAX_QUESTION_CHARS {
      return Err(CoreError::validation(format!(
        "question is over {MAX_QUESTION_CHARS} characters"
      )));
    }
    if self.chunks.is_empty() {
      return Err(CoreError::validation("at least one context chunk is required"));
    }
    if self.chunks.len() > MAX_CONTEXT_CHUNKS {
      return Err(CoreError::validation(format!(
        "too many context chunks: {} (max {MAX_CONTEXT_CHUNKS})",
        self.chunks.len()
      )));
    }
    if !(MIN_MAX_TOKENS..=MAX_MAX_TOKENS).contains(&self.max_tokens) {
      return Err(CoreError::validation(format!(
        "max_tokens must be in {MIN_MAX_TOKENS}..={MAX_MAX_TOKENS}"
      )));
    }
    if !(0.0..=2.0).contains(&self.temperature) {
      return Err(CoreError::validation("temperature must be within [0, 2]"));
    }
    Ok(())
  }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ComposedAnswer {
  pub answer_text: String,
  pub sources: Vec<SearchResultItem>,
  pub confidence: f32,
  pub tokens_used: u32,
  pub generation_ms: u64,
}

pub struct AnswerComposer {
  llm: Arc<dyn LlmClient>,
}

impl AnswerComposer {
  pub fn new(llm: Arc<dyn LlmClient>) -> Self {
    Self { llm }
  }

  pub async fn compose(&self, command: AnswerCommand) -> Result<ComposedAnswer, CoreError> {
    command.validate()?;
    let started = Instant::now();

    let system = command
      .system_prompt
      .clone()
      .unwrap_or_else(|| build_system_prompt(&command.language, command.include_sources));
    let prompt = build_user_prompt(&command.question, &command.chunks);

    let response = self
      .llm
      .generate(ChatRequest {
        model: command.model.clone(),
        system: Some(system),
        prompt,
        max_tokens: command.max_tokens,
        temperature: command.temperature,
      })
      .await?;

    let confidence = confidence_score(&command.chunks);
    let generation_ms = started.elapsed().as_millis() as u64;
    debug!(
      user_id = %command.user_id,
      chunks = command.chunks.len(),
      confidence,
      generation_ms,
      "Answer composed"
    );

    Ok(ComposedAnswer {
      answer_text: response.text,
      sources: command.chunks,
      confidence,
      tokens_used: response.tokens_used,
      generation_ms,
    })
  }
}

fn build_system_prompt(language: &str, include_sources: bool) -> String {
  let mut prompt = String::from(
    "You are the assistant of a document retrieval system. Answer using only \
     the provided documents. Do not invent information that is not in them; \
     say so when the documents do not contain the answer, and be specific \
     where they do.",
  );
  if include_sources {
    prompt.push_str(" Cite the document numbers you relied on at the end of the answer.");
  }
  if language != "en" {
    prompt.push_str(&format!(" Write the answer in '{language}'."));
  }
  prompt
}

/// Ordered context block, one indexed entry per chunk, then the question.
fn build_user_prompt(question: &str, chunks: &[SearchResultItem]) -> String {
  let mut blocks = Vec::with_capacity(chunks.len());
  for (index, chunk) in chunks.iter().enumerate() {
    let mut block = format!("[Document {}]\n{}", index + 1, chunk.content);

    let mut annotations = Vec::new();
    if !chunk.source.is_empty() {
      annotations.push(format!("source: {}", chunk.source));
    }
    if let Some(page) = chunk.page {
      annotations.push(format!("page: {page}"));
    }
    if let Some(title) = chunk.metadata.get("title").and_then(|v| v.as_str()) {
      annotations.push(format!("title: {title}"));
    }
    if !annotations.is_empty() {
      block.push_str(&format!("\n({})", annotations.join(", ")));
    }
    blocks.push(block);
  }

  format!(
    "Answer the question using the documents below.\n\n=== Documents ===\n{}\n\n=== Question ===\n{}",
    blocks.join("\n\n"),
    question
  )
}

/// `0.8 * mean(score) + 0.2 * min(n / 5, 1)`, clamped to 1.
fn confidence_score(chunks: &[SearchResultItem]) -> f32 {
  if chunks.is_empty() {
    return 0.0;
  }
  let mean: f32 = chunks.iter().map(|c| c.score).sum::<f32>() / chunks.len() as f32;
  let count_factor = (chunks.len() as f32 / 5.0).min(1.0);
  (0.8 * mean + 0.2 * count_factor).min(1.0)
}
