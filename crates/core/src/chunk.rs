//! Text-chunk and embedding entities.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::CoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkKind {
  Paragraph,
  Sentence,
  FixedSize,
  Semantic,
}

impl ChunkKind {
  pub fn as_str(&self) -> &'static str {
    match self {
      ChunkKind::Paragraph => "paragraph",
      ChunkKind::Sentence => "sentence",
      ChunkKind::FixedSize => "fixed_size",
      ChunkKind::Semantic => "semantic",
    }
  }
}

impl std::fmt::Display for ChunkKind {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}", self.as_str())
  }
}

impl std::str::FromStr for ChunkKind {
  type Err = ();

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "paragraph" => Ok(ChunkKind::Paragraph),
      "sentence" => Ok(ChunkKind::Sentence),
      "fixed_size" => Ok(ChunkKind::FixedSize),
      "semantic" => Ok(ChunkKind::Semantic),
      _ => Err(()),
    }
  }
}

/// SHA-256 over whitespace-normalised content, hex encoded.
///
/// Normalisation collapses runs of whitespace to a single space and trims,
/// so chunks differing only in spacing or line breaks hash identically.
pub fn normalized_content_hash(content: &str) -> String {
  let normalized: Vec<&str> = content.split_whitespace().collect();
  let mut hasher = Sha256::new();
  hasher.update(normalized.join(" ").as_bytes());
  hex::encode(hasher.finalize())
}

/// A contiguous slice of a document's text.
///
/// Immutable once written except for `embedding_id`, which is set exactly
/// once when the chunk's vector lands in the index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextChunk {
  pub id: Uuid,
  pub document_id: Uuid,
  pub user_id: Uuid,
  pub content: String,
  pub kind: ChunkKind,
  pub sequence_number: u32,
  /// Char offset of the first content char in the source text.
  pub start_offset: usize,
  /// Char offset one past the last content char in the source text.
  pub end_offset: usize,
  #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
  pub metadata: serde_json::Map<String, Value>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub embedding_id: Option<Uuid>,
  pub created_at: DateTime<Utc>,
}

impl TextChunk {
  pub fn new(
    document_id: Uuid,
    user_id: Uuid,
    content: impl Into<String>,
    kind: ChunkKind,
    sequence_number: u32,
    start_offset: usize,
    end_offset: usize,
  ) -> Result<Self, CoreError> {
    let content = content.into();
    if content.is_empty() {
      return Err(CoreError::validation("chunk content must not be empty"));
    }
    if start_offset > end_offset {
      return Err(CoreError::validation(format!(
        "chunk offsets out of order: {start_offset} > {end_offset}"
      )));
    }
    Ok(Self {
      id: Uuid::new_v4(),
      document_id,
      user_id,
      content,
      kind,
      sequence_number,
      start_offset,
      end_offset,
      metadata: serde_json::Map::new(),
      embedding_id: None,
      created_at: Utc::now(),
    })
  }

  pub fn with_metadata(mut self, metadata: serde_json::Map<String, Value>) -> Self {
    self.metadata = metadata;
    self
  }

  pub fn content_hash(&self) -> String {
    normalized_content_hash(&self.content)
  }

  pub fn word_count(&self) -> usize {
    self.content.split_whitespace().count()
  }
}

/// A stored vector for one chunk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingRecord {
  pub id: Uuid,
  pub chunk_id: Uuid,
  pub document_id: Uuid,
  pub model: String,
  pub dimension: usize,
  pub vector: Vec<f32>,
  pub created_at: DateTime<Utc>,
}

impl EmbeddingRecord {
  pub fn new(chunk_id: Uuid, document_id: Uuid, model: impl Into<String>, vector: Vec<f32>) -> Result<Self, CoreError> {
    if vector.iter().any(|v| !v.is_finite()) {
      return Err(CoreError::validation("embedding vector has non-finite components"));
    }
    Ok(Self {
      id: Uuid::new_v4(),
      chunk_id,
      document_id,
      model: model.into(),
      dimension: vector.len(),
      vector,
      created_at: Utc::now(),
    })
  }
}
