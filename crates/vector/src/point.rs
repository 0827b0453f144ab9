//! Points: a vector plus the scalar payload stored alongside it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sift_core::TextChunk;
use uuid::Uuid;

/// Scalar metadata stored next to a vector, used for filtering and for
/// building retrieval responses without a round-trip to the chunk store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payload {
  pub document_id: Uuid,
  pub chunk_id: Uuid,
  pub user_id: Uuid,
  pub content: String,
  #[serde(default)]
  pub source: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub page: Option<u32>,
  pub chunk_index: u32,
  pub created_at: DateTime<Utc>,
  #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
  pub user_metadata: serde_json::Map<String, Value>,
}

impl Payload {
  /// Build the payload for a chunk's point.
  pub fn from_chunk(chunk: &TextChunk) -> Self {
    let source = chunk
      .metadata
      .get("source")
      .and_then(Value::as_str)
      .unwrap_or_default()
      .to_string();
    let page = chunk.metadata.get("page").and_then(Value::as_u64).map(|p| p as u32);
    Self {
      document_id: chunk.document_id,
      chunk_id: chunk.id,
      user_id: chunk.user_id,
      content: chunk.content.clone(),
      source,
      page,
      chunk_index: chunk.sequence_number,
      created_at: chunk.created_at,
      user_metadata: chunk.metadata.clone(),
    }
  }

  /// The payload as a JSON value, for path-based filter evaluation.
  pub fn as_value(&self) -> Value {
    serde_json::to_value(self).unwrap_or(Value::Null)
  }
}

/// `(id, vector, payload)` triple stored in the index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Point {
  pub id: Uuid,
  pub vector: Vec<f32>,
  pub payload: Payload,
}

impl Point {
  pub fn new(id: Uuid, vector: Vec<f32>, payload: Payload) -> Self {
    Self { id, vector, payload }
  }
}
