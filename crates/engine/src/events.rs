//! Typed payloads for the pipeline topics.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentUploaded {
  pub document_id: Uuid,
  pub user_id: Uuid,
  pub file_path: String,
  pub file_type: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextExtracted {
  pub document_id: Uuid,
  pub user_id: Uuid,
  pub text_length: usize,
  pub page_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunksCreated {
  pub document_id: Uuid,
  pub user_id: Uuid,
  pub chunk_count: usize,
  pub chunk_ids: Vec<Uuid>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingsGenerated {
  pub document_id: Uuid,
  pub user_id: Uuid,
  pub embedding_count: usize,
  pub embedding_ids: Vec<Uuid>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunksDeduplicated {
  pub document_id: Uuid,
  pub removed_count: usize,
  pub groups_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessingFailed {
  pub job_id: Uuid,
  pub document_id: Uuid,
  pub kind: String,
  pub error_kind: String,
  pub error_message: String,
}

#[cfg(test)]
mod tests {
  use pretty_assertions::assert_eq;

  use super::*;

  #[test]
  fn test_payload_round_trips() {
    let payload = ChunksCreated {
      document_id: Uuid::new_v4(),
      user_id: Uuid::new_v4(),
      chunk_count: 2,
      chunk_ids: vec![Uuid::new_v4(), Uuid::new_v4()],
    };
    let value = serde_json::to_value(&payload).unwrap();
    let back: ChunksCreated = serde_json::from_value(value).unwrap();
    assert_eq!(back, payload);
  }
}
