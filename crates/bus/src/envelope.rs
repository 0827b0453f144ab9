//! The JSON envelope every bus message carries.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Standard event envelope: `{event_type, source, correlation_id?,
/// timestamp, data}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
  pub event_type: String,
  pub source: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub correlation_id: Option<String>,
  pub timestamp: DateTime<Utc>,
  pub data: Value,
}

impl EventEnvelope {
  pub fn new(event_type: impl Into<String>, data: Value) -> Self {
    Self {
      event_type: event_type.into(),
      source: "sift".to_string(),
      correlation_id: None,
      timestamp: Utc::now(),
      data,
    }
  }

  pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
    self.correlation_id = Some(correlation_id.into());
    self
  }
}

/// A delivered message: the envelope plus its position in the log.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
  pub topic: String,
  pub partition: usize,
  pub offset: u64,
  pub key: Option<String>,
  pub headers: BTreeMap<String, String>,
  pub envelope: EventEnvelope,
}

#[cfg(test)]
mod tests {
  use pretty_assertions::assert_eq;
  use serde_json::json;

  use super::*;

  #[test]
  fn test_envelope_round_trip() {
    let envelope = EventEnvelope::new("text_extracted", json!({"document_id": "d1", "page_count": 3}))
      .with_correlation_id("corr-7");
    let json = serde_json::to_string(&envelope).unwrap();
    let back: EventEnvelope = serde_json::from_str(&json).unwrap();
    assert_eq!(back, envelope);
  }

  #[test]
  fn test_envelope_defaults() {
    let envelope = EventEnvelope::new("chunks_created", json!({}));
    assert_eq!(envelope.source, "sift");
    assert!(envelope.correlation_id.is_none());
  }
}
