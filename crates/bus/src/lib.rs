mod envelope;
mod memory;
pub mod topics;

pub use envelope::{EventEnvelope, Message};
pub use memory::{Consumer, MemoryBus};

use std::collections::BTreeMap;

use async_trait::async_trait;
use sift_core::CoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BusError {
  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),
  #[error("bus error: {0}")]
  Bus(String),
}

pub type Result<T> = std::result::Result<T, BusError>;

impl From<BusError> for CoreError {
  fn from(err: BusError) -> Self {
    CoreError::external(err.to_string())
  }
}

/// Producer side of the bus. Ordering is guaranteed per key: messages with
/// the same key land on the same partition and are appended in publish
/// order. Keyless messages spread round-robin with no ordering guarantee.
#[async_trait]
pub trait EventBus: Send + Sync {
  async fn publish(&self, topic: &str, key: Option<&str>, envelope: EventEnvelope) -> Result<()> {
    self.publish_with_headers(topic, key, envelope, BTreeMap::new()).await
  }

  async fn publish_with_headers(
    &self,
    topic: &str,
    key: Option<&str>,
    envelope: EventEnvelope,
    headers: BTreeMap<String, String>,
  ) -> Result<()>;
}

/// Message handler invoked by a consumer loop.
///
/// Delivery is at-least-once. The consumer commits the offset after this
/// returns, whether or not it succeeded; a failure additionally publishes
/// the message to the dead-letter topic so a poison message cannot wedge
/// its partition.
#[async_trait]
pub trait EventHandler: Send + Sync {
  async fn handle(&self, message: &Message) -> std::result::Result<(), CoreError>;
}
