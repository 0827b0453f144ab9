mod chunk;
mod job;

pub use chunk::{ChunkStore, HashGroup, MemoryChunkStore};
pub use job::{JobStore, MemoryJobStore};

use sift_core::{CoreError, ErrorKind};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
  #[error("not found: {0}")]
  NotFound(String),
  #[error("conflict: {0}")]
  Conflict(String),
  #[error("invalid input: {0}")]
  InvalidInput(String),
  #[error("storage error: {0}")]
  Storage(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;

impl From<StoreError> for CoreError {
  fn from(err: StoreError) -> Self {
    match err {
      StoreError::NotFound(m) => CoreError::not_found(m),
      StoreError::Conflict(m) => CoreError::conflict(m),
      StoreError::InvalidInput(m) => CoreError::validation(m),
      StoreError::Storage(m) => CoreError::new(ErrorKind::ExternalService, m),
    }
  }
}

impl From<CoreError> for StoreError {
  fn from(err: CoreError) -> Self {
    match err.kind {
      ErrorKind::NotFound => StoreError::NotFound(err.message),
      ErrorKind::Conflict => StoreError::Conflict(err.message),
      ErrorKind::Validation => StoreError::InvalidInput(err.message),
      _ => StoreError::Storage(err.message),
    }
  }
}
