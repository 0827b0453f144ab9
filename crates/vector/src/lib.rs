mod filter;
mod index;
mod memory;
mod point;

pub use filter::{Condition, Filter};
pub use index::{ScrollPage, SearchHit, VectorIndex};
pub use memory::MemoryVectorIndex;
pub use point::{Payload, Point};

use sift_core::CoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum VectorError {
  #[error("dimension mismatch: index holds {expected}, got {got}")]
  DimensionMismatch { expected: usize, got: usize },
  #[error("invalid vector: {0}")]
  InvalidVector(String),
  #[error("invalid filter: {0}")]
  InvalidFilter(String),
  #[error("index error: {0}")]
  Index(String),
}

pub type Result<T> = std::result::Result<T, VectorError>;

impl From<VectorError> for CoreError {
  fn from(err: VectorError) -> Self {
    match err {
      VectorError::DimensionMismatch { .. } | VectorError::InvalidVector(_) | VectorError::InvalidFilter(_) => {
        CoreError::validation(err.to_string())
      }
      VectorError::Index(m) => CoreError::external(m),
    }
  }
}
