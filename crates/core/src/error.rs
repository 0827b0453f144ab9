//! Tagged error type shared across the pipeline.
//!
//! Every crate-level error maps into a `CoreError` carrying an `ErrorKind`;
//! the job engine decides retry vs. permanent-fail from the kind alone, and
//! the API layer translates kinds into status codes.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Classification of a failure, aligned with the retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
  /// Bad input. Never retried.
  Validation,
  /// A referenced entity does not exist.
  NotFound,
  /// Business-rule violation (e.g. duplicate non-terminal job). Never retried.
  Conflict,
  /// The file type is not in the supported set. Terminal per document.
  UnsupportedFileType,
  /// Input exceeds the configured size cap. Terminal per document.
  FileTooLarge,
  /// A downstream service (store, index, bus, provider) failed. Retryable.
  ExternalService,
  /// An operation exceeded its deadline. Retryable.
  Timeout,
  /// Uncaught failure. Retried once.
  Internal,
}

impl ErrorKind {
  /// Whether the engine may re-run a job that failed with this kind.
  pub fn is_retryable(&self) -> bool {
    matches!(self, ErrorKind::ExternalService | ErrorKind::Timeout | ErrorKind::Internal)
  }

  pub fn as_str(&self) -> &'static str {
    match self {
      ErrorKind::Validation => "validation",
      ErrorKind::NotFound => "not_found",
      ErrorKind::Conflict => "conflict",
      ErrorKind::UnsupportedFileType => "unsupported_file_type",
      ErrorKind::FileTooLarge => "file_too_large",
      ErrorKind::ExternalService => "external_service",
      ErrorKind::Timeout => "timeout",
      ErrorKind::Internal => "internal",
    }
  }
}

impl std::fmt::Display for ErrorKind {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}", self.as_str())
  }
}

/// A classified error with a message and an optional details map.
#[derive(Debug, Clone, PartialEq, thiserror::Error, Serialize, Deserialize)]
#[error("{kind}: {message}")]
pub struct CoreError {
  pub kind: ErrorKind,
  pub message: String,
  #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
  pub details: BTreeMap<String, String>,
}

impl CoreError {
  pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
    Self {
      kind,
      message: message.into(),
      details: BTreeMap::new(),
    }
  }

  pub fn validation(message: impl Into<String>) -> Self {
    Self::new(ErrorKind::Validation, message)
  }

  pub fn not_found(message: impl Into<String>) -> Self {
    Self::new(ErrorKind::NotFound, message)
  }

  pub fn conflict(message: impl Into<String>) -> Self {
    Self::new(ErrorKind::Conflict, message)
  }

  pub fn external(message: impl Into<String>) -> Self {
    Self::new(ErrorKind::ExternalService, message)
  }

  pub fn timeout(message: impl Into<String>) -> Self {
    Self::new(ErrorKind::Timeout, message)
  }

  pub fn internal(message: impl Into<String>) -> Self {
    Self::new(ErrorKind::Internal, message)
  }

  /// Attach a key/value detail for diagnostics and event payloads.
  pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
    self.details.insert(key.into(), value.into());
    self
  }

  pub fn is_retryable(&self) -> bool {
    self.kind.is_retryable()
  }
}
