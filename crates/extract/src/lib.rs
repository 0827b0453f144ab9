//! Text extraction: file bytes + type -> plain text + structural metadata.
//!
//! Extraction is a pure function of its input: byte-identical files always
//! produce identical output.

mod docx;
mod html;
mod legacy;
mod markdown;
mod pdf;

use serde_json::Value;
use sift_core::{CoreError, ErrorKind};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum ExtractError {
  #[error("unsupported file type: {0}")]
  UnsupportedFileType(String),
  #[error("file too large: {size} bytes exceeds limit of {limit}")]
  FileTooLarge { size: u64, limit: u64 },
  /// Parser or I/O fault; retryable.
  #[error("extraction failed: {0}")]
  Parse(String),
}

pub type Result<T> = std::result::Result<T, ExtractError>;

impl From<ExtractError> for CoreError {
  fn from(err: ExtractError) -> Self {
    let kind = match &err {
      ExtractError::UnsupportedFileType(_) => ErrorKind::UnsupportedFileType,
      ExtractError::FileTooLarge { .. } => ErrorKind::FileTooLarge,
      ExtractError::Parse(_) => ErrorKind::ExternalService,
    };
    CoreError::new(kind, err.to_string())
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileType {
  Pdf,
  Docx,
  Doc,
  Txt,
  Html,
  Md,
}

impl FileType {
  pub fn as_str(&self) -> &'static str {
    match self {
      FileType::Pdf => "pdf",
      FileType::Docx => "docx",
      FileType::Doc => "doc",
      FileType::Txt => "txt",
      FileType::Html => "html",
      FileType::Md => "md",
    }
  }

  /// Parse a type name or file extension; anything else is unsupported.
  pub fn parse(raw: &str) -> Result<Self> {
    match raw.trim().trim_start_matches('.').to_ascii_lowercase().as_str() {
      "pdf" => Ok(FileType::Pdf),
      "docx" => Ok(FileType::Docx),
      "doc" => Ok(FileType::Doc),
      "txt" | "text" => Ok(FileType::Txt),
      "html" | "htm" => Ok(FileType::Html),
      "md" | "markdown" => Ok(FileType::Md),
      other => Err(ExtractError::UnsupportedFileType(other.to_string())),
    }
  }
}

impl std::fmt::Display for FileType {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}", self.as_str())
  }
}

#[derive(Debug, Clone)]
pub struct ExtractOptions {
  /// Input cap in bytes; a file exactly at the cap passes.
  pub max_file_size: u64,
}

impl Default for ExtractOptions {
  fn default() -> Self {
    Self {
      max_file_size: 50 * 1024 * 1024,
    }
  }
}

/// Extracted plain text plus structural metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedText {
  pub text: String,
  pub metadata: serde_json::Map<String, Value>,
  pub page_count: usize,
  pub word_count: usize,
}

impl ExtractedText {
  fn new(text: String, file_type: FileType, page_count: usize) -> Self {
    let word_count = text.split_whitespace().count();
    let mut metadata = serde_json::Map::new();
    metadata.insert("format".into(), Value::String(file_type.as_str().into()));
    Self {
      text,
      metadata,
      page_count,
      word_count,
    }
  }

  fn with_title(mut self, title: Option<String>) -> Self {
    if let Some(title) = title.filter(|t| !t.is_empty()) {
      self.metadata.insert("title".into(), Value::String(title));
    }
    self
  }
}

/// Extract plain text from `bytes` of the given type.
pub fn extract(bytes: &[u8], file_type: FileType, opts: &ExtractOptions) -> Result<ExtractedText> {
  let size = bytes.len() as u64;
  if size > opts.max_file_size {
    return Err(ExtractError::FileTooLarge {
      size,
      limit: opts.max_file_size,
    });
  }

  let result = match file_type {
    FileType::Pdf => pdf::extract(bytes),
    FileType::Docx => docx::extract(bytes),
    FileType::Doc => legacy::extract(bytes),
    FileType::Txt => extract_txt(bytes),
    FileType::Html => html::extract(bytes),
    FileType::Md => markdown::extract(bytes),
  }?;

  debug!(
    file_type = %file_type,
    bytes = size,
    chars = result.text.chars().count(),
    pages = result.page_count,
    words = result.word_count,
    "Text extracted"
  );
  Ok(result)
}

fn extract_txt(bytes: &[u8]) -> Result<ExtractedText> {
  let text = String::from_utf8_lossy(bytes).into_owned();
  Ok(ExtractedText::new(text, FileType::Txt, 1))
}

#[cfg(test)]
mod tests {
  use pretty_assertions::assert_eq;

  use super::*;

  #[test]
  fn test_file_type_parsing() {
    assert_eq!(FileType::parse("pdf").unwrap(), FileType::Pdf);
    assert_eq!(FileType::parse(".HTML").unwrap(), FileType::Html);
    assert_eq!(FileType::parse("markdown").unwrap(), FileType::Md);
    assert!(matches!(
      FileType::parse("xlsx").unwrap_err(),
      ExtractError::UnsupportedFileType(_)
    ));
  }

  #[test]
  fn test_size_cap_boundary() {
    let opts = ExtractOptions { max_file_size: 10 };

    // Exactly at the cap passes.
    let at_limit = b"0123456789";
    assert!(extract(at_limit, FileType::Txt, &opts).is_ok());

    // One byte over fails.
    let over = b"0123456789!";
    let err = extract(over, FileType::Txt, &opts).unwrap_err();
    assert!(matches!(err, ExtractError::FileTooLarge { size: 11, limit: 10 }));
  }

  #[test]
  fn test_txt_extraction_counts_words() {
    let result = extract(b"hello world\nthree words here", FileType::Txt, &ExtractOptions::default()).unwrap();
    assert_eq!(result.word_count, 5);
    assert_eq!(result.page_count, 1);
    assert_eq!(result.text, "hello world\nthree words here");
  }

  #[test]
  fn test_extraction_is_deterministic() {
    let bytes = b"# Title\n\nSome body text.";
    let a = extract(bytes, FileType::Md, &ExtractOptions::default()).unwrap();
    let b = extract(bytes, FileType::Md, &ExtractOptions::default()).unwrap();
    assert_eq!(a, b);
  }

  #[test]
  fn test_error_kinds_map_to_taxonomy() {
    let unsupported: CoreError = ExtractError::UnsupportedFileType("xls".into()).into();
    assert_eq!(unsupported.kind, ErrorKind::UnsupportedFileType);
    assert!(!unsupported.is_retryable());

    let too_large: CoreError = ExtractError::FileTooLarge { size: 2, limit: 1 }.into();
    assert_eq!(too_large.kind, ErrorKind::FileTooLarge);
    assert!(!too_large.is_retryable());

    let parse: CoreError = ExtractError::Parse("truncated stream".into()).into();
    assert!(parse.is_retryable());
  }
}
