//! Fragmentation policies: plain text -> ordered fragments with offsets.
//!
//! Offsets are char indices into the source text. For the fixed-size,
//! paragraph and sentence policies a fragment's content is exactly the
//! source slice `[start, end)`, so offsets recover content losslessly.

mod fixed;
mod paragraph;
mod semantic;
mod sentence;

use serde::{Deserialize, Serialize};
use sift_core::{ChunkKind, ChunkingConfig, CoreError};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum ChunkerError {
  #[error("text is empty")]
  EmptyText,
  #[error("invalid options: {0}")]
  InvalidOptions(String),
}

pub type Result<T> = std::result::Result<T, ChunkerError>;

impl From<ChunkerError> for CoreError {
  fn from(err: ChunkerError) -> Self {
    CoreError::validation(err.to_string())
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkOptions {
  /// Target fragment size in chars (fixed-size stride base, semantic target).
  pub chunk_size: usize,
  /// Overlap between consecutive fixed-size fragments.
  pub overlap: usize,
  /// Fragments shorter than this merge forward (paragraph/sentence).
  pub min_chunk_size: usize,
  /// Hard upper bound on fragment length, all policies.
  pub max_chunk_size: usize,
}

impl Default for ChunkOptions {
  fn default() -> Self {
    Self {
      chunk_size: 1000,
      overlap: 200,
      min_chunk_size: 100,
      max_chunk_size: 4000,
    }
  }
}

impl From<&ChunkingConfig> for ChunkOptions {
  fn from(config: &ChunkingConfig) -> Self {
    Self {
      chunk_size: config.chunk_size,
      overlap: config.chunk_overlap,
      min_chunk_size: config.min_chunk_size,
      max_chunk_size: config.max_chunk_size,
    }
  }
}

impl ChunkOptions {
  fn validate(&self) -> Result<()> {
    if self.chunk_size == 0 {
      return Err(ChunkerError::InvalidOptions("chunk_size must be > 0".into()));
    }
    if self.overlap >= self.chunk_size {
      return Err(ChunkerError::InvalidOptions(format!(
        "overlap {} must be smaller than chunk_size {}",
        self.overlap, self.chunk_size
      )));
    }
    if self.max_chunk_size == 0 {
      return Err(ChunkerError::InvalidOptions("max_chunk_size must be > 0".into()));
    }
    Ok(())
  }
}

/// One produced fragment. `start`/`end` are char offsets into the source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fragment {
  pub content: String,
  pub start: usize,
  pub end: usize,
}

/// Fragment `text` with the given policy.
///
/// Every returned fragment satisfies `0 < content.chars().count() <=
/// max_chunk_size`. Output is ordered by `(start, content)`.
pub fn chunk(text: &str, kind: ChunkKind, opts: &ChunkOptions) -> Result<Vec<Fragment>> {
  opts.validate()?;
  if text.trim().is_empty() {
    return Err(ChunkerError::EmptyText);
  }

  let chars: Vec<char> = text.chars().collect();
  let mut fragments = match kind {
    ChunkKind::FixedSize => fixed::split(&chars, opts),
    ChunkKind::Paragraph => paragraph::split(&chars, opts),
    ChunkKind::Sentence => sentence::split(&chars, opts),
    ChunkKind::Semantic => semantic::split(&chars, opts),
  };

  fragments.retain(|f| !f.content.is_empty());
  fragments.sort_by(|a, b| a.start.cmp(&b.start).then(a.content.cmp(&b.content)));

  debug!(
    policy = %kind,
    chars = chars.len(),
    fragments = fragments.len(),
    "Text fragmented"
  );
  Ok(fragments)
}

/// Exact source slice by char offsets.
pub(crate) fn slice(chars: &[char], start: usize, end: usize) -> String {
  chars[start..end].iter().collect()
}

/// Split an oversized span into `max` sized pieces at char granularity,
/// preferring to cut at whitespace so no fragment breaks mid-word.
pub(crate) fn split_oversized(chars: &[char], start: usize, end: usize, max: usize) -> Vec<Fragment> {
  let mut out = Vec::new();
  let mut cursor = start;
  while cursor < end {
    let mut cut = (cursor + max).min(end);
    if cut < end {
      // Back up to the last whitespace inside the window.
      if let Some(ws) = (cursor + 1..cut).rev().find(|&i| chars[i].is_whitespace()) {
        cut = ws + 1;
      }
    }
    out.push(Fragment {
      content: slice(chars, cursor, cut),
      start: cursor,
      end: cut,
    });
    cursor = cut;
  }
  out
}
