//! Paragraph policy: split on blank lines, merge short runs forward.

use crate::{ChunkOptions, Fragment, slice, split_oversized};

/// Trimmed paragraph spans `(start, end)` in char offsets.
pub(crate) fn spans(chars: &[char]) -> Vec<(usize, usize)> {
  let mut out = Vec::new();
  let mut cursor = 0;

  while cursor < chars.len() {
    // Skip blank region.
    while cursor < chars.len() && chars[cursor].is_whitespace() {
      cursor += 1;
    }
    if cursor >= chars.len() {
      break;
    }

    // A paragraph runs until a blank line: '\n' followed by only
    // whitespace up to the next '\n'.
    let start = cursor;
    let mut end = cursor;
    while end < chars.len() {
      if chars[end] == '\n' {
        let mut probe = end + 1;
        while probe < chars.len() && chars[probe] != '\n' && chars[probe].is_whitespace() {
          probe += 1;
        }
        if probe >= chars.len() || chars[probe] == '\n' {
          break;
        }
      }
      end += 1;
    }

    // Trim trailing whitespace off the span.
    let mut trimmed_end = end;
    while trimmed_end > start && chars[trimmed_end - 1].is_whitespace() {
      trimmed_end -= 1;
    }
    if trimmed_end > start {
      out.push((start, trimmed_end));
    }
    cursor = end + 1;
  }

  out
}

/// Merge adjacent spans forward while the accumulated run is shorter than
/// `min_chunk_size`. Merged content is the exact source slice, separators
/// included.
pub(crate) fn merge_short_spans(spans: &[(usize, usize)], min_chunk_size: usize) -> Vec<(usize, usize)> {
  let mut merged: Vec<(usize, usize)> = Vec::new();
  let mut i = 0;
  while i < spans.len() {
    let (start, mut end) = spans[i];
    i += 1;
    while end - start < min_chunk_size && i < spans.len() {
      end = spans[i].1;
      i += 1;
    }
    merged.push((start, end));
  }
  merged
}

pub fn split(chars: &[char], opts: &ChunkOptions) -> Vec<Fragment> {
  let merged = merge_short_spans(&spans(chars), opts.min_chunk_size);

  let mut fragments = Vec::new();
  for (start, end) in merged {
    if end - start > opts.max_chunk_size {
      fragments.extend(split_oversized(chars, start, end, opts.max_chunk_size));
    } else {
      fragments.push(Fragment {
        content: slice(chars, start, end),
        start,
        end,
      });
    }
  }
  fragments
}
