//! Sentence policy: terminator split respecting common abbreviations.

use crate::{ChunkOptions, Fragment, paragraph, slice, split_oversized};

/// Abbreviations whose trailing period does not end a sentence.
const ABBREVIATIONS: &[&str] = &[
  "mr", "mrs", "ms", "dr", "prof", "sr", "jr", "st", "vs", "etc", "inc", "ltd", "co", "no", "fig", "al", "approx",
];

fn is_terminator(c: char) -> bool {
  matches!(c, '.' | '!' | '?')
}

/// Word immediately preceding position `i`, lowercased letters only.
fn preceding_word(chars: &[char], i: usize) -> String {
  let mut start = i;
  while start > 0 && chars[start - 1].is_alphabetic() {
    start -= 1;
  }
  chars[start..i].iter().collect::<String>().to_lowercase()
}

fn is_abbreviation_dot(chars: &[char], i: usize) -> bool {
  // Dotted initialisms: "e.g.", "i.e.", "U.S." leave a period two back.
  if i >= 2 && chars[i - 2] == '.' {
    return true;
  }
  let word = preceding_word(chars, i);
  !word.is_empty() && ABBREVIATIONS.contains(&word.as_str())
}

fn is_sentence_boundary(chars: &[char], i: usize) -> bool {
  if !is_terminator(chars[i]) {
    return false;
  }
  if chars[i] == '.' && is_abbreviation_dot(chars, i) {
    return false;
  }
  // End of text always closes the sentence.
  let Some(next) = chars.get(i + 1) else {
    return true;
  };
  if !next.is_whitespace() {
    return false;
  }
  // Require the next sentence to open with an uppercase letter, digit or
  // quote, so "3.14 approx. of pi" stays together.
  let mut probe = i + 1;
  while probe < chars.len() && chars[probe].is_whitespace() {
    probe += 1;
  }
  match chars.get(probe) {
    None => true,
    Some(c) => c.is_uppercase() || c.is_numeric() || matches!(c, '"' | '\'' | '(' | '[' | '\u{201c}'),
  }
}

/// Sentence spans `(start, end)`, trimmed to non-whitespace.
pub(crate) fn spans(chars: &[char]) -> Vec<(usize, usize)> {
  let mut out = Vec::new();
  let mut start = 0;
  while start < chars.len() && chars[start].is_whitespace() {
    start += 1;
  }

  let mut i = start;
  while i < chars.len() {
    if is_sentence_boundary(chars, i) {
      // Swallow a run of terminators ("?!", "...").
      let mut end = i + 1;
      while end < chars.len() && is_terminator(chars[end]) {
        end += 1;
      }
      if end > start {
        out.push((start, end));
      }
      start = end;
      while start < chars.len() && chars[start].is_whitespace() {
        start += 1;
      }
      i = start;
    } else {
      i += 1;
    }
  }

  if start < chars.len() {
    let mut end = chars.len();
    while end > start && chars[end - 1].is_whitespace() {
      end -= 1;
    }
    if end > start {
      out.push((start, end));
    }
  }
  out
}

pub fn split(chars: &[char], opts: &ChunkOptions) -> Vec<Fragment> {
  let merged = paragraph::merge_short_spans(&spans(chars), opts.min_chunk_size);

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
