//! Semantic policy: coherence-preserving splits along paragraph and
//! sentence boundaries. Fragments never break mid-word and never exceed
//! `max_chunk_size`.

use crate::{ChunkOptions, Fragment, paragraph, sentence, slice, split_oversized};

pub fn split(chars: &[char], opts: &ChunkOptions) -> Vec<Fragment> {
  let target = opts.chunk_size.min(opts.max_chunk_size);
  let mut fragments = Vec::new();
  let mut open: Option<(usize, usize)> = None;

  for (p_start, p_end) in paragraph::spans(chars) {
    let p_len = p_end - p_start;

    // A paragraph too large for any fragment is packed sentence by
    // sentence instead.
    if p_len > opts.max_chunk_size {
      if let Some(span) = open.take() {
        fragments.push(fragment(chars, span));
      }
      pack_sentences(chars, p_start, p_end, target, opts.max_chunk_size, &mut fragments);
      continue;
    }

    match open {
      None => open = Some((p_start, p_end)),
      Some((start, end)) => {
        if p_end - start <= target {
          open = Some((start, p_end));
        } else {
          fragments.push(fragment(chars, (start, end)));
          open = Some((p_start, p_end));
        }
      }
    }
  }

  if let Some(span) = open {
    fragments.push(fragment(chars, span));
  }
  fragments
}

fn fragment(chars: &[char], (start, end): (usize, usize)) -> Fragment {
  Fragment {
    content: slice(chars, start, end),
    start,
    end,
  }
}

/// Pack the sentences of one oversized paragraph into fragments bounded
/// by `max`; a single oversized sentence falls back to whitespace splits.
fn pack_sentences(chars: &[char], p_start: usize, p_end: usize, target: usize, max: usize, out: &mut Vec<Fragment>) {
  let paragraph_chars = &chars[p_start..p_end];
  let mut open: Option<(usize, usize)> = None;

  for (s_start, s_end) in sentence::spans(paragraph_chars) {
    let (s_start, s_end) = (p_start + s_start, p_start + s_end);

    if s_end - s_start > max {
      if let Some(span) = open.take() {
        out.push(fragment(chars, span));
      }
      out.extend(split_oversized(chars, s_start, s_end, max));
      continue;
    }

    match open {
      None => open = Some((s_start, s_end)),
      Some((start, end)) => {
        if s_end - start <= target.max(1).min(max) {
          open = Some((start, s_end));
        } else {
          out.push(fragment(chars, (start, end)));
          open = Some((s_start, s_end));
        }
      }
    }
  }

  if let Some(span) = open {
    out.push(fragment(chars, span));
  }
}

#[cfg(test)]
mod tests {
  use pretty_assertions::assert_eq;

  use super::*;

  fn chars(text: &str) -> Vec<char> {
    text.chars().collect()
  }

  #[test]
  fn test_packs_whole_paragraphs_up_to_target() {
    let text = "Alpha paragraph.\n\nBeta paragraph.\n\nGamma paragraph.";
    let opts = ChunkOptions {
      chunk_size: 40,
      overlap: 0,
      min_chunk_size: 1,
      max_chunk_size: 400,
    };
    let fragments = split(&chars(text), &opts);
    // First two paragraphs fit in 40 chars together; the third opens a
    // new fragment.
    assert_eq!(fragments.len(), 2);
    assert!(fragments[0].content.contains("Alpha"));
    assert!(fragments[0].content.contains("Beta"));
    assert!(fragments[1].content.contains("Gamma"));
  }

  #[test]
  fn test_never_exceeds_max_and_never_breaks_words() {
    let text = "supercalifragilistic expialidocious ".repeat(300);
    let opts = ChunkOptions {
      chunk_size: 100,
      overlap: 0,
      min_chunk_size: 1,
      max_chunk_size: 120,
    };
    for fragment in split(&chars(&text), &opts) {
      let len = fragment.content.chars().count();
      assert!(len > 0 && len <= 120);
      // Cut points sit on whitespace: the char before a non-initial
      // fragment start is whitespace.
      if fragment.start > 0 {
        let before: char = text.chars().nth(fragment.start - 1).unwrap();
        assert!(before.is_whitespace(), "fragment starts mid-word");
      }
    }
  }

  #[test]
  fn test_oversized_paragraph_splits_at_sentences() {
    let sentences = "This is a complete sentence that carries some weight. ".repeat(10);
    let text = format!("Small intro.\n\n{sentences}");
    let opts = ChunkOptions {
      chunk_size: 120,
      overlap: 0,
      min_chunk_size: 1,
      max_chunk_size: 150,
    };
    let fragments = split(&chars(&text), &opts);
    assert!(fragments.len() > 2);
    for fragment in &fragments {
      assert!(fragment.content.chars().count() <= 150);
    }
  }
}
