//! Fixed-size policy: stride by `chunk_size - overlap`, short tail.

use crate::{ChunkOptions, Fragment, slice};

pub fn split(chars: &[char], opts: &ChunkOptions) -> Vec<Fragment> {
  let size = opts.chunk_size.min(opts.max_chunk_size);
  let overlap = opts.overlap.min(size - 1);
  let stride = size - overlap;

  let mut fragments = Vec::new();
  let mut start = 0;
  while start < chars.len() {
    let end = (start + size).min(chars.len());
    fragments.push(Fragment {
      content: slice(chars, start, end),
      start,
      end,
    });
    if end == chars.len() {
      break;
    }
    start += stride;
  }
  fragments
}
