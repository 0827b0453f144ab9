//! Best-effort extraction for legacy binary `.doc` files.
//!
//! The OLE container is not parsed; instead printable runs are salvaged
//! from the byte stream. Short runs are discarded as binary noise.

use crate::{ExtractError, ExtractedText, FileType, Result};

const MIN_RUN_LEN: usize = 4;

pub fn extract(bytes: &[u8]) -> Result<ExtractedText> {
  let mut runs: Vec<String> = Vec::new();
  let mut current = String::new();

  for &b in bytes {
    let c = b as char;
    if c.is_ascii_graphic() || c == ' ' || c == '\n' || c == '\t' {
      current.push(c);
    } else if !current.is_empty() {
      if current.trim().chars().count() >= MIN_RUN_LEN {
        runs.push(current.trim().to_string());
      }
      current.clear();
    }
  }
  if current.trim().chars().count() >= MIN_RUN_LEN {
    runs.push(current.trim().to_string());
  }

  if runs.is_empty() {
    return Err(ExtractError::Parse("doc: no text runs found".into()));
  }

  Ok(ExtractedText::new(runs.join("\n"), FileType::Doc, 1))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_salvages_printable_runs() {
    let mut bytes = vec![0u8, 1, 2];
    bytes.extend_from_slice(b"Recovered sentence from the document.");
    bytes.extend_from_slice(&[0xff, 0xfe, 0x00]);
    bytes.extend_from_slice(b"Another run.");
    bytes.push(0);

    let result = extract(&bytes).unwrap();
    assert!(result.text.contains("Recovered sentence from the document."));
    assert!(result.text.contains("Another run."));
  }

  #[test]
  fn test_discards_binary_noise() {
    let bytes = [0u8, 1, 2, b'a', 0, 3, b'x', b'y', 0xfe];
    let err = extract(&bytes).unwrap_err();
    assert!(matches!(err, ExtractError::Parse(_)));
  }
}
