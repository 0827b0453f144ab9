//! PDF extraction via pdf-extract, with lopdf for the page count.

use crate::{ExtractError, ExtractedText, FileType, Result};

pub fn extract(bytes: &[u8]) -> Result<ExtractedText> {
  let text =
    pdf_extract::extract_text_from_mem(bytes).map_err(|e| ExtractError::Parse(format!("pdf: {e}")))?;

  let page_count = lopdf::Document::load_mem(bytes)
    .map(|doc| doc.get_pages().len())
    .unwrap_or(1)
    .max(1);

  let title = lopdf::Document::load_mem(bytes).ok().and_then(|doc| pdf_title(&doc));

  Ok(ExtractedText::new(text, FileType::Pdf, page_count).with_title(title))
}

fn pdf_title(doc: &lopdf::Document) -> Option<String> {
  let info = doc.trailer.get(b"Info").ok()?;
  let info_ref = info.as_reference().ok()?;
  let info_dict = doc.get_object(info_ref).ok()?.as_dict().ok()?;
  let title = info_dict.get(b"Title").ok()?;
  let raw = title.as_str().ok()?;
  let decoded = String::from_utf8_lossy(raw).trim().to_string();
  (!decoded.is_empty()).then_some(decoded)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_garbage_bytes_are_a_parse_fault() {
    let err = extract(b"not a pdf at all").unwrap_err();
    assert!(matches!(err, ExtractError::Parse(_)));
  }
}
