//! DOCX extraction: unzip `word/document.xml` and pull run text.

use std::io::Read;

use quick_xml::Reader;
use quick_xml::events::Event;

use crate::{ExtractError, ExtractedText, FileType, Result};

pub fn extract(bytes: &[u8]) -> Result<ExtractedText> {
  let cursor = std::io::Cursor::new(bytes);
  let mut archive = zip::ZipArchive::new(cursor).map_err(|e| ExtractError::Parse(format!("docx zip: {e}")))?;
  let mut entry = archive
    .by_name("word/document.xml")
    .map_err(|e| ExtractError::Parse(format!("docx missing document.xml: {e}")))?;
  let mut xml = String::new();
  entry
    .read_to_string(&mut xml)
    .map_err(|e| ExtractError::Parse(format!("docx read: {e}")))?;

  let (text, page_breaks) = document_text(&xml)?;
  Ok(ExtractedText::new(text, FileType::Docx, page_breaks + 1))
}

/// Collect `<w:t>` run text, with paragraph boundaries as newlines.
/// Returns the text and the number of explicit page breaks.
fn document_text(xml: &str) -> Result<(String, usize)> {
  let mut reader = Reader::from_str(xml);
  let mut text = String::new();
  let mut page_breaks = 0usize;
  let mut in_run_text = false;

  loop {
    match reader.read_event() {
      Ok(Event::Start(e)) if e.local_name().as_ref() == b"t" => in_run_text = true,
      Ok(Event::End(e)) if e.local_name().as_ref() == b"t" => in_run_text = false,
      Ok(Event::End(e)) if e.local_name().as_ref() == b"p" => {
        if !text.ends_with('\n') {
          text.push('\n');
        }
      }
      Ok(Event::Empty(e)) if e.local_name().as_ref() == b"br" => {
        let is_page_break = e
          .try_get_attribute("w:type")
          .ok()
          .flatten()
          .is_some_and(|attr| attr.value.as_ref() == b"page");
        if is_page_break {
          page_breaks += 1;
        }
        text.push('\n');
      }
      Ok(Event::Text(t)) if in_run_text => {
        let unescaped = t.unescape().map_err(|e| ExtractError::Parse(format!("docx text: {e}")))?;
        text.push_str(&unescaped);
      }
      Ok(Event::Eof) => break,
      Ok(_) => {}
      Err(e) => return Err(ExtractError::Parse(format!("docx xml: {e}"))),
    }
  }

  Ok((text.trim_end().to_string(), page_breaks))
}
