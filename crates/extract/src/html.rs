//! HTML extraction: visible text only, script/style stripped.

use scraper::{Html, Selector};

use crate::{ExtractError, ExtractedText, FileType, Result};

const SKIPPED_ELEMENTS: &[&str] = &["script", "style", "head", "noscript", "template"];

pub fn extract(bytes: &[u8]) -> Result<ExtractedText> {
  let raw = String::from_utf8_lossy(bytes);
  let document = Html::parse_document(&raw);

  let title_selector = Selector::parse("title").map_err(|e| ExtractError::Parse(format!("html selector: {e:?}")))?;
  let title = document
    .select(&title_selector)
    .next()
    .map(|el| el.text().collect::<String>().trim().to_string());

  let mut text = String::new();
  for node in document.tree.nodes() {
    let Some(fragment) = node.value().as_text() else {
      continue;
    };
    let skipped = node.ancestors().any(|ancestor| {
      ancestor
        .value()
        .as_element()
        .is_some_and(|el| SKIPPED_ELEMENTS.contains(&el.name()))
    });
    if skipped {
      continue;
    }
    let trimmed = fragment.trim();
    if trimmed.is_empty() {
      continue;
    }
    if !text.is_empty() {
      text.push('\n');
    }
    text.push_str(trimmed);
  }

  Ok(ExtractedText::new(text, FileType::Html, 1).with_title(title))
}
