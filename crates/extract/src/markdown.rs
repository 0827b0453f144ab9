//! Markdown extraction: strip formatting, keep text and block structure.

use pulldown_cmark::{Event, HeadingLevel, Parser, Tag, TagEnd};

use crate::{ExtractedText, FileType, Result};

pub fn extract(bytes: &[u8]) -> Result<ExtractedText> {
  let raw = String::from_utf8_lossy(bytes);
  let parser = Parser::new(&raw);

  let mut text = String::new();
  let mut title: Option<String> = None;
  let mut in_h1 = false;

  for event in parser {
    match event {
      Event::Start(Tag::Heading { level, .. }) => {
        in_h1 = level == HeadingLevel::H1 && title.is_none();
      }
      Event::Text(t) | Event::Code(t) => {
        if in_h1 {
          match &mut title {
            Some(existing) => existing.push_str(&t),
            None => title = Some(t.to_string()),
          }
        }
        text.push_str(&t);
      }
      Event::SoftBreak | Event::HardBreak => text.push('\n'),
      Event::End(TagEnd::Heading(_)) => {
        in_h1 = false;
        text.push_str("\n\n");
      }
      Event::End(TagEnd::Paragraph | TagEnd::Item | TagEnd::CodeBlock) => text.push_str("\n\n"),
      _ => {}
    }
  }

  let text = text.trim_end().to_string();
  Ok(ExtractedText::new(text, FileType::Md, 1).with_title(title))
}
