//! Extract stage: load the source file and pull plain text out of it.

use extract::{ExtractOptions, FileType};
use serde_json::{Value, json};
use sift_core::{CoreError, ProcessingJob, ProcessingMetadata};
use tracing::debug;

use super::{StageEvent, StageOutcome};
use crate::EngineContext;
use crate::events::TextExtracted;

pub async fn run(ctx: &EngineContext, job: &ProcessingJob) -> Result<StageOutcome, CoreError> {
  let file_path = job
    .param_str("file_path")
    .ok_or_else(|| CoreError::validation("extract job is missing 'file_path'"))?;
  let file_type_raw = job
    .param_str("file_type")
    .ok_or_else(|| CoreError::validation("extract job is missing 'file_type'"))?;

  let normalized = file_type_raw.trim().trim_start_matches('.').to_ascii_lowercase();
  if !ctx.extract.allowed_file_types.contains(&normalized) {
    return Err(CoreError::new(
      sift_core::ErrorKind::UnsupportedFileType,
      format!("file type '{normalized}' is not in the allowed set"),
    ));
  }
  let file_type = FileType::parse(&normalized)?;

  // Transient I/O faults are retryable.
  let bytes = tokio::fs::read(file_path)
    .await
    .map_err(|e| CoreError::external(format!("cannot read '{file_path}': {e}")))?;

  let opts = ExtractOptions {
    max_file_size: ctx.extract.max_file_size,
  };
  let extracted = extract::extract(&bytes, file_type, &opts)?;

  if extracted.text.trim().is_empty() {
    // Nothing downstream can do with an empty document.
    return Err(CoreError::validation("extracted text is empty"));
  }

  debug!(
    job_id = %job.id,
    document_id = %job.document_id,
    pages = extracted.page_count,
    words = extracted.word_count,
    "Extract stage complete"
  );

  let text_length = extracted.text.chars().count();
  let mut metadata = ProcessingMetadata::default();
  metadata
    .parameters
    .insert("file_type".into(), Value::String(normalized));
  metadata
    .parameters
    .insert("file_bytes".into(), Value::Number(bytes.len().into()));

  Ok(StageOutcome {
    result: Some(json!({
      "text": extracted.text,
      "page_count": extracted.page_count,
      "word_count": extracted.word_count,
      "metadata": Value::Object(extracted.metadata),
    })),
    metadata: Some(metadata),
    event: Some(StageEvent {
      topic: bus::topics::TEXT_EXTRACTED,
      payload: serde_json::to_value(TextExtracted {
        document_id: job.document_id,
        user_id: job.user_id,
        text_length,
        page_count: extracted.page_count,
      })
      .map_err(|e| CoreError::internal(e.to_string()))?,
    }),
  })
}
