//! Topic names and event types used across the pipeline.

pub const DOCUMENT_UPLOADED: &str = "document.uploaded";
pub const TEXT_EXTRACTED: &str = "text.extracted";
pub const CHUNKS_CREATED: &str = "chunks.created";
pub const EMBEDDINGS_GENERATED: &str = "embeddings.generated";
pub const CHUNKS_DEDUPLICATED: &str = "chunks.deduplicated";
pub const PROCESSING_FAILED: &str = "processing.failed";

/// Dead-letter topic for messages whose handler failed.
pub const DEAD_LETTER: &str = "processing.dlq";

/// All pipeline topics a full consumer wires up, dead letter excluded.
pub const PIPELINE_TOPICS: &[&str] = &[
  DOCUMENT_UPLOADED,
  TEXT_EXTRACTED,
  CHUNKS_CREATED,
  EMBEDDINGS_GENERATED,
  CHUNKS_DEDUPLICATED,
  PROCESSING_FAILED,
];
