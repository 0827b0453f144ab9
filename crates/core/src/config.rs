//! Environment-driven configuration, validated once at startup.
//!
//! Every component receives only the section it needs; nothing reads the
//! environment after process start.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum ConfigError {
  #[error("invalid value for {key}: {message}")]
  Invalid { key: &'static str, message: String },
}

fn invalid(key: &'static str, message: impl Into<String>) -> ConfigError {
  ConfigError::Invalid {
    key,
    message: message.into(),
  }
}

/// Parse a human-readable byte size: `N`, `NKB`, `NMB`, `NGB` (case-insensitive).
pub fn parse_byte_size(raw: &str) -> Result<u64, String> {
  let s = raw.trim().to_ascii_uppercase();
  let (digits, multiplier) = if let Some(n) = s.strip_suffix("GB") {
    (n, 1024 * 1024 * 1024)
  } else if let Some(n) = s.strip_suffix("MB") {
    (n, 1024 * 1024)
  } else if let Some(n) = s.strip_suffix("KB") {
    (n, 1024)
  } else {
    (s.as_str(), 1)
  };
  let value: u64 = digits
    .trim()
    .parse()
    .map_err(|_| format!("cannot parse '{raw}' as a byte size"))?;
  value
    .checked_mul(multiplier)
    .ok_or_else(|| format!("byte size '{raw}' overflows"))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
  /// Default fragment size in chars for the fixed-size policy.
  pub chunk_size: usize,
  /// Overlap between consecutive fixed-size fragments.
  pub chunk_overlap: usize,
  /// Fragments shorter than this are merged forward (paragraph/sentence).
  pub min_chunk_size: usize,
  /// No produced fragment exceeds this many chars.
  pub max_chunk_size: usize,
}

impl Default for ChunkingConfig {
  fn default() -> Self {
    Self {
      chunk_size: 1000,
      chunk_overlap: 200,
      min_chunk_size: 100,
      max_chunk_size: 4000,
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EmbedderKind {
  /// OpenAI-compatible HTTP endpoint.
  #[default]
  OpenAi,
  /// Deterministic hash-based vectors, for offline and test runs.
  Hash,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
  pub provider: EmbedderKind,
  pub model: String,
  pub dimension: usize,
  /// Default texts per provider request; hard-capped at 100.
  pub batch_size: usize,
  /// Pause between consecutive batches, to smooth request rate.
  pub batch_pause_ms: u64,
  /// Approximate model token budget per input text.
  pub max_tokens: usize,
  pub url: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub api_key: Option<String>,
}

impl Default for EmbeddingConfig {
  fn default() -> Self {
    Self {
      provider: EmbedderKind::OpenAi,
      model: "text-embedding-3-small".to_string(),
      dimension: 1536,
      batch_size: 50,
      batch_pause_ms: 100,
      max_tokens: 8192,
      url: "https://api.openai.com/v1/embeddings".to_string(),
      api_key: None,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VectorConfig {
  pub collection: String,
  pub vector_size: usize,
  pub distance: String,
}

impl Default for VectorConfig {
  fn default() -> Self {
    Self {
      collection: "document_chunks".to_string(),
      vector_size: 1536,
      distance: "cosine".to_string(),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractConfig {
  /// Extractor input cap in bytes.
  pub max_file_size: u64,
  pub allowed_file_types: Vec<String>,
}

impl Default for ExtractConfig {
  fn default() -> Self {
    Self {
      max_file_size: 50 * 1024 * 1024,
      allowed_file_types: ["pdf", "docx", "doc", "txt", "html", "md"]
        .iter()
        .map(|s| s.to_string())
        .collect(),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
  /// Worker-pool size.
  pub max_concurrent_processing: usize,
  pub max_retries: u32,
  /// Worker poll interval when no job is claimable, in milliseconds.
  pub poll_interval_ms: u64,
  /// Soft deadline per job, in seconds.
  pub job_deadline_secs: u64,
  /// Grace period for in-flight jobs at shutdown, in seconds.
  pub shutdown_grace_secs: u64,
  /// Initial retry backoff, in milliseconds; doubles per attempt.
  pub backoff_initial_ms: u64,
  /// Backoff ceiling, in milliseconds.
  pub backoff_max_ms: u64,
}

impl Default for EngineConfig {
  fn default() -> Self {
    Self {
      max_concurrent_processing: 5,
      max_retries: 3,
      poll_interval_ms: 50,
      job_deadline_secs: 300,
      shutdown_grace_secs: 10,
      backoff_initial_ms: 1_000,
      backoff_max_ms: 60_000,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
  pub model: String,
  pub url: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub api_key: Option<String>,
  pub max_tokens: u32,
  pub temperature: f32,
}

impl Default for LlmConfig {
  fn default() -> Self {
    Self {
      model: "gpt-4o-mini".to_string(),
      url: "https://api.openai.com/v1/chat/completions".to_string(),
      api_key: None,
      max_tokens: 1000,
      temperature: 0.7,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
  pub chunking: ChunkingConfig,
  pub embedding: EmbeddingConfig,
  pub vector: VectorConfig,
  pub extract: ExtractConfig,
  pub engine: EngineConfig,
  pub llm: LlmConfig,
}

impl Config {
  /// Build from `SIFT_*` environment variables, falling back to defaults.
  pub fn from_env() -> Result<Self, ConfigError> {
    let mut config = Config::default();

    if let Some(v) = env_var("SIFT_CHUNK_SIZE") {
      config.chunking.chunk_size = v.parse().map_err(|_| invalid("SIFT_CHUNK_SIZE", &v))?;
    }
    if let Some(v) = env_var("SIFT_CHUNK_OVERLAP") {
      config.chunking.chunk_overlap = v.parse().map_err(|_| invalid("SIFT_CHUNK_OVERLAP", &v))?;
    }
    if let Some(v) = env_var("SIFT_MAX_CONCURRENT_PROCESSING") {
      config.engine.max_concurrent_processing =
        v.parse().map_err(|_| invalid("SIFT_MAX_CONCURRENT_PROCESSING", &v))?;
    }
    if let Some(v) = env_var("SIFT_BATCH_SIZE") {
      config.embedding.batch_size = v.parse().map_err(|_| invalid("SIFT_BATCH_SIZE", &v))?;
    }
    if let Some(v) = env_var("SIFT_EMBEDDING_MODEL") {
      config.embedding.model = v;
    }
    if let Some(v) = env_var("SIFT_EMBEDDING_DIMENSION") {
      config.embedding.dimension = v.parse().map_err(|_| invalid("SIFT_EMBEDDING_DIMENSION", &v))?;
    }
    if let Some(v) = env_var("SIFT_EMBEDDING_URL") {
      config.embedding.url = v;
    }
    if let Some(v) = env_var("SIFT_EMBEDDING_API_KEY") {
      config.embedding.api_key = Some(v);
    }
    if let Some(v) = env_var("SIFT_MAX_FILE_SIZE") {
      config.extract.max_file_size = parse_byte_size(&v).map_err(|e| invalid("SIFT_MAX_FILE_SIZE", e))?;
    }
    if let Some(v) = env_var("SIFT_ALLOWED_FILE_TYPES") {
      config.extract.allowed_file_types = v.split(',').map(|s| s.trim().to_lowercase()).collect();
    }
    if let Some(v) = env_var("SIFT_VECTOR_COLLECTION") {
      config.vector.collection = v;
    }
    if let Some(v) = env_var("SIFT_VECTOR_SIZE") {
      config.vector.vector_size = v.parse().map_err(|_| invalid("SIFT_VECTOR_SIZE", &v))?;
    }
    if let Some(v) = env_var("SIFT_VECTOR_DISTANCE") {
      config.vector.distance = v;
    }
    if let Some(v) = env_var("SIFT_LLM_MODEL") {
      config.llm.model = v;
    }
    if let Some(v) = env_var("SIFT_LLM_URL") {
      config.llm.url = v;
    }
    if let Some(v) = env_var("SIFT_LLM_API_KEY") {
      config.llm.api_key = Some(v);
    }

    config.validate()?;
    debug!(
      chunk_size = config.chunking.chunk_size,
      workers = config.engine.max_concurrent_processing,
      model = %config.embedding.model,
      "Configuration loaded"
    );
    Ok(config)
  }

  pub fn validate(&self) -> Result<(), ConfigError> {
    if self.chunking.chunk_size == 0 {
      return Err(invalid("SIFT_CHUNK_SIZE", "must be > 0"));
    }
    if self.chunking.chunk_overlap >= self.chunking.chunk_size {
      return Err(invalid("SIFT_CHUNK_OVERLAP", "must be smaller than chunk_size"));
    }
    if self.engine.max_concurrent_processing == 0 {
      return Err(invalid("SIFT_MAX_CONCURRENT_PROCESSING", "must be > 0"));
    }
    if self.embedding.batch_size == 0 {
      return Err(invalid("SIFT_BATCH_SIZE", "must be > 0"));
    }
    if self.embedding.dimension == 0 {
      return Err(invalid("SIFT_EMBEDDING_DIMENSION", "must be > 0"));
    }
    if self.vector.vector_size != self.embedding.dimension {
      return Err(invalid(
        "SIFT_VECTOR_SIZE",
        format!(
          "vector size {} does not match embedding dimension {}",
          self.vector.vector_size, self.embedding.dimension
        ),
      ));
    }
    if self.extract.allowed_file_types.is_empty() {
      return Err(invalid("SIFT_ALLOWED_FILE_TYPES", "must not be empty"));
    }
    Ok(())
  }
}

fn env_var(key: &str) -> Option<String> {
  std::env::var(key).ok().filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
  use pretty_assertions::assert_eq;

  use super::*;

  #[test]
  fn test_parse_byte_size_units() {
    assert_eq!(parse_byte_size("1024").unwrap(), 1024);
    assert_eq!(parse_byte_size("4KB").unwrap(), 4 * 1024);
    assert_eq!(parse_byte_size("50MB").unwrap(), 50 * 1024 * 1024);
    assert_eq!(parse_byte_size("2GB").unwrap(), 2 * 1024 * 1024 * 1024);
    assert_eq!(parse_byte_size(" 10 mb ").unwrap(), 10 * 1024 * 1024);
  }

  #[test]
  fn test_parse_byte_size_rejects_garbage() {
    assert!(parse_byte_size("fifty").is_err());
    assert!(parse_byte_size("10TB").is_err());
    assert!(parse_byte_size("").is_err());
  }

  #[test]
  fn test_default_config_is_valid() {
    Config::default().validate().unwrap();
  }

  #[test]
  fn test_overlap_must_stay_below_size() {
    let mut config = Config::default();
    config.chunking.chunk_overlap = config.chunking.chunk_size;
    assert!(config.validate().is_err());
  }

  #[test]
  fn test_vector_size_must_match_dimension() {
    let mut config = Config::default();
    config.vector.vector_size = 4;
    assert!(config.validate().is_err());
  }

  #[test]
  fn test_config_serde_round_trip() {
    let config = Config::default();
    let json = serde_json::to_string(&config).unwrap();
    let back: Config = serde_json::from_str(&json).unwrap();
    assert_eq!(back, config);
  }
}
