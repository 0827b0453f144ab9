//! Deterministic hash-based embeddings for offline and test runs.
//!
//! Each token is hashed into a bucket with a sign bit; the accumulated
//! vector is L2-normalised. Not semantically meaningful, but stable,
//! dimension-correct, and identical texts map to identical vectors.

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use crate::{EmbeddingError, EmbeddingMode, EmbeddingProvider};

pub struct HashEmbedder {
  model: String,
  dimension: usize,
}

impl HashEmbedder {
  pub fn new(model: &str, dimension: usize) -> Self {
    Self {
      model: model.to_string(),
      dimension: dimension.max(1),
    }
  }

  fn embed_one(&self, text: &str) -> Vec<f32> {
    let mut vector = vec![0.0f32; self.dimension];

    for token in text.to_lowercase().split(|c: char| !c.is_alphanumeric()) {
      if token.is_empty() {
        continue;
      }
      let digest = Sha256::digest(token.as_bytes());
      let bucket = u64::from_le_bytes([
        digest[0], digest[1], digest[2], digest[3], digest[4], digest[5], digest[6], digest[7],
      ]) as usize
        % self.dimension;
      let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
      vector[bucket] += sign;
    }

    let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
      for v in &mut vector {
        *v /= norm;
      }
    } else {
      // Tokenless input still needs a valid unit vector.
      vector[0] = 1.0;
    }
    vector
  }
}

#[async_trait]
impl EmbeddingProvider for HashEmbedder {
  fn name(&self) -> &str {
    "hash"
  }

  fn model_id(&self) -> &str {
    &self.model
  }

  fn dimensions(&self) -> usize {
    self.dimension
  }

  async fn embed_batch(&self, texts: &[&str], _mode: EmbeddingMode) -> Result<Vec<Vec<f32>>, EmbeddingError> {
    Ok(texts.iter().map(|t| self.embed_one(t)).collect())
  }
}

#[cfg(test)]
mod tests {
  use pretty_assertions::assert_eq;

  use super::*;

  #[tokio::test]
  async fn test_deterministic_and_order_preserving() {
    let embedder = HashEmbedder::new("hash-test", 64);
    let pair = embedder
      .embed_batch(&["alpha text", "beta text"], EmbeddingMode::Document)
      .await
      .unwrap();
    let single = embedder.embed_batch(&["alpha text"], EmbeddingMode::Document).await.unwrap();

    assert_eq!(pair.len(), 2);
    assert_eq!(pair[0], single[0]);
  }

  #[tokio::test]
  async fn test_vectors_are_unit_length() {
    let embedder = HashEmbedder::new("hash-test", 32);
    let out = embedder
      .embed_batch(&["some words here", ""], EmbeddingMode::Document)
      .await
      .unwrap();
    for vector in out {
      let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
      assert!((norm - 1.0).abs() < 1e-5);
      assert_eq!(vector.len(), 32);
    }
  }

  #[tokio::test]
  async fn test_different_texts_differ() {
    let embedder = HashEmbedder::new("hash-test", 128);
    let out = embedder
      .embed_batch(&["python is a language", "rust is a language"], EmbeddingMode::Document)
      .await
      .unwrap();
    assert_ne!(out[0], out[1]);
  }

  #[tokio::test]
  async fn test_similar_texts_score_higher_than_unrelated() {
    let embedder = HashEmbedder::new("hash-test", 256);
    let out = embedder
      .embed_batch(
        &[
          "python is a programming language",
          "python is a programming language used widely",
          "completely unrelated cooking recipe for soup",
        ],
        EmbeddingMode::Document,
      )
      .await
      .unwrap();

    let cos = |a: &[f32], b: &[f32]| -> f32 { a.iter().zip(b).map(|(x, y)| x * y).sum() };
    assert!(cos(&out[0], &out[1]) > cos(&out[0], &out[2]));
  }
}
