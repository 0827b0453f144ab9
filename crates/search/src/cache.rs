//! Query-embedding cache: repeated queries skip the embedding round-trip.

use std::sync::Arc;
use std::time::Duration;

use moka::sync::Cache;

pub struct QueryEmbeddingCache {
  cache: Cache<String, Arc<Vec<f32>>>,
}

impl QueryEmbeddingCache {
  /// Default capacity: 2000 queries, 10 minute idle eviction.
  pub fn new() -> Self {
    Self::with_capacity(2000)
  }

  pub fn with_capacity(capacity: u64) -> Self {
    Self {
      cache: Cache::builder()
        .max_capacity(capacity)
        .time_to_idle(Duration::from_secs(600))
        .build(),
    }
  }

  pub fn get(&self, query: &str) -> Option<Arc<Vec<f32>>> {
    self.cache.get(query)
  }

  pub fn insert(&self, query: &str, vector: Vec<f32>) -> Arc<Vec<f32>> {
    let shared = Arc::new(vector);
    self.cache.insert(query.to_string(), shared.clone());
    shared
  }

  pub fn entry_count(&self) -> u64 {
    self.cache.entry_count()
  }
}

impl Default for QueryEmbeddingCache {
  fn default() -> Self {
    Self::new()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_round_trip() {
    let cache = QueryEmbeddingCache::new();
    assert!(cache.get("what is rust").is_none());

    cache.insert("what is rust", vec![0.1, 0.2]);
    let hit = cache.get("what is rust").unwrap();
    assert_eq!(*hit, vec![0.1, 0.2]);
  }

  #[test]
  fn test_distinct_queries_do_not_collide() {
    let cache = QueryEmbeddingCache::new();
    cache.insert("a", vec![1.0]);
    cache.insert("b", vec![2.0]);
    assert_eq!(*cache.get("a").unwrap(), vec![1.0]);
    assert_eq!(*cache.get("b").unwrap(), vec![2.0]);
  }
}
