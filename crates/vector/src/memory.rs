//! In-memory vector index with exact cosine scoring.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::{debug, trace};
use uuid::Uuid;

use crate::{Filter, Point, Result, ScrollPage, SearchHit, VectorError, VectorIndex};

/// Exact-scan cosine index. Fine for the in-process deployment and for
/// tests; the trait boundary is where an ANN-backed store would plug in.
pub struct MemoryVectorIndex {
  dimension: usize,
  points: DashMap<Uuid, Point>,
}

impl MemoryVectorIndex {
  pub fn new(dimension: usize) -> Self {
    Self {
      dimension,
      points: DashMap::new(),
    }
  }

  pub fn dimension(&self) -> usize {
    self.dimension
  }

  fn check_vector(&self, vector: &[f32]) -> Result<()> {
    if vector.len() != self.dimension {
      return Err(VectorError::DimensionMismatch {
        expected: self.dimension,
        got: vector.len(),
      });
    }
    if vector.iter().any(|v| !v.is_finite()) {
      return Err(VectorError::InvalidVector("non-finite component".into()));
    }
    Ok(())
  }
}

/// Cosine similarity mapped from `[-1, 1]` to `[0, 1]`.
fn cosine_score(a: &[f32], b: &[f32]) -> f32 {
  let mut dot = 0.0f64;
  let mut norm_a = 0.0f64;
  let mut norm_b = 0.0f64;
  for (x, y) in a.iter().zip(b.iter()) {
    dot += f64::from(*x) * f64::from(*y);
    norm_a += f64::from(*x) * f64::from(*x);
    norm_b += f64::from(*y) * f64::from(*y);
  }
  if norm_a == 0.0 || norm_b == 0.0 {
    return 0.0;
  }
  let cosine = dot / (norm_a.sqrt() * norm_b.sqrt());
  (((cosine + 1.0) / 2.0).clamp(0.0, 1.0)) as f32
}

#[async_trait]
impl VectorIndex for MemoryVectorIndex {
  async fn upsert(&self, points: Vec<Point>) -> Result<()> {
    for point in &points {
      self.check_vector(&point.vector)?;
    }
    let count = points.len();
    for point in points {
      self.points.insert(point.id, point);
    }
    debug!(count, total = self.points.len(), "Points upserted");
    Ok(())
  }

  async fn search(
    &self,
    query: &[f32],
    k: usize,
    score_threshold: Option<f32>,
    filter: Option<&Filter>,
  ) -> Result<Vec<SearchHit>> {
    self.check_vector(query)?;

    let mut hits: Vec<SearchHit> = self
      .points
      .iter()
      .filter(|entry| match filter {
        Some(f) if !f.is_empty() => f.matches(&entry.payload.as_value()),
        _ => true,
      })
      .map(|entry| SearchHit {
        id: entry.id,
        score: cosine_score(query, &entry.vector),
        payload: entry.payload.clone(),
      })
      .filter(|hit| score_threshold.is_none_or(|t| hit.score >= t))
      .collect();

    // Deterministic: score desc, id as tie-break.
    hits.sort_by(|a, b| {
      b.score
        .partial_cmp(&a.score)
        .unwrap_or(std::cmp::Ordering::Equal)
        .then(a.id.cmp(&b.id))
    });
    hits.truncate(k);
    trace!(k, results = hits.len(), "Vector search complete");
    Ok(hits)
  }

  async fn scroll(&self, filter: Option<&Filter>, page_size: usize, cursor: Option<Uuid>) -> Result<ScrollPage> {
    let mut matching: Vec<Point> = self
      .points
      .iter()
      .filter(|entry| match filter {
        Some(f) if !f.is_empty() => f.matches(&entry.payload.as_value()),
        _ => true,
      })
      .map(|entry| entry.value().clone())
      .collect();
    matching.sort_by_key(|p| p.id);

    let start = match cursor {
      Some(last) => matching.partition_point(|p| p.id <= last),
      None => 0,
    };
    let page: Vec<Point> = matching.into_iter().skip(start).take(page_size).collect();
    let next_cursor = if page.len() == page_size {
      page.last().map(|p| p.id)
    } else {
      None
    };
    Ok(ScrollPage { points: page, next_cursor })
  }

  async fn get(&self, ids: &[Uuid]) -> Result<Vec<Point>> {
    Ok(
      ids
        .iter()
        .filter_map(|id| self.points.get(id).map(|e| e.value().clone()))
        .collect(),
    )
  }

  async fn delete(&self, ids: &[Uuid]) -> Result<usize> {
    let mut removed = 0;
    for id in ids {
      if self.points.remove(id).is_some() {
        removed += 1;
      }
    }
    debug!(requested = ids.len(), removed, "Points deleted");
    Ok(removed)
  }

  async fn count(&self) -> Result<usize> {
    Ok(self.points.len())
  }

  async fn health(&self) -> Result<Duration> {
    let started = Instant::now();
    let probe: Vec<f32> = vec![0.0; self.dimension];
    self.check_vector(&probe)?;
    let _ = self.points.iter().take(1).count();
    Ok(started.elapsed())
  }
}

#[cfg(test)]
mod tests {
  use chrono::Utc;
  use pretty_assertions::assert_eq;
  use serde_json::Value;

  use super::*;
  use crate::Payload;

  fn payload(document_id: Uuid, content: &str) -> Payload {
    Payload {
      document_id,
      chunk_id: Uuid::new_v4(),
      user_id: Uuid::new_v4(),
      content: content.to_string(),
      source: String::new(),
      page: None,
      chunk_index: 0,
      created_at: Utc::now(),
      user_metadata: serde_json::Map::new(),
    }
  }

  fn point(vector: Vec<f32>, content: &str) -> Point {
    Point::new(Uuid::new_v4(), vector, payload(Uuid::new_v4(), content))
  }

  #[tokio::test]
  async fn test_upsert_rejects_wrong_dimension() {
    let index = MemoryVectorIndex::new(3);
    let err = index.upsert(vec![point(vec![1.0, 0.0], "short")]).await.unwrap_err();
    assert!(matches!(err, VectorError::DimensionMismatch { expected: 3, got: 2 }));
  }

  #[tokio::test]
  async fn test_identical_vector_scores_one() {
    let index = MemoryVectorIndex::new(3);
    let p = point(vec![0.6, 0.8, 0.0], "hit");
    index.upsert(vec![p.clone()]).await.unwrap();

    let hits = index.search(&[0.6, 0.8, 0.0], 1, None, None).await.unwrap();
    assert_eq!(hits.len(), 1);
    assert!((hits[0].score - 1.0).abs() < 1e-6);
  }

  #[tokio::test]
  async fn test_opposite_vector_scores_zero() {
    let index = MemoryVectorIndex::new(2);
    index.upsert(vec![point(vec![1.0, 0.0], "a")]).await.unwrap();

    let hits = index.search(&[-1.0, 0.0], 1, None, None).await.unwrap();
    assert!(hits[0].score.abs() < 1e-6);
  }

  #[tokio::test]
  async fn test_search_orders_and_truncates() {
    let index = MemoryVectorIndex::new(2);
    let close = point(vec![1.0, 0.1], "close");
    let far = point(vec![0.1, 1.0], "far");
    let exact = point(vec![1.0, 0.0], "exact");
    index.upsert(vec![close.clone(), far.clone(), exact.clone()]).await.unwrap();

    let hits = index.search(&[1.0, 0.0], 2, None, None).await.unwrap();
    assert_eq!(hits.len(), 2);
    assert_eq!(hits[0].id, exact.id);
    assert_eq!(hits[1].id, close.id);
    assert!(hits[0].score >= hits[1].score);
  }

  #[tokio::test]
  async fn test_threshold_one_returns_only_exact_matches() {
    let index = MemoryVectorIndex::new(2);
    index.upsert(vec![point(vec![1.0, 0.1], "near")]).await.unwrap();

    let hits = index.search(&[1.0, 0.0], 10, Some(1.0), None).await.unwrap();
    assert!(hits.is_empty());
  }

  #[tokio::test]
  async fn test_filter_restricts_candidates() {
    let index = MemoryVectorIndex::new(2);
    let doc_a = Uuid::new_v4();
    let mut pa = point(vec![1.0, 0.0], "a");
    pa.payload.document_id = doc_a;
    let pb = point(vec![1.0, 0.0], "b");
    index.upsert(vec![pa.clone(), pb]).await.unwrap();

    let filter = Filter::new().eq("document_id", doc_a.to_string());
    let hits = index.search(&[1.0, 0.0], 10, None, Some(&filter)).await.unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].id, pa.id);
  }

  #[tokio::test]
  async fn test_scroll_pages_cover_everything_once() {
    let index = MemoryVectorIndex::new(2);
    let points: Vec<Point> = (0..7).map(|i| point(vec![i as f32, 1.0], "p")).collect();
    index.upsert(points.clone()).await.unwrap();

    let mut seen = std::collections::HashSet::new();
    let mut cursor = None;
    loop {
      let page = index.scroll(None, 3, cursor).await.unwrap();
      for p in &page.points {
        assert!(seen.insert(p.id), "point seen twice");
      }
      match page.next_cursor {
        Some(c) => cursor = Some(c),
        None => break,
      }
    }
    assert_eq!(seen.len(), 7);
  }

  #[tokio::test]
  async fn test_scroll_filters_by_nested_metadata() {
    let index = MemoryVectorIndex::new(2);
    let mut tagged = point(vec![1.0, 0.0], "tagged");
    tagged
      .payload
      .user_metadata
      .insert("lang".into(), Value::String("en".into()));
    index.upsert(vec![tagged.clone(), point(vec![0.0, 1.0], "plain")]).await.unwrap();

    let filter = Filter::new().eq("user_metadata.lang", "en");
    let page = index.scroll(Some(&filter), 10, None).await.unwrap();
    assert_eq!(page.points.len(), 1);
    assert_eq!(page.points[0].id, tagged.id);
  }

  #[tokio::test]
  async fn test_delete_and_count() {
    let index = MemoryVectorIndex::new(2);
    let a = point(vec![1.0, 0.0], "a");
    let b = point(vec![0.0, 1.0], "b");
    index.upsert(vec![a.clone(), b.clone()]).await.unwrap();
    assert_eq!(index.count().await.unwrap(), 2);

    let removed = index.delete(&[a.id, Uuid::new_v4()]).await.unwrap();
    assert_eq!(removed, 1);
    assert_eq!(index.count().await.unwrap(), 1);
    assert!(index.get(&[a.id]).await.unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_health_probe_round_trips() {
    let index = MemoryVectorIndex::new(2);
    index.upsert(vec![point(vec![1.0, 0.0], "a")]).await.unwrap();

    let elapsed = index.health().await.unwrap();
    assert!(elapsed < Duration::from_secs(1));
  }

  #[tokio::test]
  async fn test_upsert_replaces_in_place() {
    let index = MemoryVectorIndex::new(2);
    let mut p = point(vec![1.0, 0.0], "v1");
    index.upsert(vec![p.clone()]).await.unwrap();

    p.payload.content = "v2".to_string();
    index.upsert(vec![p.clone()]).await.unwrap();

    assert_eq!(index.count().await.unwrap(), 1);
    let got = index.get(&[p.id]).await.unwrap();
    assert_eq!(got[0].payload.content, "v2");
  }
}
