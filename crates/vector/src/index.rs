//! The vector-index contract the pipeline and retrieval engine rely on.

use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use crate::{Filter, Payload, Point, Result};

/// One nearest-neighbour result. `score` is cosine similarity mapped to
/// `[0, 1]`, 1 being an identical direction.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
  pub id: Uuid,
  pub score: f32,
  pub payload: Payload,
}

/// One page of a payload scroll.
#[derive(Debug, Clone, PartialEq)]
pub struct ScrollPage {
  pub points: Vec<Point>,
  /// Cursor for the next page; `None` when the scan is exhausted.
  pub next_cursor: Option<Uuid>,
}

/// Store of `(id, vector, payload)` triples with k-nearest and
/// payload-filter queries. Concurrent-safe by contract; each call sees a
/// snapshot-consistent view.
#[async_trait]
pub trait VectorIndex: Send + Sync {
  /// Insert or replace points. All vectors must match the index dimension.
  async fn upsert(&self, points: Vec<Point>) -> Result<()>;

  /// k-nearest by cosine, optionally gated by `score_threshold` and a
  /// payload filter. Results are ordered by descending score.
  async fn search(
    &self,
    query: &[f32],
    k: usize,
    score_threshold: Option<f32>,
    filter: Option<&Filter>,
  ) -> Result<Vec<SearchHit>>;

  /// Page through points matching `filter` in stable id order.
  async fn scroll(&self, filter: Option<&Filter>, page_size: usize, cursor: Option<Uuid>) -> Result<ScrollPage>;

  async fn get(&self, ids: &[Uuid]) -> Result<Vec<Point>>;

  /// Remove points; missing ids are ignored. Returns the removed count.
  async fn delete(&self, ids: &[Uuid]) -> Result<usize>;

  async fn count(&self) -> Result<usize>;

  /// Liveness probe against the backing store; returns the round-trip
  /// time.
  async fn health(&self) -> Result<Duration>;
}
