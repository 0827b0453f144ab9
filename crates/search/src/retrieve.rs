//! Hybrid retrieval: dense similarity, lexical scoring, score fusion.

use std::collections::HashMap;
use std::sync::Arc;

use embedding::{Embedder, EmbeddingMode};
use serde::{Deserialize, Serialize};
use sift_core::CoreError;
use tracing::{debug, trace};
use uuid::Uuid;
use vector::{Filter, Payload, VectorIndex};

use crate::cache::QueryEmbeddingCache;

const MAX_QUERY_CHARS: usize = 1000;
const MAX_LIMIT: usize = 100;
const MAX_KEYWORDS: usize = 10;
const SEMANTIC_WEIGHT: f32 = 0.7;
const KEYWORD_WEIGHT: f32 = 0.3;
const SCROLL_PAGE_SIZE: usize = 256;

const STOP_WORDS: &[&str] = &[
  "the", "a", "an", "and", "or", "but", "in", "on", "at", "to", "for", "of", "with", "by",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchMode {
  #[default]
  Semantic,
  Keyword,
  Hybrid,
}

#[derive(Debug, Clone)]
pub struct SearchQuery {
  pub user_id: Uuid,
  pub text: String,
  pub mode: SearchMode,
  pub limit: usize,
  pub threshold: f32,
  pub filters: Option<Filter>,
}

impl SearchQuery {
  pub fn new(user_id: Uuid, text: impl Into<String>) -> Self {
    Self {
      user_id,
      text: text.into(),
      mode: SearchMode::Semantic,
      limit: 10,
      threshold: 0.7,
      filters: None,
    }
  }

  pub fn with_mode(mut self, mode: SearchMode) -> Self {
    self.mode = mode;
    self
  }

  pub fn with_limit(mut self, limit: usize) -> Self {
    self.limit = limit;
    self
  }

  pub fn with_threshold(mut self, threshold: f32) -> Self {
    self.threshold = threshold;
    self
  }

  pub fn with_filters(mut self, filters: Filter) -> Self {
    self.filters = Some(filters);
    self
  }

  fn validate(&self) -> Result<(), CoreError> {
    if self.text.trim().is_empty() {
      return Err(CoreError::validation("query text must not be empty"));
    }
    if self.text.chars().count() > MAX_QUERY_CHARS {
      return Err(CoreError::validation(format!(
        "query text is over {MAX_QUERY_CHARS} characters"
      )));
    }
    if self.limit == 0 || self.limit > MAX_LIMIT {
      return Err(CoreError::validation(format!("limit must be in 1..={MAX_LIMIT}")));
    }
    if !(0.0..=1.0).contains(&self.threshold) {
      return Err(CoreError::validation("threshold must be within [0, 1]"));
    }
    Ok(())
  }
}

/// One ranked chunk, built from the index payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResultItem {
  pub chunk_id: Uuid,
  pub document_id: Uuid,
  pub content: String,
  pub score: f32,
  pub source: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub page: Option<u32>,
  pub chunk_index: u32,
  pub created_at: chrono::DateTime<chrono::Utc>,
  #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
  pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl SearchResultItem {
  fn from_payload(payload: &Payload, score: f32) -> Self {
    Self {
      chunk_id: payload.chunk_id,
      document_id: payload.document_id,
      content: payload.content.clone(),
      score,
      source: payload.source.clone(),
      page: payload.page,
      chunk_index: payload.chunk_index,
      created_at: payload.created_at,
      metadata: payload.user_metadata.clone(),
    }
  }
}

/// Lowercase, strip non-word chars, drop stop words and short tokens.
pub fn extract_keywords(text: &str) -> Vec<String> {
  let cleaned: String = text
    .to_lowercase()
    .chars()
    .map(|c| if c.is_alphanumeric() { c } else { ' ' })
    .collect();
  cleaned
    .split_whitespace()
    .filter(|w| w.len() > 2 && !STOP_WORDS.contains(w))
    .map(str::to_string)
    .take(MAX_KEYWORDS)
    .collect()
}

pub struct RetrievalEngine {
  index: Arc<dyn VectorIndex>,
  embedder: Arc<Embedder>,
  cache: QueryEmbeddingCache,
}

impl RetrievalEngine {
  pub fn new(index: Arc<dyn VectorIndex>, embedder: Arc<Embedder>) -> Self {
    Self {
      index,
      embedder,
      cache: QueryEmbeddingCache::new(),
    }
  }

  /// Run a query through the configured mode, post-process, rank.
  ///
  /// Deterministic for a fixed index state: same input, same output.
  pub async fn search(&self, query: &SearchQuery) -> Result<Vec<SearchResultItem>, CoreError> {
    query.validate()?;
    let filter = self.scoped_filter(query);

    let mut results = match query.mode {
      SearchMode::Semantic => self.semantic_search(query, &filter).await?,
      SearchMode::Keyword => self.keyword_search(query, &filter).await?,
      SearchMode::Hybrid => self.hybrid_search(query, &filter).await?,
    };
    results = post_process(results, query.threshold, query.limit);

    debug!(
      mode = ?query.mode,
      limit = query.limit,
      results = results.len(),
      "Search complete"
    );
    Ok(results)
  }

  /// Keyword-built query suggestions for a partial input.
  pub fn suggestions(&self, partial_query: &str, limit: usize) -> Vec<String> {
    if partial_query.trim().chars().count() < 2 {
      return Vec::new();
    }
    extract_keywords(partial_query)
      .into_iter()
      .map(|keyword| format!("{} {keyword}", partial_query.trim()))
      .take(limit)
      .collect()
  }

  /// The caller's filters plus the tenant scope.
  fn scoped_filter(&self, query: &SearchQuery) -> Filter {
    let base = query.filters.clone().unwrap_or_default();
    base.eq("user_id", query.user_id.to_string())
  }

  async fn query_vector(&self, text: &str) -> Result<Arc<Vec<f32>>, CoreError> {
    if let Some(hit) = self.cache.get(text) {
      trace!("Query embedding served from cache");
      return Ok(hit);
    }
    let mut embeddings = self.embedder.embed(&[text.to_string()], EmbeddingMode::Query).await?;
    let embedding = embeddings
      .pop()
      .ok_or_else(|| CoreError::internal("embedder returned no vector for query"))?;
    Ok(self.cache.insert(text, embedding.vector))
  }

  async fn semantic_search(&self, query: &SearchQuery, filter: &Filter) -> Result<Vec<SearchResultItem>, CoreError> {
    let vector = self.query_vector(query.text.trim()).await?;
    let hits = self
      .index
      .search(&vector, query.limit, Some(query.threshold), Some(filter))
      .await
      .map_err(CoreError::from)?;
    Ok(
      hits
        .iter()
        .map(|hit| SearchResultItem::from_payload(&hit.payload, hit.score))
        .collect(),
    )
  }

  /// Scan payloads within the filter and score by token frequency.
  async fn keyword_search(&self, query: &SearchQuery, filter: &Filter) -> Result<Vec<SearchResultItem>, CoreError> {
    let keywords = extract_keywords(&query.text);
    if keywords.is_empty() {
      return Ok(Vec::new());
    }

    let mut results = Vec::new();
    let mut cursor = None;
    loop {
      let page = self
        .index
        .scroll(Some(filter), SCROLL_PAGE_SIZE, cursor)
        .await
        .map_err(CoreError::from)?;
      for point in &page.points {
        let score = keyword_score(&point.payload.content, &keywords);
        if score > 0.0 {
          results.push(SearchResultItem::from_payload(&point.payload, score));
        }
      }
      match page.next_cursor {
        Some(next) => cursor = Some(next),
        None => break,
      }
    }

    results.sort_by(|a, b| {
      b.score
        .partial_cmp(&a.score)
        .unwrap_or(std::cmp::Ordering::Equal)
        .then(a.chunk_id.cmp(&b.chunk_id))
    });
    Ok(results)
  }

  /// Weighted fusion of both branches; a chunk missing from one branch
  /// contributes zero for that term.
  async fn hybrid_search(&self, query: &SearchQuery, filter: &Filter) -> Result<Vec<SearchResultItem>, CoreError> {
    let semantic = self.semantic_search(query, filter).await?;
    let keyword = self.keyword_search(query, filter).await?;
    Ok(fuse(semantic, keyword))
  }
}

/// `final = w_sem * sem + w_kw * kw`; a chunk seen by only one branch
/// contributes zero for the other term.
fn fuse(semantic: Vec<SearchResultItem>, keyword: Vec<SearchResultItem>) -> Vec<SearchResultItem> {
  let mut fused: HashMap<Uuid, SearchResultItem> = HashMap::new();
  for item in semantic {
    let score = SEMANTIC_WEIGHT * item.score;
    fused.insert(item.chunk_id, SearchResultItem { score, ..item });
  }
  for item in keyword {
    match fused.get_mut(&item.chunk_id) {
      Some(existing) => existing.score += KEYWORD_WEIGHT * item.score,
      None => {
        let score = KEYWORD_WEIGHT * item.score;
        fused.insert(item.chunk_id, SearchResultItem { score, ..item });
      }
    }
  }
  fused.into_values().collect()
}

fn keyword_score(content: &str, keywords: &[String]) -> f32 {
  let lowered = content.to_lowercase();
  let word_count = lowered.split_whitespace().count();
  if word_count == 0 {
    return 0.0;
  }
  let mut score = 0.0f32;
  for keyword in keywords {
    let occurrences = lowered.matches(keyword.as_str()).count();
    score += occurrences as f32 / word_count as f32;
  }
  score
}

/// Threshold filter, descending sort, per-document dedupe, truncation.
fn post_process(mut results: Vec<SearchResultItem>, threshold: f32, limit: usize) -> Vec<SearchResultItem> {
  results.retain(|r| r.score >= threshold);
  results.sort_by(|a, b| {
    b.score
      .partial_cmp(&a.score)
      .unwrap_or(std::cmp::Ordering::Equal)
      .then(a.chunk_id.cmp(&b.chunk_id))
  });

  let mut seen_documents = std::collections::HashSet::new();
  let mut unique = Vec::with_capacity(results.len().min(limit));
  for result in results {
    if seen_documents.insert(result.document_id) {
      unique.push(result);
      if unique.len() == limit {
        break;
      }
    }
  }
  unique
}
