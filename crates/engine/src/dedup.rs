//! Duplicate-fragment collapse within one document.
//!
//! Exact duplicates group by whitespace-normalised content hash; the
//! optional semantic pass single-link clusters the remaining chunks on
//! embedding cosine similarity. Each group keeps its earliest member.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use sift_core::{CoreError, TextChunk};
use store::ChunkStore;
use tracing::{debug, info};
use uuid::Uuid;
use vector::{Filter, VectorIndex};

#[derive(Debug, Clone)]
pub struct DedupOptions {
  pub use_content_hash: bool,
  pub use_semantic_similarity: bool,
  /// Cosine similarity at or above which two chunks are duplicates.
  pub similarity_threshold: f32,
}

impl Default for DedupOptions {
  fn default() -> Self {
    Self {
      use_content_hash: true,
      use_semantic_similarity: false,
      similarity_threshold: 0.95,
    }
  }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DedupOutcome {
  pub total_chunks: usize,
  pub removed_count: usize,
  pub groups_count: usize,
  pub removed_ids: Vec<Uuid>,
}

pub struct DedupEngine {
  chunks: Arc<dyn ChunkStore>,
  vectors: Arc<dyn VectorIndex>,
  options: DedupOptions,
}

impl DedupEngine {
  pub fn new(chunks: Arc<dyn ChunkStore>, vectors: Arc<dyn VectorIndex>, options: DedupOptions) -> Self {
    Self {
      chunks,
      vectors,
      options,
    }
  }

  /// Collapse duplicates in one document. Idempotent: a second run over
  /// the same document removes nothing.
  pub async fn run(&self, document_id: Uuid) -> Result<DedupOutcome, CoreError> {
    let all_chunks = self.chunks.find_by_document(document_id).await?;
    if all_chunks.is_empty() {
      debug!(document_id = %document_id, "No chunks to deduplicate");
      return Ok(DedupOutcome::default());
    }
    let total_chunks = all_chunks.len();
    let by_id: HashMap<Uuid, &TextChunk> = all_chunks.iter().map(|c| (c.id, c)).collect();

    let mut groups: Vec<Vec<Uuid>> = Vec::new();
    let mut grouped: HashSet<Uuid> = HashSet::new();

    if self.options.use_content_hash {
      for bucket in self.chunks.scan_content_hashes(document_id).await? {
        if bucket.chunk_ids.len() > 1 {
          grouped.extend(bucket.chunk_ids.iter().copied());
          groups.push(bucket.chunk_ids);
        }
      }
    }

    if self.options.use_semantic_similarity {
      let remaining: Vec<&TextChunk> = all_chunks.iter().filter(|c| !grouped.contains(&c.id)).collect();
      groups.extend(self.semantic_groups(&remaining).await?);
    }

    // Pick each group's representative and collect the rest.
    let mut removed_ids: Vec<Uuid> = Vec::new();
    let mut groups_count = 0;
    for group in &groups {
      let mut members: Vec<&TextChunk> = group.iter().filter_map(|id| by_id.get(id).copied()).collect();
      if members.len() < 2 {
        continue;
      }
      members.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.sequence_number.cmp(&b.sequence_number)));
      groups_count += 1;
      removed_ids.extend(members[1..].iter().map(|c| c.id));
    }

    debug_assert!(removed_ids.len() < total_chunks, "a run may never remove every chunk");

    if !removed_ids.is_empty() {
      // Vectors first; a crash between the two deletes is repaired by
      // the orphan sweep on the next run.
      let point_ids: Vec<Uuid> = removed_ids
        .iter()
        .filter_map(|id| by_id.get(id).and_then(|c| c.embedding_id))
        .collect();
      self.vectors.delete(&point_ids).await.map_err(CoreError::from)?;
      self.chunks.delete_batch(&removed_ids).await?;
    }

    self.sweep_orphan_points(document_id).await?;

    info!(
      document_id = %document_id,
      total_chunks,
      removed = removed_ids.len(),
      groups = groups_count,
      "Deduplication complete"
    );
    Ok(DedupOutcome {
      total_chunks,
      removed_count: removed_ids.len(),
      groups_count,
      removed_ids,
    })
  }

  /// Single-link clusters over embedding cosine similarity.
  async fn semantic_groups(&self, chunks: &[&TextChunk]) -> Result<Vec<Vec<Uuid>>, CoreError> {
    let embedded: Vec<(&TextChunk, Uuid)> = chunks
      .iter()
      .filter_map(|c| c.embedding_id.map(|e| (*c, e)))
      .collect();
    if embedded.len() < 2 {
      return Ok(Vec::new());
    }

    let point_ids: Vec<Uuid> = embedded.iter().map(|(_, e)| *e).collect();
    let points = self.vectors.get(&point_ids).await.map_err(CoreError::from)?;
    let vector_by_point: HashMap<Uuid, &[f32]> = points.iter().map(|p| (p.id, p.vector.as_slice())).collect();

    // Union-find over pairs at or above the threshold.
    let n = embedded.len();
    let mut parent: Vec<usize> = (0..n).collect();
    fn root(parent: &mut Vec<usize>, mut i: usize) -> usize {
      while parent[i] != i {
        parent[i] = parent[parent[i]];
        i = parent[i];
      }
      i
    }

    for i in 0..n {
      let Some(a) = vector_by_point.get(&embedded[i].1) else { continue };
      for j in (i + 1)..n {
        let Some(b) = vector_by_point.get(&embedded[j].1) else { continue };
        if cosine(a, b) >= self.options.similarity_threshold {
          let (ri, rj) = (root(&mut parent, i), root(&mut parent, j));
          if ri != rj {
            parent[ri] = rj;
          }
        }
      }
    }

    let mut clusters: HashMap<usize, Vec<Uuid>> = HashMap::new();
    for i in 0..n {
      let r = root(&mut parent, i);
      clusters.entry(r).or_default().push(embedded[i].0.id);
    }
    Ok(clusters.into_values().filter(|c| c.len() > 1).collect())
  }

  /// Delete index points whose chunk no longer exists. Repairs a
  /// previous run that deleted vectors but failed before the chunk
  /// delete, and the inverse.
  async fn sweep_orphan_points(&self, document_id: Uuid) -> Result<(), CoreError> {
    let live: HashSet<Uuid> = self
      .chunks
      .find_by_document(document_id)
      .await?
      .into_iter()
      .map(|c| c.id)
      .collect();

    let filter = Filter::new().eq("document_id", document_id.to_string());
    let mut orphans: Vec<Uuid> = Vec::new();
    let mut cursor = None;
    loop {
      let page = self
        .vectors
        .scroll(Some(&filter), 256, cursor)
        .await
        .map_err(CoreError::from)?;
      orphans.extend(
        page
          .points
          .iter()
          .filter(|p| !live.contains(&p.payload.chunk_id))
          .map(|p| p.id),
      );
      match page.next_cursor {
        Some(c) => cursor = Some(c),
        None => break,
      }
    }

    if !orphans.is_empty() {
      debug!(document_id = %document_id, orphans = orphans.len(), "Sweeping orphan points");
      self.vectors.delete(&orphans).await.map_err(CoreError::from)?;
    }
    Ok(())
  }
}

fn cosine(a: &[f32], b: &[f32]) -> f32 {
  let mut dot = 0.0f32;
  let mut na = 0.0f32;
  let mut nb = 0.0f32;
  for (x, y) in a.iter().zip(b.iter()) {
    dot += x * y;
    na += x * x;
    nb += y * y;
  }
  if na == 0.0 || nb == 0.0 {
    return 0.0;
  }
  dot / (na.sqrt() * nb.sqrt())
}
