//! Chunk persistence: trait contract plus the in-memory implementation.

use std::collections::HashMap;

use async_trait::async_trait;
use dashmap::DashMap;
use sift_core::TextChunk;
use tracing::{debug, trace};
use uuid::Uuid;

use crate::{Result, StoreError};

/// One bucket of the `(document_id, content_hash)` secondary index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HashGroup {
  pub content_hash: String,
  pub chunk_ids: Vec<Uuid>,
}

#[async_trait]
pub trait ChunkStore: Send + Sync {
  async fn save(&self, chunk: &TextChunk) -> Result<()>;

  async fn save_batch(&self, chunks: &[TextChunk]) -> Result<()>;

  async fn find_by_id(&self, id: Uuid) -> Result<Option<TextChunk>>;

  /// Lookup preserving the order of `ids`; missing ids are skipped.
  async fn find_by_ids(&self, ids: &[Uuid]) -> Result<Vec<TextChunk>>;

  /// All chunks of a document, ordered by `sequence_number`.
  async fn find_by_document(&self, document_id: Uuid) -> Result<Vec<TextChunk>>;

  /// Set `embedding_id` exactly once; a second set is a conflict.
  async fn set_embedding_id(&self, chunk_id: Uuid, embedding_id: Uuid) -> Result<()>;

  /// Soft-delete: rows leave the live set and land in the audit log.
  async fn delete_batch(&self, ids: &[Uuid]) -> Result<usize>;

  async fn count_by_document(&self, document_id: Uuid) -> Result<usize>;

  /// Range scan of the `(document_id, content_hash)` index: every hash
  /// bucket with its member chunk ids, hash-ordered.
  async fn scan_content_hashes(&self, document_id: Uuid) -> Result<Vec<HashGroup>>;
}

/// In-memory chunk store with a maintained content-hash index and a
/// soft-delete audit log for replay.
#[derive(Default)]
pub struct MemoryChunkStore {
  chunks: DashMap<Uuid, TextChunk>,
  /// `(document_id, content_hash) -> chunk ids`, kept in sync on write/delete.
  hash_index: DashMap<(Uuid, String), Vec<Uuid>>,
  /// Soft-deleted rows, preserved for replay.
  audit_log: DashMap<Uuid, TextChunk>,
}

impl MemoryChunkStore {
  pub fn new() -> Self {
    Self::default()
  }

  /// Soft-deleted chunks, for tests and replay tooling.
  pub fn audit_entries(&self) -> Vec<TextChunk> {
    self.audit_log.iter().map(|e| e.value().clone()).collect()
  }

  fn index_insert(&self, chunk: &TextChunk) {
    let key = (chunk.document_id, chunk.content_hash());
    let mut bucket = self.hash_index.entry(key).or_default();
    if !bucket.contains(&chunk.id) {
      bucket.push(chunk.id);
    }
  }

  fn index_remove(&self, chunk: &TextChunk) {
    let key = (chunk.document_id, chunk.content_hash());
    if let Some(mut bucket) = self.hash_index.get_mut(&key) {
      bucket.retain(|id| *id != chunk.id);
    }
  }
}

#[async_trait]
impl ChunkStore for MemoryChunkStore {
  async fn save(&self, chunk: &TextChunk) -> Result<()> {
    if chunk.content.is_empty() {
      return Err(StoreError::InvalidInput("chunk content must not be empty".into()));
    }
    let duplicate_sequence = self.chunks.iter().any(|e| {
      e.document_id == chunk.document_id && e.sequence_number == chunk.sequence_number && e.id != chunk.id
    });
    if duplicate_sequence {
      return Err(StoreError::Conflict(format!(
        "sequence number {} already used in document {}",
        chunk.sequence_number, chunk.document_id
      )));
    }
    self.index_insert(chunk);
    self.chunks.insert(chunk.id, chunk.clone());
    trace!(chunk_id = %chunk.id, document_id = %chunk.document_id, "Chunk saved");
    Ok(())
  }

  async fn save_batch(&self, chunks: &[TextChunk]) -> Result<()> {
    for chunk in chunks {
      self.save(chunk).await?;
    }
    debug!(count = chunks.len(), "Chunk batch saved");
    Ok(())
  }

  async fn find_by_id(&self, id: Uuid) -> Result<Option<TextChunk>> {
    Ok(self.chunks.get(&id).map(|e| e.value().clone()))
  }

  async fn find_by_ids(&self, ids: &[Uuid]) -> Result<Vec<TextChunk>> {
    Ok(
      ids
        .iter()
        .filter_map(|id| self.chunks.get(id).map(|e| e.value().clone()))
        .collect(),
    )
  }

  async fn find_by_document(&self, document_id: Uuid) -> Result<Vec<TextChunk>> {
    let mut found: Vec<TextChunk> = self
      .chunks
      .iter()
      .filter(|e| e.document_id == document_id)
      .map(|e| e.value().clone())
      .collect();
    found.sort_by_key(|c| c.sequence_number);
    Ok(found)
  }

  async fn set_embedding_id(&self, chunk_id: Uuid, embedding_id: Uuid) -> Result<()> {
    let mut chunk = self
      .chunks
      .get_mut(&chunk_id)
      .ok_or_else(|| StoreError::NotFound(format!("chunk {chunk_id}")))?;
    if let Some(existing) = chunk.embedding_id {
      return Err(StoreError::Conflict(format!(
        "chunk {chunk_id} already has embedding {existing}"
      )));
    }
    chunk.embedding_id = Some(embedding_id);
    Ok(())
  }

  async fn delete_batch(&self, ids: &[Uuid]) -> Result<usize> {
    let mut deleted = 0;
    for id in ids {
      if let Some((_, chunk)) = self.chunks.remove(id) {
        self.index_remove(&chunk);
        self.audit_log.insert(chunk.id, chunk);
        deleted += 1;
      }
    }
    debug!(requested = ids.len(), deleted, "Chunk batch deleted");
    Ok(deleted)
  }

  async fn count_by_document(&self, document_id: Uuid) -> Result<usize> {
    Ok(self.chunks.iter().filter(|e| e.document_id == document_id).count())
  }

  async fn scan_content_hashes(&self, document_id: Uuid) -> Result<Vec<HashGroup>> {
    let mut groups: HashMap<String, Vec<Uuid>> = HashMap::new();
    for entry in self.hash_index.iter() {
      let (doc, hash) = entry.key();
      if *doc == document_id && !entry.value().is_empty() {
        groups.entry(hash.clone()).or_default().extend(entry.value().iter());
      }
    }
    let mut out: Vec<HashGroup> = groups
      .into_iter()
      .map(|(content_hash, mut chunk_ids)| {
        chunk_ids.sort();
        HashGroup { content_hash, chunk_ids }
      })
      .collect();
    out.sort_by(|a, b| a.content_hash.cmp(&b.content_hash));
    Ok(out)
  }
}

#[cfg(test)]
mod tests {
  use pretty_assertions::assert_eq;
  use sift_core::ChunkKind;

  use super::*;

  fn chunk(document_id: Uuid, seq: u32, content: &str) -> TextChunk {
    TextChunk::new(
      document_id,
      Uuid::new_v4(),
      content,
      ChunkKind::FixedSize,
      seq,
      0,
      content.chars().count(),
    )
    .unwrap()
  }

  #[tokio::test]
  async fn test_save_and_document_ordering() {
    let store = MemoryChunkStore::new();
    let document_id = Uuid::new_v4();

    // Insert out of order; read must come back ordered.
    for seq in [2u32, 0, 1] {
      store.save(&chunk(document_id, seq, &format!("chunk {seq}"))).await.unwrap();
    }

    let found = store.find_by_document(document_id).await.unwrap();
    let sequences: Vec<u32> = found.iter().map(|c| c.sequence_number).collect();
    assert_eq!(sequences, vec![0, 1, 2]);
  }

  #[tokio::test]
  async fn test_duplicate_sequence_rejected() {
    let store = MemoryChunkStore::new();
    let document_id = Uuid::new_v4();
    store.save(&chunk(document_id, 0, "first")).await.unwrap();

    let err = store.save(&chunk(document_id, 0, "second")).await.unwrap_err();
    assert!(matches!(err, StoreError::Conflict(_)));
  }

  #[tokio::test]
  async fn test_find_by_ids_preserves_order() {
    let store = MemoryChunkStore::new();
    let document_id = Uuid::new_v4();
    let a = chunk(document_id, 0, "a");
    let b = chunk(document_id, 1, "b");
    store.save_batch(&[a.clone(), b.clone()]).await.unwrap();

    let found = store.find_by_ids(&[b.id, Uuid::new_v4(), a.id]).await.unwrap();
    let ids: Vec<Uuid> = found.iter().map(|c| c.id).collect();
    assert_eq!(ids, vec![b.id, a.id]);
  }

  #[tokio::test]
  async fn test_embedding_id_set_exactly_once() {
    let store = MemoryChunkStore::new();
    let c = chunk(Uuid::new_v4(), 0, "content");
    store.save(&c).await.unwrap();

    store.set_embedding_id(c.id, Uuid::new_v4()).await.unwrap();
    let err = store.set_embedding_id(c.id, Uuid::new_v4()).await.unwrap_err();
    assert!(matches!(err, StoreError::Conflict(_)));
  }

  #[tokio::test]
  async fn test_delete_is_soft_with_audit() {
    let store = MemoryChunkStore::new();
    let document_id = Uuid::new_v4();
    let a = chunk(document_id, 0, "kept");
    let b = chunk(document_id, 1, "removed");
    store.save_batch(&[a.clone(), b.clone()]).await.unwrap();

    let deleted = store.delete_batch(&[b.id, Uuid::new_v4()]).await.unwrap();
    assert_eq!(deleted, 1);
    assert!(store.find_by_id(b.id).await.unwrap().is_none());
    assert_eq!(store.count_by_document(document_id).await.unwrap(), 1);

    let audit = store.audit_entries();
    assert_eq!(audit.len(), 1);
    assert_eq!(audit[0].id, b.id);
  }

  #[tokio::test]
  async fn test_hash_scan_groups_normalised_duplicates() {
    let store = MemoryChunkStore::new();
    let document_id = Uuid::new_v4();
    let a = chunk(document_id, 0, "Python is a programming language.");
    let b = chunk(document_id, 1, "something else entirely");
    let c = chunk(document_id, 2, "Python  is a programming\nlanguage.");
    store.save_batch(&[a.clone(), b.clone(), c.clone()]).await.unwrap();

    let groups = store.scan_content_hashes(document_id).await.unwrap();
    assert_eq!(groups.len(), 2);

    let dup = groups.iter().find(|g| g.chunk_ids.len() == 2).unwrap();
    assert!(dup.chunk_ids.contains(&a.id) && dup.chunk_ids.contains(&c.id));
  }

  #[tokio::test]
  async fn test_hash_scan_drops_deleted_rows() {
    let store = MemoryChunkStore::new();
    let document_id = Uuid::new_v4();
    let a = chunk(document_id, 0, "same text");
    let b = chunk(document_id, 1, "same text");
    store.save_batch(&[a.clone(), b.clone()]).await.unwrap();

    store.delete_batch(&[b.id]).await.unwrap();
    let groups = store.scan_content_hashes(document_id).await.unwrap();
    assert_eq!(groups.len(), 1);
    assert_eq!(groups[0].chunk_ids, vec![a.id]);
  }
}
