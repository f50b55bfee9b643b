//! Batch and content-hash stores backing chunk deduplication.
//!
//! A [`Batch`] groups the chunks produced by one chunking operation on one
//! file. The [`BatchStore`] keeps batches alive long enough for the indexer
//! to read them back, capped by count so a pathological stream of tiny files
//! can't grow the store without bound. The [`ContentHashStore`] lets the
//! chunker skip re-embedding a chunk whose whitespace-normalized content it
//! has already seen, within or across files.

mod content_hash;
mod ids;

pub use content_hash::ContentHash;
pub use ids::{BatchId, ChunkId};

use std::num::NonZeroUsize;

use lru::LruCache;

/// The set of chunks produced by one chunking operation on one file.
#[derive(Debug, Clone)]
pub struct Batch {
    pub id: BatchId,
    pub source_path: String,
    pub chunk_ids: Vec<ChunkId>,
}

impl Batch {
    pub fn new(source_path: impl Into<String>, chunk_ids: Vec<ChunkId>) -> Self {
        Self {
            id: BatchId::new(),
            source_path: source_path.into(),
            chunk_ids,
        }
    }
}

/// Size-bounded store of [`Batch`]es keyed by [`BatchId`].
///
/// Eviction is LRU-by-count: once `capacity` batches are held, inserting a
/// new one evicts the least-recently-touched. `CodeChunk`s are free to
/// outlive their batch's eviction (the batch only tracks grouping and
/// garbage-collection, not ownership of chunk content).
pub struct BatchStore {
    batches: LruCache<BatchId, Batch>,
}

impl BatchStore {
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            batches: LruCache::new(capacity),
        }
    }

    /// Registers a batch, returning the evicted batch (if the store was full
    /// or a batch with this id already existed).
    pub fn insert(&mut self, batch: Batch) -> Option<Batch> {
        self.batches.push(batch.id, batch).map(|(_, evicted)| evicted)
    }

    pub fn get(&mut self, id: &BatchId) -> Option<&Batch> {
        self.batches.get(id)
    }

    pub fn len(&self) -> usize {
        self.batches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.batches.is_empty()
    }
}

/// Bounded map from [`ContentHash`] to the [`BatchId`] that first produced a
/// chunk with that content, used to drop duplicate chunks during chunking.
///
/// Eviction is LRU-by-size (entry count is the size metric, matching the
/// teacher's concurrency-limit bookkeeping: simple counters, no weighted
/// cost model).
pub struct ContentHashStore {
    seen: LruCache<ContentHash, BatchId>,
}

impl ContentHashStore {
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            seen: LruCache::new(capacity),
        }
    }

    /// Returns the batch id that already produced this content, if any,
    /// without recording `hash` as newly seen.
    pub fn lookup(&mut self, hash: &ContentHash) -> Option<BatchId> {
        self.seen.get(hash).copied()
    }

    /// Records `hash` as belonging to `batch_id`. Returns the batch id this
    /// hash was previously mapped to, if it collided with an existing entry.
    pub fn insert(&mut self, hash: ContentHash, batch_id: BatchId) -> Option<BatchId> {
        self.seen.put(hash, batch_id)
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cap(n: usize) -> NonZeroUsize {
        NonZeroUsize::new(n).unwrap()
    }

    #[test]
    fn batch_store_evicts_beyond_capacity() {
        let mut store = BatchStore::new(cap(2));
        let b1 = Batch::new("a.rs", vec![ChunkId::new()]);
        let b2 = Batch::new("b.rs", vec![ChunkId::new()]);
        let b3 = Batch::new("c.rs", vec![ChunkId::new()]);
        let id1 = b1.id;

        assert!(store.insert(b1).is_none());
        assert!(store.insert(b2).is_none());
        assert_eq!(store.len(), 2);

        store.insert(b3);
        assert_eq!(store.len(), 2);
        assert!(store.get(&id1).is_none(), "oldest batch should be evicted");
    }

    #[test]
    fn content_hash_store_dedups() {
        let mut store = ContentHashStore::new(cap(16));
        let hash = ContentHash::of(b"fn main() {}");
        let batch_id = BatchId::new();

        assert!(store.lookup(&hash).is_none());
        store.insert(hash, batch_id);
        assert_eq!(store.lookup(&hash), Some(batch_id));
    }

    #[test]
    fn content_hash_store_evicts_lru() {
        let mut store = ContentHashStore::new(cap(1));
        let first = ContentHash::of(b"one");
        let second = ContentHash::of(b"two");
        store.insert(first, BatchId::new());
        store.insert(second, BatchId::new());
        assert!(store.lookup(&first).is_none());
        assert!(store.lookup(&second).is_some());
    }
}
