//! Vector-store backend trait plus the JSON-persisted local implementation
//! used for both store profiles (spec.md §4.6): the "remote" primary is the
//! same engine pointed at a different collection path/profile as the
//! in-process "backup" — what differs between them is configuration
//! (provider, model, dimension), never the storage code. No vector is ever
//! copied between profiles; only `VectorRecord::chunk` (source content) is
//! read back out to re-embed during sync-back (`failover.rs`).

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use codeweaver_chunker::CodeChunk;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::error::{Result, VectorStoreError};
use crate::hnsw_index::HnswIndex;
use crate::types::{CollectionMetadata, ScoredRecord, SparseVector, StorageClass, VectorRecord};

#[async_trait]
pub trait VectorStoreBackend: Send + Sync {
    fn storage_class(&self) -> StorageClass;

    async fn collection_metadata(&self) -> Result<Option<CollectionMetadata>>;

    /// Runs the compatibility gate against `expected` and, if the collection
    /// is new, persists `expected` as its metadata (spec.md §4.6).
    async fn open_or_create(&self, expected: &CollectionMetadata) -> Result<()>;

    async fn upsert(&self, records: Vec<VectorRecord>) -> Result<()>;

    /// Deletes every chunk whose `chunk.file_path == file_path`.
    async fn delete_by_path(&self, file_path: &str) -> Result<usize>;

    /// Updates `chunk.file_path` for every record under `old_path` without
    /// touching vectors (spec.md "Moving a file ... without re-embedding").
    async fn rename_path(&self, old_path: &str, new_path: &str) -> Result<usize>;

    async fn search_dense(&self, query: &[f32], k: usize) -> Result<Vec<ScoredRecord>>;
    async fn search_sparse(&self, query: &SparseVector, k: usize) -> Result<Vec<ScoredRecord>>;

    /// All chunk ids currently stored (paginated scroll in a real remote
    /// store; here the whole id list, since the local engine holds
    /// everything in memory).
    async fn scroll_ids(&self) -> Result<Vec<String>>;

    async fn fetch_chunk(&self, id: &str) -> Result<Option<CodeChunk>>;

    async fn health_check(&self) -> Result<()>;

    async fn len(&self) -> Result<usize>;

    async fn save(&self) -> Result<()>;
}

/// Runs the collection-compatibility gate (spec.md §4.6, invariant 4).
/// `None` stored metadata means a brand-new or legacy collection and is
/// always accepted.
pub fn check_compatibility(collection: &str, stored: Option<&CollectionMetadata>, current: &CollectionMetadata) -> Result<()> {
    let Some(stored) = stored else {
        return Ok(());
    };
    if stored.embedding_model_id != current.embedding_model_id {
        return Err(VectorStoreError::ModelSwitchError {
            collection: collection.to_string(),
            stored_model: stored.embedding_model_id.clone(),
            current_model: current.embedding_model_id.clone(),
        });
    }
    if stored.embedding_dimension != current.embedding_dimension {
        return Err(VectorStoreError::DimensionMismatchError {
            collection: collection.to_string(),
            stored: stored.embedding_dimension,
            current: current.embedding_dimension,
        });
    }
    if stored.provider_id != current.provider_id {
        log::warn!(
            "collection '{collection}' provider changed from '{}' to '{}'; recommend reindex",
            stored.provider_id, current.provider_id
        );
    }
    Ok(())
}

struct StoreState {
    records: HashMap<String, VectorRecord>,
    dense_index: HnswIndex,
    next_numeric_id: usize,
    numeric_to_id: HashMap<usize, String>,
    id_to_numeric: HashMap<String, usize>,
    metadata: Option<CollectionMetadata>,
}

const SCHEMA_VERSION: u32 = 1;

#[derive(Serialize, Deserialize)]
struct PersistedStore {
    schema_version: u32,
    metadata: Option<CollectionMetadata>,
    records: BTreeMap<String, VectorRecord>,
}

/// JSON-persisted, in-process vector store with a brute-force dense index
/// and a linear sparse scan. Used for both the primary and backup profiles
/// (spec.md §4.6) — the two differ only in the `CollectionMetadata` and
/// storage path each is configured with.
pub struct LocalJsonStore {
    path: PathBuf,
    dimension: usize,
    storage_class: StorageClass,
    state: RwLock<StoreState>,
}

impl LocalJsonStore {
    pub async fn open(path: impl AsRef<Path>, dimension: usize, storage_class: StorageClass) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let state = if path.exists() {
            Self::load_state(&path, dimension).await?
        } else {
            StoreState {
                records: HashMap::new(),
                dense_index: HnswIndex::new(dimension),
                next_numeric_id: 0,
                numeric_to_id: HashMap::new(),
                id_to_numeric: HashMap::new(),
                metadata: None,
            }
        };
        Ok(Self {
            path,
            dimension,
            storage_class,
            state: RwLock::new(state),
        })
    }

    async fn load_state(path: &Path, dimension: usize) -> Result<StoreState> {
        let bytes = tokio::fs::read(path).await?;
        let persisted: PersistedStore = serde_json::from_slice(&bytes)?;
        let mut dense_index = HnswIndex::new(dimension);
        let mut numeric_to_id = HashMap::new();
        let mut id_to_numeric = HashMap::new();
        let mut next_numeric_id = 0usize;
        for (id, record) in &persisted.records {
            let numeric_id = next_numeric_id;
            next_numeric_id += 1;
            dense_index.add(numeric_id, &record.dense)?;
            numeric_to_id.insert(numeric_id, id.clone());
            id_to_numeric.insert(id.clone(), numeric_id);
        }
        Ok(StoreState {
            records: persisted.records.into_iter().collect(),
            dense_index,
            next_numeric_id,
            numeric_to_id,
            id_to_numeric,
            metadata: persisted.metadata,
        })
    }
}

#[async_trait]
impl VectorStoreBackend for LocalJsonStore {
    fn storage_class(&self) -> StorageClass {
        self.storage_class
    }

    async fn collection_metadata(&self) -> Result<Option<CollectionMetadata>> {
        Ok(self.state.read().await.metadata.clone())
    }

    async fn open_or_create(&self, expected: &CollectionMetadata) -> Result<()> {
        let mut state = self.state.write().await;
        check_compatibility(&self.path.display().to_string(), state.metadata.as_ref(), expected)?;
        if state.metadata.is_none() {
            state.metadata = Some(expected.clone());
        }
        Ok(())
    }

    async fn upsert(&self, records: Vec<VectorRecord>) -> Result<()> {
        let mut state = self.state.write().await;
        for record in records {
            if record.dense.len() != self.dimension {
                return Err(VectorStoreError::InvalidDimension {
                    expected: self.dimension,
                    actual: record.dense.len(),
                });
            }
            let numeric_id = if let Some(existing) = state.id_to_numeric.get(&record.id).copied() {
                existing
            } else {
                let numeric_id = state.next_numeric_id;
                state.next_numeric_id += 1;
                state.numeric_to_id.insert(numeric_id, record.id.clone());
                state.id_to_numeric.insert(record.id.clone(), numeric_id);
                numeric_id
            };
            state.dense_index.add(numeric_id, &record.dense)?;
            state.records.insert(record.id.clone(), record);
        }
        Ok(())
    }

    async fn delete_by_path(&self, file_path: &str) -> Result<usize> {
        let mut state = self.state.write().await;
        let ids: Vec<String> = state
            .records
            .values()
            .filter(|r| r.chunk.file_path == file_path)
            .map(|r| r.id.clone())
            .collect();
        for id in &ids {
            if let Some(numeric_id) = state.id_to_numeric.remove(id) {
                state.numeric_to_id.remove(&numeric_id);
                state.dense_index.remove(numeric_id);
            }
            state.records.remove(id);
        }
        Ok(ids.len())
    }

    async fn rename_path(&self, old_path: &str, new_path: &str) -> Result<usize> {
        let mut state = self.state.write().await;
        let mut updated = 0usize;
        for record in state.records.values_mut() {
            if record.chunk.file_path == old_path {
                record.chunk.file_path = new_path.to_string();
                updated += 1;
            }
        }
        Ok(updated)
    }

    async fn search_dense(&self, query: &[f32], k: usize) -> Result<Vec<ScoredRecord>> {
        let state = self.state.read().await;
        let hits = state.dense_index.search(query, k)?;
        Ok(hits
            .into_iter()
            .filter_map(|(numeric_id, score)| {
                let id = state.numeric_to_id.get(&numeric_id)?;
                let record = state.records.get(id)?;
                Some(ScoredRecord {
                    id: id.clone(),
                    chunk: record.chunk.clone(),
                    score,
                })
            })
            .collect())
    }

    async fn search_sparse(&self, query: &SparseVector, k: usize) -> Result<Vec<ScoredRecord>> {
        let state = self.state.read().await;
        let mut scored: Vec<ScoredRecord> = state
            .records
            .values()
            .filter_map(|record| {
                let sparse = record.sparse.as_ref()?;
                let score = crate::hnsw_index::sparse_dot(query, sparse);
                if score <= 0.0 {
                    return None;
                }
                Some(ScoredRecord {
                    id: record.id.clone(),
                    chunk: record.chunk.clone(),
                    score,
                })
            })
            .collect();
        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);
        Ok(scored)
    }

    async fn scroll_ids(&self) -> Result<Vec<String>> {
        let state = self.state.read().await;
        let mut ids: Vec<String> = state.records.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }

    async fn fetch_chunk(&self, id: &str) -> Result<Option<CodeChunk>> {
        let state = self.state.read().await;
        Ok(state.records.get(id).map(|r| r.chunk.clone()))
    }

    async fn health_check(&self) -> Result<()> {
        Ok(())
    }

    async fn len(&self) -> Result<usize> {
        Ok(self.state.read().await.records.len())
    }

    async fn save(&self) -> Result<()> {
        let state = self.state.read().await;
        let persisted = PersistedStore {
            schema_version: SCHEMA_VERSION,
            metadata: state.metadata.clone(),
            records: state.records.clone().into_iter().collect(),
        };
        drop(state);
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let bytes = serde_json::to_vec_pretty(&persisted)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use codeweaver_chunker::{ChunkMetadata, ChunkSource};

    fn chunk(path: &str) -> CodeChunk {
        CodeChunk {
            id: codeweaver_batch_ref::ChunkId::new(),
            content: "fn f() {}".to_string(),
            file_path: path.to_string(),
            language: "rust".to_string(),
            start_line: 1,
            end_line: 1,
            source: ChunkSource::Semantic,
            metadata: ChunkMetadata::default(),
        }
    }

    fn metadata() -> CollectionMetadata {
        CollectionMetadata {
            provider_id: "local".to_string(),
            embedding_model_id: "m1".to_string(),
            embedding_dimension: 3,
            sparse_model_id: None,
            created_at_unix_ms: 0,
        }
    }

    #[tokio::test]
    async fn upsert_then_search_dense_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalJsonStore::open(dir.path().join("store.json"), 3, StorageClass::Ephemeral)
            .await
            .unwrap();
        store.open_or_create(&metadata()).await.unwrap();
        store
            .upsert(vec![VectorRecord {
                id: "a.rs:1:1".to_string(),
                chunk: chunk("a.rs"),
                dense: vec![1.0, 0.0, 0.0],
                sparse: None,
            }])
            .await
            .unwrap();

        let hits = store.search_dense(&[1.0, 0.0, 0.0], 5).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "a.rs:1:1");
    }

    #[tokio::test]
    async fn dimension_mismatch_blocks_open() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalJsonStore::open(dir.path().join("store.json"), 3, StorageClass::Ephemeral)
            .await
            .unwrap();
        store.open_or_create(&metadata()).await.unwrap();

        let mut other = metadata();
        other.embedding_dimension = 99;
        let err = store.open_or_create(&other).await.unwrap_err();
        assert!(matches!(err, VectorStoreError::DimensionMismatchError { .. }));
    }

    #[tokio::test]
    async fn model_switch_blocks_open() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalJsonStore::open(dir.path().join("store.json"), 3, StorageClass::Ephemeral)
            .await
            .unwrap();
        store.open_or_create(&metadata()).await.unwrap();

        let mut other = metadata();
        other.embedding_model_id = "different".to_string();
        let err = store.open_or_create(&other).await.unwrap_err();
        assert!(matches!(err, VectorStoreError::ModelSwitchError { .. }));
    }

    #[tokio::test]
    async fn rename_path_does_not_touch_vectors() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalJsonStore::open(dir.path().join("store.json"), 3, StorageClass::Ephemeral)
            .await
            .unwrap();
        store.open_or_create(&metadata()).await.unwrap();
        store
            .upsert(vec![VectorRecord {
                id: "a.rs:1:1".to_string(),
                chunk: chunk("a.rs"),
                dense: vec![1.0, 0.0, 0.0],
                sparse: None,
            }])
            .await
            .unwrap();

        let updated = store.rename_path("a.rs", "b.rs").await.unwrap();
        assert_eq!(updated, 1);
        let chunk = store.fetch_chunk("a.rs:1:1").await.unwrap().unwrap();
        assert_eq!(chunk.file_path, "b.rs");
    }
}
