//! Data model shared by the provider registry, vector-store backends, and
//! the failover manager (spec.md §3 "Provider Capabilities", "Collection
//! Metadata", "Backup Snapshot Set").

use std::collections::HashSet;

use codeweaver_chunker::CodeChunk;
use serde::{Deserialize, Serialize};

/// A sparse vector as (term_id, weight) pairs, sorted by term_id.
pub type SparseVector = Vec<(u32, f32)>;

/// One chunk plus its embeddings, as handed to a vector-store backend on
/// upsert. The backend stores `chunk` as payload and `dense`/`sparse` for
/// retrieval; it never re-derives one from the other.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorRecord {
    pub id: String,
    pub chunk: CodeChunk,
    pub dense: Vec<f32>,
    pub sparse: Option<SparseVector>,
}

/// A retrieval hit: the stored chunk plus its similarity score.
#[derive(Debug, Clone)]
pub struct ScoredRecord {
    pub id: String,
    pub chunk: CodeChunk,
    pub score: f32,
}

/// Persisted once per collection; compared against the current provider
/// config on every open (spec.md §4.6 "Collection compatibility gate").
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CollectionMetadata {
    pub provider_id: String,
    pub embedding_model_id: String,
    pub embedding_dimension: usize,
    pub sparse_model_id: Option<String>,
    pub created_at_unix_ms: u64,
}

/// A set of chunk ids captured at the instant failover activates, diffed
/// against at restore time (spec.md §3 "Backup Snapshot Set").
#[derive(Debug, Clone, Default)]
pub struct BackupSnapshotSet {
    ids: HashSet<String>,
}

impl BackupSnapshotSet {
    #[must_use]
    pub fn capture(ids: impl IntoIterator<Item = String>) -> Self {
        Self {
            ids: ids.into_iter().collect(),
        }
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    /// `new = current \ snapshot`: ids present now but absent from the
    /// snapshot taken at failover entry (spec.md §4.6 step "Sync-back").
    #[must_use]
    pub fn diff_new(&self, current: &[String]) -> Vec<String> {
        current
            .iter()
            .filter(|id| !self.ids.contains(id.as_str()))
            .cloned()
            .collect()
    }
}

/// Which capability kind a provider catalog entry belongs to
/// (spec.md §4.8 Provider Registry).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProviderKind {
    DenseEmbedding,
    SparseEmbedding,
    Reranking,
    VectorStore,
}

/// Static capability metadata for one (provider, model) pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderCapabilities {
    pub provider_id: String,
    pub model_id: String,
    pub dimension: Option<usize>,
    pub max_input_tokens: Option<usize>,
    pub cost_class: CostClass,
    pub is_sparse: bool,
    /// Whether query-mode and document-mode embeddings differ for this model.
    pub asymmetric: bool,
    pub storage_class: Option<StorageClass>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CostClass {
    Local,
    Remote,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StorageClass {
    Persistent,
    Ephemeral,
}

/// Query intent, reused from `find_code`'s optional `intent` argument to
/// select an embedding/rerank template (spec.md §4.7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    Discovery,
    Comprehension,
    Modification,
    Debugging,
    Documentation,
}

impl Intent {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Discovery => "discovery",
            Self::Comprehension => "comprehension",
            Self::Modification => "modification",
            Self::Debugging => "debugging",
            Self::Documentation => "documentation",
        }
    }
}
