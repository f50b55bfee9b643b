//! # CodeWeaver Vector Store
//!
//! Embedding providers, hybrid dense/sparse vector storage, and the
//! primary/backup failover manager backing `find_code` (spec.md §4).
//!
//! ## Architecture
//!
//! ```text
//! CodeChunk[]
//!     │
//!     ├──> EmbeddingTemplates (render query/doc text)
//!     │
//!     ├──> DenseEmbeddingProvider (ONNX Runtime or stub)
//!     ├──> SparseEmbeddingProvider (hashing term-frequency)
//!     │
//!     └──> VectorStoreBackend
//!            ├─> HnswIndex (in-process ANN)
//!            ├─> JSON persistence
//!            └─> FailoverManager (primary/backup, circuit breaker)
//! ```

mod corpus;
mod embedding_cache;
mod embeddings;
mod error;
mod failover;
mod gpu_env;
mod hnsw_index;
mod paths;
mod provider;
mod rerank;
mod sparse;
mod store;
mod templates;
mod types;

pub use corpus::{corpus_path_for_project_root, ChunkCorpus, CHUNK_CORPUS_SCHEMA_VERSION};
pub use embedding_cache::EmbeddingCache;
pub use embeddings::{current_embedding_mode_id, current_model_id, model_dir, EmbedRequest, EmbeddingModel, ModelRegistry, OnnxDenseProvider};
pub use error::{Result, VectorStoreError};
pub use failover::{
    CircuitBreakerConfig, CircuitState, FailoverManager, FailoverState, RestoreLoopHandle, RestoreOutcome,
};
pub use gpu_env::{bootstrap_cuda_env_best_effort, diagnose_gpu_env, non_system_cuda_lib_dirs, repo_cuda_provider_dir, GpuEnvReport};
pub use hnsw_index::{cosine_similarity, sparse_dot, HnswIndex};
pub use paths::{find_store_dir_from_path, is_store_dir_name, store_dir_for_project_root, CACHE_DIR_NAME, STORE_DIR_NAME};
pub use provider::{DenseEmbeddingProvider, ProviderRegistry, RerankProvider, SparseEmbeddingProvider};
pub use rerank::LexicalOverlapReranker;
pub use sparse::HashingSparseEmbedder;
pub use store::{check_compatibility, LocalJsonStore, VectorStoreBackend};
pub use templates::{classify_document_kind, classify_path_kind, DocumentKind, EmbeddingTemplates, EMBEDDING_TEMPLATES_SCHEMA_VERSION};
pub use types::{
    BackupSnapshotSet, CollectionMetadata, CostClass, Intent, ProviderCapabilities, ProviderKind, ScoredRecord, SparseVector, StorageClass, VectorRecord,
};

pub use codeweaver_chunker::{ChunkMetadata, ChunkSource, CodeChunk, SemanticMetadata};
