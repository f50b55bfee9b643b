//! # CodeWeaver Indexer
//!
//! Project indexing for semantic code search.
//!
//! ## Pipeline
//!
//! ```text
//! Directory
//!     │
//!     ├──> File Scanner (.gitignore aware)
//!     │      └─> Source files
//!     │
//!     ├──> Chunker (AST-aware, via the Selector)
//!     │      └─> Code chunks
//!     │
//!     └──> Embedding + Vector Store (failover-aware upsert)
//!            └─> Searchable index
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use codeweaver_indexer::{IndexerConfig, ProjectIndexer};
//! use std::sync::Arc;
//!
//! # async fn run(
//! #     dense: Arc<dyn codeweaver_vector_store::DenseEmbeddingProvider>,
//! #     failover: Arc<codeweaver_vector_store::FailoverManager>,
//! # ) -> anyhow::Result<()> {
//! let indexer = ProjectIndexer::new(
//!     "/path/to/project",
//!     dense,
//!     None,
//!     failover,
//!     IndexerConfig::default(),
//! )
//! .await?;
//! let stats = indexer.index().await?;
//!
//! println!("Indexed {} files, {} chunks", stats.files, stats.chunks);
//! # Ok(())
//! # }
//! ```

mod error;
mod health;
mod index_lock;
mod index_state;
mod indexer;
mod limits;
mod scanner;
mod stats;
mod watcher;
mod watermark_io;

pub use error::{IndexerError, Result};
pub use health::append_failure_reason;
pub use health::{health_file_path, read_health_snapshot, write_health_snapshot, HealthSnapshot};
pub use index_lock::{index_write_lock_wait_ms_last, index_write_lock_wait_ms_max};
pub use index_state::{
    assess_staleness, AnchorKind, AnchorPolicy, IndexSnapshot, IndexState, ReindexResult,
    RetrievalMode, StaleAssessment, StaleReason, Watermark,
};
pub use indexer::{IndexerConfig, ProjectIndexer};
pub use limits::{index_concurrency_snapshot, IndexConcurrencySnapshot};
pub use scanner::{FileScanner, ScanOptions};
pub use stats::IndexStats;
pub use watcher::{IndexUpdate, IndexerHealth, StreamingIndexer, StreamingIndexerConfig};
pub use watermark_io::compute_project_watermark;
