//! # CodeWeaver Search
//!
//! The `find_code` orchestrator: the sole operation exposed to external
//! agents (spec.md §4.7).
//!
//! ## Strategy
//!
//! ```text
//! Query
//!   ├─> Dense embedding  - query-mode vector
//!   ├─> Sparse embedding - hashing term representation (optional)
//!   ├─> Hybrid retrieval - top-K dense + top-K sparse from the active store
//!   ├─> RRF Fusion        - Reciprocal Rank Fusion over both rankings
//!   ├─> Importance boost  - prioritize chunks by per-intent importance
//!   ├─> Rerank (optional) - cross-encoder reorder of the top results
//!   └─> Token-budgeted assembly
//! ```

mod error;
mod fusion;
mod hybrid;

pub use error::{Result, SearchError};
pub use fusion::{ImportanceBooster, RRFFusion};
pub use hybrid::HybridSearch;
