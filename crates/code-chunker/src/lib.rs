//! # CodeWeaver Code Chunker
//!
//! Turns source files into retrievable [`CodeChunk`]s along semantic or
//! syntactic boundaries.
//!
//! ## Architecture
//!
//! ```text
//! Source bytes
//!     │
//!     ├──> binary / encoding check, edge cases (empty, single line)
//!     │
//!     ├──> ChunkerSelector: does this extension have tree-sitter support?
//!     │      ├─ yes ─> SemanticChunker (Category/Thing/Connection model)
//!     │      │             │  oversize node? ─> DelimiterChunker (sub-span)
//!     │      │             └─ parse/runtime error? ─> DelimiterChunker (whole file)
//!     │      └─ no  ─> DelimiterChunker (LanguageFamily-routed patterns)
//!     │
//!     └──> ResourceGovernor-bounded, batch + content-hash registered
//! ```
//!
//! Each file gets a fresh [`ChunkerSelector`] and [`governor::ResourceGovernor`]
//! — there is no shared mutable state across files, so chunking many files
//! concurrently needs no locking beyond the shared
//! [`codeweaver_batch_ref::BatchStore`] / [`codeweaver_batch_ref::ContentHashStore`].

mod batching;
pub mod category;
pub mod config;
pub mod delimiter;
pub mod error;
pub mod governor;
mod language;
pub mod selector;
pub mod semantic;
pub mod types;

pub use config::{ChunkerConcurrencyConfig, ChunkerConfig, ChunkerPerformanceConfig, ExecutorKind};
pub use error::{ChunkerError, Result};
pub use language::Language;
pub use selector::ChunkerSelector;
pub use types::{
    ChunkMetadata, ChunkSource, CodeChunk, DelimiterKindTag, DelimiterMetadata, EdgeCase,
    ImportanceVector, SemanticMetadata,
};
