use thiserror::Error;

pub type Result<T> = std::result::Result<T, InitializationError>;

/// Composition-root failures (spec.md §7 "Lifecycle errors").
#[derive(Error, Debug)]
pub enum InitializationError {
    #[error("project root is invalid: {0}")]
    InvalidRoot(String),

    #[error("failed to construct embedding provider: {0}")]
    ProviderInit(#[from] codeweaver_vector_store::VectorStoreError),

    #[error("failed to construct the project indexer: {0}")]
    IndexerInit(#[from] codeweaver_indexer::IndexerError),

    #[error("failed to bind the management HTTP server: {0}")]
    ManagementBind(#[source] std::io::Error),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}
