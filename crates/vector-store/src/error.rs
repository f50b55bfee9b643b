use thiserror::Error;

pub type Result<T> = std::result::Result<T, VectorStoreError>;

/// Error taxonomy for the vector-store/failover/provider subsystem.
#[derive(Error, Debug)]
pub enum VectorStoreError {
    #[error("embedding error: {0}")]
    EmbeddingError(String),

    #[error("index error: {0}")]
    IndexError(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid vector dimension: expected {expected}, got {actual}")]
    InvalidDimension { expected: usize, actual: usize },

    /// Opening an existing collection whose stored embedding model differs
    /// from the currently configured one (spec.md §3, §4.6 compatibility gate).
    #[error("collection '{collection}' was created with model '{stored_model}', current config uses '{current_model}'; reindex, revert, delete, or rename the collection")]
    ModelSwitchError {
        collection: String,
        stored_model: String,
        current_model: String,
    },

    /// Dimension mismatch between the stored collection and the current
    /// provider's embedding dimension. Always fatal at open time.
    #[error("collection '{collection}' has dimension {stored}, current provider produces {current}")]
    DimensionMismatchError {
        collection: String,
        stored: usize,
        current: usize,
    },

    /// A configured provider could not be reached. Triggers failover when
    /// enabled; otherwise surfaced to the caller.
    #[error("provider '{provider}' unavailable: {reason}")]
    ProviderUnavailable { provider: String, reason: String },

    /// An embedding call failed after exhausting its retry budget.
    #[error("embedding failed for provider '{provider}' after {attempts} attempts: {reason}")]
    EmbeddingFailure {
        provider: String,
        attempts: u32,
        reason: String,
    },

    #[error("{0}")]
    Other(String),
}

impl VectorStoreError {
    /// Whether this error should trip the failover manager's circuit
    /// breaker rather than simply being logged and retried in place.
    #[must_use]
    pub const fn trips_failover(&self) -> bool {
        matches!(self, Self::ProviderUnavailable { .. } | Self::IndexError(_))
    }
}
