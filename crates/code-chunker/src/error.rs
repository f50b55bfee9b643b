use thiserror::Error;

/// Result type for chunker operations.
pub type Result<T> = std::result::Result<T, ChunkerError>;

/// Errors raised by the chunking pipeline.
///
/// Parse/content and resource errors degrade within the [`crate::selector`]
/// cascade rather than aborting the run; only [`ChunkerError::IoError`]
/// escapes a single file's chunking attempt entirely.
#[derive(Error, Debug)]
pub enum ChunkerError {
    #[error("parse error: {0}")]
    ParseError(String),

    #[error("binary content detected (NUL byte at offset {offset})")]
    BinaryFileError { offset: usize },

    #[error("unsupported language: {0}")]
    UnsupportedLanguage(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("chunking exceeded wall time limit of {limit_secs}s")]
    ChunkingTimeoutError { limit_secs: u64 },

    #[error("chunk count {count} exceeded limit of {limit}")]
    ChunkLimitExceededError { count: usize, limit: usize },

    #[error("AST depth {depth} exceeded limit of {limit}")]
    ASTDepthExceededError { depth: usize, limit: usize },

    #[error("io error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("invalid chunk boundaries: start={start}, end={end}")]
    InvalidBoundaries { start: usize, end: usize },

    #[error("empty content provided")]
    EmptyContent,

    #[error("tree-sitter error: {0}")]
    TreeSitterError(String),

    #[error("{0}")]
    Other(String),
}

impl ChunkerError {
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::ParseError(msg.into())
    }

    pub fn unsupported_language(lang: impl Into<String>) -> Self {
        Self::UnsupportedLanguage(lang.into())
    }

    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }

    pub fn tree_sitter(msg: impl Into<String>) -> Self {
        Self::TreeSitterError(msg.into())
    }

    /// Whether this error should be caught and retried on the fallback
    /// chunker by [`crate::selector::ChunkerSelector`], rather than
    /// propagated to the caller.
    pub fn is_recoverable_by_cascade(&self) -> bool {
        matches!(
            self,
            Self::ParseError(_)
                | Self::UnsupportedLanguage(_)
                | Self::ChunkingTimeoutError { .. }
                | Self::ChunkLimitExceededError { .. }
                | Self::ASTDepthExceededError { .. }
                | Self::TreeSitterError(_)
        )
    }
}
