use codeweaver_protocol::Setting;
use serde::{Deserialize, Serialize};

/// Chunking policy (spec.md §6, `chunker` group).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkerConfig {
    /// Minimum importance score (any task) for a node to be independently
    /// chunkable. Nodes below this are only kept via container pass-through.
    pub semantic_importance_threshold: f32,

    /// Prefer the semantic chunker over the delimiter chunker when a
    /// language supports both.
    pub prefer_semantic: bool,

    /// Languages that must use the delimiter chunker even when tree-sitter
    /// support exists. `Absent` means "no override" (respect
    /// `prefer_semantic`); `ExplicitlyUnset` means the operator cleared a
    /// previously-configured override, which must not fall back to a
    /// non-empty default list.
    #[serde(default)]
    pub force_delimiter_for_languages: Setting<Vec<String>>,

    /// Whether oversize semantic nodes may delegate to the delimiter
    /// chunker for sub-chunking (§4.3 step 4).
    pub enable_hybrid_chunking: bool,

    /// Overlap, in characters, carried between consecutive delimiter chunks.
    pub simple_overlap: usize,

    /// Target chunk size in tokens used by the delimiter chunker's
    /// take-whole-lines sizing and by the semantic chunker's size check.
    pub chunk_limit_tokens: usize,

    pub performance: ChunkerPerformanceConfig,
    pub concurrency: ChunkerConcurrencyConfig,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            semantic_importance_threshold: 0.3,
            prefer_semantic: true,
            force_delimiter_for_languages: Setting::Absent,
            enable_hybrid_chunking: true,
            simple_overlap: 64,
            chunk_limit_tokens: 1024,
            performance: ChunkerPerformanceConfig::default(),
            concurrency: ChunkerConcurrencyConfig::default(),
        }
    }
}

impl ChunkerConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.chunk_limit_tokens == 0 {
            return Err("chunk_limit_tokens must be > 0".to_string());
        }
        if !(0.0..=1.0).contains(&self.semantic_importance_threshold) {
            return Err("semantic_importance_threshold must be in [0,1]".to_string());
        }
        self.performance.validate()
    }

    pub fn forces_delimiter_for(&self, language: &str) -> bool {
        match &self.force_delimiter_for_languages {
            Setting::Set(langs) => langs.iter().any(|l| l.eq_ignore_ascii_case(language)),
            Setting::ExplicitlyUnset | Setting::Absent => false,
        }
    }
}

/// Resource-governance policy (spec.md §6, `chunker.performance` group; see
/// also [`crate::governor::ResourceGovernor`]).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ChunkerPerformanceConfig {
    pub max_file_size_mb: u64,
    pub chunk_timeout_seconds: u64,
    pub parse_timeout_seconds: u64,
    pub max_chunks_per_file: usize,
    pub max_memory_mb_per_operation: u64,
    pub max_ast_depth: usize,
}

impl Default for ChunkerPerformanceConfig {
    fn default() -> Self {
        Self {
            max_file_size_mb: 10,
            chunk_timeout_seconds: 30,
            parse_timeout_seconds: 30,
            max_chunks_per_file: 5000,
            max_memory_mb_per_operation: 100,
            max_ast_depth: 200,
        }
    }
}

impl ChunkerPerformanceConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.max_chunks_per_file == 0 {
            return Err("max_chunks_per_file must be > 0".to_string());
        }
        if self.max_ast_depth == 0 {
            return Err("max_ast_depth must be > 0".to_string());
        }
        Ok(())
    }

    pub fn max_file_bytes(&self) -> u64 {
        self.max_file_size_mb * 1024 * 1024
    }
}

/// Worker-pool shape (spec.md §6, `chunker.concurrency` group).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkerConcurrencyConfig {
    pub max_parallel_files: usize,
    pub executor: ExecutorKind,
}

impl Default for ChunkerConcurrencyConfig {
    fn default() -> Self {
        Self {
            max_parallel_files: 4,
            executor: ExecutorKind::Thread,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutorKind {
    Process,
    Thread,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(ChunkerConfig::default().validate().is_ok());
    }

    #[test]
    fn zero_chunk_limit_is_invalid() {
        let config = ChunkerConfig {
            chunk_limit_tokens: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn force_delimiter_override_is_explicit() {
        let mut config = ChunkerConfig::default();
        assert!(!config.forces_delimiter_for("rust"));

        config.force_delimiter_for_languages = Setting::Set(vec!["rust".to_string()]);
        assert!(config.forces_delimiter_for("rust"));
        assert!(!config.forces_delimiter_for("python"));

        config.force_delimiter_for_languages = Setting::ExplicitlyUnset;
        assert!(!config.forces_delimiter_for("rust"));
    }
}
