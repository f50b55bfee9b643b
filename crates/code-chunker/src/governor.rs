use std::time::{Duration, Instant};

use crate::config::ChunkerPerformanceConfig;
use crate::error::{ChunkerError, Result};

/// Per-operation resource scope enforcing timeout, chunk-count, and
/// AST-depth limits for a single file's chunking pass (spec.md §4.1).
///
/// One governor is constructed per file, on whichever thread chunks that
/// file — there is no shared mutable state, so no locking is needed. Its
/// counters live only as long as the governor value; dropping it (on any
/// exit path, including an early `?`) releases them.
pub struct ResourceGovernor {
    started_at: Instant,
    limits: ChunkerPerformanceConfig,
    chunk_count: usize,
}

impl ResourceGovernor {
    pub fn new(limits: ChunkerPerformanceConfig) -> Self {
        Self {
            started_at: Instant::now(),
            limits,
            chunk_count: 0,
        }
    }

    /// Checks the wall-clock budget. Call this at natural yield points
    /// during traversal (per node, or per batch of nodes) — spec.md §8
    /// invariant 8 bounds the overrun to one `check_timeout` interval, not
    /// zero, since the governor can't preempt mid-traversal.
    pub fn check_timeout(&self) -> Result<()> {
        let limit = Duration::from_secs(self.limits.chunk_timeout_seconds);
        if self.started_at.elapsed() > limit {
            return Err(ChunkerError::ChunkingTimeoutError {
                limit_secs: self.limits.chunk_timeout_seconds,
            });
        }
        Ok(())
    }

    /// Registers one more emitted chunk, failing once the per-file cap is
    /// exceeded.
    pub fn register_chunk(&mut self) -> Result<()> {
        self.chunk_count += 1;
        if self.chunk_count > self.limits.max_chunks_per_file {
            return Err(ChunkerError::ChunkLimitExceededError {
                count: self.chunk_count,
                limit: self.limits.max_chunks_per_file,
            });
        }
        Ok(())
    }

    pub fn check_depth(&self, depth: usize) -> Result<()> {
        if depth > self.limits.max_ast_depth {
            return Err(ChunkerError::ASTDepthExceededError {
                depth,
                limit: self.limits.max_ast_depth,
            });
        }
        Ok(())
    }

    pub fn check_file_size(&self, byte_len: u64) -> Result<()> {
        if byte_len > self.limits.max_file_bytes() {
            return Err(ChunkerError::InvalidConfig(format!(
                "file size {byte_len} bytes exceeds max_file_size_mb={}",
                self.limits.max_file_size_mb
            )));
        }
        Ok(())
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    pub fn chunk_count(&self) -> usize {
        self.chunk_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_chunk_fails_past_limit() {
        let mut governor = ResourceGovernor::new(ChunkerPerformanceConfig {
            max_chunks_per_file: 2,
            ..Default::default()
        });
        assert!(governor.register_chunk().is_ok());
        assert!(governor.register_chunk().is_ok());
        assert!(matches!(
            governor.register_chunk(),
            Err(ChunkerError::ChunkLimitExceededError { count: 3, limit: 2 })
        ));
    }

    #[test]
    fn check_depth_fails_past_limit() {
        let governor = ResourceGovernor::new(ChunkerPerformanceConfig {
            max_ast_depth: 5,
            ..Default::default()
        });
        assert!(governor.check_depth(5).is_ok());
        assert!(governor.check_depth(6).is_err());
    }

    #[test]
    fn check_timeout_passes_immediately_after_construction() {
        let governor = ResourceGovernor::new(ChunkerPerformanceConfig::default());
        assert!(governor.check_timeout().is_ok());
    }

    #[test]
    fn check_file_size_rejects_oversize_files() {
        let governor = ResourceGovernor::new(ChunkerPerformanceConfig {
            max_file_size_mb: 1,
            ..Default::default()
        });
        assert!(governor.check_file_size(1024).is_ok());
        assert!(governor.check_file_size(2 * 1024 * 1024).is_err());
    }
}
