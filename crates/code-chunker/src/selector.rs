//! Routes a file to the semantic chunker or the delimiter chunker, and
//! degrades from one to the other when the primary choice fails (spec.md
//! §4.1, §4.2: "cascade" chunking).

use std::path::Path;

use codeweaver_batch_ref::{BatchStore, ContentHashStore};

use crate::batching;
use crate::config::ChunkerConfig;
use crate::delimiter::{DelimiterChunker, LanguageFamily};
use crate::error::{ChunkerError, Result};
use crate::governor::ResourceGovernor;
use crate::language::Language;
use crate::semantic::SemanticChunker;
use crate::types::CodeChunk;

/// Stateless per-file entry point: construct one per file, never reused
/// across files (spec.md §4.1's governor is likewise scoped per file).
pub struct ChunkerSelector {
    config: ChunkerConfig,
}

impl ChunkerSelector {
    pub fn new(config: ChunkerConfig) -> Self {
        Self { config }
    }

    pub fn chunk_bytes(
        &self,
        raw: &[u8],
        file_path: &str,
        batches: &mut BatchStore,
        content_hashes: &mut ContentHashStore,
    ) -> Result<Vec<CodeChunk>> {
        if let Some(offset) = raw.iter().position(|&b| b == 0) {
            return Err(ChunkerError::BinaryFileError { offset });
        }
        let content = String::from_utf8(raw.to_vec())
            .map_err(|e| ChunkerError::BinaryFileError { offset: e.utf8_error().valid_up_to() })?;

        self.chunk_str(&content, file_path, batches, content_hashes)
    }

    pub fn chunk_str(
        &self,
        content: &str,
        file_path: &str,
        batches: &mut BatchStore,
        content_hashes: &mut ContentHashStore,
    ) -> Result<Vec<CodeChunk>> {
        let language = Language::from_path(file_path);
        let ext = Path::new(file_path)
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_lowercase();
        let family = LanguageFamily::from_extension(&ext);

        let use_semantic = language.supports_ast()
            && self.config.prefer_semantic
            && !self.config.forces_delimiter_for(language.as_str());

        if use_semantic {
            let mut governor = ResourceGovernor::new(self.config.performance);
            let mut analyzer = match SemanticChunker::new(self.config.clone(), language) {
                Ok(analyzer) => analyzer,
                Err(e) if e.is_recoverable_by_cascade() => {
                    return self.chunk_with_delimiter(content, file_path, family, batches, content_hashes);
                }
                Err(e) => return Err(e),
            };

            match analyzer.chunk(content, file_path, &mut governor, content_hashes, batches) {
                Ok(chunks) => return Ok(chunks),
                Err(e) if e.is_recoverable_by_cascade() => {
                    return self.chunk_with_delimiter(content, file_path, family, batches, content_hashes);
                }
                Err(e) => return Err(e),
            }
        }

        self.chunk_with_delimiter(content, file_path, family, batches, content_hashes)
    }

    fn chunk_with_delimiter(
        &self,
        content: &str,
        file_path: &str,
        family: LanguageFamily,
        batches: &mut BatchStore,
        content_hashes: &mut ContentHashStore,
    ) -> Result<Vec<CodeChunk>> {
        let mut governor = ResourceGovernor::new(self.config.performance);
        let language = Language::from_path(file_path);
        let chunker = DelimiterChunker::new(self.config.clone(), family);
        let chunks = chunker.chunk(content, file_path, language.as_str(), &mut governor)?;
        Ok(batching::register_batch(file_path, chunks, batches, content_hashes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::num::NonZeroUsize;

    fn fresh_stores() -> (ContentHashStore, BatchStore) {
        (
            ContentHashStore::new(NonZeroUsize::new(64).unwrap()),
            BatchStore::new(NonZeroUsize::new(64).unwrap()),
        )
    }

    #[test]
    fn rust_file_uses_semantic_path() {
        let selector = ChunkerSelector::new(ChunkerConfig::default());
        let (mut hashes, mut batches) = fresh_stores();
        let chunks = selector
            .chunk_str("fn main() {}\n", "main.rs", &mut batches, &mut hashes)
            .unwrap();
        assert!(chunks.iter().any(|c| c.metadata.semantic.is_some()));
    }

    #[test]
    fn shell_file_uses_delimiter_path() {
        let selector = ChunkerSelector::new(ChunkerConfig::default());
        let (mut hashes, mut batches) = fresh_stores();
        let chunks = selector
            .chunk_str("function greet() {\n  echo hi\n}\n", "greet.sh", &mut batches, &mut hashes)
            .unwrap();
        assert!(!chunks.is_empty());
        assert!(chunks.iter().all(|c| c.metadata.semantic.is_none()));
    }

    #[test]
    fn forcing_delimiter_override_skips_semantic_path() {
        let mut config = ChunkerConfig::default();
        config.force_delimiter_for_languages = codeweaver_protocol::Setting::Set(vec!["rust".to_string()]);
        let selector = ChunkerSelector::new(config);
        let (mut hashes, mut batches) = fresh_stores();
        let chunks = selector
            .chunk_str("fn main() {}\n", "main.rs", &mut batches, &mut hashes)
            .unwrap();
        assert!(chunks.iter().all(|c| c.metadata.semantic.is_none()));
    }

    #[test]
    fn nul_byte_is_rejected_as_binary() {
        let selector = ChunkerSelector::new(ChunkerConfig::default());
        let (mut hashes, mut batches) = fresh_stores();
        let result = selector.chunk_bytes(b"fn main() {\0}", "main.rs", &mut batches, &mut hashes);
        assert!(matches!(result, Err(ChunkerError::BinaryFileError { .. })));
    }

    #[test]
    fn every_chunk_gets_a_batch_id() {
        let selector = ChunkerSelector::new(ChunkerConfig::default());
        let (mut hashes, mut batches) = fresh_stores();
        let chunks = selector
            .chunk_str("function greet() {\n  echo hi\n}\n", "greet.sh", &mut batches, &mut hashes)
            .unwrap();
        assert!(chunks.iter().all(|c| c.metadata.batch_id.is_some()));
    }
}
