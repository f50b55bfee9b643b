use codeweaver_batch_ref::{BatchId, ChunkId, ContentHash};
use serde::{Deserialize, Serialize};

use crate::category::{CategoryName, ThingKind};

/// One retrievable unit of source text.
///
/// Invariants (spec.md §8, invariants 1-2): `start_line <= end_line` and both
/// lie within the source file; `content` is non-empty unless
/// `source == ChunkSource::EdgeCase` with `metadata.edge_case ==
/// Some(EdgeCase::WhitespaceOnly)`; token count is `<= chunk_limit` except
/// along [`ChunkSource::Fallback`], which must record a reason.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CodeChunk {
    pub id: ChunkId,
    pub content: String,
    pub file_path: String,
    pub language: String,
    pub start_line: usize,
    pub end_line: usize,
    pub source: ChunkSource,
    pub metadata: ChunkMetadata,
}

impl CodeChunk {
    pub fn line_count(&self) -> usize {
        self.end_line.saturating_sub(self.start_line) + 1
    }

    pub fn estimated_tokens(&self) -> usize {
        self.metadata.estimated_tokens
    }

    pub fn contains_line(&self, line: usize) -> bool {
        line >= self.start_line && line <= self.end_line
    }

    pub fn is_well_formed(&self) -> bool {
        self.start_line <= self.end_line
            && (!self.content.is_empty() || self.metadata.edge_case == Some(EdgeCase::WhitespaceOnly))
    }
}

/// Provenance of a chunk: which stage of the chunker cascade produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ChunkSource {
    Semantic,
    Delimiter,
    Fallback,
    EdgeCase,
}

/// Edge-case tag attached to single-chunk whole-file emissions (spec.md §4.3
/// step 1, §8 boundaries).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EdgeCase {
    WhitespaceOnly,
    SingleLine,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ChunkMetadata {
    pub content_hash: Option<ContentHash>,
    pub batch_id: Option<BatchId>,
    pub estimated_tokens: usize,
    pub edge_case: Option<EdgeCase>,

    /// Populated when `source == Semantic` (or a semantic node delegated to
    /// the delimiter chunker for oversize sub-chunking, §4.3 step 4).
    pub semantic: Option<SemanticMetadata>,

    /// Populated when `source == Delimiter`.
    pub delimiter: Option<DelimiterMetadata>,

    /// Reason recorded when `source == Fallback` (spec.md §3 invariant on
    /// the last-resort path).
    pub fallback_reason: Option<String>,
}

impl ChunkMetadata {
    pub fn estimate_tokens_from_content(content: &str) -> usize {
        (content.len() / 4).max(1)
    }
}

/// Semantic-chunker-specific metadata (spec.md §4.3).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SemanticMetadata {
    /// Display name, e.g. "Python-function_definition-Function: 'foo'".
    pub display_name: String,
    pub classification: CategoryName,
    /// Raw tree-sitter node kind (e.g. "function_definition").
    pub node_kind: String,
    pub primary_category: CategoryName,
    pub importance: ImportanceVector,
    pub is_composite: bool,
    pub nesting_level: usize,
    pub parent_id: Option<ChunkId>,
    /// Set when this chunk was produced by delegating an oversize semantic
    /// node's text to the delimiter chunker (§4.3 step 4).
    pub parent_semantic_node: Option<ThingKind>,
}

/// Delimiter-chunker-specific metadata (spec.md §4.4).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DelimiterMetadata {
    pub delimiter_kind: DelimiterKindTag,
    pub priority: i32,
    pub nesting: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Hash)]
#[serde(rename_all = "snake_case")]
pub enum DelimiterKindTag {
    Block,
    Function,
    Class,
    Comment,
}

/// Per-task importance scores in `[0,1]` (spec.md §3, Glossary).
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct ImportanceVector {
    pub discovery: f32,
    pub comprehension: f32,
    pub modification: f32,
    pub debugging: f32,
    pub documentation: f32,
}

impl ImportanceVector {
    pub fn max(&self) -> f32 {
        [
            self.discovery,
            self.comprehension,
            self.modification,
            self.debugging,
            self.documentation,
        ]
        .into_iter()
        .fold(0.0_f32, f32::max)
    }

    pub fn meets_threshold(&self, threshold: f32) -> bool {
        self.max() >= threshold
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(start: usize, end: usize, content: &str) -> CodeChunk {
        CodeChunk {
            id: ChunkId::new(),
            content: content.to_string(),
            file_path: "test.rs".to_string(),
            language: "rust".to_string(),
            start_line: start,
            end_line: end,
            source: ChunkSource::Semantic,
            metadata: ChunkMetadata::default(),
        }
    }

    #[test]
    fn line_count_and_contains_line() {
        let c = chunk(10, 15, "code");
        assert_eq!(c.line_count(), 6);
        assert!(c.contains_line(10));
        assert!(c.contains_line(15));
        assert!(!c.contains_line(9));
        assert!(!c.contains_line(16));
    }

    #[test]
    fn well_formed_requires_non_empty_content_unless_whitespace_only() {
        let mut c = chunk(1, 1, "");
        assert!(!c.is_well_formed());
        c.metadata.edge_case = Some(EdgeCase::WhitespaceOnly);
        assert!(c.is_well_formed());
    }

    #[test]
    fn importance_threshold() {
        let v = ImportanceVector {
            modification: 0.5,
            ..Default::default()
        };
        assert!(v.meets_threshold(0.3));
        assert!(!v.meets_threshold(0.6));
    }
}
