pub mod families;
mod matcher;
mod types;

pub use families::LanguageFamily;
pub use matcher::Boundary;
pub use types::{Delimiter, DelimiterMatcher, Structural};

use codeweaver_batch_ref::ChunkId;

use crate::config::ChunkerConfig;
use crate::error::Result;
use crate::governor::ResourceGovernor;
use crate::types::{ChunkMetadata, ChunkSource, CodeChunk, DelimiterMetadata};

/// Pattern-based chunker for languages without (or opting out of) semantic
/// support (spec.md §4.4). Stateless aside from its config — a fresh
/// instance is constructed per file.
pub struct DelimiterChunker {
    config: ChunkerConfig,
    family: LanguageFamily,
}

impl DelimiterChunker {
    pub fn new(config: ChunkerConfig, family: LanguageFamily) -> Self {
        Self { config, family }
    }

    pub fn chunk(
        &self,
        content: &str,
        file_path: &str,
        language: &str,
        governor: &mut ResourceGovernor,
    ) -> Result<Vec<CodeChunk>> {
        governor.check_file_size(content.len() as u64)?;
        governor.check_timeout()?;

        let delimiters = self.family.delimiters();
        let boundaries = matcher::find_boundaries(content, &delimiters);

        let mut chunks = Vec::with_capacity(boundaries.len());
        let mut previous_end = 0usize;

        for boundary in &boundaries {
            governor.check_timeout()?;
            governor.register_chunk()?;

            let mut body_start = boundary.start;
            let mut body_end = boundary.end;
            if boundary.take_whole_lines {
                body_start = expand_to_line_start(content, body_start);
                body_end = expand_to_line_end(content, body_end);
            }

            let body = if boundary.inclusive {
                &content[body_start..body_end]
            } else {
                strip_delimiter_markers(&content[body_start..body_end])
            };

            let overlap = overlap_prefix(content, body_start, previous_end, self.config.simple_overlap);
            let chunk_text = format!("{overlap}{body}");
            let estimated_tokens = ChunkMetadata::estimate_tokens_from_content(&chunk_text);

            let start_line = 1 + content[..body_start].matches('\n').count();
            let end_line = 1 + content[..body_end.min(content.len())].matches('\n').count();

            chunks.push(CodeChunk {
                id: ChunkId::new(),
                content: chunk_text,
                file_path: file_path.to_string(),
                language: language.to_string(),
                start_line,
                end_line,
                source: ChunkSource::Delimiter,
                metadata: ChunkMetadata {
                    estimated_tokens,
                    delimiter: Some(DelimiterMetadata {
                        delimiter_kind: boundary.kind,
                        priority: boundary.priority,
                        nesting: boundary.nesting,
                    }),
                    ..Default::default()
                },
            });

            previous_end = body_end;
        }

        Ok(chunks)
    }
}

/// Strips known comment-style markers; falls back to trimming one byte off
/// each end for anything else non-inclusive.
fn strip_delimiter_markers(span: &str) -> &str {
    if let Some(rest) = span.strip_prefix("/*") {
        rest.strip_suffix("*/").unwrap_or(rest)
    } else if let Some(rest) = span.strip_prefix("<!--") {
        rest.strip_suffix("-->").unwrap_or(rest)
    } else {
        span.get(1..span.len().saturating_sub(1)).unwrap_or(span)
    }
}

/// A bounded prefix of the preceding content, inserted so that neighboring
/// chunks share context at their seam (spec.md §4.4 emission policy). Only
/// applied when this boundary immediately follows the previous one; a gap
/// between them (material left uncaptured by any delimiter) gets no overlap.
fn overlap_prefix(content: &str, body_start: usize, previous_end: usize, overlap_chars: usize) -> &str {
    if overlap_chars == 0 || body_start == 0 || body_start < previous_end {
        return "";
    }
    let from = body_start.saturating_sub(overlap_chars);
    let safe_from = content
        .char_indices()
        .map(|(i, _)| i)
        .find(|&i| i >= from)
        .unwrap_or(body_start);
    &content[safe_from..body_start]
}

fn expand_to_line_start(content: &str, pos: usize) -> usize {
    content[..pos].rfind('\n').map(|i| i + 1).unwrap_or(0)
}

fn expand_to_line_end(content: &str, pos: usize) -> usize {
    content[pos..].find('\n').map(|i| pos + i).unwrap_or(content.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ChunkerPerformanceConfig;
    use crate::types::DelimiterKindTag;

    #[test]
    fn nested_js_functions_yield_function_chunks() {
        let content = "function outer() {\n  function inner() {\n    if (true) { console.log('x'); }\n  }\n}\n";
        let chunker = DelimiterChunker::new(ChunkerConfig::default(), LanguageFamily::CBrace);
        let mut governor = ResourceGovernor::new(ChunkerPerformanceConfig::default());
        let chunks = chunker.chunk(content, "app.js", "javascript", &mut governor).unwrap();

        let functions = chunks
            .iter()
            .filter(|c| {
                c.metadata
                    .delimiter
                    .as_ref()
                    .is_some_and(|d| d.delimiter_kind == DelimiterKindTag::Function)
            })
            .count();
        assert!(functions >= 2);
        assert!(chunks
            .iter()
            .any(|c| c.metadata.delimiter.as_ref().is_some_and(|d| d.nesting > 0)));
    }

    #[test]
    fn non_inclusive_block_strips_brace_markers() {
        let content = "fn f() { let x = 1; }\n";
        let chunker = DelimiterChunker::new(ChunkerConfig::default(), LanguageFamily::CBrace);
        let mut governor = ResourceGovernor::new(ChunkerPerformanceConfig::default());
        let chunks = chunker.chunk(content, "f.c", "c", &mut governor).unwrap();
        let block = chunks
            .iter()
            .find(|c| {
                c.metadata
                    .delimiter
                    .as_ref()
                    .is_some_and(|d| d.delimiter_kind == DelimiterKindTag::Block)
            })
            .expect("block chunk");
        assert!(!block.content.trim().starts_with('{'));
        assert!(!block.content.trim().ends_with('}'));
        assert!(block.content.contains("let x = 1"));
    }
}
