use tree_sitter::{Node, Parser};

use codeweaver_batch_ref::{BatchStore, ChunkId, ContentHashStore};

use crate::category::{CategoryName, Thing, ThingArena, ThingId};
use crate::config::ChunkerConfig;
use crate::delimiter::{DelimiterChunker, LanguageFamily};
use crate::error::{ChunkerError, Result};
use crate::governor::ResourceGovernor;
use crate::language::Language;
use crate::semantic::classify::{self, NodeClass};
use crate::types::{
    ChunkMetadata, ChunkSource, CodeChunk, EdgeCase, SemanticMetadata, ThingKind,
};

/// AST-based semantic chunker (spec.md §4.3): classifies top-level and
/// member constructs through the Category/Thing model, recursing into
/// containers (impl/trait/class) and delegating any single construct too
/// large for one chunk to the delimiter chunker.
pub struct SemanticChunker {
    config: ChunkerConfig,
    parser: Parser,
    language: Language,
}

impl SemanticChunker {
    pub fn new(config: ChunkerConfig, language: Language) -> Result<Self> {
        if !language.supports_ast() {
            return Err(ChunkerError::unsupported_language(language.as_str()));
        }

        let ts_language = language.tree_sitter_language()?;
        let mut parser = Parser::new();
        parser
            .set_language(&ts_language)
            .map_err(|e| ChunkerError::tree_sitter(format!("failed to set language: {e}")))?;

        Ok(Self { config, parser, language })
    }

    pub fn chunk(
        &mut self,
        content: &str,
        file_path: &str,
        governor: &mut ResourceGovernor,
        content_hashes: &mut ContentHashStore,
        batches: &mut BatchStore,
    ) -> Result<Vec<CodeChunk>> {
        governor.check_file_size(content.len() as u64)?;

        if content.trim().is_empty() {
            let chunk = edge_case_chunk(content, file_path, self.language, EdgeCase::WhitespaceOnly);
            return Ok(crate::batching::register_batch(file_path, vec![chunk], batches, content_hashes));
        }
        if content.lines().count() <= 1 {
            let chunk = edge_case_chunk(content, file_path, self.language, EdgeCase::SingleLine);
            return Ok(crate::batching::register_batch(file_path, vec![chunk], batches, content_hashes));
        }

        let tree = self
            .parser
            .parse(content, None)
            .ok_or_else(|| ChunkerError::parse("failed to parse source code"))?;
        let root = tree.root_node();
        governor.check_depth(0)?;

        let mut arena = ThingArena::new();
        let mut symbol_names: Vec<Option<String>> = Vec::new();

        let mut cursor = root.walk();
        for child in root.children(&mut cursor) {
            governor.check_timeout()?;
            let Some(class) = classify::classify(self.language, child.kind()) else {
                continue;
            };
            self.insert_node(content, &mut arena, &mut symbol_names, child, class, None);
        }

        if arena.is_empty() {
            let reason = "no recognized top-level constructs; whole file emitted as one chunk";
            let chunk = CodeChunk {
                id: ChunkId::new(),
                content: content.to_string(),
                file_path: file_path.to_string(),
                language: self.language.as_str().to_string(),
                start_line: 1,
                end_line: content.lines().count().max(1),
                source: ChunkSource::Fallback,
                metadata: ChunkMetadata {
                    estimated_tokens: ChunkMetadata::estimate_tokens_from_content(content),
                    fallback_reason: Some(reason.to_string()),
                    ..Default::default()
                },
            };
            return Ok(crate::batching::register_batch(file_path, vec![chunk], batches, content_hashes));
        }

        let mut chunks = Vec::new();
        let top_level: Vec<ThingId> = (0..arena.len())
            .filter(|&id| arena.get(id).unwrap().parent.is_none())
            .collect();

        for id in top_level {
            governor.check_timeout()?;
            governor.register_chunk()?;
            self.emit_thing(content, file_path, &arena, &symbol_names, id, None, 0, governor, &mut chunks)?;
        }

        Ok(crate::batching::register_batch(file_path, chunks, batches, content_hashes))
    }

    /// Walks one classified node, inserting it (and, for containers, its
    /// members) into the arena.
    fn insert_node(
        &self,
        content: &str,
        arena: &mut ThingArena,
        symbol_names: &mut Vec<Option<String>>,
        node: Node,
        class: NodeClass,
        parent: Option<ThingId>,
    ) -> ThingId {
        let name = extract_symbol_name(content, node);
        let id = arena.insert(
            Thing::Token,
            node.kind(),
            node.start_byte(),
            node.end_byte(),
            parent,
            &[class.category],
        );
        symbol_names.push(name);
        debug_assert_eq!(symbol_names.len() - 1, id);

        if class.is_container {
            let body_kind = classify::container_body_kind(self.language, node.kind());
            let mut cursor = node.walk();
            if let Some(body) = node.children(&mut cursor).find(|c| c.kind() == body_kind) {
                let mut body_cursor = body.walk();
                for member in body.children(&mut body_cursor) {
                    let Some(member_class) = classify::classify(self.language, member.kind()) else {
                        continue;
                    };
                    // Recurses so a container nested inside another
                    // container (e.g. Rust's `mod api { impl Car { .. } }`)
                    // still has its own members extracted.
                    let member_id =
                        self.insert_node(content, arena, symbol_names, member, member_class, Some(id));
                    arena.connect_direct(id, member_id, crate::category::Role::Body);
                }
            }
        }

        id
    }

    #[allow(clippy::too_many_arguments)]
    fn emit_thing(
        &self,
        content: &str,
        file_path: &str,
        arena: &ThingArena,
        symbol_names: &[Option<String>],
        id: ThingId,
        parent_chunk_id: Option<ChunkId>,
        nesting_level: usize,
        governor: &mut ResourceGovernor,
        chunks: &mut Vec<CodeChunk>,
    ) -> Result<()> {
        governor.check_depth(nesting_level)?;
        let record = arena.get(id).expect("valid thing id");
        let node_kind = record.node_kind.clone();
        let category = arena.primary_category(id);
        let name = symbol_names.get(id).cloned().flatten();
        let node_text = &content[record.start_byte..record.end_byte];
        let estimated_tokens = ChunkMetadata::estimate_tokens_from_content(node_text);
        let is_container = arena
            .connections()
            .iter()
            .any(|c| matches!(c, crate::category::Connection::Direct { from, .. } if *from == id));

        let display_name = format!(
            "{}-{}-{:?}: '{}'",
            self.language.as_str(),
            node_kind,
            category,
            name.as_deref().unwrap_or("")
        );

        if is_container {
            if estimated_tokens <= self.config.chunk_limit_tokens {
                // The whole container fits: emit it as one composite chunk
                // and stop — its descendants are not independently
                // chunkable once subsumed (spec.md §4.3 step 4, "if within
                // the chunk limit, emit as a chunk").
                let (start_line, end_line) = line_span(content, record.start_byte, record.end_byte);
                chunks.push(CodeChunk {
                    id: ChunkId::new(),
                    content: node_text.to_string(),
                    file_path: file_path.to_string(),
                    language: self.language.as_str().to_string(),
                    start_line,
                    end_line,
                    source: ChunkSource::Semantic,
                    metadata: ChunkMetadata {
                        estimated_tokens,
                        semantic: Some(SemanticMetadata {
                            display_name,
                            classification: category,
                            node_kind: node_kind.clone(),
                            primary_category: category,
                            importance: classify::importance_for(category, &node_kind),
                            is_composite: true,
                            nesting_level,
                            parent_id: parent_chunk_id,
                            parent_semantic_node: None,
                        }),
                        ..Default::default()
                    },
                });
                return Ok(());
            }

            // Oversize container: recurse into children and emit whichever
            // of them fit (spec.md §4.3 step 4).
            for connection in arena.connections() {
                if let crate::category::Connection::Direct { from, to, .. } = *connection {
                    if from == id {
                        self.emit_thing(
                            content,
                            file_path,
                            arena,
                            symbol_names,
                            to,
                            parent_chunk_id,
                            nesting_level + 1,
                            governor,
                            chunks,
                        )?;
                    }
                }
            }
            return Ok(());
        }

        if estimated_tokens <= self.config.chunk_limit_tokens {
            let (start_line, end_line) = line_span(content, record.start_byte, record.end_byte);
            chunks.push(CodeChunk {
                id: ChunkId::new(),
                content: node_text.to_string(),
                file_path: file_path.to_string(),
                language: self.language.as_str().to_string(),
                start_line,
                end_line,
                source: ChunkSource::Semantic,
                metadata: ChunkMetadata {
                    estimated_tokens,
                    semantic: Some(SemanticMetadata {
                        display_name,
                        classification: category,
                        node_kind: node_kind.clone(),
                        primary_category: category,
                        importance: classify::importance_for(category, &node_kind),
                        is_composite: false,
                        nesting_level,
                        parent_id: parent_chunk_id,
                        parent_semantic_node: None,
                    }),
                    ..Default::default()
                },
            });
            return Ok(());
        }

        // Oversize leaf construct: delegate its span to the delimiter
        // chunker rather than emit a single chunk that violates the token
        // budget (spec.md §4.3 step 4).
        let family = language_to_family(self.language);
        let delimiter_chunker = DelimiterChunker::new(self.config.clone(), family);
        let row_offset = content[..record.start_byte].matches('\n').count();
        let sub_chunks = delimiter_chunker.chunk(node_text, file_path, self.language.as_str(), governor)?;
        let parent_kind = ThingKind {
            node_kind: node_kind.clone(),
            classification: category,
        };
        for mut sub in sub_chunks {
            sub.start_line += row_offset;
            sub.end_line += row_offset;
            sub.metadata.semantic = Some(SemanticMetadata {
                display_name: display_name.clone(),
                classification: category,
                node_kind: node_kind.clone(),
                primary_category: category,
                importance: classify::importance_for(category, &node_kind),
                is_composite: false,
                nesting_level: nesting_level + 1,
                parent_id: parent_chunk_id,
                parent_semantic_node: Some(parent_kind.clone()),
            });
            chunks.push(sub);
        }

        Ok(())
    }

}

fn line_span(content: &str, start_byte: usize, end_byte: usize) -> (usize, usize) {
    let start_line = 1 + content[..start_byte].matches('\n').count();
    let end_line = 1 + content[..end_byte.min(content.len())].matches('\n').count();
    (start_line, end_line)
}

fn edge_case_chunk(content: &str, file_path: &str, language: Language, edge_case: EdgeCase) -> CodeChunk {
    CodeChunk {
        id: ChunkId::new(),
        content: content.to_string(),
        file_path: file_path.to_string(),
        language: language.as_str().to_string(),
        start_line: 1,
        end_line: content.lines().count().max(1),
        source: ChunkSource::EdgeCase,
        metadata: ChunkMetadata {
            estimated_tokens: ChunkMetadata::estimate_tokens_from_content(content),
            edge_case: Some(edge_case),
            ..Default::default()
        },
    }
}

fn language_to_family(language: Language) -> LanguageFamily {
    match language {
        Language::Python => LanguageFamily::PythonIndent,
        Language::Ruby => LanguageFamily::RubyLuaKeywordEnd,
        _ => LanguageFamily::CBrace,
    }
}

fn extract_symbol_name(content: &str, node: Node) -> Option<String> {
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        let is_name_node = matches!(
            child.kind(),
            "identifier" | "name" | "type_identifier" | "field_identifier" | "property_identifier"
        );
        if is_name_node {
            return Some(content[child.start_byte()..child.end_byte()].to_string());
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ChunkerPerformanceConfig;
    use std::num::NonZeroUsize;

    fn fresh_stores() -> (ContentHashStore, BatchStore) {
        (
            ContentHashStore::new(NonZeroUsize::new(64).unwrap()),
            BatchStore::new(NonZeroUsize::new(64).unwrap()),
        )
    }

    #[test]
    fn rust_function_and_struct_are_classified() {
        let code = "fn main() {\n    println!(\"hi\");\n}\n\nstruct Point {\n    x: i32,\n}\n";
        let mut analyzer = SemanticChunker::new(ChunkerConfig::default(), Language::Rust).unwrap();
        let mut governor = ResourceGovernor::new(ChunkerPerformanceConfig::default());
        let (mut hashes, mut batches) = fresh_stores();
        let chunks = analyzer.chunk(code, "lib.rs", &mut governor, &mut hashes, &mut batches).unwrap();

        assert!(chunks.iter().any(|c| c
            .metadata
            .semantic
            .as_ref()
            .is_some_and(|s| s.classification == CategoryName::Definition)));
        assert!(chunks.iter().any(|c| c
            .metadata
            .semantic
            .as_ref()
            .is_some_and(|s| s.classification == CategoryName::DataStructure)));
        assert!(chunks.iter().all(|c| c.metadata.batch_id.is_some()));
    }

    #[test]
    fn small_impl_block_is_emitted_whole_without_descending_into_methods() {
        let code = "struct Foo;\n\nimpl Foo {\n    fn bar(&self) -> i32 {\n        1\n    }\n}\n";
        let mut analyzer = SemanticChunker::new(ChunkerConfig::default(), Language::Rust).unwrap();
        let mut governor = ResourceGovernor::new(ChunkerPerformanceConfig::default());
        let (mut hashes, mut batches) = fresh_stores();
        let chunks = analyzer.chunk(code, "lib.rs", &mut governor, &mut hashes, &mut batches).unwrap();

        // struct Foo + the whole impl block as one composite chunk: `bar`
        // is not independently chunkable once its container fits.
        assert_eq!(chunks.len(), 2);
        let impl_chunk = chunks
            .iter()
            .find(|c| c.metadata.semantic.as_ref().is_some_and(|s| s.node_kind == "impl_item"))
            .expect("impl chunk");
        assert!(impl_chunk.metadata.semantic.as_ref().unwrap().is_composite);
        assert!(impl_chunk.content.contains("fn bar"));
    }

    #[test]
    fn oversize_impl_block_recurses_into_individual_methods() {
        let mut body = String::new();
        for i in 0..200 {
            body.push_str(&format!("    fn m{i}(&self) -> i32 {{ {i} }}\n"));
        }
        let code = format!("struct Foo;\n\nimpl Foo {{\n{body}}}\n");
        let config = ChunkerConfig {
            chunk_limit_tokens: 64,
            ..Default::default()
        };
        let mut analyzer = SemanticChunker::new(config, Language::Rust).unwrap();
        let mut governor = ResourceGovernor::new(ChunkerPerformanceConfig::default());
        let (mut hashes, mut batches) = fresh_stores();
        let chunks = analyzer.chunk(&code, "lib.rs", &mut governor, &mut hashes, &mut batches).unwrap();

        assert!(!chunks
            .iter()
            .any(|c| c.metadata.semantic.as_ref().is_some_and(|s| s.node_kind == "impl_item")));
        let method = chunks
            .iter()
            .find(|c| c.metadata.semantic.as_ref().is_some_and(|s| s.node_kind == "function_item" && s.nesting_level > 0))
            .expect("method chunk emitted directly since the container was oversize");
        assert!(method.metadata.estimated_tokens <= 64);
    }

    #[test]
    fn whitespace_only_file_is_edge_case() {
        let mut analyzer = SemanticChunker::new(ChunkerConfig::default(), Language::Rust).unwrap();
        let mut governor = ResourceGovernor::new(ChunkerPerformanceConfig::default());
        let (mut hashes, mut batches) = fresh_stores();
        let chunks = analyzer.chunk("   \n\t\n", "empty.rs", &mut governor, &mut hashes, &mut batches).unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].source, ChunkSource::EdgeCase);
        assert_eq!(chunks[0].metadata.edge_case, Some(EdgeCase::WhitespaceOnly));
    }

    #[test]
    fn oversize_function_delegates_to_delimiter_chunker() {
        let mut body = String::new();
        for i in 0..400 {
            body.push_str(&format!("    let v{i} = {i};\n"));
        }
        let code = format!("fn huge() {{\n{body}}}\n");
        let config = ChunkerConfig {
            chunk_limit_tokens: 64,
            ..Default::default()
        };
        let mut analyzer = SemanticChunker::new(config, Language::Rust).unwrap();
        let mut governor = ResourceGovernor::new(ChunkerPerformanceConfig::default());
        let (mut hashes, mut batches) = fresh_stores();
        let chunks = analyzer.chunk(&code, "huge.rs", &mut governor, &mut hashes, &mut batches).unwrap();

        assert!(chunks.len() > 1, "oversize function should split via delimiter delegation");
        assert!(chunks
            .iter()
            .all(|c| c.metadata.semantic.as_ref().unwrap().parent_semantic_node.is_some()));
        assert!(chunks.iter().all(|c| c.metadata.estimated_tokens <= 64));
    }

    #[test]
    fn python_function_and_class_are_classified_with_names() {
        let code = "def calculate_score(data):\n    total = sum(data)\n    return total / len(data)\n\nclass Calculator:\n    def add(self, a, b):\n        return a + b\n";
        let mut analyzer = SemanticChunker::new(ChunkerConfig::default(), Language::Python).unwrap();
        let mut governor = ResourceGovernor::new(ChunkerPerformanceConfig::default());
        let (mut hashes, mut batches) = fresh_stores();
        let chunks = analyzer.chunk(code, "m.py", &mut governor, &mut hashes, &mut batches).unwrap();

        // spec example S1: exactly 2 chunks — the function, and the whole
        // class as one composite chunk (its `add` method fits inside it and
        // so is not independently chunked).
        assert_eq!(chunks.len(), 2);

        let function = chunks
            .iter()
            .find(|c| c.metadata.semantic.as_ref().unwrap().classification == CategoryName::Definition)
            .expect("function chunk");
        assert!(function.metadata.semantic.as_ref().unwrap().display_name.contains("calculate_score"));
        assert!(function.start_line <= function.end_line);

        let class = chunks
            .iter()
            .find(|c| c.metadata.semantic.as_ref().unwrap().classification == CategoryName::DataStructure)
            .expect("class chunk");
        assert!(class.metadata.semantic.as_ref().unwrap().display_name.contains("Calculator"));
        assert!(class.metadata.semantic.as_ref().unwrap().is_composite);
        assert!(class.start_line <= class.end_line);
    }
}
