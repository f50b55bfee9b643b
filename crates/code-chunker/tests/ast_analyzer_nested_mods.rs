use std::num::NonZeroUsize;

use codeweaver_batch_ref::{BatchStore, ContentHashStore};
use codeweaver_chunker::category::CategoryName;
use codeweaver_chunker::{ChunkerConfig, ChunkerSelector, CodeChunk};

fn chunk(code: &str, file_path: &str) -> Vec<CodeChunk> {
    let selector = ChunkerSelector::new(ChunkerConfig::default());
    let mut hashes = ContentHashStore::new(NonZeroUsize::new(64).unwrap());
    let mut batches = BatchStore::new(NonZeroUsize::new(64).unwrap());
    selector
        .chunk_str(code, file_path, &mut batches, &mut hashes)
        .expect("chunking failed")
}

fn method_names(chunks: &[CodeChunk]) -> Vec<String> {
    chunks
        .iter()
        .filter(|c| {
            c.metadata
                .semantic
                .as_ref()
                .is_some_and(|s| s.classification == CategoryName::Definition && s.nesting_level > 0)
        })
        .map(|c| c.content.lines().next().unwrap_or_default().trim().to_string())
        .collect()
}

#[test]
fn extracts_methods_inside_module_impl() {
    let code = r"
mod api {
    pub struct Car;

    impl Car {
        pub fn drive(&self) {}
        fn stop(&self) {}
    }
}
";

    let chunks = chunk(code, "nested.rs");
    let methods = method_names(&chunks);

    assert!(
        methods.iter().any(|m| m.contains("drive")) && methods.iter().any(|m| m.contains("stop")),
        "expected method chunks inside module impl, got: {methods:?}"
    );
}

#[test]
fn real_embeddings_rs_has_method_chunks() {
    let code = include_str!("../../vector-store/src/embeddings.rs");

    let chunks = chunk(code, "embeddings.rs");
    let has_cosine = chunks.iter().any(|c| {
        c.metadata
            .semantic
            .as_ref()
            .is_some_and(|s| s.nesting_level > 0)
            && c.content.contains("cosine_similarity")
    });
    assert!(
        has_cosine,
        "cosine_similarity should be extracted as a method chunk from impl"
    );
}
