//! Shared batch/content-hash registration, run once per file regardless of
//! which stage of the cascade (semantic, delimiter, fallback, edge case)
//! produced the chunks.

use std::collections::HashSet;

use codeweaver_batch_ref::{Batch, BatchStore, ChunkId, ContentHash, ContentHashStore};

use crate::types::CodeChunk;

pub fn register_batch(
    file_path: &str,
    chunks: Vec<CodeChunk>,
    batches: &mut BatchStore,
    content_hashes: &mut ContentHashStore,
) -> Vec<CodeChunk> {
    let mut deduped = Vec::with_capacity(chunks.len());
    let mut seen_this_call: HashSet<ContentHash> = HashSet::new();
    for mut chunk in chunks {
        let normalized = normalize_for_hash(&chunk.content);
        let hash = ContentHash::of(normalized.as_bytes());
        if content_hashes.lookup(&hash).is_some() || !seen_this_call.insert(hash) {
            continue;
        }
        chunk.metadata.content_hash = Some(hash);
        deduped.push((chunk, hash));
    }

    let chunk_ids: Vec<ChunkId> = deduped.iter().map(|(c, _)| c.id).collect();
    let batch = Batch::new(file_path.to_string(), chunk_ids);

    for (_, hash) in &deduped {
        content_hashes.insert(*hash, batch.id);
    }

    let mut chunks: Vec<CodeChunk> = deduped.into_iter().map(|(mut c, _)| {
        c.metadata.batch_id = Some(batch.id);
        c
    }).collect();
    chunks.shrink_to_fit();

    batches.insert(batch);
    chunks
}

fn normalize_for_hash(content: &str) -> String {
    content.lines().map(str::trim_end).collect::<Vec<_>>().join("\n")
}

#[cfg(test)]
mod tests {
    use std::num::NonZeroUsize;

    use crate::types::{ChunkMetadata, ChunkSource};

    use super::*;

    fn chunk(content: &str) -> CodeChunk {
        CodeChunk {
            id: ChunkId::new(),
            content: content.to_string(),
            file_path: "test.rs".to_string(),
            language: "rust".to_string(),
            start_line: 1,
            end_line: 1,
            source: ChunkSource::Delimiter,
            metadata: ChunkMetadata::default(),
        }
    }

    #[test]
    fn drops_chunks_with_previously_seen_content() {
        let mut batches = BatchStore::new(NonZeroUsize::new(16).unwrap());
        let mut content_hashes = ContentHashStore::new(NonZeroUsize::new(16).unwrap());

        let first = register_batch(
            "a.rs",
            vec![chunk("fn main() {}")],
            &mut batches,
            &mut content_hashes,
        );
        assert_eq!(first.len(), 1);

        let second = register_batch(
            "b.rs",
            vec![chunk("fn main() {}")],
            &mut batches,
            &mut content_hashes,
        );
        assert!(second.is_empty(), "duplicate content must be dropped");
    }

    #[test]
    fn drops_duplicates_within_the_same_call() {
        let mut batches = BatchStore::new(NonZeroUsize::new(16).unwrap());
        let mut content_hashes = ContentHashStore::new(NonZeroUsize::new(16).unwrap());

        let chunks = register_batch(
            "a.rs",
            vec![chunk("fn main() {}"), chunk("fn main() {}"), chunk("fn other() {}")],
            &mut batches,
            &mut content_hashes,
        );

        assert_eq!(chunks.len(), 2);
    }

    #[test]
    fn distinct_content_is_kept() {
        let mut batches = BatchStore::new(NonZeroUsize::new(16).unwrap());
        let mut content_hashes = ContentHashStore::new(NonZeroUsize::new(16).unwrap());

        let chunks = register_batch(
            "a.rs",
            vec![chunk("fn one() {}"), chunk("fn two() {}")],
            &mut batches,
            &mut content_hashes,
        );

        assert_eq!(chunks.len(), 2);
    }
}
