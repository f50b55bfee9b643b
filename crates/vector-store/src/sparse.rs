//! Hashing-based sparse embedding provider (spec.md §4.7 step 2, §4.8).
//!
//! No corpus example ships a trainable sparse-retrieval model (SPLADE,
//! BM25-over-an-inverted-index service, ...), so this is a deterministic,
//! dependency-light stand-in: terms are unicode words, hashed into a fixed
//! vocabulary with `blake3`, weighted by log-scaled term frequency. It is
//! symmetric (query and document embeddings use the same function) since
//! there is no asymmetric sparse model to account for.

use std::collections::BTreeMap;

use async_trait::async_trait;
use unicode_segmentation::UnicodeSegmentation;

use crate::error::Result;
use crate::provider::SparseEmbeddingProvider;
use crate::types::SparseVector;

/// Keep the vocabulary small enough that two unrelated terms collide
/// rarely in practice but the sparse vector stays compact.
const VOCAB_SIZE: u32 = 1 << 18;

pub struct HashingSparseEmbedder {
    provider_id: String,
    model_id: String,
}

impl HashingSparseEmbedder {
    #[must_use]
    pub fn new() -> Self {
        Self {
            provider_id: "hashing-sparse".to_string(),
            model_id: "hashing-sparse-v1".to_string(),
        }
    }

    fn term_id(token: &str) -> u32 {
        let hash = blake3::hash(token.as_bytes());
        let bytes = hash.as_bytes();
        let raw = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        raw % VOCAB_SIZE
    }

    fn vectorize(text: &str) -> SparseVector {
        let mut counts: BTreeMap<u32, u32> = BTreeMap::new();
        for word in text.unicode_words() {
            let normalized = word.to_lowercase();
            if normalized.is_empty() {
                continue;
            }
            *counts.entry(Self::term_id(&normalized)).or_insert(0) += 1;
        }
        counts
            .into_iter()
            .map(|(term_id, count)| (term_id, 1.0 + (count as f32).ln()))
            .collect()
    }
}

impl Default for HashingSparseEmbedder {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SparseEmbeddingProvider for HashingSparseEmbedder {
    fn provider_id(&self) -> &str {
        &self.provider_id
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }

    async fn embed_doc(&self, text: &str) -> Result<SparseVector> {
        Ok(Self::vectorize(text))
    }

    async fn embed_query(&self, text: &str) -> Result<SparseVector> {
        Ok(Self::vectorize(text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hnsw_index::sparse_dot;

    #[tokio::test]
    async fn identical_text_yields_identical_vector() {
        let embedder = HashingSparseEmbedder::new();
        let a = embedder.embed_doc("fn calculate_total(items: &[Item])").await.unwrap();
        let b = embedder.embed_doc("fn calculate_total(items: &[Item])").await.unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn vector_is_sorted_by_term_id() {
        let embedder = HashingSparseEmbedder::new();
        let vector = embedder.embed_doc("alpha beta gamma delta epsilon").await.unwrap();
        let mut sorted = vector.clone();
        sorted.sort_by_key(|(id, _)| *id);
        assert_eq!(vector, sorted);
    }

    #[tokio::test]
    async fn overlapping_vocabulary_scores_higher_than_disjoint() {
        let embedder = HashingSparseEmbedder::new();
        let query = embedder.embed_query("retry network connection timeout").await.unwrap();
        let relevant = embedder
            .embed_doc("fn retry network connection with backoff, handle timeout errors")
            .await
            .unwrap();
        let unrelated = embedder.embed_doc("struct Color { red: u8, green: u8, blue: u8 }").await.unwrap();

        assert!(sparse_dot(&query, &relevant) > sparse_dot(&query, &unrelated));
    }
}
