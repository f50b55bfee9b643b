//! Lexical-overlap reranker (spec.md §4.7 step 4, §4.8).
//!
//! No corpus example ships a cross-encoder reranking model, so this is a
//! deterministic stand-in: score each `(query, document)` pair by
//! normalized term overlap (a Jaccard-style ratio over unicode-word sets),
//! which is enough to reorder an already-retrieved top-M without needing a
//! model download.

use std::collections::HashSet;

use async_trait::async_trait;
use unicode_segmentation::UnicodeSegmentation;

use crate::error::Result;
use crate::provider::RerankProvider;

pub struct LexicalOverlapReranker {
    provider_id: String,
    model_id: String,
}

impl LexicalOverlapReranker {
    #[must_use]
    pub fn new() -> Self {
        Self {
            provider_id: "lexical-overlap".to_string(),
            model_id: "lexical-overlap-v1".to_string(),
        }
    }

    fn terms(text: &str) -> HashSet<String> {
        text.unicode_words().map(str::to_lowercase).collect()
    }

    fn score(query_terms: &HashSet<String>, document: &str) -> f32 {
        if query_terms.is_empty() {
            return 0.0;
        }
        let doc_terms = Self::terms(document);
        if doc_terms.is_empty() {
            return 0.0;
        }
        let intersection = query_terms.intersection(&doc_terms).count();
        let union = query_terms.union(&doc_terms).count();
        if union == 0 {
            0.0
        } else {
            intersection as f32 / union as f32
        }
    }
}

impl Default for LexicalOverlapReranker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RerankProvider for LexicalOverlapReranker {
    fn provider_id(&self) -> &str {
        &self.provider_id
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }

    async fn rerank(&self, query: &str, documents: &[&str]) -> Result<Vec<f32>> {
        let query_terms = Self::terms(query);
        Ok(documents.iter().map(|doc| Self::score(&query_terms, doc)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn closer_lexical_match_scores_higher() {
        let reranker = LexicalOverlapReranker::new();
        let scores = reranker
            .rerank(
                "retry network connection with backoff",
                &[
                    "struct Color { red: u8, green: u8, blue: u8 }",
                    "fn retry network connection with exponential backoff",
                ],
            )
            .await
            .unwrap();
        assert!(scores[1] > scores[0]);
    }

    #[tokio::test]
    async fn empty_query_scores_everything_zero() {
        let reranker = LexicalOverlapReranker::new();
        let scores = reranker.rerank("", &["fn foo() {}", "fn bar() {}"]).await.unwrap();
        assert_eq!(scores, vec![0.0, 0.0]);
    }
}
