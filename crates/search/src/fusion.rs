use std::collections::HashMap;

use codeweaver_vector_store::{classify_document_kind, CodeChunk, DocumentKind, Intent};

/// Reciprocal Rank Fusion for combining the dense and sparse rankings
/// (spec.md §4.7 step 3).
pub struct RRFFusion {
    /// RRF constant k (typically 60).
    k: f32,
    dense_weight: f32,
    sparse_weight: f32,
}

impl RRFFusion {
    #[must_use]
    pub fn new(dense_weight: f32, sparse_weight: f32, k: f32) -> Self {
        Self {
            k,
            dense_weight,
            sparse_weight,
        }
    }

    /// Fuse dense and sparse rankings using RRF.
    ///
    /// `score(id) = Σ weight_i / (k + rank_i(id) + 1)`. Returns `(id, score)`
    /// sorted by score descending; an id present in only one ranking still
    /// contributes its single term.
    #[must_use]
    pub fn fuse(&self, dense: &[(String, f32)], sparse: &[(String, f32)]) -> Vec<(String, f32)> {
        let mut scores: HashMap<String, f32> = HashMap::new();

        for (rank, (id, _score)) in dense.iter().enumerate() {
            let rrf_score = self.dense_weight / (self.k + rank as f32 + 1.0);
            *scores.entry(id.clone()).or_insert(0.0) += rrf_score;
        }
        for (rank, (id, _score)) in sparse.iter().enumerate() {
            let rrf_score = self.sparse_weight / (self.k + rank as f32 + 1.0);
            *scores.entry(id.clone()).or_insert(0.0) += rrf_score;
        }

        let mut fused: Vec<(String, f32)> = scores.into_iter().collect();
        fused.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        fused
    }
}

impl Default for RRFFusion {
    fn default() -> Self {
        Self::new(0.7, 0.3, 60.0)
    }
}

/// Biases fused scores toward chunks whose per-intent importance is high
/// (spec.md §3 `ImportanceVector`), generalizing the teacher's chunk-type
/// priority boost to the chunker's richer per-task importance model.
pub struct ImportanceBooster;

impl ImportanceBooster {
    #[must_use]
    pub fn boost(
        chunks: &HashMap<String, CodeChunk>,
        results: Vec<(String, f32)>,
        intent: Option<Intent>,
    ) -> Vec<(String, f32)> {
        results
            .into_iter()
            .map(|(id, score)| {
                let boost = chunks
                    .get(&id)
                    .map(|chunk| Self::compute_boost(chunk, intent))
                    .unwrap_or(1.0);
                (id, score * boost)
            })
            .collect()
    }

    fn compute_boost(chunk: &CodeChunk, intent: Option<Intent>) -> f32 {
        let importance = chunk
            .metadata
            .semantic
            .as_ref()
            .map(|semantic| match intent {
                Some(Intent::Discovery) => semantic.importance.discovery,
                Some(Intent::Comprehension) => semantic.importance.comprehension,
                Some(Intent::Modification) => semantic.importance.modification,
                Some(Intent::Debugging) => semantic.importance.debugging,
                Some(Intent::Documentation) => semantic.importance.documentation,
                None => semantic.importance.max(),
            })
            .unwrap_or(0.0);
        let importance_boost = 1.0 + importance * 0.5;

        let doc_boost = if classify_document_kind(chunk) == DocumentKind::Docs {
            1.1
        } else {
            1.0
        };

        importance_boost * doc_boost
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rrf_fusion_combines_both_rankings() {
        let fusion = RRFFusion::default();

        let dense = vec![("a".to_string(), 0.9), ("b".to_string(), 0.8), ("c".to_string(), 0.7)];
        let sparse = vec![("c".to_string(), 0.95), ("a".to_string(), 0.85), ("d".to_string(), 0.75)];

        let fused = fusion.fuse(&dense, &sparse);

        assert!(!fused.is_empty());
        for (_, score) in &fused {
            assert!(*score > 0.0);
        }
        // "a" appears high in both rankings, so it should rank first.
        assert_eq!(fused[0].0, "a");
    }

    #[test]
    fn weights_favor_the_heavier_ranking() {
        let fusion = RRFFusion::new(0.9, 0.1, 60.0);

        let dense = vec![("a".to_string(), 0.9)];
        let sparse = vec![("b".to_string(), 0.9)];

        let fused = fusion.fuse(&dense, &sparse);
        assert_eq!(fused[0].0, "a");
    }
}
