use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use codeweaver_protocol::{
    FailoverInfo, FindCodeMetadata, FindCodeRequest, FindCodeResponse, FindCodeResult,
    Intent as ProtocolIntent, ResultMetadata,
};
use codeweaver_vector_store::{
    classify_document_kind, CodeChunk, DenseEmbeddingProvider, DocumentKind, FailoverManager,
    Intent as StoreIntent, RerankProvider, ScoredRecord, SparseEmbeddingProvider,
};

use crate::fusion::{ImportanceBooster, RRFFusion};

/// Candidates retrieved per ranking before fusion (spec.md §4.7 step 3).
const CANDIDATE_POOL: usize = 50;
/// Top results handed to the reranker, if configured (spec.md §4.7 step 4).
const RERANK_TOP_M: usize = 20;

/// The `find_code` orchestrator: the only operation exposed to external
/// agents (spec.md §4.7).
pub struct HybridSearch {
    dense: Arc<dyn DenseEmbeddingProvider>,
    sparse: Option<Arc<dyn SparseEmbeddingProvider>>,
    rerank: Option<Arc<dyn RerankProvider>>,
    failover: Arc<FailoverManager>,
    fusion: RRFFusion,
}

impl HybridSearch {
    #[must_use]
    pub fn new(
        dense: Arc<dyn DenseEmbeddingProvider>,
        sparse: Option<Arc<dyn SparseEmbeddingProvider>>,
        rerank: Option<Arc<dyn RerankProvider>>,
        failover: Arc<FailoverManager>,
    ) -> Self {
        Self {
            dense,
            sparse,
            rerank,
            failover,
            fusion: RRFFusion::default(),
        }
    }

    /// Runs the full `find_code` pipeline. Infallible: any internal failure
    /// (embedding provider error, vector store unreachable with failover
    /// disabled) degrades to a structured empty response rather than
    /// propagating (spec.md §4.7 "Error conditions").
    pub async fn find_code(&self, request: &FindCodeRequest) -> FindCodeResponse {
        let start = Instant::now();
        let failover_enabled = self.failover.enabled();

        if request.query.trim().is_empty() {
            log::warn!("find_code called with an empty query");
            return FindCodeResponse::unavailable(
                request.intent,
                FailoverInfo {
                    enabled: failover_enabled,
                    active: !self.failover.is_active_primary().await,
                },
            );
        }

        let (store, is_primary) = self.failover.active().await;
        let failover_info = FailoverInfo {
            enabled: failover_enabled,
            active: !is_primary,
        };

        let store_intent = request.intent.map(map_intent);
        let dense_vector = match self.dense.embed_query(&request.query, store_intent).await {
            Ok(vector) => vector,
            Err(err) => {
                log::error!("find_code: dense embedding failed: {err}");
                return FindCodeResponse::unavailable(request.intent, failover_info);
            }
        };

        let dense_hits = match store.search_dense(&dense_vector, CANDIDATE_POOL).await {
            Ok(hits) => hits,
            Err(err) => {
                log::error!("find_code: dense retrieval failed: {err}");
                if is_primary {
                    self.failover.report_primary_outcome(false).await;
                }
                return FindCodeResponse::unavailable(request.intent, failover_info);
            }
        };

        let sparse_hits = if let Some(sparse) = &self.sparse {
            match sparse.embed_query(&request.query).await {
                Ok(sparse_vector) => match store.search_sparse(&sparse_vector, CANDIDATE_POOL).await {
                    Ok(hits) => hits,
                    Err(err) => {
                        log::warn!("find_code: sparse retrieval failed, continuing dense-only: {err}");
                        Vec::new()
                    }
                },
                Err(err) => {
                    log::warn!("find_code: sparse embedding failed, continuing dense-only: {err}");
                    Vec::new()
                }
            }
        } else {
            Vec::new()
        };

        if is_primary {
            self.failover.report_primary_outcome(true).await;
        }

        let mut chunks_by_id: HashMap<String, CodeChunk> = HashMap::new();
        let dense_ranking = to_ranking(&dense_hits, &mut chunks_by_id);
        let sparse_ranking = to_ranking(&sparse_hits, &mut chunks_by_id);

        let mut filters = Vec::new();
        if let Some(languages) = &request.focus_languages {
            if !languages.is_empty() {
                filters.push(format!("languages:{}", sort_joined(languages)));
            }
        }

        let fused = self.fusion.fuse(&dense_ranking, &sparse_ranking);
        let fused: Vec<(String, f32)> = fused
            .into_iter()
            .filter(|(id, _)| language_allowed(chunks_by_id.get(id), &request.focus_languages))
            .collect();
        let boosted = ImportanceBooster::boost(&chunks_by_id, fused, request.intent);
        let mut ranked = boosted;
        ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

        let ranked = self.apply_rerank(&request.query, ranked, &chunks_by_id).await;

        let total = ranked.len();
        let results = assemble_within_budget(ranked, &chunks_by_id, request.token_limit);

        FindCodeResponse {
            results,
            total,
            took_ms: u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX),
            metadata: FindCodeMetadata {
                intent: request.intent,
                filters,
                failover: failover_info,
            },
        }
    }

    async fn apply_rerank(
        &self,
        query: &str,
        ranked: Vec<(String, f32)>,
        chunks_by_id: &HashMap<String, CodeChunk>,
    ) -> Vec<(String, f32)> {
        let Some(reranker) = &self.rerank else {
            return ranked;
        };
        if ranked.is_empty() {
            return ranked;
        }

        let split = ranked.len().min(RERANK_TOP_M);
        let (head, tail) = ranked.split_at(split);
        let tail = tail.to_vec();

        let ids: Vec<&str> = head.iter().map(|(id, _)| id.as_str()).collect();
        let documents: Vec<&str> = ids
            .iter()
            .filter_map(|id| chunks_by_id.get(*id).map(|chunk| chunk.content.as_str()))
            .collect();

        if documents.len() != head.len() {
            return ranked;
        }

        match reranker.rerank(query, &documents).await {
            Ok(scores) if scores.len() == head.len() => {
                let mut reranked: Vec<(String, f32)> = head
                    .iter()
                    .zip(scores)
                    .map(|((id, _), score)| (id.clone(), score))
                    .collect();
                reranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
                reranked.extend(tail);
                reranked
            }
            Ok(_) => {
                log::warn!("find_code: reranker returned a mismatched score count, skipping rerank");
                let mut ranked = head.to_vec();
                ranked.extend(tail);
                ranked
            }
            Err(err) => {
                log::warn!("find_code: reranker failed, keeping fused order: {err}");
                let mut ranked = head.to_vec();
                ranked.extend(tail);
                ranked
            }
        }
    }
}

fn to_ranking(hits: &[ScoredRecord], chunks_by_id: &mut HashMap<String, CodeChunk>) -> Vec<(String, f32)> {
    let mut ranking = Vec::with_capacity(hits.len());
    for hit in hits {
        chunks_by_id.entry(hit.id.clone()).or_insert_with(|| hit.chunk.clone());
        ranking.push((hit.id.clone(), hit.score));
    }
    ranking
}

fn language_allowed(chunk: Option<&CodeChunk>, focus_languages: &Option<std::collections::HashSet<String>>) -> bool {
    let Some(languages) = focus_languages else {
        return true;
    };
    if languages.is_empty() {
        return true;
    }
    chunk.is_some_and(|chunk| languages.contains(&chunk.language))
}

fn sort_joined(languages: &std::collections::HashSet<String>) -> String {
    let mut sorted: Vec<&str> = languages.iter().map(String::as_str).collect();
    sorted.sort_unstable();
    sorted.join(",")
}

/// Token-budgeted assembly (spec.md §4.7 step 5): add snippets in rank order
/// while tracking a running token estimate, stopping at `token_limit`.
fn assemble_within_budget(
    ranked: Vec<(String, f32)>,
    chunks_by_id: &HashMap<String, CodeChunk>,
    token_limit: usize,
) -> Vec<FindCodeResult> {
    let mut results = Vec::new();
    let mut spent = 0usize;

    for (id, score) in ranked {
        let Some(chunk) = chunks_by_id.get(&id) else {
            continue;
        };
        let tokens = chunk.estimated_tokens();
        if spent + tokens > token_limit && !results.is_empty() {
            break;
        }
        spent += tokens;

        let classification = chunk
            .metadata
            .semantic
            .as_ref()
            .map(|semantic| format!("{:?}", semantic.classification).to_lowercase())
            .or_else(|| {
                (classify_document_kind(chunk) != DocumentKind::Code)
                    .then(|| format!("{:?}", classify_document_kind(chunk)).to_lowercase())
            });
        let name = chunk
            .metadata
            .semantic
            .as_ref()
            .map(|semantic| semantic.display_name.clone());

        results.push(FindCodeResult {
            file: chunk.file_path.clone(),
            line_start: chunk.start_line,
            line_end: chunk.end_line,
            language: chunk.language.clone(),
            snippet: chunk.content.clone(),
            metadata: ResultMetadata {
                classification,
                name,
                intent_score: Some(score),
            },
        });

        if spent >= token_limit {
            break;
        }
    }

    results
}

fn map_intent(intent: ProtocolIntent) -> StoreIntent {
    match intent {
        ProtocolIntent::Discovery => StoreIntent::Discovery,
        ProtocolIntent::Comprehension => StoreIntent::Comprehension,
        ProtocolIntent::Modification => StoreIntent::Modification,
        ProtocolIntent::Debugging => StoreIntent::Debugging,
        ProtocolIntent::Documentation => StoreIntent::Documentation,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use codeweaver_vector_store::{LocalJsonStore, StorageClass, VectorRecord, VectorStoreBackend};
    use codeweaver_chunker::{ChunkMetadata, ChunkSource};
    use codeweaver_batch_ref::ChunkId;

    struct StubDense;

    #[async_trait::async_trait]
    impl DenseEmbeddingProvider for StubDense {
        fn provider_id(&self) -> &str {
            "stub"
        }
        fn model_id(&self) -> &str {
            "stub-v1"
        }
        fn dimension(&self) -> usize {
            3
        }
        async fn embed_doc(&self, _text: &str) -> codeweaver_vector_store::Result<Vec<f32>> {
            Ok(vec![1.0, 0.0, 0.0])
        }
        async fn embed_doc_batch(&self, texts: &[String]) -> codeweaver_vector_store::Result<Vec<Vec<f32>>> {
            Ok(texts.iter().map(|_| vec![1.0, 0.0, 0.0]).collect())
        }
        async fn embed_query(&self, _text: &str, _intent: Option<StoreIntent>) -> codeweaver_vector_store::Result<Vec<f32>> {
            Ok(vec![1.0, 0.0, 0.0])
        }
    }

    fn make_chunk(file_path: &str, language: &str, content: &str) -> CodeChunk {
        CodeChunk {
            id: ChunkId::new(),
            content: content.to_string(),
            file_path: file_path.to_string(),
            language: language.to_string(),
            start_line: 1,
            end_line: 3,
            source: ChunkSource::Delimiter,
            metadata: ChunkMetadata {
                estimated_tokens: ChunkMetadata::estimate_tokens_from_content(content),
                ..ChunkMetadata::default()
            },
        }
    }

    async fn new_orchestrator(tmp_dir: &std::path::Path) -> (HybridSearch, Arc<dyn VectorStoreBackend>) {
        let store: Arc<dyn VectorStoreBackend> = Arc::new(
            LocalJsonStore::open(tmp_dir.join("primary.json"), 3, StorageClass::Persistent)
                .await
                .unwrap(),
        );
        let backup: Arc<dyn VectorStoreBackend> = Arc::new(
            LocalJsonStore::open(tmp_dir.join("backup.json"), 3, StorageClass::Ephemeral)
                .await
                .unwrap(),
        );
        let failover = Arc::new(FailoverManager::new(store.clone(), backup, false));
        let orchestrator = HybridSearch::new(Arc::new(StubDense), None, None, failover);
        (orchestrator, store)
    }

    #[tokio::test]
    async fn empty_query_returns_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let (orchestrator, _store) = new_orchestrator(dir.path()).await;

        let response = orchestrator.find_code(&FindCodeRequest::new("  ")).await;
        assert!(response.results.is_empty());
        assert_eq!(response.total, 0);
    }

    #[tokio::test]
    async fn finds_matching_chunk_and_respects_language_filter() {
        let dir = tempfile::tempdir().unwrap();
        let (orchestrator, store) = new_orchestrator(dir.path()).await;

        let chunk = make_chunk("src/lib.rs", "rust", "pub fn hello() {}\n");
        store
            .upsert(vec![VectorRecord {
                id: chunk.id.to_string(),
                chunk: chunk.clone(),
                dense: vec![1.0, 0.0, 0.0],
                sparse: None,
            }])
            .await
            .unwrap();

        let mut request = FindCodeRequest::new("hello");
        let response = orchestrator.find_code(&request).await;
        assert_eq!(response.results.len(), 1);
        assert_eq!(response.results[0].file, "src/lib.rs");

        request.focus_languages = Some(["python".to_string()].into_iter().collect());
        let filtered = orchestrator.find_code(&request).await;
        assert!(filtered.results.is_empty());
    }
}
