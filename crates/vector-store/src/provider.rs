//! Provider Registry (spec.md §4.8): a catalog of embedding/sparse/rerank/
//! vector-store providers, looked up by capability kind. Providers are
//! constructed lazily from external configuration; credentials/endpoints are
//! never hard-coded here.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;
use crate::store::VectorStoreBackend;
use crate::types::{Intent, ProviderCapabilities, SparseVector};

/// A provider of dense (doc/query) embeddings. Query-mode and doc-mode may
/// route through different prompt templates or even different sub-models
/// (spec.md §4.7 step 1: "the query-mode path (may differ from doc-mode)").
#[async_trait]
pub trait DenseEmbeddingProvider: Send + Sync {
    fn provider_id(&self) -> &str;
    fn model_id(&self) -> &str;
    fn dimension(&self) -> usize;

    async fn embed_doc(&self, text: &str) -> Result<Vec<f32>>;
    async fn embed_doc_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
    async fn embed_query(&self, text: &str, intent: Option<Intent>) -> Result<Vec<f32>>;
}

/// A provider of sparse (term-weighted) embeddings, used alongside dense
/// retrieval for the hybrid fusion step (spec.md §4.7 step 3).
#[async_trait]
pub trait SparseEmbeddingProvider: Send + Sync {
    fn provider_id(&self) -> &str;
    fn model_id(&self) -> &str;

    async fn embed_doc(&self, text: &str) -> Result<SparseVector>;
    async fn embed_query(&self, text: &str) -> Result<SparseVector>;
}

/// A reranker over `(query, chunk content)` pairs (spec.md §4.7 step 4).
#[async_trait]
pub trait RerankProvider: Send + Sync {
    fn provider_id(&self) -> &str;
    fn model_id(&self) -> &str;

    /// Returns scores aligned 1:1 with `documents`, higher is more relevant.
    async fn rerank(&self, query: &str, documents: &[&str]) -> Result<Vec<f32>>;
}

/// Which active provider (if any) is configured per capability kind.
#[derive(Default)]
pub struct ProviderRegistry {
    dense: HashMap<String, Arc<dyn DenseEmbeddingProvider>>,
    sparse: HashMap<String, Arc<dyn SparseEmbeddingProvider>>,
    rerank: HashMap<String, Arc<dyn RerankProvider>>,
    vector_store: HashMap<String, Arc<dyn VectorStoreBackend>>,
    active_dense: Option<String>,
    active_sparse: Option<String>,
    active_rerank: Option<String>,
    active_vector_store: Option<String>,
}

impl ProviderRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_dense(&mut self, provider: Arc<dyn DenseEmbeddingProvider>, make_active: bool) {
        let id = provider.provider_id().to_string();
        if make_active || self.active_dense.is_none() {
            self.active_dense = Some(id.clone());
        }
        self.dense.insert(id, provider);
    }

    pub fn register_sparse(&mut self, provider: Arc<dyn SparseEmbeddingProvider>, make_active: bool) {
        let id = provider.provider_id().to_string();
        if make_active || self.active_sparse.is_none() {
            self.active_sparse = Some(id.clone());
        }
        self.sparse.insert(id, provider);
    }

    pub fn register_rerank(&mut self, provider: Arc<dyn RerankProvider>, make_active: bool) {
        let id = provider.provider_id().to_string();
        if make_active || self.active_rerank.is_none() {
            self.active_rerank = Some(id.clone());
        }
        self.rerank.insert(id, provider);
    }

    pub fn register_vector_store(&mut self, id: impl Into<String>, backend: Arc<dyn VectorStoreBackend>, make_active: bool) {
        let id = id.into();
        if make_active || self.active_vector_store.is_none() {
            self.active_vector_store = Some(id.clone());
        }
        self.vector_store.insert(id, backend);
    }

    #[must_use]
    pub fn list_dense(&self) -> Vec<&str> {
        self.dense.keys().map(String::as_str).collect()
    }

    #[must_use]
    pub fn is_available(&self, kind: crate::types::ProviderKind, provider_id: &str) -> bool {
        match kind {
            crate::types::ProviderKind::DenseEmbedding => self.dense.contains_key(provider_id),
            crate::types::ProviderKind::SparseEmbedding => self.sparse.contains_key(provider_id),
            crate::types::ProviderKind::Reranking => self.rerank.contains_key(provider_id),
            crate::types::ProviderKind::VectorStore => self.vector_store.contains_key(provider_id),
        }
    }

    #[must_use]
    pub fn active_dense(&self) -> Option<Arc<dyn DenseEmbeddingProvider>> {
        self.active_dense.as_ref().and_then(|id| self.dense.get(id)).cloned()
    }

    #[must_use]
    pub fn active_sparse(&self) -> Option<Arc<dyn SparseEmbeddingProvider>> {
        self.active_sparse.as_ref().and_then(|id| self.sparse.get(id)).cloned()
    }

    #[must_use]
    pub fn active_rerank(&self) -> Option<Arc<dyn RerankProvider>> {
        self.active_rerank.as_ref().and_then(|id| self.rerank.get(id)).cloned()
    }

    #[must_use]
    pub fn vector_store(&self, id: &str) -> Option<Arc<dyn VectorStoreBackend>> {
        self.vector_store.get(id).cloned()
    }

    #[must_use]
    pub fn capabilities(&self, provider_id: &str) -> Option<ProviderCapabilities> {
        self.dense.get(provider_id).map(|p| ProviderCapabilities {
            provider_id: p.provider_id().to_string(),
            model_id: p.model_id().to_string(),
            dimension: Some(p.dimension()),
            max_input_tokens: None,
            cost_class: crate::types::CostClass::Local,
            is_sparse: false,
            asymmetric: true,
            storage_class: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StubDense(&'static str, usize);

    #[async_trait]
    impl DenseEmbeddingProvider for StubDense {
        fn provider_id(&self) -> &str {
            self.0
        }
        fn model_id(&self) -> &str {
            "stub"
        }
        fn dimension(&self) -> usize {
            self.1
        }
        async fn embed_doc(&self, _text: &str) -> Result<Vec<f32>> {
            Ok(vec![0.0; self.1])
        }
        async fn embed_doc_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(texts.iter().map(|_| vec![0.0; self.1]).collect())
        }
        async fn embed_query(&self, _text: &str, _intent: Option<Intent>) -> Result<Vec<f32>> {
            Ok(vec![0.0; self.1])
        }
    }

    #[test]
    fn first_registered_dense_becomes_active() {
        let mut registry = ProviderRegistry::new();
        registry.register_dense(Arc::new(StubDense("local", 384)), false);
        registry.register_dense(Arc::new(StubDense("remote", 1024)), false);
        assert_eq!(registry.active_dense().unwrap().provider_id(), "local");
    }

    #[test]
    fn explicit_activation_overrides_default() {
        let mut registry = ProviderRegistry::new();
        registry.register_dense(Arc::new(StubDense("local", 384)), false);
        registry.register_dense(Arc::new(StubDense("remote", 1024)), true);
        assert_eq!(registry.active_dense().unwrap().provider_id(), "remote");
    }
}
