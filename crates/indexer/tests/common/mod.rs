use codeweaver_indexer::{IndexerConfig, ProjectIndexer};
use codeweaver_vector_store::{
    store_dir_for_project_root, DenseEmbeddingProvider, FailoverManager, Intent, LocalJsonStore,
    Result as VectorStoreResult, StorageClass, VectorStoreBackend,
};
use std::path::Path;
use std::sync::Arc;

pub const STUB_DIMENSION: usize = 3;

pub struct StubDenseProvider;

#[async_trait::async_trait]
impl DenseEmbeddingProvider for StubDenseProvider {
    fn provider_id(&self) -> &str {
        "stub"
    }

    fn model_id(&self) -> &str {
        "stub-v1"
    }

    fn dimension(&self) -> usize {
        STUB_DIMENSION
    }

    async fn embed_doc(&self, _text: &str) -> VectorStoreResult<Vec<f32>> {
        Ok(vec![1.0, 0.0, 0.0])
    }

    async fn embed_doc_batch(&self, texts: &[String]) -> VectorStoreResult<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|_| vec![1.0, 0.0, 0.0]).collect())
    }

    async fn embed_query(&self, _text: &str, _intent: Option<Intent>) -> VectorStoreResult<Vec<f32>> {
        Ok(vec![1.0, 0.0, 0.0])
    }
}

pub async fn new_test_indexer(root: &Path) -> Arc<ProjectIndexer> {
    let store_dir = store_dir_for_project_root(root);
    tokio::fs::create_dir_all(&store_dir).await.expect("create store dir");

    let primary: Arc<dyn VectorStoreBackend> = Arc::new(
        LocalJsonStore::open(store_dir.join("primary.json"), STUB_DIMENSION, StorageClass::Persistent)
            .await
            .expect("open primary store"),
    );
    let backup: Arc<dyn VectorStoreBackend> = Arc::new(
        LocalJsonStore::open(store_dir.join("backup.json"), STUB_DIMENSION, StorageClass::Ephemeral)
            .await
            .expect("open backup store"),
    );
    let failover = Arc::new(FailoverManager::new(primary, backup, true));

    Arc::new(
        ProjectIndexer::new(root, Arc::new(StubDenseProvider), None, failover, IndexerConfig::default())
            .await
            .expect("build indexer"),
    )
}
