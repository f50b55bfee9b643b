//! Project indexer: wires the chunker cascade, embedding providers, and the
//! vector-store failover manager together (spec.md §4.5).
//!
//! Responsibilities (discovery, parallel chunking, embedding, upsert, boot
//! priming, watcher-driven diffing) all flow through [`ProjectIndexer`]; the
//! filesystem watcher (`watcher.rs`) only decides *when* and *which paths*
//! to pass to [`ProjectIndexer::index_changed_paths`].

use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use codeweaver_batch_ref::{BatchStore, ContentHashStore};
use codeweaver_chunker::{ChunkerConfig, ChunkerSelector, CodeChunk};
use codeweaver_vector_store::{
    current_embedding_mode_id, store_dir_for_project_root, CollectionMetadata,
    DenseEmbeddingProvider, EmbeddingCache, EmbeddingTemplates, FailoverManager,
    SparseEmbeddingProvider, VectorRecord, VectorStoreBackend,
};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::error::{IndexerError, Result};
use crate::index_lock::acquire_index_write_lock;
use crate::limits::acquire_indexing_permit;
use crate::scanner::{FileScanner, ScanOptions};
use crate::stats::IndexStats;

const BATCH_STORE_CAPACITY: usize = 256;
const CONTENT_HASH_STORE_CAPACITY: usize = 4096;
const DEFAULT_EMBED_BATCH_SIZE: usize = 32;
const DEFAULT_BOOT_BUDGET: Duration = Duration::from_secs(30);

/// Tunables for one [`ProjectIndexer`] (spec.md §6 `indexer`/`chunker` groups).
#[derive(Clone)]
pub struct IndexerConfig {
    pub scan: ScanOptions,
    pub chunker: ChunkerConfig,
    /// Max chunks per `embed_doc_batch` call (provider token/count limits,
    /// spec.md §4.5 step 3).
    pub embed_batch_size: usize,
    /// Wall-clock budget for `index()`'s boot-time priming pass before
    /// remaining files are deferred to the watcher (spec.md §4.5 step 5).
    pub boot_budget: Duration,
    embedding_mode: String,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            scan: ScanOptions::default(),
            chunker: ChunkerConfig::default(),
            embed_batch_size: DEFAULT_EMBED_BATCH_SIZE,
            boot_budget: DEFAULT_BOOT_BUDGET,
            embedding_mode: current_embedding_mode_id().unwrap_or("stub").to_string(),
        }
    }
}

/// Outcome of chunking+embedding one file, reported back to the caller for
/// `IndexStats` aggregation.
struct FileOutcome {
    language: String,
    lines: usize,
    chunk_count: usize,
}

/// Scans, chunks, embeds, and upserts one project's source tree into the
/// active vector store (spec.md §4.5). Embedding always goes through a
/// single configured dense/sparse provider pair: the `FailoverManager` only
/// switches *where* vectors land, not which provider produced them — a
/// restore's re-embed (`FailoverManager::try_restore`) is handed the
/// primary's own provider by the caller separately.
pub struct ProjectIndexer {
    root: PathBuf,
    store_path: PathBuf,
    config: IndexerConfig,
    dense: Arc<dyn DenseEmbeddingProvider>,
    sparse: Option<Arc<dyn SparseEmbeddingProvider>>,
    failover: Arc<FailoverManager>,
    templates: EmbeddingTemplates,
    cache: EmbeddingCache,
    collection_metadata: CollectionMetadata,
}

impl ProjectIndexer {
    pub async fn new(
        root: impl AsRef<Path>,
        dense: Arc<dyn DenseEmbeddingProvider>,
        sparse: Option<Arc<dyn SparseEmbeddingProvider>>,
        failover: Arc<FailoverManager>,
        config: IndexerConfig,
    ) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        if !root.exists() {
            return Err(IndexerError::InvalidPath(format!(
                "path does not exist: {}",
                root.display()
            )));
        }

        let store_dir = store_dir_for_project_root(&root);
        tokio::fs::create_dir_all(&store_dir).await?;
        let store_path = store_dir.join("index.json");

        let templates = EmbeddingTemplates::default();
        let cache = EmbeddingCache::for_store_path(&store_path);
        let collection_metadata = CollectionMetadata {
            provider_id: dense.provider_id().to_string(),
            embedding_model_id: dense.model_id().to_string(),
            embedding_dimension: dense.dimension(),
            sparse_model_id: sparse.as_ref().map(|s| s.model_id().to_string()),
            created_at_unix_ms: current_unix_ms(),
        };

        let (active, _) = failover.active().await;
        active.open_or_create(&collection_metadata).await?;

        Ok(Self {
            root,
            store_path,
            config,
            dense,
            sparse,
            failover,
            templates,
            cache,
            collection_metadata,
        })
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn store_path(&self) -> &Path {
        &self.store_path
    }

    /// Primes the index on startup: scans the whole project and upserts
    /// every discovered file, bounded by `config.boot_budget` (spec.md §4.5
    /// step 5). Files left over when the budget expires are deferred — the
    /// watcher will pick them up from its own fs events, or a later manual
    /// `index_full` run.
    pub async fn index(&self) -> Result<IndexStats> {
        let scanner = FileScanner::with_options(&self.root, self.config.scan.clone());
        let files = scanner.scan();
        self.index_paths(&files, Some(self.config.boot_budget)).await
    }

    /// Full re-index with no boot-time budget; every discovered file is
    /// re-chunked and upserted.
    pub async fn index_full(&self) -> Result<IndexStats> {
        let scanner = FileScanner::with_options(&self.root, self.config.scan.clone());
        let files = scanner.scan();
        self.index_paths(&files, None).await
    }

    /// Re-chunks and upserts exactly `paths`; a path that no longer exists on
    /// disk is treated as a deletion (spec.md §4.5 step 6).
    pub async fn index_changed_paths(&self, paths: &[PathBuf]) -> Result<IndexStats> {
        self.index_paths(paths, None).await
    }

    async fn index_paths(&self, paths: &[PathBuf], budget: Option<Duration>) -> Result<IndexStats> {
        let _permit = acquire_indexing_permit().await;
        let _lock = acquire_index_write_lock(&self.root).await?;
        let start = Instant::now();

        let (active, is_primary) = self.failover.active().await;
        active.open_or_create(&self.collection_metadata).await?;

        let max_parallel = self.config.chunker.concurrency.max_parallel_files.max(1);
        let semaphore = Arc::new(Semaphore::new(max_parallel));
        let mut join_set: JoinSet<(String, Result<Option<FileOutcome>>)> = JoinSet::new();
        let mut deferred = 0usize;

        for file_path in paths {
            if let Some(budget) = budget {
                if start.elapsed() >= budget {
                    deferred += 1;
                    continue;
                }
            }

            let file_path = file_path.clone();
            let relative = relative_path(&self.root, &file_path);
            let semaphore = semaphore.clone();
            let active = active.clone();
            let chunker_config = self.config.chunker.clone();
            let dense = self.dense.clone();
            let sparse = self.sparse.clone();
            let templates = self.templates.clone();
            let cache = self.cache.clone();
            let embedding_mode = self.config.embedding_mode.clone();
            let embed_batch_size = self.config.embed_batch_size;

            join_set.spawn(async move {
                let _permit = semaphore.acquire_owned().await.ok();
                let outcome = index_one_file(
                    active,
                    &file_path,
                    &relative,
                    chunker_config,
                    dense,
                    sparse,
                    templates,
                    cache,
                    embedding_mode,
                    embed_batch_size,
                )
                .await;
                (relative, outcome)
            });
        }

        if deferred > 0 {
            log::warn!("boot-time indexing budget exceeded; deferred {deferred} files to the watcher");
        }

        let mut stats = IndexStats::new();
        let mut had_error = false;
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((_, Ok(Some(outcome)))) => {
                    stats.add_file(&outcome.language, outcome.lines);
                    stats.add_chunks(outcome.chunk_count);
                }
                Ok((_, Ok(None))) => {}
                Ok((relative, Err(err))) => {
                    had_error = true;
                    log::warn!("failed to index {relative}: {err}");
                    stats.add_error(format!("{relative}: {err}"));
                }
                Err(join_err) => {
                    had_error = true;
                    stats.add_error(format!("task panicked: {join_err}"));
                }
            }
        }

        if let Err(err) = active.save().await {
            had_error = true;
            stats.add_error(format!("save failed: {err}"));
        }

        if is_primary {
            self.failover.report_primary_outcome(!had_error).await;
        }

        stats.time_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);
        Ok(stats)
    }
}

/// Chunks, embeds, and upserts one file end to end. Runs as its own
/// concurrent task; per spec.md §4.1 a fresh [`BatchStore`]/[`ContentHashStore`]
/// is created per file, so there is no shared mutable state across files.
/// Per-file mutations (delete-then-upsert) stay serialized within this one
/// task, matching spec.md §4.5's "chunk upserts for a given file must be
/// applied in source order" — across files, ordering is unconstrained.
#[allow(clippy::too_many_arguments)]
async fn index_one_file(
    active: Arc<dyn VectorStoreBackend>,
    file_path: &Path,
    relative: &str,
    chunker_config: ChunkerConfig,
    dense: Arc<dyn DenseEmbeddingProvider>,
    sparse: Option<Arc<dyn SparseEmbeddingProvider>>,
    templates: EmbeddingTemplates,
    cache: EmbeddingCache,
    embedding_mode: String,
    embed_batch_size: usize,
) -> Result<Option<FileOutcome>> {
    if tokio::fs::metadata(file_path).await.is_err() {
        active.delete_by_path(relative).await?;
        return Ok(None);
    }

    let raw = tokio::fs::read(file_path).await?;
    let lines = count_lines(&raw);

    let mut batches = BatchStore::new(NonZeroUsize::new(BATCH_STORE_CAPACITY).expect("nonzero"));
    let mut content_hashes = ContentHashStore::new(NonZeroUsize::new(CONTENT_HASH_STORE_CAPACITY).expect("nonzero"));
    let selector = ChunkerSelector::new(chunker_config);
    let chunks = selector.chunk_bytes(&raw, relative, &mut batches, &mut content_hashes)?;

    // Re-chunking a known file always supersedes its prior chunks wholesale;
    // move detection without re-embedding is handled by the watcher issuing
    // `rename_path` directly instead of routing through this function.
    active.delete_by_path(relative).await?;

    if chunks.is_empty() {
        return Ok(Some(FileOutcome {
            language: "unknown".to_string(),
            lines,
            chunk_count: 0,
        }));
    }

    let language = chunks[0].language.clone();
    let records = embed_chunks(
        chunks,
        dense.as_ref(),
        sparse.as_deref(),
        &templates,
        &cache,
        &embedding_mode,
        embed_batch_size,
    )
    .await?;
    let chunk_count = records.len();
    active.upsert(records).await?;

    Ok(Some(FileOutcome {
        language,
        lines,
        chunk_count,
    }))
}

/// Pre-renders each chunk via [`EmbeddingTemplates::render_doc_chunk`] (the
/// dense provider embeds raw text as given, so this rendering step is the
/// caller's job — see `OnnxDenseProvider::embed_doc`), consults the on-disk
/// embedding cache, and dispatches batched dense + per-chunk sparse
/// embedding calls for whatever missed the cache (spec.md §4.5 step 3).
#[allow(clippy::too_many_arguments)]
async fn embed_chunks(
    chunks: Vec<CodeChunk>,
    dense: &dyn DenseEmbeddingProvider,
    sparse: Option<&dyn SparseEmbeddingProvider>,
    templates: &EmbeddingTemplates,
    cache: &EmbeddingCache,
    embedding_mode: &str,
    embed_batch_size: usize,
) -> Result<Vec<VectorRecord>> {
    let template_hash = templates.doc_template_hash();
    let dimension = dense.dimension();
    let model_id = dense.model_id();

    let mut rendered = Vec::with_capacity(chunks.len());
    for chunk in &chunks {
        rendered.push(templates.render_doc_chunk(chunk)?);
    }

    let mut dense_vectors: Vec<Option<Vec<f32>>> = vec![None; chunks.len()];
    let mut doc_hashes = Vec::with_capacity(rendered.len());
    let mut to_embed_idx = Vec::new();
    let mut to_embed_text = Vec::new();
    for (idx, text) in rendered.iter().enumerate() {
        let doc_hash = fnv1a64(text.as_bytes());
        doc_hashes.push(doc_hash);
        match cache.get_vector(embedding_mode, model_id, template_hash, doc_hash, dimension).await {
            Some(cached) => dense_vectors[idx] = Some(cached),
            None => {
                to_embed_idx.push(idx);
                to_embed_text.push(text.clone());
            }
        }
    }

    let batch_size = embed_batch_size.max(1);
    for batch_start in (0..to_embed_idx.len()).step_by(batch_size) {
        let batch_end = (batch_start + batch_size).min(to_embed_idx.len());
        let embedded = dense.embed_doc_batch(&to_embed_text[batch_start..batch_end]).await?;
        for (offset, vector) in embedded.into_iter().enumerate() {
            let idx = to_embed_idx[batch_start + offset];
            let doc_hash = doc_hashes[idx];
            if let Err(err) = cache.put_vector(embedding_mode, model_id, template_hash, doc_hash, &vector).await {
                log::warn!("failed to persist embedding cache entry: {err}");
            }
            dense_vectors[idx] = Some(vector);
        }
    }

    let mut records = Vec::with_capacity(chunks.len());
    for (idx, chunk) in chunks.into_iter().enumerate() {
        let Some(dense_vector) = dense_vectors[idx].take() else {
            return Err(IndexerError::Other(format!(
                "chunk {} missing dense vector after embedding",
                chunk.id
            )));
        };
        let sparse_vector = match sparse {
            Some(provider) => Some(provider.embed_doc(&rendered[idx]).await?),
            None => None,
        };
        records.push(VectorRecord {
            id: chunk.id.to_string(),
            chunk,
            dense: dense_vector,
            sparse: sparse_vector,
        });
    }
    Ok(records)
}

fn relative_path(root: &Path, file_path: &Path) -> String {
    file_path
        .strip_prefix(root)
        .unwrap_or(file_path)
        .to_string_lossy()
        .replace('\\', "/")
}

fn count_lines(raw: &[u8]) -> usize {
    String::from_utf8_lossy(raw).lines().count()
}

fn fnv1a64(bytes: &[u8]) -> u64 {
    const OFFSET: u64 = 14_695_981_039_346_656_037;
    const PRIME: u64 = 1_099_511_628_211;
    let mut hash = OFFSET;
    for b in bytes {
        hash ^= u64::from(*b);
        hash = hash.wrapping_mul(PRIME);
    }
    hash
}

fn current_unix_ms() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .ok()
        .and_then(|d| u64::try_from(d.as_millis()).ok())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use codeweaver_vector_store::{LocalJsonStore, StorageClass};

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
        async fn embed_query(
            &self,
            _text: &str,
            _intent: Option<codeweaver_vector_store::Intent>,
        ) -> codeweaver_vector_store::Result<Vec<f32>> {
            Ok(vec![1.0, 0.0, 0.0])
        }
    }

    async fn new_indexer(root: &Path) -> ProjectIndexer {
        let store_dir = store_dir_for_project_root(root);
        let primary: Arc<dyn VectorStoreBackend> = Arc::new(
            LocalJsonStore::open(store_dir.join("primary.json"), 3, StorageClass::Persistent)
                .await
                .unwrap(),
        );
        let backup: Arc<dyn VectorStoreBackend> = Arc::new(
            LocalJsonStore::open(store_dir.join("backup.json"), 3, StorageClass::Ephemeral)
                .await
                .unwrap(),
        );
        let failover = Arc::new(FailoverManager::new(primary, backup, true));
        ProjectIndexer::new(root, Arc::new(StubDense), None, failover, IndexerConfig::default())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn indexes_a_simple_project() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join("main.rs"), "fn main() {}\n").await.unwrap();

        let indexer = new_indexer(dir.path()).await;
        let stats = indexer.index().await.unwrap();

        assert_eq!(stats.files, 1);
        assert!(stats.chunks > 0);
        assert!(stats.errors.is_empty());
    }

    #[tokio::test]
    async fn reindexing_changed_path_replaces_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.rs");
        tokio::fs::write(&file, "fn a() {}\n").await.unwrap();

        let indexer = new_indexer(dir.path()).await;
        indexer.index().await.unwrap();

        tokio::fs::write(&file, "fn a() {}\nfn b() {}\n").await.unwrap();
        let stats = indexer.index_changed_paths(&[file]).await.unwrap();
        assert_eq!(stats.files, 1);
        assert!(stats.chunks >= 1);
    }

    #[tokio::test]
    async fn deleted_path_removes_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("gone.rs");
        tokio::fs::write(&file, "fn gone() {}\n").await.unwrap();

        let indexer = new_indexer(dir.path()).await;
        indexer.index().await.unwrap();

        tokio::fs::remove_file(&file).await.unwrap();
        let stats = indexer.index_changed_paths(&[file]).await.unwrap();
        assert_eq!(stats.files, 0);
        assert!(stats.errors.is_empty());
    }
}
