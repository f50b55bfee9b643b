//! Composition root and background lifespan (SPEC_FULL.md §2
//! "Background State & Lifespan").
//!
//! Wires the Provider Registry, the failover-backed vector store, the
//! `ProjectIndexer`, its optional file watcher, and the `find_code`
//! orchestrator into one long-lived handle shared by the MCP tool surface
//! and the management HTTP server.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use codeweaver_indexer::{ProjectIndexer, StreamingIndexer, StreamingIndexerConfig};
use codeweaver_protocol::{FindCodeRequest, FindCodeResponse};
use codeweaver_search::HybridSearch;
use codeweaver_vector_store::{
    store_dir_for_project_root, DenseEmbeddingProvider, FailoverManager, HashingSparseEmbedder,
    LexicalOverlapReranker, LocalJsonStore, ModelRegistry, OnnxDenseProvider, RerankProvider,
    RestoreLoopHandle, SparseEmbeddingProvider, StorageClass, VectorStoreBackend,
};
use prometheus::{Encoder, Histogram, HistogramOpts, IntCounter, Registry, TextEncoder};
use tokio::sync::RwLock;

use crate::config::AppConfig;
use crate::error::{InitializationError, Result};

/// How often the failover restore probe checks whether the primary store
/// has recovered enough to restore (spec.md §5 "failover health probes run
/// as independent tasks").
const FAILOVER_RESTORE_POLL_INTERVAL: Duration = Duration::from_secs(30);

pub struct BackgroundState {
    pub root: PathBuf,
    pub config: RwLock<AppConfig>,
    pub indexer: Arc<ProjectIndexer>,
    pub streamer: Option<StreamingIndexer>,
    pub failover: Arc<FailoverManager>,
    pub search: HybridSearch,
    started_at: SystemTime,
    metrics: Metrics,
    _restore_task: RestoreLoopHandle,
}

struct Metrics {
    registry: Registry,
    requests_total: IntCounter,
    request_latency_ms: Histogram,
    results_total: IntCounter,
}

impl Metrics {
    fn new() -> Self {
        let registry = Registry::new();
        let requests_total = IntCounter::new("find_code_requests_total", "Total find_code calls").unwrap();
        let request_latency_ms = Histogram::with_opts(
            HistogramOpts::new("find_code_latency_ms", "find_code latency in milliseconds")
                .buckets(vec![5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2500.0]),
        )
        .unwrap();
        let results_total = IntCounter::new("find_code_results_total", "Total results returned").unwrap();

        registry.register(Box::new(requests_total.clone())).ok();
        registry.register(Box::new(request_latency_ms.clone())).ok();
        registry.register(Box::new(results_total.clone())).ok();

        Self { registry, requests_total, request_latency_ms, results_total }
    }
}

impl BackgroundState {
    /// Builds providers, opens (or creates) the primary/backup stores,
    /// primes the index, and — if `file_watching_enabled` — starts the
    /// background watcher. This is the server's startup lifespan.
    pub async fn start(root: impl AsRef<Path>, config: AppConfig) -> Result<Self> {
        let root = root
            .as_ref()
            .canonicalize()
            .map_err(|e| InitializationError::InvalidRoot(e.to_string()))?;

        let dense = build_dense_provider(&config)?;
        let sparse: Arc<dyn SparseEmbeddingProvider> = Arc::new(HashingSparseEmbedder::new());
        let rerank: Option<Arc<dyn RerankProvider>> = if config.providers.reranker.enabled {
            Some(Arc::new(LexicalOverlapReranker::new()))
        } else {
            None
        };

        let store_dir = store_dir_for_project_root(&root);
        tokio::fs::create_dir_all(&store_dir)
            .await
            .map_err(|e| InitializationError::InvalidRoot(e.to_string()))?;
        let dimension = dense.dimension();
        let primary: Arc<dyn VectorStoreBackend> = Arc::new(
            LocalJsonStore::open(store_dir.join("primary.json"), dimension, StorageClass::Persistent).await?,
        );
        let backup: Arc<dyn VectorStoreBackend> = Arc::new(
            LocalJsonStore::open(store_dir.join("backup.json"), dimension, StorageClass::Ephemeral).await?,
        );
        let failover = Arc::new(FailoverManager::new(primary, backup, config.failover.enabled));

        let indexer_config = config.indexer_config();
        let indexer = Arc::new(
            ProjectIndexer::new(&root, dense.clone(), Some(sparse.clone()), failover.clone(), indexer_config).await?,
        );

        if config.indexer.auto_index_on_startup {
            let stats = indexer.index().await?;
            log::info!(
                "initial index complete: {} files, {} chunks ({} ms)",
                stats.files,
                stats.chunks,
                stats.time_ms
            );
        }

        let streamer = if config.indexer.file_watching_enabled {
            match StreamingIndexer::start(indexer.clone(), StreamingIndexerConfig::default()) {
                Ok(streamer) => Some(streamer),
                Err(e) => {
                    log::warn!("file watcher failed to start, continuing without live updates: {e}");
                    None
                }
            }
        } else {
            None
        };

        let restore_task = failover.clone().spawn_restore_loop(
            dense.clone(),
            Some(sparse.clone()),
            FAILOVER_RESTORE_POLL_INTERVAL,
        );

        let search = HybridSearch::new(dense, Some(sparse), rerank, failover.clone());

        Ok(Self {
            root,
            config: RwLock::new(config),
            indexer,
            streamer,
            failover,
            search,
            started_at: SystemTime::now(),
            metrics: Metrics::new(),
            _restore_task: restore_task,
        })
    }

    /// Runs `find_code`, recording request/latency/result-count metrics
    /// (spec.md §6 `GET /metrics`).
    pub async fn find_code(&self, request: &FindCodeRequest) -> FindCodeResponse {
        let start = Instant::now();
        let response = self.search.find_code(request).await;

        self.metrics.requests_total.inc();
        self.metrics.results_total.inc_by(response.total as u64);
        self.metrics
            .request_latency_ms
            .observe(start.elapsed().as_secs_f64() * 1000.0);

        response
    }

    pub fn uptime_seconds(&self) -> u64 {
        SystemTime::now()
            .duration_since(self.started_at)
            .map(|d| d.as_secs())
            .unwrap_or(0)
    }

    /// `GET /health` — health envelope including indexing status and
    /// failover state (spec.md §6).
    pub async fn health_snapshot(&self) -> serde_json::Value {
        let failover_state = self.failover.state().await;
        let watcher_health = self.streamer.as_ref().map(|s| s.health_snapshot());

        serde_json::json!({
            "status": "ok",
            "uptime_seconds": self.uptime_seconds(),
            "failover_state": format!("{failover_state:?}"),
            "watching": watcher_health.is_some(),
            "watcher": watcher_health.map(|h| serde_json::json!({
                "indexing": h.indexing,
                "consecutive_failures": h.consecutive_failures,
                "last_error": h.last_error,
            })),
        })
    }

    /// `GET /status` — indexing progress and failover details.
    pub async fn status_snapshot(&self) -> serde_json::Value {
        let failover_state = self.failover.state().await;
        let is_active_primary = self.failover.is_active_primary().await;
        let concurrency = codeweaver_indexer::index_concurrency_snapshot();

        serde_json::json!({
            "root": self.root.display().to_string(),
            "failover_state": format!("{failover_state:?}"),
            "active_store_is_primary": is_active_primary,
            "index_concurrency": {
                "limit": concurrency.limit,
                "in_flight": concurrency.in_flight,
                "waiters": concurrency.waiters,
            },
            "watcher": self.streamer.as_ref().map(|s| serde_json::json!({
                "watch_count": s.watch_count(),
                "health": s.health_snapshot(),
            })),
        })
    }

    /// `GET /metrics` — Prometheus text exposition format.
    pub fn metrics_text(&self) -> String {
        let encoder = TextEncoder::new();
        let families = self.metrics.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&families, &mut buffer).ok();
        String::from_utf8(buffer).unwrap_or_default()
    }

    /// `GET /settings` — configuration view with sensitive fields redacted.
    pub async fn settings_snapshot(&self) -> serde_json::Value {
        crate::config::redact_settings(&*self.config.read().await)
    }

    /// `GET /state` — internal state snapshot (debug).
    pub async fn state_snapshot(&self) -> serde_json::Value {
        serde_json::json!({
            "root": self.root.display().to_string(),
            "uptime_seconds": self.uptime_seconds(),
            "failover_enabled": self.failover.enabled(),
        })
    }
}

fn build_dense_provider(config: &AppConfig) -> Result<Arc<dyn DenseEmbeddingProvider>> {
    let registry = ModelRegistry::from_env()?;
    let model_id = match &config.providers.embedding.model {
        codeweaver_protocol::Setting::Set(id) => id.clone(),
        _ => codeweaver_vector_store::current_model_id()?,
    };
    Ok(Arc::new(OnnxDenseProvider::new(model_id, registry)))
}
