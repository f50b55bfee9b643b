//! Vector-Store Failover Manager (spec.md §4.6): health-monitored
//! switchover between a primary (remote, higher-dimensional, persistent)
//! and a backup (local, lower-dimensional) [`crate::store::VectorStoreBackend`].
//!
//! State machine and circuit breaker grounded on
//! `marlonsc-mcp-context-browser::infrastructure::resilience::circuit_breaker`
//! (`TowerCircuitBreaker`), adapted from its `async_trait`/sliding-window
//! shape to this crate's `log`-based logging and a fourth, failover-specific
//! state (`Degraded`) the breaker itself doesn't need.

use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::sync::RwLock as StdRwLock;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;

use crate::error::{Result, VectorStoreError};
use crate::provider::{DenseEmbeddingProvider, SparseEmbeddingProvider};
use crate::store::VectorStoreBackend;
use crate::types::{BackupSnapshotSet, VectorRecord};

/// Consecutive primary successes required before a restore becomes eligible
/// (spec.md §4.6 "three successive successes").
const CONSECUTIVE_SUCCESSES_TO_RESTORE: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
            Self::HalfOpen => write!(f, "half-open"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Failure rate threshold (0-100) to trip the circuit.
    pub failure_threshold: u32,
    /// Minimum calls observed in the window before the threshold applies.
    pub window_size: u32,
    pub recovery_timeout: Duration,
    pub half_open_max_requests: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 50,
            window_size: 5,
            recovery_timeout: Duration::from_secs(30),
            half_open_max_requests: 1,
        }
    }
}

/// Sliding-window circuit breaker over primary-store calls.
struct CircuitBreaker {
    config: CircuitBreakerConfig,
    state: StdRwLock<CircuitState>,
    failure_count: AtomicU32,
    total_calls: AtomicU32,
    opened_at: StdRwLock<Option<Instant>>,
    half_open_calls: AtomicU32,
}

impl CircuitBreaker {
    fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            state: StdRwLock::new(CircuitState::Closed),
            failure_count: AtomicU32::new(0),
            total_calls: AtomicU32::new(0),
            opened_at: StdRwLock::new(None),
            half_open_calls: AtomicU32::new(0),
        }
    }

    fn failure_rate(&self) -> f64 {
        let total = self.total_calls.load(Ordering::Relaxed);
        if total == 0 {
            return 0.0;
        }
        let failures = self.failure_count.load(Ordering::Relaxed);
        (f64::from(failures) / f64::from(total)) * 100.0
    }

    fn should_try_half_open(&self) -> bool {
        self.opened_at
            .read()
            .ok()
            .and_then(|g| *g)
            .is_some_and(|opened| opened.elapsed() >= self.config.recovery_timeout)
    }

    fn transition_to(&self, new_state: CircuitState) {
        let mut state = self.state.write().expect("circuit breaker lock poisoned");
        if *state == new_state {
            return;
        }
        log::info!("vector-store circuit breaker: {state} -> {new_state}");
        *state = new_state;
        match new_state {
            CircuitState::Open => {
                *self.opened_at.write().expect("lock poisoned") = Some(Instant::now());
            }
            CircuitState::Closed => {
                self.failure_count.store(0, Ordering::Relaxed);
                self.total_calls.store(0, Ordering::Relaxed);
                *self.opened_at.write().expect("lock poisoned") = None;
            }
            CircuitState::HalfOpen => {
                self.half_open_calls.store(0, Ordering::Relaxed);
            }
        }
    }

    fn state(&self) -> CircuitState {
        *self.state.read().expect("lock poisoned")
    }

    fn is_call_permitted(&self) -> bool {
        match self.state() {
            CircuitState::Closed => true,
            CircuitState::Open => {
                if self.should_try_half_open() {
                    self.transition_to(CircuitState::HalfOpen);
                    true
                } else {
                    false
                }
            }
            CircuitState::HalfOpen => {
                let current = self.half_open_calls.fetch_add(1, Ordering::Relaxed);
                current < self.config.half_open_max_requests
            }
        }
    }

    fn record_success(&self) {
        self.total_calls.fetch_add(1, Ordering::Relaxed);
        if self.state() == CircuitState::HalfOpen {
            self.transition_to(CircuitState::Closed);
        }
    }

    fn record_failure(&self) {
        self.failure_count.fetch_add(1, Ordering::Relaxed);
        let total = self.total_calls.fetch_add(1, Ordering::Relaxed) + 1;
        match self.state() {
            CircuitState::Closed => {
                if total >= self.config.window_size && self.failure_rate() >= f64::from(self.config.failure_threshold) {
                    self.transition_to(CircuitState::Open);
                }
            }
            CircuitState::HalfOpen => self.transition_to(CircuitState::Open),
            CircuitState::Open => {}
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailoverState {
    PrimaryOnly,
    BackupActive,
    Restoring,
    /// Sub-state of `PrimaryOnly`: primary active but with a partially
    /// failed sync-back outstanding (spec.md §4.6 "Degraded").
    Degraded,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RestoreOutcome {
    NotApplicable,
    Restored { synced: usize },
    PartialSyncBackFailure { synced: usize, failed: usize },
    PrimaryStillUnhealthy,
}

/// Presents one stable vector-store interface to the indexer and query path
/// while switching between `primary` and `backup` (spec.md §4.6).
pub struct FailoverManager {
    primary: Arc<dyn VectorStoreBackend>,
    backup: Arc<dyn VectorStoreBackend>,
    enabled: bool,
    breaker: CircuitBreaker,
    state: RwLock<FailoverState>,
    snapshot: RwLock<Option<BackupSnapshotSet>>,
    consecutive_successes: AtomicU32,
}

impl FailoverManager {
    #[must_use]
    pub fn new(primary: Arc<dyn VectorStoreBackend>, backup: Arc<dyn VectorStoreBackend>, enabled: bool) -> Self {
        Self::with_config(primary, backup, enabled, CircuitBreakerConfig::default())
    }

    #[must_use]
    pub fn with_config(
        primary: Arc<dyn VectorStoreBackend>,
        backup: Arc<dyn VectorStoreBackend>,
        enabled: bool,
        config: CircuitBreakerConfig,
    ) -> Self {
        Self {
            primary,
            backup,
            enabled,
            breaker: CircuitBreaker::new(config),
            state: RwLock::new(FailoverState::PrimaryOnly),
            snapshot: RwLock::new(None),
            consecutive_successes: AtomicU32::new(0),
        }
    }

    #[must_use]
    pub const fn enabled(&self) -> bool {
        self.enabled
    }

    pub async fn state(&self) -> FailoverState {
        *self.state.read().await
    }

    pub async fn is_active_primary(&self) -> bool {
        matches!(self.state().await, FailoverState::PrimaryOnly | FailoverState::Degraded)
    }

    /// Picks the store for one request. Per spec.md §4.6 invariant, the
    /// caller must fetch this exactly once per request and reuse it for
    /// that request's whole lifetime — never re-resolve mid-request.
    pub async fn active(&self) -> (Arc<dyn VectorStoreBackend>, bool) {
        if !self.enabled || self.is_active_primary().await {
            (self.primary.clone(), true)
        } else {
            (self.backup.clone(), false)
        }
    }

    /// Records the outcome of an operation issued against the primary
    /// store, driving the circuit breaker and (if tripped) the transition
    /// into `BackupActive`. No-op when failover is disabled or the call
    /// targeted the backup.
    pub async fn report_primary_outcome(&self, succeeded: bool) {
        if !self.enabled {
            return;
        }
        if succeeded {
            self.breaker.record_success();
            let successes = self.consecutive_successes.fetch_add(1, Ordering::Relaxed) + 1;
            if successes >= CONSECUTIVE_SUCCESSES_TO_RESTORE && self.state().await == FailoverState::BackupActive {
                log::info!("primary vector store health recovered after {successes} consecutive successes; eligible for restore");
            }
        } else {
            self.consecutive_successes.store(0, Ordering::Relaxed);
            self.breaker.record_failure();
            if self.breaker.state() == CircuitState::Open && self.state().await == FailoverState::PrimaryOnly {
                self.enter_backup_active().await;
            }
        }
    }

    async fn enter_backup_active(&self) {
        let mut state = self.state.write().await;
        if *state == FailoverState::BackupActive {
            return;
        }
        log::warn!("primary vector store unhealthy; failing over to backup");
        let ids = self.backup.scroll_ids().await.unwrap_or_default();
        *self.snapshot.write().await = Some(BackupSnapshotSet::capture(ids));
        *state = FailoverState::BackupActive;
    }

    /// Whether the primary has recovered enough to attempt `try_restore`
    /// (spec.md §4.6 "three successive successes, or a manual restore
    /// trigger"). A manual trigger can simply call `try_restore` directly.
    pub async fn restore_eligible(&self) -> bool {
        self.state().await == FailoverState::BackupActive
            && self.consecutive_successes.load(Ordering::Relaxed) >= CONSECUTIVE_SUCCESSES_TO_RESTORE
    }

    /// Runs the Restoring sequence: sync-back, primary health verification,
    /// switch. Aborts to `BackupActive` (or `Degraded`, if sync-back was
    /// only partially successful) on any failure — spec.md §4.6 invariant
    /// "restoration never completes unless sync-back *and* primary health
    /// verification both succeed".
    pub async fn try_restore(
        &self,
        dense: &dyn DenseEmbeddingProvider,
        sparse: Option<&dyn SparseEmbeddingProvider>,
    ) -> Result<RestoreOutcome> {
        if self.state().await != FailoverState::BackupActive {
            return Ok(RestoreOutcome::NotApplicable);
        }
        *self.state.write().await = FailoverState::Restoring;

        let snapshot = self.snapshot.read().await.clone().unwrap_or_default();
        let current_ids = match self.backup.scroll_ids().await {
            Ok(ids) => ids,
            Err(err) => {
                *self.state.write().await = FailoverState::BackupActive;
                return Err(err);
            }
        };
        let new_ids = snapshot.diff_new(&current_ids);

        let mut synced = 0usize;
        let mut failed = 0usize;
        for (index, id) in new_ids.iter().enumerate() {
            match self.sync_back_one(id, dense, sparse).await {
                Ok(()) => synced += 1,
                Err(err) => {
                    failed += 1;
                    log::warn!("sync-back failed for chunk '{id}': {err}");
                }
            }
            if (index + 1) % 100 == 0 {
                log::info!("sync-back progress: {}/{} ({synced} ok, {failed} failed)", index + 1, new_ids.len());
            }
        }

        if failed > 0 {
            *self.state.write().await = FailoverState::Degraded;
            log::warn!("sync-back completed with {failed} failures out of {}; staying in degraded primary", new_ids.len());
            return Ok(RestoreOutcome::PartialSyncBackFailure { synced, failed });
        }

        if self.primary.health_check().await.is_err() {
            *self.state.write().await = FailoverState::BackupActive;
            return Ok(RestoreOutcome::PrimaryStillUnhealthy);
        }

        *self.state.write().await = FailoverState::PrimaryOnly;
        *self.snapshot.write().await = None;
        self.consecutive_successes.store(0, Ordering::Relaxed);
        log::info!("restored to primary vector store after {synced} sync-back upserts");
        Ok(RestoreOutcome::Restored { synced })
    }

    /// Spawns the periodic failover health probe (spec.md §5 "failover
    /// health probes run as independent tasks"): polls [`Self::restore_eligible`]
    /// and, once the primary has recovered, drives [`Self::try_restore`] to
    /// completion. Dropping the returned handle aborts the task.
    #[must_use]
    pub fn spawn_restore_loop(
        self: Arc<Self>,
        dense: Arc<dyn DenseEmbeddingProvider>,
        sparse: Option<Arc<dyn SparseEmbeddingProvider>>,
        poll_interval: Duration,
    ) -> RestoreLoopHandle {
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(poll_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if !self.restore_eligible().await {
                    continue;
                }
                let sparse_ref = sparse.as_deref();
                match self.try_restore(dense.as_ref(), sparse_ref).await {
                    Ok(RestoreOutcome::NotApplicable) => {}
                    Ok(outcome) => log::info!("failover restore probe: {outcome:?}"),
                    Err(err) => log::warn!("failover restore probe failed: {err}"),
                }
            }
        });
        RestoreLoopHandle { handle }
    }

    /// Re-embeds one backup chunk's source text with the primary's
    /// providers and upserts it under the same id (spec.md §4.6 "no vector
    /// is ever copied between stores").
    async fn sync_back_one(&self, id: &str, dense: &dyn DenseEmbeddingProvider, sparse: Option<&dyn SparseEmbeddingProvider>) -> Result<()> {
        let chunk = self
            .backup
            .fetch_chunk(id)
            .await?
            .ok_or_else(|| VectorStoreError::NotFound(id.to_string()))?;
        let dense_vector = dense.embed_doc(&chunk.content).await?;
        let sparse_vector = match sparse {
            Some(provider) => Some(provider.embed_doc(&chunk.content).await?),
            None => None,
        };
        self.primary
            .upsert(vec![VectorRecord {
                id: id.to_string(),
                chunk,
                dense: dense_vector,
                sparse: sparse_vector,
            }])
            .await
    }
}

/// Handle to a task spawned by [`FailoverManager::spawn_restore_loop`].
/// Aborts the task when dropped.
pub struct RestoreLoopHandle {
    handle: tokio::task::JoinHandle<()>,
}

impl Drop for RestoreLoopHandle {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
