//! Refresh Coordinator
//!
//! Decides on every scrape whether to serve the cached snapshot, serve it
//! and refresh in the background, or refresh first and then serve.
//!
//! ```text
//!            scrape                         scrape (age >= ttl)
//!  EMPTY ──────────────▶ FRESH ───────────▶ STALE ──┐
//!    │  blocking refresh    ▲                       │ serve cached,
//!    │                      └──── refresh done ─────┘ spawn one refresh
//! ```
//!
//! At most one refresh runs at a time. The gate is a `tokio` mutex: the
//! background path only ever `try_lock`s it, so scrapes never wait on a
//! running refresh once a snapshot exists. Refreshes scan into fresh
//! mappings and publish them in one write-lock section.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use crate::config::DirectoryConfig;
use crate::error::{Error, Result};
use crate::exporter;
use crate::registry::{MetricKind, MetricValue, MetricValues, Registry, TIMESTAMP_KEY};
use crate::scanner::{DirStats, DirectoryScanner};
use crate::telemetry::{ExporterMetrics, RefreshResult};

// =============================================================================
// Cache State
// =============================================================================

/// Freshness of the cached snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    /// No snapshot has been produced yet
    Empty,
    /// Snapshot younger than the TTL
    Fresh,
    /// Snapshot at least as old as the TTL
    Stale,
}

/// What a scrape did about refreshing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshDecision {
    /// Served the cached snapshot only
    Serve,
    /// Served the cached snapshot and started a background refresh
    ServeAndRefresh,
    /// Refreshed synchronously, then served the result
    RefreshThenServe,
}

/// Result of one scrape
#[derive(Debug)]
pub struct ScrapeOutcome {
    /// Rendered response body
    pub body: String,
    pub decision: RefreshDecision,
    /// Background refresh started by this scrape, if any
    pub background: Option<JoinHandle<()>>,
}

#[derive(Debug)]
struct StoreInner {
    registry: Registry,
    last_refresh: Option<Instant>,
    has_snapshot: bool,
    /// Bumped whenever the directory list changes
    directories_version: u64,
}

/// Registry plus cache state behind one coarse lock
#[derive(Debug)]
pub struct MetricStore {
    inner: RwLock<StoreInner>,
    generation: AtomicU64,
}

impl MetricStore {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(StoreInner {
                registry: Registry::new(),
                last_refresh: None,
                has_snapshot: false,
                directories_version: 0,
            }),
            generation: AtomicU64::new(0),
        }
    }

    /// Freshness at `now` for the given TTL
    pub fn status(&self, ttl: Duration, now: Instant) -> CacheStatus {
        let inner = self.inner.read();
        if !inner.has_snapshot {
            return CacheStatus::Empty;
        }
        match inner.last_refresh {
            Some(at) if now.saturating_duration_since(at) < ttl => CacheStatus::Fresh,
            _ => CacheStatus::Stale,
        }
    }

    pub fn has_snapshot(&self) -> bool {
        self.inner.read().has_snapshot
    }

    /// Point-in-time copy of the registry; value mappings are shared
    pub fn snapshot(&self) -> Registry {
        self.inner.read().registry.clone()
    }

    /// Number of snapshots published so far
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Current directory list version, captured before a scan starts
    pub fn directories_version(&self) -> u64 {
        self.inner.read().directories_version
    }

    /// Install a complete refresh result.
    ///
    /// The TTL restarts only if the directory list is still the one the
    /// refresh scanned; otherwise the new values are served but stay stale.
    fn publish(&self, refresh: Refresh, now: Instant) {
        let mut inner = self.inner.write();
        inner.registry.replace_values(MetricKind::FilesInDir, refresh.files);
        inner.registry.replace_values(MetricKind::OldestFileTime, refresh.oldest);
        inner
            .registry
            .replace_values(MetricKind::CurrentTimestamp, refresh.timestamp);
        if inner.directories_version == refresh.directories_version {
            inner.last_refresh = Some(now);
        }
        inner.has_snapshot = true;
        self.generation.fetch_add(1, Ordering::AcqRel);
    }

    /// Restart the TTL without touching the registry
    fn mark_attempt(&self, now: Instant, directories_version: u64) {
        let mut inner = self.inner.write();
        if inner.directories_version == directories_version {
            inner.last_refresh = Some(now);
        }
    }

    /// Record a new directory list and mark the snapshot stale
    fn invalidate(&self) {
        let mut inner = self.inner.write();
        inner.directories_version += 1;
        inner.last_refresh = None;
    }
}

impl Default for MetricStore {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Refresh Computation
// =============================================================================

/// Values computed by one refresh, not yet published
#[derive(Debug)]
struct Refresh {
    files: MetricValues,
    oldest: MetricValues,
    timestamp: MetricValues,
    scanned: usize,
    failures: Vec<(String, Error)>,
    directories_version: u64,
}

impl Refresh {
    fn result(&self) -> RefreshResult {
        if self.failures.is_empty() {
            RefreshResult::Ok
        } else if self.scanned == 0 {
            RefreshResult::Failed
        } else {
            RefreshResult::Partial
        }
    }
}

/// Scan every directory.
///
/// A failing directory still gets one entry per metric, reported as an empty
/// directory; the error is returned in `failures`.
fn collect(
    directories: &[DirectoryConfig],
    scanner: &dyn DirectoryScanner,
    directories_version: u64,
) -> Refresh {
    let mut files = HashMap::with_capacity(directories.len());
    let mut oldest = HashMap::with_capacity(directories.len());
    let mut failures = Vec::new();

    for dir in directories {
        let stats = match scanner.scan(&dir.path, dir.recursive) {
            Ok(stats) => stats,
            Err(e) => {
                failures.push((dir.name.clone(), e));
                DirStats::empty()
            }
        };

        let key = dir.key();
        let labeled = |value: i64| {
            MetricValue::new(key.clone(), value)
                .with_label("dir", dir.name.clone())
                .with_label("recursive", dir.recursive.to_string())
        };
        files.insert(key.clone(), labeled(stats.file_count));
        oldest.insert(key.clone(), labeled(stats.oldest_or_sentinel()));
    }

    let mut timestamp = HashMap::with_capacity(1);
    timestamp.insert(
        TIMESTAMP_KEY.to_string(),
        MetricValue::new(TIMESTAMP_KEY, chrono::Utc::now().timestamp()),
    );

    Refresh {
        scanned: directories.len() - failures.len(),
        files,
        oldest,
        timestamp,
        failures,
        directories_version,
    }
}

// =============================================================================
// Coordinator
// =============================================================================

/// Owns the metric store and decides when it is recomputed
pub struct RefreshCoordinator {
    directories: RwLock<Arc<[DirectoryConfig]>>,
    ttl: Duration,
    scanner: Arc<dyn DirectoryScanner>,
    store: MetricStore,
    gate: Arc<Mutex<()>>,
    metrics: Option<ExporterMetrics>,
}

impl RefreshCoordinator {
    pub fn new(
        directories: Vec<DirectoryConfig>,
        ttl: Duration,
        scanner: Arc<dyn DirectoryScanner>,
    ) -> Arc<Self> {
        Arc::new(Self {
            directories: RwLock::new(directories.into()),
            ttl,
            scanner,
            store: MetricStore::new(),
            gate: Arc::new(Mutex::new(())),
            metrics: None,
        })
    }

    /// Same as [`RefreshCoordinator::new`], also recording self-metrics
    pub fn with_metrics(
        directories: Vec<DirectoryConfig>,
        ttl: Duration,
        scanner: Arc<dyn DirectoryScanner>,
        metrics: ExporterMetrics,
    ) -> Arc<Self> {
        Arc::new(Self {
            directories: RwLock::new(directories.into()),
            ttl,
            scanner,
            store: MetricStore::new(),
            gate: Arc::new(Mutex::new(())),
            metrics: Some(metrics),
        })
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn status(&self) -> CacheStatus {
        self.store.status(self.ttl, Instant::now())
    }

    pub fn store(&self) -> &MetricStore {
        &self.store
    }

    pub fn metrics(&self) -> Option<&ExporterMetrics> {
        self.metrics.as_ref()
    }

    pub fn directories(&self) -> Arc<[DirectoryConfig]> {
        self.directories.read().clone()
    }

    /// Swap the monitored directories.
    ///
    /// The current snapshot is kept but marked stale, so the next scrape
    /// serves it and refreshes against the new list. A refresh already
    /// running against the old list publishes without making the snapshot
    /// fresh.
    pub fn replace_directories(&self, directories: Vec<DirectoryConfig>) {
        info!(count = directories.len(), "replacing monitored directories");
        *self.directories.write() = directories.into();
        self.store.invalidate();
    }

    /// Handle one scrape
    pub async fn scrape(self: &Arc<Self>) -> ScrapeOutcome {
        if let Some(metrics) = &self.metrics {
            metrics.inc_scrapes();
        }

        match self.status() {
            CacheStatus::Empty => {
                self.refresh_blocking().await;
                ScrapeOutcome {
                    body: self.render(),
                    decision: RefreshDecision::RefreshThenServe,
                    background: None,
                }
            }
            CacheStatus::Fresh => ScrapeOutcome {
                body: self.render(),
                decision: RefreshDecision::Serve,
                background: None,
            },
            CacheStatus::Stale => {
                let body = self.render();
                match self.spawn_refresh() {
                    Ok(handle) => ScrapeOutcome {
                        body,
                        decision: RefreshDecision::ServeAndRefresh,
                        background: Some(handle),
                    },
                    Err(e) => {
                        debug!("not refreshing: {}", e);
                        ScrapeOutcome {
                            body,
                            decision: RefreshDecision::Serve,
                            background: None,
                        }
                    }
                }
            }
        }
    }

    /// Render the current snapshot, followed by self-metrics if enabled
    pub fn render(&self) -> String {
        let mut body = exporter::render(&self.store.snapshot());
        if let Some(metrics) = &self.metrics {
            match metrics.encode() {
                Ok(text) => body.push_str(&text),
                Err(e) => warn!("failed to encode exporter metrics: {}", e),
            }
        }
        body
    }

    /// Start a background refresh unless one is already running
    pub fn spawn_refresh(self: &Arc<Self>) -> Result<JoinHandle<()>> {
        let guard = self
            .gate
            .clone()
            .try_lock_owned()
            .map_err(|_| Error::RefreshInProgress)?;

        let this = Arc::clone(self);
        Ok(tokio::spawn(async move {
            this.refresh_with(guard).await;
        }))
    }

    /// Refresh now, waiting for any running refresh to finish first
    pub async fn refresh_now(&self) -> Result<RefreshResult> {
        let guard = self.gate.clone().lock_owned().await;
        self.run_refresh(guard).await
    }

    async fn refresh_blocking(&self) {
        let guard = self.gate.clone().lock_owned().await;
        // a concurrent first scrape may have produced the snapshot already
        if self.store.has_snapshot() {
            return;
        }
        self.refresh_with(guard).await;
    }

    async fn refresh_with(&self, guard: OwnedMutexGuard<()>) {
        if let Err(e) = self.run_refresh(guard).await {
            warn!("refresh did not update metrics: {}", e);
        }
    }

    /// One recomputation; the gate guard proves exclusivity
    #[instrument(skip_all)]
    async fn run_refresh(&self, _guard: OwnedMutexGuard<()>) -> Result<RefreshResult> {
        // version before the list, so a reload in between is never missed
        let version = self.store.directories_version();
        let directories = self.directories();
        let scanner = Arc::clone(&self.scanner);
        let started = Instant::now();

        if let Some(metrics) = &self.metrics {
            metrics.set_refresh_in_progress(true);
        }
        debug!(directories = directories.len(), "refresh started");

        let scan =
            tokio::task::spawn_blocking(move || collect(&directories, scanner.as_ref(), version))
                .await;

        if let Some(metrics) = &self.metrics {
            metrics.set_refresh_in_progress(false);
        }

        let refresh = match scan {
            Ok(refresh) => refresh,
            Err(e) => {
                self.store.mark_attempt(Instant::now(), version);
                return Err(Error::Internal(format!("scan task failed: {}", e)));
            }
        };

        for (name, e) in &refresh.failures {
            warn!(dir = %name, "scan failed, reporting directory as empty: {}", e);
            if let Some(metrics) = &self.metrics {
                metrics.inc_scan_errors(name);
            }
        }

        let result = refresh.result();
        let elapsed = started.elapsed();
        if let Some(metrics) = &self.metrics {
            metrics.observe_refresh(result, elapsed);
        }

        if result == RefreshResult::Failed && self.store.has_snapshot() {
            self.store.mark_attempt(Instant::now(), version);
            return Err(Error::RefreshFailed(format!(
                "all {} directories failed, keeping previous snapshot",
                refresh.failures.len()
            )));
        }

        debug!(
            scanned = refresh.scanned,
            failed = refresh.failures.len(),
            elapsed_ms = elapsed.as_millis() as u64,
            "refresh finished"
        );
        self.store.publish(refresh, Instant::now());
        Ok(result)
    }
}
