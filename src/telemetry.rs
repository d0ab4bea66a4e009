//! Exporter self-instrumentation
//!
//! Counters about the exporter itself, kept in a private `prometheus`
//! registry and appended after the directory metrics on each scrape.

use std::time::Duration;

use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};

use crate::error::Result;

/// Outcome label of a completed refresh
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshResult {
    /// Every directory scanned
    Ok,
    /// Some directories failed to scan
    Partial,
    /// No directory could be scanned
    Failed,
}

impl RefreshResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            RefreshResult::Ok => "ok",
            RefreshResult::Partial => "partial",
            RefreshResult::Failed => "failed",
        }
    }
}

/// Self-metrics of the exporter
#[derive(Clone)]
pub struct ExporterMetrics {
    registry: Registry,
    scrapes: IntCounter,
    refreshes: IntCounterVec,
    refresh_duration: Histogram,
    scan_errors: IntCounterVec,
    refresh_in_progress: IntGauge,
}

impl ExporterMetrics {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let scrapes = IntCounter::with_opts(Opts::new(
            "dirstat_exporter_scrapes_total",
            "Total number of scrapes served",
        ))?;
        let refreshes = IntCounterVec::new(
            Opts::new(
                "dirstat_exporter_refreshes_total",
                "Total number of completed refreshes by result",
            ),
            &["result"],
        )?;
        let refresh_duration = Histogram::with_opts(
            HistogramOpts::new(
                "dirstat_exporter_refresh_duration_seconds",
                "Time spent scanning all directories in one refresh",
            )
            .buckets(vec![0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0, 30.0, 60.0]),
        )?;
        let scan_errors = IntCounterVec::new(
            Opts::new(
                "dirstat_exporter_scan_errors_total",
                "Total number of directory scans that failed",
            ),
            &["dir"],
        )?;
        let refresh_in_progress = IntGauge::with_opts(Opts::new(
            "dirstat_exporter_refresh_in_progress",
            "Whether a refresh is currently running",
        ))?;

        registry.register(Box::new(scrapes.clone()))?;
        registry.register(Box::new(refreshes.clone()))?;
        registry.register(Box::new(refresh_duration.clone()))?;
        registry.register(Box::new(scan_errors.clone()))?;
        registry.register(Box::new(refresh_in_progress.clone()))?;

        Ok(Self {
            registry,
            scrapes,
            refreshes,
            refresh_duration,
            scan_errors,
            refresh_in_progress,
        })
    }

    pub fn inc_scrapes(&self) {
        self.scrapes.inc();
    }

    pub fn scrapes(&self) -> u64 {
        self.scrapes.get()
    }

    pub fn observe_refresh(&self, result: RefreshResult, elapsed: Duration) {
        self.refreshes.with_label_values(&[result.as_str()]).inc();
        self.refresh_duration.observe(elapsed.as_secs_f64());
    }

    pub fn refreshes(&self, result: RefreshResult) -> u64 {
        self.refreshes.with_label_values(&[result.as_str()]).get()
    }

    pub fn inc_scan_errors(&self, dir: &str) {
        self.scan_errors.with_label_values(&[dir]).inc();
    }

    pub fn scan_errors(&self, dir: &str) -> u64 {
        self.scan_errors.with_label_values(&[dir]).get()
    }

    pub fn set_refresh_in_progress(&self, running: bool) {
        self.refresh_in_progress.set(i64::from(running));
    }

    /// Render in the text exposition format
    pub fn encode(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer)
            .map_err(|e| crate::error::Error::Internal(format!("non-utf8 metrics: {}", e)))
    }
}
