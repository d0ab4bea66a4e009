//! Directory Statistics Exporter
//!
//! Exposes per-directory file counts and oldest-file modification times as
//! Prometheus gauges. Directory scans are expensive, so results are cached
//! for a configurable TTL and served stale while a single background
//! refresh recomputes them.
//!
//! # Architecture
//!
//! ```text
//! GET /metrics → RefreshCoordinator ─(refresh)→ DirectoryScanner
//!                       │                             │
//!                       ▼                             ▼
//!                 MetricStore ◀────── publish ─── fresh values
//!                       │
//!                       ▼
//!                 Text Exporter → response body
//! ```
//!
//! # Modules
//!
//! - [`config`] - YAML configuration and validation
//! - [`coordinator`] - Cache state machine and single-flight refresh
//! - [`error`] - Error types
//! - [`exporter`] - Prometheus text rendering
//! - [`registry`] - Metric definitions and their values
//! - [`scanner`] - Filesystem directory scanning
//! - [`server`] - HTTP surface
//! - [`telemetry`] - Self-metrics of the exporter

pub mod config;
pub mod coordinator;
pub mod error;
pub mod exporter;
pub mod registry;
pub mod scanner;
pub mod server;
pub mod telemetry;

// Re-export commonly used types
pub use config::{DirectoryConfig, ExporterConfig};
pub use coordinator::{CacheStatus, RefreshCoordinator, RefreshDecision, ScrapeOutcome};
pub use error::{Error, Result};
pub use registry::{MetricKind, Registry};
pub use scanner::{DirStats, DirectoryScanner, FsScanner};
pub use telemetry::ExporterMetrics;
