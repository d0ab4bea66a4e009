//! Metric Registry
//!
//! In-memory store of the metric definitions exposed by the exporter. One
//! [`MetricDefinition`] exists per [`MetricKind`]; refreshes swap its whole
//! `values` mapping rather than editing entries in place.
//!
//! The registry is not synchronized. The refresh coordinator owns the only
//! writable copy; readers take a clone, which only bumps `Arc` counts on the
//! value mappings, so a render never sees a mapping being rebuilt.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Prefix of every exposed metric name
pub const NAMESPACE: &str = "dirstat";

/// Key of the single `current_timestamp` value
pub const TIMESTAMP_KEY: &str = "ts";

// =============================================================================
// Metric Kinds
// =============================================================================

/// The metrics this exporter knows how to compute
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricKind {
    /// Number of files in a directory
    FilesInDir,
    /// Modification time of the oldest file in a directory
    OldestFileTime,
    /// Wall-clock time of the refresh that produced the snapshot
    CurrentTimestamp,
}

impl MetricKind {
    /// Every kind, in registration order
    pub const ALL: [MetricKind; 3] = [
        MetricKind::CurrentTimestamp,
        MetricKind::FilesInDir,
        MetricKind::OldestFileTime,
    ];

    /// Position in [`MetricKind::ALL`]
    pub fn index(&self) -> usize {
        match self {
            MetricKind::CurrentTimestamp => 0,
            MetricKind::FilesInDir => 1,
            MetricKind::OldestFileTime => 2,
        }
    }

    /// Metric name without namespace
    pub fn name(&self) -> &'static str {
        match self {
            MetricKind::FilesInDir => "files_in_dir",
            MetricKind::OldestFileTime => "oldest_file_time",
            MetricKind::CurrentTimestamp => "current_timestamp",
        }
    }

    pub fn help(&self) -> &'static str {
        match self {
            MetricKind::FilesInDir => "this counts all the files in a directory",
            MetricKind::OldestFileTime => {
                "displays the timestamp in unix time of the oldest file"
            }
            MetricKind::CurrentTimestamp => "the current timestamp in unix time.",
        }
    }

    pub fn metric_type(&self) -> MetricType {
        MetricType::Gauge
    }
}

impl std::fmt::Display for MetricKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Exposition type of a metric
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricType {
    Gauge,
}

impl std::fmt::Display for MetricType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MetricType::Gauge => write!(f, "gauge"),
        }
    }
}

// =============================================================================
// Values and Definitions
// =============================================================================

/// One labeled sample of a metric
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricValue {
    /// Unique key within the metric (the directory path)
    pub key: String,
    /// Label pairs; rendered sorted by name
    pub labels: BTreeMap<String, String>,
    pub value: i64,
}

impl MetricValue {
    pub fn new(key: impl Into<String>, value: i64) -> Self {
        Self {
            key: key.into(),
            labels: BTreeMap::new(),
            value,
        }
    }

    pub fn with_label(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(name.into(), value.into());
        self
    }
}

/// Mapping from value key to sample
pub type MetricValues = HashMap<String, MetricValue>;

/// A registered metric and its current samples
#[derive(Debug, Clone)]
pub struct MetricDefinition {
    pub kind: MetricKind,
    values: Arc<MetricValues>,
}

impl MetricDefinition {
    pub fn new(kind: MetricKind) -> Self {
        Self {
            kind,
            values: Arc::new(HashMap::new()),
        }
    }

    pub fn name(&self) -> &'static str {
        self.kind.name()
    }

    pub fn help(&self) -> &'static str {
        self.kind.help()
    }

    pub fn metric_type(&self) -> MetricType {
        self.kind.metric_type()
    }

    /// Fully qualified name, e.g. `dirstat_files_in_dir`
    pub fn full_name(&self) -> String {
        format!("{}_{}", NAMESPACE, self.name())
    }

    pub fn values(&self) -> &MetricValues {
        &self.values
    }

    /// Whether two definitions share the same value mapping allocation
    pub fn shares_values_with(&self, other: &MetricDefinition) -> bool {
        Arc::ptr_eq(&self.values, &other.values)
    }
}

// =============================================================================
// Registry
// =============================================================================

/// All metric definitions, one per kind, in registration order.
///
/// Definitions are stored at [`MetricKind::index`], so lookups cannot miss.
#[derive(Debug, Clone)]
pub struct Registry {
    definitions: Vec<MetricDefinition>,
}

impl Registry {
    /// Registry with every [`MetricKind`] registered and no values
    pub fn new() -> Self {
        Self {
            definitions: MetricKind::ALL.iter().map(|k| MetricDefinition::new(*k)).collect(),
        }
    }

    pub fn get(&self, kind: MetricKind) -> &MetricDefinition {
        &self.definitions[kind.index()]
    }

    /// Definitions in registration order
    pub fn definitions(&self) -> impl Iterator<Item = &MetricDefinition> {
        self.definitions.iter()
    }

    /// Swap the value mapping of `kind` for `values`.
    ///
    /// The old mapping is dropped, not merged: keys missing from `values`
    /// disappear from the metric.
    pub fn replace_values(&mut self, kind: MetricKind, values: MetricValues) {
        self.definitions[kind.index()].values = Arc::new(values);
    }

    /// Total number of samples across all metrics
    pub fn sample_count(&self) -> usize {
        self.definitions.iter().map(|d| d.values.len()).sum()
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}
