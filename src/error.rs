//! Error types for the directory statistics exporter

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the exporter
#[derive(Error, Debug)]
pub enum Error {
    /// A monitored directory could not be opened or traversed
    #[error("Cannot access {}: {source}", path.display())]
    PathAccess {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Configuration file could not be parsed
    #[error("Failed to parse configuration: {0}")]
    ConfigParse(#[from] serde_yaml::Error),

    /// A refresh is already running; only used to gate background work
    #[error("Refresh already in progress")]
    RefreshInProgress,

    /// Every configured directory failed during one refresh cycle
    #[error("Refresh failed: {0}")]
    RefreshFailed(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Self-metrics registration or encoding error
    #[error("Prometheus error: {0}")]
    Prometheus(#[from] prometheus::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Build a path access error for `path`
    pub fn path_access(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::PathAccess {
            path: path.into(),
            source,
        }
    }

    /// Errors that must stop the process before it serves traffic
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Config(_) | Error::ConfigParse(_))
    }
}
