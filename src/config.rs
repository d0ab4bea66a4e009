//! Exporter configuration
//!
//! Loaded once at startup from a YAML file and treated as immutable, except
//! for the directory list which may be swapped on reload.
//!
//! ```yaml
//! service_port: "9999"
//! cache_time: 5
//! directories:
//!   - name: logs
//!     path: /var/log
//!     recursive: true
//! ```

use std::collections::HashSet;
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Deserializer};

use crate::error::{Error, Result};

// =============================================================================
// Directory Spec
// =============================================================================

/// A monitored directory
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DirectoryConfig {
    /// Value of the `dir` label
    #[serde(alias = "Name")]
    pub name: String,

    /// Filesystem path, also the per-metric key
    #[serde(alias = "Path")]
    pub path: PathBuf,

    /// Traverse the whole subtree instead of immediate entries only
    #[serde(default, alias = "Recursive")]
    pub recursive: bool,
}

impl DirectoryConfig {
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>, recursive: bool) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            recursive,
        }
    }

    /// Key under which this directory's values are stored
    pub fn key(&self) -> String {
        self.path.to_string_lossy().into_owned()
    }
}

// =============================================================================
// Exporter Config
// =============================================================================

/// Top-level configuration file contents
#[derive(Debug, Clone, Deserialize)]
pub struct ExporterConfig {
    /// TCP port to bind; may be left out when supplied on the command line
    #[serde(
        default,
        alias = "ServicePort",
        alias = "serviceport",
        deserialize_with = "port_as_string"
    )]
    pub service_port: String,

    /// Cache TTL in minutes; zero or negative means every scrape is stale
    #[serde(default, alias = "CacheTime", alias = "cachetime")]
    pub cache_time: i64,

    /// Monitored directories, in configuration order
    #[serde(default, alias = "Directories")]
    pub directories: Vec<DirectoryConfig>,
}

impl ExporterConfig {
    /// Read, parse and validate a configuration file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let config = Self::parse_file(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse and validate configuration from YAML text
    pub fn from_yaml_str(raw: &str) -> Result<Self> {
        let config = Self::parse_yaml(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a configuration file without validating it, so
    /// overrides can be applied first
    pub fn parse_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::parse_yaml(&raw)
    }

    /// Parse YAML text without validating it
    pub fn parse_yaml(raw: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(raw)?)
    }

    /// Check the invariants the rest of the exporter relies on
    pub fn validate(&self) -> Result<()> {
        self.port()?;

        if self.directories.is_empty() {
            return Err(Error::Config("no directories configured".into()));
        }

        let mut seen = HashSet::new();
        for dir in &self.directories {
            if dir.name.trim().is_empty() {
                return Err(Error::Config(format!(
                    "directory {} has an empty name",
                    dir.path.display()
                )));
            }
            if dir.path.as_os_str().is_empty() {
                return Err(Error::Config(format!(
                    "directory '{}' has an empty path",
                    dir.name
                )));
            }
            if !seen.insert(dir.path.as_path()) {
                return Err(Error::Config(format!(
                    "directory path {} is configured more than once",
                    dir.path.display()
                )));
            }
        }

        Ok(())
    }

    /// Parsed service port
    pub fn port(&self) -> Result<u16> {
        match self.service_port.trim().parse::<u16>() {
            Ok(0) | Err(_) => Err(Error::Config(format!(
                "invalid service port '{}'",
                self.service_port
            ))),
            Ok(port) => Ok(port),
        }
    }

    /// Socket address to bind on `host`
    pub fn listen_addr(&self, host: &str) -> Result<SocketAddr> {
        let ip: IpAddr = host
            .parse()
            .map_err(|e| Error::Config(format!("invalid listen host '{}': {}", host, e)))?;
        Ok(SocketAddr::new(ip, self.port()?))
    }

    /// Cache TTL, clamped at zero
    pub fn cache_ttl(&self) -> Duration {
        minutes_to_ttl(self.cache_time)
    }
}

/// Convert a TTL in minutes to a duration; zero or negative yields zero
pub fn minutes_to_ttl(minutes: i64) -> Duration {
    if minutes <= 0 {
        Duration::ZERO
    } else {
        Duration::from_secs(minutes as u64 * 60)
    }
}

/// Accept the port written either as a YAML string or a bare integer
fn port_as_string<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Port {
        Text(String),
        Number(u64),
    }

    Ok(match Port::deserialize(deserializer)? {
        Port::Text(s) => s,
        Port::Number(n) => n.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    const SAMPLE: &str = r#"
service_port: "9999"
cache_time: 5
directories:
  - name: logs
    path: /var/log
    recursive: true
  - name: spool
    path: /var/spool
"#;

    #[test]
    fn test_parse_sample() {
        let config = ExporterConfig::from_yaml_str(SAMPLE).unwrap();

        assert_eq!(config.service_port, "9999");
        assert_eq!(config.port().unwrap(), 9999);
        assert_eq!(config.cache_ttl(), Duration::from_secs(300));
        assert_eq!(config.directories.len(), 2);
        assert_eq!(
            config.directories[0],
            DirectoryConfig::new("logs", "/var/log", true)
        );
        // recursive defaults to false
        assert!(!config.directories[1].recursive);
    }

    #[test]
    fn test_parse_go_style_keys() {
        let raw = r#"
ServicePort: 9100
CacheTime: 0
Directories:
  - Name: tmp
    Path: /tmp
    Recursive: false
"#;
        let config = ExporterConfig::from_yaml_str(raw).unwrap();

        assert_eq!(config.port().unwrap(), 9100);
        assert_eq!(config.cache_ttl(), Duration::ZERO);
        assert_eq!(config.directories[0].name, "tmp");
    }

    #[test]
    fn test_negative_cache_time_clamps_to_zero() {
        assert_eq!(minutes_to_ttl(-3), Duration::ZERO);
        assert_eq!(minutes_to_ttl(0), Duration::ZERO);
        assert_eq!(minutes_to_ttl(2), Duration::from_secs(120));
    }

    #[test]
    fn test_invalid_port_rejected() {
        let raw = r#"
service_port: "http"
directories:
  - name: tmp
    path: /tmp
"#;
        assert_matches!(ExporterConfig::from_yaml_str(raw), Err(Error::Config(_)));

        let raw = r#"
service_port: "0"
directories:
  - name: tmp
    path: /tmp
"#;
        assert_matches!(ExporterConfig::from_yaml_str(raw), Err(Error::Config(_)));
    }

    #[test]
    fn test_missing_port_parses_but_fails_validation() {
        let raw = "directories:\n  - name: tmp\n    path: /tmp\n";

        let mut config = ExporterConfig::parse_yaml(raw).unwrap();
        assert!(config.service_port.is_empty());
        assert_matches!(config.validate(), Err(Error::Config(_)));
        assert_matches!(ExporterConfig::from_yaml_str(raw), Err(Error::Config(_)));

        config.service_port = "9100".into();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_duplicate_paths_rejected() {
        let raw = r#"
service_port: "9999"
directories:
  - name: a
    path: /tmp
  - name: b
    path: /tmp
"#;
        let err = ExporterConfig::from_yaml_str(raw).unwrap_err();
        assert!(err.is_fatal());
        assert!(err.to_string().contains("more than once"));
    }

    #[test]
    fn test_empty_directories_rejected() {
        let raw = "service_port: \"9999\"\n";
        assert_matches!(ExporterConfig::from_yaml_str(raw), Err(Error::Config(_)));
    }

    #[test]
    fn test_empty_name_rejected() {
        let raw = r#"
service_port: "9999"
directories:
  - name: ""
    path: /tmp
"#;
        assert_matches!(ExporterConfig::from_yaml_str(raw), Err(Error::Config(_)));
    }

    #[test]
    fn test_malformed_yaml() {
        assert_matches!(
            ExporterConfig::from_yaml_str("directories: [unterminated"),
            Err(Error::ConfigParse(_))
        );
    }

    #[test]
    fn test_missing_file() {
        let err = ExporterConfig::from_file("/nonexistent/dirstat/config.yml").unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_listen_addr() {
        let config = ExporterConfig::from_yaml_str(SAMPLE).unwrap();

        let addr = config.listen_addr("127.0.0.1").unwrap();
        assert_eq!(addr.to_string(), "127.0.0.1:9999");

        assert_matches!(config.listen_addr("localhost:"), Err(Error::Config(_)));
    }

    #[test]
    fn test_directory_key_is_path() {
        let dir = DirectoryConfig::new("logs", "/var/log", true);
        assert_eq!(dir.key(), "/var/log");
    }
}
