//! regionsync.toml configuration parser.
//!
//! Every field has a default, so an empty file yields [`SyncConfig::default`].

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::geometry::OverlapPolicy;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub debounce: DebounceConfig,
    pub remote: RemoteConfig,
    pub grid: GridConfig,
    pub queue: QueueConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DebounceConfig {
    /// Quiet period before a coalesced write is persisted.
    pub window_ms: u64,
}

impl Default for DebounceConfig {
    fn default() -> Self {
        Self { window_ms: 500 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    /// Per-call timeout; an expired call counts as a retryable failure.
    pub request_timeout_ms: u64,
    /// Total attempts per call, including the first.
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: 15_000,
            max_attempts: 4,
            initial_backoff_ms: 200,
            max_backoff_ms: 5_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GridConfig {
    pub overlap: OverlapPolicy,
    /// Row span used when an insert does not specify one.
    pub default_row_span: u32,
    /// Column span used when an insert does not specify one.
    pub default_col_span: u32,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            overlap: OverlapPolicy::Allow,
            default_row_span: 4,
            default_col_span: 4,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// redb file for the offline queue. `None` keeps the queue in memory.
    pub path: Option<PathBuf>,
}

impl SyncConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: SyncConfig = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn debounce_window(&self) -> Duration {
        Duration::from_millis(self.debounce.window_ms)
    }
}

impl RemoteConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_uses_defaults() {
        let config: SyncConfig = toml::from_str("").unwrap();
        assert_eq!(config, SyncConfig::default());
        assert_eq!(config.debounce_window(), Duration::from_millis(500));
        assert_eq!(config.grid.overlap, OverlapPolicy::Allow);
    }

    #[test]
    fn parse_partial() {
        let toml_str = r#"
[debounce]
window_ms = 250

[grid]
overlap = "reject"

[queue]
path = "/tmp/queue.redb"
"#;
        let config: SyncConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.debounce.window_ms, 250);
        assert_eq!(config.grid.overlap, OverlapPolicy::Reject);
        assert_eq!(config.grid.default_col_span, 4);
        assert_eq!(config.remote.max_attempts, 4);
        assert_eq!(config.queue.path, Some(PathBuf::from("/tmp/queue.redb")));
    }

    #[test]
    fn toml_round_trip_keeps_sections() {
        let toml_str = SyncConfig::default().to_toml_string().unwrap();
        assert!(toml_str.contains("[debounce]"));
        assert!(toml_str.contains("request_timeout_ms"));
        let parsed: SyncConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed, SyncConfig::default());
    }
}
