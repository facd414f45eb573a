//! Environment-driven configuration.

use std::path::PathBuf;
use std::time::Duration;

use crate::generator::DEFAULT_STALE_AFTER_DAYS;
use crate::monitor::DEFAULT_SCAN_INTERVAL;

/// Where readings are fetched from. Postgres wins when both are set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceConfig {
    Postgres { database_url: String },
    JsonFile { path: PathBuf },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkConfig {
    Amqp { url: String },
    TerminalBell,
    Log,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    pub source:         Option<SourceConfig>,
    pub sink:           SinkConfig,
    pub scan_interval:  Duration,
    pub stale_after:    chrono::Duration,
    pub standards_file: Option<PathBuf>,
}

impl EngineConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable lookup. Unparseable numbers fall back
    /// to their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let source = match (non_empty("DATABASE_URL"), non_empty("READINGS_FILE")) {
            (Some(database_url), _) => Some(SourceConfig::Postgres { database_url }),
            (None, Some(path)) => Some(SourceConfig::JsonFile { path: path.into() }),
            (None, None) => None,
        };

        let bell = non_empty("ALERT_BELL")
            .map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
            .unwrap_or(false);
        let sink = match non_empty("AMQP_URL") {
            Some(url) => SinkConfig::Amqp { url },
            None if bell => SinkConfig::TerminalBell,
            None => SinkConfig::Log,
        };

        let scan_interval = non_empty("SCAN_INTERVAL_SECS")
            .and_then(|s| s.parse::<u64>().ok())
            .filter(|s| *s > 0)
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_SCAN_INTERVAL);

        let stale_days = non_empty("STALE_AFTER_DAYS")
            .and_then(|s| s.parse::<i64>().ok())
            .filter(|d| *d > 0)
            .unwrap_or(DEFAULT_STALE_AFTER_DAYS);

        Self {
            source,
            sink,
            scan_interval,
            stale_after: chrono::Duration::days(stale_days),
            standards_file: non_empty("STANDARDS_FILE").map(PathBuf::from),
        }
    }
}
