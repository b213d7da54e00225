use std::path::PathBuf;
use std::time::Duration;

use crate::audit::DEFAULT_AUDIT_CAPACITY;

/// Runtime settings for a [`SchedulingService`](crate::service::SchedulingService).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoreConfig {
    /// Directory holding `careslot.wal`. `None` keeps the journal in memory.
    pub data_dir: Option<PathBuf>,
    /// Compact once this many events were appended since the last compaction.
    pub compact_threshold: u64,
    pub compact_interval: Duration,
    /// Longest a mutation waits to enter a per-doctor or per-resource critical section.
    pub lock_timeout: Duration,
    pub audit_capacity: usize,
    pub metrics_port: Option<u16>,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            compact_threshold: 1000,
            compact_interval: Duration::from_secs(30),
            lock_timeout: Duration::from_millis(2000),
            audit_capacity: DEFAULT_AUDIT_CAPACITY,
            metrics_port: None,
        }
    }
}

impl CoreConfig {
    /// Read `CARESLOT_*` variables; anything missing or unparseable keeps its default.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let parsed = |key: &str| lookup(key).and_then(|v| v.trim().parse::<u64>().ok());

        Self {
            data_dir: lookup("CARESLOT_DATA_DIR")
                .filter(|s| !s.trim().is_empty())
                .map(PathBuf::from),
            compact_threshold: parsed("CARESLOT_COMPACT_THRESHOLD")
                .unwrap_or(defaults.compact_threshold),
            compact_interval: parsed("CARESLOT_COMPACT_INTERVAL_SECS")
                .filter(|s| *s > 0)
                .map(Duration::from_secs)
                .unwrap_or(defaults.compact_interval),
            lock_timeout: parsed("CARESLOT_LOCK_TIMEOUT_MS")
                .filter(|ms| *ms > 0)
                .map(Duration::from_millis)
                .unwrap_or(defaults.lock_timeout),
            audit_capacity: parsed("CARESLOT_AUDIT_CAPACITY")
                .filter(|c| *c > 0)
                .map(|c| c as usize)
                .unwrap_or(defaults.audit_capacity),
            metrics_port: lookup("CARESLOT_METRICS_PORT").and_then(|s| s.trim().parse().ok()),
        }
    }

    pub fn wal_path(&self) -> Option<PathBuf> {
        self.data_dir.as_ref().map(|d| d.join("careslot.wal"))
    }
}
