use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

// Durations are stored as integer seconds in YAML; the accessor methods hand
// out std::time::Duration so callers never multiply units themselves.

/// Top-level configuration for the repair subsystem.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub repair: RepairConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub changestream: ChangeStreamConfig,
    #[serde(default)]
    pub stats: StatsConfig,
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.repair.max_repair == 0 {
            return Err(ConfigError::Invalid("repair.max_repair must be > 0".into()));
        }
        if self.repair.segments_select_batch_size == 0 {
            return Err(ConfigError::Invalid(
                "repair.segments_select_batch_size must be > 0".into(),
            ));
        }
        if self.changestream.feed.is_empty() {
            return Err(ConfigError::Invalid("changestream.feed must be set".into()));
        }
        for p in &self.repair.included_placements {
            if self.repair.excluded_placements.contains(p) {
                return Err(ConfigError::Invalid(format!(
                    "placement {p} is both included and excluded"
                )));
            }
        }
        Ok(())
    }
}

// ── Repair worker configuration ───────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RepairConfig {
    /// Max concurrent repair jobs.
    #[serde(default = "defaults::max_repair")]
    pub max_repair: usize,
    /// Segments fetched from the queue per dispatcher cycle.
    #[serde(default = "defaults::select_batch")]
    pub segments_select_batch_size: usize,
    /// Dispatcher cycle interval.
    #[serde(default = "defaults::interval_secs")]
    pub interval_secs: u64,
    /// Bound on a single peer dial.
    #[serde(default = "defaults::dial_timeout_secs")]
    pub dial_timeout_secs: u64,
    /// Bound on the upload phase.
    #[serde(default = "defaults::upload_timeout_secs")]
    pub timeout_secs: u64,
    /// Bound on a single piece fetch.
    #[serde(default = "defaults::download_timeout_secs")]
    pub download_timeout_secs: u64,
    /// Extra concurrent downloads beyond the minimum needed.
    #[serde(default)]
    pub download_long_tail: usize,
    /// Bound on one repair job, including queue-fetch latency.
    #[serde(default = "defaults::total_timeout_secs")]
    pub total_timeout_secs: u64,
    /// Upload target multiplier: request ceil(optimal * (1 + rate)) pieces.
    #[serde(default = "defaults::max_excess_rate")]
    pub max_excess_rate_optimal_threshold: f64,
    #[serde(default)]
    pub in_memory_repair: bool,
    #[serde(default)]
    pub in_memory_upload: bool,
    #[serde(default = "defaults::yes")]
    pub reputation_update_enabled: bool,
    #[serde(default = "defaults::yes")]
    pub do_declumping: bool,
    #[serde(default = "defaults::yes")]
    pub do_placement_check: bool,
    /// Node considered offline if last contact is older than this.
    #[serde(default = "defaults::online_window_secs")]
    pub online_window_secs: u64,
    #[serde(default)]
    pub excluded_country_codes: Vec<String>,
    #[serde(default)]
    pub included_placements: Vec<u16>,
    #[serde(default)]
    pub excluded_placements: Vec<u16>,
    #[serde(default = "defaults::participating_node_cache")]
    pub participating_node_cache: CacheConfig,
    #[serde(default = "defaults::nodes_for_repair_cache")]
    pub nodes_for_repair_cache: CacheConfig,
}

impl RepairConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn dial_timeout(&self) -> Duration {
        Duration::from_secs(self.dial_timeout_secs)
    }

    pub fn upload_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn download_timeout(&self) -> Duration {
        Duration::from_secs(self.download_timeout_secs)
    }

    pub fn total_timeout(&self) -> Duration {
        Duration::from_secs(self.total_timeout_secs)
    }

    pub fn online_window(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.online_window_secs as i64)
    }

    pub fn excess_multiplier(&self) -> f64 {
        1.0 + self.max_excess_rate_optimal_threshold
    }
}

impl Default for RepairConfig {
    fn default() -> Self {
        RepairConfig {
            max_repair: defaults::max_repair(),
            segments_select_batch_size: defaults::select_batch(),
            interval_secs: defaults::interval_secs(),
            dial_timeout_secs: defaults::dial_timeout_secs(),
            timeout_secs: defaults::upload_timeout_secs(),
            download_timeout_secs: defaults::download_timeout_secs(),
            download_long_tail: 0,
            total_timeout_secs: defaults::total_timeout_secs(),
            max_excess_rate_optimal_threshold: defaults::max_excess_rate(),
            in_memory_repair: false,
            in_memory_upload: false,
            reputation_update_enabled: true,
            do_declumping: true,
            do_placement_check: true,
            online_window_secs: defaults::online_window_secs(),
            excluded_country_codes: Vec::new(),
            included_placements: Vec::new(),
            excluded_placements: Vec::new(),
            participating_node_cache: CacheConfig::default(),
            nodes_for_repair_cache: CacheConfig::default(),
        }
    }
}

/// Read-through node cache settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct CacheConfig {
    #[serde(default = "defaults::yes")]
    pub enabled: bool,
    /// Background refresh interval.
    #[serde(default = "defaults::cache_interval_secs")]
    pub interval_secs: u64,
    /// Hard-block threshold: reads fail rather than serve data older than this.
    #[serde(default = "defaults::cache_stale_secs")]
    pub stale_secs: u64,
}

impl CacheConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn stale(&self) -> Duration {
        Duration::from_secs(self.stale_secs)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig {
            enabled: true,
            interval_secs: defaults::cache_interval_secs(),
            stale_secs: defaults::cache_stale_secs(),
        }
    }
}

// ── Queue configuration ───────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct QueueConfig {
    /// A selected segment is not re-selectable until this much time passed.
    #[serde(default = "defaults::attempt_interval_secs")]
    pub attempt_interval_secs: u64,
    /// Entries not re-reported unhealthy within this window are purged.
    #[serde(default = "defaults::clean_before_days")]
    pub clean_before_days: u32,
}

impl QueueConfig {
    pub fn attempt_interval(&self) -> Duration {
        Duration::from_secs(self.attempt_interval_secs)
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        QueueConfig {
            attempt_interval_secs: defaults::attempt_interval_secs(),
            clean_before_days: defaults::clean_before_days(),
        }
    }
}

// ── Change-stream configuration ───────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChangeStreamConfig {
    /// Named change-stream instance; scopes the partition metadata table.
    #[serde(default = "defaults::feed")]
    pub feed: String,
    #[serde(default = "defaults::heartbeat_ms")]
    pub heartbeat_interval_ms: u64,
    /// RFC3339 start timestamp for the genesis partition on first run.
    /// Absent means "start from now".
    #[serde(default)]
    pub start_from: Option<chrono::DateTime<chrono::Utc>>,
}

impl ChangeStreamConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }
}

impl Default for ChangeStreamConfig {
    fn default() -> Self {
        ChangeStreamConfig {
            feed: defaults::feed(),
            heartbeat_interval_ms: defaults::heartbeat_ms(),
            start_from: None,
        }
    }
}

// ── Statistics chore configuration ────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StatsConfig {
    #[serde(default = "defaults::stats_interval_secs")]
    pub interval_secs: u64,
    /// Stop publishing gauges when the last successful refresh is older.
    #[serde(default = "defaults::stats_staleness_secs")]
    pub staleness_secs: u64,
}

impl StatsConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn staleness(&self) -> Duration {
        Duration::from_secs(self.staleness_secs)
    }
}

impl Default for StatsConfig {
    fn default() -> Self {
        StatsConfig {
            interval_secs: defaults::stats_interval_secs(),
            staleness_secs: defaults::stats_staleness_secs(),
        }
    }
}

mod defaults {
    use super::CacheConfig;

    pub fn max_repair() -> usize {
        5
    }
    pub fn select_batch() -> usize {
        1
    }
    pub fn interval_secs() -> u64 {
        300
    }
    pub fn dial_timeout_secs() -> u64 {
        5
    }
    pub fn upload_timeout_secs() -> u64 {
        300
    }
    pub fn download_timeout_secs() -> u64 {
        300
    }
    pub fn total_timeout_secs() -> u64 {
        45 * 60
    }
    pub fn max_excess_rate() -> f64 {
        0.05
    }
    pub fn online_window_secs() -> u64 {
        4 * 60 * 60
    }
    pub fn yes() -> bool {
        true
    }
    pub fn cache_interval_secs() -> u64 {
        5 * 60
    }
    pub fn cache_stale_secs() -> u64 {
        10 * 60
    }
    pub fn participating_node_cache() -> CacheConfig {
        CacheConfig::default()
    }
    pub fn nodes_for_repair_cache() -> CacheConfig {
        CacheConfig::default()
    }
    pub fn attempt_interval_secs() -> u64 {
        6 * 60 * 60
    }
    pub fn clean_before_days() -> u32 {
        2
    }
    pub fn feed() -> String {
        "segments".to_string()
    }
    pub fn heartbeat_ms() -> u64 {
        60_000
    }
    pub fn stats_interval_secs() -> u64 {
        60
    }
    pub fn stats_staleness_secs() -> u64 {
        24 * 60 * 60
    }
}
