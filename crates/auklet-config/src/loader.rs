use std::path::Path;

use tracing::debug;

use crate::config::Config;
use crate::error::ConfigError;

/// Load and validate a config file. Absent fields take their documented
/// defaults, so an empty file is a valid (if useless) configuration.
pub fn load(path: &Path) -> Result<Config, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
        path: path.display().to_string(),
        source: e,
    })?;

    let config: Config = serde_yaml::from_str(&content).map_err(|e| ConfigError::YamlParse {
        path: path.display().to_string(),
        source: e,
    })?;

    config.validate()?;
    debug!(path = %path.display(), feed = %config.changestream.feed, "loaded config");
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(content: &str) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(content.as_bytes()).unwrap();
        f
    }

    #[test]
    fn defaults_match_documented_values() {
        let c = Config::default();
        assert_eq!(c.repair.max_repair, 5);
        assert_eq!(c.repair.segments_select_batch_size, 1);
        assert_eq!(c.repair.interval_secs, 300);
        assert_eq!(c.repair.dial_timeout_secs, 5);
        assert_eq!(c.repair.timeout_secs, 300);
        assert_eq!(c.repair.download_timeout_secs, 300);
        assert_eq!(c.repair.download_long_tail, 0);
        assert_eq!(c.repair.total_timeout_secs, 45 * 60);
        assert_eq!(c.repair.max_excess_rate_optimal_threshold, 0.05);
        assert_eq!(c.repair.online_window_secs, 4 * 60 * 60);
        assert!(c.repair.do_declumping);
        assert!(c.repair.do_placement_check);
        assert!(!c.repair.in_memory_repair);
        assert_eq!(c.queue.attempt_interval_secs, 6 * 60 * 60);
        assert_eq!(c.changestream.heartbeat_interval_ms, 60_000);
        assert_eq!(c.stats.staleness_secs, 24 * 60 * 60);
    }

    #[test]
    fn load_partial_yaml_fills_defaults() {
        let f = write_config(
            "repair:\n  max_repair: 12\nchangestream:\n  feed: segments-eu\n",
        );
        let c = load(f.path()).unwrap();
        assert_eq!(c.repair.max_repair, 12);
        assert_eq!(c.repair.segments_select_batch_size, 1);
        assert_eq!(c.changestream.feed, "segments-eu");
    }

    #[test]
    fn excess_multiplier() {
        let c = Config::default();
        assert_eq!(c.repair.excess_multiplier(), 1.05);
    }

    #[test]
    fn rejects_zero_max_repair() {
        let f = write_config("repair:\n  max_repair: 0\n");
        assert!(load(f.path()).is_err());
    }

    #[test]
    fn rejects_overlapping_placements() {
        let f = write_config(
            "repair:\n  included_placements: [1, 2]\n  excluded_placements: [2]\n",
        );
        assert!(load(f.path()).is_err());
    }

    #[test]
    fn rejects_unknown_fields() {
        let f = write_config("repair:\n  max_repairs_typo: 3\n");
        assert!(load(f.path()).is_err());
    }

    #[test]
    fn missing_file_returns_io_error() {
        assert!(load(Path::new("/nonexistent/auklet.yml")).is_err());
    }
}
