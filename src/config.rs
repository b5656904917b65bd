//! Process configuration, read from the environment.

use std::path::PathBuf;
use std::time::Duration;

pub const ENV_DATA_DIR: &str = "LAUNDRY_POS_DATA_DIR";
pub const ENV_LOG_FILTER: &str = "LAUNDRY_POS_LOG_FILTER";
pub const ENV_SHIFT_POLL_SECS: &str = "LAUNDRY_POS_SHIFT_POLL_SECS";

pub const DEFAULT_LOG_FILTER: &str = "info,laundry_pos_lib=debug";
pub const DEFAULT_SHIFT_POLL_SECS: u64 = 60;
/// How often the idle monitor is ticked. Not configurable.
pub const IDLE_TICK: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    /// Holds `laundry-pos.db` and the `logs/` directory.
    pub data_dir: PathBuf,
    pub log_filter: String,
    pub shift_poll_interval: Duration,
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        Self {
            data_dir: non_empty(ENV_DATA_DIR)
                .map(PathBuf::from)
                .unwrap_or_else(default_data_dir),
            log_filter: non_empty(ENV_LOG_FILTER).unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string()),
            shift_poll_interval: Duration::from_secs(
                non_empty(ENV_SHIFT_POLL_SECS)
                    .and_then(|v| v.parse::<u64>().ok())
                    .filter(|secs| *secs > 0)
                    .unwrap_or(DEFAULT_SHIFT_POLL_SECS),
            ),
        }
    }

    pub fn log_dir(&self) -> PathBuf {
        self.data_dir.join("logs")
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self::from_lookup(|_| None)
    }
}

/// Platform data directory, falling back to the working directory.
fn default_data_dir() -> PathBuf {
    let base = std::env::var("LOCALAPPDATA")
        .or_else(|_| std::env::var("XDG_DATA_HOME"))
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            #[cfg(target_os = "windows")]
            {
                PathBuf::from(std::env::var("USERPROFILE").unwrap_or_else(|_| ".".into()))
                    .join("AppData")
                    .join("Local")
            }
            #[cfg(not(target_os = "windows"))]
            {
                PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()))
                    .join(".local")
                    .join("share")
            }
        });
    base.join("laundry-pos")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let cfg = AppConfig::from_lookup(lookup(&[]));
        assert_eq!(cfg.log_filter, DEFAULT_LOG_FILTER);
        assert_eq!(cfg.shift_poll_interval, Duration::from_secs(60));
        assert!(cfg.data_dir.ends_with("laundry-pos"));
    }

    #[test]
    fn test_overrides() {
        let cfg = AppConfig::from_lookup(lookup(&[
            (ENV_DATA_DIR, "/srv/pos"),
            (ENV_LOG_FILTER, "warn"),
            (ENV_SHIFT_POLL_SECS, "15"),
        ]));
        assert_eq!(cfg.data_dir, PathBuf::from("/srv/pos"));
        assert_eq!(cfg.log_dir(), PathBuf::from("/srv/pos/logs"));
        assert_eq!(cfg.log_filter, "warn");
        assert_eq!(cfg.shift_poll_interval, Duration::from_secs(15));
    }

    #[test]
    fn test_bad_poll_interval_falls_back() {
        for raw in ["0", "-5", "soon", "  "] {
            let cfg = AppConfig::from_lookup(lookup(&[(ENV_SHIFT_POLL_SECS, raw)]));
            assert_eq!(cfg.shift_poll_interval, Duration::from_secs(DEFAULT_SHIFT_POLL_SECS));
        }
    }
}
