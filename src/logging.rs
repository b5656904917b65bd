//! Structured logging: console plus a daily rolling file.

use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::error::{PosError, PosResult};

const LOG_FILE_PREFIX: &str = "laundry-pos";
const MAX_LOG_FILES: usize = 14;

/// Install the global subscriber. `RUST_LOG` wins over `default_filter`.
/// Keep the returned guard alive for the life of the process; dropping it
/// flushes and stops the file writer.
pub fn init(log_dir: &Path, default_filter: &str) -> PosResult<WorkerGuard> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    fs::create_dir_all(log_dir)
        .map_err(|e| PosError::validation(format!("cannot create log dir: {e}")))?;
    prune_old_logs(log_dir, MAX_LOG_FILES);

    let file_appender = tracing_appender::rolling::daily(log_dir, LOG_FILE_PREFIX);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let file_layer = fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_target(true);
    let console_layer = fmt::layer().with_target(true);
    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| PosError::validation(format!("logging already initialised: {e}")))?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        git_sha = env!("BUILD_GIT_SHA"),
        built = env!("BUILD_TIMESTAMP"),
        log_dir = %log_dir.display(),
        "Starting Laundry POS"
    );
    Ok(guard)
}

/// Delete rolled log files beyond the newest `keep`.
pub fn prune_old_logs(log_dir: &Path, keep: usize) -> usize {
    let Ok(entries) = fs::read_dir(log_dir) else {
        return 0;
    };

    let mut log_files: Vec<(PathBuf, std::time::SystemTime)> = entries
        .flatten()
        .filter(|entry| {
            entry.path().is_file()
                && entry
                    .file_name()
                    .to_str()
                    .is_some_and(|name| name.starts_with(LOG_FILE_PREFIX))
        })
        .map(|entry| {
            let modified = entry
                .metadata()
                .ok()
                .and_then(|m| m.modified().ok())
                .unwrap_or(std::time::UNIX_EPOCH);
            (entry.path(), modified)
        })
        .collect();

    // newest first
    log_files.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| b.0.cmp(&a.0)));

    let mut removed = 0;
    for (path, _) in log_files.iter().skip(keep) {
        match fs::remove_file(path) {
            Ok(()) => removed += 1,
            Err(e) => warn!("Failed to prune log file {}: {e}", path.display()),
        }
    }
    removed
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_dir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("laundry-pos-logs-{}", uuid::Uuid::new_v4()));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_prune_keeps_newest_and_ignores_other_files() {
        let dir = scratch_dir();
        for day in 1..=5 {
            fs::write(dir.join(format!("{LOG_FILE_PREFIX}.2026-03-0{day}")), "x").unwrap();
        }
        fs::write(dir.join("notes.txt"), "keep me").unwrap();

        let removed = prune_old_logs(&dir, 3);
        assert_eq!(removed, 2);

        let remaining = fs::read_dir(&dir).unwrap().count();
        assert_eq!(remaining, 4);
        assert!(dir.join("notes.txt").exists());
        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_prune_missing_dir() {
        let dir = std::env::temp_dir().join("laundry-pos-no-such-dir-for-test");
        assert_eq!(prune_old_logs(&dir, 3), 0);
    }
}
