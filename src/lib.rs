//! Laundry POS core.
//!
//! Order building, pricing and checkout for the counter, plus staff
//! attendance and the inactivity PIN lock. Front ends drive it through the
//! JSON handlers in [`commands`]; everything persists to a local SQLite
//! database.

use std::sync::Arc;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;

pub mod app;
pub mod auth;
pub mod change;
pub mod checkout;
pub mod commands;
pub mod config;
pub mod db;
pub mod error;
pub mod idle;
pub mod logging;
pub mod order;
pub mod order_history;
pub mod pricing;
pub mod scheduler;
pub mod settings;
pub mod shifts;
pub mod storage;

pub use app::{AppState, SessionContext};
pub use config::AppConfig;
pub use error::{PosError, PosResult};

/// First non-blank string under any of `keys`.
pub(crate) fn value_str(v: &serde_json::Value, keys: &[&str]) -> Option<String> {
    for key in keys {
        if let Some(s) = v.get(*key).and_then(|x| x.as_str()) {
            let trimmed = s.trim();
            if !trimmed.is_empty() {
                return Some(trimmed.to_string());
            }
        }
    }
    None
}

/// A running core: shared state plus the log writer guard.
pub struct App {
    pub state: Arc<AppState>,
    _log_guard: Option<WorkerGuard>,
}

impl App {
    pub fn shutdown(self) {
        self.state.stop_timers();
        info!("Laundry POS stopped");
    }
}

// ============================================================================
// Entry point
// ============================================================================

/// Set up logging, open the database, restore state and start the timers.
/// Call from inside a tokio runtime so the timers can run.
pub fn start(config: AppConfig) -> PosResult<App> {
    // A host that installed its own subscriber keeps it.
    let log_guard = match logging::init(&config.log_dir(), &config.log_filter) {
        Ok(guard) => Some(guard),
        Err(e) => {
            warn!(error = %e, "file logging not installed");
            None
        }
    };

    let db = Arc::new(db::init(&config.data_dir)?);
    let state = Arc::new(AppState::open(db, config));
    state.start_timers()?;

    Ok(App {
        state,
        _log_guard: log_guard,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_value_str_skips_blank_and_missing() {
        let v = json!({ "id": "  ", "userId": " u-1 ", "n": 3 });
        assert_eq!(value_str(&v, &["id", "userId"]).as_deref(), Some("u-1"));
        assert_eq!(value_str(&v, &["n", "missing"]), None);
    }

    #[tokio::test]
    async fn test_start_with_scratch_dir() {
        let dir = std::env::temp_dir().join(format!("laundry-pos-start-{}", uuid::Uuid::new_v4()));
        let config = AppConfig {
            data_dir: dir.clone(),
            ..AppConfig::default()
        };
        let app = start(config).unwrap();
        assert!(dir.join("laundry-pos.db").exists());
        assert!(app.state.session(&json!({})).is_err());
        app.shutdown();
        let _ = std::fs::remove_dir_all(&dir);
    }
}
