//! Process-wide state shared by the command handlers and the timers.

use serde_json::Value;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, warn};

use crate::checkout::CheckoutFlow;
use crate::config::{AppConfig, IDLE_TICK};
use crate::db::DbState;
use crate::error::{PosError, PosResult};
use crate::idle::{IdleMonitor, IdleState};
use crate::order::OrderStore;
use crate::scheduler::{self, TimerHandle};
use crate::settings::{self, StoreSettings};
use crate::storage;
use crate::value_str;

/// Who is working and where. Every order and shift write is scoped by it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionContext {
    pub user_id: String,
    pub user_name: Option<String>,
    pub store_id: String,
    pub admin_id: String,
}

pub struct AppState {
    pub db: Arc<DbState>,
    pub order: Mutex<OrderStore>,
    pub checkout: Mutex<CheckoutFlow>,
    pub idle: Arc<Mutex<IdleMonitor>>,
    config: AppConfig,
    settings: Mutex<StoreSettings>,
    timers: Mutex<Vec<TimerHandle>>,
}

fn poisoned<T>(what: &'static str) -> impl FnOnce(T) -> PosError {
    move |_| PosError::validation(format!("{what} state lock poisoned"))
}

impl AppState {
    /// Restore the in-progress order and the settings of the selected store.
    pub fn open(db: Arc<DbState>, config: AppConfig) -> Self {
        let settings = match storage::get_item(&db, storage::KEY_SELECTED_STORE_ID) {
            Ok(Some(store_id)) => settings::resolve_store_settings(db.as_ref(), &store_id),
            Ok(None) => StoreSettings::default(),
            Err(e) => {
                warn!(error = %e, "could not read selected store, using default settings");
                StoreSettings::default()
            }
        };
        let order = OrderStore::load(db.clone(), &settings);
        let idle = IdleMonitor::new(
            settings.idle_timeout_minutes,
            settings.shift_settings.auto_clock_in,
            scheduler::now(),
        );
        Self {
            db,
            order: Mutex::new(order),
            checkout: Mutex::new(CheckoutFlow::new()),
            idle: Arc::new(Mutex::new(idle)),
            config,
            settings: Mutex::new(settings),
            timers: Mutex::new(Vec::new()),
        }
    }

    pub fn order(&self) -> PosResult<MutexGuard<'_, OrderStore>> {
        self.order.lock().map_err(poisoned("order"))
    }

    pub fn checkout(&self) -> PosResult<MutexGuard<'_, CheckoutFlow>> {
        self.checkout.lock().map_err(poisoned("checkout"))
    }

    pub fn idle(&self) -> PosResult<MutexGuard<'_, IdleMonitor>> {
        self.idle.lock().map_err(poisoned("idle"))
    }

    /// Refuse work while the screen is locked or the session was ended by
    /// failed PIN attempts.
    pub fn ensure_unlocked(&self) -> PosResult<()> {
        match self.idle()?.state() {
            IdleState::Locked { .. } => Err(PosError::unauthorized(
                "Screen is locked. Enter your PIN to continue",
            )),
            IdleState::LoggedOut => Err(PosError::unauthorized("Signed out. Log in again")),
            IdleState::Active | IdleState::Disabled => Ok(()),
        }
    }

    pub fn settings(&self) -> PosResult<StoreSettings> {
        Ok(self.settings.lock().map_err(poisoned("settings"))?.clone())
    }

    /// Re-read the store settings and push them into the order and the
    /// idle monitor.
    pub fn refresh_settings(&self, store_id: &str) -> PosResult<StoreSettings> {
        let fresh = settings::resolve_store_settings(self.db.as_ref(), store_id);
        self.order()?.apply_settings(&fresh);
        {
            let mut idle = self.idle()?;
            idle.set_timeout_minutes(fresh.idle_timeout_minutes, scheduler::now());
            idle.set_auto_clock_in(fresh.shift_settings.auto_clock_in);
        }
        *self.settings.lock().map_err(poisoned("settings"))? = fresh.clone();
        info!(store_id, "store settings applied");
        Ok(fresh)
    }

    /// Resolve the session, letting explicit payload fields win over what
    /// is stored locally.
    pub fn session(&self, payload: &Value) -> PosResult<SessionContext> {
        let user: Option<Value> = storage::get_json(&self.db, storage::KEY_USER_DATA)?;
        let store: Option<Value> = storage::get_json(&self.db, storage::KEY_SELECTED_STORE)?;

        let user_id = value_str(payload, &["userId", "user_id"])
            .or_else(|| user.as_ref().and_then(|u| value_str(u, &["id", "userId", "uid"])))
            .ok_or_else(|| PosError::unauthorized("No signed-in user"))?;
        let user_name = value_str(payload, &["userName", "user_name"])
            .or_else(|| user.as_ref().and_then(|u| value_str(u, &["name", "displayName"])));
        let store_id = match value_str(payload, &["storeId", "store_id"]) {
            Some(id) => id,
            None => storage::get_item(&self.db, storage::KEY_SELECTED_STORE_ID)?
                .filter(|s| !s.trim().is_empty())
                .ok_or_else(|| PosError::validation("No store selected"))?,
        };
        // Stores belong to an admin account; an admin working their own
        // store is their own admin.
        let admin_id = value_str(payload, &["adminId", "admin_id"])
            .or_else(|| store.as_ref().and_then(|s| value_str(s, &["adminId", "ownerId"])))
            .or_else(|| user.as_ref().and_then(|u| value_str(u, &["adminId"])))
            .unwrap_or_else(|| user_id.clone());

        Ok(SessionContext {
            user_id,
            user_name,
            store_id,
            admin_id,
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Start the idle watcher and, when a store is selected, the shift
    /// expiry poll. Replaces any timers already running. Outside a tokio
    /// runtime this does nothing.
    pub fn start_timers(&self) -> PosResult<()> {
        if tokio::runtime::Handle::try_current().is_err() {
            debug!("no async runtime, timers not started");
            return Ok(());
        }
        let mut timers = self.timers.lock().map_err(poisoned("timers"))?;
        timers.clear();

        timers.push(scheduler::spawn_idle_watcher(
            self.idle.clone(),
            IDLE_TICK,
            || info!("idle lock engaged, clock stopped"),
        ));

        if let Some(store_id) = storage::get_item(&self.db, storage::KEY_SELECTED_STORE_ID)? {
            timers.push(scheduler::spawn_shift_expiry_poll(
                self.db.clone(),
                store_id,
                self.config.shift_poll_interval,
            ));
        }
        info!(count = timers.len(), "timers started");
        Ok(())
    }

    pub fn stop_timers(&self) {
        match self.timers.lock() {
            Ok(mut timers) => timers.clear(),
            Err(e) => warn!(error = %e, "timer list poisoned"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{self, DocumentStore};
    use crate::settings::STORE_SETTINGS_COLLECTION;
    use serde_json::json;

    fn state() -> AppState {
        AppState::open(Arc::new(db::open_in_memory().unwrap()), AppConfig::default())
    }

    #[test]
    fn test_session_from_storage() {
        let app = state();
        assert!(app.session(&json!({})).is_err());

        storage::start_session(&app.db, &json!({ "id": "u1", "name": "Ana" }), "t", "s1")
            .unwrap();
        storage::set_json(&app.db, storage::KEY_SELECTED_STORE, &json!({ "adminId": "a9" }))
            .unwrap();

        let ctx = app.session(&json!({})).unwrap();
        assert_eq!(ctx.user_id, "u1");
        assert_eq!(ctx.user_name.as_deref(), Some("Ana"));
        assert_eq!(ctx.store_id, "s1");
        assert_eq!(ctx.admin_id, "a9");
    }

    #[test]
    fn test_payload_overrides_and_admin_fallback() {
        let app = state();
        let ctx = app
            .session(&json!({ "userId": "u2", "storeId": "s2" }))
            .unwrap();
        assert_eq!(ctx.store_id, "s2");
        assert_eq!(ctx.admin_id, "u2");
    }

    #[test]
    fn test_refresh_settings_updates_idle_and_order() {
        let app = state();
        app.db
            .set(
                STORE_SETTINGS_COLLECTION,
                "s1",
                &json!({ "idleTimeoutMinutes": 0, "taxSettings": { "tax1": { "name": "VAT", "rate": 20 } } }),
            )
            .unwrap();
        let fresh = app.refresh_settings("s1").unwrap();
        assert_eq!(fresh.idle_timeout_minutes, 0);
        assert!(app.idle().unwrap().timeout().is_none());
        assert_eq!(app.order().unwrap().state().tax_settings.active().len(), 1);
        assert_eq!(app.settings().unwrap(), fresh);
    }

    #[test]
    fn test_ensure_unlocked_follows_idle_state() {
        let app = state();
        assert!(app.ensure_unlocked().is_ok());

        let later = scheduler::now() + std::time::Duration::from_secs(5 * 60 + 1);
        assert!(app.idle().unwrap().tick(later));
        let err = app.ensure_unlocked().unwrap_err();
        assert!(matches!(err, PosError::Unauthorized(_)));
    }
}
