//! Background timers.
//!
//! Every timer is a tokio task paired with a `CancellationToken`. Dropping
//! the [`TimerHandle`] cancels the task, so a timer never outlives the
//! screen or session that started it. Callback errors are logged and the
//! timer keeps running.

use chrono::Local;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::db::DbState;
use crate::error::{PosError, PosResult};
use crate::idle::IdleMonitor;
use crate::settings;
use crate::shifts;

/// Monotonic "now" that follows tokio's clock, so paused-time tests and
/// the idle monitor agree.
pub fn now() -> std::time::Instant {
    tokio::time::Instant::now().into_std()
}

pub struct TimerHandle {
    name: &'static str,
    token: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl TimerHandle {
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Cancel and wait for the task to finish its current callback.
    pub async fn shutdown(mut self) {
        self.token.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!(timer = self.name, error = %e, "timer task ended abnormally");
            }
        }
    }
}

impl Drop for TimerHandle {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

/// Run `f` every `period`, starting one period from now. Must be called
/// inside a tokio runtime.
pub fn spawn_interval<F>(name: &'static str, period: Duration, mut f: F) -> TimerHandle
where
    F: FnMut() -> PosResult<()> + Send + 'static,
{
    let token = CancellationToken::new();
    let child = token.clone();

    let task = tokio::spawn(async move {
        debug!(timer = name, period_ms = period.as_millis() as u64, "timer started");
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = child.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = f() {
                        warn!(timer = name, error = %e, "timer callback failed");
                    }
                }
            }
        }
        debug!(timer = name, "timer stopped");
    });

    TimerHandle {
        name,
        token,
        task: Some(task),
    }
}

// ---------------------------------------------------------------------------
// Concrete timers
// ---------------------------------------------------------------------------

/// Tick the idle monitor every `period`; `on_lock` runs once per lock.
pub fn spawn_idle_watcher<F>(
    monitor: Arc<Mutex<IdleMonitor>>,
    period: Duration,
    mut on_lock: F,
) -> TimerHandle
where
    F: FnMut() + Send + 'static,
{
    spawn_interval("idle-watcher", period, move || {
        let locked = monitor
            .lock()
            .map_err(|e| PosError::validation(format!("idle monitor poisoned: {e}")))?
            .tick(now());
        if locked {
            on_lock();
        }
        Ok(())
    })
}

/// Poll for shifts that ran past the store's hour cap and close them.
/// Settings are re-read every poll so toggling auto clock-out takes effect
/// without a restart.
pub fn spawn_shift_expiry_poll(db: Arc<DbState>, store_id: String, period: Duration) -> TimerHandle {
    info!(store_id = %store_id, period_secs = period.as_secs(), "shift expiry poll scheduled");
    spawn_interval("shift-expiry", period, move || {
        let shift_settings = settings::resolve_store_settings(db.as_ref(), &store_id).shift_settings;
        shifts::auto_clock_out_expired(db.as_ref(), &shift_settings, &store_id, Local::now())?;
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{self, DocumentStore};
    use crate::idle::IdleState;
    use crate::settings::STORE_SETTINGS_COLLECTION;
    use crate::shifts::{StaffShift, STAFF_SHIFTS_COLLECTION};
    use chrono::Utc;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test(start_paused = true)]
    async fn test_interval_runs_until_dropped() {
        let count = Arc::new(AtomicUsize::new(0));
        let seen = count.clone();
        let handle = spawn_interval("test", Duration::from_secs(10), move || {
            seen.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        tokio::time::sleep(Duration::from_secs(35)).await;
        assert_eq!(count.load(Ordering::SeqCst), 3);

        drop(handle);
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_errors_do_not_stop_the_timer() {
        let count = Arc::new(AtomicUsize::new(0));
        let seen = count.clone();
        let handle = spawn_interval("failing", Duration::from_secs(1), move || {
            seen.fetch_add(1, Ordering::SeqCst);
            Err(PosError::remote("unreachable"))
        });

        tokio::time::sleep(Duration::from_millis(4_500)).await;
        assert_eq!(count.load(Ordering::SeqCst), 4);
        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_watcher_locks_once() {
        let monitor = Arc::new(Mutex::new(IdleMonitor::new(1, false, now())));
        let locks = Arc::new(AtomicUsize::new(0));
        let seen = locks.clone();
        let handle = spawn_idle_watcher(monitor.clone(), Duration::from_secs(1), move || {
            seen.fetch_add(1, Ordering::SeqCst);
        });

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(monitor.lock().unwrap().state(), IdleState::Active);

        tokio::time::sleep(Duration::from_secs(45)).await;
        assert!(monitor.lock().unwrap().is_locked());
        assert_eq!(locks.load(Ordering::SeqCst), 1);
        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_shift_expiry_poll_closes_overdue_shift() {
        let db = Arc::new(db::open_in_memory().unwrap());
        db.set(
            STORE_SETTINGS_COLLECTION,
            "s1",
            &json!({ "shiftSettings": { "autoClockOut": true, "maxHoursPerShift": 8 } }),
        )
        .unwrap();

        let started = Utc::now() - chrono::Duration::hours(10);
        let shift = StaffShift {
            id: "sh1".into(),
            store_id: "s1".into(),
            user_id: "u1".into(),
            user_name: None,
            date: started.with_timezone(&Local).format("%Y-%m-%d").to_string(),
            clock_in: "08:00 AM".into(),
            clock_out: None,
            clock_in_iso: started,
            clock_out_iso: None,
            hours: None,
            auto_clock_in: false,
            auto_clock_out: false,
        };
        db.set(STAFF_SHIFTS_COLLECTION, "sh1", &serde_json::to_value(&shift).unwrap())
            .unwrap();

        let handle = spawn_shift_expiry_poll(db.clone(), "s1".into(), Duration::from_secs(60));
        tokio::time::sleep(Duration::from_secs(61)).await;
        handle.shutdown().await;

        let doc = db.get(STAFF_SHIFTS_COLLECTION, "sh1").unwrap().unwrap();
        assert_eq!(doc["autoClockOut"], true);
        assert_eq!(doc["hours"], 8.0);
    }
}
