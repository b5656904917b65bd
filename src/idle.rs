//! Inactivity lock.
//!
//! ```text
//! Active --(no input for timeout)--> Locked --(correct PIN)--> Active
//!                                       \--(3 wrong PINs)--> LoggedOut
//! ```
//!
//! Input events are debounced: a burst of events resets the idle clock once,
//! one second after the last event. A timeout of 0 disables the monitor.
//! The monitor is a plain state machine driven by explicit `now` values; the
//! scheduler feeds it real time.

use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::auth;
use crate::error::{PosError, PosResult};

pub const PIN_MAX_ATTEMPTS: u32 = 3;
pub const ACTIVITY_DEBOUNCE: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ActivityEvent {
    Pointer,
    Keyboard,
    Touch,
    Scroll,
    Click,
}

impl ActivityEvent {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pointer" | "pointermove" | "mousemove" | "mousedown" => Some(Self::Pointer),
            "keyboard" | "keydown" | "keypress" => Some(Self::Keyboard),
            "touch" | "touchstart" | "touchmove" => Some(Self::Touch),
            "scroll" | "wheel" => Some(Self::Scroll),
            "click" => Some(Self::Click),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "camelCase")]
pub enum IdleState {
    Disabled,
    Active,
    Locked { attempts: u32 },
    LoggedOut,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "camelCase")]
pub enum UnlockOutcome {
    Unlocked,
    /// PIN accepted and the staff member has no open shift; the caller
    /// should clock them in.
    AutoClockIn,
    Retry { remaining: u32 },
    ForcedLogout,
}

#[derive(Debug, Clone)]
pub struct IdleMonitor {
    timeout: Option<Duration>,
    state: IdleState,
    last_activity: Instant,
    pending_activity: Option<Instant>,
    clock_stopped: bool,
    auto_clock_in: bool,
}

impl IdleMonitor {
    pub fn new(timeout_minutes: u32, auto_clock_in: bool, now: Instant) -> Self {
        let mut monitor = Self {
            timeout: None,
            state: IdleState::Disabled,
            last_activity: now,
            pending_activity: None,
            clock_stopped: false,
            auto_clock_in,
        };
        monitor.set_timeout_minutes(timeout_minutes, now);
        monitor
    }

    pub fn state(&self) -> IdleState {
        self.state
    }

    pub fn is_locked(&self) -> bool {
        matches!(self.state, IdleState::Locked { .. })
    }

    /// Raised while locked, for the "clock stopped" banner.
    pub fn clock_stopped(&self) -> bool {
        self.clock_stopped
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Change the timeout. 0 disables the monitor; a positive value
    /// re-enables it from a disabled state.
    pub fn set_timeout_minutes(&mut self, minutes: u32, now: Instant) {
        if minutes == 0 {
            self.timeout = None;
            if self.state != IdleState::LoggedOut {
                self.state = IdleState::Disabled;
                self.clock_stopped = false;
            }
            return;
        }
        self.timeout = Some(Duration::from_secs(u64::from(minutes) * 60));
        if self.state == IdleState::Disabled {
            self.state = IdleState::Active;
            self.last_activity = now;
            self.pending_activity = None;
        }
    }

    pub fn set_auto_clock_in(&mut self, enabled: bool) {
        self.auto_clock_in = enabled;
    }

    /// Note an input event. Ignored unless active.
    pub fn record_activity(&mut self, event: ActivityEvent, now: Instant) -> bool {
        if self.state != IdleState::Active {
            return false;
        }
        debug!(?event, "activity");
        self.pending_activity = Some(now);
        true
    }

    /// Advance the clock. Returns `true` when this call locked the screen.
    pub fn tick(&mut self, now: Instant) -> bool {
        if self.state != IdleState::Active {
            return false;
        }
        let Some(timeout) = self.timeout else {
            return false;
        };

        if let Some(last_event) = self.pending_activity {
            if now.saturating_duration_since(last_event) >= ACTIVITY_DEBOUNCE {
                self.last_activity = now;
                self.pending_activity = None;
            }
        }

        if now.saturating_duration_since(self.last_activity) >= timeout {
            self.state = IdleState::Locked { attempts: 0 };
            self.pending_activity = None;
            self.clock_stopped = true;
            info!(idle_secs = timeout.as_secs(), "screen locked after inactivity");
            return true;
        }
        false
    }

    /// Try to unlock with `pin`. `verify` checks the PIN against the stored
    /// hash; store failures are returned without using up an attempt.
    pub fn submit_pin<F>(
        &mut self,
        pin: &str,
        has_open_shift: bool,
        now: Instant,
        verify: F,
    ) -> PosResult<UnlockOutcome>
    where
        F: FnOnce(&str) -> PosResult<bool>,
    {
        let IdleState::Locked { attempts } = self.state else {
            return Err(PosError::validation("Screen is not locked"));
        };
        auth::validate_pin(pin)?;

        if verify(pin)? {
            self.state = IdleState::Active;
            self.last_activity = now;
            self.pending_activity = None;
            self.clock_stopped = false;
            info!("screen unlocked");
            if self.auto_clock_in && !has_open_shift {
                return Ok(UnlockOutcome::AutoClockIn);
            }
            return Ok(UnlockOutcome::Unlocked);
        }

        let attempts = attempts + 1;
        if attempts >= PIN_MAX_ATTEMPTS {
            warn!(attempts, "too many wrong PINs, forcing logout");
            self.state = IdleState::LoggedOut;
            self.clock_stopped = false;
            return Ok(UnlockOutcome::ForcedLogout);
        }
        warn!(attempts, "wrong PIN");
        self.state = IdleState::Locked { attempts };
        Ok(UnlockOutcome::Retry {
            remaining: PIN_MAX_ATTEMPTS - attempts,
        })
    }

    /// Start over after a fresh login.
    pub fn resume_after_login(&mut self, now: Instant) {
        self.state = if self.timeout.is_some() {
            IdleState::Active
        } else {
            IdleState::Disabled
        };
        self.last_activity = now;
        self.pending_activity = None;
        self.clock_stopped = false;
    }
}
