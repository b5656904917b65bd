use chrono::Local;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{info, warn};
use zeroize::Zeroizing;

use super::{object_or_keyed, to_message, CommandResult};
use crate::app::AppState;
use crate::auth;
use crate::idle::{ActivityEvent, UnlockOutcome};
use crate::scheduler;
use crate::shifts::{self as shift_service, ClockInRequest};
use crate::storage;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PinPayload {
    pin: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SetPinPayload {
    pin: String,
    #[serde(default, alias = "current_pin", alias = "oldPin")]
    current_pin: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ActivityPayload {
    #[serde(alias = "type", alias = "eventType")]
    event: String,
}

fn parse_pin_payload(arg0: Option<Value>) -> Result<Zeroizing<String>, String> {
    let payload = object_or_keyed(arg0, "pin");
    let parsed: PinPayload =
        serde_json::from_value(payload).map_err(|_| "Invalid PIN payload".to_string())?;
    Ok(Zeroizing::new(parsed.pin.trim().to_string()))
}

fn parse_set_pin_payload(
    arg0: Option<Value>,
) -> Result<(Zeroizing<String>, Option<Zeroizing<String>>), String> {
    let payload = object_or_keyed(arg0, "pin");
    let parsed: SetPinPayload =
        serde_json::from_value(payload).map_err(|_| "Invalid PIN payload".to_string())?;
    let current = parsed
        .current_pin
        .map(|p| Zeroizing::new(p.trim().to_string()));
    Ok((Zeroizing::new(parsed.pin.trim().to_string()), current))
}

fn parse_activity_payload(arg0: Option<Value>) -> Result<ActivityEvent, String> {
    let payload = object_or_keyed(arg0, "event");
    let parsed: ActivityPayload = serde_json::from_value(payload)
        .map_err(|e| format!("Invalid activity payload: {e}"))?;
    ActivityEvent::parse(&parsed.event)
        .ok_or_else(|| format!("Unsupported activity event: {}", parsed.event.trim()))
}

fn idle_json(state: &AppState) -> CommandResult {
    let idle = state.idle().map_err(to_message)?;
    Ok(json!({
        "state": idle.state(),
        "locked": idle.is_locked(),
        "clockStopped": idle.clock_stopped(),
        "timeoutSecs": idle.timeout().map(|t| t.as_secs()),
    }))
}

pub fn idle_get_state(state: &AppState) -> CommandResult {
    idle_json(state)
}

pub fn idle_record_activity(arg0: Option<Value>, state: &AppState) -> CommandResult {
    let event = parse_activity_payload(arg0)?;
    let accepted = state
        .idle()
        .map_err(to_message)?
        .record_activity(event, scheduler::now());
    Ok(json!({ "accepted": accepted }))
}

/// Unlock with the signed-in staff member's PIN. Three misses sign the
/// terminal out; a successful unlock may clock the staff member in.
pub fn idle_submit_pin(arg0: Option<Value>, state: &AppState) -> CommandResult {
    let pin = parse_pin_payload(arg0)?;
    let ctx = state.session(&json!({})).map_err(to_message)?;
    let has_open_shift =
        shift_service::open_shift_for(state.db.as_ref(), &ctx.store_id, &ctx.user_id, None)
            .map_err(to_message)?
            .is_some();

    let outcome = state
        .idle()
        .map_err(to_message)?
        .submit_pin(&pin, has_open_shift, scheduler::now(), |candidate| {
            auth::verify_staff_pin(state.db.as_ref(), &ctx.user_id, candidate)
        })
        .map_err(to_message)?;

    let mut result = json!({ "outcome": outcome });
    match outcome {
        UnlockOutcome::ForcedLogout => {
            state.order().map_err(to_message)?.reset_order();
            state.checkout().map_err(to_message)?.cancel();
            storage::clear_session(&state.db).map_err(to_message)?;
            state.stop_timers();
            info!(user_id = %ctx.user_id, "signed out after failed PIN attempts");
        }
        UnlockOutcome::AutoClockIn => {
            let settings = state.settings().map_err(to_message)?;
            let req = ClockInRequest {
                store_id: ctx.store_id.clone(),
                user_id: ctx.user_id.clone(),
                user_name: ctx.user_name.clone(),
                manual_time: None,
                auto: true,
            };
            // The unlock already succeeded; a refused clock-in is reported,
            // not raised.
            match shift_service::clock_in(
                state.db.as_ref(),
                &settings.shift_settings,
                &req,
                Local::now(),
            ) {
                Ok(shift) => result["shift"] = json!(shift),
                Err(e) => {
                    warn!(user_id = %ctx.user_id, error = %e, "auto clock-in after unlock failed");
                    result["clockInError"] = json!(e.to_string());
                }
            }
        }
        UnlockOutcome::Unlocked | UnlockOutcome::Retry { .. } => {}
    }
    Ok(result)
}

pub fn staff_set_pin(arg0: Option<Value>, state: &AppState) -> CommandResult {
    state.ensure_unlocked().map_err(to_message)?;
    let ctx_payload = match &arg0 {
        Some(v @ Value::Object(_)) => v.clone(),
        _ => json!({}),
    };
    let (pin, current) = parse_set_pin_payload(arg0)?;
    let ctx = state.session(&ctx_payload).map_err(to_message)?;
    // Replacing a PIN takes the one already on file.
    if auth::has_staff_pin(state.db.as_ref(), &ctx.user_id).map_err(to_message)? {
        let current = current.ok_or("Enter the current PIN to change it")?;
        if !auth::verify_staff_pin(state.db.as_ref(), &ctx.user_id, &current)
            .map_err(to_message)?
        {
            warn!(user_id = %ctx.user_id, "PIN change refused, current PIN wrong");
            return Err("Current PIN is incorrect".into());
        }
    }
    auth::set_staff_pin(state.db.as_ref(), &ctx.store_id, &ctx.user_id, &pin)
        .map_err(to_message)?;
    Ok(json!({ "success": true }))
}
