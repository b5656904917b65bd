use chrono::{Local, NaiveDate};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use super::{to_message, CommandResult};
use crate::app::AppState;
use crate::shifts::{self as shift_service, ClockInRequest, ClockOutRequest};

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ClockPayload {
    #[serde(default, alias = "manual_time", alias = "time")]
    manual_time: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ShiftReportPayload {
    #[serde(alias = "date_from", alias = "dateFrom")]
    from: String,
    #[serde(alias = "date_to", alias = "dateTo")]
    to: String,
}

fn parse_clock_payload(arg0: &Option<Value>) -> Result<ClockPayload, String> {
    match arg0 {
        None | Some(Value::Null) => Ok(ClockPayload::default()),
        Some(Value::String(time)) => Ok(ClockPayload {
            manual_time: Some(time.clone()),
        }),
        Some(v) => {
            serde_json::from_value(v.clone()).map_err(|e| format!("Invalid clock payload: {e}"))
        }
    }
}

fn parse_date(raw: &str, field: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|_| format!("{field} must be a YYYY-MM-DD date"))
}

fn parse_shift_report_payload(arg0: Option<Value>) -> Result<(NaiveDate, NaiveDate), String> {
    let payload: ShiftReportPayload =
        serde_json::from_value(arg0.ok_or("Missing report range")?)
            .map_err(|e| format!("Invalid report payload: {e}"))?;
    let from = parse_date(&payload.from, "from")?;
    let to = parse_date(&payload.to, "to")?;
    if from > to {
        return Err("Report range starts after it ends".into());
    }
    Ok((from, to))
}

fn payload_or_empty(arg0: &Option<Value>) -> Value {
    match arg0 {
        Some(v @ Value::Object(_)) => v.clone(),
        _ => json!({}),
    }
}

pub fn shift_clock_in(arg0: Option<Value>, state: &AppState) -> CommandResult {
    state.ensure_unlocked().map_err(to_message)?;
    let payload = parse_clock_payload(&arg0)?;
    let ctx = state.session(&payload_or_empty(&arg0)).map_err(to_message)?;
    let settings = state.settings().map_err(to_message)?;
    let shift = shift_service::clock_in(
        state.db.as_ref(),
        &settings.shift_settings,
        &ClockInRequest {
            store_id: ctx.store_id,
            user_id: ctx.user_id,
            user_name: ctx.user_name,
            manual_time: payload.manual_time,
            auto: false,
        },
        Local::now(),
    )
    .map_err(to_message)?;
    Ok(json!({ "success": true, "shift": shift }))
}

pub fn shift_clock_out(arg0: Option<Value>, state: &AppState) -> CommandResult {
    state.ensure_unlocked().map_err(to_message)?;
    let payload = parse_clock_payload(&arg0)?;
    let ctx = state.session(&payload_or_empty(&arg0)).map_err(to_message)?;
    let settings = state.settings().map_err(to_message)?;
    let shift = shift_service::clock_out(
        state.db.as_ref(),
        &settings.shift_settings,
        &ClockOutRequest {
            store_id: ctx.store_id,
            user_id: ctx.user_id,
            manual_time: payload.manual_time,
            auto: false,
        },
        Local::now(),
    )
    .map_err(to_message)?;
    Ok(json!({ "success": true, "shift": shift }))
}

pub fn shift_get_open(arg0: Option<Value>, state: &AppState) -> CommandResult {
    let ctx = state.session(&payload_or_empty(&arg0)).map_err(to_message)?;
    let open = shift_service::open_shift_for(state.db.as_ref(), &ctx.store_id, &ctx.user_id, None)
        .map_err(to_message)?;
    Ok(json!({ "shift": open, "clockedIn": open.is_some() }))
}

/// Run the expiry sweep now instead of waiting for the next poll.
pub fn shift_auto_clock_out(arg0: Option<Value>, state: &AppState) -> CommandResult {
    state.ensure_unlocked().map_err(to_message)?;
    let ctx = state.session(&payload_or_empty(&arg0)).map_err(to_message)?;
    let settings = state.settings().map_err(to_message)?;
    let closed = shift_service::auto_clock_out_expired(
        state.db.as_ref(),
        &settings.shift_settings,
        &ctx.store_id,
        Local::now(),
    )
    .map_err(to_message)?;
    Ok(json!({ "closed": closed, "count": closed.len() }))
}

pub fn shift_reconcile_reports(arg0: Option<Value>, state: &AppState) -> CommandResult {
    state.ensure_unlocked().map_err(to_message)?;
    let ctx = state.session(&payload_or_empty(&arg0)).map_err(to_message)?;
    let repaired = shift_service::reconcile_shift_reports(state.db.as_ref(), &ctx.store_id)
        .map_err(to_message)?;
    info!(store_id = %ctx.store_id, repaired, "shift report reconcile requested");
    Ok(json!({ "repaired": repaired }))
}

pub fn shift_report(arg0: Option<Value>, state: &AppState) -> CommandResult {
    let ctx = state.session(&payload_or_empty(&arg0)).map_err(to_message)?;
    let (from, to) = parse_shift_report_payload(arg0)?;
    let rows = shift_service::shift_report(state.db.as_ref(), &ctx.store_id, from, to)
        .map_err(to_message)?;
    let total_hours: f64 = rows.iter().map(|r| r.total_hours).sum();
    Ok(json!({ "rows": rows, "totalHours": total_hours }))
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::db::{self, DocumentStore};
    use crate::storage;
    use std::sync::Arc;

    #[test]
    fn clock_in_then_out_with_manual_times() {
        let state = AppState::open(Arc::new(db::open_in_memory().unwrap()), AppConfig::default());
        storage::start_session(&state.db, &json!({ "id": "u1", "name": "Bo" }), "t", "s1")
            .unwrap();

        let opened = shift_clock_in(Some(json!({ "manualTime": "00:00" })), &state).unwrap();
        assert_eq!(opened["shift"]["userName"], "Bo");
        assert!(shift_clock_in(Some(json!({ "manualTime": "00:05" })), &state).is_err());
        assert_eq!(shift_get_open(None, &state).unwrap()["clockedIn"], true);

        let closed = shift_clock_out(None, &state).unwrap();
        assert!(closed["shift"]["hours"].as_f64().unwrap() >= 0.0);
        assert_eq!(shift_get_open(None, &state).unwrap()["clockedIn"], false);

        let today = Local::now().format("%Y-%m-%d").to_string();
        let report =
            shift_report(Some(json!({ "from": today, "to": today })), &state).unwrap();
        assert_eq!(report["rows"][0]["shiftCount"], 1);
        assert_eq!(shift_reconcile_reports(None, &state).unwrap()["repaired"], 0);
    }

    #[test]
    fn clock_in_and_out_at_current_time_keeps_report_in_sync() {
        let state = AppState::open(Arc::new(db::open_in_memory().unwrap()), AppConfig::default());
        storage::start_session(&state.db, &json!({ "id": "u2" }), "t", "s2").unwrap();
        state
            .db
            .set(
                crate::settings::STORE_SETTINGS_COLLECTION,
                "s2",
                &json!({ "shiftSettings": { "shiftStartHour": 0, "shiftEndHour": 24 } }),
            )
            .unwrap();
        state.refresh_settings("s2").unwrap();

        let opened = shift_clock_in(None, &state).unwrap();
        assert_eq!(opened["shift"]["autoClockIn"], false);
        let closed = shift_clock_out(None, &state).unwrap();
        assert_eq!(closed["shift"]["autoClockOut"], false);

        assert_eq!(shift_reconcile_reports(None, &state).unwrap()["repaired"], 0);
    }
}
