//! Staff attendance: clock-in / clock-out.
//!
//! `staffShifts` is the source of truth. `shifts` is a read model for the
//! reporting screens, keyed by the same shift id so every mirror write is
//! idempotent; [`reconcile_shift_reports`] repairs it when a mirror write
//! was lost.
//!
//! Rules:
//! - one open shift (no clock-out) per user per day
//! - clock-in without a manual time must fall inside the store's hour window
//! - hours are computed once, at clock-out, and capped at
//!   `maxHoursPerShift + overtimeAllowanceHours`

use chrono::{DateTime, Duration, Local, NaiveDate, NaiveTime, TimeZone, Timelike, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::db::DocumentStore;
use crate::error::{PosError, PosResult};
use crate::settings::ShiftSettings;

pub const STAFF_SHIFTS_COLLECTION: &str = "staffShifts";
pub const SHIFT_REPORTS_COLLECTION: &str = "shifts";

const DISPLAY_TIME_FORMAT: &str = "%I:%M %p";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StaffShift {
    pub id: String,
    pub store_id: String,
    pub user_id: String,
    #[serde(default)]
    pub user_name: Option<String>,
    /// Local calendar date of the clock-in, `YYYY-MM-DD`.
    pub date: String,
    /// Display time, `hh:mm AM`.
    pub clock_in: String,
    #[serde(default)]
    pub clock_out: Option<String>,
    #[serde(rename = "clockInISO")]
    pub clock_in_iso: DateTime<Utc>,
    #[serde(rename = "clockOutISO", default)]
    pub clock_out_iso: Option<DateTime<Utc>>,
    #[serde(default)]
    pub hours: Option<f64>,
    #[serde(default)]
    pub auto_clock_in: bool,
    #[serde(default)]
    pub auto_clock_out: bool,
}

impl StaffShift {
    pub fn is_open(&self) -> bool {
        self.clock_out_iso.is_none()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClockInRequest {
    pub store_id: String,
    pub user_id: String,
    #[serde(default)]
    pub user_name: Option<String>,
    /// `hh:mm AM/PM`; bypasses the hour window.
    #[serde(default)]
    pub manual_time: Option<String>,
    #[serde(default)]
    pub auto: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClockOutRequest {
    pub store_id: String,
    pub user_id: String,
    #[serde(default)]
    pub manual_time: Option<String>,
    #[serde(default)]
    pub auto: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ShiftReportRow {
    pub user_id: String,
    pub user_name: Option<String>,
    pub shift_count: usize,
    pub open_shifts: usize,
    pub total_hours: f64,
}

// ---------------------------------------------------------------------------
// Time helpers
// ---------------------------------------------------------------------------

/// Hours between two instants, clamped to `[0, cap]`.
pub fn hours_worked(clock_in: DateTime<Utc>, clock_out: DateTime<Utc>, cap: f64) -> f64 {
    let hours = (clock_out - clock_in).num_milliseconds() as f64 / 3_600_000.0;
    hours.clamp(0.0, cap.max(0.0))
}

/// Parse a typed time of day (`"09:15 AM"`, `"9:15pm"`, `"21:15"`) onto
/// today's date. Anything unparsable falls back to `now`.
pub fn parse_manual_time(input: &str, now: DateTime<Local>) -> DateTime<Local> {
    let trimmed = input.trim().to_ascii_uppercase();
    let time = ["%I:%M %p", "%I:%M%p", "%H:%M"]
        .iter()
        .find_map(|fmt| NaiveTime::parse_from_str(&trimmed, fmt).ok());

    let Some(time) = time else {
        warn!(input, "unparsable manual time, using current time");
        return now;
    };

    let naive = now.date_naive().and_time(time);
    match Local.from_local_datetime(&naive).earliest() {
        Some(dt) => dt,
        None => {
            warn!(input, "manual time falls in a DST gap, using current time");
            now
        }
    }
}

pub fn display_time(t: DateTime<Local>) -> String {
    t.format(DISPLAY_TIME_FORMAT).to_string()
}

fn date_key(t: DateTime<Local>) -> String {
    t.date_naive().format("%Y-%m-%d").to_string()
}

// ---------------------------------------------------------------------------
// Queries
// ---------------------------------------------------------------------------

fn shifts_for_user(
    store: &dyn DocumentStore,
    store_id: &str,
    user_id: &str,
) -> PosResult<Vec<StaffShift>> {
    let docs = store.query(STAFF_SHIFTS_COLLECTION, "userId", &json!(user_id))?;
    Ok(docs
        .into_iter()
        .filter_map(|(id, doc)| decode_shift(&id, doc))
        .filter(|s| s.store_id == store_id)
        .collect())
}

fn decode_shift(id: &str, doc: serde_json::Value) -> Option<StaffShift> {
    match serde_json::from_value::<StaffShift>(doc) {
        Ok(s) => Some(s),
        Err(e) => {
            warn!(shift_id = %id, error = %e, "skipping unreadable shift");
            None
        }
    }
}

/// Latest open shift for a user. With `date`, only that day counts.
pub fn open_shift_for(
    store: &dyn DocumentStore,
    store_id: &str,
    user_id: &str,
    date: Option<&str>,
) -> PosResult<Option<StaffShift>> {
    Ok(shifts_for_user(store, store_id, user_id)?
        .into_iter()
        .filter(|s| s.is_open())
        .filter(|s| date.map_or(true, |d| s.date == d))
        .max_by_key(|s| s.clock_in_iso))
}

// ---------------------------------------------------------------------------
// Clock in / out
// ---------------------------------------------------------------------------

pub fn clock_in(
    store: &dyn DocumentStore,
    settings: &ShiftSettings,
    req: &ClockInRequest,
    now: DateTime<Local>,
) -> PosResult<StaffShift> {
    if req.user_id.trim().is_empty() || req.store_id.trim().is_empty() {
        return Err(PosError::validation("Missing userId or storeId"));
    }

    let today = date_key(now);
    if let Some(open) = open_shift_for(store, &req.store_id, &req.user_id, Some(&today))? {
        return Err(PosError::validation(format!(
            "Already clocked in since {} ({})",
            open.clock_in, open.id
        )));
    }

    let at = match req.manual_time.as_deref().filter(|s| !s.trim().is_empty()) {
        Some(manual) => parse_manual_time(manual, now),
        None => {
            if !settings.within_window(now.hour()) {
                return Err(PosError::validation(format!(
                    "Clock-in is only allowed between {}:00 and {}:00",
                    settings.shift_start_hour, settings.shift_end_hour
                )));
            }
            now
        }
    };

    let shift = StaffShift {
        id: Uuid::new_v4().to_string(),
        store_id: req.store_id.clone(),
        user_id: req.user_id.clone(),
        user_name: req.user_name.clone(),
        date: today,
        clock_in: display_time(at),
        clock_out: None,
        clock_in_iso: at.with_timezone(&Utc),
        clock_out_iso: None,
        hours: None,
        auto_clock_in: req.auto,
        auto_clock_out: false,
    };

    store.set(STAFF_SHIFTS_COLLECTION, &shift.id, &serde_json::to_value(&shift)?)?;
    mirror_shift(store, &shift);

    info!(
        shift_id = %shift.id,
        user_id = %shift.user_id,
        store_id = %shift.store_id,
        auto = shift.auto_clock_in,
        "Clocked in"
    );
    Ok(shift)
}

pub fn clock_out(
    store: &dyn DocumentStore,
    settings: &ShiftSettings,
    req: &ClockOutRequest,
    now: DateTime<Local>,
) -> PosResult<StaffShift> {
    let open = open_shift_for(store, &req.store_id, &req.user_id, None)?
        .ok_or_else(|| PosError::not_found(format!("Open shift for {}", req.user_id)))?;

    let at = match req.manual_time.as_deref().filter(|s| !s.trim().is_empty()) {
        Some(manual) => parse_manual_time(manual, now),
        None => now,
    };
    close_shift(store, open, at, settings.hours_cap(), req.auto)
}

fn close_shift(
    store: &dyn DocumentStore,
    mut shift: StaffShift,
    at: DateTime<Local>,
    cap: f64,
    auto: bool,
) -> PosResult<StaffShift> {
    let out_utc = at.with_timezone(&Utc);
    let hours = hours_worked(shift.clock_in_iso, out_utc, cap);

    shift.clock_out = Some(display_time(at));
    shift.clock_out_iso = Some(out_utc);
    shift.hours = Some(hours);
    shift.auto_clock_out = auto;

    store.update(
        STAFF_SHIFTS_COLLECTION,
        &shift.id,
        &json!({
            "clockOut": shift.clock_out,
            "clockOutISO": shift.clock_out_iso,
            "hours": hours,
            "autoClockOut": auto,
        }),
    )?;
    mirror_shift(store, &shift);

    info!(
        shift_id = %shift.id,
        user_id = %shift.user_id,
        hours = %format!("{hours:.2}"),
        auto,
        "Clocked out"
    );
    Ok(shift)
}

/// Close every open shift in `store_id` that has run past the hour cap.
/// Only runs when the store has auto clock-out enabled. The clock-out
/// time is set to the moment the cap was reached.
pub fn auto_clock_out_expired(
    store: &dyn DocumentStore,
    settings: &ShiftSettings,
    store_id: &str,
    now: DateTime<Local>,
) -> PosResult<Vec<StaffShift>> {
    if !settings.auto_clock_out {
        return Ok(Vec::new());
    }
    let cap = settings.hours_cap();
    let cap_duration = Duration::milliseconds((cap * 3_600_000.0) as i64);
    let now_utc = now.with_timezone(&Utc);

    let expired: Vec<StaffShift> = store
        .query(STAFF_SHIFTS_COLLECTION, "storeId", &json!(store_id))?
        .into_iter()
        .filter_map(|(id, doc)| decode_shift(&id, doc))
        .filter(|s| s.is_open() && now_utc - s.clock_in_iso >= cap_duration)
        .collect();

    let mut closed = Vec::with_capacity(expired.len());
    for shift in expired {
        let at = (shift.clock_in_iso + cap_duration).with_timezone(&Local);
        match close_shift(store, shift, at, cap, true) {
            Ok(s) => closed.push(s),
            Err(e) => warn!(error = %e, "auto clock-out failed"),
        }
    }
    if !closed.is_empty() {
        info!(store_id, count = closed.len(), "Auto clocked out expired shifts");
    }
    Ok(closed)
}

// ---------------------------------------------------------------------------
// Reporting read model
// ---------------------------------------------------------------------------

/// Copy the stored primary record into the reporting collection, so the
/// mirror matches `staffShifts` field for field. Failures are logged; the
/// primary record is already written and reconciliation will catch up.
fn mirror_shift(store: &dyn DocumentStore, shift: &StaffShift) {
    let result = store
        .get(STAFF_SHIFTS_COLLECTION, &shift.id)
        .and_then(|primary| match primary {
            Some(doc) => Ok(doc),
            None => serde_json::to_value(shift).map_err(PosError::from),
        })
        .and_then(|doc| store.set(SHIFT_REPORTS_COLLECTION, &shift.id, &doc));
    if let Err(e) = result {
        warn!(shift_id = %shift.id, error = %e, "shift report mirror write failed");
    }
}

/// Rewrite report entries that are missing or differ from `staffShifts`.
/// Returns how many were repaired.
pub fn reconcile_shift_reports(store: &dyn DocumentStore, store_id: &str) -> PosResult<usize> {
    let mut repaired = 0;
    for (id, doc) in store.query(STAFF_SHIFTS_COLLECTION, "storeId", &json!(store_id))? {
        let mirrored = store.get(SHIFT_REPORTS_COLLECTION, &id)?;
        if mirrored.as_ref() != Some(&doc) {
            store.set(SHIFT_REPORTS_COLLECTION, &id, &doc)?;
            repaired += 1;
        }
    }
    if repaired > 0 {
        info!(store_id, repaired, "Shift report mirror reconciled");
    } else {
        debug!(store_id, "Shift report mirror up to date");
    }
    Ok(repaired)
}

/// Per-user hours for shifts whose date falls in `[from, to]`.
pub fn shift_report(
    store: &dyn DocumentStore,
    store_id: &str,
    from: NaiveDate,
    to: NaiveDate,
) -> PosResult<Vec<ShiftReportRow>> {
    let mut rows: BTreeMap<String, ShiftReportRow> = BTreeMap::new();

    for (id, doc) in store.query(SHIFT_REPORTS_COLLECTION, "storeId", &json!(store_id))? {
        let Some(shift) = decode_shift(&id, doc) else {
            continue;
        };
        let Ok(date) = NaiveDate::parse_from_str(&shift.date, "%Y-%m-%d") else {
            continue;
        };
        if date < from || date > to {
            continue;
        }
        let row = rows
            .entry(shift.user_id.clone())
            .or_insert_with(|| ShiftReportRow {
                user_id: shift.user_id.clone(),
                user_name: shift.user_name.clone(),
                shift_count: 0,
                open_shifts: 0,
                total_hours: 0.0,
            });
        row.shift_count += 1;
        if shift.is_open() {
            row.open_shifts += 1;
        }
        row.total_hours += shift.hours.unwrap_or(0.0);
    }

    Ok(rows.into_values().collect())
}

// ===========================================================================
// Tests
// ===========================================================================
