use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use super::{to_message, CommandResult};
use crate::app::AppState;
use crate::scheduler;
use crate::storage;
use crate::value_str;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LoginPayload {
    user: Value,
    #[serde(default)]
    token: String,
    #[serde(alias = "store_id")]
    store_id: String,
    /// Full store record; carries `adminId`.
    #[serde(default)]
    store: Option<Value>,
}

fn parse_login_payload(arg0: Option<Value>) -> Result<LoginPayload, String> {
    let payload = arg0.ok_or("Missing login payload")?;
    let mut parsed: LoginPayload =
        serde_json::from_value(payload).map_err(|e| format!("Invalid login payload: {e}"))?;
    parsed.store_id = parsed.store_id.trim().to_string();
    if parsed.store_id.is_empty() {
        return Err("Missing storeId".into());
    }
    if value_str(&parsed.user, &["id", "userId", "uid"]).is_none() {
        return Err("Missing user id".into());
    }
    Ok(parsed)
}

/// Record the signed-in user, load their store's settings and restart the
/// timers.
pub fn session_login(arg0: Option<Value>, state: &AppState) -> CommandResult {
    let payload = parse_login_payload(arg0)?;
    storage::start_session(&state.db, &payload.user, &payload.token, &payload.store_id)
        .map_err(to_message)?;
    if let Some(store) = &payload.store {
        storage::set_json(&state.db, storage::KEY_SELECTED_STORE, store).map_err(to_message)?;
    }

    let settings = state.refresh_settings(&payload.store_id).map_err(to_message)?;
    state
        .idle()
        .map_err(to_message)?
        .resume_after_login(scheduler::now());
    state.start_timers().map_err(to_message)?;

    info!(store_id = %payload.store_id, "session started");
    Ok(json!({ "success": true, "settings": settings }))
}

pub fn session_logout(state: &AppState) -> CommandResult {
    state.stop_timers();
    state.order().map_err(to_message)?.reset_order();
    state.checkout().map_err(to_message)?.cancel();
    storage::clear_session(&state.db).map_err(to_message)?;
    Ok(json!({ "success": true }))
}

pub fn settings_refresh(arg0: Option<Value>, state: &AppState) -> CommandResult {
    let ctx_payload = match &arg0 {
        Some(v @ Value::Object(_)) => v.clone(),
        _ => json!({}),
    };
    let ctx = state.session(&ctx_payload).map_err(to_message)?;
    let settings = state.refresh_settings(&ctx.store_id).map_err(to_message)?;
    Ok(json!({ "settings": settings }))
}
