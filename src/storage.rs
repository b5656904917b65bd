//! Device-local storage for session and in-progress order state.
//!
//! Values live in the `local_storage` table as strings; JSON helpers sit on
//! top. Keys mirror the ones the front end reads (`userData`, `token`,
//! `orderState`, ...).

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};

use crate::db::{self, DbState};
use crate::error::PosResult;
use crate::value_str;

pub const KEY_USER_DATA: &str = "userData";
pub const KEY_TOKEN: &str = "token";
pub const KEY_SELECTED_STORE_ID: &str = "selectedStoreId";
pub const KEY_SELECTED_STORE: &str = "selectedStore";
pub const KEY_SELECTED_STORE_DATA: &str = "selectedStoredata";
pub const KEY_SUBSCRIPTION_DATA: &str = "subscriptionData";
pub const KEY_ORDER_STATE: &str = "orderState";
pub const KEY_STORES: &str = "stores";

/// Keys removed on logout (forced or voluntary).
const SESSION_KEYS: &[&str] = &[
    KEY_USER_DATA,
    KEY_TOKEN,
    KEY_SELECTED_STORE_ID,
    KEY_SELECTED_STORE,
    KEY_SELECTED_STORE_DATA,
    KEY_SUBSCRIPTION_DATA,
    KEY_ORDER_STATE,
    KEY_STORES,
];

pub fn user_permissions_key(user_id: &str) -> String {
    format!("userPermissions:{user_id}")
}

// ---------------------------------------------------------------------------
// Low-level helpers
// ---------------------------------------------------------------------------

pub fn get_item(db: &DbState, key: &str) -> PosResult<Option<String>> {
    let conn = db.lock()?;
    Ok(db::get_local(&conn, key))
}

pub fn set_item(db: &DbState, key: &str, value: &str) -> PosResult<()> {
    let conn = db.lock()?;
    db::set_local(&conn, key, value)
}

pub fn remove_item(db: &DbState, key: &str) -> PosResult<()> {
    let conn = db.lock()?;
    db::delete_local(&conn, key)
}

pub fn set_json<T: Serialize>(db: &DbState, key: &str, value: &T) -> PosResult<()> {
    let raw = serde_json::to_string(value)?;
    set_item(db, key, &raw)
}

/// Read and decode a JSON value. A stored value that no longer decodes is
/// treated as absent.
pub fn get_json<T: DeserializeOwned>(db: &DbState, key: &str) -> PosResult<Option<T>> {
    let Some(raw) = get_item(db, key)? else {
        return Ok(None);
    };
    match serde_json::from_str(&raw) {
        Ok(v) => Ok(Some(v)),
        Err(e) => {
            warn!(key, error = %e, "local storage: discarding undecodable value");
            Ok(None)
        }
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// Id of the signed-in user, read from `userData`.
pub fn current_user_id(db: &DbState) -> PosResult<Option<String>> {
    let user: Option<Value> = get_json(db, KEY_USER_DATA)?;
    Ok(user.and_then(|u| value_str(&u, &["id", "userId", "uid"])))
}

/// Store the signed-in user and their store selection.
pub fn start_session(db: &DbState, user: &Value, token: &str, store_id: &str) -> PosResult<()> {
    set_json(db, KEY_USER_DATA, user)?;
    set_item(db, KEY_TOKEN, token)?;
    set_item(db, KEY_SELECTED_STORE_ID, store_id)?;
    Ok(())
}

/// Remove every session key, including the per-user permissions cache.
pub fn clear_session(db: &DbState) -> PosResult<()> {
    if let Some(user_id) = current_user_id(db)? {
        remove_item(db, &user_permissions_key(&user_id))?;
    }
    for key in SESSION_KEYS {
        remove_item(db, key)?;
    }
    info!("local session cleared");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_json_roundtrip_and_undecodable_value() {
        let db = db::open_in_memory().unwrap();
        set_json(&db, KEY_STORES, &vec!["s1", "s2"]).unwrap();
        let stores: Option<Vec<String>> = get_json(&db, KEY_STORES).unwrap();
        assert_eq!(stores.unwrap(), vec!["s1", "s2"]);

        set_item(&db, KEY_STORES, "{not json").unwrap();
        let stores: Option<Vec<String>> = get_json(&db, KEY_STORES).unwrap();
        assert!(stores.is_none());
    }

    #[test]
    fn test_clear_session_removes_session_and_permission_keys() {
        let db = db::open_in_memory().unwrap();
        start_session(&db, &json!({ "id": "user-7", "name": "Ana" }), "tok", "store-1").unwrap();
        set_item(&db, &user_permissions_key("user-7"), "[\"orders\"]").unwrap();
        set_item(&db, KEY_ORDER_STATE, "{}").unwrap();
        set_item(&db, "unrelated", "keep").unwrap();

        assert_eq!(current_user_id(&db).unwrap().as_deref(), Some("user-7"));
        clear_session(&db).unwrap();

        assert!(get_item(&db, KEY_TOKEN).unwrap().is_none());
        assert!(get_item(&db, KEY_USER_DATA).unwrap().is_none());
        assert!(get_item(&db, KEY_ORDER_STATE).unwrap().is_none());
        assert!(get_item(&db, &user_permissions_key("user-7")).unwrap().is_none());
        assert_eq!(get_item(&db, "unrelated").unwrap().as_deref(), Some("keep"));
    }
}
