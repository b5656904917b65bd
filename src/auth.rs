//! Staff PIN storage and verification with bcrypt.
//!
//! The re-auth PIN is exactly four digits. Only its bcrypt hash is stored,
//! on the staff member's `storeStaff/{userId}` document as `pinHash`.

use serde_json::json;
use tracing::{info, warn};
use zeroize::Zeroizing;

use crate::db::DocumentStore;
use crate::error::{PosError, PosResult};
use crate::value_str;

pub const STORE_STAFF_COLLECTION: &str = "storeStaff";

const PIN_LENGTH: usize = 4;
const PIN_HASH_COST: u32 = if cfg!(test) { 4 } else { bcrypt::DEFAULT_COST };

pub fn validate_pin(pin: &str) -> PosResult<()> {
    if pin.len() != PIN_LENGTH || !pin.chars().all(|c| c.is_ascii_digit()) {
        return Err(PosError::validation(format!(
            "PIN must be exactly {PIN_LENGTH} digits"
        )));
    }
    Ok(())
}

/// Hash and store a staff member's PIN, creating the staff document when
/// it does not exist yet.
pub fn set_staff_pin(
    store: &dyn DocumentStore,
    store_id: &str,
    user_id: &str,
    pin: &str,
) -> PosResult<()> {
    validate_pin(pin)?;
    let hash = bcrypt::hash(pin, PIN_HASH_COST)
        .map_err(|e| PosError::validation(format!("Failed to hash PIN: {e}")))?;

    match store.get(STORE_STAFF_COLLECTION, user_id)? {
        Some(_) => store.update(STORE_STAFF_COLLECTION, user_id, &json!({ "pinHash": hash }))?,
        None => store.set(
            STORE_STAFF_COLLECTION,
            user_id,
            &json!({ "storeId": store_id, "userId": user_id, "pinHash": hash }),
        )?,
    }
    info!(user_id, "staff PIN set");
    Ok(())
}

/// Whether `user_id` already has a PIN hash on file.
pub fn has_staff_pin(store: &dyn DocumentStore, user_id: &str) -> PosResult<bool> {
    Ok(store
        .get(STORE_STAFF_COLLECTION, user_id)?
        .is_some_and(|doc| value_str(&doc, &["pinHash"]).is_some()))
}

/// Check a PIN against the stored hash. `Ok(false)` is a wrong PIN; a
/// missing hash is an authorization error.
pub fn verify_staff_pin(store: &dyn DocumentStore, user_id: &str, pin: &str) -> PosResult<bool> {
    let pin = Zeroizing::new(pin.to_string());
    if validate_pin(&pin).is_err() {
        return Ok(false);
    }

    let doc = store
        .get(STORE_STAFF_COLLECTION, user_id)?
        .ok_or_else(|| PosError::unauthorized("Staff member not found"))?;
    let hash = value_str(&doc, &["pinHash"])
        .ok_or_else(|| PosError::unauthorized("No PIN configured for this staff member"))?;

    match bcrypt::verify(pin.as_str(), &hash) {
        Ok(ok) => Ok(ok),
        Err(e) => {
            warn!(user_id, error = %e, "stored PIN hash is unreadable");
            Ok(false)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    #[test]
    fn test_validate_pin() {
        assert!(validate_pin("1234").is_ok());
        assert!(validate_pin("123").is_err());
        assert!(validate_pin("12345").is_err());
        assert!(validate_pin("12a4").is_err());
    }

    #[test]
    fn test_set_and_verify() {
        let store = db::open_in_memory().unwrap();
        set_staff_pin(&store, "s1", "u1", "4821").unwrap();

        let doc = store.get(STORE_STAFF_COLLECTION, "u1").unwrap().unwrap();
        let hash = doc["pinHash"].as_str().unwrap();
        assert_ne!(hash, "4821");
        assert_eq!(doc["storeId"], "s1");

        assert!(verify_staff_pin(&store, "u1", "4821").unwrap());
        assert!(!verify_staff_pin(&store, "u1", "0000").unwrap());
        assert!(!verify_staff_pin(&store, "u1", "48").unwrap());
        assert!(has_staff_pin(&store, "u1").unwrap());
        assert!(!has_staff_pin(&store, "u9").unwrap());
    }

    #[test]
    fn test_set_pin_keeps_existing_staff_fields() {
        let store = db::open_in_memory().unwrap();
        store
            .set(STORE_STAFF_COLLECTION, "u2", &json!({ "name": "Lee", "storeId": "s1" }))
            .unwrap();
        set_staff_pin(&store, "s1", "u2", "1111").unwrap();
        let doc = store.get(STORE_STAFF_COLLECTION, "u2").unwrap().unwrap();
        assert_eq!(doc["name"], "Lee");
        assert!(verify_staff_pin(&store, "u2", "1111").unwrap());
    }

    #[test]
    fn test_missing_staff_or_hash_is_unauthorized() {
        let store = db::open_in_memory().unwrap();
        let err = verify_staff_pin(&store, "nobody", "1234").unwrap_err();
        assert!(matches!(err, PosError::Unauthorized(_)));

        store
            .set(STORE_STAFF_COLLECTION, "u3", &json!({ "name": "Kai" }))
            .unwrap();
        let err = verify_staff_pin(&store, "u3", "1234").unwrap_err();
        assert!(matches!(err, PosError::Unauthorized(_)));
    }
}
