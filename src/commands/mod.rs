//! JSON command boundary.
//!
//! Every handler takes the raw invoke arguments (`Option<Value>`) plus the
//! shared [`AppState`](crate::app::AppState) and answers with a JSON value
//! or an error string the front end can show as-is.

pub mod checkout;
pub mod idle;
pub mod orders;
pub mod session;
pub mod shifts;

use serde_json::Value;

use crate::error::PosError;

pub(crate) type CommandResult = Result<Value, String>;

pub(crate) fn to_message(e: PosError) -> String {
    e.to_string()
}

/// Treat a bare string argument as `{ <key>: <string> }`.
pub(crate) fn object_or_keyed(arg0: Option<Value>, key: &str) -> Value {
    match arg0 {
        Some(Value::String(s)) => serde_json::json!({ key: s }),
        Some(Value::Number(n)) => serde_json::json!({ key: n }),
        Some(v) => v,
        None => serde_json::json!({}),
    }
}

#[cfg(test)]
mod dto_tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn object_or_keyed_wraps_scalars() {
        assert_eq!(object_or_keyed(Some(json!("o-1")), "orderId"), json!({ "orderId": "o-1" }));
        assert_eq!(object_or_keyed(Some(json!(3)), "bagQuantity"), json!({ "bagQuantity": 3 }));
        assert_eq!(object_or_keyed(None, "x"), json!({}));
        assert_eq!(object_or_keyed(Some(json!({ "a": 1 })), "x"), json!({ "a": 1 }));
    }
}
