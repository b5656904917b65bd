use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use super::{object_or_keyed, to_message, CommandResult};
use crate::app::AppState;
use crate::order::{
    CustomerSnapshot, DeliveryOption, FormField, NewItem, OrderField, OrderStatus, PaymentMethod,
    PriceList,
};
use crate::order_history;
use crate::settings::value_as_f64;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OrderLinePayload {
    #[serde(alias = "line_index", alias = "lineIndex")]
    index: usize,
    #[serde(default)]
    quantity: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OrderFieldPayload {
    field: String,
    #[serde(default)]
    value: Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OrderIdPayload {
    #[serde(alias = "order_id", alias = "id")]
    order_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OrderUpdateStatusPayload {
    #[serde(alias = "order_id", alias = "id")]
    order_id: String,
    status: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OrderListPayload {
    #[serde(default)]
    status: Option<String>,
}

fn parse_new_item_payload(arg0: Option<Value>) -> Result<NewItem, String> {
    let payload = arg0.ok_or("Missing item payload")?;
    let mut item: NewItem =
        serde_json::from_value(payload).map_err(|e| format!("Invalid item payload: {e}"))?;
    item.id = item.id.trim().to_string();
    if item.id.is_empty() {
        return Err("Missing item id".into());
    }
    if !item.price.is_finite() || item.price < 0.0 {
        return Err("Item price must be a non-negative number".into());
    }
    Ok(item)
}

fn parse_line_payload(arg0: Option<Value>) -> Result<OrderLinePayload, String> {
    let payload = object_or_keyed(arg0, "index");
    serde_json::from_value(payload).map_err(|e| format!("Invalid order line payload: {e}"))
}

fn parse_order_id_payload(arg0: Option<Value>) -> Result<OrderIdPayload, String> {
    let payload = object_or_keyed(arg0, "orderId");
    let mut parsed: OrderIdPayload =
        serde_json::from_value(payload).map_err(|e| format!("Invalid order payload: {e}"))?;
    parsed.order_id = parsed.order_id.trim().to_string();
    if parsed.order_id.is_empty() {
        return Err("Missing orderId".into());
    }
    Ok(parsed)
}

/// Accepts `{ orderId, status }`, or `(orderId, status)` as two arguments.
fn parse_order_update_status_payload(
    arg0: Option<Value>,
    arg1: Option<String>,
) -> Result<(String, OrderStatus), String> {
    let payload = match arg0 {
        Some(Value::Object(mut obj)) => {
            if obj.get("status").is_none() {
                if let Some(status) = arg1 {
                    obj.insert("status".to_string(), Value::String(status));
                }
            }
            Value::Object(obj)
        }
        Some(Value::String(order_id)) => json!({ "orderId": order_id, "status": arg1 }),
        Some(v) => v,
        None => json!({ "status": arg1 }),
    };
    let parsed: OrderUpdateStatusPayload = serde_json::from_value(payload)
        .map_err(|e| format!("Invalid order status payload: {e}"))?;
    let order_id = parsed.order_id.trim().to_string();
    if order_id.is_empty() {
        return Err("Missing orderId".into());
    }
    let status = OrderStatus::parse(&parsed.status)
        .ok_or_else(|| format!("Unknown order status: {}", parsed.status.trim()))?;
    Ok((order_id, status))
}

fn optional_date(value: Value) -> Result<Option<DateTime<Utc>>, String> {
    if value.is_null() {
        return Ok(None);
    }
    serde_json::from_value(value).map_err(|e| format!("Invalid date: {e}"))
}

fn parse_order_field(field: &str, value: Value) -> Result<OrderField, String> {
    Ok(match field {
        "selectedCustomer" | "customer" => {
            if value.is_null() {
                OrderField::Customer(None)
            } else {
                let customer: CustomerSnapshot = serde_json::from_value(value)
                    .map_err(|e| format!("Invalid customer: {e}"))?;
                OrderField::Customer(Some(customer))
            }
        }
        "isExpress" => OrderField::Express(value.as_bool().ok_or("isExpress must be a boolean")?),
        "isRepeat" => OrderField::Repeat(value.as_bool().ok_or("isRepeat must be a boolean")?),
        "deliveryOption" => {
            let option: DeliveryOption = serde_json::from_value(value)
                .map_err(|e| format!("Invalid delivery option: {e}"))?;
            OrderField::DeliveryOption(option)
        }
        "pickupDate" => OrderField::PickupDate(optional_date(value)?),
        "deliveryDate" => OrderField::DeliveryDate(optional_date(value)?),
        "selectedPriceList" | "priceList" => {
            let list: PriceList = if value.is_null() {
                PriceList::default()
            } else {
                serde_json::from_value(value).map_err(|e| format!("Invalid price list: {e}"))?
            };
            OrderField::PriceList(list)
        }
        other => return Err(format!("Unknown order field: {other}")),
    })
}

fn amount(field: &str, value: &Value) -> Result<f64, String> {
    value_as_f64(value)
        .filter(|v| v.is_finite())
        .ok_or_else(|| format!("{field} must be a number"))
}

fn optional_amount(field: &str, value: &Value) -> Result<Option<f64>, String> {
    if value.is_null() {
        return Ok(None);
    }
    amount(field, value).map(Some)
}

fn parse_form_field(field: &str, value: Value) -> Result<FormField, String> {
    Ok(match field {
        "bagQuantity" => {
            let n = amount(field, &value)?;
            if n < 0.0 || n.fract() != 0.0 || n > f64::from(u32::MAX) {
                return Err("bagQuantity must be a whole number of bags".into());
            }
            FormField::BagQuantity(n as u32)
        }
        "deliveryFee" => FormField::DeliveryFee(amount(field, &value)?),
        "expressDeliveryCharge" => FormField::ExpressDeliveryCharge(amount(field, &value)?),
        "credit" => FormField::Credit(amount(field, &value)?),
        "discountPercentage" => FormField::DiscountPercentage(optional_amount(field, &value)?),
        "discountFixed" => FormField::DiscountFixed(optional_amount(field, &value)?),
        "paymentMethod" => match value.as_str() {
            None if value.is_null() => FormField::PaymentMethod(None),
            Some(raw) => FormField::PaymentMethod(Some(
                PaymentMethod::parse(raw).ok_or_else(|| format!("Unknown payment method: {raw}"))?,
            )),
            None => return Err("paymentMethod must be a string".into()),
        },
        "cashFromCustomer" => FormField::CashFromCustomer(match value {
            Value::String(s) => s,
            Value::Number(n) => n.to_string(),
            Value::Null => String::new(),
            _ => return Err("cashFromCustomer must be text or a number".into()),
        }),
        "subtotal" | "total" => return Err(format!("{field} is calculated and cannot be set")),
        other => return Err(format!("Unknown form field: {other}")),
    })
}

// ============================================================================
// In-progress order
// ============================================================================

pub fn order_get_state(state: &AppState) -> CommandResult {
    Ok(state.order().map_err(to_message)?.to_json())
}

pub fn order_add_item(arg0: Option<Value>, state: &AppState) -> CommandResult {
    state.ensure_unlocked().map_err(to_message)?;
    let item = parse_new_item_payload(arg0)?;
    let mut order = state.order().map_err(to_message)?;
    order.add_item(item);
    Ok(order.to_json())
}

pub fn order_update_item_quantity(arg0: Option<Value>, state: &AppState) -> CommandResult {
    state.ensure_unlocked().map_err(to_message)?;
    let payload = parse_line_payload(arg0)?;
    let quantity = payload.quantity.ok_or("Missing quantity")?;
    let mut order = state.order().map_err(to_message)?;
    order
        .update_item_quantity(payload.index, quantity)
        .map_err(to_message)?;
    Ok(order.to_json())
}

pub fn order_remove_item(arg0: Option<Value>, state: &AppState) -> CommandResult {
    state.ensure_unlocked().map_err(to_message)?;
    let payload = parse_line_payload(arg0)?;
    let mut order = state.order().map_err(to_message)?;
    let removed = order.remove_item(payload.index).map_err(to_message)?;
    let mut result = order.to_json();
    if let Some(obj) = result.as_object_mut() {
        obj.insert("removed".to_string(), json!(removed));
    }
    Ok(result)
}

pub fn order_set_field(arg0: Option<Value>, state: &AppState) -> CommandResult {
    state.ensure_unlocked().map_err(to_message)?;
    let payload: OrderFieldPayload = serde_json::from_value(arg0.ok_or("Missing field payload")?)
        .map_err(|e| format!("Invalid field payload: {e}"))?;
    let field = parse_order_field(payload.field.trim(), payload.value)?;
    let mut order = state.order().map_err(to_message)?;
    order.set_field(field);
    Ok(order.to_json())
}

pub fn order_set_form_field(arg0: Option<Value>, state: &AppState) -> CommandResult {
    state.ensure_unlocked().map_err(to_message)?;
    let payload: OrderFieldPayload = serde_json::from_value(arg0.ok_or("Missing field payload")?)
        .map_err(|e| format!("Invalid field payload: {e}"))?;
    let field = parse_form_field(payload.field.trim(), payload.value)?;
    let mut order = state.order().map_err(to_message)?;
    order.set_form_field(field);
    Ok(order.to_json())
}

pub fn order_reset(state: &AppState) -> CommandResult {
    state.ensure_unlocked().map_err(to_message)?;
    let mut order = state.order().map_err(to_message)?;
    order.reset_order();
    state.checkout().map_err(to_message)?.cancel();
    Ok(order.to_json())
}

// ============================================================================
// Submitted orders
// ============================================================================

pub fn order_get(arg0: Option<Value>, state: &AppState) -> CommandResult {
    let ctx_payload = arg0.clone().unwrap_or_else(|| json!({}));
    let payload = parse_order_id_payload(arg0)?;
    let ctx = state.session(&ctx_payload).map_err(to_message)?;
    let order = order_history::get_order(
        state.db.as_ref(),
        &ctx.admin_id,
        &ctx.store_id,
        &payload.order_id,
    )
    .map_err(to_message)?;
    serde_json::to_value(order).map_err(|e| e.to_string())
}

pub fn order_list(arg0: Option<Value>, state: &AppState) -> CommandResult {
    let raw = object_or_keyed(arg0, "status");
    let payload: OrderListPayload = serde_json::from_value(raw.clone())
        .map_err(|e| format!("Invalid order list payload: {e}"))?;
    let status = match payload.status.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        Some(s) => Some(OrderStatus::parse(s).ok_or_else(|| format!("Unknown order status: {s}"))?),
        None => None,
    };
    let ctx = state.session(&raw).map_err(to_message)?;
    let orders =
        order_history::list_orders(state.db.as_ref(), &ctx.admin_id, &ctx.store_id, status)
            .map_err(to_message)?;
    Ok(json!({ "orders": orders, "count": orders.len() }))
}

pub fn order_update_status(
    arg0: Option<Value>,
    arg1: Option<String>,
    state: &AppState,
) -> CommandResult {
    state.ensure_unlocked().map_err(to_message)?;
    let ctx_payload = match &arg0 {
        Some(Value::Object(_)) => arg0.clone().unwrap_or_default(),
        _ => json!({}),
    };
    let (order_id, status) = parse_order_update_status_payload(arg0, arg1)?;
    let ctx = state.session(&ctx_payload).map_err(to_message)?;
    let order = order_history::update_order_status(
        state.db.as_ref(),
        &ctx.admin_id,
        &ctx.store_id,
        &order_id,
        status,
    )
    .map_err(to_message)?;
    info!(order_id = %order_id, status = ?status, user_id = %ctx.user_id, "order status changed");
    serde_json::to_value(order).map_err(|e| e.to_string())
}

#[cfg(test)]
mod dto_tests {
    use super::*;

    #[test]
    fn parse_status_payload_supports_legacy_shape() {
        let (id, status) =
            parse_order_update_status_payload(Some(json!("order-1")), Some("ready".to_string()))
                .expect("legacy status payload should parse");
        assert_eq!(id, "order-1");
        assert_eq!(status, OrderStatus::Ready);
    }

    #[test]
    fn parse_status_payload_rejects_unknown_status() {
        let err = parse_order_update_status_payload(
            Some(json!({ "orderId": "o-2", "status": "lost" })),
            None,
        )
        .unwrap_err();
        assert!(err.contains("Unknown order status"));
    }

    #[test]
    fn parse_item_payload_requires_id_and_sane_price() {
        assert!(parse_new_item_payload(None).is_err());
        assert!(parse_new_item_payload(Some(json!({ "id": " ", "name": "x", "price": 1 }))).is_err());
        assert!(
            parse_new_item_payload(Some(json!({ "id": "a", "name": "x", "price": -1 }))).is_err()
        );
        let item = parse_new_item_payload(Some(json!({
            "id": "shirt",
            "name": "Shirt",
            "price": 3.5,
            "stainDamage": ["ink"]
        })))
        .unwrap();
        assert_eq!(item.stain_damage, vec!["ink"]);
    }

    #[test]
    fn parse_line_payload_accepts_bare_index() {
        let p = parse_line_payload(Some(json!(2))).unwrap();
        assert_eq!(p.index, 2);
        assert_eq!(p.quantity, None);
        let p = parse_line_payload(Some(json!({ "lineIndex": 1, "quantity": 4 }))).unwrap();
        assert_eq!((p.index, p.quantity), (1, Some(4)));
    }

    #[test]
    fn parse_form_fields() {
        assert_eq!(
            parse_form_field("bagQuantity", json!("3")).unwrap(),
            FormField::BagQuantity(3)
        );
        assert!(parse_form_field("bagQuantity", json!(1.5)).is_err());
        assert_eq!(
            parse_form_field("discountPercentage", Value::Null).unwrap(),
            FormField::DiscountPercentage(None)
        );
        assert_eq!(
            parse_form_field("paymentMethod", json!("bank_transfer")).unwrap(),
            FormField::PaymentMethod(Some(PaymentMethod::BankTransfer))
        );
        assert_eq!(
            parse_form_field("cashFromCustomer", json!(20)).unwrap(),
            FormField::CashFromCustomer("20".into())
        );
        assert!(parse_form_field("total", json!(5)).is_err());
    }

    #[test]
    fn parse_order_fields() {
        assert_eq!(
            parse_order_field("deliveryOption", json!("delivery")).unwrap(),
            OrderField::DeliveryOption(DeliveryOption::Delivery)
        );
        assert_eq!(
            parse_order_field("pickupDate", Value::Null).unwrap(),
            OrderField::PickupDate(None)
        );
        assert!(parse_order_field("isExpress", json!("yes")).is_err());
        assert!(parse_order_field("colour", json!(1)).is_err());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::db;
    use crate::storage;
    use std::sync::Arc;

    fn signed_in() -> AppState {
        let state = AppState::open(Arc::new(db::open_in_memory().unwrap()), AppConfig::default());
        storage::start_session(&state.db, &json!({ "id": "u1", "adminId": "a1" }), "t", "s1")
            .unwrap();
        state
    }

    #[test]
    fn order_commands_edit_the_shared_order() {
        let state = signed_in();
        order_add_item(Some(json!({ "id": "shirt", "name": "Shirt", "price": 4 })), &state)
            .unwrap();
        order_add_item(Some(json!({ "id": "shirt", "name": "Shirt", "price": 4 })), &state)
            .unwrap();
        let view = order_update_item_quantity(Some(json!({ "index": 0, "quantity": 3 })), &state)
            .unwrap();
        assert_eq!(view["order"]["selectedItems"][0]["quantity"], 3);
        assert_eq!(view["breakdown"]["subtotal"], 12.0);

        assert!(order_remove_item(Some(json!(5)), &state).is_err());
        let view = order_remove_item(Some(json!(0)), &state).unwrap();
        assert_eq!(view["removed"]["id"], "shirt");
        assert_eq!(view["order"]["selectedItems"].as_array().unwrap().len(), 0);
    }

    #[test]
    fn status_update_goes_through_history() {
        let state = signed_in();
        order_add_item(Some(json!({ "id": "coat", "name": "Coat", "price": 9 })), &state).unwrap();
        order_set_field(
            Some(json!({ "field": "selectedCustomer", "value": { "id": "c1", "name": "Mo" } })),
            &state,
        )
        .unwrap();
        let submitted = {
            let mut order = state.order().unwrap();
            order.submit_order("u1", "s1", "a1", state.db.as_ref()).unwrap()
        };

        let updated =
            order_update_status(Some(json!(submitted.order_id)), Some("washing".into()), &state)
                .unwrap();
        assert_eq!(updated["status"], "Washing");

        let listed = order_list(Some(json!("washing")), &state).unwrap();
        assert_eq!(listed["count"], 1);
        let fetched = order_get(Some(json!(submitted.order_id)), &state).unwrap();
        assert_eq!(fetched["orderId"], submitted.order_id.as_str());
    }
}
