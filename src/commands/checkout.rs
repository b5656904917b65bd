//! Checkout flow commands. Locks are taken order first, then checkout.

use serde::Deserialize;
use serde_json::{json, Value};

use super::{object_or_keyed, to_message, CommandResult};
use crate::app::AppState;
use crate::checkout::CheckoutFlow;
use crate::order::{OrderStore, PaymentMethod};
use crate::pricing;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BagQuantityPayload {
    #[serde(alias = "bag_quantity", alias = "bags")]
    bag_quantity: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PaymentMethodPayload {
    #[serde(alias = "payment_method", alias = "paymentMethod")]
    method: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CashTenderedPayload {
    #[serde(alias = "cashFromCustomer", alias = "cash_from_customer")]
    amount: Value,
}

fn parse_bag_quantity_payload(arg0: Option<Value>) -> Result<u32, String> {
    let payload = object_or_keyed(arg0, "bagQuantity");
    let parsed: BagQuantityPayload = serde_json::from_value(payload)
        .map_err(|e| format!("Invalid bag quantity payload: {e}"))?;
    Ok(parsed.bag_quantity)
}

fn parse_payment_method_payload(arg0: Option<Value>) -> Result<PaymentMethod, String> {
    let payload = object_or_keyed(arg0, "method");
    let parsed: PaymentMethodPayload = serde_json::from_value(payload)
        .map_err(|e| format!("Invalid payment method payload: {e}"))?;
    PaymentMethod::parse(&parsed.method)
        .ok_or_else(|| format!("Unknown payment method: {}", parsed.method.trim()))
}

/// The raw text is kept as typed; parsing happens when the change is
/// computed.
fn parse_cash_tendered_payload(arg0: Option<Value>) -> Result<String, String> {
    let payload = object_or_keyed(arg0, "amount");
    let parsed: CashTenderedPayload = serde_json::from_value(payload)
        .map_err(|e| format!("Invalid cash payload: {e}"))?;
    match parsed.amount {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        Value::Null => Ok(String::new()),
        _ => Err("Cash amount must be text or a number".into()),
    }
}

fn flow_json(flow: &CheckoutFlow, order: &OrderStore) -> Value {
    let state = order.state();
    json!({
        "step": flow.step(),
        "stepNumber": flow.step().number(),
        "paymentModalOpen": flow.payment_modal_open(),
        "canProceed": CheckoutFlow::can_proceed(flow.step(), state),
        "total": state.form_data.total,
        "totalDisplay": pricing::format_money(state.form_data.total),
        "changeDue": CheckoutFlow::change_due(state),
        "order": order.to_json(),
    })
}

pub fn checkout_get_state(state: &AppState) -> CommandResult {
    let order = state.order().map_err(to_message)?;
    let flow = state.checkout().map_err(to_message)?;
    Ok(flow_json(&flow, &order))
}

pub fn checkout_set_bag_quantity(arg0: Option<Value>, state: &AppState) -> CommandResult {
    state.ensure_unlocked().map_err(to_message)?;
    let quantity = parse_bag_quantity_payload(arg0)?;
    let mut order = state.order().map_err(to_message)?;
    let mut flow = state.checkout().map_err(to_message)?;
    flow.set_bag_quantity(&mut order, quantity);
    Ok(flow_json(&flow, &order))
}

pub fn checkout_proceed(state: &AppState) -> CommandResult {
    state.ensure_unlocked().map_err(to_message)?;
    let order = state.order().map_err(to_message)?;
    let mut flow = state.checkout().map_err(to_message)?;
    flow.proceed(order.state()).map_err(to_message)?;
    Ok(flow_json(&flow, &order))
}

pub fn checkout_select_payment_method(arg0: Option<Value>, state: &AppState) -> CommandResult {
    state.ensure_unlocked().map_err(to_message)?;
    let method = parse_payment_method_payload(arg0)?;
    let mut order = state.order().map_err(to_message)?;
    let mut flow = state.checkout().map_err(to_message)?;
    flow.select_payment_method(&mut order, method)
        .map_err(to_message)?;
    Ok(flow_json(&flow, &order))
}

pub fn checkout_set_cash_tendered(arg0: Option<Value>, state: &AppState) -> CommandResult {
    state.ensure_unlocked().map_err(to_message)?;
    let raw = parse_cash_tendered_payload(arg0)?;
    let mut order = state.order().map_err(to_message)?;
    let mut flow = state.checkout().map_err(to_message)?;
    flow.set_cash_tendered(&mut order, &raw);
    Ok(flow_json(&flow, &order))
}

/// Submit from the confirmation step.
pub fn checkout_complete(arg0: Option<Value>, state: &AppState) -> CommandResult {
    state.ensure_unlocked().map_err(to_message)?;
    let ctx = state
        .session(&arg0.unwrap_or_else(|| json!({})))
        .map_err(to_message)?;
    let mut order = state.order().map_err(to_message)?;
    let mut flow = state.checkout().map_err(to_message)?;
    let submitted = flow
        .complete(
            &mut order,
            &ctx.user_id,
            &ctx.store_id,
            &ctx.admin_id,
            state.db.as_ref(),
        )
        .map_err(to_message)?;
    Ok(json!({
        "success": true,
        "order": submitted,
        "checkout": flow_json(&flow, &order),
    }))
}

pub fn checkout_cancel(state: &AppState) -> CommandResult {
    state.ensure_unlocked().map_err(to_message)?;
    let order = state.order().map_err(to_message)?;
    let mut flow = state.checkout().map_err(to_message)?;
    flow.cancel();
    Ok(flow_json(&flow, &order))
}
