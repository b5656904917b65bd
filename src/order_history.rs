//! Submitted orders: lookup, listing and status changes.
//!
//! Submitted orders are immutable apart from `status` and `updatedAt`.

use chrono::Utc;
use serde_json::json;
use tracing::{info, warn};

use crate::db::DocumentStore;
use crate::error::{PosError, PosResult};
use crate::order::{orders_collection, OrderStatus, SubmittedOrder};

pub fn get_order(
    store: &dyn DocumentStore,
    admin_id: &str,
    store_id: &str,
    order_id: &str,
) -> PosResult<SubmittedOrder> {
    let doc = store
        .get(&orders_collection(admin_id, store_id), order_id)?
        .ok_or_else(|| PosError::not_found(format!("Order {order_id}")))?;
    Ok(serde_json::from_value(doc)?)
}

/// Orders for a store, newest first, optionally filtered by status.
pub fn list_orders(
    store: &dyn DocumentStore,
    admin_id: &str,
    store_id: &str,
    status: Option<OrderStatus>,
) -> PosResult<Vec<SubmittedOrder>> {
    let mut orders: Vec<SubmittedOrder> = store
        .list(&orders_collection(admin_id, store_id))?
        .into_iter()
        .filter_map(|(id, doc)| match serde_json::from_value::<SubmittedOrder>(doc) {
            Ok(o) => Some(o),
            Err(e) => {
                warn!(order_id = %id, error = %e, "skipping unreadable order");
                None
            }
        })
        .filter(|o| status.map_or(true, |s| o.status == s))
        .collect();
    orders.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    Ok(orders)
}

/// Move an order to `status`. Collected and cancelled orders are final.
pub fn update_order_status(
    store: &dyn DocumentStore,
    admin_id: &str,
    store_id: &str,
    order_id: &str,
    status: OrderStatus,
) -> PosResult<SubmittedOrder> {
    let mut order = get_order(store, admin_id, store_id, order_id)?;
    if order.status == status {
        return Ok(order);
    }
    if order.status.is_terminal() {
        return Err(PosError::validation(format!(
            "Order {order_id} is {:?} and can no longer change status",
            order.status
        )));
    }

    let now = Utc::now();
    store.update(
        &orders_collection(admin_id, store_id),
        order_id,
        &json!({ "status": status, "updatedAt": now }),
    )?;
    info!(order_id, from = ?order.status, to = ?status, "Order status updated");

    order.status = status;
    order.updated_at = Some(now);
    Ok(order)
}
