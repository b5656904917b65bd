//! In-progress order state.
//!
//! [`OrderStore`] is the single owner of the order being built at the
//! counter. Every mutation goes through it; mutations that affect money
//! recompute the totals before returning, and every change is mirrored to
//! local storage under `orderState` so a restart resumes the same order.
//! Store-level settings (taxes, payment settings) are never persisted with
//! the order; they are re-applied from [`StoreSettings`] on load.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::change;
use crate::db::{DbState, DocumentStore};
use crate::error::{PosError, PosResult};
use crate::pricing::{self, Discount, PriceBreakdown, PricedLine, PricingInput, TaxLine};
use crate::settings::{PaymentSettings, StoreSettings, TaxSettings};
use crate::storage::{self, KEY_ORDER_STATE};

/// Upper bound for a single line's quantity.
pub const MAX_LINE_QUANTITY: u32 = 9_999;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PaymentMethod {
    Cash,
    Card,
    BankTransfer,
    PayOnCollection,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Cash => "cash",
            PaymentMethod::Card => "card",
            PaymentMethod::BankTransfer => "bankTransfer",
            PaymentMethod::PayOnCollection => "payOnCollection",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().replace(['_', '-', ' '], "").as_str() {
            "cash" => Some(PaymentMethod::Cash),
            "card" | "creditcard" | "debitcard" => Some(PaymentMethod::Card),
            "banktransfer" | "transfer" => Some(PaymentMethod::BankTransfer),
            "payoncollection" | "paylater" => Some(PaymentMethod::PayOnCollection),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DeliveryOption {
    #[default]
    Collection,
    Delivery,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    Pending,
    Washing,
    Ironing,
    Ready,
    Completed,
    Collected,
    Cancelled,
}

impl OrderStatus {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Some(OrderStatus::Pending),
            "washing" => Some(OrderStatus::Washing),
            "ironing" => Some(OrderStatus::Ironing),
            "ready" => Some(OrderStatus::Ready),
            "completed" => Some(OrderStatus::Completed),
            "collected" => Some(OrderStatus::Collected),
            "cancelled" | "canceled" => Some(OrderStatus::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Collected | OrderStatus::Cancelled)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LineItem {
    pub id: String,
    pub name: String,
    pub price: f64,
    pub quantity: u32,
    #[serde(default)]
    pub stain_damage: Vec<String>,
    #[serde(default)]
    pub physical_damage: Vec<String>,
    #[serde(default)]
    pub color: Option<String>,
}

/// A garment picked at the counter, before it becomes a line.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewItem {
    pub id: String,
    pub name: String,
    pub price: f64,
    #[serde(default)]
    pub stain_damage: Vec<String>,
    #[serde(default)]
    pub physical_damage: Vec<String>,
    #[serde(default)]
    pub color: Option<String>,
}

fn same_set(a: &[String], b: &[String]) -> bool {
    let mut a: Vec<&str> = a.iter().map(String::as_str).collect();
    let mut b: Vec<&str> = b.iter().map(String::as_str).collect();
    a.sort_unstable();
    a.dedup();
    b.sort_unstable();
    b.dedup();
    a == b
}

impl LineItem {
    /// Same garment: id, colour and both damage sets match.
    fn matches(&self, item: &NewItem) -> bool {
        self.id == item.id
            && self.color == item.color
            && same_set(&self.stain_damage, &item.stain_damage)
            && same_set(&self.physical_damage, &item.physical_damage)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomerSnapshot {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub tax_exempt: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceList {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    pub multiplier: f64,
}

impl Default for PriceList {
    fn default() -> Self {
        Self {
            id: None,
            name: None,
            multiplier: 1.0,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FormData {
    pub bag_quantity: u32,
    pub delivery_fee: f64,
    pub express_delivery_charge: f64,
    pub credit: f64,
    pub discount_percentage: Option<f64>,
    pub discount_fixed: Option<f64>,
    pub payment_method: Option<PaymentMethod>,
    pub cash_from_customer: String,
    pub subtotal: f64,
    pub total: f64,
}

impl FormData {
    pub fn discount(&self) -> Discount {
        match (self.discount_percentage, self.discount_fixed) {
            (Some(pct), _) => Discount::Percentage(pct),
            (None, Some(fixed)) => Discount::Fixed(fixed),
            (None, None) => Discount::None,
        }
    }

    pub fn cash_tendered(&self) -> f64 {
        change::parse_tendered(&self.cash_from_customer)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OrderState {
    pub selected_items: Vec<LineItem>,
    pub selected_customer: Option<CustomerSnapshot>,
    pub is_express: bool,
    pub is_repeat: bool,
    pub delivery_option: DeliveryOption,
    pub pickup_date: Option<DateTime<Utc>>,
    pub delivery_date: Option<DateTime<Utc>>,
    pub selected_price_list: PriceList,
    pub form_data: FormData,
    pub order_complete: bool,
    pub last_order_id: Option<String>,

    #[serde(skip)]
    pub tax_settings: TaxSettings,
    #[serde(skip)]
    pub payment_settings: PaymentSettings,
    #[serde(skip)]
    pub breakdown: PriceBreakdown,
}

impl OrderState {
    pub fn is_empty(&self) -> bool {
        self.selected_items.is_empty() && self.selected_customer.is_none()
    }

    fn pricing_input(&self) -> PricingInput {
        PricingInput {
            lines: self
                .selected_items
                .iter()
                .map(|i| PricedLine {
                    price: i.price,
                    quantity: i.quantity,
                })
                .collect(),
            multiplier: self.selected_price_list.multiplier,
            discount: self.form_data.discount(),
            is_express: self.is_express,
            express_charge: self.form_data.express_delivery_charge,
            pays_cash: self.form_data.payment_method == Some(PaymentMethod::Cash),
            cash_discount_percent: self.payment_settings.cash_discount,
            taxes: self.tax_settings.active(),
            tax_exempt: self
                .selected_customer
                .as_ref()
                .map(|c| c.tax_exempt)
                .unwrap_or(false),
            delivery_fee: if self.delivery_option == DeliveryOption::Delivery {
                self.form_data.delivery_fee
            } else {
                0.0
            },
            credit: self.form_data.credit,
        }
    }
}

/// Order-level field updates.
#[derive(Debug, Clone, PartialEq)]
pub enum OrderField {
    Customer(Option<CustomerSnapshot>),
    Express(bool),
    Repeat(bool),
    DeliveryOption(DeliveryOption),
    PickupDate(Option<DateTime<Utc>>),
    DeliveryDate(Option<DateTime<Utc>>),
    PriceList(PriceList),
}

/// Checkout form updates. Subtotal and total are not settable.
#[derive(Debug, Clone, PartialEq)]
pub enum FormField {
    BagQuantity(u32),
    DeliveryFee(f64),
    ExpressDeliveryCharge(f64),
    Credit(f64),
    /// Setting a percentage clears any fixed discount.
    DiscountPercentage(Option<f64>),
    /// Setting a fixed amount clears any percentage discount.
    DiscountFixed(Option<f64>),
    PaymentMethod(Option<PaymentMethod>),
    CashFromCustomer(String),
}

// ---------------------------------------------------------------------------
// Submitted order
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentSummary {
    pub method: Option<PaymentMethod>,
    pub subtotal: f64,
    pub discount_percentage: Option<f64>,
    pub discount_fixed: Option<f64>,
    pub discount_amount: f64,
    pub cash_discount_amount: f64,
    pub express_charge: f64,
    pub tax_amount: f64,
    pub tax_lines: Vec<TaxLine>,
    pub delivery_fee: f64,
    pub credit: f64,
    pub total: f64,
    pub cash_from_customer: f64,
    pub change: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmittedOrder {
    pub order_id: String,
    pub admin_id: String,
    pub store_id: String,
    pub created_by: String,
    pub customer: CustomerSnapshot,
    pub items: Vec<LineItem>,
    pub is_express: bool,
    pub is_repeat: bool,
    pub delivery_option: DeliveryOption,
    pub pickup_date: Option<DateTime<Utc>>,
    pub delivery_date: Option<DateTime<Utc>>,
    pub bag_quantity: u32,
    pub price_list: PriceList,
    pub payment: PaymentSummary,
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

/// `pos_orders/{adminId}/stores/{storeId}/orders`
pub fn orders_collection(admin_id: &str, store_id: &str) -> String {
    format!("pos_orders/{admin_id}/stores/{store_id}/orders")
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

pub struct OrderStore {
    db: Arc<DbState>,
    state: OrderState,
}

impl OrderStore {
    /// Rehydrate the in-progress order from local storage and apply the
    /// store's current settings.
    pub fn load(db: Arc<DbState>, settings: &StoreSettings) -> Self {
        let state = match storage::get_json::<OrderState>(&db, KEY_ORDER_STATE) {
            Ok(Some(state)) => {
                debug!(items = state.selected_items.len(), "resumed in-progress order");
                state
            }
            Ok(None) => OrderState::default(),
            Err(e) => {
                warn!(error = %e, "could not read persisted order, starting fresh");
                OrderState::default()
            }
        };
        let mut store = Self { db, state };
        store.apply_settings(settings);
        store
    }

    pub fn state(&self) -> &OrderState {
        &self.state
    }

    pub fn breakdown(&self) -> &PriceBreakdown {
        &self.state.breakdown
    }

    /// Replace the settings-only fields. Totals follow.
    pub fn apply_settings(&mut self, settings: &StoreSettings) {
        self.state.tax_settings = settings.tax_settings.clone();
        self.state.payment_settings = settings.payment_settings.clone();
        self.recalculate();
    }

    pub fn set_field(&mut self, field: OrderField) {
        let affects_price = !matches!(
            field,
            OrderField::Repeat(_) | OrderField::PickupDate(_) | OrderField::DeliveryDate(_)
        );
        match field {
            OrderField::Customer(c) => self.state.selected_customer = c,
            OrderField::Express(v) => self.state.is_express = v,
            OrderField::Repeat(v) => self.state.is_repeat = v,
            OrderField::DeliveryOption(v) => self.state.delivery_option = v,
            OrderField::PickupDate(d) => self.state.pickup_date = d,
            OrderField::DeliveryDate(d) => self.state.delivery_date = d,
            OrderField::PriceList(p) => self.state.selected_price_list = p,
        }
        self.changed(affects_price);
    }

    pub fn set_form_field(&mut self, field: FormField) {
        let form = &mut self.state.form_data;
        let affects_price = !matches!(
            field,
            FormField::BagQuantity(_) | FormField::CashFromCustomer(_)
        );
        match field {
            FormField::BagQuantity(q) => form.bag_quantity = q,
            FormField::DeliveryFee(v) => form.delivery_fee = v,
            FormField::ExpressDeliveryCharge(v) => form.express_delivery_charge = v,
            FormField::Credit(v) => form.credit = v,
            FormField::DiscountPercentage(v) => {
                form.discount_percentage = v.map(pricing::clamp_percent);
                if v.is_some() {
                    form.discount_fixed = None;
                }
            }
            FormField::DiscountFixed(v) => {
                form.discount_fixed = v;
                if v.is_some() {
                    form.discount_percentage = None;
                }
            }
            FormField::PaymentMethod(m) => form.payment_method = m,
            FormField::CashFromCustomer(s) => form.cash_from_customer = s,
        }
        self.changed(affects_price);
    }

    /// Add one unit of a garment. An identical line gets its quantity
    /// bumped instead of a new line.
    pub fn add_item(&mut self, item: NewItem) {
        self.state.order_complete = false;
        if let Some(line) = self
            .state
            .selected_items
            .iter_mut()
            .find(|line| line.matches(&item))
        {
            line.quantity = line.quantity.saturating_add(1).min(MAX_LINE_QUANTITY);
        } else {
            self.state.selected_items.push(LineItem {
                id: item.id,
                name: item.name,
                price: item.price,
                quantity: 1,
                stain_damage: item.stain_damage,
                physical_damage: item.physical_damage,
                color: item.color,
            });
        }
        self.changed(true);
    }

    /// Quantities are held within `1..=MAX_LINE_QUANTITY`.
    pub fn update_item_quantity(&mut self, index: usize, quantity: i64) -> PosResult<()> {
        let line = self
            .state
            .selected_items
            .get_mut(index)
            .ok_or_else(|| PosError::not_found(format!("Order line {index}")))?;
        line.quantity = quantity.clamp(1, i64::from(MAX_LINE_QUANTITY)) as u32;
        self.changed(true);
        Ok(())
    }

    pub fn remove_item(&mut self, index: usize) -> PosResult<LineItem> {
        if index >= self.state.selected_items.len() {
            return Err(PosError::not_found(format!("Order line {index}")));
        }
        let removed = self.state.selected_items.remove(index);
        self.changed(true);
        Ok(removed)
    }

    /// Clear the order. Store settings and the chosen price list stay.
    pub fn reset_order(&mut self) {
        self.clear_in_progress();
        self.state.order_complete = false;
        self.state.last_order_id = None;
        if let Err(e) = storage::remove_item(&self.db, KEY_ORDER_STATE) {
            warn!(error = %e, "failed to clear persisted order");
        }
        info!("order reset");
    }

    /// Validate, snapshot and write the order once. On success the
    /// in-progress order is cleared and `order_complete` is set. A failed
    /// write leaves the order untouched and is returned to the caller.
    pub fn submit_order(
        &mut self,
        user_id: &str,
        store_id: &str,
        admin_id: &str,
        store: &dyn DocumentStore,
    ) -> PosResult<SubmittedOrder> {
        if self.state.selected_items.is_empty() {
            return Err(PosError::validation("Add at least one item to the order"));
        }
        let customer = self
            .state
            .selected_customer
            .clone()
            .ok_or_else(|| PosError::validation("Select a customer before submitting"))?;

        self.recalculate();
        let b = &self.state.breakdown;
        let form = &self.state.form_data;
        let tendered = form.cash_tendered();
        let is_cash = form.payment_method == Some(PaymentMethod::Cash);

        let order = SubmittedOrder {
            order_id: Uuid::new_v4().to_string(),
            admin_id: admin_id.to_string(),
            store_id: store_id.to_string(),
            created_by: user_id.to_string(),
            customer,
            items: self.state.selected_items.clone(),
            is_express: self.state.is_express,
            is_repeat: self.state.is_repeat,
            delivery_option: self.state.delivery_option,
            pickup_date: self.state.pickup_date,
            delivery_date: self.state.delivery_date,
            bag_quantity: form.bag_quantity,
            price_list: self.state.selected_price_list.clone(),
            payment: PaymentSummary {
                method: form.payment_method,
                subtotal: b.subtotal,
                discount_percentage: form.discount_percentage,
                discount_fixed: form.discount_fixed,
                discount_amount: b.discount_amount,
                cash_discount_amount: b.cash_discount_amount,
                express_charge: b.express_charge,
                tax_amount: b.tax_amount,
                tax_lines: b.tax_lines.clone(),
                delivery_fee: b.delivery_fee,
                credit: b.credit,
                total: b.total,
                cash_from_customer: if is_cash { tendered } else { 0.0 },
                change: if is_cash {
                    change::calculate_change(b.total, tendered)
                } else {
                    0.0
                },
            },
            status: OrderStatus::Pending,
            created_at: Utc::now(),
            updated_at: None,
        };

        let doc = serde_json::to_value(&order)?;
        store
            .set(&orders_collection(admin_id, store_id), &order.order_id, &doc)
            .map_err(|e| {
                warn!(error = %e, "order write failed");
                match e {
                    PosError::Remote(msg) => PosError::Remote(msg),
                    other => PosError::remote(other.to_string()),
                }
            })?;

        info!(
            order_id = %order.order_id,
            store_id = %store_id,
            items = order.items.len(),
            total = %pricing::format_money(order.payment.total),
            "Order submitted"
        );

        self.clear_in_progress();
        self.state.order_complete = true;
        self.state.last_order_id = Some(order.order_id.clone());
        if let Err(e) = storage::remove_item(&self.db, KEY_ORDER_STATE) {
            warn!(error = %e, "failed to clear persisted order after submit");
        }

        Ok(order)
    }

    pub fn to_json(&self) -> serde_json::Value {
        json!({
            "order": self.state,
            "breakdown": self.state.breakdown,
        })
    }

    fn clear_in_progress(&mut self) {
        let price_list = self.state.selected_price_list.clone();
        let tax_settings = std::mem::take(&mut self.state.tax_settings);
        let payment_settings = std::mem::take(&mut self.state.payment_settings);
        self.state = OrderState {
            selected_price_list: price_list,
            tax_settings,
            payment_settings,
            ..OrderState::default()
        };
        self.recalculate();
    }

    fn recalculate(&mut self) {
        let breakdown = pricing::calculate(&self.state.pricing_input());
        self.state.form_data.subtotal = breakdown.subtotal;
        self.state.form_data.total = breakdown.total;
        self.state.breakdown = breakdown;
    }

    fn changed(&mut self, affects_price: bool) {
        if affects_price {
            self.recalculate();
        }
        self.persist();
    }

    fn persist(&self) {
        if let Err(e) = storage::set_json(&self.db, KEY_ORDER_STATE, &self.state) {
            warn!(error = %e, "failed to persist in-progress order");
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
