//! Four-step checkout flow.
//!
//! ```text
//! BagQuantity(1) -> PaymentMethod(2) -> ChangeCalculator(3, cash only) -> Confirmation(4)
//!                                   \___________ non-cash ____________/
//! ```
//!
//! Each step has a guard; there is no way back except cancelling, which
//! returns to step 1 without writing anything. Picking a payment method
//! advances the flow on its own.

use serde::Serialize;
use tracing::{debug, info};

use crate::change;
use crate::db::DocumentStore;
use crate::error::{PosError, PosResult};
use crate::order::{FormField, OrderState, OrderStore, PaymentMethod, SubmittedOrder};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum CheckoutStep {
    BagQuantity,
    PaymentMethod,
    ChangeCalculator,
    Confirmation,
}

impl CheckoutStep {
    pub fn number(&self) -> u8 {
        match self {
            CheckoutStep::BagQuantity => 1,
            CheckoutStep::PaymentMethod => 2,
            CheckoutStep::ChangeCalculator => 3,
            CheckoutStep::Confirmation => 4,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutFlow {
    step: CheckoutStep,
    payment_modal_open: bool,
}

impl Default for CheckoutFlow {
    fn default() -> Self {
        Self::new()
    }
}

impl CheckoutFlow {
    pub fn new() -> Self {
        Self {
            step: CheckoutStep::BagQuantity,
            payment_modal_open: false,
        }
    }

    pub fn step(&self) -> CheckoutStep {
        self.step
    }

    pub fn payment_modal_open(&self) -> bool {
        self.payment_modal_open
    }

    /// Guard for leaving `step`.
    pub fn can_proceed(step: CheckoutStep, order: &OrderState) -> bool {
        let form = &order.form_data;
        match step {
            CheckoutStep::BagQuantity => form.bag_quantity > 0,
            CheckoutStep::PaymentMethod => form.payment_method.is_some(),
            CheckoutStep::ChangeCalculator => {
                change::can_proceed(form.total, form.cash_tendered())
            }
            CheckoutStep::Confirmation => true,
        }
    }

    pub fn set_bag_quantity(&mut self, order: &mut OrderStore, quantity: u32) {
        order.set_form_field(FormField::BagQuantity(quantity));
    }

    pub fn set_cash_tendered(&mut self, order: &mut OrderStore, raw: &str) {
        order.set_form_field(FormField::CashFromCustomer(raw.to_string()));
    }

    /// Change owed for the cash currently typed in.
    pub fn change_due(order: &OrderState) -> f64 {
        change::calculate_change(order.form_data.total, order.form_data.cash_tendered())
    }

    /// Move past the current step if its guard allows it.
    pub fn proceed(&mut self, order: &OrderState) -> PosResult<CheckoutStep> {
        if !Self::can_proceed(self.step, order) {
            return Err(PosError::validation(match self.step {
                CheckoutStep::BagQuantity => "Enter the number of bags",
                CheckoutStep::PaymentMethod => "Select a payment method",
                CheckoutStep::ChangeCalculator => "Cash received is less than the total",
                CheckoutStep::Confirmation => "Order is ready to confirm",
            }));
        }

        let next = match self.step {
            CheckoutStep::BagQuantity => CheckoutStep::PaymentMethod,
            CheckoutStep::PaymentMethod => {
                if order.form_data.payment_method == Some(PaymentMethod::Cash) {
                    CheckoutStep::ChangeCalculator
                } else {
                    CheckoutStep::Confirmation
                }
            }
            CheckoutStep::ChangeCalculator => CheckoutStep::Confirmation,
            CheckoutStep::Confirmation => {
                return Err(PosError::validation("Confirm the order to finish"));
            }
        };
        self.enter(next);
        Ok(next)
    }

    /// Record the method picked in the payment modal and advance.
    pub fn select_payment_method(
        &mut self,
        order: &mut OrderStore,
        method: PaymentMethod,
    ) -> PosResult<CheckoutStep> {
        if self.step != CheckoutStep::PaymentMethod {
            return Err(PosError::validation(
                "Payment method can only be chosen at the payment step",
            ));
        }
        order.set_form_field(FormField::PaymentMethod(Some(method)));
        self.payment_modal_open = false;
        self.proceed(order.state())
    }

    /// Commit the order from the confirmation step. The flow returns to
    /// step 1 on success; on failure it stays put so the user can retry.
    pub fn complete(
        &mut self,
        order: &mut OrderStore,
        user_id: &str,
        store_id: &str,
        admin_id: &str,
        store: &dyn DocumentStore,
    ) -> PosResult<SubmittedOrder> {
        if self.step != CheckoutStep::Confirmation {
            return Err(PosError::validation("Finish the previous checkout steps first"));
        }
        // The order may have changed since each guard passed.
        if let Some(step) = Self::first_failing_step(order.state()) {
            self.enter(step);
            return Err(PosError::validation(match step {
                CheckoutStep::BagQuantity => "Enter the number of bags",
                CheckoutStep::PaymentMethod => "Select a payment method",
                _ => "Cash received is less than the total",
            }));
        }
        let submitted = order.submit_order(user_id, store_id, admin_id, store)?;
        info!(order_id = %submitted.order_id, "checkout completed");
        self.reset();
        Ok(submitted)
    }

    /// Earliest step whose guard no longer holds for `order`.
    fn first_failing_step(order: &OrderState) -> Option<CheckoutStep> {
        let pays_cash = order.form_data.payment_method == Some(PaymentMethod::Cash);
        [
            CheckoutStep::BagQuantity,
            CheckoutStep::PaymentMethod,
            CheckoutStep::ChangeCalculator,
        ]
        .into_iter()
        .filter(|step| *step != CheckoutStep::ChangeCalculator || pays_cash)
        .find(|step| !Self::can_proceed(*step, order))
    }

    /// Abandon checkout. Nothing is written.
    pub fn cancel(&mut self) {
        debug!(step = self.step.number(), "checkout cancelled");
        self.reset();
    }

    fn enter(&mut self, step: CheckoutStep) {
        debug!(from = self.step.number(), to = step.number(), "checkout step");
        self.step = step;
        self.payment_modal_open = step == CheckoutStep::PaymentMethod;
    }

    fn reset(&mut self) {
        self.step = CheckoutStep::BagQuantity;
        self.payment_modal_open = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{self, DbState};
    use crate::order::{CustomerSnapshot, NewItem, OrderField, OrderStatus};
    use crate::settings::{StoreSettings, TaxRate};
    use std::sync::Arc;

    fn order_with_item(db: Arc<DbState>) -> OrderStore {
        let mut settings = StoreSettings::default();
        settings.tax_settings.tax1 = Some(TaxRate {
            name: "VAT".into(),
            rate: 5.0,
        });
        let mut store = OrderStore::load(db, &settings);
        let item = NewItem {
            id: "duvet".into(),
            name: "Duvet".into(),
            price: 10.0,
            ..Default::default()
        };
        store.add_item(item.clone());
        store.add_item(item);
        store.set_form_field(FormField::DiscountPercentage(Some(10.0)));
        store.set_field(OrderField::Customer(Some(CustomerSnapshot {
            id: "c1".into(),
            name: "Noor".into(),
            ..Default::default()
        })));
        store
    }

    #[test]
    fn test_bag_quantity_guard() {
        let db = Arc::new(db::open_in_memory().unwrap());
        let mut order = order_with_item(db);
        let mut flow = CheckoutFlow::new();

        assert!(flow.proceed(order.state()).is_err());
        assert_eq!(flow.step(), CheckoutStep::BagQuantity);

        flow.set_bag_quantity(&mut order, 2);
        assert_eq!(flow.proceed(order.state()).unwrap(), CheckoutStep::PaymentMethod);
        assert!(flow.payment_modal_open());
    }

    #[test]
    fn test_cash_path_blocks_until_enough_tendered() {
        let db = Arc::new(db::open_in_memory().unwrap());
        let mut order = order_with_item(db.clone());
        let mut flow = CheckoutFlow::new();
        flow.set_bag_quantity(&mut order, 1);
        flow.proceed(order.state()).unwrap();

        let step = flow
            .select_payment_method(&mut order, PaymentMethod::Cash)
            .unwrap();
        assert_eq!(step, CheckoutStep::ChangeCalculator);
        assert!(!flow.payment_modal_open());

        flow.set_cash_tendered(&mut order, "18");
        assert!(!CheckoutFlow::can_proceed(
            CheckoutStep::ChangeCalculator,
            order.state()
        ));
        assert!(flow.proceed(order.state()).is_err());

        flow.set_cash_tendered(&mut order, "20");
        assert!((CheckoutFlow::change_due(order.state()) - 1.1).abs() < 1e-9);
        assert_eq!(flow.proceed(order.state()).unwrap(), CheckoutStep::Confirmation);

        let submitted = flow
            .complete(&mut order, "u1", "s1", "a1", db.as_ref())
            .unwrap();
        assert_eq!(submitted.status, OrderStatus::Pending);
        assert_eq!(flow.step(), CheckoutStep::BagQuantity);
        assert!(order.state().order_complete);
    }

    #[test]
    fn test_card_skips_change_step() {
        let db = Arc::new(db::open_in_memory().unwrap());
        let mut order = order_with_item(db);
        let mut flow = CheckoutFlow::new();
        flow.set_bag_quantity(&mut order, 1);
        flow.proceed(order.state()).unwrap();
        let step = flow
            .select_payment_method(&mut order, PaymentMethod::Card)
            .unwrap();
        assert_eq!(step, CheckoutStep::Confirmation);
    }

    #[test]
    fn test_payment_method_rejected_outside_step_two() {
        let db = Arc::new(db::open_in_memory().unwrap());
        let mut order = order_with_item(db);
        let mut flow = CheckoutFlow::new();
        assert!(flow
            .select_payment_method(&mut order, PaymentMethod::Cash)
            .is_err());
    }

    #[test]
    fn test_cancel_resets_without_submitting() {
        let db = Arc::new(db::open_in_memory().unwrap());
        let mut order = order_with_item(db);
        let mut flow = CheckoutFlow::new();
        flow.set_bag_quantity(&mut order, 3);
        flow.proceed(order.state()).unwrap();
        flow.cancel();

        assert_eq!(flow.step(), CheckoutStep::BagQuantity);
        assert!(!flow.payment_modal_open());
        assert!(!order.state().order_complete);
        assert_eq!(order.state().selected_items.len(), 1);
    }

    #[test]
    fn test_complete_only_from_confirmation() {
        let db = Arc::new(db::open_in_memory().unwrap());
        let mut order = order_with_item(db.clone());
        let mut flow = CheckoutFlow::new();
        assert!(flow.complete(&mut order, "u1", "s1", "a1", db.as_ref()).is_err());
        assert!(!order.state().order_complete);
    }

    #[test]
    fn test_complete_rechecks_cash_after_order_grew() {
        let db = Arc::new(db::open_in_memory().unwrap());
        let mut order = order_with_item(db.clone());
        let mut flow = CheckoutFlow::new();
        flow.set_bag_quantity(&mut order, 1);
        flow.proceed(order.state()).unwrap();
        flow.select_payment_method(&mut order, PaymentMethod::Cash)
            .unwrap();
        flow.set_cash_tendered(&mut order, "20");
        flow.proceed(order.state()).unwrap();

        order.add_item(NewItem {
            id: "coat".into(),
            name: "Coat".into(),
            price: 30.0,
            ..Default::default()
        });
        assert!(flow.complete(&mut order, "u1", "s1", "a1", db.as_ref()).is_err());
        assert_eq!(flow.step(), CheckoutStep::ChangeCalculator);
        assert!(!order.state().order_complete);
    }

    #[test]
    fn test_complete_sends_cleared_payment_method_back_to_step_two() {
        let db = Arc::new(db::open_in_memory().unwrap());
        let mut order = order_with_item(db.clone());
        let mut flow = CheckoutFlow::new();
        flow.set_bag_quantity(&mut order, 1);
        flow.proceed(order.state()).unwrap();
        flow.select_payment_method(&mut order, PaymentMethod::Card)
            .unwrap();

        order.set_form_field(FormField::PaymentMethod(None));
        assert!(flow.complete(&mut order, "u1", "s1", "a1", db.as_ref()).is_err());
        assert_eq!(flow.step(), CheckoutStep::PaymentMethod);
        assert!(flow.payment_modal_open());
    }
}
