//! Per-store business settings.
//!
//! The `storeSettings/{storeId}` document is resolved once into a typed
//! [`StoreSettings`]. Every field has a default, numbers stored as strings
//! are accepted, and out-of-range values are replaced by the defaults here
//! rather than at each call site. Resolution fails open: a missing or
//! unreadable document yields the defaults.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::db::DocumentStore;

pub const STORE_SETTINGS_COLLECTION: &str = "storeSettings";

pub const DEFAULT_SHIFT_START_HOUR: u32 = 6;
pub const DEFAULT_SHIFT_END_HOUR: u32 = 22;
pub const DEFAULT_MAX_HOURS_PER_SHIFT: f64 = 16.0;
pub const DEFAULT_IDLE_TIMEOUT_MINUTES: u32 = 5;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TaxRate {
    pub name: String,
    #[serde(deserialize_with = "lenient_f64")]
    pub rate: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TaxSettings {
    pub tax1: Option<TaxRate>,
    pub tax2: Option<TaxRate>,
    pub tax3: Option<TaxRate>,
}

impl TaxSettings {
    /// Configured taxes with a positive rate, in order.
    pub fn active(&self) -> Vec<TaxRate> {
        [&self.tax1, &self.tax2, &self.tax3]
            .into_iter()
            .flatten()
            .filter(|t| t.rate > 0.0)
            .cloned()
            .collect()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PaymentSettings {
    /// Percentage taken off when the customer pays cash.
    #[serde(deserialize_with = "lenient_f64")]
    pub cash_discount: f64,
    #[serde(deserialize_with = "lenient_bool")]
    pub allow_partial_payment: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ShiftSettings {
    #[serde(deserialize_with = "lenient_u32")]
    pub shift_start_hour: u32,
    #[serde(deserialize_with = "lenient_u32")]
    pub shift_end_hour: u32,
    #[serde(deserialize_with = "lenient_f64")]
    pub max_hours_per_shift: f64,
    #[serde(deserialize_with = "lenient_f64")]
    pub overtime_allowance_hours: f64,
    #[serde(deserialize_with = "lenient_bool")]
    pub auto_clock_in: bool,
    #[serde(deserialize_with = "lenient_bool")]
    pub auto_clock_out: bool,
}

impl Default for ShiftSettings {
    fn default() -> Self {
        Self {
            shift_start_hour: DEFAULT_SHIFT_START_HOUR,
            shift_end_hour: DEFAULT_SHIFT_END_HOUR,
            max_hours_per_shift: DEFAULT_MAX_HOURS_PER_SHIFT,
            overtime_allowance_hours: 0.0,
            auto_clock_in: false,
            auto_clock_out: false,
        }
    }
}

impl ShiftSettings {
    /// Upper bound on recorded hours for a single shift.
    pub fn hours_cap(&self) -> f64 {
        self.max_hours_per_shift + self.overtime_allowance_hours
    }

    /// Whether `hour` (0-23, local) falls inside `[start, end)`.
    pub fn within_window(&self, hour: u32) -> bool {
        hour >= self.shift_start_hour && hour < self.shift_end_hour
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StoreSettings {
    pub tax_settings: TaxSettings,
    pub payment_settings: PaymentSettings,
    pub shift_settings: ShiftSettings,
    /// Minutes without input before the PIN lock. 0 disables it.
    #[serde(deserialize_with = "lenient_u32")]
    pub idle_timeout_minutes: u32,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            tax_settings: TaxSettings::default(),
            payment_settings: PaymentSettings::default(),
            shift_settings: ShiftSettings::default(),
            idle_timeout_minutes: DEFAULT_IDLE_TIMEOUT_MINUTES,
        }
    }
}

impl StoreSettings {
    /// Decode a settings document, then replace out-of-range values.
    pub fn from_document(doc: &Value) -> Result<Self, serde_json::Error> {
        let parsed: StoreSettings = serde_json::from_value(doc.clone())?;
        Ok(parsed.sanitized())
    }

    fn sanitized(mut self) -> Self {
        let shift = &mut self.shift_settings;
        if shift.shift_start_hour > 23
            || shift.shift_end_hour > 24
            || shift.shift_start_hour >= shift.shift_end_hour
        {
            warn!(
                start = shift.shift_start_hour,
                end = shift.shift_end_hour,
                "invalid shift window, using default"
            );
            shift.shift_start_hour = DEFAULT_SHIFT_START_HOUR;
            shift.shift_end_hour = DEFAULT_SHIFT_END_HOUR;
        }
        if shift.max_hours_per_shift <= 0.0 {
            shift.max_hours_per_shift = DEFAULT_MAX_HOURS_PER_SHIFT;
        }
        shift.overtime_allowance_hours = shift.overtime_allowance_hours.max(0.0);

        let pay = &mut self.payment_settings;
        pay.cash_discount = pay.cash_discount.clamp(0.0, 100.0);

        for tax in [
            &mut self.tax_settings.tax1,
            &mut self.tax_settings.tax2,
            &mut self.tax_settings.tax3,
        ]
        .into_iter()
        .flatten()
        {
            tax.rate = tax.rate.clamp(0.0, 100.0);
        }
        self
    }
}

/// Load settings for a store. Never fails: store errors and malformed
/// documents fall back to the defaults.
pub fn resolve_store_settings(store: &dyn DocumentStore, store_id: &str) -> StoreSettings {
    match store.get(STORE_SETTINGS_COLLECTION, store_id) {
        Ok(Some(doc)) => match StoreSettings::from_document(&doc) {
            Ok(settings) => {
                debug!(store_id, "store settings resolved");
                settings
            }
            Err(e) => {
                warn!(store_id, error = %e, "malformed store settings, using defaults");
                StoreSettings::default()
            }
        },
        Ok(None) => {
            debug!(store_id, "no store settings document, using defaults");
            StoreSettings::default()
        }
        Err(e) => {
            warn!(store_id, error = %e, "store settings fetch failed, using defaults");
            StoreSettings::default()
        }
    }
}

// ---------------------------------------------------------------------------
// Lenient field decoders
// ---------------------------------------------------------------------------

fn lenient_f64<'de, D: Deserializer<'de>>(d: D) -> Result<f64, D::Error> {
    let v = Value::deserialize(d)?;
    Ok(value_as_f64(&v).filter(|n| n.is_finite()).unwrap_or(0.0))
}

fn lenient_u32<'de, D: Deserializer<'de>>(d: D) -> Result<u32, D::Error> {
    let v = Value::deserialize(d)?;
    Ok(value_as_f64(&v)
        .filter(|n| n.is_finite() && *n >= 0.0)
        .map(|n| n.min(u32::MAX as f64) as u32)
        .unwrap_or(0))
}

fn lenient_bool<'de, D: Deserializer<'de>>(d: D) -> Result<bool, D::Error> {
    let v = Value::deserialize(d)?;
    Ok(match v {
        Value::Bool(b) => b,
        Value::Number(n) => n.as_f64().map(|x| x != 0.0).unwrap_or(false),
        Value::String(s) => matches!(
            s.trim().to_ascii_lowercase().as_str(),
            "true" | "1" | "yes" | "on"
        ),
        _ => false,
    })
}

pub(crate) fn value_as_f64(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}
