//! Order pricing.
//!
//! Pure arithmetic over the in-progress order. Everything accumulates as
//! unrounded `f64`; [`format_money`] rounds for display only.
//!
//! ```text
//! subtotal      = Σ price × quantity × multiplier
//! discount      = min(subtotal, pct% of subtotal | fixed)
//! cash_discount = (subtotal − discount) × cashDiscount%      (cash only)
//! taxable       = subtotal − discount − cash_discount
//! tax           = Σ taxable × rate_i%                       (unless exempt)
//! total         = taxable + express + tax + delivery_fee − credit
//! ```
//!
//! Bad inputs never raise: non-finite or negative amounts read as 0,
//! percentages clamp to [0, 100], a non-positive multiplier reads as 1.

use serde::{Deserialize, Serialize};

use crate::settings::TaxRate;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PricedLine {
    pub price: f64,
    pub quantity: u32,
}

/// Percentage and fixed discounts are mutually exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "kind", content = "value", rename_all = "camelCase")]
pub enum Discount {
    #[default]
    None,
    Percentage(f64),
    Fixed(f64),
}

#[derive(Debug, Clone, Default)]
pub struct PricingInput {
    pub lines: Vec<PricedLine>,
    pub multiplier: f64,
    pub discount: Discount,
    pub is_express: bool,
    pub express_charge: f64,
    pub pays_cash: bool,
    pub cash_discount_percent: f64,
    pub taxes: Vec<TaxRate>,
    pub tax_exempt: bool,
    pub delivery_fee: f64,
    pub credit: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaxLine {
    pub name: String,
    pub rate: f64,
    pub amount: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceBreakdown {
    pub subtotal: f64,
    pub discount_amount: f64,
    pub cash_discount_amount: f64,
    pub express_charge: f64,
    pub taxable_amount: f64,
    pub tax_amount: f64,
    pub tax_lines: Vec<TaxLine>,
    pub delivery_fee: f64,
    pub credit: f64,
    pub total: f64,
}

/// Non-finite and negative amounts read as 0.
pub fn sanitize_amount(v: f64) -> f64 {
    if v.is_finite() && v > 0.0 {
        v
    } else {
        0.0
    }
}

pub fn clamp_percent(v: f64) -> f64 {
    if v.is_finite() {
        v.clamp(0.0, 100.0)
    } else {
        0.0
    }
}

fn effective_multiplier(m: f64) -> f64 {
    if m.is_finite() && m > 0.0 {
        m
    } else {
        1.0
    }
}

pub fn subtotal(lines: &[PricedLine], multiplier: f64) -> f64 {
    let multiplier = effective_multiplier(multiplier);
    lines
        .iter()
        .map(|l| sanitize_amount(l.price) * f64::from(l.quantity) * multiplier)
        .fold(0.0, |acc, v| acc + v)
}

/// Discount amount, never more than `subtotal`.
pub fn discount_amount(subtotal: f64, discount: Discount) -> f64 {
    let raw = match discount {
        Discount::None => 0.0,
        Discount::Percentage(pct) => subtotal * clamp_percent(pct) / 100.0,
        Discount::Fixed(amount) => sanitize_amount(amount),
    };
    raw.min(subtotal).max(0.0)
}

pub fn calculate(input: &PricingInput) -> PriceBreakdown {
    let subtotal = subtotal(&input.lines, input.multiplier);
    let discount_amount = discount_amount(subtotal, input.discount);

    let cash_discount_amount = if input.pays_cash {
        (subtotal - discount_amount) * clamp_percent(input.cash_discount_percent) / 100.0
    } else {
        0.0
    };

    let taxable_amount = subtotal - discount_amount - cash_discount_amount;

    let tax_lines: Vec<TaxLine> = if input.tax_exempt {
        Vec::new()
    } else {
        input
            .taxes
            .iter()
            .map(|t| {
                let rate = clamp_percent(t.rate);
                TaxLine {
                    name: t.name.clone(),
                    rate,
                    amount: taxable_amount * rate / 100.0,
                }
            })
            .filter(|l| l.rate > 0.0)
            .collect()
    };
    let tax_amount = tax_lines.iter().fold(0.0, |acc, l| acc + l.amount);

    let express_charge = if input.is_express {
        sanitize_amount(input.express_charge)
    } else {
        0.0
    };
    let delivery_fee = sanitize_amount(input.delivery_fee);
    let credit = sanitize_amount(input.credit);

    let total = taxable_amount + express_charge + tax_amount + delivery_fee - credit;

    PriceBreakdown {
        subtotal,
        discount_amount,
        cash_discount_amount,
        express_charge,
        taxable_amount,
        tax_amount,
        tax_lines,
        delivery_fee,
        credit,
        total,
    }
}

/// Round half away from zero to two decimals.
pub fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

pub fn format_money(v: f64) -> String {
    // `+ 0.0` turns a negative zero into zero.
    format!("{:.2}", round2(v) + 0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vat(rate: f64) -> TaxRate {
        TaxRate {
            name: "VAT".into(),
            rate,
        }
    }

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_reference_example() {
        let input = PricingInput {
            lines: vec![PricedLine {
                price: 10.0,
                quantity: 2,
            }],
            multiplier: 1.0,
            discount: Discount::Percentage(10.0),
            taxes: vec![vat(5.0)],
            ..Default::default()
        };
        let b = calculate(&input);
        assert!(approx(b.subtotal, 20.0));
        assert!(approx(b.discount_amount, 2.0));
        assert!(approx(b.taxable_amount, 18.0));
        assert!(approx(b.tax_amount, 0.9));
        assert!(approx(b.total, 18.9));
        assert_eq!(format_money(b.total), "18.90");
    }

    #[test]
    fn test_fixed_discount_clamps_to_subtotal() {
        let b = calculate(&PricingInput {
            lines: vec![PricedLine {
                price: 5.0,
                quantity: 1,
            }],
            multiplier: 1.0,
            discount: Discount::Fixed(50.0),
            ..Default::default()
        });
        assert!(approx(b.discount_amount, 5.0));
        assert!(approx(b.total, 0.0));
    }

    #[test]
    fn test_percentage_clamped_and_bad_values_default() {
        assert!(approx(discount_amount(40.0, Discount::Percentage(150.0)), 40.0));
        assert!(approx(discount_amount(40.0, Discount::Percentage(-5.0)), 0.0));
        assert!(approx(discount_amount(40.0, Discount::Fixed(f64::NAN)), 0.0));
        assert!(approx(
            subtotal(
                &[PricedLine {
                    price: -3.0,
                    quantity: 4
                }],
                1.0
            ),
            0.0
        ));
    }

    #[test]
    fn test_multiplier_scales_and_defaults() {
        let lines = [PricedLine {
            price: 4.0,
            quantity: 3,
        }];
        assert!(approx(subtotal(&lines, 1.5), 18.0));
        assert!(approx(subtotal(&lines, 0.0), 12.0));
    }

    #[test]
    fn test_cash_discount_only_for_cash_and_after_discount() {
        let mut input = PricingInput {
            lines: vec![PricedLine {
                price: 100.0,
                quantity: 1,
            }],
            multiplier: 1.0,
            discount: Discount::Fixed(20.0),
            cash_discount_percent: 10.0,
            ..Default::default()
        };
        assert!(approx(calculate(&input).cash_discount_amount, 0.0));

        input.pays_cash = true;
        let b = calculate(&input);
        assert!(approx(b.cash_discount_amount, 8.0));
        assert!(approx(b.total, 72.0));
    }

    #[test]
    fn test_express_delivery_credit_and_three_taxes() {
        let b = calculate(&PricingInput {
            lines: vec![PricedLine {
                price: 50.0,
                quantity: 2,
            }],
            multiplier: 1.0,
            is_express: true,
            express_charge: 15.0,
            taxes: vec![
                vat(10.0),
                TaxRate {
                    name: "City".into(),
                    rate: 2.0,
                },
                TaxRate {
                    name: "Zero".into(),
                    rate: 0.0,
                },
            ],
            delivery_fee: 5.0,
            credit: 30.0,
            ..Default::default()
        });
        assert!(approx(b.tax_amount, 12.0));
        assert_eq!(b.tax_lines.len(), 2);
        assert!(approx(b.total, 100.0 + 15.0 + 12.0 + 5.0 - 30.0));
    }

    #[test]
    fn test_express_charge_ignored_when_not_express() {
        let b = calculate(&PricingInput {
            lines: vec![PricedLine {
                price: 10.0,
                quantity: 1,
            }],
            multiplier: 1.0,
            express_charge: 15.0,
            ..Default::default()
        });
        assert!(approx(b.express_charge, 0.0));
        assert!(approx(b.total, 10.0));
    }

    #[test]
    fn test_tax_exempt_skips_tax() {
        let b = calculate(&PricingInput {
            lines: vec![PricedLine {
                price: 10.0,
                quantity: 1,
            }],
            multiplier: 1.0,
            taxes: vec![vat(20.0)],
            tax_exempt: true,
            ..Default::default()
        });
        assert!(approx(b.tax_amount, 0.0));
        assert!(b.tax_lines.is_empty());
    }

    #[test]
    fn test_empty_order_is_zero() {
        let b = calculate(&PricingInput::default());
        assert_eq!(b.subtotal, 0.0);
        assert_eq!(b.total, 0.0);
    }

    #[test]
    fn test_zero_amounts_are_never_negative_zero() {
        let b = calculate(&PricingInput {
            lines: vec![PricedLine {
                price: 10.0,
                quantity: 1,
            }],
            multiplier: 1.0,
            taxes: vec![vat(20.0)],
            tax_exempt: true,
            ..Default::default()
        });
        assert!(b.tax_amount.is_sign_positive());

        let empty = calculate(&PricingInput::default());
        assert!(empty.subtotal.is_sign_positive());
        assert!(empty.tax_amount.is_sign_positive());
        assert_eq!(serde_json::to_value(&empty).unwrap()["taxAmount"].to_string(), "0.0");

        assert_eq!(format_money(-0.0), "0.00");
        assert_eq!(format_money(-0.001), "0.00");
    }
}
