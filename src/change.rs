//! Cash change calculation and the cash-step gate.

use crate::pricing::sanitize_amount;

/// Parse the amount typed into the cash field. Anything unparsable reads
/// as 0. A leading currency symbol and thousands separators are ignored.
pub fn parse_tendered(raw: &str) -> f64 {
    let cleaned: String = raw
        .trim()
        .trim_start_matches(|c: char| !c.is_ascii_digit() && c != '.' && c != '-')
        .chars()
        .filter(|c| *c != ',')
        .collect();
    cleaned
        .parse::<f64>()
        .map(sanitize_amount)
        .unwrap_or(0.0)
}

/// `max(0, tendered − total)`.
pub fn calculate_change(total: f64, tendered: f64) -> f64 {
    if tendered > total {
        tendered - total
    } else {
        0.0
    }
}

/// The cash step only proceeds once the customer has handed over at least
/// the total. No partial payment here.
pub fn can_proceed(total: f64, tendered: f64) -> bool {
    tendered >= total
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reference_change() {
        let change = calculate_change(18.90, parse_tendered("20"));
        assert!((change - 1.10).abs() < 1e-9);
    }

    #[test]
    fn test_no_negative_change() {
        assert_eq!(calculate_change(18.90, 10.0), 0.0);
        assert_eq!(calculate_change(18.90, 18.90), 0.0);
    }

    #[test]
    fn test_parse_tendered_defaults() {
        assert_eq!(parse_tendered(""), 0.0);
        assert_eq!(parse_tendered("abc"), 0.0);
        assert_eq!(parse_tendered("-5"), 0.0);
        assert_eq!(parse_tendered(" 12.5 "), 12.5);
        assert_eq!(parse_tendered("£1,020.00"), 1020.0);
    }

    #[test]
    fn test_gate_blocks_short_payment() {
        assert!(!can_proceed(18.90, 18.0));
        assert!(can_proceed(18.90, 18.90));
        assert!(can_proceed(18.90, 50.0));
    }
}
