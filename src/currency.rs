//! Currency conversion to USD
//!
//! Budget thresholds and reporting totals are expressed in USD. Conversion goes
//! through [`CurrencyConverter`] so a live rate source can replace the static table.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashMap;

/// Converts an amount in some currency to USD
pub trait CurrencyConverter: Send + Sync {
    /// Units of USD per one unit of `code`; unknown codes convert 1:1
    fn rate_to_usd(&self, code: &str) -> Decimal;

    /// Saturates at the `Decimal` range instead of overflowing
    fn to_usd(&self, amount: Decimal, code: &str) -> Decimal {
        amount.saturating_mul(self.rate_to_usd(code))
    }
}

/// Approximate fixed rates
#[derive(Debug, Clone)]
pub struct StaticRateTable {
    rates: HashMap<&'static str, Decimal>,
}

impl Default for StaticRateTable {
    fn default() -> Self {
        let rates = HashMap::from([
            ("INR", dec!(0.012)),
            ("EUR", dec!(1.08)),
            ("GBP", dec!(1.27)),
            ("AUD", dec!(0.66)),
            ("CAD", dec!(0.74)),
            ("JPY", dec!(0.0067)),
            ("CNY", dec!(0.14)),
            ("MXN", dec!(0.058)),
            ("BRL", dec!(0.20)),
            ("ZAR", dec!(0.054)),
            ("SGD", dec!(0.74)),
            ("HKD", dec!(0.13)),
            ("NZD", dec!(0.61)),
            ("SEK", dec!(0.095)),
            ("NOK", dec!(0.095)),
            ("DKK", dec!(0.14)),
            ("PLN", dec!(0.25)),
            ("CHF", dec!(1.12)),
            ("AED", dec!(0.27)),
            ("SAR", dec!(0.27)),
            ("THB", dec!(0.028)),
            ("IDR", dec!(0.000064)),
            ("MYR", dec!(0.21)),
            ("PHP", dec!(0.018)),
            ("VND", dec!(0.000041)),
            ("KRW", dec!(0.00075)),
            ("TRY", dec!(0.031)),
            ("ILS", dec!(0.27)),
            ("RUB", dec!(0.011)),
        ]);
        Self { rates }
    }
}

impl CurrencyConverter for StaticRateTable {
    fn rate_to_usd(&self, code: &str) -> Decimal {
        let code = code.trim().to_uppercase();
        if code.is_empty() || code == "USD" {
            return Decimal::ONE;
        }
        self.rates.get(code.as_str()).copied().unwrap_or(Decimal::ONE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_usd_passthrough() {
        let table = StaticRateTable::default();
        assert_eq!(table.to_usd(dec!(250), "USD"), dec!(250));
        assert_eq!(table.to_usd(dec!(250), ""), dec!(250));
    }

    #[test]
    fn test_known_rate_case_insensitive() {
        let table = StaticRateTable::default();
        assert_eq!(table.to_usd(dec!(10000), "inr"), dec!(120));
        assert_eq!(table.to_usd(dec!(100), "EUR"), dec!(108));
    }

    #[test]
    fn test_unlisted_currency_is_one_to_one() {
        let table = StaticRateTable::default();
        assert_eq!(table.to_usd(dec!(42), "XYZ"), dec!(42));
    }

    #[test]
    fn test_conversion_saturates_at_decimal_range() {
        let table = StaticRateTable::default();
        let huge = Decimal::from_str_exact("70000000000000000000000000000").unwrap();
        assert_eq!(table.to_usd(huge, "GBP"), Decimal::MAX);
        assert_eq!(table.to_usd(huge, "USD"), huge);
    }
}
