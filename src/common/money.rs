//! Currencies and fixed-precision rounding

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Supported currencies
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Currency {
    /// Settlement currency held in wallets
    Sol,
    /// Display currency; wagers are denominated in it
    Usd,
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Currency::Sol => write!(f, "SOL"),
            Currency::Usd => write!(f, "USD"),
        }
    }
}

/// Decimal places kept for each currency
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Precision {
    pub settlement_dp: u32,
    pub display_dp: u32,
}

impl Default for Precision {
    fn default() -> Self {
        Self {
            settlement_dp: 6,
            display_dp: 2,
        }
    }
}

impl Precision {
    pub fn settlement(&self, amount: Decimal) -> Decimal {
        round_to(amount, self.settlement_dp)
    }

    pub fn display(&self, amount: Decimal) -> Decimal {
        round_to(amount, self.display_dp)
    }
}

/// Banker's rounding to a fixed scale.
///
/// The scale is forced even when no digits are dropped, so `18` and `18.00`
/// serialize identically after rounding.
pub fn round_to(amount: Decimal, dp: u32) -> Decimal {
    let mut rounded = amount.round_dp_with_strategy(dp, RoundingStrategy::MidpointNearestEven);
    rounded.rescale(dp);
    rounded
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_round_to_fixed_scale() {
        assert_eq!(round_to(dec!(18), 2).to_string(), "18.00");
        assert_eq!(round_to(dec!(0.09), 6).to_string(), "0.090000");
        assert_eq!(round_to(dec!(1.23456789), 6), dec!(1.234568));
    }

    #[test]
    fn test_round_half_even() {
        assert_eq!(round_to(dec!(0.125), 2), dec!(0.12));
        assert_eq!(round_to(dec!(0.135), 2), dec!(0.14));
    }

    #[test]
    fn test_precision_per_currency() {
        let p = Precision::default();
        assert_eq!(p.display(dec!(2.005)), dec!(2.00));
        assert_eq!(p.settlement(dec!(0.0000015)), dec!(0.000002));
        assert_eq!(Currency::Sol.to_string(), "SOL");
    }
}
