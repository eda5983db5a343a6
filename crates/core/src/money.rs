//! Monetary amounts in integer minor units.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

use crate::error::{LedgerError, LedgerResult};

/// Non-negative monetary amount in minor units (cents).
///
/// Money never touches floating point. Derived prices go through
/// [`unit_price_of`], which divides in exact decimal and rounds
/// midpoint-to-even back to the minor unit.
#[derive(
    Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
#[serde(try_from = "i64", into = "i64")]
pub struct Money(i64);

impl Money {
    pub const ZERO: Self = Self(0);

    pub fn from_minor_units(minor: i64) -> LedgerResult<Self> {
        if minor < 0 {
            return Err(LedgerError::invalid_movement(format!(
                "money cannot be negative: {minor}"
            )));
        }
        Ok(Self(minor))
    }

    pub fn minor_units(&self) -> i64 {
        self.0
    }

    /// Extended amount for `qty` units (valuation roll-ups).
    pub fn times(&self, qty: i64) -> LedgerResult<Self> {
        let total = self
            .0
            .checked_mul(qty)
            .ok_or_else(|| LedgerError::invalid_movement("money amount overflow"))?;
        Self::from_minor_units(total)
    }

    pub fn plus(&self, other: Money) -> LedgerResult<Self> {
        let total = self
            .0
            .checked_add(other.0)
            .ok_or_else(|| LedgerError::invalid_movement("money amount overflow"))?;
        Self::from_minor_units(total)
    }
}

impl TryFrom<i64> for Money {
    type Error = LedgerError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        Self::from_minor_units(value)
    }
}

impl From<Money> for i64 {
    fn from(value: Money) -> Self {
        value.0
    }
}

impl core::fmt::Display for Money {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Recompute a unit price from a line total: `total / qty` in exact decimal,
/// rounded midpoint-to-even to the minor unit.
///
/// `1001 / 2` rounds to `500`; `1003 / 2` rounds to `502`.
pub fn unit_price_of(total: Money, qty: i64) -> LedgerResult<Money> {
    if qty <= 0 {
        return Err(LedgerError::invalid_movement(format!(
            "unit price requires a positive quantity, got {qty}"
        )));
    }
    let exact = Decimal::from(total.minor_units()) / Decimal::from(qty);
    let rounded = exact.round_dp_with_strategy(0, RoundingStrategy::MidpointNearestEven);
    let minor = rounded
        .to_i64()
        .ok_or_else(|| LedgerError::invalid_movement("unit price out of range"))?;
    Money::from_minor_units(minor)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_negative_amounts() {
        assert!(Money::from_minor_units(-1).is_err());
        assert_eq!(Money::from_minor_units(0).unwrap(), Money::ZERO);
    }

    #[test]
    fn unit_price_rounds_midpoint_to_even() {
        let price = |total, qty| unit_price_of(Money::from_minor_units(total).unwrap(), qty)
            .unwrap()
            .minor_units();

        // 500.5 rounds down to the even 500, 501.5 rounds up to the even 502.
        assert_eq!(price(1001, 2), 500);
        assert_eq!(price(1003, 2), 502);
        assert_eq!(price(10, 4), 2);
        assert_eq!(price(999, 3), 333);
    }

    #[test]
    fn unit_price_rejects_non_positive_quantities() {
        let total = Money::from_minor_units(100).unwrap();
        assert!(unit_price_of(total, 0).is_err());
        assert!(unit_price_of(total, -2).is_err());
    }

    #[test]
    fn times_extends_and_guards_overflow() {
        let each = Money::from_minor_units(250).unwrap();
        assert_eq!(each.times(4).unwrap().minor_units(), 1000);
        assert!(each.times(i64::MAX).is_err());
    }
}
