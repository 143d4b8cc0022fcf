//! Monetary amounts backed by rust_decimal.
//!
//! Fares are computed in decimal arithmetic and rounded to two places
//! half-away-from-zero, matching how amounts are presented to riders.

use rust_decimal::prelude::FromPrimitive;
use rust_decimal::{Decimal as RustDecimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, Mul, Sub};
use std::str::FromStr;

/// A monetary amount. Serializes to a JSON number.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Money(#[serde(with = "rust_decimal::serde::float")] RustDecimal);

impl Money {
    pub fn new(value: RustDecimal) -> Self {
        Money(value)
    }

    /// Parse from a canonical decimal string (as stored in the database).
    ///
    /// # Errors
    /// Returns an error if the string is not a valid decimal number.
    pub fn from_str_canonical(s: &str) -> Result<Self, rust_decimal::Error> {
        RustDecimal::from_str(s).map(Money)
    }

    /// Convert from a float; `None` for NaN/infinite or unrepresentable values.
    pub fn from_f64(value: f64) -> Option<Self> {
        RustDecimal::from_f64(value).map(Money)
    }

    pub fn from_i64(value: i64) -> Self {
        Money(RustDecimal::from(value))
    }

    /// Canonical string without exponent notation, for database storage.
    pub fn to_canonical_string(&self) -> String {
        format!("{}", self.0.normalize())
    }

    /// Round to two decimal places, half away from zero.
    pub fn rounded(&self) -> Self {
        Money(
            self.0
                .round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero),
        )
    }

    pub fn zero() -> Self {
        Money(RustDecimal::ZERO)
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    pub fn inner(&self) -> RustDecimal {
        self.0
    }

    pub fn max(self, other: Self) -> Self {
        if self.0 >= other.0 {
            self
        } else {
            other
        }
    }
}

impl Add for Money {
    type Output = Money;
    fn add(self, rhs: Money) -> Money {
        Money(self.0 + rhs.0)
    }
}

impl Sub for Money {
    type Output = Money;
    fn sub(self, rhs: Money) -> Money {
        Money(self.0 - rhs.0)
    }
}

impl Mul for Money {
    type Output = Money;
    fn mul(self, rhs: Money) -> Money {
        Money(self.0 * rhs.0)
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn m(s: &str) -> Money {
        Money::from_str_canonical(s).unwrap()
    }

    #[test]
    fn test_rounding_half_away_from_zero() {
        assert_eq!(m("1.005").rounded(), m("1.01"));
        assert_eq!(m("1.004").rounded(), m("1.00"));
        assert_eq!(m("230").rounded(), m("230.00"));
    }

    #[test]
    fn test_canonical_string_strips_trailing_zeros() {
        assert_eq!(m("230.00").to_canonical_string(), "230");
        assert_eq!(m("150.50").to_canonical_string(), "150.5");
    }

    #[test]
    fn test_from_f64_rejects_non_finite() {
        assert!(Money::from_f64(f64::NAN).is_none());
        assert!(Money::from_f64(f64::INFINITY).is_none());
        assert_eq!(Money::from_f64(40.0), Some(m("40")));
    }

    #[test]
    fn test_max() {
        assert_eq!(m("230").max(m("40")), m("230"));
        assert_eq!(m("30").max(m("40")), m("40"));
    }
}
