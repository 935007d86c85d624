//! Amount - Non-negative decimal wrapper for monetary values
//!
//! Every persisted amount in PayCore MUST be non-negative.
//! This is enforced at the type level. Balances, which can go
//! negative, are plain `Decimal`.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Add;
use thiserror::Error;

/// Errors that can occur when working with amounts
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AmountError {
    #[error("Amount cannot be negative: {0}")]
    Negative(Decimal),
}

/// A non-negative decimal amount.
///
/// # Invariant
/// The inner value is always >= 0. This is enforced by the constructor.
///
/// # Example
/// ```
/// use paycore_core::Amount;
/// use rust_decimal::Decimal;
///
/// let amount = Amount::new(Decimal::new(100, 0)).unwrap();
/// assert_eq!(amount.value(), Decimal::new(100, 0));
///
/// // Negative amounts are rejected
/// let negative = Amount::new(Decimal::new(-100, 0));
/// assert!(negative.is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "Decimal", into = "Decimal")]
pub struct Amount(Decimal);

impl Amount {
    /// Zero amount constant
    pub const ZERO: Self = Self(Decimal::ZERO);

    /// Create a new Amount from a Decimal.
    ///
    /// Returns an error if the value is negative.
    pub fn new(value: Decimal) -> Result<Self, AmountError> {
        if value < Decimal::ZERO {
            Err(AmountError::Negative(value))
        } else {
            Ok(Self(value))
        }
    }

    /// The inner decimal value
    pub fn value(&self) -> Decimal {
        self.0
    }

    /// Whether this amount is strictly greater than zero
    pub fn is_positive(&self) -> bool {
        self.0 > Decimal::ZERO
    }

    /// Whether this amount is zero
    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    /// Subtract, failing if the result would be negative
    pub fn checked_sub(self, other: Amount) -> Result<Self, AmountError> {
        Self::new(self.0 - other.0)
    }
}

impl Default for Amount {
    fn default() -> Self {
        Self::ZERO
    }
}

impl Add for Amount {
    type Output = Amount;

    // Non-negative values are closed under addition
    fn add(self, other: Amount) -> Amount {
        Amount(self.0 + other.0)
    }
}

impl TryFrom<Decimal> for Amount {
    type Error = AmountError;

    fn try_from(value: Decimal) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Amount> for Decimal {
    fn from(amount: Amount) -> Self {
        amount.0
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_new_positive() {
        let amount = Amount::new(dec!(100.50)).unwrap();
        assert_eq!(amount.value(), dec!(100.50));
        assert!(amount.is_positive());
    }

    #[test]
    fn test_new_zero() {
        let amount = Amount::new(Decimal::ZERO).unwrap();
        assert!(amount.is_zero());
        assert!(!amount.is_positive());
    }

    #[test]
    fn test_new_negative_rejected() {
        let result = Amount::new(dec!(-1));
        assert!(matches!(result, Err(AmountError::Negative(_))));
    }

    #[test]
    fn test_add() {
        let a = Amount::new(dec!(10500)).unwrap();
        let b = Amount::new(dec!(2100)).unwrap();
        assert_eq!((a + b).value(), dec!(12600));
    }

    #[test]
    fn test_checked_sub_underflow() {
        let a = Amount::new(dec!(5)).unwrap();
        let b = Amount::new(dec!(10)).unwrap();
        assert!(a.checked_sub(b).is_err());
    }

    #[test]
    fn test_serde_roundtrip() {
        let amount = Amount::new(dec!(4200)).unwrap();
        let json = serde_json::to_string(&amount).unwrap();
        let back: Amount = serde_json::from_str(&json).unwrap();
        assert_eq!(amount, back);
    }

    #[test]
    fn test_serde_rejects_negative() {
        let result: Result<Amount, _> = serde_json::from_str("\"-3.50\"");
        assert!(result.is_err());
    }
}
