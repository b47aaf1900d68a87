//! Amount - Non-negative integer minor units (cents) for financial amounts
//!
//! All money in Remit is counted in minor units of its currency and is never
//! negative. Floating point never touches an amount; decimal input is
//! converted exactly or rejected.

use crate::currency::Currency;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Errors that can occur when working with amounts
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AmountError {
    #[error("Amount cannot be negative: {0}")]
    NegativeAmount(i64),

    #[error("Amount {value} is not a whole number of {currency} minor units")]
    FractionalMinorUnits { value: Decimal, currency: String },

    #[error("Amount out of range: {0}")]
    OutOfRange(Decimal),
}

/// A non-negative amount in minor units (e.g. cents).
///
/// # Invariant
/// The inner value is always >= 0. This is enforced by the constructor.
///
/// # Example
/// ```
/// use remit_core::{Amount, Currency};
/// use rust_decimal::Decimal;
///
/// let amount = Amount::new(10_000).unwrap();
/// assert_eq!(amount.minor_units(), 10_000);
///
/// // 12.34 AUD is 1234 cents
/// let parsed = Amount::from_major(Decimal::new(1234, 2), &Currency::Aud).unwrap();
/// assert_eq!(parsed.minor_units(), 1234);
///
/// // Negative amounts are rejected
/// assert!(Amount::new(-1).is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub struct Amount(i64);

impl Amount {
    /// Zero amount constant
    pub const ZERO: Self = Self(0);

    /// Create a new Amount from minor units.
    ///
    /// Returns an error if the value is negative.
    pub fn new(minor_units: i64) -> Result<Self, AmountError> {
        if minor_units < 0 {
            Err(AmountError::NegativeAmount(minor_units))
        } else {
            Ok(Self(minor_units))
        }
    }

    /// Convert a decimal major-unit amount (e.g. dollars) into minor units.
    ///
    /// Rejects negative values and values with more precision than the
    /// currency's minor unit (e.g. `1.005` AUD).
    pub fn from_major(value: Decimal, currency: &Currency) -> Result<Self, AmountError> {
        let factor = Decimal::from(10i64.pow(currency.minor_unit_exponent()));
        let scaled = value
            .checked_mul(factor)
            .ok_or(AmountError::OutOfRange(value))?;

        if !scaled.fract().is_zero() {
            return Err(AmountError::FractionalMinorUnits {
                value,
                currency: currency.code().to_string(),
            });
        }

        let minor_units = scaled.to_i64().ok_or(AmountError::OutOfRange(value))?;
        Self::new(minor_units)
    }

    /// Get the amount in minor units
    #[inline]
    pub const fn minor_units(&self) -> i64 {
        self.0
    }

    /// Render the amount in major units of `currency`
    pub fn to_major(&self, currency: &Currency) -> Decimal {
        Decimal::new(self.0, currency.minor_unit_exponent())
    }

    /// Check if the amount is zero
    #[inline]
    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// Checked subtraction - returns None if result would be negative
    pub fn checked_sub(&self, other: &Amount) -> Option<Amount> {
        let result = self.0.checked_sub(other.0)?;
        if result < 0 {
            None
        } else {
            Some(Amount(result))
        }
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<i64> for Amount {
    type Error = AmountError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Amount> for i64 {
    fn from(amount: Amount) -> Self {
        amount.0
    }
}

impl Default for Amount {
    fn default() -> Self {
        Self::ZERO
    }
}
