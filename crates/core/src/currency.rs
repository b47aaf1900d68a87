//! Currency - Type-safe ISO currency codes
//!
//! Common settlement currencies are pre-defined; anything else uses the
//! `Other` variant. Each currency knows its minor-unit exponent.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Errors that can occur when parsing currencies
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CurrencyError {
    #[error("Empty currency code")]
    EmptyCode,

    #[error("Currency code must be 3 letters: {0}")]
    InvalidLength(String),

    #[error("Invalid currency code format: {0}")]
    InvalidFormat(String),
}

/// ISO 4217 currency codes
///
/// # Examples
/// ```
/// use remit_core::Currency;
///
/// let aud: Currency = "aud".parse().unwrap();
/// assert_eq!(aud, Currency::Aud);
/// assert_eq!(aud.minor_unit_exponent(), 2);
///
/// let other: Currency = "SGD".parse().unwrap();
/// assert!(matches!(other, Currency::Other(_)));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Currency {
    /// Australian Dollar
    Aud,
    /// New Zealand Dollar
    Nzd,
    /// US Dollar
    Usd,
    /// Euro
    Eur,
    /// British Pound
    Gbp,
    /// Japanese Yen
    Jpy,
    /// Any other ISO code
    Other(String),
}

impl Currency {
    /// Returns the currency code as a string slice
    pub fn code(&self) -> &str {
        match self {
            Currency::Aud => "AUD",
            Currency::Nzd => "NZD",
            Currency::Usd => "USD",
            Currency::Eur => "EUR",
            Currency::Gbp => "GBP",
            Currency::Jpy => "JPY",
            Currency::Other(s) => s.as_str(),
        }
    }

    /// Number of decimal places between major and minor units
    pub fn minor_unit_exponent(&self) -> u32 {
        match self {
            Currency::Jpy => 0,
            _ => 2,
        }
    }
}

impl Default for Currency {
    fn default() -> Self {
        Currency::Aud
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

impl FromStr for Currency {
    type Err = CurrencyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_uppercase();

        if s.is_empty() {
            return Err(CurrencyError::EmptyCode);
        }

        if s.len() != 3 {
            return Err(CurrencyError::InvalidLength(s));
        }

        if !s.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(CurrencyError::InvalidFormat(s));
        }

        Ok(match s.as_str() {
            "AUD" => Currency::Aud,
            "NZD" => Currency::Nzd,
            "USD" => Currency::Usd,
            "EUR" => Currency::Eur,
            "GBP" => Currency::Gbp,
            "JPY" => Currency::Jpy,
            _ => Currency::Other(s),
        })
    }
}

impl TryFrom<String> for Currency {
    type Error = CurrencyError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<Currency> for String {
    fn from(c: Currency) -> Self {
        c.code().to_string()
    }
}
