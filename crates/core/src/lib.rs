//! Remit Core - Domain types
//!
//! This crate contains the fundamental types shared by the policy engine and
//! the receipt ledger:
//! - `Amount`: Non-negative integer minor units
//! - `Currency`: ISO currency codes with minor-unit exponents
//! - `BankLine`: An incoming deposit
//! - `BucketId`, `Gate`, `AccountState`, `Allocation`: Allocation targets
//! - `canonical`: Key-sorted JSON used before every hash

pub mod amount;
pub mod bank_line;
pub mod bucket;
pub mod canonical;
pub mod currency;

pub use amount::{Amount, AmountError};
pub use bank_line::BankLine;
pub use bucket::{AccountState, Allocation, BucketId, Gate};
pub use canonical::{canonical_digest, canonical_json, sha256_hex};
pub use currency::{Currency, CurrencyError};
