//! Remit Policy - Allocation Engine and Policy Hasher
//!
//! Both halves are pure functions over their inputs and are safe to call
//! from any number of threads.
//!
//! # Example
//! ```
//! use remit_core::{AccountState, BankLine, Currency};
//! use remit_policy::{allocate, Policy};
//!
//! let policy = Policy::builder("au-default", 1)
//!     .bucket("GST", 1_000)
//!     .bucket("PAYGW", 3_000)
//!     .half_even("OPERATING")
//!     .reject_when_closed()
//!     .build()
//!     .unwrap();
//! let line = BankLine::new("bl-1", "org-1", 5, Currency::Aud);
//! let states = ["GST", "PAYGW", "OPERATING"].map(AccountState::open);
//!
//! let result = allocate(&line, &policy, &states).unwrap();
//! assert_eq!(result.total_allocated(), Some(5));
//! ```

pub mod engine;
pub mod error;
pub mod hasher;
pub mod policy;

pub use engine::{allocate, AllocationResult};
pub use error::{AllocationError, PolicyResult};
pub use hasher::{policy_hash, PolicyHash};
pub use policy::{AllocationMethod, BucketShare, NoOpenGates, Policy, PolicyBuilder, BASIS_POINTS_TOTAL};
