//! Remit Ledger - signed, hash-chained receipts
//!
//! This crate holds every record that must stay verifiable after the fact.
//!
//! # Key Types
//! - `SignedRpt` / `RptLedger`: Receipt Proof Tokens, one chain per org
//! - `AuditEntry` / `AuditTrail`: single global chain of audit events
//! - `Keyring`: Ed25519 signing with versioned, rotatable keys
//! - `ChainStore`: compare-and-append persistence boundary
//! - `chain`: hashing and verification shared by both chains

pub mod audit;
pub mod chain;
pub mod config;
pub mod error;
pub mod keys;
pub mod rpt;
pub mod store;

pub use audit::{AuditEntry, AuditEvent, AuditTrail, AUDIT_CHAIN};
pub use chain::{
    verify_backward, verify_record, verify_sequence, ChainFailure, ChainPayload, Chained,
    Verification, GENESIS,
};
pub use config::LedgerConfig;
pub use error::{LedgerError, LedgerResult};
pub use keys::{KeyProvider, KeyResolver, Keyring, RecordSignature, SignatureAlgorithm};
pub use rpt::{rpt_id_for, verify_rpt, MintParams, RptLedger, SignedRpt};
pub use store::{AppendOutcome, ChainStore, MemoryChainStore};
