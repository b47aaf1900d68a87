//! Ledger configuration
//!
//! Every field has a serde default, so a partial JSON file (or `{}`) is a
//! valid configuration.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{LedgerError, LedgerResult};

/// Configuration for the RPT ledger and the audit trail
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerConfig {
    /// Optimistic-concurrency attempts per append before giving up
    #[serde(default = "default_max_mint_attempts")]
    pub max_mint_attempts: u32,

    /// Re-verify each sealed record before handing it to the store
    #[serde(default = "default_verify_before_append")]
    pub verify_before_append: bool,

    /// Environment variable holding the hex Ed25519 seed
    #[serde(default = "default_signing_key_env")]
    pub signing_key_env: String,

    /// Key version assigned to the key loaded from `signing_key_env`
    #[serde(default = "default_signing_key_version")]
    pub signing_key_version: u32,
}

fn default_max_mint_attempts() -> u32 {
    3
}

fn default_verify_before_append() -> bool {
    true
}

fn default_signing_key_env() -> String {
    "REMIT_SIGNING_KEY".to_string()
}

fn default_signing_key_version() -> u32 {
    1
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            max_mint_attempts: default_max_mint_attempts(),
            verify_before_append: default_verify_before_append(),
            signing_key_env: default_signing_key_env(),
            signing_key_version: default_signing_key_version(),
        }
    }
}

impl LedgerConfig {
    /// Load configuration from a JSON file
    pub fn from_file(path: &Path) -> LedgerResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> LedgerResult<()> {
        if self.max_mint_attempts == 0 {
            return Err(LedgerError::Config(
                "max_mint_attempts must be at least 1".to_string(),
            ));
        }
        if self.signing_key_env.trim().is_empty() {
            return Err(LedgerError::Config(
                "signing_key_env cannot be empty".to_string(),
            ));
        }
        Ok(())
    }

    pub fn with_max_mint_attempts(mut self, attempts: u32) -> Self {
        self.max_mint_attempts = attempts;
        self
    }
}
