//! RPT Ledger
//!
//! Mints Receipt Proof Tokens: signed records binding one allocation decision
//! to its policy hash and to the previous receipt of the same org. Each org
//! has its own append-only chain.

use chrono::{DateTime, Utc};
use remit_core::{sha256_hex, AccountState, Allocation, BankLine};
use remit_policy::{allocate, Policy};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::chain::{
    self, truncate_timestamp, verify_backward, verify_sequence, ChainPayload, Chained, Verification,
};
use crate::config::LedgerConfig;
use crate::error::{LedgerError, LedgerResult};
use crate::keys::{KeyProvider, KeyResolver, RecordSignature};
use crate::store::{append_with_retry, AppendOutcome, ChainStore, MemoryChainStore};

/// Receipt Proof Token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedRpt {
    pub id: String,
    pub org_id: String,
    pub bank_line_id: String,
    pub policy_hash: String,
    pub allocations: Vec<Allocation>,
    pub prev_hash: String,
    pub timestamp: DateTime<Utc>,
    pub hash: String,
    pub signature: RecordSignature,
}

impl Chained for SignedRpt {
    fn id(&self) -> &str {
        &self.id
    }

    fn chain_key(&self) -> &str {
        &self.org_id
    }

    fn prev_hash(&self) -> &str {
        &self.prev_hash
    }

    fn hash(&self) -> &str {
        &self.hash
    }

    fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    fn signature(&self) -> &RecordSignature {
        &self.signature
    }

    fn payload(&self) -> ChainPayload<'_> {
        ChainPayload::Receipt {
            org_id: &self.org_id,
            bank_line_id: &self.bank_line_id,
            policy_hash: &self.policy_hash,
            allocations: &self.allocations,
        }
    }

    fn idempotency_key(&self) -> Option<String> {
        Some(idempotency_key(&self.org_id, &self.bank_line_id))
    }
}

/// Everything needed to mint one RPT at an explicit chain position
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MintParams {
    pub rpt_id: String,
    pub org_id: String,
    pub bank_line_id: String,
    pub policy_hash: String,
    pub allocations: Vec<Allocation>,
    pub prev_hash: String,
    pub now: DateTime<Utc>,
}

/// `len(org):org:bank_line`; the length prefix keeps ids containing `:` apart
fn idempotency_key(org_id: &str, bank_line_id: &str) -> String {
    format!("{}:{}:{}", org_id.len(), org_id, bank_line_id)
}

/// Deterministic RPT id for an `(org, bank line)` pair
pub fn rpt_id_for(org_id: &str, bank_line_id: &str) -> String {
    let digest = sha256_hex(idempotency_key(org_id, bank_line_id).as_bytes());
    format!("rpt-{}", &digest[..16])
}

/// Recompute hash and check signature of one RPT. Any mismatch is `false`.
pub fn verify_rpt<K: KeyResolver + ?Sized>(rpt: &SignedRpt, keys: &K) -> bool {
    match chain::verify_record(rpt, keys) {
        Ok(()) => true,
        Err(failure) => {
            tracing::debug!(rpt_id = %rpt.id, %failure, "RPT failed verification");
            false
        }
    }
}

/// Per-org receipt chains over a [`ChainStore`]
pub struct RptLedger<S, K> {
    store: S,
    keys: Arc<K>,
    config: LedgerConfig,
}

impl<K: KeyProvider + KeyResolver> RptLedger<MemoryChainStore<SignedRpt>, K> {
    /// Ledger over a fresh in-memory store
    pub fn in_memory(keys: Arc<K>, config: LedgerConfig) -> Self {
        Self::new(MemoryChainStore::new(), keys, config)
    }
}

impl<S, K> RptLedger<S, K>
where
    S: ChainStore<SignedRpt>,
    K: KeyProvider + KeyResolver,
{
    pub fn new(store: S, keys: Arc<K>, config: LedgerConfig) -> Self {
        Self {
            store,
            keys,
            config,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn keys(&self) -> &Arc<K> {
        &self.keys
    }

    /// Build and sign an RPT without storing it
    pub fn seal(&self, params: MintParams) -> LedgerResult<SignedRpt> {
        for (field, value) in [
            ("rpt_id", &params.rpt_id),
            ("org_id", &params.org_id),
            ("bank_line_id", &params.bank_line_id),
            ("policy_hash", &params.policy_hash),
            ("prev_hash", &params.prev_hash),
        ] {
            if value.trim().is_empty() {
                return Err(LedgerError::Validation(format!("{} cannot be empty", field)));
            }
        }

        let timestamp = truncate_timestamp(params.now);
        let payload = ChainPayload::Receipt {
            org_id: &params.org_id,
            bank_line_id: &params.bank_line_id,
            policy_hash: &params.policy_hash,
            allocations: &params.allocations,
        };
        let sealed = chain::seal(
            &params.rpt_id,
            &payload,
            &params.prev_hash,
            &timestamp,
            self.keys.as_ref(),
        )?;

        let rpt = SignedRpt {
            id: params.rpt_id,
            org_id: params.org_id,
            bank_line_id: params.bank_line_id,
            policy_hash: params.policy_hash,
            allocations: params.allocations,
            prev_hash: params.prev_hash,
            timestamp,
            hash: sealed.hash,
            signature: sealed.signature,
        };

        if self.config.verify_before_append {
            chain::verify_record(&rpt, self.keys.as_ref()).map_err(|failure| {
                LedgerError::Validation(format!("sealed RPT {} does not verify: {}", rpt.id, failure))
            })?;
        }

        Ok(rpt)
    }

    /// Mint at the caller-supplied `prev_hash`.
    ///
    /// Fails with `ChainConflict` if that is no longer the org's tip. A
    /// repeat of an already-minted `(org, bank line)` returns the stored RPT.
    pub fn mint(&self, params: MintParams) -> LedgerResult<SignedRpt> {
        let org_id = params.org_id.clone();
        let prev_hash = params.prev_hash.clone();
        let rpt = self.seal(params)?;

        match self.store.append_if_tip_matches(&org_id, &prev_hash, rpt) {
            Ok(outcome) => Ok(self.finish(outcome)),
            Err(e) => {
                if e.is_conflict() {
                    tracing::warn!(org_id = %org_id, prev_hash = %prev_hash, "RPT mint lost the chain tip");
                }
                Err(e)
            }
        }
    }

    /// Mint at the current tip, retrying on conflict
    pub fn mint_next(
        &self,
        org_id: &str,
        bank_line_id: &str,
        policy_hash: &str,
        allocations: Vec<Allocation>,
        now: DateTime<Utc>,
    ) -> LedgerResult<SignedRpt> {
        if let Some(existing) = self.replay(org_id, bank_line_id)? {
            return Ok(existing);
        }

        let rpt_id = rpt_id_for(org_id, bank_line_id);
        let outcome = append_with_retry(
            &self.store,
            org_id,
            self.config.max_mint_attempts,
            |prev_hash| {
                self.seal(MintParams {
                    rpt_id: rpt_id.clone(),
                    org_id: org_id.to_string(),
                    bank_line_id: bank_line_id.to_string(),
                    policy_hash: policy_hash.to_string(),
                    allocations: allocations.clone(),
                    prev_hash: prev_hash.to_string(),
                    now,
                })
            },
        )?;
        Ok(self.finish(outcome))
    }

    /// Allocate a bank line, bind the policy hash and mint the receipt.
    /// Idempotent on `(org, bank line)`.
    pub fn apply_allocation(
        &self,
        bank_line: &BankLine,
        policy: &Policy,
        account_states: &[AccountState],
        now: DateTime<Utc>,
    ) -> LedgerResult<SignedRpt> {
        if let Some(existing) = self.replay(&bank_line.org_id, &bank_line.id)? {
            return Ok(existing);
        }

        let result = allocate(bank_line, policy, account_states)?;
        let policy_hash = policy.hash_for(bank_line)?;

        self.mint_next(
            &bank_line.org_id,
            &bank_line.id,
            policy_hash.as_str(),
            result.allocations,
            now,
        )
    }

    /// Verify one RPT against this ledger's keys
    pub fn verify(&self, rpt: &SignedRpt) -> bool {
        verify_rpt(rpt, self.keys.as_ref())
    }

    /// Walk back from `leaf_id` to `GENESIS` through the store
    pub fn verify_chain(&self, leaf_id: &str) -> LedgerResult<Verification> {
        let verification = verify_backward(
            leaf_id,
            |id| self.store.get_by_id(id),
            |hash| self.store.get_by_hash(hash),
            self.keys.as_ref(),
        )?;
        log_verification("rpt", leaf_id, &verification);
        Ok(verification)
    }

    /// Verify an org's whole chain, oldest first
    pub fn verify_org(&self, org_id: &str) -> LedgerResult<Verification> {
        let records = self.store.records(org_id)?;
        let verification = verify_sequence(&records, self.keys.as_ref());
        log_verification("org", org_id, &verification);
        Ok(verification)
    }

    pub fn chain(&self, org_id: &str) -> LedgerResult<Vec<SignedRpt>> {
        self.store.records(org_id)
    }

    pub fn latest(&self, org_id: &str) -> LedgerResult<Option<SignedRpt>> {
        self.store.tip(org_id)
    }

    pub fn get(&self, id: &str) -> LedgerResult<SignedRpt> {
        self.store
            .get_by_id(id)?
            .ok_or_else(|| LedgerError::NotFound(format!("RPT {}", id)))
    }

    fn replay(&self, org_id: &str, bank_line_id: &str) -> LedgerResult<Option<SignedRpt>> {
        let existing = self
            .store
            .find_by_idempotency_key(&idempotency_key(org_id, bank_line_id))?;
        if let Some(rpt) = &existing {
            tracing::warn!(
                org_id = %org_id,
                bank_line_id = %bank_line_id,
                rpt_id = %rpt.id,
                "Bank line already minted, returning existing RPT"
            );
        }
        Ok(existing)
    }

    fn finish(&self, outcome: AppendOutcome<SignedRpt>) -> SignedRpt {
        match outcome {
            AppendOutcome::Appended(rpt) => {
                tracing::info!(
                    rpt_id = %rpt.id,
                    org_id = %rpt.org_id,
                    bank_line_id = %rpt.bank_line_id,
                    key_version = rpt.signature.key_version,
                    "RPT minted"
                );
                rpt
            }
            AppendOutcome::Duplicate(rpt) => {
                tracing::warn!(
                    rpt_id = %rpt.id,
                    org_id = %rpt.org_id,
                    bank_line_id = %rpt.bank_line_id,
                    "Duplicate mint, returning existing RPT"
                );
                rpt
            }
        }
    }
}

pub(crate) fn log_verification(scope: &str, key: &str, verification: &Verification) {
    if verification.valid {
        tracing::debug!(scope, key = %key, checked = verification.checked, "Chain verified");
    } else {
        tracing::warn!(
            scope,
            key = %key,
            failing_record_id = ?verification.failing_record_id,
            failure = ?verification.failure,
            "Chain verification failed"
        );
    }
}
