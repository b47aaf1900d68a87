//! Chain storage
//!
//! The ledger never keeps chains in ambient state; it talks to a
//! [`ChainStore`]. The one mutating operation is a compare-and-append on the
//! chain tip. [`MemoryChainStore`] is the in-process reference store.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::chain::{Chained, GENESIS};
use crate::error::{LedgerError, LedgerResult};

/// Result of a compare-and-append
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppendOutcome<R> {
    /// The record is now the chain tip
    Appended(R),
    /// A record with the same idempotency key already exists; it is returned
    /// and nothing was written
    Duplicate(R),
}

impl<R> AppendOutcome<R> {
    pub fn into_record(self) -> R {
        match self {
            Self::Appended(r) | Self::Duplicate(r) => r,
        }
    }

    pub fn is_duplicate(&self) -> bool {
        matches!(self, Self::Duplicate(_))
    }
}

/// Persistence collaborator for hash chains
pub trait ChainStore<R: Chained>: Send + Sync {
    /// Latest record of a chain
    fn tip(&self, chain_key: &str) -> LedgerResult<Option<R>>;

    fn get_by_id(&self, id: &str) -> LedgerResult<Option<R>>;

    fn get_by_hash(&self, hash: &str) -> LedgerResult<Option<R>>;

    fn find_by_idempotency_key(&self, key: &str) -> LedgerResult<Option<R>>;

    /// Whole chain, oldest first
    fn records(&self, chain_key: &str) -> LedgerResult<Vec<R>>;

    /// Append `record` only if the chain tip hash (or `GENESIS` for an empty
    /// chain) still equals `expected_prev_hash`; otherwise `ChainConflict`.
    fn append_if_tip_matches(
        &self,
        chain_key: &str,
        expected_prev_hash: &str,
        record: R,
    ) -> LedgerResult<AppendOutcome<R>>;
}

struct StoreState<R> {
    chains: HashMap<String, Vec<String>>,
    by_id: HashMap<String, R>,
    by_hash: HashMap<String, String>,
    by_idempotency_key: HashMap<String, String>,
}

impl<R> Default for StoreState<R> {
    fn default() -> Self {
        Self {
            chains: HashMap::new(),
            by_id: HashMap::new(),
            by_hash: HashMap::new(),
            by_idempotency_key: HashMap::new(),
        }
    }
}

/// In-memory chain store; one lock makes compare-and-append atomic
pub struct MemoryChainStore<R> {
    state: RwLock<StoreState<R>>,
}

impl<R> MemoryChainStore<R> {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(StoreState::default()),
        }
    }

    // A panic while holding the lock cannot leave a half-written record:
    // every write happens after all checks have passed.
    fn read(&self) -> RwLockReadGuard<'_, StoreState<R>> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, StoreState<R>> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<R> Default for MemoryChainStore<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: Chained> ChainStore<R> for MemoryChainStore<R> {
    fn tip(&self, chain_key: &str) -> LedgerResult<Option<R>> {
        let state = self.read();
        Ok(state
            .chains
            .get(chain_key)
            .and_then(|ids| ids.last())
            .and_then(|id| state.by_id.get(id))
            .cloned())
    }

    fn get_by_id(&self, id: &str) -> LedgerResult<Option<R>> {
        Ok(self.read().by_id.get(id).cloned())
    }

    fn get_by_hash(&self, hash: &str) -> LedgerResult<Option<R>> {
        let state = self.read();
        Ok(state.by_hash.get(hash).and_then(|id| state.by_id.get(id)).cloned())
    }

    fn find_by_idempotency_key(&self, key: &str) -> LedgerResult<Option<R>> {
        let state = self.read();
        Ok(state
            .by_idempotency_key
            .get(key)
            .and_then(|id| state.by_id.get(id))
            .cloned())
    }

    fn records(&self, chain_key: &str) -> LedgerResult<Vec<R>> {
        let state = self.read();
        Ok(state
            .chains
            .get(chain_key)
            .map(|ids| ids.iter().filter_map(|id| state.by_id.get(id)).cloned().collect())
            .unwrap_or_default())
    }

    fn append_if_tip_matches(
        &self,
        chain_key: &str,
        expected_prev_hash: &str,
        record: R,
    ) -> LedgerResult<AppendOutcome<R>> {
        if record.chain_key() != chain_key {
            return Err(LedgerError::Validation(format!(
                "record {} belongs to chain {}, not {}",
                record.id(),
                record.chain_key(),
                chain_key
            )));
        }
        if record.prev_hash() != expected_prev_hash {
            return Err(LedgerError::Validation(format!(
                "record {} has prev_hash {}, expected {}",
                record.id(),
                record.prev_hash(),
                expected_prev_hash
            )));
        }

        let mut state = self.write();
        let idempotency_key = record.idempotency_key();

        if let Some(existing) = idempotency_key
            .as_ref()
            .and_then(|key| state.by_idempotency_key.get(key))
            .and_then(|id| state.by_id.get(id))
        {
            return Ok(AppendOutcome::Duplicate(existing.clone()));
        }

        let tip_hash = state
            .chains
            .get(chain_key)
            .and_then(|ids| ids.last())
            .and_then(|id| state.by_id.get(id))
            .map(|r| r.hash().to_string())
            .unwrap_or_else(|| GENESIS.to_string());
        if tip_hash != expected_prev_hash {
            return Err(LedgerError::ChainConflict {
                chain_key: chain_key.to_string(),
                expected: expected_prev_hash.to_string(),
                actual: tip_hash,
            });
        }

        if state.by_id.contains_key(record.id()) {
            return Err(LedgerError::Validation(format!(
                "record id {} already exists",
                record.id()
            )));
        }
        if state.by_hash.contains_key(record.hash()) {
            return Err(LedgerError::Validation(format!(
                "record hash {} already exists",
                record.hash()
            )));
        }

        let id = record.id().to_string();
        state.by_hash.insert(record.hash().to_string(), id.clone());
        if let Some(key) = idempotency_key {
            state.by_idempotency_key.insert(key, id.clone());
        }
        state
            .chains
            .entry(chain_key.to_string())
            .or_default()
            .push(id.clone());
        state.by_id.insert(id, record.clone());

        Ok(AppendOutcome::Appended(record))
    }
}

/// Read the tip, build a record on it and compare-and-append, retrying on
/// conflict up to `max_attempts` times.
pub(crate) fn append_with_retry<R, S, F>(
    store: &S,
    chain_key: &str,
    max_attempts: u32,
    mut build: F,
) -> LedgerResult<AppendOutcome<R>>
where
    R: Chained,
    S: ChainStore<R> + ?Sized,
    F: FnMut(&str) -> LedgerResult<R>,
{
    for attempt in 1..=max_attempts {
        let prev_hash = store
            .tip(chain_key)?
            .map(|tip| tip.hash().to_string())
            .unwrap_or_else(|| GENESIS.to_string());

        let record = build(&prev_hash)?;
        match store.append_if_tip_matches(chain_key, &prev_hash, record) {
            Err(e) if e.is_conflict() => {
                tracing::warn!(
                    chain_key = %chain_key,
                    attempt,
                    max_attempts,
                    "Chain tip moved, retrying append"
                );
            }
            other => return other,
        }
    }

    Err(LedgerError::RetriesExhausted {
        chain_key: chain_key.to_string(),
        attempts: max_attempts,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LedgerConfig;
    use crate::keys::Keyring;
    use crate::rpt::{MintParams, RptLedger, SignedRpt};
    use chrono::{TimeZone, Utc};
    use std::sync::Arc;

    fn sealer() -> RptLedger<MemoryChainStore<SignedRpt>, Keyring> {
        RptLedger::in_memory(Arc::new(Keyring::generate(1)), LedgerConfig::default())
    }

    fn rpt(ledger: &RptLedger<MemoryChainStore<SignedRpt>, Keyring>, id: &str, bank_line_id: &str, prev: &str) -> SignedRpt {
        ledger
            .seal(MintParams {
                rpt_id: id.to_string(),
                org_id: "org-1".to_string(),
                bank_line_id: bank_line_id.to_string(),
                policy_hash: "ph".to_string(),
                allocations: Vec::new(),
                prev_hash: prev.to_string(),
                now: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            })
            .unwrap()
    }

    #[test]
    fn test_append_and_lookup() {
        let ledger = sealer();
        let store = MemoryChainStore::new();
        let first = rpt(&ledger, "rpt-1", "bl-1", GENESIS);

        let outcome = store.append_if_tip_matches("org-1", GENESIS, first.clone()).unwrap();
        assert_eq!(outcome, AppendOutcome::Appended(first.clone()));
        assert_eq!(store.tip("org-1").unwrap(), Some(first.clone()));
        assert_eq!(store.get_by_hash(&first.hash).unwrap(), Some(first.clone()));
        assert_eq!(store.find_by_idempotency_key("5:org-1:bl-1").unwrap(), Some(first));
        assert!(store.tip("org-2").unwrap().is_none());
        assert!(store.records("org-2").unwrap().is_empty());
    }

    #[test]
    fn test_stale_tip_conflicts() {
        let ledger = sealer();
        let store = MemoryChainStore::new();
        store
            .append_if_tip_matches("org-1", GENESIS, rpt(&ledger, "rpt-1", "bl-1", GENESIS))
            .unwrap();

        let result = store.append_if_tip_matches("org-1", GENESIS, rpt(&ledger, "rpt-2", "bl-2", GENESIS));
        assert!(matches!(result, Err(LedgerError::ChainConflict { .. })));
        assert_eq!(store.records("org-1").unwrap().len(), 1);
    }

    #[test]
    fn test_duplicate_idempotency_key() {
        let ledger = sealer();
        let store = MemoryChainStore::new();
        let first = rpt(&ledger, "rpt-1", "bl-1", GENESIS);
        store.append_if_tip_matches("org-1", GENESIS, first.clone()).unwrap();

        let retry = rpt(&ledger, "rpt-1b", "bl-1", &first.hash);
        let outcome = store.append_if_tip_matches("org-1", &first.hash, retry).unwrap();
        assert!(outcome.is_duplicate());
        assert_eq!(outcome.into_record(), first);
    }

    #[test]
    fn test_mismatched_record_rejected() {
        let ledger = sealer();
        let store = MemoryChainStore::new();
        let record = rpt(&ledger, "rpt-1", "bl-1", GENESIS);

        let wrong_chain = store.append_if_tip_matches("org-2", GENESIS, record.clone());
        assert!(matches!(wrong_chain, Err(LedgerError::Validation(_))));

        let wrong_prev = store.append_if_tip_matches("org-1", "other", record);
        assert!(matches!(wrong_prev, Err(LedgerError::Validation(_))));
    }

    #[test]
    fn test_retry_exhausted() {
        let ledger = sealer();
        let store = MemoryChainStore::new();
        let mut attempts = 0;

        let result = append_with_retry(&store, "org-1", 3, |prev| {
            attempts += 1;
            // a concurrent writer takes the tip first
            let racer = rpt(&ledger, &format!("racer-{}", attempts), &format!("racer-bl-{}", attempts), prev);
            store.append_if_tip_matches("org-1", prev, racer).unwrap();
            Ok(rpt(&ledger, &format!("rpt-{}", attempts), &format!("bl-{}", attempts), prev))
        });

        assert!(matches!(
            result,
            Err(LedgerError::RetriesExhausted { attempts: 3, .. })
        ));
        assert_eq!(attempts, 3);
        assert_eq!(store.records("org-1").unwrap().len(), 3);
    }
}
