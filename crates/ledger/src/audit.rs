//! Generic audit trail
//!
//! A single global chain of signed entries for non-financial events
//! (privacy exports, admin actions). Same hashing, signing and verification
//! as receipts; the payload is an arbitrary JSON map.

use chrono::{DateTime, Utc};
use remit_core::{canonical_json, sha256_hex};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::chain::{self, truncate_timestamp, verify_sequence, ChainFailure, ChainPayload, Chained, Verification};
use crate::config::LedgerConfig;
use crate::error::{LedgerError, LedgerResult};
use crate::keys::{KeyProvider, KeyResolver, RecordSignature};
use crate::rpt::log_verification;
use crate::store::{append_with_retry, ChainStore, MemoryChainStore};

/// Chain key of the audit trail
pub const AUDIT_CHAIN: &str = "audit";

/// One signed audit record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntry {
    pub id: String,
    pub payload: BTreeMap<String, Value>,
    pub prev_hash: String,
    pub timestamp: DateTime<Utc>,
    pub hash: String,
    pub signature: RecordSignature,
}

impl Chained for AuditEntry {
    fn id(&self) -> &str {
        &self.id
    }

    fn chain_key(&self) -> &str {
        AUDIT_CHAIN
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
        ChainPayload::Audit {
            payload: &self.payload,
        }
    }
}

/// Who did what to which entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEvent {
    pub actor: String,
    pub action: String,
    pub entity_type: String,
    pub entity_id: String,
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
}

impl AuditEvent {
    pub fn new(
        actor: impl Into<String>,
        action: impl Into<String>,
        entity_type: impl Into<String>,
        entity_id: impl Into<String>,
    ) -> Self {
        Self {
            actor: actor.into(),
            action: action.into(),
            entity_type: entity_type.into(),
            entity_id: entity_id.into(),
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Flatten into the payload map of an audit entry
    pub fn into_payload(self) -> BTreeMap<String, Value> {
        let mut payload = BTreeMap::new();
        payload.insert("actor".to_string(), Value::from(self.actor));
        payload.insert("action".to_string(), Value::from(self.action));
        payload.insert("entityType".to_string(), Value::from(self.entity_type));
        payload.insert("entityId".to_string(), Value::from(self.entity_id));
        payload.insert(
            "metadata".to_string(),
            Value::Object(self.metadata.into_iter().collect()),
        );
        payload
    }
}

/// Global signed audit chain over a [`ChainStore`]
pub struct AuditTrail<S, K> {
    store: S,
    keys: Arc<K>,
    config: LedgerConfig,
}

impl<K: KeyProvider + KeyResolver> AuditTrail<MemoryChainStore<AuditEntry>, K> {
    pub fn in_memory(keys: Arc<K>, config: LedgerConfig) -> Self {
        Self::new(MemoryChainStore::new(), keys, config)
    }
}

impl<S, K> AuditTrail<S, K>
where
    S: ChainStore<AuditEntry>,
    K: KeyProvider + KeyResolver,
{
    pub fn new(store: S, keys: Arc<K>, config: LedgerConfig) -> Self {
        Self {
            store,
            keys,
            config,
        }
    }

    /// Append an entry with a caller-chosen id
    pub fn append(
        &self,
        id: &str,
        payload: BTreeMap<String, Value>,
        now: DateTime<Utc>,
    ) -> LedgerResult<AuditEntry> {
        if id.trim().is_empty() {
            return Err(LedgerError::Validation("audit entry id cannot be empty".to_string()));
        }
        if self.store.get_by_id(id)?.is_some() {
            return Err(LedgerError::Validation(format!("audit entry {} already exists", id)));
        }
        self.append_with(payload, now, |_| Ok(id.to_string()))
    }

    /// Append a typed event; the id is derived from its content and position
    pub fn record(&self, event: AuditEvent, now: DateTime<Utc>) -> LedgerResult<AuditEntry> {
        let payload = event.into_payload();
        let body = canonical_json(&payload)?;
        let timestamp = chain::format_timestamp(&truncate_timestamp(now));

        self.append_with(payload, now, |prev_hash| {
            let mut seed = Vec::with_capacity(body.len() + prev_hash.len() + timestamp.len() + 2);
            seed.extend_from_slice(prev_hash.as_bytes());
            seed.push(b':');
            seed.extend_from_slice(timestamp.as_bytes());
            seed.push(b':');
            seed.extend_from_slice(&body);
            Ok(format!("audit-{}", &sha256_hex(&seed)[..16]))
        })
    }

    fn append_with<F>(
        &self,
        payload: BTreeMap<String, Value>,
        now: DateTime<Utc>,
        mut id_for: F,
    ) -> LedgerResult<AuditEntry>
    where
        F: FnMut(&str) -> LedgerResult<String>,
    {
        let timestamp = truncate_timestamp(now);

        let outcome = append_with_retry(
            &self.store,
            AUDIT_CHAIN,
            self.config.max_mint_attempts,
            |prev_hash| {
                let id = id_for(prev_hash)?;
                let sealed = chain::seal(
                    &id,
                    &ChainPayload::Audit { payload: &payload },
                    prev_hash,
                    &timestamp,
                    self.keys.as_ref(),
                )?;
                let entry = AuditEntry {
                    id,
                    payload: payload.clone(),
                    prev_hash: prev_hash.to_string(),
                    timestamp,
                    hash: sealed.hash,
                    signature: sealed.signature,
                };
                if self.config.verify_before_append {
                    chain::verify_record(&entry, self.keys.as_ref()).map_err(|failure| {
                        LedgerError::Validation(format!(
                            "sealed audit entry {} does not verify: {}",
                            entry.id, failure
                        ))
                    })?;
                }
                Ok(entry)
            },
        )?;

        let entry = outcome.into_record();
        tracing::info!(
            entry_id = %entry.id,
            key_version = entry.signature.key_version,
            "Audit entry appended"
        );
        Ok(entry)
    }

    /// Verify the trail from `GENESIS`, up to and including `upto_id` if given
    pub fn verify(&self, upto_id: Option<&str>) -> LedgerResult<Verification> {
        let mut entries = self.store.records(AUDIT_CHAIN)?;

        if let Some(upto) = upto_id {
            match entries.iter().position(|e| e.id == upto) {
                Some(index) => entries.truncate(index + 1),
                None => {
                    let verification = Verification::failed(upto, ChainFailure::NotFound, 0);
                    log_verification("audit", upto, &verification);
                    return Ok(verification);
                }
            }
        }

        let verification = verify_sequence(&entries, self.keys.as_ref());
        log_verification("audit", upto_id.unwrap_or(AUDIT_CHAIN), &verification);
        Ok(verification)
    }

    /// All entries, oldest first
    pub fn entries(&self) -> LedgerResult<Vec<AuditEntry>> {
        self.store.records(AUDIT_CHAIN)
    }

    pub fn get(&self, id: &str) -> LedgerResult<AuditEntry> {
        self.store
            .get_by_id(id)?
            .ok_or_else(|| LedgerError::NotFound(format!("audit entry {}", id)))
    }
}
