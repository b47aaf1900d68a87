//! Canonical JSON and digests
//!
//! Every hash in Remit (policy hashes, RPT hashes, audit hashes) is taken over
//! the bytes produced here. Objects are key-sorted at every depth, arrays keep
//! their order, and output is compact. Numbers use serde_json's shortest
//! round-trip formatting, so nothing depends on locale or wall-clock.

use serde::Serialize;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

/// Serialize `value` to canonical JSON bytes
pub fn canonical_json<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, serde_json::Error> {
    let value = sort_keys(serde_json::to_value(value)?);
    serde_json::to_vec(&value)
}

/// SHA-256 of `bytes`, hex-encoded
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// SHA-256 of the canonical JSON form of `value`
pub fn canonical_digest<T: Serialize + ?Sized>(value: &T) -> Result<String, serde_json::Error> {
    Ok(sha256_hex(&canonical_json(value)?))
}

// Rebuild objects in sorted key order. A no-op for the default BTreeMap-backed
// Map, but keeps output stable if `preserve_order` is ever unified in.
fn sort_keys(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            let mut sorted = Map::new();
            for (key, val) in entries {
                sorted.insert(key, sort_keys(val));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.into_iter().map(sort_keys).collect()),
        other => other,
    }
}
