//! Signing keys and key rotation
//!
//! Every record is signed by the active key and carries that key's version.
//! Rotation adds a new active key and keeps the old verifying keys, so
//! records signed before the rotation stay verifiable.

use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{PoisonError, RwLock};

use crate::config::LedgerConfig;
use crate::error::{LedgerError, LedgerResult};

/// Signature algorithm
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignatureAlgorithm {
    #[default]
    Ed25519,
}

/// Detached signature attached to a chain record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordSignature {
    pub key_version: u32,
    pub algorithm: SignatureAlgorithm,
    /// Signature bytes (hex-encoded)
    pub signature: String,
}

impl RecordSignature {
    /// Decode the hex signature into its 64 raw bytes
    pub fn decode(&self) -> LedgerResult<Signature> {
        let bytes = hex::decode(&self.signature)
            .map_err(|e| LedgerError::InvalidSignature(format!("invalid hex: {}", e)))?;
        let bytes: [u8; 64] = bytes
            .try_into()
            .map_err(|_| LedgerError::InvalidSignature("signature must be 64 bytes".to_string()))?;
        Ok(Signature::from_bytes(&bytes))
    }
}

/// Signs record messages with the active key
pub trait KeyProvider: Send + Sync {
    fn active_version(&self) -> u32;

    fn sign(&self, message: &[u8]) -> RecordSignature;
}

/// Looks up the verifying key for a key version
pub trait KeyResolver: Send + Sync {
    fn verifying_key(&self, version: u32) -> Option<VerifyingKey>;
}

/// A single public key verifies every version
impl KeyResolver for VerifyingKey {
    fn verifying_key(&self, _version: u32) -> Option<VerifyingKey> {
        Some(*self)
    }
}

impl KeyResolver for BTreeMap<u32, VerifyingKey> {
    fn verifying_key(&self, version: u32) -> Option<VerifyingKey> {
        self.get(&version).copied()
    }
}

struct KeyringState {
    active_version: u32,
    signing_key: SigningKey,
    verifying_keys: BTreeMap<u32, VerifyingKey>,
}

/// Ed25519 keyring: one active signing key plus all historical public keys
pub struct Keyring {
    state: RwLock<KeyringState>,
}

impl Keyring {
    pub fn new(version: u32, signing_key: SigningKey) -> Self {
        let mut verifying_keys = BTreeMap::new();
        verifying_keys.insert(version, signing_key.verifying_key());
        Self {
            state: RwLock::new(KeyringState {
                active_version: version,
                signing_key,
                verifying_keys,
            }),
        }
    }

    /// Create from a 32-byte seed, hex-encoded
    pub fn from_hex(version: u32, hex_seed: &str) -> LedgerResult<Self> {
        Ok(Self::new(version, signing_key_from_hex(hex_seed)?))
    }

    /// Generate a new random signing key
    pub fn generate(version: u32) -> Self {
        let mut rng = rand::thread_rng();
        Self::new(version, SigningKey::generate(&mut rng))
    }

    /// Load the seed from the environment variable named in `config`
    pub fn from_env(config: &LedgerConfig) -> LedgerResult<Self> {
        let seed = std::env::var(&config.signing_key_env).map_err(|_| {
            LedgerError::Config(format!("{} is not set", config.signing_key_env))
        })?;
        let keyring = Self::from_hex(config.signing_key_version, seed.trim())?;
        tracing::info!(
            env = %config.signing_key_env,
            key_version = config.signing_key_version,
            "Signing key loaded"
        );
        Ok(keyring)
    }

    /// Export the active seed as hex (for storage)
    pub fn seed_hex(&self) -> String {
        hex::encode(self.read().signing_key.to_bytes())
    }

    /// Active public key (hex-encoded)
    pub fn public_key_hex(&self) -> String {
        hex::encode(self.read().signing_key.verifying_key().to_bytes())
    }

    /// Snapshot of every public key by version, for offline verification
    pub fn public_keys(&self) -> BTreeMap<u32, VerifyingKey> {
        self.read().verifying_keys.clone()
    }

    /// Replace the active key with a freshly generated one
    pub fn rotate(&self) -> LedgerResult<u32> {
        let mut rng = rand::thread_rng();
        self.install(SigningKey::generate(&mut rng))
    }

    /// Replace the active key with the one derived from `hex_seed`
    pub fn rotate_to_seed(&self, hex_seed: &str) -> LedgerResult<u32> {
        self.install(signing_key_from_hex(hex_seed)?)
    }

    fn install(&self, signing_key: SigningKey) -> LedgerResult<u32> {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        let version = state
            .verifying_keys
            .keys()
            .next_back()
            .copied()
            .unwrap_or(state.active_version)
            .checked_add(1)
            .ok_or_else(|| LedgerError::InvalidKey("key version space exhausted".to_string()))?;
        state.verifying_keys.insert(version, signing_key.verifying_key());
        state.signing_key = signing_key;
        state.active_version = version;
        tracing::info!(key_version = version, "Signing key rotated");
        Ok(version)
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, KeyringState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for Keyring {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.read();
        f.debug_struct("Keyring")
            .field("active_version", &state.active_version)
            .field("versions", &state.verifying_keys.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl KeyProvider for Keyring {
    fn active_version(&self) -> u32 {
        self.read().active_version
    }

    fn sign(&self, message: &[u8]) -> RecordSignature {
        let state = self.read();
        RecordSignature {
            key_version: state.active_version,
            algorithm: SignatureAlgorithm::Ed25519,
            signature: hex::encode(state.signing_key.sign(message).to_bytes()),
        }
    }
}

impl KeyResolver for Keyring {
    fn verifying_key(&self, version: u32) -> Option<VerifyingKey> {
        self.read().verifying_keys.get(&version).copied()
    }
}

fn signing_key_from_hex(hex_seed: &str) -> LedgerResult<SigningKey> {
    let bytes =
        hex::decode(hex_seed).map_err(|e| LedgerError::InvalidKey(format!("invalid key hex: {}", e)))?;
    let seed: [u8; 32] = bytes
        .try_into()
        .map_err(|_| LedgerError::InvalidKey("key must be 32 bytes".to_string()))?;
    Ok(SigningKey::from_bytes(&seed))
}
