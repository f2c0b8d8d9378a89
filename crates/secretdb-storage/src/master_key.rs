use std::{
    fmt,
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use rand::{rngs::OsRng, RngCore};
use thiserror::Error;
use tracing::{debug, info};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

pub const MASTER_KEY_LEN: usize = 32;
pub const DEFAULT_MASTER_KEY_ALIAS: &str = "_secretdb_master_key_";

/// Device-level key that encrypts the preference file.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct MasterKey {
    #[zeroize(skip)]
    pub alias: String,
    bytes: [u8; MASTER_KEY_LEN],
}

impl MasterKey {
    pub fn new(alias: impl Into<String>, bytes: [u8; MASTER_KEY_LEN]) -> Self {
        Self {
            alias: alias.into(),
            bytes,
        }
    }

    fn generate(alias: &str) -> Self {
        let mut bytes = [0u8; MASTER_KEY_LEN];
        OsRng.fill_bytes(&mut bytes);
        Self::new(alias, bytes)
    }

    pub fn as_bytes(&self) -> &[u8; MASTER_KEY_LEN] {
        &self.bytes
    }
}

impl fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MasterKey")
            .field("alias", &self.alias)
            .field("bytes", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum KeyError {
    #[error("keyring error: {0}")]
    Keyring(String),
    #[error("decode error: {0}")]
    Decode(String),
}

/// Source of the master key (OS keyring in production; memory in tests).
#[async_trait]
pub trait MasterKeyProvider: Send + Sync {
    async fn get_or_create(&self) -> Result<MasterKey, KeyError>;
}

/// Master key held by the OS credential store through the `keyring` crate.
pub struct KeyringMasterKey {
    service: String,
    account: String,
}

impl KeyringMasterKey {
    pub fn new(service: impl Into<String>, account: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            account: account.into(),
        }
    }
}

#[async_trait]
impl MasterKeyProvider for KeyringMasterKey {
    async fn get_or_create(&self) -> Result<MasterKey, KeyError> {
        let entry = keyring::Entry::new(&self.service, &self.account)
            .map_err(|e| KeyError::Keyring(e.to_string()))?;

        match classify_lookup(entry.get_password())? {
            Lookup::Found(secret) => {
                debug!(service = %self.service, "loaded master key from keyring");
                decode_key(DEFAULT_MASTER_KEY_ALIAS, &secret)
            }
            Lookup::Missing => {
                let key = MasterKey::generate(DEFAULT_MASTER_KEY_ALIAS);
                entry
                    .set_password(&encode_key(&key))
                    .map_err(|e| KeyError::Keyring(e.to_string()))?;
                info!(service = %self.service, "created master key in keyring");
                Ok(key)
            }
        }
    }
}

enum Lookup {
    Found(Zeroizing<String>),
    Missing,
}

/// Only `NoEntry` counts as missing. Any other keyring failure (locked
/// collection, no Secret Service on the bus) is an error, never a reason to
/// mint a replacement key.
fn classify_lookup(result: keyring::Result<String>) -> Result<Lookup, KeyError> {
    match result {
        Ok(secret) => Ok(Lookup::Found(Zeroizing::new(secret))),
        Err(keyring::Error::NoEntry) => Ok(Lookup::Missing),
        Err(err) => Err(KeyError::Keyring(err.to_string())),
    }
}

/// In-memory master key for tests and ephemeral sessions.
#[derive(Debug, Default, Clone)]
pub struct InMemoryMasterKey {
    inner: Arc<Mutex<Option<MasterKey>>>,
}

impl InMemoryMasterKey {
    /// Provider that already holds `bytes`, for simulating a specific device key.
    pub fn from_bytes(bytes: [u8; MASTER_KEY_LEN]) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Some(MasterKey::new(
                DEFAULT_MASTER_KEY_ALIAS,
                bytes,
            )))),
        }
    }
}

#[async_trait]
impl MasterKeyProvider for InMemoryMasterKey {
    async fn get_or_create(&self) -> Result<MasterKey, KeyError> {
        let mut guard = self
            .inner
            .lock()
            .map_err(|err| KeyError::Keyring(format!("lock poisoned: {err}")))?;

        Ok(guard
            .get_or_insert_with(|| MasterKey::generate(DEFAULT_MASTER_KEY_ALIAS))
            .clone())
    }
}

fn encode_key(key: &MasterKey) -> Zeroizing<String> {
    Zeroizing::new(general_purpose::STANDARD.encode(key.as_bytes()))
}

fn decode_key(alias: &str, secret: &str) -> Result<MasterKey, KeyError> {
    let bytes = Zeroizing::new(
        general_purpose::STANDARD
            .decode(secret.trim())
            .map_err(|e| KeyError::Decode(e.to_string()))?,
    );

    let out: [u8; MASTER_KEY_LEN] = bytes.as_slice().try_into().map_err(|_| {
        KeyError::Decode(format!(
            "expected {MASTER_KEY_LEN} bytes, got {}",
            bytes.len()
        ))
    })?;
    Ok(MasterKey::new(alias, out))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_provider_returns_same_key() {
        let provider = InMemoryMasterKey::default();
        let first = provider.get_or_create().await.unwrap();
        let second = provider.get_or_create().await.unwrap();

        assert_eq!(first.as_bytes(), second.as_bytes());
        assert_eq!(first.alias, DEFAULT_MASTER_KEY_ALIAS);
    }

    #[tokio::test]
    async fn seeded_provider_returns_seed() {
        let provider = InMemoryMasterKey::from_bytes([9u8; MASTER_KEY_LEN]);
        let key = provider.get_or_create().await.unwrap();
        assert_eq!(key.as_bytes(), &[9u8; MASTER_KEY_LEN]);
    }

    #[test]
    fn decode_rejects_wrong_length() {
        let err =
            decode_key(DEFAULT_MASTER_KEY_ALIAS, "abcd").expect_err("should reject wrong length");
        assert!(matches!(err, KeyError::Decode(_)));
    }

    #[test]
    fn encode_then_decode_keeps_bytes() {
        let key = MasterKey::new(DEFAULT_MASTER_KEY_ALIAS, [3u8; MASTER_KEY_LEN]);
        let decoded = decode_key(DEFAULT_MASTER_KEY_ALIAS, &encode_key(&key)).expect("decode");
        assert_eq!(decoded, key);
    }

    #[test]
    fn only_missing_entry_leads_to_key_creation() {
        assert!(matches!(
            classify_lookup(Err(keyring::Error::NoEntry)),
            Ok(Lookup::Missing)
        ));
        assert!(matches!(
            classify_lookup(Ok("c2VjcmV0".into())),
            Ok(Lookup::Found(secret)) if secret.as_str() == "c2VjcmV0"
        ));
        assert!(matches!(
            classify_lookup(Err(keyring::Error::PlatformFailure("dbus down".into()))),
            Err(KeyError::Keyring(_))
        ));
        assert!(matches!(
            classify_lookup(Err(keyring::Error::NoStorageAccess("locked".into()))),
            Err(KeyError::Keyring(_))
        ));
    }

    #[test]
    fn debug_output_hides_key_bytes() {
        let key = MasterKey::new("alias", [0xAB; MASTER_KEY_LEN]);
        let rendered = format!("{key:?}");
        assert!(rendered.contains("<redacted>"));
        assert!(!rendered.contains("171"));
    }
}
