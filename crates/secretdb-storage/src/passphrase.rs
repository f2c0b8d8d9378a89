//! Lifecycle of the database passphrase.
//!
//! The passphrase is generated once per installation and kept in an encrypted
//! preference store. It is the only key for the database file: there is no
//! rotation and no recovery if the preference store is lost.

use std::fmt;

use rand::{rngs::OsRng, RngCore};
use secretdb_core::{
    records::RecordStoreError,
    storage::{SecureStore, SecureStoreError},
};
use tokio::sync::Mutex;
use tracing::{debug, info, instrument};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

pub const PREFS_KEY_PASSPHRASE: &str = "PREFS_KEY_PASSPHRASE";
pub const PASSPHRASE_LEN: usize = 32;

/// 256-bit database key.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct Passphrase([u8; PASSPHRASE_LEN]);

impl Passphrase {
    pub fn from_bytes(bytes: [u8; PASSPHRASE_LEN]) -> Self {
        Self(bytes)
    }

    pub fn generate() -> Self {
        let mut bytes = [0u8; PASSPHRASE_LEN];
        OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; PASSPHRASE_LEN] {
        &self.0
    }
}

impl fmt::Debug for Passphrase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Passphrase(<redacted>)")
    }
}

/// Reads the database passphrase from a [`SecureStore`], creating it on first use.
pub struct PassphraseProvisioner<S: SecureStore> {
    prefs: S,
    entry: String,
    init_lock: Mutex<()>,
}

impl<S: SecureStore> PassphraseProvisioner<S> {
    pub fn new(prefs: S) -> Self {
        Self::with_entry(prefs, PREFS_KEY_PASSPHRASE)
    }

    pub fn with_entry(prefs: S, entry: impl Into<String>) -> Self {
        Self {
            prefs,
            entry: entry.into(),
            init_lock: Mutex::new(()),
        }
    }

    /// Return the stored passphrase, generating and durably storing one first
    /// if none exists.
    ///
    /// Calls are serialized so concurrent first runs agree on a single key. A
    /// stored value that fails to decode is reported, never replaced.
    #[instrument(skip(self), fields(entry = %self.entry))]
    pub async fn get_or_create_passphrase(&self) -> Result<Passphrase, RecordStoreError> {
        let _guard = self.init_lock.lock().await;

        match self.prefs.get(&self.entry).await {
            Ok(stored) => {
                debug!("using stored passphrase");
                decode_passphrase(&Zeroizing::new(stored))
            }
            Err(SecureStoreError::NotFound { .. }) => {
                let passphrase = Passphrase::generate();
                self.prefs
                    .put(&self.entry, passphrase.as_bytes())
                    .await
                    .map_err(key_unavailable)?;
                info!("generated new database passphrase");
                Ok(passphrase)
            }
            Err(err) => Err(key_unavailable(err)),
        }
    }
}

/// The entry holds the raw key bytes; the store applies its own string encoding.
fn decode_passphrase(stored: &[u8]) -> Result<Passphrase, RecordStoreError> {
    let out: [u8; PASSPHRASE_LEN] =
        stored
            .try_into()
            .map_err(|_| RecordStoreError::KeyUnavailable {
                reason: format!(
                    "stored passphrase must be {PASSPHRASE_LEN} bytes, got {}",
                    stored.len()
                ),
            })?;
    Ok(Passphrase(out))
}

fn key_unavailable(err: SecureStoreError) -> RecordStoreError {
    RecordStoreError::KeyUnavailable {
        reason: err.to_string(),
    }
}
