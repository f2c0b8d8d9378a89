use std::{
    collections::BTreeMap,
    fs::{self, File},
    io::{Read, Write},
    path::{Path, PathBuf},
};

use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng, Payload},
    Aes256Gcm, Nonce,
};
use async_trait::async_trait;
use base64::{
    engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD},
    Engine as _,
};
use secretdb_core::storage::{SecureStore, SecureStoreError};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tokio::sync::Mutex;
use tracing::{debug, instrument};
use zeroize::Zeroizing;

use crate::master_key::MasterKeyProvider;

pub const DEFAULT_PREFS_NAME: &str = "secretdb.shared_prefs";

const NONCE_LEN: usize = 12;

type Entries = BTreeMap<String, String>;

/// Named preference file whose whole content is sealed with AES-256-GCM under
/// the master key. The file name is bound as associated data, so a file
/// renamed into place of another will not decrypt.
pub struct EncryptedPreferences<P: MasterKeyProvider> {
    path: PathBuf,
    name: String,
    master_key: P,
    write_lock: Mutex<()>,
}

#[derive(Debug, Serialize, Deserialize)]
struct StoredBlob {
    nonce: String,
    ciphertext: String,
}

impl<P: MasterKeyProvider> EncryptedPreferences<P> {
    pub fn new(dir: impl Into<PathBuf>, name: impl Into<String>, master_key: P) -> Self {
        let name = name.into();
        let path = dir.into().join(format!("{name}.prefs"));
        Self {
            path,
            name,
            master_key,
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn cipher(&self) -> Result<Aes256Gcm, SecureStoreError> {
        let key = self
            .master_key
            .get_or_create()
            .await
            .map_err(|e| SecureStoreError::Storage {
                reason: format!("master key: {e}"),
            })?;

        Aes256Gcm::new_from_slice(key.as_bytes()).map_err(|e| SecureStoreError::Storage {
            reason: format!("cipher init failed: {e}"),
        })
    }

    async fn load(&self) -> Result<Entries, SecureStoreError> {
        let Some(blob) = read_blob(&self.path)? else {
            return Ok(Entries::new());
        };
        let cipher = self.cipher().await?;

        let nonce_bytes = decode_field(&blob.nonce, "nonce")?;
        if nonce_bytes.len() != NONCE_LEN {
            return Err(SecureStoreError::Storage {
                reason: format!("nonce must be {NONCE_LEN} bytes, got {}", nonce_bytes.len()),
            });
        }
        let ciphertext = decode_field(&blob.ciphertext, "ciphertext")?;

        let plaintext = Zeroizing::new(
            cipher
                .decrypt(
                    Nonce::from_slice(&nonce_bytes),
                    Payload {
                        msg: &ciphertext,
                        aad: self.name.as_bytes(),
                    },
                )
                .map_err(|e| SecureStoreError::Storage {
                    reason: format!("decrypt failed (wrong master key or tampered file): {e}"),
                })?,
        );

        serde_json::from_slice(&plaintext).map_err(storage_err)
    }

    async fn save(&self, entries: &Entries) -> Result<(), SecureStoreError> {
        let cipher = self.cipher().await?;
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let plaintext = Zeroizing::new(serde_json::to_vec(entries).map_err(storage_err)?);

        let ciphertext = cipher
            .encrypt(
                &nonce,
                Payload {
                    msg: &plaintext,
                    aad: self.name.as_bytes(),
                },
            )
            .map_err(|e| SecureStoreError::Storage {
                reason: format!("encrypt failed: {e}"),
            })?;

        let blob = StoredBlob {
            nonce: URL_SAFE_NO_PAD.encode(nonce.as_slice()),
            ciphertext: URL_SAFE_NO_PAD.encode(ciphertext),
        };
        write_blob(&self.path, &blob)
    }
}

#[async_trait]
impl<P: MasterKeyProvider> SecureStore for EncryptedPreferences<P> {
    #[instrument(skip_all, fields(entry = %name))]
    async fn put(&self, name: &str, value: &[u8]) -> Result<(), SecureStoreError> {
        let _guard = self.write_lock.lock().await;
        let mut entries = self.load().await?;
        entries.insert(name.to_string(), STANDARD.encode(value));
        self.save(&entries).await?;
        debug!("preference committed");
        Ok(())
    }

    #[instrument(skip_all, fields(entry = %name))]
    async fn get(&self, name: &str) -> Result<Vec<u8>, SecureStoreError> {
        let entries = self.load().await?;
        let encoded = entries
            .get(name)
            .ok_or_else(|| SecureStoreError::NotFound {
                name: name.to_string(),
            })?;
        STANDARD.decode(encoded).map_err(storage_err)
    }

    #[instrument(skip_all, fields(entry = %name))]
    async fn delete(&self, name: &str) -> Result<(), SecureStoreError> {
        let _guard = self.write_lock.lock().await;
        let mut entries = self.load().await?;
        if entries.remove(name).is_some() {
            self.save(&entries).await?;
        }
        Ok(())
    }
}

/// Atomic replace; the data is fsynced before the rename so a returned `put` survives a crash.
/// `NamedTempFile` creates the file owner-only (0600 on unix).
fn write_blob(path: &Path, blob: &StoredBlob) -> Result<(), SecureStoreError> {
    let parent = path.parent().ok_or_else(|| SecureStoreError::Storage {
        reason: "invalid preferences path".to_string(),
    })?;
    fs::create_dir_all(parent).map_err(storage_err)?;

    let mut tmp = NamedTempFile::new_in(parent).map_err(storage_err)?;
    let json = serde_json::to_vec(blob).map_err(storage_err)?;
    tmp.write_all(&json).map_err(storage_err)?;
    tmp.as_file().sync_all().map_err(storage_err)?;
    tmp.persist(path).map_err(|e| storage_err(e.error))?;
    Ok(())
}

fn read_blob(path: &Path) -> Result<Option<StoredBlob>, SecureStoreError> {
    let mut file = match File::open(path) {
        Ok(file) => file,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(storage_err(err)),
    };

    let mut buf = Vec::new();
    file.read_to_end(&mut buf).map_err(storage_err)?;
    serde_json::from_slice(&buf).map(Some).map_err(storage_err)
}

fn decode_field(value: &str, field: &str) -> Result<Vec<u8>, SecureStoreError> {
    URL_SAFE_NO_PAD
        .decode(value)
        .map_err(|e| SecureStoreError::Storage {
            reason: format!("{field} decode failed: {e}"),
        })
}

fn storage_err<E: ToString>(err: E) -> SecureStoreError {
    SecureStoreError::Storage {
        reason: err.to_string(),
    }
}
