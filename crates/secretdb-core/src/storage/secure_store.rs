use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, MutexGuard,
    },
};

use async_trait::async_trait;
use thiserror::Error;

/// Errors produced by encrypted preference stores.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SecureStoreError {
    /// No entry is stored under the requested name.
    #[error("entry not found: {name}")]
    NotFound { name: String },
    /// The secure-storage facility (master key, preference file) failed.
    #[error("secure storage unavailable: {reason}")]
    Storage { reason: String },
}

/// Small key-value store whose contents are encrypted at rest.
///
/// A `put` must be durable when it returns; the passphrase written on first run
/// is the only copy of the database key.
#[async_trait]
pub trait SecureStore: Send + Sync {
    /// Persist a value under `name`, replacing any existing entry.
    async fn put(&self, name: &str, value: &[u8]) -> Result<(), SecureStoreError>;

    /// Read the value stored under `name`.
    async fn get(&self, name: &str) -> Result<Vec<u8>, SecureStoreError>;

    /// Remove the entry under `name` (idempotent).
    async fn delete(&self, name: &str) -> Result<(), SecureStoreError>;
}

/// Process-local store for tests. Nothing is encrypted or persisted.
///
/// [`InMemorySecureStore::set_unavailable`] makes every call fail with
/// [`SecureStoreError::Storage`], which stands in for a missing keyring.
#[derive(Debug, Default, Clone)]
pub struct InMemorySecureStore {
    entries: Arc<Mutex<HashMap<String, Vec<u8>>>>,
    unavailable: Arc<AtomicBool>,
}

impl InMemorySecureStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Number of stored entries.
    pub fn len(&self) -> usize {
        self.entries.lock().map(|m| m.len()).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check_available(&self) -> Result<(), SecureStoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(SecureStoreError::Storage {
                reason: "secure storage disabled".to_string(),
            });
        }
        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<String, Vec<u8>>>, SecureStoreError> {
        self.entries.lock().map_err(|err| SecureStoreError::Storage {
            reason: format!("lock poisoned: {err}"),
        })
    }
}

#[async_trait]
impl SecureStore for InMemorySecureStore {
    async fn put(&self, name: &str, value: &[u8]) -> Result<(), SecureStoreError> {
        self.check_available()?;
        self.lock()?.insert(name.to_string(), value.to_vec());
        Ok(())
    }

    async fn get(&self, name: &str) -> Result<Vec<u8>, SecureStoreError> {
        self.check_available()?;
        self.lock()?
            .get(name)
            .cloned()
            .ok_or_else(|| SecureStoreError::NotFound {
                name: name.to_string(),
            })
    }

    async fn delete(&self, name: &str) -> Result<(), SecureStoreError> {
        self.check_available()?;
        self.lock()?.remove(name);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_then_get_returns_value() {
        let store = InMemorySecureStore::new();
        store.put("PREFS", b"value").await.expect("put");

        assert_eq!(store.get("PREFS").await.expect("get"), b"value");
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn delete_is_idempotent_and_removes_data() {
        let store = InMemorySecureStore::new();
        store.put("k", b"v").await.expect("put should succeed");
        store.delete("k").await.expect("delete should succeed");
        store
            .delete("k")
            .await
            .expect("delete again should still succeed");

        let err = store
            .get("k")
            .await
            .expect_err("get should fail after delete");
        assert!(matches!(err, SecureStoreError::NotFound { .. }));
    }

    #[tokio::test]
    async fn unavailable_store_fails_every_call() {
        let store = InMemorySecureStore::new();
        store.put("k", b"v").await.expect("put");
        store.set_unavailable(true);

        assert!(matches!(
            store.get("k").await,
            Err(SecureStoreError::Storage { .. })
        ));
        assert!(matches!(
            store.put("k", b"w").await,
            Err(SecureStoreError::Storage { .. })
        ));

        store.set_unavailable(false);
        assert_eq!(store.get("k").await.expect("get"), b"v");
    }
}
