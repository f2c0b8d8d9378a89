use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::watch;

/// One stored secret. `id` is assigned by the store on insert.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Record {
    pub id: i64,
    pub value: String,
}

/// Failures surfaced by a record repository. None of them are retried internally.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RecordStoreError {
    /// The passphrase could not be read from or written to secure storage.
    #[error("database key unavailable: {reason}")]
    KeyUnavailable { reason: String },
    /// The database file could not be opened with the supplied key.
    /// A wrong key and a corrupt file look the same here.
    #[error("cannot open encrypted database: {reason}")]
    Open { reason: String },
    /// A read or write against an open database failed.
    #[error("storage failure: {reason}")]
    Storage { reason: String },
}

/// Append-only list of records with a bulk clear.
#[async_trait]
pub trait RecordRepository: Send + Sync {
    /// Append `value` and return the id it was assigned.
    async fn insert(&self, value: String) -> Result<i64, RecordStoreError>;

    /// Every current record, oldest first.
    async fn list_all(&self) -> Result<Vec<Record>, RecordStoreError>;

    /// Delete every record in one atomic step.
    async fn clear_all(&self) -> Result<(), RecordStoreError>;

    /// Live view of `list_all`. The receiver already holds the post-mutation
    /// list when `insert` or `clear_all` returns.
    fn subscribe(&self) -> watch::Receiver<Vec<Record>>;
}
