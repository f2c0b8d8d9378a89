use std::{
    fs,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use rusqlite::{params, Connection, Transaction};
use secretdb_core::{
    records::{Record, RecordRepository, RecordStoreError},
    storage::SecureStore,
};
use tokio::sync::watch;
use tracing::{debug, instrument, warn};
use zeroize::Zeroizing;

use crate::passphrase::{Passphrase, PassphraseProvisioner};

pub const DATABASE_NAME: &str = "secret_database.db";
pub const SCHEMA_VERSION: i32 = 1;

const CREATE_SCHEMA: &str = "CREATE TABLE IF NOT EXISTS secret_table (
    id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
    secret_value TEXT NOT NULL
);";

/// Record table in a SQLCipher database file. Cheap to clone; all clones share
/// one connection and one change feed.
#[derive(Clone)]
pub struct SqlCipherRecordStore {
    path: PathBuf,
    conn: Arc<Mutex<Connection>>,
    changes: Arc<watch::Sender<Vec<Record>>>,
}

impl std::fmt::Debug for SqlCipherRecordStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqlCipherRecordStore")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl SqlCipherRecordStore {
    /// Open or create the database at `path`, keyed with `passphrase`.
    ///
    /// Fails with [`RecordStoreError::Open`] when the file exists but was
    /// written with another key (or is not a database at all).
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub async fn open(
        path: impl AsRef<Path>,
        passphrase: &Passphrase,
    ) -> Result<Self, RecordStoreError> {
        let path = path.as_ref().to_path_buf();
        let passphrase = passphrase.clone();
        let open_path = path.clone();

        let (conn, records) = tokio::task::spawn_blocking(move || {
            let mut conn = open_connection(&open_path, &passphrase)?;
            migrate(&mut conn)?;
            let records = select_all(&conn)?;
            Ok::<_, RecordStoreError>((conn, records))
        })
        .await
        .map_err(|e| RecordStoreError::Open {
            reason: format!("open task failed: {e}"),
        })??;

        debug!(records = records.len(), "encrypted database opened");
        let (changes, _) = watch::channel(records);
        Ok(Self {
            path,
            conn: Arc::new(Mutex::new(conn)),
            changes: Arc::new(changes),
        })
    }

    /// Provision (or load) the passphrase from `provisioner`, then open `path` with it.
    pub async fn open_provisioned<S: SecureStore>(
        path: impl AsRef<Path>,
        provisioner: &PassphraseProvisioner<S>,
    ) -> Result<Self, RecordStoreError> {
        let passphrase = provisioner.get_or_create_passphrase().await?;
        Self::open(path, &passphrase).await
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn count(&self) -> Result<i64, RecordStoreError> {
        self.with_conn(|conn| {
            conn.query_row("SELECT COUNT(*) FROM secret_table", [], |row| row.get(0))
                .map_err(storage_err)
        })
        .await
    }

    async fn with_conn<F, T>(&self, f: F) -> Result<T, RecordStoreError>
    where
        F: FnOnce(&mut Connection) -> Result<T, RecordStoreError> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock().map_err(|e| RecordStoreError::Storage {
                reason: format!("connection lock poisoned: {e}"),
            })?;
            f(&mut *guard)
        })
        .await
        .map_err(|e| RecordStoreError::Storage {
            reason: format!("blocking task failed: {e}"),
        })?
    }

    /// Run a write and re-read the table in one transaction. The fresh list is
    /// published only after commit, while the connection is still held; any
    /// error before that rolls the write back.
    async fn mutate<F, T>(&self, f: F) -> Result<T, RecordStoreError>
    where
        F: FnOnce(&Transaction<'_>) -> Result<T, RecordStoreError> + Send + 'static,
        T: Send + 'static,
    {
        let changes = Arc::clone(&self.changes);
        self.with_conn(move |conn| {
            let tx = conn.transaction().map_err(storage_err)?;
            let out = f(&tx)?;
            let records = select_all(&tx)?;
            tx.commit().map_err(storage_err)?;
            changes.send_replace(records);
            Ok(out)
        })
        .await
    }
}

#[async_trait]
impl RecordRepository for SqlCipherRecordStore {
    #[instrument(skip_all, fields(len = value.len()))]
    async fn insert(&self, value: String) -> Result<i64, RecordStoreError> {
        let id = self
            .mutate(move |tx| {
                tx.execute(
                    "INSERT INTO secret_table (secret_value) VALUES (?1)",
                    params![value],
                )
                .map_err(storage_err)?;
                Ok(tx.last_insert_rowid())
            })
            .await?;
        debug!(id, "record inserted");
        Ok(id)
    }

    #[instrument(skip_all)]
    async fn list_all(&self) -> Result<Vec<Record>, RecordStoreError> {
        self.with_conn(|conn| select_all(conn)).await
    }

    #[instrument(skip_all)]
    async fn clear_all(&self) -> Result<(), RecordStoreError> {
        let removed = self
            .mutate(|tx| {
                tx.execute("DELETE FROM secret_table", [])
                    .map_err(storage_err)
            })
            .await?;
        debug!(removed, "records cleared");
        Ok(())
    }

    fn subscribe(&self) -> watch::Receiver<Vec<Record>> {
        self.changes.subscribe()
    }
}

fn open_connection(path: &Path, passphrase: &Passphrase) -> Result<Connection, RecordStoreError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(open_err)?;
    }

    let conn = Connection::open(path).map_err(open_err)?;

    // Raw key form: SQLCipher uses the bytes directly, skipping its passphrase KDF.
    let key_pragma = Zeroizing::new(format!(
        "PRAGMA key = \"x'{}'\";",
        hex::encode(passphrase.as_bytes())
    ));
    conn.execute_batch(&key_pragma).map_err(open_err)?;

    // Keying is lazy; the first read is what detects a wrong key.
    conn.query_row("SELECT COUNT(*) FROM sqlite_master", [], |row| {
        row.get::<_, i64>(0)
    })
    .map_err(|e| RecordStoreError::Open {
        reason: format!("wrong key or corrupt database file: {e}"),
    })?;

    Ok(conn)
}

/// Create the v1 schema. A file stamped with any other version is rebuilt from
/// scratch, discarding its rows.
fn migrate(conn: &mut Connection) -> Result<(), RecordStoreError> {
    let version: i32 = conn
        .pragma_query_value(None, "user_version", |row| row.get(0))
        .map_err(open_err)?;

    let tx = conn.transaction().map_err(open_err)?;
    if version != 0 && version != SCHEMA_VERSION {
        warn!(
            found = version,
            expected = SCHEMA_VERSION,
            "unknown schema version, recreating tables"
        );
        tx.execute_batch("DROP TABLE IF EXISTS secret_table;")
            .map_err(open_err)?;
    }
    tx.execute_batch(CREATE_SCHEMA).map_err(open_err)?;
    tx.pragma_update(None, "user_version", SCHEMA_VERSION)
        .map_err(open_err)?;
    tx.commit().map_err(open_err)
}

fn select_all(conn: &Connection) -> Result<Vec<Record>, RecordStoreError> {
    let mut stmt = conn
        .prepare_cached("SELECT id, secret_value FROM secret_table ORDER BY id ASC")
        .map_err(storage_err)?;
    let rows = stmt
        .query_map([], |row| {
            Ok(Record {
                id: row.get(0)?,
                value: row.get(1)?,
            })
        })
        .map_err(storage_err)?;
    rows.collect::<Result<Vec<_>, _>>().map_err(storage_err)
}

fn open_err<E: ToString>(err: E) -> RecordStoreError {
    RecordStoreError::Open {
        reason: err.to_string(),
    }
}

fn storage_err<E: ToString>(err: E) -> RecordStoreError {
    RecordStoreError::Storage {
        reason: err.to_string(),
    }
}
