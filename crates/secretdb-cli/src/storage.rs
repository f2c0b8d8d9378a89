use std::path::PathBuf;

use crate::config::{Config, KeyringConfig};
use color_eyre::Result;
use dirs::data_dir;
use secretdb_core::storage::SecureStore;
use secretdb_storage::{
    encrypted_prefs::{EncryptedPreferences, DEFAULT_PREFS_NAME},
    master_key::{KeyringMasterKey, MasterKeyProvider},
    passphrase::PassphraseProvisioner,
    record_store::{SqlCipherRecordStore, DATABASE_NAME},
};
use tracing::debug;

pub const KEYRING_SERVICE: &str = "secretdb";
pub const KEYRING_ACCOUNT: &str = "master-key";
pub const DATA_DIR_ENV: &str = "SECRETDB_DATA_DIR";

/// Resolve the default data directory for secretdb.
pub fn default_data_dir() -> Result<PathBuf> {
    let base = data_dir().ok_or_else(|| color_eyre::eyre::eyre!("no data dir available"))?;
    Ok(base.join("secretdb"))
}

/// `SECRETDB_DATA_DIR` wins over the config file, which wins over the platform default.
pub fn resolve_data_dir(config: &Config) -> Result<PathBuf> {
    if let Some(dir) = std::env::var_os(DATA_DIR_ENV).filter(|v| !v.is_empty()) {
        return Ok(PathBuf::from(dir));
    }
    match &config.data_dir {
        Some(dir) => Ok(dir.clone()),
        None => default_data_dir(),
    }
}

pub fn database_path(config: &Config, root: &std::path::Path) -> PathBuf {
    root.join(config.database_name.as_deref().unwrap_or(DATABASE_NAME))
}

/// `config` with every unset field replaced by the value the CLI would use.
pub fn resolved_config(config: &Config) -> Result<Config> {
    Ok(fill_defaults(config, resolve_data_dir(config)?))
}

fn fill_defaults(config: &Config, data_dir: PathBuf) -> Config {
    let keyring = config.keyring.clone().unwrap_or_default();
    Config {
        data_dir: Some(data_dir),
        database_name: Some(
            config
                .database_name
                .clone()
                .unwrap_or_else(|| DATABASE_NAME.to_string()),
        ),
        prefs_name: Some(
            config
                .prefs_name
                .clone()
                .unwrap_or_else(|| DEFAULT_PREFS_NAME.to_string()),
        ),
        keyring: Some(KeyringConfig {
            service: Some(keyring.service.unwrap_or_else(|| KEYRING_SERVICE.to_string())),
            account: Some(keyring.account.unwrap_or_else(|| KEYRING_ACCOUNT.to_string())),
        }),
    }
}

/// Master key entry in the OS keyring named by `config`.
pub fn keyring_master_key(config: &Config) -> KeyringMasterKey {
    let keyring = config.keyring.clone().unwrap_or_default();
    KeyringMasterKey::new(
        keyring.service.unwrap_or_else(|| KEYRING_SERVICE.to_string()),
        keyring.account.unwrap_or_else(|| KEYRING_ACCOUNT.to_string()),
    )
}

/// Preference file under `root` sealed by `master_key`.
pub fn prefs_from_config<P: MasterKeyProvider>(
    config: &Config,
    root: impl Into<PathBuf>,
    master_key: P,
) -> EncryptedPreferences<P> {
    EncryptedPreferences::new(
        root,
        config
            .prefs_name
            .clone()
            .unwrap_or_else(|| DEFAULT_PREFS_NAME.to_string()),
        master_key,
    )
}

/// Open the production database: keyring master key, encrypted preferences, SQLCipher file.
pub async fn open_secret_database(config: &Config) -> Result<SqlCipherRecordStore> {
    open_secret_database_with(config, keyring_master_key(config)).await
}

/// Same layout as [`open_secret_database`] with the master key supplied by the caller.
pub async fn open_secret_database_with<P: MasterKeyProvider>(
    config: &Config,
    master_key: P,
) -> Result<SqlCipherRecordStore> {
    let root = resolve_data_dir(config)?;
    debug!(?root, "opening encrypted database");
    let prefs = prefs_from_config(config, root.clone(), master_key);
    open_with_prefs(database_path(config, &root), prefs).await
}

pub async fn open_with_prefs<S: SecureStore>(
    db_path: PathBuf,
    prefs: S,
) -> Result<SqlCipherRecordStore> {
    let provisioner = PassphraseProvisioner::new(prefs);
    Ok(SqlCipherRecordStore::open_provisioned(db_path, &provisioner).await?)
}

/// Database rooted at `root` whose master key only lives in memory.
#[cfg(test)]
pub async fn test_database(
    root: &std::path::Path,
    master_key: secretdb_storage::master_key::InMemoryMasterKey,
) -> SqlCipherRecordStore {
    let prefs = EncryptedPreferences::new(root, DEFAULT_PREFS_NAME, master_key);
    open_with_prefs(root.join(DATABASE_NAME), prefs)
        .await
        .expect("open test database")
}
