use std::{
    fs,
    path::{Path, PathBuf},
};

use color_eyre::Result;
use dirs::config_dir;
use serde::{Deserialize, Serialize};

/// User-level configuration loaded from `<config dir>/secretdb/config.toml`.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct Config {
    /// Directory holding the database and the preference file.
    pub data_dir: Option<PathBuf>,
    /// Database file name inside `data_dir`.
    pub database_name: Option<String>,
    /// Preference file name (without extension) inside `data_dir`.
    pub prefs_name: Option<String>,
    /// Where the master key lives in the OS keyring.
    pub keyring: Option<KeyringConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct KeyringConfig {
    pub service: Option<String>,
    pub account: Option<String>,
}

/// Load config from the default path; if missing, return defaults.
pub fn load() -> Result<Config> {
    let path = default_path()?;
    load_from_path(path)
}

/// Load config from a given path; if missing or empty, return defaults.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<Config> {
    let path = path.as_ref();
    if !path.exists() {
        return Ok(Config::default());
    }
    let contents = fs::read_to_string(path)?;
    if contents.trim().is_empty() {
        return Ok(Config::default());
    }
    let cfg: Config = toml::from_str(&contents)?;
    Ok(cfg)
}

pub fn default_path() -> Result<PathBuf> {
    let base = config_dir().ok_or_else(|| color_eyre::eyre::eyre!("no config dir available"))?;
    Ok(base.join("secretdb").join("config.toml"))
}

/// Write `config` to the default path unless a file is already there.
/// Callers pass the resolved config so the file lists every effective setting.
pub fn write_default_if_missing(config: &Config) -> Result<PathBuf> {
    write_to_path_if_missing(config, &default_path()?)
}

fn write_to_path_if_missing(config: &Config, path: &Path) -> Result<PathBuf> {
    if path.exists() {
        return Ok(path.to_path_buf());
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let body = toml::to_string_pretty(config)?;
    fs::write(path, body)?;
    Ok(path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn returns_default_when_missing() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cfg = load_from_path(dir.path().join("config.toml")).expect("load");
        assert_eq!(cfg, Config::default());
    }

    #[test]
    fn returns_default_when_empty() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.toml");
        fs::write(&path, "  \n").expect("write");
        assert_eq!(load_from_path(&path).expect("load"), Config::default());
    }

    #[test]
    fn parses_custom_config() {
        let contents = r#"
            data_dir = "/tmp/secretdb-data"
            database_name = "vault.db"
            prefs_name = "vault_prefs"
            [keyring]
            service = "secretdb-test"
            account = "device-key"
        "#;
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.toml");
        fs::write(&path, contents).expect("write temp config");

        let cfg = load_from_path(&path).expect("load");
        assert_eq!(
            cfg,
            Config {
                data_dir: Some(PathBuf::from("/tmp/secretdb-data")),
                database_name: Some("vault.db".into()),
                prefs_name: Some("vault_prefs".into()),
                keyring: Some(KeyringConfig {
                    service: Some("secretdb-test".into()),
                    account: Some("device-key".into()),
                }),
            }
        );
    }

    #[test]
    fn write_default_creates_file_once() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested").join("config.toml");
        let cfg = Config {
            data_dir: Some(PathBuf::from("/tmp/secretdb-data")),
            ..Config::default()
        };

        write_to_path_if_missing(&cfg, &path).expect("write should succeed");
        let other = Config {
            database_name: Some("other.db".into()),
            ..Config::default()
        };
        let second = write_to_path_if_missing(&other, &path).expect("second write ok");
        assert_eq!(second, path);

        let loaded = load_from_path(&path).expect("parse");
        assert_eq!(loaded, cfg);
    }

    #[test]
    fn written_file_lists_every_setting() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.toml");
        let cfg = Config {
            data_dir: Some(PathBuf::from("/tmp/secretdb-data")),
            database_name: Some("secret_database.db".into()),
            prefs_name: Some("secretdb.shared_prefs".into()),
            keyring: Some(KeyringConfig {
                service: Some("secretdb".into()),
                account: Some("master-key".into()),
            }),
        };

        write_to_path_if_missing(&cfg, &path).expect("write");
        let body = fs::read_to_string(&path).expect("read");
        for key in ["data_dir", "database_name", "prefs_name", "[keyring]", "service", "account"] {
            assert!(body.contains(key), "missing {key} in:\n{body}");
        }
        assert_eq!(load_from_path(&path).expect("parse"), cfg);
    }
}
