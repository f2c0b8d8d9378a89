//! Storage engines for secretdb.
//!
//! The record table lives in a SQLCipher database. Its passphrase is kept in
//! an AES-256-GCM encrypted preference file, which is in turn keyed by a
//! master key held in the OS keyring (or an in-memory double in tests).

pub mod encrypted_prefs;
pub mod master_key;
pub mod passphrase;
pub mod record_store;
