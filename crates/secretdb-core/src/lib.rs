//! Core contracts for secretdb: encrypted preference storage and the record repository.
//! Concrete engines live in `secretdb-storage`; this crate stays free of crypto and SQL.

pub mod records;
pub mod storage;
