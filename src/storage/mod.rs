//! Ledger storage subsystem.
//!
//! - [`storage_trait`]: the [`Storage`](storage_trait::Storage) backend trait,
//!   table schemas and the journal table names
//! - [`statement`]: structured SELECT/INSERT/UPDATE statements and their
//!   parameterised SQL rendering
//! - [`memory_storage`]: in-memory backend used by tests and the CLI

pub mod memory_storage;
pub mod statement;
pub mod storage_trait;
