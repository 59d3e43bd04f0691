//! Storage backend abstraction for ledger tables.
//!
//! The relational engine is an external collaborator: the ledger writer only
//! relies on the statements in [`statement`](super::statement) and on the row
//! shape described by [`TableSchema`].

use crate::storage::statement::{Insert, Select, SqlValue, Update};
use ledger_derive::Error;
use std::collections::{BTreeMap, BTreeSet};

/// Journal of pre-mutation row snapshots.
pub const ROLLBACK_TABLE: &str = "rollback";
/// Links a journal entry to the block and transaction that produced it.
pub const ROLLBACK_TX_TABLE: &str = "rollback_tx";
/// Audit-chain column present on every ledger table.
pub const AUDIT_COLUMN: &str = "rb_id";

/// A row returned by a backend, keyed by column name.
pub type Row = BTreeMap<String, SqlValue>;

/// Errors that can occur while interacting with storage backends.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StorageError {
    #[error("table {0} does not exist")]
    UnknownTable(String),
    #[error("column {column} does not exist in table {table}")]
    UnknownColumn { table: String, column: String },
    #[error("table {0} already exists")]
    TableExists(String),
    #[error("duplicate key {key} in table {table}")]
    DuplicateKey { table: String, key: String },
    #[error("column {column} is not numeric (value {value:?})")]
    NotNumeric { column: String, value: String },
    #[error("invalid unix timestamp {0:?}")]
    InvalidTimestamp(String),
    /// Failure reported by the underlying engine.
    #[error("{0}")]
    Backend(String),
}

/// Shape of a ledger table.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TableSchema {
    /// Column holding the row identifier, if the table has one.
    pub primary_key: Option<String>,
    /// All columns, including the primary key.
    pub columns: Vec<String>,
    /// Columns holding raw byte arrays.
    pub bytea: BTreeSet<String>,
    /// Hash-identified table whose byte-array values are limited to 32 bytes.
    pub custom: bool,
}

impl TableSchema {
    /// Ledger table with the given primary key and the audit-chain column.
    pub fn new(primary_key: &str) -> Self {
        Self {
            primary_key: Some(primary_key.to_string()),
            columns: vec![primary_key.to_string(), AUDIT_COLUMN.to_string()],
            bytea: BTreeSet::new(),
            custom: false,
        }
    }

    /// Table without audit column, such as the journal tables themselves.
    pub fn plain(primary_key: &str) -> Self {
        Self {
            primary_key: Some(primary_key.to_string()),
            columns: vec![primary_key.to_string()],
            bytea: BTreeSet::new(),
            custom: false,
        }
    }

    pub fn column(mut self, name: &str) -> Self {
        if !self.has_column(name) {
            self.columns.push(name.to_string());
        }
        self
    }

    pub fn bytea(mut self, name: &str) -> Self {
        self.bytea.insert(name.to_string());
        self.column(name)
    }

    pub fn custom(mut self) -> Self {
        self.custom = true;
        self
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c == name)
    }

    /// `rollback(id, data, block_id)`
    pub fn rollback() -> Self {
        Self::plain("id").column("data").column("block_id")
    }

    /// `rollback_tx(id, block_id, tx_hash, table_name, table_id)`
    pub fn rollback_tx() -> Self {
        Self::plain("id")
            .column("block_id")
            .bytea("tx_hash")
            .column("table_name")
            .column("table_id")
    }
}

/// Storage backend for ledger rows.
///
/// Implementations must be thread-safe (`Send + Sync`): independent top-level
/// invocations may write concurrently, and each statement must be applied
/// atomically by the backend.
pub trait Storage: Send + Sync {
    /// Returns the schema of `table`.
    fn schema(&self, table: &str) -> Result<TableSchema, StorageError>;

    /// Returns the first row matching the select, restricted to its columns.
    fn query_row(&self, select: &Select) -> Result<Option<Row>, StorageError>;

    /// Inserts one row and returns its primary key (`Null` without one).
    fn insert(&self, insert: &Insert) -> Result<SqlValue, StorageError>;

    /// Updates every matching row and returns how many were changed.
    fn update(&self, update: &Update) -> Result<u64, StorageError>;
}
