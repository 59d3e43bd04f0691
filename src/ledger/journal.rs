//! Rollback journal records.
//!
//! A `rollback` row holds a JSON snapshot of the columns a write is about to
//! overwrite, plus a `prev_rb_id` link to the entry that produced those
//! values. A `rollback_tx` row ties a changed row to its block and
//! transaction.

use crate::ledger::errors::LedgerError;
use crate::storage::statement::{Expr, Insert, SqlValue};
use crate::storage::storage_trait::{AUDIT_COLUMN, ROLLBACK_TABLE, ROLLBACK_TX_TABLE, Row, TableSchema};
use crate::types::hash::Hash;
use std::collections::BTreeMap;

/// Snapshot key under which the row's previous audit link is stored.
pub const PREV_AUDIT_KEY: &str = "prev_rb_id";

/// Columns hex-encoded in snapshots regardless of their declared type.
const HASH_LIKE_COLUMNS: [&str; 6] = [
    "hash",
    "tx_hash",
    "public_key_0",
    "public_key_1",
    "public_key_2",
    "node_public_key",
];

/// Builds the snapshot of `row` before it is overwritten.
///
/// The primary key is left out. Byte-array and hash-like columns are stored
/// as hex, and the audit column is renamed to [`PREV_AUDIT_KEY`].
pub fn snapshot(row: &Row, schema: &TableSchema) -> BTreeMap<String, String> {
    let mut data = BTreeMap::new();
    for (column, value) in row {
        if schema.primary_key.as_deref() == Some(column.as_str()) {
            continue;
        }
        let hash_like = schema.bytea.contains(column) || HASH_LIKE_COLUMNS.contains(&column.as_str());
        let rendered = if hash_like && !value.raw_bytes().is_empty() {
            hex::encode(&value.raw_bytes())
        } else {
            value.render()
        };
        let key = if column == AUDIT_COLUMN {
            PREV_AUDIT_KEY
        } else {
            column.as_str()
        };
        data.insert(key.to_string(), rendered);
    }
    data
}

/// One `rollback` row.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RollbackEntry {
    pub data: String,
    pub block_id: i64,
}

impl RollbackEntry {
    pub fn new(row: &Row, schema: &TableSchema, block_id: i64) -> Result<Self, LedgerError> {
        let data = serde_json::to_string(&snapshot(row, schema))
            .map_err(|e| LedgerError::Snapshot(e.to_string()))?;
        Ok(Self { data, block_id })
    }

    pub fn to_insert(&self) -> Insert {
        Insert {
            table: ROLLBACK_TABLE.to_string(),
            columns: vec!["data".into(), "block_id".into()],
            values: vec![
                Expr::Value(SqlValue::Text(self.data.clone())),
                Expr::Value(SqlValue::Int(self.block_id)),
            ],
        }
    }

    /// Decodes the snapshot stored in `data`.
    pub fn values(&self) -> Result<BTreeMap<String, String>, LedgerError> {
        serde_json::from_str(&self.data).map_err(|e| LedgerError::Snapshot(e.to_string()))
    }
}

/// One `rollback_tx` row.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RollbackTxEntry {
    pub block_id: i64,
    pub tx_hash: Hash,
    pub table_name: String,
    pub table_id: String,
}

impl RollbackTxEntry {
    pub fn to_insert(&self) -> Insert {
        Insert {
            table: ROLLBACK_TX_TABLE.to_string(),
            columns: vec![
                "block_id".into(),
                "tx_hash".into(),
                "table_name".into(),
                "table_id".into(),
            ],
            values: vec![
                Expr::Value(SqlValue::Int(self.block_id)),
                Expr::Value(SqlValue::Bytes(self.tx_hash.as_slice().to_vec())),
                Expr::Value(SqlValue::Text(self.table_name.clone())),
                Expr::Value(SqlValue::Text(self.table_id.clone())),
            ],
        }
    }
}
