//! The write protocol shared by every state-changing contract action.

use crate::ledger::errors::LedgerError;
use crate::ledger::field::FieldSpec;
use crate::ledger::journal::{RollbackEntry, RollbackTxEntry};
use crate::storage::statement::{Expr, Insert, Select, Selector, SqlValue, Update};
use crate::storage::storage_trait::{AUDIT_COLUMN, Row, Storage, TableSchema};
use crate::types::hash::{HASH_LEN, Hash};
use crate::debug;
use std::sync::Arc;

/// Block being assembled when a write happens.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BlockData {
    pub block_id: i64,
    pub time: i64,
}

/// One requested row change, as submitted by a contract.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RowChange {
    pub table: String,
    pub fields: Vec<String>,
    pub values: Vec<SqlValue>,
    pub where_fields: Vec<String>,
    pub where_values: Vec<String>,
    pub general_rollback: bool,
}

impl RowChange {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            ..Self::default()
        }
    }

    pub fn set(mut self, field: impl Into<String>, value: impl Into<SqlValue>) -> Self {
        self.fields.push(field.into());
        self.values.push(value.into());
        self
    }

    pub fn filter(mut self, field: impl Into<String>, value: impl Into<String>) -> Self {
        self.where_fields.push(field.into());
        self.where_values.push(value.into());
        self
    }

    pub fn general_rollback(mut self) -> Self {
        self.general_rollback = true;
        self
    }
}

/// Applies row changes to a ledger, journalling every overwrite.
///
/// Each write to an existing row first records the overwritten values in the
/// `rollback` table and links the row to that entry through its `rb_id`
/// column, so the prior state of a row can always be rebuilt by walking the
/// chain of `prev_rb_id` links.
pub struct StateWriter<S: Storage + ?Sized> {
    storage: Arc<S>,
    block: Option<BlockData>,
    tx_hash: Hash,
}

impl<S: Storage + ?Sized> StateWriter<S> {
    pub fn new(storage: Arc<S>) -> Self {
        Self {
            storage,
            block: None,
            tx_hash: Hash::zero(),
        }
    }

    pub fn with_block(mut self, block: BlockData) -> Self {
        self.block = Some(block);
        self
    }

    pub fn with_tx_hash(mut self, tx_hash: Hash) -> Self {
        self.tx_hash = tx_hash;
        self
    }

    pub fn block(&self) -> Option<&BlockData> {
        self.block.as_ref()
    }

    pub fn tx_hash(&self) -> Hash {
        self.tx_hash
    }

    pub fn storage(&self) -> &Arc<S> {
        &self.storage
    }

    pub fn apply_change(&self, change: &RowChange) -> Result<String, LedgerError> {
        let fields: Vec<&str> = change.fields.iter().map(String::as_str).collect();
        let where_fields: Vec<&str> = change.where_fields.iter().map(String::as_str).collect();
        let where_values: Vec<&str> = change.where_values.iter().map(String::as_str).collect();
        self.apply(
            &fields,
            change.values.clone(),
            &change.table,
            &where_fields,
            &where_values,
            change.general_rollback,
        )
    }

    /// Updates the row selected by `where_fields = where_values`, or inserts
    /// a new one when nothing matches, and returns the row's key.
    ///
    /// Field names may carry a `+`/`-` prefix (adjust the current value) or a
    /// `timestamp ` prefix (the value is unix seconds). With
    /// `general_rollback`, the change is also recorded in `rollback_tx`
    /// against the current block and transaction.
    pub fn apply(
        &self,
        fields: &[&str],
        values: Vec<SqlValue>,
        table: &str,
        where_fields: &[&str],
        where_values: &[&str],
        general_rollback: bool,
    ) -> Result<String, LedgerError> {
        if general_rollback && self.block.is_none() {
            return Err(LedgerError::BlockUndefined);
        }
        if fields.len() != values.len() {
            return Err(LedgerError::FieldCount {
                fields: fields.len(),
                values: values.len(),
            });
        }
        if where_fields.len() != where_values.len() {
            return Err(LedgerError::SelectorCount {
                fields: where_fields.len(),
                values: where_values.len(),
            });
        }

        let schema = self.storage.schema(table)?;
        let specs = fields
            .iter()
            .map(|f| FieldSpec::parse(f))
            .collect::<Result<Vec<_>, _>>()?;
        let mut columns = Vec::with_capacity(specs.len());
        for (spec, value) in specs.iter().zip(values) {
            let bytea = spec.is_bytea(&schema.bytea);
            let value = if bytea {
                decode_bytea(&spec.column, value, schema.custom)?
            } else {
                value
            };
            columns.push((spec, value, bytea));
        }

        let selector = where_fields
            .iter()
            .zip(where_values)
            .fold(Selector::new(), |s, (f, v)| s.and(f.trim(), *v));

        let existing = if selector.is_empty() {
            None
        } else {
            self.find(table, &schema, &specs, &selector)?
        };

        let table_id = match existing {
            Some(row) => {
                let assignments = columns
                    .iter()
                    .map(|(spec, value, bytea)| (spec.column.clone(), spec.update_expr(value, *bytea)))
                    .collect();
                self.update_row(table, &schema, &row, assignments, selector)?
            }
            None => {
                let mut names: Vec<String> = Vec::with_capacity(columns.len());
                let mut exprs = Vec::with_capacity(columns.len());
                for (spec, value, bytea) in &columns {
                    names.push(spec.column.clone());
                    exprs.push(spec.insert_expr(value, *bytea));
                }
                for (field, value) in where_fields.iter().zip(where_values) {
                    names.push(field.trim().to_string());
                    exprs.push(Expr::Value(SqlValue::Text(value.to_string())));
                }
                self.insert_row(table, names, exprs)?
            }
        };

        if let Some(block) = self.block.as_ref().filter(|_| general_rollback) {
            let entry = RollbackTxEntry {
                block_id: block.block_id,
                tx_hash: self.tx_hash,
                table_name: table.to_string(),
                table_id: table_id.clone(),
            };
            let insert = entry.to_insert();
            debug!("{}", insert.to_sql().inline());
            self.storage.insert(&insert)?;
        }
        Ok(table_id)
    }

    /// Reads the current values of the written columns.
    fn find(
        &self,
        table: &str,
        schema: &TableSchema,
        specs: &[FieldSpec],
        selector: &Selector,
    ) -> Result<Option<Row>, LedgerError> {
        let mut columns: Vec<String> = Vec::with_capacity(specs.len() + 2);
        if let Some(pk) = &schema.primary_key {
            columns.push(pk.clone());
        }
        for spec in specs {
            if !columns.contains(&spec.column) {
                columns.push(spec.column.clone());
            }
        }
        if !columns.iter().any(|c| c == AUDIT_COLUMN) {
            columns.push(AUDIT_COLUMN.to_string());
        }
        let select = Select {
            table: table.to_string(),
            columns,
            selector: selector.clone(),
        };
        debug!("{}", select.to_sql().inline());
        Ok(self.storage.query_row(&select)?)
    }

    fn update_row(
        &self,
        table: &str,
        schema: &TableSchema,
        row: &Row,
        mut assignments: Vec<(String, Expr)>,
        selector: Selector,
    ) -> Result<String, LedgerError> {
        let block = self.block.as_ref().ok_or(LedgerError::BlockUndefined)?;
        let entry = RollbackEntry::new(row, schema, block.block_id)?;
        let insert = entry.to_insert();
        debug!("{}", insert.to_sql().inline());
        let rb_id = self.storage.insert(&insert)?;

        assignments.push((AUDIT_COLUMN.to_string(), Expr::Value(rb_id)));
        let update = Update {
            table: table.to_string(),
            assignments,
            selector,
        };
        debug!("{}", update.to_sql().inline());
        self.storage.update(&update)?;

        Ok(schema
            .primary_key
            .as_ref()
            .and_then(|pk| row.get(pk))
            .map(SqlValue::render)
            .unwrap_or_default())
    }

    fn insert_row(&self, table: &str, columns: Vec<String>, values: Vec<Expr>) -> Result<String, LedgerError> {
        let insert = Insert {
            table: table.to_string(),
            columns,
            values,
        };
        debug!("{}", insert.to_sql().inline());
        Ok(self.storage.insert(&insert)?.render())
    }
}

/// Byte-array values may arrive hex encoded; anything that does not decode
/// is stored as its raw bytes.
fn decode_bytea(column: &str, value: SqlValue, custom: bool) -> Result<SqlValue, LedgerError> {
    let bytes = match value {
        SqlValue::Text(text) => hex::decode(&text).unwrap_or_else(|_| text.into_bytes()),
        SqlValue::Null => return Ok(SqlValue::Null),
        other => other.raw_bytes(),
    };
    if custom && bytes.len() > HASH_LEN {
        return Err(LedgerError::HashTooLong {
            column: column.to_string(),
            limit: HASH_LEN,
            actual: bytes.len(),
        });
    }
    Ok(SqlValue::Bytes(bytes))
}
