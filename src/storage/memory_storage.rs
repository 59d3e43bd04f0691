//! In-memory storage backend.
//!
//! Interprets the structured statements directly instead of parsing SQL.
//! Each table lives behind its own `dashmap` shard lock, so a statement is
//! applied atomically with respect to other writers of the same table.

use crate::storage::statement::{Expr, Insert, Select, Selector, SqlValue, Update};
use crate::storage::storage_trait::{
    ROLLBACK_TABLE, ROLLBACK_TX_TABLE, Row, Storage, StorageError, TableSchema,
};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

struct Table {
    schema: TableSchema,
    rows: Vec<Row>,
    next_id: i64,
}

impl Table {
    fn check_column(&self, table: &str, column: &str) -> Result<(), StorageError> {
        if self.schema.has_column(column) {
            Ok(())
        } else {
            Err(StorageError::UnknownColumn {
                table: table.to_string(),
                column: column.to_string(),
            })
        }
    }

    fn matches(&self, table: &str, row: &Row, selector: &Selector) -> Result<bool, StorageError> {
        for (column, value) in selector.conditions() {
            self.check_column(table, column)?;
            let current = row.get(column).map(SqlValue::render).unwrap_or_default();
            if current != value.render() {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

/// In-memory storage for tests, tooling and development.
pub struct MemoryStorage {
    tables: DashMap<String, Table>,
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStorage {
    /// Creates a storage holding only the two journal tables.
    pub fn new() -> Self {
        let storage = Self {
            tables: DashMap::new(),
        };
        for (name, schema) in [
            (ROLLBACK_TABLE, TableSchema::rollback()),
            (ROLLBACK_TX_TABLE, TableSchema::rollback_tx()),
        ] {
            storage.tables.insert(
                name.to_string(),
                Table {
                    schema,
                    rows: Vec::new(),
                    next_id: 1,
                },
            );
        }
        storage
    }

    /// Registers a new table.
    pub fn create_table(&self, name: &str, schema: TableSchema) -> Result<(), StorageError> {
        match self.tables.entry(name.to_string()) {
            Entry::Occupied(_) => Err(StorageError::TableExists(name.to_string())),
            Entry::Vacant(slot) => {
                slot.insert(Table {
                    schema,
                    rows: Vec::new(),
                    next_id: 1,
                });
                Ok(())
            }
        }
    }

    /// Returns a copy of every row of `table` in insertion order.
    pub fn rows(&self, table: &str) -> Result<Vec<Row>, StorageError> {
        self.tables
            .get(table)
            .map(|t| t.rows.clone())
            .ok_or_else(|| StorageError::UnknownTable(table.to_string()))
    }

    /// Number of rows in `table`, zero when it does not exist.
    pub fn row_count(&self, table: &str) -> usize {
        self.tables.get(table).map(|t| t.rows.len()).unwrap_or(0)
    }
}

/// Parses a value for arithmetic; `None` means SQL `NULL`.
fn numeric(column: &str, value: &SqlValue) -> Result<Option<i64>, StorageError> {
    match value {
        SqlValue::Null => Ok(None),
        SqlValue::Int(v) => Ok(Some(*v)),
        other => {
            let text = other.render();
            text.trim()
                .parse::<i64>()
                .map(Some)
                .map_err(|_| StorageError::NotNumeric {
                    column: column.to_string(),
                    value: text,
                })
        }
    }
}

fn arithmetic(
    column: &str,
    current: Option<&SqlValue>,
    operand: &SqlValue,
    op: fn(i64, i64) -> Option<i64>,
) -> Result<SqlValue, StorageError> {
    let lhs = numeric(column, current.unwrap_or(&SqlValue::Null))?;
    let rhs = numeric(column, operand)?;
    match (lhs, rhs) {
        (Some(a), Some(b)) => op(a, b)
            .map(SqlValue::Int)
            .ok_or_else(|| StorageError::Backend(format!("numeric overflow in column {column}"))),
        _ => Ok(SqlValue::Null),
    }
}

fn unix_to_timestamp(value: &SqlValue) -> Result<SqlValue, StorageError> {
    let text = value.render();
    let secs = text
        .trim()
        .parse::<i64>()
        .map_err(|_| StorageError::InvalidTimestamp(text.clone()))?;
    let time = DateTime::<Utc>::from_timestamp(secs, 0).ok_or(StorageError::InvalidTimestamp(text))?;
    Ok(SqlValue::Timestamp(
        time.format("%Y-%m-%d %H:%M:%S").to_string(),
    ))
}

fn evaluate(column: &str, expr: &Expr, current: Option<&SqlValue>) -> Result<SqlValue, StorageError> {
    match expr {
        Expr::Value(v) => Ok(v.clone()),
        Expr::Add(v) => arithmetic(column, current, v, i64::checked_add),
        Expr::Sub(v) => arithmetic(column, current, v, i64::checked_sub),
        Expr::ToTimestamp(v) => unix_to_timestamp(v),
        Expr::TimestampLiteral(s) => Ok(SqlValue::Timestamp(s.clone())),
    }
}

impl Storage for MemoryStorage {
    fn schema(&self, table: &str) -> Result<TableSchema, StorageError> {
        self.tables
            .get(table)
            .map(|t| t.schema.clone())
            .ok_or_else(|| StorageError::UnknownTable(table.to_string()))
    }

    fn query_row(&self, select: &Select) -> Result<Option<Row>, StorageError> {
        let table = self
            .tables
            .get(&select.table)
            .ok_or_else(|| StorageError::UnknownTable(select.table.clone()))?;
        for column in &select.columns {
            table.check_column(&select.table, column)?;
        }
        for row in &table.rows {
            if table.matches(&select.table, row, &select.selector)? {
                let projected = select
                    .columns
                    .iter()
                    .map(|c| (c.clone(), row.get(c).cloned().unwrap_or(SqlValue::Null)))
                    .collect();
                return Ok(Some(projected));
            }
        }
        Ok(None)
    }

    fn insert(&self, insert: &Insert) -> Result<SqlValue, StorageError> {
        let mut table = self
            .tables
            .get_mut(&insert.table)
            .ok_or_else(|| StorageError::UnknownTable(insert.table.clone()))?;

        let mut row: Row = table
            .schema
            .columns
            .iter()
            .map(|c| (c.clone(), SqlValue::Null))
            .collect();
        for (column, expr) in insert.columns.iter().zip(&insert.values) {
            table.check_column(&insert.table, column)?;
            row.insert(column.clone(), evaluate(column, expr, None)?);
        }

        let Some(pk) = table.schema.primary_key.clone() else {
            table.rows.push(row);
            return Ok(SqlValue::Null);
        };

        let key = match row.get(&pk).filter(|v| !v.is_null()) {
            Some(given) => {
                let rendered = given.render();
                if table
                    .rows
                    .iter()
                    .any(|r| r.get(&pk).map(SqlValue::render) == Some(rendered.clone()))
                {
                    return Err(StorageError::DuplicateKey {
                        table: insert.table.clone(),
                        key: rendered,
                    });
                }
                match rendered.parse::<i64>() {
                    Ok(id) => {
                        table.next_id = table.next_id.max(id.saturating_add(1));
                        SqlValue::Int(id)
                    }
                    Err(_) => given.clone(),
                }
            }
            None => {
                let id = table.next_id;
                table.next_id += 1;
                SqlValue::Int(id)
            }
        };
        row.insert(pk, key.clone());
        table.rows.push(row);
        Ok(key)
    }

    fn update(&self, update: &Update) -> Result<u64, StorageError> {
        let mut guard = self
            .tables
            .get_mut(&update.table)
            .ok_or_else(|| StorageError::UnknownTable(update.table.clone()))?;
        let table = &mut *guard;
        for (column, _) in &update.assignments {
            table.check_column(&update.table, column)?;
        }

        // Evaluate everything first so a failing expression leaves the table untouched.
        let mut changes = Vec::new();
        for (index, row) in table.rows.iter().enumerate() {
            if !table.matches(&update.table, row, &update.selector)? {
                continue;
            }
            let values = update
                .assignments
                .iter()
                .map(|(column, expr)| Ok((column.clone(), evaluate(column, expr, row.get(column))?)))
                .collect::<Result<Vec<_>, StorageError>>()?;
            changes.push((index, values));
        }

        let count = changes.len() as u64;
        for (index, values) in changes {
            table.rows[index].extend(values);
        }
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn accounts() -> MemoryStorage {
        let storage = MemoryStorage::new();
        storage
            .create_table("accounts", TableSchema::new("id").column("balance").column("created"))
            .unwrap();
        storage
    }

    fn insert(storage: &MemoryStorage, columns: &[&str], values: Vec<Expr>) -> SqlValue {
        storage
            .insert(&Insert {
                table: "accounts".into(),
                columns: columns.iter().map(|c| c.to_string()).collect(),
                values,
            })
            .unwrap()
    }

    #[test]
    fn insert_generates_sequential_ids() {
        let storage = accounts();
        let a = insert(&storage, &["balance"], vec![Expr::Value("5".into())]);
        let b = insert(&storage, &["balance"], vec![Expr::Value("6".into())]);
        assert_eq!(a, SqlValue::Int(1));
        assert_eq!(b, SqlValue::Int(2));
        assert_eq!(storage.row_count("accounts"), 2);
    }

    #[test]
    fn explicit_key_advances_sequence_and_rejects_duplicates() {
        let storage = accounts();
        insert(&storage, &["id", "balance"], vec![Expr::Value("10".into()), Expr::Value("1".into())]);
        let next = insert(&storage, &["balance"], vec![Expr::Value("2".into())]);
        assert_eq!(next, SqlValue::Int(11));

        let err = storage
            .insert(&Insert {
                table: "accounts".into(),
                columns: vec!["id".into()],
                values: vec![Expr::Value("10".into())],
            })
            .unwrap_err();
        assert!(matches!(err, StorageError::DuplicateKey { .. }));
    }

    #[test]
    fn update_applies_arithmetic_to_matching_rows() {
        let storage = accounts();
        insert(&storage, &["balance"], vec![Expr::Value("5".into())]);
        insert(&storage, &["balance"], vec![Expr::Value("7".into())]);

        let changed = storage
            .update(&Update {
                table: "accounts".into(),
                assignments: vec![("balance".into(), Expr::Add("10".into()))],
                selector: Selector::new().and("id", "1"),
            })
            .unwrap();
        assert_eq!(changed, 1);

        let rows = storage.rows("accounts").unwrap();
        assert_eq!(rows[0]["balance"], SqlValue::Int(15));
        assert_eq!(rows[1]["balance"], SqlValue::from("7"));
    }

    #[test]
    fn failed_update_leaves_rows_unchanged() {
        let storage = accounts();
        insert(&storage, &["balance"], vec![Expr::Value("abc".into())]);
        let err = storage
            .update(&Update {
                table: "accounts".into(),
                assignments: vec![("balance".into(), Expr::Sub("1".into()))],
                selector: Selector::new(),
            })
            .unwrap_err();
        assert!(matches!(err, StorageError::NotNumeric { .. }));
        assert_eq!(storage.rows("accounts").unwrap()[0]["balance"], SqlValue::from("abc"));
    }

    #[test]
    fn to_timestamp_formats_unix_seconds() {
        let storage = accounts();
        insert(&storage, &["created"], vec![Expr::ToTimestamp("86400".into())]);
        assert_eq!(
            storage.rows("accounts").unwrap()[0]["created"],
            SqlValue::Timestamp("1970-01-02 00:00:00".into())
        );
    }

    #[test]
    fn query_row_projects_requested_columns() {
        let storage = accounts();
        insert(&storage, &["balance"], vec![Expr::Value("5".into())]);
        let row = storage
            .query_row(&Select {
                table: "accounts".into(),
                columns: vec!["balance".into(), "rb_id".into()],
                selector: Selector::new().and("id", "1"),
            })
            .unwrap()
            .unwrap();
        assert_eq!(row.len(), 2);
        assert_eq!(row["rb_id"], SqlValue::Null);
    }

    #[test]
    fn unknown_tables_and_columns_are_errors() {
        let storage = accounts();
        let select = Select {
            table: "missing".into(),
            columns: vec![],
            selector: Selector::new(),
        };
        assert!(matches!(
            storage.query_row(&select),
            Err(StorageError::UnknownTable(_))
        ));

        let select = Select {
            table: "accounts".into(),
            columns: vec!["nope".into()],
            selector: Selector::new(),
        };
        assert!(matches!(
            storage.query_row(&select),
            Err(StorageError::UnknownColumn { .. })
        ));
    }
}
