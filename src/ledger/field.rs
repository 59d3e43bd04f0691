//! Field-name micro-syntax of the write protocol.
//!
//! Callers name fields as `column`, `+column`, `-column` or
//! `timestamp column`. The prefix is resolved once into a [`FieldOp`] and the
//! value encoding rules are applied from it when statements are built.

use crate::ledger::errors::LedgerError;
use crate::storage::statement::{Expr, SqlValue};
use std::collections::BTreeSet;

const TIMESTAMP_PREFIX: &str = "timestamp ";
const NULL_LITERAL: &str = "NULL";

/// What a field does to its column.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FieldOp {
    /// `column`: plain assignment.
    Assign,
    /// `+column`: add the value to the current one.
    Increment,
    /// `-column`: subtract the value from the current one.
    Decrement,
    /// `timestamp column`: the value is unix seconds.
    UnixTimestamp,
}

/// A parsed field name.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FieldSpec {
    pub column: String,
    pub op: FieldOp,
}

impl FieldSpec {
    pub fn parse(raw: &str) -> Result<Self, LedgerError> {
        let field = raw.trim();
        let (op, column) = if let Some(rest) = field.strip_prefix('+') {
            (FieldOp::Increment, rest)
        } else if let Some(rest) = field.strip_prefix('-') {
            (FieldOp::Decrement, rest)
        } else if let Some(rest) = field.strip_prefix(TIMESTAMP_PREFIX) {
            (FieldOp::UnixTimestamp, rest)
        } else {
            (FieldOp::Assign, field)
        };
        let column = column.trim();
        if column.is_empty() {
            return Err(LedgerError::EmptyField);
        }
        Ok(Self {
            column: column.to_string(),
            op,
        })
    }

    /// Prefixed names never address byte-array columns.
    pub fn is_bytea(&self, bytea: &BTreeSet<String>) -> bool {
        self.op == FieldOp::Assign && bytea.contains(&self.column)
    }

    /// Expression assigned to the column by an UPDATE.
    pub fn update_expr(&self, value: &SqlValue, bytea: bool) -> Expr {
        if let Some(expr) = bytes_expr(value, bytea) {
            return expr;
        }
        match self.op {
            FieldOp::Increment => Expr::Add(SqlValue::Text(value.render())),
            FieldOp::Decrement => Expr::Sub(SqlValue::Text(value.render())),
            _ => self.literal_expr(value),
        }
    }

    /// Expression stored in the column by an INSERT.
    ///
    /// There is no current value to adjust, so `+`/`-` fields insert the
    /// supplied value as is.
    pub fn insert_expr(&self, value: &SqlValue, bytea: bool) -> Expr {
        bytes_expr(value, bytea).unwrap_or_else(|| self.literal_expr(value))
    }

    fn literal_expr(&self, value: &SqlValue) -> Expr {
        if value.is_null() {
            return Expr::Value(SqlValue::Null);
        }
        let text = value.render();
        if text == NULL_LITERAL {
            Expr::Value(SqlValue::Null)
        } else if self.op == FieldOp::UnixTimestamp {
            Expr::ToTimestamp(SqlValue::Text(text))
        } else if let Some(literal) = text.strip_prefix(TIMESTAMP_PREFIX) {
            Expr::TimestampLiteral(literal.to_string())
        } else {
            Expr::Value(SqlValue::Text(text))
        }
    }
}

/// Non-empty byte-array values are stored as raw bytes.
fn bytes_expr(value: &SqlValue, bytea: bool) -> Option<Expr> {
    if !bytea {
        return None;
    }
    let bytes = value.raw_bytes();
    (!bytes.is_empty()).then(|| Expr::Value(SqlValue::Bytes(bytes)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(raw: &str) -> FieldSpec {
        FieldSpec::parse(raw).unwrap()
    }

    #[test]
    fn parse_resolves_prefixes() {
        assert_eq!(spec(" +amount ").op, FieldOp::Increment);
        assert_eq!(spec("+amount").column, "amount");
        assert_eq!(spec("-amount").op, FieldOp::Decrement);
        assert_eq!(spec("timestamp created").op, FieldOp::UnixTimestamp);
        assert_eq!(spec("timestamp created").column, "created");
        assert_eq!(spec("name").op, FieldOp::Assign);
        assert_eq!(FieldSpec::parse("+"), Err(LedgerError::EmptyField));
        assert_eq!(FieldSpec::parse("  "), Err(LedgerError::EmptyField));
    }

    #[test]
    fn prefixed_fields_are_never_bytea() {
        let bytea: BTreeSet<String> = ["hash".to_string()].into();
        assert!(spec("hash").is_bytea(&bytea));
        assert!(!spec("+hash").is_bytea(&bytea));
    }

    #[test]
    fn update_expressions_follow_encoding_order() {
        let text = |s: &str| SqlValue::Text(s.into());
        assert_eq!(spec("+b").update_expr(&text("10"), false), Expr::Add(text("10")));
        assert_eq!(spec("-b").update_expr(&text("NULL"), false), Expr::Sub(text("NULL")));
        assert_eq!(spec("b").update_expr(&text("NULL"), false), Expr::Value(SqlValue::Null));
        assert_eq!(
            spec("timestamp t").update_expr(&text("60"), false),
            Expr::ToTimestamp(text("60"))
        );
        assert_eq!(
            spec("t").update_expr(&text("timestamp 2017-01-01 10:00:00"), false),
            Expr::TimestampLiteral("2017-01-01 10:00:00".into())
        );
        assert_eq!(spec("b").update_expr(&text("it's"), false), Expr::Value(text("it's")));
        assert_eq!(
            spec("h").update_expr(&SqlValue::Bytes(vec![1, 2]), true),
            Expr::Value(SqlValue::Bytes(vec![1, 2]))
        );
        assert_eq!(spec("h").update_expr(&text(""), true), Expr::Value(text("")));
    }

    #[test]
    fn insert_treats_increments_as_literals() {
        let value = SqlValue::Text("10".into());
        assert_eq!(spec("+b").insert_expr(&value, false), Expr::Value(value.clone()));
    }
}
