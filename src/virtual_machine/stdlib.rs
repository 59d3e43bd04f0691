//! Natives every VM starts with.
//!
//! `ExecContract` and `CallContract` let contract code run other contracts;
//! `db_insert` and `db_update` write ledger rows through the environment's
//! session. The rest are string and hashing helpers.

use crate::ledger::writer::RowChange;
use crate::types::hash::Hash;
use crate::virtual_machine::errors::VMError;
use crate::virtual_machine::executor;
use crate::virtual_machine::native::{NativeFunction, Variadic};
use crate::virtual_machine::runtime::RunTime;
use crate::virtual_machine::value::{Value, mismatch};
use std::cmp::Ordering;
use std::collections::BTreeMap;

/// Primary key used by `db_update`.
pub const ID_COLUMN: &str = "id";

pub fn natives() -> Vec<NativeFunction> {
    vec![
        NativeFunction::new("ExecContract", exec_contract),
        NativeFunction::new("CallContract", call_contract),
        NativeFunction::new("len", len),
        NativeFunction::new("slice", slice),
        NativeFunction::new("concat", concat),
        NativeFunction::new("compare", compare),
        NativeFunction::new("hash", hash),
        NativeFunction::new("db_insert", db_insert),
        NativeFunction::new("db_update", db_update),
    ]
}

fn exec_contract(rt: &mut RunTime<'_>, name: String, names: String, params: Variadic<Value>) -> Result<(), VMError> {
    executor::exec_contract(rt, &name, &names, params.0)
}

fn call_contract(rt: &mut RunTime<'_>, name: String, params: BTreeMap<String, Value>) -> Result<(), VMError> {
    executor::call_contract(rt, &name, &params)
}

fn len(value: Value) -> Result<i64, VMError> {
    let len = match &value {
        Value::Str(s) => s.chars().count(),
        Value::Bytes(b) => b.len(),
        Value::Map(m) => m.len(),
        other => return Err(mismatch("str", other)),
    };
    Ok(len as i64)
}

/// Characters `start..end` of `s`, with both bounds clamped.
fn slice(s: String, start: i64, end: i64) -> String {
    let chars: Vec<char> = s.chars().collect();
    let end = usize::try_from(end).unwrap_or(0).min(chars.len());
    let start = usize::try_from(start).unwrap_or(0).min(end);
    chars[start..end].iter().collect()
}

fn concat(parts: Variadic<Value>) -> String {
    parts.0.iter().map(Value::to_text).collect()
}

fn compare(a: String, b: String) -> i64 {
    match a.cmp(&b) {
        Ordering::Less => -1,
        Ordering::Equal => 0,
        Ordering::Greater => 1,
    }
}

/// SHA3-256 of a value's bytes.
fn hash(value: Value) -> Vec<u8> {
    let bytes = match &value {
        Value::Nil => Vec::new(),
        Value::Bool(b) => vec![*b as u8],
        Value::Int(i) => i.to_le_bytes().to_vec(),
        Value::Str(s) => s.as_bytes().to_vec(),
        Value::Bytes(b) => b.clone(),
        Value::Map(_) => value.to_text().into_bytes(),
    };
    Hash::sha3().chain(&bytes).finalize().as_slice().to_vec()
}

fn write(rt: &RunTime<'_>, change: RowChange) -> Result<String, VMError> {
    let session = rt.extend.session.as_ref().ok_or(VMError::NoSession)?;
    Ok(session.apply(&change.general_rollback())?)
}

fn row_change(table: String, values: BTreeMap<String, Value>) -> RowChange {
    values
        .into_iter()
        .fold(RowChange::new(table), |change, (field, value)| change.set(field, value.to_sql()))
}

/// Inserts a row into `table` and returns its key.
fn db_insert(rt: &mut RunTime<'_>, table: String, values: BTreeMap<String, Value>) -> Result<String, VMError> {
    write(rt, row_change(table, values))
}

/// Updates row `id` of `table`, inserting it when missing.
fn db_update(
    rt: &mut RunTime<'_>,
    table: String,
    id: i64,
    values: BTreeMap<String, Value>,
) -> Result<String, VMError> {
    write(rt, row_change(table, values).filter(ID_COLUMN, id.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn string_helpers() {
        assert_eq!(len(Value::Str("héllo".into())), Ok(5));
        assert!(len(Value::Int(1)).is_err());
        assert_eq!(slice("hello".into(), 1, 3), "el");
        assert_eq!(slice("hello".into(), 4, 99), "o");
        assert_eq!(slice("hello".into(), 3, 1), "");
        assert_eq!(slice("hello".into(), -2, 2), "he");
        assert_eq!(concat(Variadic(vec!["a".into(), Value::Int(1)])), "a1");
        assert_eq!(compare("a".into(), "b".into()), -1);
        assert_eq!(compare("b".into(), "b".into()), 0);
    }

    #[test]
    fn hash_is_sha3_of_bytes() {
        let h = hash(Value::Str("abc".into()));
        assert_eq!(h.len(), 32);
        assert_eq!(h, Hash::digest(b"abc").as_slice().to_vec());
        assert_eq!(hash(Value::Bytes(b"abc".to_vec())), h);
    }
}
