use crate::storage::storage_trait::StorageError;
use ledger_derive::Error;

/// Errors raised by the ledger writer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    /// A journalled write was attempted outside of a block.
    #[error("It is impossible to write to DB when Block is undefined")]
    BlockUndefined,
    /// A byte-array value for a custom table exceeds the hash size.
    #[error("hash value cannot be larger than {limit} bytes ({column} has {actual})")]
    HashTooLong {
        column: String,
        limit: usize,
        actual: usize,
    },
    #[error("empty field name")]
    EmptyField,
    #[error("{fields} fields but {values} values")]
    FieldCount { fields: usize, values: usize },
    #[error("{fields} selector fields but {values} selector values")]
    SelectorCount { fields: usize, values: usize },
    #[error("cannot encode rollback snapshot: {0}")]
    Snapshot(String),
    #[error("{0}")]
    Storage(#[from] StorageError),
}
