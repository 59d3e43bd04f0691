//! Transactional state-mutation engine.
//!
//! Every write to a ledger row goes through [`StateWriter::apply`]: it
//! snapshots the row's previous values into the `rollback` journal before
//! updating it, or inserts a fresh row, and optionally links the result to
//! the enclosing block and transaction in `rollback_tx`.
//!
//! - [`errors`]: [`LedgerError`]
//! - [`field`]: field-name micro-syntax (`+col`, `-col`, `timestamp col`)
//! - [`journal`]: rollback entries and row snapshots
//! - [`writer`]: the write protocol itself

pub mod errors;
pub mod field;
pub mod journal;
pub mod writer;

pub use errors::LedgerError;
pub use writer::{BlockData, RowChange, StateWriter};
