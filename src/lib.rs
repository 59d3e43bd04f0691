//! Ledger contract engine.
//!
//! Provides the contract virtual machine and the audited state-mutation
//! engine it writes through.

pub mod config;
pub mod ledger;
pub mod storage;
pub mod types;
pub mod utils;
pub mod virtual_machine;
