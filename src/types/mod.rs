//! Core type definitions shared by the VM and the ledger writer.
//!
//! - `Hash`: Fixed-size 32-byte SHA3-256 hashes

pub mod hash;
