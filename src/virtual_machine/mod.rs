//! Stack-based virtual machine for ledger contracts.
//!
//! Contracts are loaded from assembly into a [`vm::VM`], which owns the
//! program as a tree of blocks. Running a contract binds its transaction
//! parameters into a shared [`extend::Extend`] environment and executes its
//! `init`, `conditions` and `action` functions under a cost budget. Host
//! functions are plain Rust functions registered as natives; the `db_*`
//! natives write through the environment's session into the audited ledger.
//!
//! # Modules
//!
//! - [`assembler`]: text format, diagnostics and loading into a VM
//! - [`errors`]: execution and assembly error types
//! - [`executor`]: contract lifecycle, recursion guard and parent tracking
//! - [`extend`]: the per-invocation environment, session and tracer
//! - [`isa`]: instruction set definition
//! - [`names`]: state-qualified contract names
//! - [`native`]: the Rust function bridge
//! - [`object`]: blocks and the objects they name
//! - [`runtime`]: execution context and interpreter loop
//! - [`stdlib`]: natives every VM starts with
//! - [`value`]: runtime values and their types
//! - [`vm`]: the program arena, registration and dispatch

pub mod assembler;
pub mod errors;
pub mod executor;
pub mod extend;
pub mod isa;
pub mod names;
pub mod native;
pub mod object;
pub mod runtime;
pub mod stdlib;
pub mod value;
pub mod vm;
