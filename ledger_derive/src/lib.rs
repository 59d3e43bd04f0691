//! Derive macros for the ledger crate.
//!
//! Provides `#[derive(Error)]`: `Display`, `std::error::Error` and, for
//! fields marked `#[from]`, the matching `From` conversion.

mod error;

use proc_macro::TokenStream;

/// Implements `Display`, `Error` and `From` (for `#[from]` fields) on error enums and structs.
#[proc_macro_derive(Error, attributes(error, from, source))]
pub fn derive_error(input: TokenStream) -> TokenStream {
    error::derive_error(input)
}
