//! Derive macros for the ledger crate.
//!
//! Provides `#[derive(Error)]`, generating `Display` and `std::error::Error`
//! from `#[error("...")]` attributes.

mod error;

use proc_macro::TokenStream;

/// Automatically implements `Display` and `Error` traits for error types.
#[proc_macro_derive(Error, attributes(error, from, source))]
pub fn derive_error(input: TokenStream) -> TokenStream {
    error::derive_error(input)
}
