//! Token filter implementations for token transformation.
//!
//! The dynamic synonym filter lives in [`crate::synonym::filter`]; this module
//! carries the trait it implements plus the stock filters usually placed in
//! front of it.

use crate::analysis::token::TokenStream;
use crate::error::Result;

/// Trait for filters that transform token streams.
///
/// The trait requires `Send + Sync` so a filter can be shared by analysis
/// threads while a background reload swaps its dictionary.
pub trait Filter: Send + Sync {
    /// Apply this filter to a token stream.
    fn filter(&self, tokens: TokenStream) -> Result<TokenStream>;

    /// Get the name of this filter (for debugging and configuration).
    fn name(&self) -> &'static str;
}

pub mod lowercase;

pub use lowercase::LowercaseFilter;
