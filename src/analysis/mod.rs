//! Text analysis chain used by dynamic synonym consumers.
//!
//! A minimal slice of the analysis pipeline: tokens, tokenizers, token
//! filters and analyzers. The dynamic synonym filter plugs into this chain as
//! an ordinary [`token_filter::Filter`].

pub mod analyzer;
pub mod token;
pub mod token_filter;
pub mod tokenizer;

pub use analyzer::*;
pub use token::*;
pub use token_filter::*;
pub use tokenizer::*;
