//! Case folding in front of the synonym filter.
//!
//! Rule terms and analyzed text must fold the same way for a rule like
//! `TV, Television` to match `tv`; the CLI runs both through this filter.
//!
//! ```
//! use dynamic_synonym::analysis::token::{IntoTokenStream, Token};
//! use dynamic_synonym::analysis::token_filter::{Filter, LowercaseFilter};
//!
//! let folded: Vec<String> = LowercaseFilter::new()
//!     .filter(vec![Token::new("Big", 0), Token::new("CAT", 1)].into_token_stream())
//!     .unwrap()
//!     .map(|t| t.text)
//!     .collect();
//! assert_eq!(folded, ["big", "cat"]);
//! ```

use crate::analysis::token::{Token, TokenStream};
use crate::analysis::token_filter::Filter;
use crate::error::Result;

/// Lowercases token text lazily, leaving stopped tokens alone.
#[derive(Clone, Debug, Default)]
pub struct LowercaseFilter;

impl LowercaseFilter {
    pub fn new() -> Self {
        LowercaseFilter
    }
}

fn fold(mut token: Token) -> Token {
    if !token.is_stopped() && token.text.chars().any(char::is_uppercase) {
        token.text = token.text.to_lowercase();
    }
    token
}

impl Filter for LowercaseFilter {
    fn filter(&self, tokens: TokenStream) -> Result<TokenStream> {
        Ok(Box::new(tokens.map(fold)))
    }

    fn name(&self) -> &'static str {
        "lowercase"
    }
}
