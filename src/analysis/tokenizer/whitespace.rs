//! Whitespace tokenizer implementation.

use super::Tokenizer;

use crate::analysis::token::{Token, TokenStream, TokenType};
use crate::error::Result;

/// A tokenizer that splits text on whitespace.
#[derive(Clone, Debug, Default)]
pub struct WhitespaceTokenizer;

impl WhitespaceTokenizer {
    /// Create a new whitespace tokenizer.
    pub fn new() -> Self {
        WhitespaceTokenizer
    }

    /// Detect token type based on the content of the word.
    fn detect_token_type(word: &str) -> TokenType {
        if !word.is_empty() && word.chars().all(|c| c.is_ascii_digit()) {
            TokenType::Num
        } else if word.chars().any(|c| c.is_alphanumeric()) {
            TokenType::Alphanum
        } else {
            TokenType::Other
        }
    }
}

impl Tokenizer for WhitespaceTokenizer {
    fn tokenize(&self, text: &str) -> Result<TokenStream> {
        let mut tokens = Vec::new();
        let mut word_start: Option<usize> = None;

        // Track byte offsets directly so repeated words get their own offsets.
        for (idx, ch) in text.char_indices().chain(std::iter::once((text.len(), ' '))) {
            match (word_start, ch.is_whitespace()) {
                (Some(start), true) => {
                    let word = &text[start..idx];
                    let position = tokens.len();
                    tokens.push(
                        Token::with_offsets(word, position, start, idx)
                            .with_token_type(Self::detect_token_type(word)),
                    );
                    word_start = None;
                }
                (None, false) => word_start = Some(idx),
                _ => {}
            }
        }

        Ok(Box::new(tokens.into_iter()))
    }

    fn name(&self) -> &'static str {
        "whitespace"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_whitespace_tokenizer() {
        let tokenizer = WhitespaceTokenizer::new();
        let tokens: Vec<Token> = tokenizer.tokenize("hello  world\ttest").unwrap().collect();

        assert_eq!(tokens.len(), 3);
        assert_eq!(tokens[0].text, "hello");
        assert_eq!(tokens[1].text, "world");
        assert_eq!(tokens[2].text, "test");
        assert_eq!(tokens[2].position, 2);
    }

    #[test]
    fn test_repeated_words_keep_offsets() {
        let tokenizer = WhitespaceTokenizer::new();
        let tokens: Vec<Token> = tokenizer.tokenize("a b a").unwrap().collect();

        assert_eq!(tokens[0].start_offset, 0);
        assert_eq!(tokens[2].start_offset, 4);
        assert_eq!(tokens[2].end_offset, 5);
    }

    #[test]
    fn test_tokenizer_name() {
        assert_eq!(WhitespaceTokenizer::new().name(), "whitespace");
    }
}
