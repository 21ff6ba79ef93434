//! Synonym token filter fed by a hot-reloaded dictionary.
//!
//! Each [`DynamicSynonymFilter`] is a subscriber of the factory that created
//! it. It owns a swap cell holding the dictionary it currently applies; the
//! factory pushes every new dictionary into that cell. Token processing only
//! ever reads the already published reference and never triggers a fetch.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use arc_swap::ArcSwap;

use crate::analysis::token::{Token, TokenStream, TokenType};
use crate::analysis::token_filter::Filter;
use crate::error::Result;
use crate::synonym::dictionary::SynonymDictionary;
use crate::synonym::factory::DynamicSynonymFactory;

/// The swap cell a factory pushes new dictionaries into.
pub(crate) struct FilterCell {
    dictionary: ArcSwap<SynonymDictionary>,
}

impl FilterCell {
    pub(crate) fn new(dictionary: Arc<SynonymDictionary>) -> Self {
        FilterCell {
            dictionary: ArcSwap::new(dictionary),
        }
    }

    pub(crate) fn store(&self, dictionary: Arc<SynonymDictionary>) {
        self.dictionary.store(dictionary);
    }

    /// Replace `expected` with `new` unless something was stored meanwhile.
    pub(crate) fn replace_if_unchanged(
        &self,
        expected: &Arc<SynonymDictionary>,
        new: Arc<SynonymDictionary>,
    ) {
        let _ = self.dictionary.compare_and_swap(expected, new);
    }

    pub(crate) fn load(&self) -> Arc<SynonymDictionary> {
        self.dictionary.load_full()
    }
}

/// Replaces terms and phrases by their synonyms.
///
/// At each position the longest phrase the dictionary knows is matched. The
/// first output takes the matched position; further outputs are stacked on it
/// with a position increment of 0 and a position length equal to the number
/// of tokens matched. Stopped tokens pass through and never join a phrase.
pub struct DynamicSynonymFilter {
    id: u64,
    cell: Arc<FilterCell>,
    factory: Weak<DynamicSynonymFactory>,
    detached: AtomicBool,
}

impl DynamicSynonymFilter {
    pub(crate) fn new(id: u64, cell: Arc<FilterCell>, factory: Weak<DynamicSynonymFactory>) -> Self {
        DynamicSynonymFilter {
            id,
            cell,
            factory,
            detached: AtomicBool::new(false),
        }
    }

    /// A filter over a fixed dictionary, bound to no factory.
    ///
    /// It never receives reloads; useful for one-off analysis.
    pub fn standalone(dictionary: Arc<SynonymDictionary>) -> Self {
        Self::new(0, Arc::new(FilterCell::new(dictionary)), Weak::new())
    }

    /// Subscriber id within the owning factory.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// The dictionary this filter currently applies.
    pub fn dictionary(&self) -> Arc<SynonymDictionary> {
        self.cell.load()
    }

    /// Stop receiving reloads. Also happens on drop; calling it twice is a no-op.
    pub fn detach(&self) {
        if self.detached.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(factory) = self.factory.upgrade() {
            factory.unsubscribe(self.id);
        }
    }

    /// Whether [`detach`](Self::detach) has run.
    pub fn is_detached(&self) -> bool {
        self.detached.load(Ordering::Acquire)
    }
}

/// Emit the synonym tokens for `span`, all non-stopped and adjacent.
fn emit_synonyms(span: &[Token], outputs: &[String], matched: &str, out: &mut Vec<Token>) {
    let (Some(first), Some(last)) = (span.first(), span.last()) else {
        return;
    };

    for (i, output) in outputs.iter().enumerate() {
        let mut token = first.with_text(output.as_str());
        token.end_offset = last.end_offset;
        token.position_length = span.len();
        if i > 0 {
            token.position_increment = 0;
        }
        if output != matched {
            token.token_type = Some(TokenType::Synonym);
        }
        out.push(token);
    }
}

impl Filter for DynamicSynonymFilter {
    fn filter(&self, tokens: TokenStream) -> Result<TokenStream> {
        let dictionary = self.cell.load();
        if dictionary.is_empty() {
            return Ok(tokens);
        }

        let input_tokens: Vec<Token> = tokens.collect();
        let mut output_tokens = Vec::with_capacity(input_tokens.len());
        let mut i = 0;

        while i < input_tokens.len() {
            if input_tokens[i].is_stopped() {
                output_tokens.push(input_tokens[i].clone());
                i += 1;
                continue;
            }

            let available = input_tokens[i..]
                .iter()
                .take(dictionary.max_phrase_length())
                .take_while(|t| !t.is_stopped())
                .count();

            let matched = (1..=available).rev().find_map(|len| {
                let span = &input_tokens[i..i + len];
                let phrase = span
                    .iter()
                    .map(|t| t.text.as_str())
                    .collect::<Vec<_>>()
                    .join(" ");
                dictionary
                    .get_synonyms(&phrase)
                    .map(|outputs| (len, phrase, outputs))
            });

            match matched {
                Some((len, phrase, outputs)) => {
                    emit_synonyms(&input_tokens[i..i + len], outputs, &phrase, &mut output_tokens);
                    i += len;
                }
                None => {
                    output_tokens.push(input_tokens[i].clone());
                    i += 1;
                }
            }
        }

        Ok(Box::new(output_tokens.into_iter()))
    }

    fn name(&self) -> &'static str {
        "dynamic_synonym"
    }
}

impl Drop for DynamicSynonymFilter {
    fn drop(&mut self) {
        self.detach();
    }
}

impl fmt::Debug for DynamicSynonymFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DynamicSynonymFilter")
            .field("id", &self.id)
            .field("dictionary", &*self.cell.load())
            .field("detached", &self.is_detached())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::analysis::token::IntoTokenStream;

    fn standalone(entries: &[(&str, &[&str])]) -> DynamicSynonymFilter {
        let mappings: BTreeMap<String, Vec<String>> = entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.iter().map(|s| s.to_string()).collect()))
            .collect();
        DynamicSynonymFilter::standalone(Arc::new(
            SynonymDictionary::from_mappings(mappings).unwrap(),
        ))
    }

    fn texts(tokens: &[Token]) -> Vec<&str> {
        tokens.iter().map(|t| t.text.as_str()).collect()
    }

    #[test]
    fn test_single_term_expansion() {
        let filter = standalone(&[("big", &["big", "large"])]);
        let tokens = vec![
            Token::new("the", 0),
            Token::new("big", 1),
            Token::new("cat", 2),
        ];

        let result: Vec<Token> = filter.filter(tokens.into_token_stream()).unwrap().collect();

        assert_eq!(texts(&result), vec!["the", "big", "large", "cat"]);
        assert_eq!(result[1].position, 1);
        assert_eq!(result[1].position_increment, 1);
        assert_eq!(result[1].token_type, None);
        assert_eq!(result[2].position, 1);
        assert_eq!(result[2].position_increment, 0);
        assert_eq!(result[2].token_type, Some(TokenType::Synonym));
    }

    #[test]
    fn test_longest_phrase_wins() {
        let filter = standalone(&[
            ("machine", &["device"]),
            ("machine learning", &["ml", "machine learning"]),
        ]);
        let tokens = vec![
            Token::with_offsets("machine", 0, 0, 7),
            Token::with_offsets("learning", 1, 8, 16),
            Token::with_offsets("rocks", 2, 17, 22),
        ];

        let result: Vec<Token> = filter.filter(tokens.into_token_stream()).unwrap().collect();

        assert_eq!(texts(&result), vec!["ml", "machine learning", "rocks"]);
        assert_eq!(result[0].position_length, 2);
        assert_eq!(result[0].start_offset, 0);
        assert_eq!(result[0].end_offset, 16);
        assert_eq!(result[1].position_increment, 0);
        assert_eq!(result[2].position, 2);
    }

    #[test]
    fn test_stopped_tokens_break_phrases() {
        let filter = standalone(&[("a b", &["c"])]);
        let tokens = vec![Token::new("a", 0), Token::new("b", 1).stop()];

        let result: Vec<Token> = filter.filter(tokens.into_token_stream()).unwrap().collect();

        assert_eq!(texts(&result), vec!["a", "b"]);
        assert!(result[1].is_stopped());
    }

    #[test]
    fn test_swapped_dictionary_is_applied() {
        let filter = standalone(&[]);
        let tokens = || vec![Token::new("tv", 0)].into_token_stream();
        assert_eq!(filter.filter(tokens()).unwrap().count(), 1);

        let mut mappings = BTreeMap::new();
        mappings.insert(
            "tv".to_string(),
            vec!["tv".to_string(), "television".to_string()],
        );
        filter
            .cell
            .store(Arc::new(SynonymDictionary::from_mappings(mappings).unwrap()));

        let result: Vec<Token> = filter.filter(tokens()).unwrap().collect();
        assert_eq!(texts(&result), vec!["tv", "television"]);
    }

    #[test]
    fn test_detach_without_factory() {
        let filter = standalone(&[]);
        filter.detach();
        filter.detach();
        assert!(filter.is_detached());
        assert_eq!(filter.name(), "dynamic_synonym");
    }
}
