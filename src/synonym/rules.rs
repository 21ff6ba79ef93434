//! Compiling raw rule text into a [`SynonymDictionary`].
//!
//! The reload machinery only depends on the [`DictionaryBuilder`] trait; the
//! shipped [`RuleDictionaryBuilder`] understands two dialects.
//!
//! Solr rules, one per line:
//!
//! ```text
//! # comments and blank lines are ignored
//! # mutual synonyms
//! couch, sofa, divan
//! # explicit mapping
//! i-pod, i pod => ipod
//! # backslash escapes a delimiter
//! foo\,bar => foobar
//! ```
//!
//! WordNet prolog facts; consecutive lines sharing a synset id form a group:
//!
//! ```text
//! s(100000001,1,'abstain',v,1,0).
//! s(100000001,2,'refrain',v,1,0).
//! ```

use std::collections::BTreeMap;
use std::sync::{Arc, LazyLock};

use log::warn;
use regex::Regex;

use crate::analysis::analyzer::Analyzer;
use crate::error::{Result, SynonymError};
use crate::synonym::config::{CompileOptions, SynonymFormat};
use crate::synonym::dictionary::SynonymDictionary;

/// One WordNet `s(synset_id,w_num,'word',ss_type,sense_number,tag_count).` fact.
static WORDNET_FACT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^s\((\d+),\d+,'((?:[^']|'')*)',\w,\d+,\d+\)\.$")
        .expect("wordnet fact pattern is valid")
});

/// Compiles raw rule text into an immutable dictionary.
pub trait DictionaryBuilder: Send + Sync {
    /// Compile `raw` with the given options.
    fn compile(&self, raw: &str, options: &CompileOptions) -> Result<SynonymDictionary>;
}

/// Default builder for the `solr` and `wordnet` dialects.
///
/// When an analyzer is attached, every rule term is analyzed and its token
/// texts are joined with a single space, so rules match what the analysis
/// chain produces (e.g. lowercased terms).
#[derive(Clone, Default)]
pub struct RuleDictionaryBuilder {
    analyzer: Option<Arc<dyn Analyzer>>,
}

impl RuleDictionaryBuilder {
    /// Create a builder that uses rule terms verbatim (whitespace collapsed).
    pub fn new() -> Self {
        RuleDictionaryBuilder { analyzer: None }
    }

    /// Create a builder that runs rule terms through `analyzer`.
    pub fn with_analyzer(analyzer: Arc<dyn Analyzer>) -> Self {
        RuleDictionaryBuilder {
            analyzer: Some(analyzer),
        }
    }

    fn analyze_term(&self, term: &str) -> Result<String> {
        let words: Vec<String> = match &self.analyzer {
            Some(analyzer) => analyzer
                .analyze(term)?
                .filter(|t| !t.is_stopped())
                .map(|t| t.text)
                .collect(),
            None => term.split_whitespace().map(str::to_string).collect(),
        };

        if words.is_empty() {
            return Err(SynonymError::parse(format!(
                "term '{term}' was completely eliminated by analysis"
            )));
        }
        Ok(words.join(" "))
    }

    fn analyze_terms(&self, terms: &[String]) -> Result<Vec<String>> {
        terms.iter().map(|t| self.analyze_term(t)).collect()
    }

    fn parse_solr(&self, raw: &str, options: &CompileOptions, rules: &mut RuleSet) -> Result<()> {
        for (idx, line) in raw.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let result = self.parse_solr_line(line, options.expand, rules);
            handle_line_result(result, idx + 1, line, options.lenient)?;
        }
        Ok(())
    }

    fn parse_solr_line(&self, line: &str, expand: bool, rules: &mut RuleSet) -> Result<()> {
        let sides = split_escaped(line, "=>", false);
        match sides.as_slice() {
            [group] => {
                let terms = self.analyze_terms(&split_terms(group))?;
                rules.add_group(&terms, expand);
                Ok(())
            }
            [left, right] => {
                let inputs = self.analyze_terms(&split_terms(left))?;
                let outputs = self.analyze_terms(&split_terms(right))?;
                if inputs.is_empty() || outputs.is_empty() {
                    return Err(SynonymError::parse("mapping with an empty side"));
                }
                for input in &inputs {
                    rules.add_mapping(input, &outputs);
                }
                Ok(())
            }
            _ => Err(SynonymError::parse("more than one explicit mapping specified")),
        }
    }

    fn parse_wordnet(
        &self,
        raw: &str,
        options: &CompileOptions,
        rules: &mut RuleSet,
    ) -> Result<()> {
        let mut current_synset: Option<String> = None;
        let mut group: Vec<String> = Vec::new();

        for (idx, line) in raw.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            let parsed = WORDNET_FACT
                .captures(line)
                .ok_or_else(|| SynonymError::parse("not a wordnet s(...) fact"))
                .and_then(|caps| {
                    let word = caps[2].replace("''", "'");
                    Ok((caps[1].to_string(), self.analyze_term(&word)?))
                });

            let Some((synset, word)) = handle_line_result(parsed, idx + 1, line, options.lenient)?
            else {
                continue;
            };

            if current_synset.as_deref() != Some(synset.as_str()) {
                rules.add_group(&group, options.expand);
                group.clear();
                current_synset = Some(synset);
            }
            group.push(word);
        }
        rules.add_group(&group, options.expand);
        Ok(())
    }
}

impl DictionaryBuilder for RuleDictionaryBuilder {
    fn compile(&self, raw: &str, options: &CompileOptions) -> Result<SynonymDictionary> {
        let mut rules = RuleSet::default();
        match options.format {
            SynonymFormat::Solr => self.parse_solr(raw, options, &mut rules)?,
            SynonymFormat::Wordnet => self.parse_wordnet(raw, options, &mut rules)?,
        }
        SynonymDictionary::from_mappings(rules.mappings)
    }
}

impl std::fmt::Debug for RuleDictionaryBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuleDictionaryBuilder")
            .field("analyzer", &self.analyzer.as_ref().map(|a| a.name()))
            .finish()
    }
}

/// Accumulated input -> outputs mappings; later rules merge into earlier ones.
#[derive(Default)]
struct RuleSet {
    mappings: BTreeMap<String, Vec<String>>,
}

impl RuleSet {
    fn add_mapping(&mut self, input: &str, outputs: &[String]) {
        let entry = self.mappings.entry(input.to_string()).or_default();
        for output in outputs {
            if !entry.contains(output) {
                entry.push(output.clone());
            }
        }
    }

    fn add_group(&mut self, terms: &[String], expand: bool) {
        if terms.len() < 2 {
            return;
        }
        if expand {
            for term in terms {
                self.add_mapping(term, terms);
            }
        } else {
            let first = std::slice::from_ref(&terms[0]);
            for term in terms {
                self.add_mapping(term, first);
            }
        }
    }
}

/// Apply the lenient policy to a per-line result.
fn handle_line_result<T>(
    result: Result<T>,
    line_no: usize,
    line: &str,
    lenient: bool,
) -> Result<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(e) if lenient => {
            warn!("skipping synonym rule at line {line_no} ({line}): {e}");
            Ok(None)
        }
        Err(e) => Err(SynonymError::parse(format!(
            "invalid synonym rule at line {line_no}: {e}"
        ))),
    }
}

fn split_terms(group: &str) -> Vec<String> {
    split_escaped(group, ",", true)
        .into_iter()
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .collect()
}

/// Split on unescaped occurrences of `delim`.
///
/// With `unescape`, backslash escapes are resolved in the pieces; otherwise
/// they are kept so a later split can still honor them.
fn split_escaped(s: &str, delim: &str, unescape: bool) -> Vec<String> {
    let mut pieces = Vec::new();
    let mut current = String::new();
    let mut rest = s;

    while let Some(ch) = rest.chars().next() {
        if ch == '\\' {
            let mut chars = rest.chars();
            chars.next();
            match chars.next() {
                Some(escaped) => {
                    if !unescape {
                        current.push('\\');
                    }
                    current.push(escaped);
                    rest = &rest[1 + escaped.len_utf8()..];
                }
                None => {
                    current.push('\\');
                    rest = "";
                }
            }
        } else if rest.starts_with(delim) {
            pieces.push(std::mem::take(&mut current));
            rest = &rest[delim.len()..];
        } else {
            current.push(ch);
            rest = &rest[ch.len_utf8()..];
        }
    }
    pieces.push(current);
    pieces
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::analyzer::PipelineAnalyzer;
    use crate::analysis::token_filter::LowercaseFilter;
    use crate::analysis::tokenizer::WhitespaceTokenizer;

    fn solr(expand: bool, lenient: bool) -> CompileOptions {
        CompileOptions {
            format: SynonymFormat::Solr,
            expand,
            lenient,
        }
    }

    fn sorted(mut v: Vec<String>) -> Vec<String> {
        v.sort();
        v
    }

    #[test]
    fn test_mutual_synonyms_expand() {
        let dict = RuleDictionaryBuilder::new()
            .compile("# fruits\n\na, b, c\n", &solr(true, false))
            .unwrap();

        assert_eq!(sorted(dict.expand("a")), vec!["a", "b", "c"]);
        assert_eq!(sorted(dict.expand("c")), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_mutual_synonyms_without_expand_map_to_first() {
        let dict = RuleDictionaryBuilder::new()
            .compile("a,b,c", &solr(false, false))
            .unwrap();

        assert_eq!(dict.expand("b"), vec!["a"]);
        assert_eq!(dict.expand("c"), vec!["a"]);
        assert_eq!(dict.expand("a"), vec!["a"]);
    }

    #[test]
    fn test_explicit_mapping() {
        let dict = RuleDictionaryBuilder::new()
            .compile("i-pod, i pod => ipod\nsea biscit => seabiscuit", &solr(true, false))
            .unwrap();

        assert_eq!(dict.expand("i-pod"), vec!["ipod"]);
        assert_eq!(dict.expand("i pod"), vec!["ipod"]);
        assert_eq!(dict.max_phrase_length(), 2);
        // Right-hand terms are not mapped back.
        assert_eq!(dict.expand("ipod"), vec!["ipod"]);
    }

    #[test]
    fn test_comment_lines_between_rules() {
        let raw = "# comments and blank lines are ignored\n\
                   # mutual synonyms\n\
                   couch, sofa, divan\n\
                   # explicit mapping\n\
                   i-pod, i pod => ipod\n\
                   # backslash escapes a delimiter\n\
                   foo\\,bar => foobar\n";

        let dict = RuleDictionaryBuilder::new().compile(raw, &solr(true, false)).unwrap();

        assert_eq!(sorted(dict.expand("divan")), vec!["couch", "divan", "sofa"]);
        assert_eq!(dict.expand("i pod"), vec!["ipod"]);
        assert_eq!(dict.expand("foo,bar"), vec!["foobar"]);
        assert!(dict.get_synonyms("# mutual synonyms").is_none());
    }

    #[test]
    fn test_rules_merge_across_lines() {
        let dict = RuleDictionaryBuilder::new()
            .compile("a => b\na => c", &solr(true, false))
            .unwrap();
        assert_eq!(dict.expand("a"), vec!["b", "c"]);
    }

    #[test]
    fn test_escaped_delimiters() {
        let dict = RuleDictionaryBuilder::new()
            .compile(r"foo\,bar => foobar", &solr(true, false))
            .unwrap();
        assert_eq!(dict.expand("foo,bar"), vec!["foobar"]);

        let dict = RuleDictionaryBuilder::new()
            .compile(r"a\=>b, c", &solr(true, false))
            .unwrap();
        assert_eq!(sorted(dict.expand("c")), vec!["a=>b", "c"]);
    }

    #[test]
    fn test_malformed_line_strict_and_lenient() {
        let raw = "a,b\nx => y => z\nc,d";

        let err = RuleDictionaryBuilder::new()
            .compile(raw, &solr(true, false))
            .unwrap_err();
        assert!(err.to_string().contains("line 2"));

        let dict = RuleDictionaryBuilder::new()
            .compile(raw, &solr(true, true))
            .unwrap();
        assert!(dict.get_synonyms("a").is_some());
        assert!(dict.get_synonyms("c").is_some());
        assert!(dict.get_synonyms("x").is_none());
    }

    #[test]
    fn test_empty_mapping_side_is_error() {
        assert!(RuleDictionaryBuilder::new()
            .compile("a => ", &solr(true, false))
            .is_err());
    }

    #[test]
    fn test_rule_terms_are_analyzed() {
        let analyzer = PipelineAnalyzer::new(Arc::new(WhitespaceTokenizer::new()))
            .add_filter(Arc::new(LowercaseFilter::new()));
        let builder = RuleDictionaryBuilder::with_analyzer(Arc::new(analyzer));

        let dict = builder.compile("TV, Television Set", &solr(true, false)).unwrap();

        assert!(dict.get_synonyms("tv").is_some());
        assert!(dict.get_synonyms("television set").is_some());
        assert!(dict.get_synonyms("TV").is_none());
    }

    #[test]
    fn test_wordnet_groups() {
        let raw = "s(100000001,1,'abstain',v,1,0).\n\
                   s(100000001,2,'refrain',v,1,0).\n\
                   s(100000002,1,'o''clock',n,1,0).\n\
                   s(100000002,2,'hour',n,1,0).\n";
        let options = CompileOptions {
            format: SynonymFormat::Wordnet,
            expand: true,
            lenient: false,
        };

        let dict = RuleDictionaryBuilder::new().compile(raw, &options).unwrap();

        assert_eq!(sorted(dict.expand("abstain")), vec!["abstain", "refrain"]);
        assert_eq!(sorted(dict.expand("hour")), vec!["hour", "o'clock"]);
        assert_eq!(dict.expand("refrain").len(), 2);

        let again = RuleDictionaryBuilder::new().compile(raw, &options).unwrap();
        assert_eq!(again.len(), dict.len());
    }

    #[test]
    fn test_wordnet_malformed_line() {
        let options = CompileOptions {
            format: SynonymFormat::Wordnet,
            expand: true,
            lenient: false,
        };
        assert!(RuleDictionaryBuilder::new()
            .compile("a,b,c", &options)
            .is_err());
    }

    #[test]
    fn test_split_escaped_keeps_escapes_when_asked() {
        assert_eq!(split_escaped(r"a\,b,c", ",", true), vec!["a,b", "c"]);
        assert_eq!(split_escaped(r"a\,b=>c", "=>", false), vec![r"a\,b", "c"]);
    }
}
