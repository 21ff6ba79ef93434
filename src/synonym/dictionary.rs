//! Immutable compiled synonym dictionary.
//!
//! Uses an FST (Finite State Transducer) for memory-efficient term lookup.
//! A dictionary is never mutated after it is built; a reload builds a full
//! replacement and swaps the reference.

use std::collections::BTreeMap;
use std::fmt;
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use fst::Map;

use crate::error::{Result, SynonymError};

/// Cheap change-detection token of a source.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub enum Fingerprint {
    /// Built from rules that came from nowhere in particular.
    #[default]
    None,
    /// Modification time and length of a local file.
    File {
        modified: Option<SystemTime>,
        len: u64,
    },
    /// HTTP validators of a remote resource.
    Http {
        last_modified: Option<String>,
        etag: Option<String>,
    },
    /// CRC32 of the body, for endpoints that send no validators.
    Content(u32),
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Fingerprint::None => write!(f, "none"),
            Fingerprint::File { modified, len } => {
                let modified = modified
                    .map(|t| DateTime::<Utc>::from(t).to_rfc3339())
                    .unwrap_or_else(|| "unknown".to_string());
                write!(f, "file(modified={modified}, len={len})")
            }
            Fingerprint::Http {
                last_modified,
                etag,
            } => write!(
                f,
                "http(last-modified={}, etag={})",
                last_modified.as_deref().unwrap_or("-"),
                etag.as_deref().unwrap_or("-")
            ),
            Fingerprint::Content(digest) => write!(f, "content({digest:08x})"),
        }
    }
}

/// Compiled synonym mapping: input term or phrase -> output terms.
///
/// Multi-word entries are keyed by their words joined with a single space.
#[derive(Clone)]
pub struct SynonymDictionary {
    /// FST map: term -> index into `outputs`
    fst_map: Map<Vec<u8>>,
    /// Output lists indexed by FST values
    outputs: Vec<Vec<String>>,
    /// Longest input phrase, in words
    max_phrase_length: usize,
    fingerprint: Fingerprint,
}

impl SynonymDictionary {
    /// Create an empty dictionary.
    pub fn empty() -> Self {
        Self::from_mappings(BTreeMap::new())
            .unwrap_or_else(|_| unreachable!("an empty FST always builds"))
    }

    /// Build a dictionary from sorted input -> outputs mappings.
    pub fn from_mappings(mappings: BTreeMap<String, Vec<String>>) -> Result<Self> {
        let mut outputs = Vec::with_capacity(mappings.len());
        let mut max_phrase_length = 1;

        let mut builder = fst::MapBuilder::memory();
        for (input, targets) in mappings {
            max_phrase_length = max_phrase_length.max(input.split(' ').count());
            builder
                .insert(input.as_bytes(), outputs.len() as u64)
                .map_err(|e| SynonymError::parse(format!("FST build error: {e}")))?;
            outputs.push(targets);
        }

        let fst_bytes = builder
            .into_inner()
            .map_err(|e| SynonymError::parse(format!("FST finalize error: {e}")))?;
        let fst_map = Map::new(fst_bytes)
            .map_err(|e| SynonymError::parse(format!("FST creation error: {e}")))?;

        Ok(SynonymDictionary {
            fst_map,
            outputs,
            max_phrase_length,
            fingerprint: Fingerprint::None,
        })
    }

    /// Tag the dictionary with the fingerprint of the content it came from.
    ///
    /// Consumes the dictionary, so it can only happen before publication.
    pub fn with_fingerprint(mut self, fingerprint: Fingerprint) -> Self {
        self.fingerprint = fingerprint;
        self
    }

    /// Get the outputs for a term or space-joined phrase.
    pub fn get_synonyms(&self, term: &str) -> Option<&[String]> {
        let index = self.fst_map.get(term.as_bytes())? as usize;
        self.outputs.get(index).map(Vec::as_slice)
    }

    /// Resolve a term to the set of terms it stands for.
    ///
    /// Unmapped terms resolve to themselves.
    pub fn expand(&self, term: &str) -> Vec<String> {
        match self.get_synonyms(term) {
            Some(outputs) => outputs.to_vec(),
            None => vec![term.to_string()],
        }
    }

    /// Number of distinct inputs.
    pub fn len(&self) -> usize {
        self.outputs.len()
    }

    /// Whether the dictionary maps nothing.
    pub fn is_empty(&self) -> bool {
        self.outputs.is_empty()
    }

    /// Longest input phrase, in words.
    pub fn max_phrase_length(&self) -> usize {
        self.max_phrase_length
    }

    /// Fingerprint of the content this dictionary was compiled from.
    pub fn fingerprint(&self) -> &Fingerprint {
        &self.fingerprint
    }
}

impl Default for SynonymDictionary {
    fn default() -> Self {
        Self::empty()
    }
}

impl fmt::Debug for SynonymDictionary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SynonymDictionary")
            .field("entries", &self.outputs.len())
            .field("max_phrase_length", &self.max_phrase_length)
            .field("fingerprint", &self.fingerprint)
            .finish()
    }
}
