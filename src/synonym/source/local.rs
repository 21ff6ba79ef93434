//! Synonym rules read from a local file.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::{Result, SynonymError};
use crate::synonym::config::{CompileOptions, SourceKind};
use crate::synonym::dictionary::{Fingerprint, SynonymDictionary};
use crate::synonym::rules::DictionaryBuilder;

use super::SourceHandle;

/// A rule file on the local filesystem.
///
/// Change detection is a single metadata call comparing modification time
/// and length; content is only read when compiling.
pub struct LocalSource {
    location: String,
    path: PathBuf,
    options: CompileOptions,
    builder: Arc<dyn DictionaryBuilder>,
}

impl LocalSource {
    /// Create a source for an already normalized path.
    pub fn new(
        location: String,
        options: CompileOptions,
        builder: Arc<dyn DictionaryBuilder>,
    ) -> Self {
        LocalSource {
            path: PathBuf::from(&location),
            location,
            options,
            builder,
        }
    }

    /// The file this source reads.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn current_fingerprint(&self) -> Result<Fingerprint> {
        let metadata = fs::metadata(&self.path).map_err(|e| {
            SynonymError::Io(std::io::Error::new(
                e.kind(),
                format!("failed to stat synonym file '{}': {e}", self.location),
            ))
        })?;
        Ok(Fingerprint::File {
            modified: metadata.modified().ok(),
            len: metadata.len(),
        })
    }
}

impl SourceHandle for LocalSource {
    fn location(&self) -> &str {
        &self.location
    }

    fn kind(&self) -> SourceKind {
        SourceKind::Local
    }

    fn options(&self) -> &CompileOptions {
        &self.options
    }

    fn has_changed(&self, last: Option<&Fingerprint>) -> Result<bool> {
        let current = self.current_fingerprint()?;
        Ok(last != Some(&current))
    }

    fn fetch_and_compile(&self) -> Result<SynonymDictionary> {
        // Stat before reading: a write racing the read shows up as a change
        // on the next tick instead of being missed.
        let fingerprint = self.current_fingerprint()?;
        let content = fs::read_to_string(&self.path).map_err(|e| {
            SynonymError::Io(std::io::Error::new(
                e.kind(),
                format!("failed to read synonym file '{}': {e}", self.location),
            ))
        })?;

        let dictionary = self.builder.compile(&content, &self.options)?;
        Ok(dictionary.with_fingerprint(fingerprint))
    }
}

impl fmt::Debug for LocalSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalSource")
            .field("location", &self.location)
            .field("options", &self.options)
            .finish()
    }
}
