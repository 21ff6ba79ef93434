//! Synonym sources: where rule text lives and how its changes are detected.
//!
//! Two variants, selected by location syntax: [`LocalSource`] for files and
//! [`RemoteSource`] for `http(s)://` endpoints. Both answer "has the content
//! changed since this fingerprint" cheaply and compile the current content on
//! demand. Neither retries; errors go back to the caller.

use std::fmt;
use std::sync::Arc;

use crate::error::Result;
use crate::synonym::config::{CompileOptions, SourceDescriptor, SourceKind};
use crate::synonym::dictionary::{Fingerprint, SynonymDictionary};
use crate::synonym::rules::DictionaryBuilder;

pub mod local;
pub mod remote;

pub use local::LocalSource;
pub use remote::{HttpTransport, RemoteResponse, RemoteSource, Transport};

/// Capability set shared by every synonym source.
pub trait SourceHandle: Send + Sync + fmt::Debug {
    /// Normalized location of this source.
    fn location(&self) -> &str;

    /// Local file or remote endpoint.
    fn kind(&self) -> SourceKind;

    /// Options the source compiles with.
    fn options(&self) -> &CompileOptions;

    /// Whether the content differs from the one `last` was taken from.
    ///
    /// `None` means nothing has been compiled yet, which always counts as a
    /// change.
    fn has_changed(&self, last: Option<&Fingerprint>) -> Result<bool>;

    /// Read the current content and compile it, tagging the result with the
    /// fingerprint of what was read.
    fn fetch_and_compile(&self) -> Result<SynonymDictionary>;
}

/// Open the source variant matching the descriptor's location.
pub fn open_source(
    descriptor: &SourceDescriptor,
    builder: Arc<dyn DictionaryBuilder>,
    transport: Arc<dyn Transport>,
) -> Arc<dyn SourceHandle> {
    match descriptor.kind {
        SourceKind::Local => Arc::new(LocalSource::new(
            descriptor.location.clone(),
            descriptor.options,
            builder,
        )),
        SourceKind::Remote => Arc::new(RemoteSource::new(
            descriptor.location.clone(),
            descriptor.options,
            builder,
            transport,
        )),
    }
}
