//! # Dynamic Synonym
//!
//! Hot-reloading synonym dictionaries for live text-analysis chains.
//!
//! ## Features
//!
//! - Local file and HTTP synonym sources with cheap change detection
//! - One poll schedule per source, shared by every filter that names it
//! - Atomic dictionary replacement; readers never see a partial dictionary
//! - Push of every reload to all live filter instances
//! - Periodic retirement of sources no configuration references anymore
//! - Solr and WordNet rule formats

pub mod analysis;
pub mod cli;
pub mod error;
pub mod synonym;

pub mod prelude {
    pub use crate::analysis::{Analyzer, Filter, PipelineAnalyzer, Token, TokenStream, Tokenizer};
    pub use crate::error::{Result, SynonymError};
    pub use crate::synonym::{
        DynamicSynonymFactory, DynamicSynonymFilter, ServiceConfig, SynonymDictionary,
        SynonymFilterConfig, SynonymService,
    };
}

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
