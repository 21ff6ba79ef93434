//! Error types for the dynamic synonym library.
//!
//! All errors are represented by the [`SynonymError`] enum. Configuration and
//! initial-build failures surface to whoever constructs a factory; failures
//! during background reloads are logged by the reload monitor and never leave
//! the worker thread.
//!
//! # Examples
//!
//! ```
//! use dynamic_synonym::error::{Result, SynonymError};
//!
//! fn example_operation() -> Result<()> {
//!     Err(SynonymError::config("synonyms_path is required"))
//! }
//!
//! match example_operation() {
//!     Ok(_) => println!("Success"),
//!     Err(e) => eprintln!("Error: {}", e),
//! }
//! ```

use std::io;

use thiserror::Error;

/// The main error type for dynamic synonym operations.
#[derive(Error, Debug)]
pub enum SynonymError {
    /// I/O errors (reading local rule files, spawning threads, etc.)
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Invalid or missing filter / service configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Malformed synonym rules
    #[error("Parse error: {0}")]
    Parse(String),

    /// Remote transport failures, including non-success responses
    #[error("Transport error: {0}")]
    Transport(String),

    /// Analysis-related errors (tokenization, filtering, etc.)
    #[error("Analysis error: {0}")]
    Analysis(String),

    /// Scheduler errors (service shut down, worker failures)
    #[error("Schedule error: {0}")]
    Schedule(String),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic error for other cases
    #[error("Error: {0}")]
    Other(String),
}

/// Result type alias for operations that may fail with SynonymError.
pub type Result<T> = std::result::Result<T, SynonymError>;

impl SynonymError {
    /// Create a new configuration error.
    pub fn config<S: Into<String>>(msg: S) -> Self {
        SynonymError::Config(msg.into())
    }

    /// Create a new parse error.
    pub fn parse<S: Into<String>>(msg: S) -> Self {
        SynonymError::Parse(msg.into())
    }

    /// Create a new transport error.
    pub fn transport<S: Into<String>>(msg: S) -> Self {
        SynonymError::Transport(msg.into())
    }

    /// Create a new analysis error.
    pub fn analysis<S: Into<String>>(msg: S) -> Self {
        SynonymError::Analysis(msg.into())
    }

    /// Create a new schedule error.
    pub fn schedule<S: Into<String>>(msg: S) -> Self {
        SynonymError::Schedule(msg.into())
    }

    /// Create a new generic error.
    pub fn other<S: Into<String>>(msg: S) -> Self {
        SynonymError::Other(msg.into())
    }

    /// Create a new not found error.
    pub fn not_found<S: Into<String>>(msg: S) -> Self {
        SynonymError::Transport(format!("Not found: {}", msg.into()))
    }

    /// Whether this error came from bad configuration rather than a bad source.
    pub fn is_config(&self) -> bool {
        matches!(self, SynonymError::Config(_))
    }
}
