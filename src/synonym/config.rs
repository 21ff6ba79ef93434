//! Configuration for dynamic synonym filters and the service that runs them.
//!
//! A filter is configured from the host's settings (`synonyms_path`,
//! `format`, `expand`, `lenient`, `interval`, `updateable`) and validated into
//! an immutable [`SourceDescriptor`]. The descriptor's location is normalized
//! so that every factory naming the same source shares one poll schedule.

use std::collections::HashMap;
use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SynonymError};

/// Default poll period for a synonym source, in seconds.
pub const DEFAULT_INTERVAL_SECS: u64 = 60;

/// Default period of the reconciliation sweep, in seconds.
pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 60;

/// Rule-text dialect handed to the dictionary builder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SynonymFormat {
    /// `a,b,c` and `a,b => c` rules, one per line.
    #[default]
    Solr,
    /// Prolog `s(...)` facts from the WordNet database.
    Wordnet,
}

impl FromStr for SynonymFormat {
    type Err = SynonymError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "solr" => Ok(SynonymFormat::Solr),
            "wordnet" => Ok(SynonymFormat::Wordnet),
            other => Err(SynonymError::config(format!(
                "unknown synonym format '{other}', expected 'solr' or 'wordnet'"
            ))),
        }
    }
}

impl fmt::Display for SynonymFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SynonymFormat::Solr => write!(f, "solr"),
            SynonymFormat::Wordnet => write!(f, "wordnet"),
        }
    }
}

/// Where a source lives, decided by the location syntax.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SourceKind {
    /// A file on the local filesystem.
    Local,
    /// An `http://` or `https://` endpoint.
    Remote,
}

impl SourceKind {
    /// Classify a location string.
    pub fn of(location: &str) -> Self {
        let trimmed = location.trim();
        if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
            SourceKind::Remote
        } else {
            SourceKind::Local
        }
    }
}

/// When the compiled filter applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AnalysisMode {
    /// Applies at index time and at query time.
    All,
    /// Applies only at query time, so the index never has to be rebuilt.
    SearchTime,
}

/// Options forwarded to the dictionary builder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CompileOptions {
    /// Rule dialect.
    pub format: SynonymFormat,
    /// Expand mutual synonym groups to every member instead of the first one.
    pub expand: bool,
    /// Skip malformed lines instead of failing the whole compilation.
    pub lenient: bool,
}

/// Settings of one dynamic synonym filter, as the host provides them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SynonymFilterConfig {
    /// File path or URL of the synonym rules.
    #[serde(alias = "location")]
    pub synonyms_path: Option<String>,

    /// Rule dialect; empty means `solr`.
    pub format: String,

    /// Expand mutual synonym groups.
    pub expand: bool,

    /// Tolerate malformed rule lines.
    pub lenient: bool,

    /// Poll period in seconds.
    pub interval: i64,

    /// Apply only at query time.
    pub updateable: bool,
}

impl Default for SynonymFilterConfig {
    fn default() -> Self {
        SynonymFilterConfig {
            synonyms_path: None,
            format: String::new(),
            expand: true,
            lenient: false,
            interval: DEFAULT_INTERVAL_SECS as i64,
            updateable: false,
        }
    }
}

impl SynonymFilterConfig {
    /// Create a config for the given location with every other option defaulted.
    pub fn new<S: Into<String>>(location: S) -> Self {
        SynonymFilterConfig {
            synonyms_path: Some(location.into()),
            ..Default::default()
        }
    }

    /// Set the poll interval in seconds.
    pub fn with_interval(mut self, secs: i64) -> Self {
        self.interval = secs;
        self
    }

    /// Set the expand flag.
    pub fn with_expand(mut self, expand: bool) -> Self {
        self.expand = expand;
        self
    }

    /// Set the lenient flag.
    pub fn with_lenient(mut self, lenient: bool) -> Self {
        self.lenient = lenient;
        self
    }

    /// Set the rule format.
    pub fn with_format<S: Into<String>>(mut self, format: S) -> Self {
        self.format = format.into();
        self
    }

    /// Set the updateable flag.
    pub fn with_updateable(mut self, updateable: bool) -> Self {
        self.updateable = updateable;
        self
    }

    /// Build a config from flat string settings.
    ///
    /// Unknown keys are ignored, so the whole settings block of a filter
    /// (including `type`) can be passed in.
    pub fn from_settings(settings: &HashMap<String, String>) -> Result<Self> {
        let mut config = SynonymFilterConfig::default();

        config.synonyms_path = settings
            .get("synonyms_path")
            .or_else(|| settings.get("location"))
            .cloned();
        if let Some(format) = settings.get("format") {
            config.format = format.clone();
        }
        if let Some(value) = settings.get("expand") {
            config.expand = parse_bool("expand", value)?;
        }
        if let Some(value) = settings.get("lenient") {
            config.lenient = parse_bool("lenient", value)?;
        }
        if let Some(value) = settings.get("updateable") {
            config.updateable = parse_bool("updateable", value)?;
        }
        if let Some(value) = settings.get("interval") {
            config.interval = value.trim().parse().map_err(|_| {
                SynonymError::config(format!("interval must be an integer, got '{value}'"))
            })?;
        }

        Ok(config)
    }

    /// Validate into an immutable descriptor.
    ///
    /// Relative local paths are resolved against `config_dir`.
    pub fn to_descriptor(&self, config_dir: &Path) -> Result<SourceDescriptor> {
        let raw = self
            .synonyms_path
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| {
                SynonymError::config("dynamic synonym requires `synonyms_path` to be configured")
            })?;

        if self.interval <= 0 {
            return Err(SynonymError::config(format!(
                "interval must be a positive number of seconds, got {}",
                self.interval
            )));
        }

        Ok(SourceDescriptor {
            location: normalize_location(raw, config_dir),
            kind: SourceKind::of(raw),
            options: CompileOptions {
                format: self.format.parse()?,
                expand: self.expand,
                lenient: self.lenient,
            },
            interval: Duration::from_secs(self.interval as u64),
            updateable: self.updateable,
        })
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.trim() {
        "true" => Ok(true),
        "false" => Ok(false),
        other => Err(SynonymError::config(format!(
            "{key} must be 'true' or 'false', got '{other}'"
        ))),
    }
}

/// Immutable description of one synonym source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceDescriptor {
    /// Normalized location; the dedup key for poll schedules.
    pub location: String,
    /// Local file or remote endpoint.
    pub kind: SourceKind,
    /// Options forwarded to the dictionary builder.
    pub options: CompileOptions,
    /// Poll period.
    pub interval: Duration,
    /// Whether the filter applies only at query time.
    pub updateable: bool,
}

impl SourceDescriptor {
    /// The analysis mode implied by the updateable flag.
    pub fn analysis_mode(&self) -> AnalysisMode {
        if self.updateable {
            AnalysisMode::SearchTime
        } else {
            AnalysisMode::All
        }
    }
}

/// Normalize a location into its dedup key.
///
/// URLs are kept as given (minus surrounding whitespace). Local paths are
/// made absolute against `config_dir`, itself made absolute against the
/// working directory, and `.`/`..` components are folded lexically without
/// touching the filesystem.
pub fn normalize_location(location: &str, config_dir: &Path) -> String {
    let trimmed = location.trim();
    if SourceKind::of(trimmed) == SourceKind::Remote {
        return trimmed.to_string();
    }

    let path = Path::new(trimmed);
    let joined = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::path::absolute(config_dir)
            .unwrap_or_else(|_| config_dir.to_path_buf())
            .join(path)
    };
    fold_components(&joined).to_string_lossy().into_owned()
}

/// Drop `.` and resolve `..` against the preceding component.
///
/// A `..` with nothing left to remove is kept on relative paths and dropped
/// at the root of absolute ones.
fn fold_components(path: &Path) -> PathBuf {
    let mut folded = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match folded.components().next_back() {
                Some(Component::Normal(_)) => {
                    folded.pop();
                }
                Some(Component::RootDir) | Some(Component::Prefix(_)) => {}
                _ => folded.push(".."),
            },
            other => folded.push(other.as_os_str()),
        }
    }
    folded
}

/// Configuration of the synonym service.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Number of worker threads running reload ticks.
    pub worker_threads: usize,

    /// Period of the reconciliation sweep, in seconds.
    pub sweep_interval_secs: u64,

    /// Directory that relative local synonym paths resolve against.
    pub config_dir: PathBuf,

    /// Timeout for remote requests, in seconds.
    pub http_timeout_secs: u64,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        ServiceConfig {
            worker_threads: 1,
            sweep_interval_secs: DEFAULT_SWEEP_INTERVAL_SECS,
            config_dir: PathBuf::from("."),
            http_timeout_secs: 10,
        }
    }
}

impl ServiceConfig {
    /// Load a service config from a JSON file. Missing fields take defaults.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            SynonymError::config(format!(
                "Failed to read service config '{}': {}",
                path.display(),
                e
            ))
        })?;
        let config: ServiceConfig = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the service cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.worker_threads == 0 {
            return Err(SynonymError::config("worker_threads must be at least 1"));
        }
        if self.sweep_interval_secs == 0 {
            return Err(SynonymError::config("sweep_interval_secs must be positive"));
        }
        Ok(())
    }

    /// Sweep period as a duration.
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    /// Remote request timeout as a duration.
    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }
}
