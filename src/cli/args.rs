//! Command line argument parsing for the dynsyn CLI using clap.

use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// dynsyn - inspect and watch hot-reloading synonym sources
#[derive(Parser, Debug, Clone)]
#[command(name = "dynsyn")]
#[command(about = "Inspect and watch hot-reloading synonym dictionaries")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(long_about = None)]
pub struct DynsynArgs {
    /// Verbosity level (0=quiet, 1=normal, 2=verbose, 3=debug)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Quiet mode (overrides verbose)
    #[arg(short, long)]
    pub quiet: bool,

    /// Output format
    #[arg(short = 'o', long = "output", default_value = "human")]
    pub output_format: OutputFormat,

    /// Pretty-print JSON output
    #[arg(long)]
    pub pretty: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Command,
}

impl DynsynArgs {
    /// Get the effective verbosity level
    pub fn verbosity(&self) -> u8 {
        if self.quiet {
            0
        } else {
            match self.verbose {
                0 => 1, // Default to normal
                n => n,
            }
        }
    }
}

/// Available CLI commands
#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Compile a synonym source once and report the result
    Check(CheckArgs),

    /// Run text through whitespace, lowercase and synonym filtering
    Analyze(AnalyzeArgs),

    /// Poll every configured synonym source until interrupted
    Watch(WatchArgs),
}

/// Options shared by the commands that compile a single source.
#[derive(Args, Debug, Clone)]
pub struct SourceArgs {
    /// File path or URL of the synonym rules
    #[arg(value_name = "LOCATION")]
    pub location: String,

    /// Rule format (solr or wordnet)
    #[arg(long, default_value = "solr")]
    pub format: String,

    /// Map mutual synonyms to the first term only instead of all terms
    #[arg(long)]
    pub no_expand: bool,

    /// Skip malformed rule lines
    #[arg(long)]
    pub lenient: bool,

    /// Directory relative paths resolve against
    #[arg(long, value_name = "DIR", default_value = ".")]
    pub config_dir: PathBuf,

    /// Timeout for remote sources, in seconds
    #[arg(long, default_value = "10")]
    pub timeout: u64,
}

/// Arguments for checking a source
#[derive(Parser, Debug, Clone)]
pub struct CheckArgs {
    #[command(flatten)]
    pub source: SourceArgs,
}

/// Arguments for analyzing text
#[derive(Parser, Debug, Clone)]
pub struct AnalyzeArgs {
    #[command(flatten)]
    pub source: SourceArgs,

    /// Text to analyze
    #[arg(value_name = "TEXT")]
    pub text: String,
}

/// Arguments for watching configured sources
#[derive(Parser, Debug, Clone)]
pub struct WatchArgs {
    /// Index settings file (JSON, flattened keys per index)
    #[arg(short, long, value_name = "FILE")]
    pub settings: PathBuf,

    /// Service configuration file (JSON)
    #[arg(long, value_name = "FILE", env = "DYNSYN_SERVICE_CONFIG")]
    pub service_config: Option<PathBuf>,
}

/// Output format options
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutputFormat {
    /// Human-readable output
    Human,
    /// JSON output
    Json,
}
