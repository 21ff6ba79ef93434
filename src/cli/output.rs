//! Output formatting for CLI commands.

use serde::{Deserialize, Serialize};

use crate::analysis::token::Token;
use crate::cli::args::{DynsynArgs, OutputFormat};
use crate::error::Result;

/// Result structure for a compiled source.
#[derive(Debug, Serialize, Deserialize)]
pub struct CheckResult {
    pub location: String,
    pub kind: String,
    pub format: String,
    pub entries: usize,
    pub max_phrase_length: usize,
    pub fingerprint: String,
}

/// Result structure for analyzed text.
#[derive(Debug, Serialize, Deserialize)]
pub struct AnalyzeResult {
    pub text: String,
    pub tokens: Vec<Token>,
}

/// Summary of one watched filter.
#[derive(Debug, Serialize, Deserialize)]
pub struct WatchedFilter {
    pub name: String,
    pub location: String,
    pub entries: usize,
}

/// Result structure for a finished watch.
#[derive(Debug, Serialize, Deserialize)]
pub struct WatchResult {
    pub filters: Vec<WatchedFilter>,
    pub scheduled_locations: usize,
}

/// Output a result according to the configured format.
pub fn output_result<T: Serialize>(message: &str, result: &T, args: &DynsynArgs) -> Result<()> {
    match args.output_format {
        OutputFormat::Human => output_human(message, result, args),
        OutputFormat::Json => output_json(result, args),
    }
}

/// Output in human-readable format.
fn output_human<T: Serialize>(message: &str, result: &T, args: &DynsynArgs) -> Result<()> {
    if args.verbosity() > 0 {
        println!("{message}");
        println!();
    }

    // Convert to JSON value for easier manipulation
    let value = serde_json::to_value(result)?;

    if let Some(tokens) = value.get("tokens").and_then(|t| t.as_array()) {
        output_tokens_human(tokens);
    } else {
        output_generic_human(&value);
    }
    Ok(())
}

/// Output analyzed tokens in human format, one per line.
fn output_tokens_human(tokens: &[serde_json::Value]) {
    println!("{:<4} {:<24} {:>4} {:>4}  type", "pos", "token", "inc", "len");
    println!("{}", "─".repeat(48));
    for token in tokens {
        let text = token.get("text").and_then(|t| t.as_str()).unwrap_or("");
        let position = token.get("position").and_then(|p| p.as_u64()).unwrap_or(0);
        let increment = token
            .get("position_increment")
            .and_then(|p| p.as_u64())
            .unwrap_or(1);
        let length = token
            .get("position_length")
            .and_then(|p| p.as_u64())
            .unwrap_or(1);
        let token_type = token
            .get("token_type")
            .and_then(|t| t.as_str())
            .unwrap_or("-");
        println!("{position:<4} {text:<24} {increment:>4} {length:>4}  {token_type}");
    }
}

/// Generic human output for other results.
fn output_generic_human(value: &serde_json::Value) {
    if let Some(obj) = value.as_object() {
        for (key, val) in obj {
            println!("{}: {}", key, format_value(val));
        }
    }
}

/// Output in JSON format.
fn output_json<T: Serialize>(result: &T, args: &DynsynArgs) -> Result<()> {
    let json = if args.pretty {
        serde_json::to_string_pretty(result)?
    } else {
        serde_json::to_string(result)?
    };
    println!("{json}");
    Ok(())
}

/// Format a JSON value for human display.
fn format_value(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Number(n) => n.to_string(),
        serde_json::Value::Bool(b) => b.to_string(),
        serde_json::Value::Null => "null".to_string(),
        serde_json::Value::Array(arr) => arr
            .iter()
            .map(format_value)
            .collect::<Vec<_>>()
            .join(", "),
        serde_json::Value::Object(_) => value.to_string(),
    }
}
