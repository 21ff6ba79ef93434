//! Command implementations for the dynsyn CLI.

use std::sync::Arc;
use std::time::Duration;

use crate::analysis::analyzer::{Analyzer, PipelineAnalyzer};
use crate::analysis::token::Token;
use crate::analysis::token_filter::LowercaseFilter;
use crate::analysis::tokenizer::WhitespaceTokenizer;
use crate::cli::args::*;
use crate::cli::output::*;
use crate::error::{Result, SynonymError};
use crate::synonym::config::{ServiceConfig, SourceDescriptor, SynonymFilterConfig};
use crate::synonym::dictionary::SynonymDictionary;
use crate::synonym::filter::DynamicSynonymFilter;
use crate::synonym::rules::RuleDictionaryBuilder;
use crate::synonym::service::SynonymService;
use crate::synonym::source::{HttpTransport, open_source};
use crate::synonym::sweep::SettingsConfigurationSource;

/// Execute a CLI command.
pub fn execute_command(args: DynsynArgs) -> Result<()> {
    match &args.command {
        Command::Check(check_args) => check_source(check_args.clone(), &args),
        Command::Analyze(analyze_args) => analyze_text(analyze_args.clone(), &args),
        Command::Watch(watch_args) => watch_sources(watch_args.clone(), &args),
    }
}

/// Whitespace tokenization followed by lowercasing.
fn normalizing_analyzer() -> PipelineAnalyzer {
    PipelineAnalyzer::new(Arc::new(WhitespaceTokenizer::new()))
        .add_filter(Arc::new(LowercaseFilter::new()))
        .with_name("dynsyn")
}

/// Rule builder that normalizes rule terms like the analysis chain does.
fn normalizing_builder() -> RuleDictionaryBuilder {
    RuleDictionaryBuilder::with_analyzer(Arc::new(normalizing_analyzer()))
}

/// Compile the source named on the command line once.
fn compile_source(args: &SourceArgs) -> Result<(SourceDescriptor, SynonymDictionary)> {
    let descriptor = SynonymFilterConfig::new(args.location.clone())
        .with_format(args.format.clone())
        .with_expand(!args.no_expand)
        .with_lenient(args.lenient)
        .to_descriptor(&args.config_dir)?;

    let transport = HttpTransport::new(Duration::from_secs(args.timeout))?;
    let source = open_source(
        &descriptor,
        Arc::new(normalizing_builder()),
        Arc::new(transport),
    );
    let dictionary = source.fetch_and_compile()?;
    Ok((descriptor, dictionary))
}

/// Compile a source and report what it contains.
fn check_source(args: CheckArgs, cli_args: &DynsynArgs) -> Result<()> {
    if cli_args.verbosity() > 1 {
        println!("Compiling synonyms from: {}", args.source.location);
    }

    let (descriptor, dictionary) = compile_source(&args.source)?;

    output_result(
        "Synonyms compiled successfully",
        &CheckResult {
            location: descriptor.location,
            kind: format!("{:?}", descriptor.kind),
            format: descriptor.options.format.to_string(),
            entries: dictionary.len(),
            max_phrase_length: dictionary.max_phrase_length(),
            fingerprint: dictionary.fingerprint().to_string(),
        },
        cli_args,
    )
}

/// Analyze text through the synonym filter of a freshly compiled source.
fn analyze_text(args: AnalyzeArgs, cli_args: &DynsynArgs) -> Result<()> {
    let (_, dictionary) = compile_source(&args.source)?;
    let filter = DynamicSynonymFilter::standalone(Arc::new(dictionary));

    let analyzer = normalizing_analyzer().add_filter(Arc::new(filter));
    let tokens: Vec<Token> = analyzer.analyze(&args.text)?.collect();

    output_result(
        "Analysis result",
        &AnalyzeResult {
            text: args.text,
            tokens,
        },
        cli_args,
    )
}

/// Start the service for every configured filter and wait for Ctrl-C.
fn watch_sources(args: WatchArgs, cli_args: &DynsynArgs) -> Result<()> {
    let service_config = match &args.service_config {
        Some(path) => ServiceConfig::from_file(path)?,
        None => ServiceConfig::default(),
    };

    let settings = Arc::new(SettingsConfigurationSource::from_file(&args.settings));
    let filters = settings.filter_settings()?;
    if filters.is_empty() {
        return Err(SynonymError::config(format!(
            "no dynamic synonym filters configured in {}",
            args.settings.display()
        )));
    }

    let transport = HttpTransport::new(service_config.http_timeout())?;
    let service = SynonymService::start_with(
        service_config,
        settings.clone(),
        Arc::new(normalizing_builder()),
        Arc::new(transport),
    )?;

    let mut factories = Vec::with_capacity(filters.len());
    for ((index, filter), options) in filters {
        let config = SynonymFilterConfig::from_settings(&options)?;
        factories.push(service.create_factory(&format!("{index}/{filter}"), &config)?);
    }

    if cli_args.verbosity() > 0 {
        println!(
            "Watching {} synonym filter(s) over {} location(s). Press Ctrl-C to stop.",
            factories.len(),
            service.scheduler().len()
        );
    }

    wait_for_interrupt()?;

    let result = WatchResult {
        filters: factories
            .iter()
            .map(|factory| WatchedFilter {
                name: factory.name().to_string(),
                location: factory.descriptor().location.clone(),
                entries: factory.current_dictionary().len(),
            })
            .collect(),
        scheduled_locations: service.scheduler().len(),
    };
    service.shutdown();

    output_result("Stopped watching", &result, cli_args)
}

/// Block until the process receives Ctrl-C.
fn wait_for_interrupt() -> Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    runtime.block_on(tokio::signal::ctrl_c())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source_args(location: &str, dir: &std::path::Path) -> SourceArgs {
        SourceArgs {
            location: location.to_string(),
            format: "solr".to_string(),
            no_expand: false,
            lenient: false,
            config_dir: dir.to_path_buf(),
            timeout: 1,
        }
    }

    #[test]
    fn test_compile_source_normalizes_rules() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("synonyms.txt"), "TV, Television\n").unwrap();

        let (descriptor, dictionary) =
            compile_source(&source_args("synonyms.txt", dir.path())).unwrap();

        assert!(descriptor.location.ends_with("synonyms.txt"));
        assert_eq!(dictionary.expand("tv").len(), 2);
        assert!(dictionary.get_synonyms("TV").is_none());
    }

    #[test]
    fn test_compile_missing_source_fails() {
        let dir = tempfile::tempdir().unwrap();
        assert!(compile_source(&source_args("missing.txt", dir.path())).is_err());
    }

    #[test]
    fn test_watch_without_filters_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let settings = dir.path().join("settings.json");
        std::fs::write(&settings, r#"{ "products": { "index.number_of_shards": "1" } }"#).unwrap();

        let args = DynsynArgs {
            verbose: 0,
            quiet: true,
            output_format: OutputFormat::Json,
            pretty: false,
            command: Command::Watch(WatchArgs {
                settings: settings.clone(),
                service_config: None,
            }),
        };
        let err = execute_command(args).unwrap_err();
        assert!(err.is_config());
    }
}
