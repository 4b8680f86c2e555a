//! Command execution.

use std::sync::Arc;

use anyhow::Context;
use owo_colors::OwoColorize;
use tracing::warn;

use compset_rs::context::source_for_path;
use compset_rs::service::DisabledService;
use compset_rs::tasks::{NotificationObserver, TaskObserver, TracingNotifier};
use compset_rs::{
    AnalysisContext, CompsetConfig, Language, OpenAiChatService, PipelineStatus,
    TextGenerationService,
};

use super::args::{AnalyzeArgs, OutputFormat};
use super::output::{print_json, print_tables};

/// Load the configuration file (if any) and layer CLI flags over it.
pub fn load_configuration(args: &AnalyzeArgs) -> anyhow::Result<CompsetConfig> {
    let mut config = match &args.config {
        Some(path) => {
            eprintln!(
                "{} {}",
                "Loading configuration from".green(),
                path.display().to_string().cyan()
            );
            CompsetConfig::from_yaml_file(path)
                .with_context(|| format!("loading {}", path.display()))?
        }
        None => CompsetConfig::default(),
    };

    if let Some(tag) = &args.language {
        config = config.with_language(Language::from_tag(tag)?);
    }
    if let Some(threshold) = args.na_threshold {
        config = config.with_na_threshold(threshold);
    }
    if args.modify_data {
        config = config.with_modify_data(true);
    }
    if args.show_centers {
        config.display.show_centers = true;
    }
    if let Some(brand) = &args.highlight_brand {
        config.display.highlight_brand = Some(brand.clone());
    }
    config.validate()?;
    Ok(config)
}

fn build_service(config: &CompsetConfig, offline: bool) -> Arc<dyn TextGenerationService> {
    if offline {
        return Arc::new(DisabledService::new("offline mode"));
    }
    match OpenAiChatService::from_settings(&config.service) {
        Ok(service) => Arc::new(service),
        Err(e) => {
            warn!("Text generation unavailable: {e}");
            Arc::new(DisabledService::new(e.to_string()))
        }
    }
}

/// Run the analysis and print the results.
pub async fn analyze_command(args: AnalyzeArgs) -> anyhow::Result<()> {
    let config = load_configuration(&args)?;
    let source = source_for_path(&args.input)?;
    let service = build_service(&config, args.offline);
    let observers: Vec<Arc<dyn TaskObserver>> =
        vec![Arc::new(NotificationObserver::new(Arc::new(TracingNotifier)))];

    let context = AnalysisContext::new(config, Arc::from(source), service, observers)?;
    let status = context.refresh();

    if let PipelineStatus::Error(message) = &status {
        match args.format {
            OutputFormat::Json => print_json(&context, &status)?,
            OutputFormat::Table => eprintln!("{}", message.red().bold()),
        }
        anyhow::bail!("{message}");
    }

    let report = context.settled().await;
    match args.format {
        OutputFormat::Table => print_tables(&context, &status, &report),
        OutputFormat::Json => print_json(&context, &status)?,
    }
    Ok(())
}

/// Print the default configuration as YAML.
pub fn print_default_config() -> anyhow::Result<()> {
    println!("{}", "# Default compset configuration".dimmed());
    println!("{}", "# Save this to a file and customize as needed".dimmed());
    println!("{}", "# Usage: compset analyze --config your-config.yml".dimmed());
    println!();

    let yaml_output = serde_yaml::to_string(&CompsetConfig::default())?;
    println!("{yaml_output}");
    Ok(())
}
