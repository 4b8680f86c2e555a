//! CLI argument structures.

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Competitive set analysis: perceptual maps, segments and segment reports
#[derive(Parser)]
#[command(name = "compset")]
#[command(version = VERSION)]
#[command(about = "Competitive set analysis: perceptual maps, segments and segment reports")]
#[command(long_about = "
Position competing items in attribute space, group them into segments,
characterize each segment and ask a language model to name the segments
and write a short report.

Common Usage:

  # Analyze a JSON or CSV table of items
  compset analyze --input items.csv

  # English prompts and labels, JSON output for a plotting front end
  compset analyze --input items.json --language en --format json

  # No network access: default segment names, report slot shows why it is empty
  compset analyze --input items.csv --offline

  # Start from the defaults
  compset print-default-config > compset.yml
")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging for debugging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the analysis on an input table
    Analyze(Box<AnalyzeArgs>),

    /// Print default configuration in YAML format
    #[command(name = "print-default-config")]
    PrintDefaultConfig,
}

/// Output format for the analyze command
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable tables
    Table,
    /// One JSON document with plot points, summary and report
    Json,
}

#[derive(Args)]
pub struct AnalyzeArgs {
    /// Input table (.json array of records or .csv with header)
    #[arg(short, long)]
    pub input: PathBuf,

    /// YAML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Prompt and label language (en, zh-TW)
    #[arg(long)]
    pub language: Option<String>,

    /// Maximum proportion of missing values per attribute column
    #[arg(long)]
    pub na_threshold: Option<f64>,

    /// Raise values below the column mean to the mean before clustering
    #[arg(long)]
    pub modify_data: bool,

    /// Brand whose items are highlighted on the map
    #[arg(long)]
    pub highlight_brand: Option<String>,

    /// Include cluster centers in the plot payload
    #[arg(long)]
    pub show_centers: bool,

    /// Never call the text-generation service; segments keep default names
    #[arg(long)]
    pub offline: bool,

    /// Output format
    #[arg(long, value_enum, default_value = "table")]
    pub format: OutputFormat,
}
