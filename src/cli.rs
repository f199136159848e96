use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

/// FOCUS conformance validator - validate tabular billing/cost datasets
/// against a declarative rule catalog.
#[derive(Parser, Debug)]
#[command(name = "focus-validate")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Validate a data file against a rule catalog
    Validate {
        /// Path to the rule catalog JSON document
        #[arg(short, long)]
        catalog: PathBuf,

        /// Dataset name as declared in the catalog's `ConformanceDatasets`
        #[arg(short, long)]
        dataset: String,

        /// Path to the data file (CSV or Parquet)
        #[arg(short = 'i', long)]
        input: PathBuf,

        /// Only consider rules whose id starts with this prefix
        #[arg(long)]
        rule_prefix: Option<String>,

        /// Applicability tags to activate ("ALL" activates every tag the catalog declares)
        #[arg(long, value_delimiter = ',')]
        applicability: Vec<String>,

        /// Stop scheduling further layers after the first executor error
        #[arg(long)]
        stop_on_first_error: bool,

        /// Output format
        #[arg(short = 'f', long, value_enum, default_value = "text")]
        output_format: Format,

        /// Disable colored output
        #[arg(long)]
        no_color: bool
    }
}

#[derive(Debug, Clone, ValueEnum)]
pub enum Format {
    Text,
    Json,
    Yaml
}
