//! # FOCUS Conformance Engine
//!
//! Validates a tabular billing/cost dataset against a declarative
//! conformance rule catalog.
//!
//! # Architecture
//!
//! A validation run walks a fixed pipeline:
//!
//! 1. **Catalog load** - parse the rule catalog document into typed rule
//!    records ([`catalog`]).
//! 2. **Resolution** - collect the rules relevant to the target dataset,
//!    propagate composite preconditions onto their children, and emit
//!    cycle diagnostics ([`resolver`]).
//! 3. **Plan building & scheduling** - expand composite references and
//!    explicit dependencies into a graph, then schedule it into layers via
//!    Kahn's algorithm with a deterministic tie-break ([`plan`]).
//! 4. **Compilation** - turn each rule into a SQL check, a schema probe, or
//!    a composite reduction ([`compiler`]).
//! 5. **Execution** - walk the plan layer by layer against an embedded
//!    DuckDB table ([`executor`], [`engine`]).
//! 6. **Aggregation** - produce the verdict views reporters consume
//!    ([`aggregator`]).
//!
//! # Quick Start
//!
//! ```bash
//! focus-validate validate \
//!     --catalog rules.json \
//!     --dataset BillingAccount \
//!     --input billing.csv
//! ```
//!
//! # Configuration
//!
//! Configuration is loaded from (in order of precedence):
//!
//! 1. Command-line arguments
//! 2. Environment variables (`FOCUS_TABLE_NAME`, `FOCUS_DATASET`, ...)
//! 3. `.focus-validator.toml` in the current directory
//! 4. `~/.config/focus-validator/config.toml`
//!
//! # Exit Codes
//!
//! - `0` - no failures (or only `MAY`/`OPTIONAL` failures)
//! - `1` - a `SHOULD`/`RECOMMENDED` rule failed
//! - `2` - a `MUST` rule failed
//!
//! # Modules
//!
//! - [`catalog`] - rule catalog loading and typed rule records
//! - [`resolver`] - dependency resolution and cycle diagnostics
//! - [`plan`] - plan graph construction and layered scheduling
//! - [`compiler`] - per-rule SQL/predicate compilation
//! - [`executor`] - layer-by-layer plan execution
//! - [`engine`] - the embedded DuckDB adapter
//! - [`aggregator`] - verdict aggregation
//! - [`schema`] - logical column-type extraction and runtime schema probing
//! - [`config`] - configuration loading
//! - [`output`] - report rendering
//! - [`error`] - error taxonomy and constructors

mod aggregator;
mod catalog;
mod cli;
mod compiler;
mod config;
mod engine;
mod error;
mod executor;
mod output;
mod plan;
mod resolver;
mod schema;
mod verdict;

use std::{path::Path, process, time::Duration};

use clap::Parser;
use indexmap::IndexSet;
use indicatif::{ProgressBar, ProgressStyle};
use tracing_subscriber::EnvFilter;

use crate::{
    aggregator::ValidationResults,
    catalog::{Catalog, FileRuleSource},
    cli::{Cli, Commands, Format},
    config::{ApplicabilitySelection, Config},
    engine::DuckDbEngine,
    error::{AppResult, config_error},
    executor::Executor,
    output::{OutputFormat, OutputOptions, format_results},
    plan::{PlanBuilder, compile_validation_plan, ExecContext}
};

fn main() {
    match run() {
        Ok(code) => process::exit(code),
        Err(e) => {
            eprintln!("Error: {e}");
            process::exit(1);
        }
    }
}

fn run() -> AppResult<i32> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    let cli = Cli::parse();
    let config = Config::load()?;

    match cli.command {
        Commands::Validate {
            catalog,
            dataset,
            input,
            rule_prefix,
            applicability,
            stop_on_first_error,
            output_format,
            no_color
        } => validate(
            &catalog,
            &dataset,
            &input,
            rule_prefix.or(config.engine.rule_prefix),
            applicability,
            config.engine.applicability_selection(),
            stop_on_first_error || config.engine.stop_on_first_error,
            &config.engine.table_name,
            output_format,
            no_color
        )
    }
}

#[allow(clippy::too_many_arguments)]
fn validate(
    catalog_path: &Path,
    dataset: &str,
    input: &Path,
    rule_prefix: Option<String>,
    applicability_override: Vec<String>,
    configured_selection: ApplicabilitySelection,
    stop_on_first_error: bool,
    table_name: &str,
    output_format: Format,
    no_color: bool
) -> AppResult<i32> {
    let source = FileRuleSource::new(catalog_path);
    let catalog = Catalog::load(&source)?;
    tracing::info!(rules = catalog.rules.len(), dataset, "catalog loaded");

    let resolved = resolver::resolve(&catalog, dataset, rule_prefix.as_deref())?;
    tracing::info!(relevant_rules = resolved.rules.len(), "dependency resolution complete");

    let graph = PlanBuilder::new(&resolved.rules).build(resolved.roots.iter().cloned())?;

    let active_tags: IndexSet<String> = if !applicability_override.is_empty() {
        if applicability_override.iter().any(|t| t == "ALL") {
            catalog.applicability_criteria.keys().cloned().collect()
        } else {
            applicability_override.into_iter().collect()
        }
    } else {
        match configured_selection {
            ApplicabilitySelection::All => catalog.applicability_criteria.keys().cloned().collect(),
            ApplicabilitySelection::Tags(tags) => tags
        }
    };

    let plan = compile_validation_plan(graph, &resolved.rules, &ExecContext::default())?;
    if !plan.cyclic_rule_ids.is_empty() {
        tracing::warn!(rules = ?plan.cyclic_rule_ids, "plan contains unresolved cyclic rules");
    }

    let engine = DuckDbEngine::open_in_memory(table_name)?;
    load_input(&engine, input)?;

    let pb = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.green} {msg}") {
        pb.set_style(style);
    }
    pb.set_message(format!("validating {} rules...", plan.nodes.len()));
    pb.enable_steady_tick(Duration::from_millis(100));

    let executor = Executor::new(&plan, &resolved.rules, &engine, &active_tags, stop_on_first_error);
    let verdicts = executor.run()?;

    pb.finish_and_clear();

    let results = ValidationResults::new(verdicts, resolved.rules);

    let opts = OutputOptions {
        format: match output_format {
            Format::Text => OutputFormat::Text,
            Format::Json => OutputFormat::Json,
            Format::Yaml => OutputFormat::Yaml
        },
        colored: !no_color
    };
    println!("{}", format_results(&results, &opts));

    Ok(results.exit_code())
}

fn load_input(engine: &DuckDbEngine, input: &Path) -> AppResult<()> {
    match input.extension().and_then(|e| e.to_str()) {
        Some("parquet") => engine.load_parquet(input),
        Some("csv") | Some("tsv") => engine.load_csv(input),
        _ => Err(config_error(format!(
            "unrecognized input file extension for '{}', expected .csv or .parquet",
            input.display()
        )))
    }
}
