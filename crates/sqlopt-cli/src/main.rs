//! sqlopt CLI: explain and validate YAML query documents.

use std::fs;
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use thiserror::Error;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use sqlopt_core::hash::short_fingerprint;
use sqlopt_core::prelude::{OptimizerConfig, RuleFlags};
use sqlopt_planner::dsl::{parse_query, DslError, YamlPlanBuilder};
use sqlopt_planner::Optimizer;

#[derive(Parser)]
#[command(name = "sqlopt", version = sqlopt_core::VERSION)]
#[command(about = "Rule-based and cost-based SQL query optimizer", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Optimize a query document and print the chosen plan
    Explain {
        /// Path to the query YAML file
        #[arg(short, long)]
        query: PathBuf,

        /// Print the logical plan as built, without optimizing
        #[arg(long)]
        logical: bool,

        /// Logical rule mask (decimal, 0x hex or 0b binary); overrides the
        /// rules chosen for the query
        #[arg(long)]
        rule_flags: Option<String>,

        /// Reject joins without equality conditions
        #[arg(long)]
        disallow_cartesian: bool,

        /// Print the plan as JSON
        #[arg(long)]
        json: bool,
    },

    /// Check that a query document builds (names, types, syntax)
    Validate {
        /// Path to the query YAML file
        #[arg(short, long)]
        query: PathBuf,
    },
}

#[derive(Debug, Error)]
enum CliError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Dsl(#[from] DslError),
    #[error(transparent)]
    Optimizer(#[from] sqlopt_core::error::Error),
    #[error("JSON encoding failed: {0}")]
    Json(#[from] serde_json::Error),
}

impl CliError {
    fn suggestions(&self) -> Vec<String> {
        match self {
            CliError::Optimizer(e) => e.suggestions(),
            _ => Vec::new(),
        }
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let result = match cli.command {
        Commands::Explain {
            query,
            logical,
            rule_flags,
            disallow_cartesian,
            json,
        } => explain(&query, logical, rule_flags.as_deref(), disallow_cartesian, json),
        Commands::Validate { query } => validate(&query).map(|()| println!("✓ Query is valid")),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        for hint in e.suggestions() {
            eprintln!("  hint: {}", hint);
        }
        std::process::exit(1);
    }
}

fn read(path: &Path) -> Result<String, CliError> {
    fs::read_to_string(path).map_err(|source| CliError::Io {
        path: path.display().to_string(),
        source,
    })
}

fn explain(
    path: &Path,
    logical: bool,
    rule_flags: Option<&str>,
    disallow_cartesian: bool,
    json: bool,
) -> Result<(), CliError> {
    let doc = parse_query(&read(path)?)?;
    let catalog = doc.catalog()?;
    let ctx = doc.session(&catalog);

    let mut config = OptimizerConfig::from_env()?;
    if let Some(mask) = rule_flags {
        config = config.with_rule_flags(RuleFlags::parse(mask)?);
    }
    if disallow_cartesian {
        config = config.with_allow_cartesian_product(false);
    }
    debug!(?config, "optimizer configuration");

    let optimizer = Optimizer::new(YamlPlanBuilder, config);
    let plan = if logical {
        optimizer.build_logical_plan(&ctx, &doc.statement, &catalog)?
    } else {
        optimizer.optimize(&ctx, &doc.statement, &catalog)?
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&plan)?);
        return Ok(());
    }
    print!("{}", plan.explain());
    println!("fingerprint: {}", short_fingerprint(&plan, 16)?);
    Ok(())
}

fn validate(path: &Path) -> Result<(), CliError> {
    let doc = parse_query(&read(path)?)?;
    let catalog = doc.catalog()?;
    let ctx = doc.session(&catalog);
    let optimizer = Optimizer::new(YamlPlanBuilder, OptimizerConfig::default());
    optimizer.build_logical_plan(&ctx, &doc.statement, &catalog)?;
    for (name, stmt) in &doc.prepared {
        optimizer
            .build_logical_plan(&ctx, stmt, &catalog)
            .map_err(|e| e.with_context(format!("prepared statement '{}'", name)))?;
    }
    Ok(())
}
