//! kpigraph CLI
//!
//! - `validate`: check extracted KPIs against their source tables
//! - `correct`: drive invalid KPIs through the generation-service correction loop
//! - `link`: chain validated KPIs year-over-year and export the graph
//! - `parse-cell`: show how table cell text is read as a number

use anyhow::Result;
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;

mod backend;
mod correct;
mod link;
mod logging;
mod validate;

#[derive(Parser)]
#[command(name = "kpigraph")]
#[command(author, version, about = "kpigraph: verified KPI extraction and temporal linking")]
struct Cli {
    /// More log output (-v info, -vv debug, -vvv trace); KPIGRAPH_LOG overrides
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate extraction files against `linked_tables(<year>).jsonl`.
    ///
    /// Writes `valid_<file>.json` (full report) and, when anything failed,
    /// `invalid_<file>.json` into the output directory.
    Validate {
        /// Directory holding `linked_tables(<year>).jsonl` files
        #[arg(long)]
        tables: PathBuf,
        /// Directory of extraction JSON files (year in the file name)
        #[arg(long)]
        extractions: PathBuf,
        /// Output directory for reports
        #[arg(short, long)]
        out: PathBuf,
    },

    /// Validate and correct KPIs with a generation backend.
    ///
    /// Without `--extraction`, every table is extracted from scratch first.
    Correct {
        /// JSONL table file
        #[arg(long)]
        tables: PathBuf,
        /// Extraction JSON with the claims to check
        #[arg(long)]
        extraction: Option<PathBuf>,
        /// Output report
        #[arg(short, long)]
        out: PathBuf,
        #[command(flatten)]
        backend: backend::BackendArgs,
        /// Correction rounds (defaults to $KPIGRAPH_MAX_ITERATIONS or 3)
        #[arg(long)]
        max_iterations: Option<usize>,
        /// Per-call timeout in seconds, 0 disables (defaults to $KPIGRAPH_LLM_TIMEOUT_SECS or 120)
        #[arg(long)]
        timeout_secs: Option<u64>,
        /// Output token limit (defaults to $KPIGRAPH_LLM_MAX_OUTPUT_TOKENS or 4096)
        #[arg(long)]
        max_output_tokens: Option<usize>,
        /// Tables processed concurrently (defaults to the number of CPUs)
        #[arg(short, long)]
        jobs: Option<usize>,
    },

    /// Link validated KPIs into temporal chains and export the graph.
    Link {
        /// Validation report file, or a directory of them
        #[arg(long)]
        valid: PathBuf,
        /// Output graph JSON
        #[arg(short, long)]
        out: PathBuf,
        /// Print the grouping-strategy comparison
        #[arg(long)]
        analyze: bool,
        /// Largest groups shown per strategy
        #[arg(long, default_value_t = 10)]
        top: usize,
    },

    /// Parse table cell text into numbers.
    ParseCell {
        /// Cell texts, e.g. "1.234,5" "(12)" "5K"
        #[arg(required = true, allow_hyphen_values = true)]
        texts: Vec<String>,
        /// Print a JSON array instead of a table
        #[arg(long)]
        json: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    match cli.command {
        Commands::Validate {
            tables,
            extractions,
            out,
        } => validate::cmd_validate(&tables, &extractions, &out),
        Commands::Correct {
            tables,
            extraction,
            out,
            backend,
            max_iterations,
            timeout_secs,
            max_output_tokens,
            jobs,
        } => correct::cmd_correct(&correct::CorrectArgs {
            tables,
            extraction,
            out,
            backend,
            max_iterations,
            timeout_secs,
            max_output_tokens,
            jobs,
        }),
        Commands::Link {
            valid,
            out,
            analyze,
            top,
        } => link::cmd_link(&valid, &out, analyze, top),
        Commands::ParseCell { texts, json } => cmd_parse_cell(&texts, json),
    }
}

fn cmd_parse_cell(texts: &[String], json: bool) -> Result<()> {
    let parsed: Vec<Option<f64>> = texts.iter().map(|t| kpigraph_core::parse_cell(t)).collect();
    if json {
        println!("{}", serde_json::to_string(&parsed)?);
        return Ok(());
    }
    for (text, value) in texts.iter().zip(&parsed) {
        let shown = match value {
            Some(v) => v.to_string().green(),
            None => "null".dimmed(),
        };
        println!("{:<24} {shown}", format!("{text:?}"));
    }
    Ok(())
}
