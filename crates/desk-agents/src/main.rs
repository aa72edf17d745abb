#![allow(clippy::uninlined_format_args)]

use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::Parser;
use desk_agents::config::DeskConfig;
use desk_agents::report::RunLogWriter;
use tracing::{info, warn};

/// Command-line arguments
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Ticker to decide on, e.g. NVDA
    #[arg(long, required_unless_present = "resume")]
    subject: Option<String>,

    /// Reference date (YYYY-MM-DD); defaults to today
    #[arg(long)]
    date: Option<NaiveDate>,

    /// Path to a TOML config file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Resume an interrupted run from its last checkpoint
    #[arg(long, conflicts_with = "subject")]
    resume: Option<String>,

    /// Override the step budget (overrides DESK_STEP_BUDGET)
    #[arg(long)]
    step_budget: Option<u32>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args = Args::parse();
    let mut config = DeskConfig::load(args.config.as_deref())?;
    if let Some(budget) = args.step_budget {
        config.run.step_budget = budget;
        config.run.validate().context("Invalid --step-budget")?;
    }

    let pipeline = desk_agents::build_pipeline(&config)?;
    let outcome = match (&args.resume, &args.subject) {
        (Some(run_id), _) => {
            info!(run_id = %run_id, "Resuming run");
            pipeline
                .resume(run_id)
                .await
                .with_context(|| format!("Failed to resume run {}", run_id))?
        }
        (None, Some(subject)) => {
            let date = args
                .date
                .unwrap_or_else(|| chrono::Local::now().date_naive());
            pipeline
                .propagate(subject, date)
                .await
                .with_context(|| format!("Failed to start run for {}", subject))?
        }
        (None, None) => anyhow::bail!("--subject or --resume is required"),
    };

    let writer = RunLogWriter::new(&config.results_dir);
    match writer.write_state_log(&outcome) {
        Ok(path) => info!(path = %path.display(), "Run log saved"),
        Err(e) => warn!("Failed to save run log: {:#}", e),
    }
    writer.append_summary(&outcome);

    println!("{}", outcome.summary_line());
    if !outcome.state.final_decision.is_empty() {
        println!("\n{}", outcome.state.final_decision);
    }
    if !outcome.reason.is_completed() {
        std::process::exit(2);
    }
    Ok(())
}
