//! Run logs written after a pipeline run.
//!
//! Two output sinks:
//! - `<results>/<SUBJECT>/full_states_log_<date>.json`: complete outcome, overwritten per date
//! - `<results>/runs.jsonl`: append-only summary line per run

use std::io::Write;
use std::path::{Component, Path, PathBuf};

use anyhow::{bail, Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use deliberation::{is_valid_subject, LogKind, RunOutcome, Signal, TerminationReason};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// One line of `runs.jsonl`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: String,
    pub subject: String,
    pub trade_date: NaiveDate,
    pub reason: TerminationReason,
    pub steps: u32,
    pub signal: Option<Signal>,
    pub degraded_reports: usize,
    pub failed_turns: usize,
    pub research_rounds: u32,
    pub risk_rounds: u32,
    pub recorded_at: DateTime<Utc>,
}

impl RunSummary {
    pub fn from_outcome(outcome: &RunOutcome) -> Self {
        let state = &outcome.state;
        Self {
            run_id: state.run_id.clone(),
            subject: state.subject.clone(),
            trade_date: state.trade_date,
            reason: outcome.reason.clone(),
            steps: outcome.steps,
            signal: state.final_signal,
            degraded_reports: state.degraded_reports().len(),
            failed_turns: state.log_count(LogKind::TurnFailure),
            research_rounds: state.research_debate.as_ref().map_or(0, |d| d.round_count),
            risk_rounds: state.risk_debate.as_ref().map_or(0, |d| d.round_count),
            recorded_at: Utc::now(),
        }
    }
}

pub struct RunLogWriter {
    root: PathBuf,
}

impl RunLogWriter {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Per-subject log file. Refuses subjects that would leave `root`.
    pub fn state_log_path(&self, subject: &str, date: NaiveDate) -> Result<PathBuf> {
        if !is_valid_subject(subject) {
            bail!("Refusing state log for invalid subject {:?}", subject);
        }
        let relative = Path::new(subject);
        if !relative
            .components()
            .all(|c| matches!(c, Component::Normal(_)))
        {
            bail!("State log path for {:?} escapes the results dir", subject);
        }
        Ok(self
            .root
            .join(relative)
            .join(format!("full_states_log_{}.json", date.format("%Y-%m-%d"))))
    }

    pub fn summary_path(&self) -> PathBuf {
        self.root.join("runs.jsonl")
    }

    /// Write the full outcome as pretty JSON. Returns the file written.
    pub fn write_state_log(&self, outcome: &RunOutcome) -> Result<PathBuf> {
        let path = self.state_log_path(&outcome.state.subject, outcome.state.trade_date)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let json = serde_json::to_string_pretty(outcome).context("Failed to serialize run")?;
        std::fs::write(&path, json)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        info!(path = %path.display(), "Wrote state log");
        Ok(path)
    }

    /// Append a summary line. Failures are logged, never fatal.
    pub fn append_summary(&self, outcome: &RunOutcome) {
        let path = self.summary_path();
        let summary = RunSummary::from_outcome(outcome);
        match serde_json::to_string(&summary) {
            Ok(json) => {
                if let Err(e) = std::fs::create_dir_all(&self.root) {
                    warn!("Failed to create results dir: {}", e);
                    return;
                }
                match std::fs::OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(&path)
                {
                    Ok(mut file) => {
                        if let Err(e) = writeln!(file, "{}", json) {
                            warn!("Failed to append run summary: {}", e);
                        } else {
                            info!(path = %path.display(), "Appended run summary");
                        }
                    }
                    Err(e) => warn!("Failed to open run summary file: {}", e),
                }
            }
            Err(e) => warn!("Failed to serialize run summary: {}", e),
        }
    }
}

/// Read back every summary line, skipping lines that do not parse.
pub fn read_summaries(path: &Path) -> Result<Vec<RunSummary>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    Ok(text
        .lines()
        .filter(|l| !l.trim().is_empty())
        .filter_map(|l| serde_json::from_str(l).ok())
        .collect())
}
