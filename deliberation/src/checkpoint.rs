//! Run checkpoints: snapshot after every node, resume from the last one.
//!
//! Snapshots carry a schema version and are integrity-checked before a
//! resume so a hand-edited or truncated file cannot drift the run.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::debate::{DebateState, Stance};
use crate::error::CheckpointError;
use crate::graph::NodeId;
use crate::state::{is_valid_subject, SharedState};

/// A complete run snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSnapshot {
    /// Schema version for forward compatibility.
    pub version: u32,
    pub run_id: String,
    /// Node invocations performed so far; counts against a resumed budget.
    pub steps: u32,
    /// Last node that completed, if any.
    pub last_node: Option<NodeId>,
    pub saved_at: DateTime<Utc>,
    pub state: SharedState,
}

impl RunSnapshot {
    pub const CURRENT_VERSION: u32 = 1;

    pub fn capture(state: &SharedState, steps: u32, last_node: Option<NodeId>) -> Self {
        Self {
            version: Self::CURRENT_VERSION,
            run_id: state.run_id.clone(),
            steps,
            last_node,
            saved_at: Utc::now(),
            state: state.clone(),
        }
    }

    /// Whether the run this snapshot belongs to has terminated.
    pub fn is_terminal(&self) -> bool {
        self.state.is_sealed()
    }

    pub fn to_json(&self) -> Result<String, CheckpointError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self, CheckpointError> {
        let snapshot: Self = serde_json::from_str(json)?;
        if snapshot.version > Self::CURRENT_VERSION {
            return Err(CheckpointError::VersionMismatch {
                expected: Self::CURRENT_VERSION,
                found: snapshot.version,
            });
        }
        Ok(snapshot)
    }
}

fn check_debate<S: Stance>(debate: &DebateState<S>, errors: &mut Vec<String>) {
    let name = S::debate_name();
    if debate.round_count > debate.max_rounds {
        errors.push(format!(
            "{} round_count {} exceeds max_rounds {}",
            name, debate.round_count, debate.max_rounds
        ));
    }
    if let Some(last) = debate.transitions.last() {
        if last.to != debate.phase {
            errors.push(format!(
                "{} last transition target {} doesn't match phase {}",
                name, last.to, debate.phase
            ));
        }
    } else if debate.is_terminal() {
        errors.push(format!("{} is {} without a transition", name, debate.phase));
    }
    if debate.is_judged() && !debate.phase.is_judgeable() {
        errors.push(format!("{} judged while {}", name, debate.phase));
    }
    if debate.transcript.iter().any(|t| t.round > debate.round_count + 1) {
        errors.push(format!("{} transcript runs ahead of round_count", name));
    }
}

/// Validate a snapshot before resuming from it.
pub fn validate_snapshot(snapshot: &RunSnapshot) -> Result<(), CheckpointError> {
    let mut errors: Vec<String> = Vec::new();

    if snapshot.run_id != snapshot.state.run_id {
        errors.push(format!(
            "snapshot run id {} doesn't match state run id {}",
            snapshot.run_id, snapshot.state.run_id
        ));
    }
    if !is_valid_subject(&snapshot.state.subject) {
        errors.push(format!("invalid subject {:?}", snapshot.state.subject));
    }
    for (idx, entry) in snapshot.state.append_log.iter().enumerate() {
        if entry.seq != idx as u64 + 1 {
            errors.push(format!(
                "append log sequence broken at position {} (seq {})",
                idx + 1,
                entry.seq
            ));
            break;
        }
    }
    if let Some(debate) = &snapshot.state.research_debate {
        check_debate(debate, &mut errors);
    }
    if let Some(debate) = &snapshot.state.risk_debate {
        check_debate(debate, &mut errors);
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(CheckpointError::Corrupted(errors.join("; ")))
    }
}

/// Run ids become file names: keep them to `[A-Za-z0-9_-]`.
pub fn validate_run_id(run_id: &str) -> Result<(), CheckpointError> {
    let ok = !run_id.is_empty()
        && run_id.len() <= 128
        && run_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if ok {
        Ok(())
    } else {
        Err(CheckpointError::InvalidRunId(run_id.to_string()))
    }
}

/// Snapshot persistence keyed by run id.
pub trait CheckpointStore: Send + Sync {
    fn save(&self, snapshot: &RunSnapshot) -> Result<(), CheckpointError>;

    /// Latest snapshot for the run.
    fn load(&self, run_id: &str) -> Result<RunSnapshot, CheckpointError>;

    fn list(&self) -> Result<Vec<String>, CheckpointError>;
}

/// One pretty-printed JSON file per run, `<dir>/<run_id>.json`.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    dir: PathBuf,
}

impl JsonFileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, run_id: &str) -> Result<PathBuf, CheckpointError> {
        validate_run_id(run_id)?;
        Ok(self.dir.join(format!("{}.json", run_id)))
    }
}

impl CheckpointStore for JsonFileStore {
    fn save(&self, snapshot: &RunSnapshot) -> Result<(), CheckpointError> {
        let path = self.path_for(&snapshot.run_id)?;
        std::fs::create_dir_all(&self.dir)?;
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, snapshot.to_json()?)?;
        std::fs::rename(&tmp, &path)?;
        debug!(run_id = %snapshot.run_id, steps = snapshot.steps, path = %path.display(), "checkpoint saved");
        Ok(())
    }

    fn load(&self, run_id: &str) -> Result<RunSnapshot, CheckpointError> {
        let path = self.path_for(run_id)?;
        if !path.exists() {
            return Err(CheckpointError::NotFound(run_id.to_string()));
        }
        let json = std::fs::read_to_string(&path)?;
        RunSnapshot::from_json(&json)
    }

    fn list(&self) -> Result<Vec<String>, CheckpointError> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }
        let mut ids = Vec::new();
        for entry in std::fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                ids.push(stem.to_string());
            }
        }
        ids.sort();
        Ok(ids)
    }
}

/// In-memory store keeping every snapshot, for replay and tests.
#[derive(Debug, Default)]
pub struct MemoryStore {
    runs: Mutex<BTreeMap<String, Vec<RunSnapshot>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// All snapshots of a run, oldest first.
    pub fn history(&self, run_id: &str) -> Vec<RunSnapshot> {
        self.runs
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(run_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Keep only the first `len` snapshots of a run. Returns how many remain.
    pub fn truncate(&self, run_id: &str, len: usize) -> usize {
        let mut runs = self
            .runs
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        match runs.get_mut(run_id) {
            Some(history) => {
                history.truncate(len);
                history.len()
            }
            None => 0,
        }
    }
}

impl CheckpointStore for MemoryStore {
    fn save(&self, snapshot: &RunSnapshot) -> Result<(), CheckpointError> {
        validate_run_id(&snapshot.run_id)?;
        self.runs
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .entry(snapshot.run_id.clone())
            .or_default()
            .push(snapshot.clone());
        Ok(())
    }

    fn load(&self, run_id: &str) -> Result<RunSnapshot, CheckpointError> {
        self.runs
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(run_id)
            .and_then(|history| history.last().cloned())
            .ok_or_else(|| CheckpointError::NotFound(run_id.to_string()))
    }

    fn list(&self) -> Result<Vec<String>, CheckpointError> {
        Ok(self
            .runs
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .keys()
            .cloned()
            .collect())
    }
}
