//! Run parameters.
//!
//! All knobs are plain serde structs with defaults so a partial TOML or
//! JSON document deserializes cleanly. Consensus phrases and the quality
//! threshold are tuning parameters, never hard-coded at call sites.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::state::AnalystKind;

/// Phrase list used when nothing else is configured.
pub const DEFAULT_CONSENSUS_PHRASES: &[&str] = &[
    "consensus reached",
    "we are in agreement",
    "i agree with the",
    "i concur",
    "common ground",
    "no further objections",
];

/// Consensus heuristic parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsensusSettings {
    /// Case-insensitive substrings that signal agreement.
    pub phrases: Vec<String>,
    /// Quality score at or above which consensus is forced (`None` disables).
    pub quality_threshold: Option<f64>,
    /// Rounds that must complete before the quality threshold applies.
    pub min_quality_rounds: u32,
}

impl ConsensusSettings {
    /// No phrases, no quality threshold: only the round cap ends a debate.
    pub fn disabled() -> Self {
        Self {
            phrases: Vec::new(),
            quality_threshold: None,
            min_quality_rounds: 2,
        }
    }
}

impl Default for ConsensusSettings {
    fn default() -> Self {
        Self {
            phrases: DEFAULT_CONSENSUS_PHRASES
                .iter()
                .map(|p| p.to_string())
                .collect(),
            quality_threshold: Some(0.85),
            min_quality_rounds: 2,
        }
    }
}

/// Parameters for one debate instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DebateSettings {
    /// Circuit-breaker round cap. Zero skips the debate entirely.
    pub max_rounds: u32,
    /// Per-turn timeout; a turn that exceeds it becomes an empty turn.
    pub turn_timeout_secs: Option<u64>,
    pub consensus: ConsensusSettings,
}

impl DebateSettings {
    pub fn with_max_rounds(max_rounds: u32) -> Self {
        Self {
            max_rounds,
            ..Default::default()
        }
    }

    pub fn turn_timeout(&self) -> Option<Duration> {
        self.turn_timeout_secs.map(Duration::from_secs)
    }
}

impl Default for DebateSettings {
    fn default() -> Self {
        Self {
            max_rounds: 2,
            turn_timeout_secs: Some(180),
            consensus: ConsensusSettings::default(),
        }
    }
}

/// Top-level parameters for one pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Maximum node invocations before the executor halts.
    pub step_budget: u32,
    /// Wall-clock limit for a single node invocation.
    pub node_timeout_secs: Option<u64>,
    /// Per-analyst limit inside the dispatcher barrier.
    pub analyst_timeout_secs: u64,
    /// Per reasoning call limit used by synthesizers.
    pub call_timeout_secs: Option<u64>,
    /// Re-prompts allowed when an analyst skipped data retrieval.
    pub tool_retries: u32,
    /// Analysts to run, in order.
    pub analysts: Vec<AnalystKind>,
    pub research_debate: DebateSettings,
    pub risk_debate: DebateSettings,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            step_budget: 100,
            node_timeout_secs: Some(600),
            analyst_timeout_secs: 300,
            call_timeout_secs: Some(120),
            tool_retries: 2,
            analysts: AnalystKind::all().to_vec(),
            research_debate: DebateSettings::default(),
            risk_debate: DebateSettings::default(),
        }
    }
}

impl RunConfig {
    pub fn node_timeout(&self) -> Option<Duration> {
        self.node_timeout_secs.map(Duration::from_secs)
    }

    pub fn analyst_timeout(&self) -> Duration {
        Duration::from_secs(self.analyst_timeout_secs)
    }

    pub fn call_timeout(&self) -> Option<Duration> {
        self.call_timeout_secs.map(Duration::from_secs)
    }

    /// Reject configurations the executor cannot honor.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.analysts.is_empty() {
            return Err(ConfigError::invalid("at least one analyst is required"));
        }
        for (idx, kind) in self.analysts.iter().enumerate() {
            if self.analysts[..idx].contains(kind) {
                return Err(ConfigError::invalid(format!(
                    "analyst {} listed more than once",
                    kind
                )));
            }
        }
        if self.analyst_timeout_secs == 0 {
            return Err(ConfigError::invalid("analyst_timeout_secs must be > 0"));
        }
        if self.node_timeout_secs == Some(0) {
            return Err(ConfigError::invalid("node_timeout_secs must be > 0"));
        }
        for (name, debate) in [
            ("research_debate", &self.research_debate),
            ("risk_debate", &self.risk_debate),
        ] {
            if let Some(threshold) = debate.consensus.quality_threshold {
                if !(0.0..=1.0).contains(&threshold) {
                    return Err(ConfigError::invalid(format!(
                        "{}.consensus.quality_threshold must be within [0, 1], got {}",
                        name, threshold
                    )));
                }
            }
            if debate.turn_timeout_secs == Some(0) {
                return Err(ConfigError::invalid(format!(
                    "{}.turn_timeout_secs must be > 0",
                    name
                )));
            }
        }
        Ok(())
    }
}
