//! Debate state machine: stances, phases, transitions, and turn history.

use std::collections::BTreeMap;
use std::fmt::{Debug, Display};
use std::hash::Hash;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A participant side in a debate. Implemented by small `Copy` enums whose
/// variant order is the speaking order.
pub trait Stance:
    Copy + Eq + Ord + Hash + Debug + Display + Serialize + DeserializeOwned + Send + Sync + 'static
{
    /// Name of the debate this stance set belongs to.
    fn debate_name() -> &'static str;

    /// Fixed, deterministic turn order within a round.
    fn speaking_order() -> &'static [Self];

    /// One-line brief handed to whoever argues this stance.
    fn role_brief(self) -> &'static str;
}

/// Proponent / opponent stances of the investment debate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResearchStance {
    Bull,
    Bear,
}

impl Stance for ResearchStance {
    fn debate_name() -> &'static str {
        "research"
    }

    fn speaking_order() -> &'static [Self] {
        &[Self::Bull, Self::Bear]
    }

    fn role_brief(self) -> &'static str {
        match self {
            Self::Bull => "Argue for investing: growth potential, competitive advantages, positive indicators. Counter the bear's points directly.",
            Self::Bear => "Argue against investing: risks, weaknesses, negative indicators. Counter the bull's points directly.",
        }
    }
}

impl std::fmt::Display for ResearchStance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bull => write!(f, "bull"),
            Self::Bear => write!(f, "bear"),
        }
    }
}

/// Risk postures of the risk debate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskStance {
    Aggressive,
    Conservative,
    Neutral,
}

impl Stance for RiskStance {
    fn debate_name() -> &'static str {
        "risk"
    }

    fn speaking_order() -> &'static [Self] {
        &[Self::Aggressive, Self::Conservative, Self::Neutral]
    }

    fn role_brief(self) -> &'static str {
        match self {
            Self::Aggressive => "Champion high-reward opportunities in the trader's plan; challenge overly cautious views.",
            Self::Conservative => "Protect assets and minimize volatility; point out where the plan is exposed.",
            Self::Neutral => "Weigh both sides; argue for a balanced, sustainable position.",
        }
    }
}

impl std::fmt::Display for RiskStance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Aggressive => write!(f, "aggressive"),
            Self::Conservative => write!(f, "conservative"),
            Self::Neutral => write!(f, "neutral"),
        }
    }
}

/// Phase of a debate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DebatePhase {
    /// Rounds still being played.
    Active,
    /// The consensus detector fired on the latest round.
    ConsensusReached,
    /// The circuit breaker hit the round cap.
    ForcedTermination,
    /// The executor's step budget ran out mid-debate.
    BudgetExceeded,
}

impl DebatePhase {
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Active)
    }

    /// Terminal phases that hand the transcript to a judge.
    pub fn is_judgeable(self) -> bool {
        matches!(self, Self::ConsensusReached | Self::ForcedTermination)
    }

    pub fn valid_transitions(self) -> &'static [DebatePhase] {
        match self {
            Self::Active => &[
                Self::ConsensusReached,
                Self::ForcedTermination,
                Self::BudgetExceeded,
            ],
            Self::ConsensusReached | Self::ForcedTermination | Self::BudgetExceeded => &[],
        }
    }
}

impl std::fmt::Display for DebatePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::ConsensusReached => write!(f, "consensus_reached"),
            Self::ForcedTermination => write!(f, "forced_termination"),
            Self::BudgetExceeded => write!(f, "budget_exceeded"),
        }
    }
}

/// One turn in emission order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(bound(serialize = "S: Stance", deserialize = "S: Stance"))]
pub struct TurnRecord<S: Stance> {
    pub stance: S,
    /// Round the turn belongs to (1-indexed).
    pub round: u32,
    pub content: String,
    /// The turn function failed and an empty turn was recorded instead.
    #[serde(default)]
    pub failed: bool,
}

/// A phase transition record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseTransition {
    pub from: DebatePhase,
    pub to: DebatePhase,
    /// `round_count` at the moment of the transition.
    pub round: u32,
    pub reason: String,
    pub timestamp: DateTime<Utc>,
}

/// Rejected debate phase change.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid transition {from} → {to}: {reason}")]
pub struct TransitionError {
    pub from: DebatePhase,
    pub to: DebatePhase,
    pub reason: String,
}

/// State of one debate instance, parameterized by its stance set.
///
/// Histories and the transcript only grow; `round_count` only increases.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(bound(serialize = "S: Stance", deserialize = "S: Stance"))]
pub struct DebateState<S: Stance> {
    pub phase: DebatePhase,
    pub max_rounds: u32,
    /// Completed full rounds.
    pub round_count: u32,
    /// Per-stance turns in insertion order.
    pub histories: BTreeMap<S, Vec<String>>,
    /// Most recent turn per stance.
    pub current_response: BTreeMap<S, String>,
    /// All turns in emission order.
    pub transcript: Vec<TurnRecord<S>>,
    /// Empty until a judge has ruled on a terminal debate.
    #[serde(default)]
    pub judge_decision: String,
    #[serde(default)]
    pub transitions: Vec<PhaseTransition>,
    pub created_at: DateTime<Utc>,
}

impl<S: Stance> DebateState<S> {
    pub fn new(max_rounds: u32) -> Self {
        Self {
            phase: DebatePhase::Active,
            max_rounds,
            round_count: 0,
            histories: BTreeMap::new(),
            current_response: BTreeMap::new(),
            transcript: Vec::new(),
            judge_decision: String::new(),
            transitions: Vec::new(),
            created_at: Utc::now(),
        }
    }

    /// Append a turn to the stance's history and the shared transcript.
    pub fn record_turn(&mut self, stance: S, content: String, failed: bool) {
        self.histories
            .entry(stance)
            .or_default()
            .push(content.clone());
        self.current_response.insert(stance, content.clone());
        self.transcript.push(TurnRecord {
            stance,
            round: self.round_count + 1,
            content,
            failed,
        });
    }

    /// Close the current round. Returns the new round count.
    pub fn complete_round(&mut self) -> u32 {
        self.round_count += 1;
        self.round_count
    }

    pub fn transition(&mut self, to: DebatePhase, reason: &str) -> Result<(), TransitionError> {
        if !self.phase.valid_transitions().contains(&to) {
            return Err(TransitionError {
                from: self.phase,
                to,
                reason: format!(
                    "not a valid transition (allowed: {:?})",
                    self.phase.valid_transitions()
                ),
            });
        }

        self.transitions.push(PhaseTransition {
            from: self.phase,
            to,
            round: self.round_count,
            reason: reason.to_string(),
            timestamp: Utc::now(),
        });
        self.phase = to;
        Ok(())
    }

    pub fn is_terminal(&self) -> bool {
        self.phase.is_terminal()
    }

    pub fn is_judged(&self) -> bool {
        !self.judge_decision.is_empty()
    }

    pub fn has_rounds_remaining(&self) -> bool {
        self.round_count < self.max_rounds
    }

    pub fn history(&self, stance: S) -> &[String] {
        self.histories.get(&stance).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn failed_turns(&self) -> usize {
        self.transcript.iter().filter(|t| t.failed).count()
    }

    /// Whole transcript as `stance: content` lines.
    pub fn transcript_text(&self) -> String {
        render(self.transcript.iter())
    }

    /// Combined text of one round (1-indexed).
    pub fn round_text(&self, round: u32) -> String {
        render(self.transcript.iter().filter(|t| t.round == round))
    }

    /// Combined text of the most recently completed round.
    pub fn latest_round_text(&self) -> String {
        if self.round_count == 0 {
            return String::new();
        }
        self.round_text(self.round_count)
    }

    pub fn status_line(&self) -> String {
        format!(
            "[{}] {} round {}/{} | {} turns ({} failed) | judged={}",
            self.phase,
            S::debate_name(),
            self.round_count,
            self.max_rounds,
            self.transcript.len(),
            self.failed_turns(),
            self.is_judged()
        )
    }
}

fn render<'a, S: Stance>(turns: impl Iterator<Item = &'a TurnRecord<S>>) -> String {
    turns
        .map(|t| format!("{}: {}", t.stance, t.content))
        .collect::<Vec<_>>()
        .join("\n")
}
