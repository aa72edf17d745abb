//! Debate coordinator: drives bounded rounds for any stance set.
//!
//! Ties together the state machine, consensus detector, and circuit breaker.
//! One call to [`DebateCoordinator::run_round`] plays one full round: every
//! stance speaks once, in fixed order, each seeing the turns already emitted.
//! A failing turn is recorded as an empty turn and reported back, never
//! propagated.

use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use futures::FutureExt;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::consensus::ConsensusDetector;
use super::guardrails::{BreakerOutcome, CircuitBreaker};
use super::state::{DebatePhase, DebateState, Stance, TransitionError};
use crate::collaborators::QualityScorer;
use crate::config::DebateSettings;
use crate::error::{panic_message, CollaboratorError, ConfigError};
use crate::synthesis::JudgeSynthesizer;

/// Read-only material every participant and the judge argue from.
#[derive(Debug, Clone, PartialEq)]
pub struct Briefing {
    pub subject: String,
    pub trade_date: NaiveDate,
    /// Reports, plans, or whatever the debate is about.
    pub context: String,
}

/// What a stance sees when it is asked to speak.
#[derive(Debug)]
pub struct TurnContext<'a, S: Stance> {
    pub stance: S,
    /// Round being played (1-indexed).
    pub round: u32,
    pub briefing: &'a Briefing,
    /// Debate so far, including earlier turns of this round.
    pub debate: &'a DebateState<S>,
}

impl<S: Stance> TurnContext<'_, S> {
    /// Latest turn of every other stance.
    pub fn opponents_latest(&self) -> Vec<(S, &str)> {
        self.debate
            .current_response
            .iter()
            .filter(|(s, _)| **s != self.stance)
            .map(|(s, text)| (*s, text.as_str()))
            .collect()
    }
}

/// A participant arguing one stance.
#[async_trait]
pub trait StanceAgent<S: Stance>: Send + Sync {
    async fn take_turn(&self, ctx: &TurnContext<'_, S>) -> Result<String, CollaboratorError>;
}

/// A turn that errored, panicked, or timed out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnFailure<S: Stance> {
    pub stance: S,
    pub round: u32,
    pub cause: String,
}

impl<S: Stance> std::fmt::Display for TurnFailure<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} turn failed in {} round {}: {}",
            self.stance,
            S::debate_name(),
            self.round,
            self.cause
        )
    }
}

/// Result of one coordinator round.
#[derive(Debug, Clone, PartialEq)]
pub struct RoundReport<S: Stance> {
    /// `round_count` after the round (unchanged when the debate was skipped).
    pub round: u32,
    pub failures: Vec<TurnFailure<S>>,
    pub quality_score: Option<f64>,
    pub outcome: BreakerOutcome,
}

impl<S: Stance> RoundReport<S> {
    /// Phase the debate entered because of this round, if any.
    pub fn terminated(&self) -> Option<DebatePhase> {
        self.outcome.target_phase()
    }
}

/// Debate misuse or judge failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DebateError {
    #[error("{debate} debate already terminated ({phase})")]
    AlreadyTerminated {
        debate: &'static str,
        phase: DebatePhase,
    },

    #[error("{debate} debate is still active; only a terminated debate can be judged")]
    NotTerminated { debate: &'static str },

    #[error("{debate} debate ended in {phase}; nothing to judge")]
    NotJudgeable {
        debate: &'static str,
        phase: DebatePhase,
    },

    #[error("{debate} debate has already been judged")]
    AlreadyJudged { debate: &'static str },

    #[error("judge call failed: {0}")]
    Judge(#[from] CollaboratorError),

    #[error(transparent)]
    Transition(#[from] TransitionError),
}

/// Generic bounded-debate driver. Instantiated once per stance set.
pub struct DebateCoordinator<S: Stance> {
    agents: BTreeMap<S, Arc<dyn StanceAgent<S>>>,
    detector: ConsensusDetector,
    breaker: CircuitBreaker,
    scorer: Option<Arc<dyn QualityScorer>>,
    turn_timeout: Option<Duration>,
}

impl<S: Stance> DebateCoordinator<S> {
    pub fn new(settings: &DebateSettings) -> Self {
        Self {
            agents: BTreeMap::new(),
            detector: ConsensusDetector::new(&settings.consensus),
            breaker: CircuitBreaker::new(settings.max_rounds),
            scorer: None,
            turn_timeout: settings.turn_timeout(),
        }
    }

    pub fn with_agent(mut self, stance: S, agent: Arc<dyn StanceAgent<S>>) -> Self {
        self.agents.insert(stance, agent);
        self
    }

    pub fn with_scorer(mut self, scorer: Arc<dyn QualityScorer>) -> Self {
        self.scorer = Some(scorer);
        self
    }

    /// Every stance in the speaking order must have an agent.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for stance in S::speaking_order() {
            if !self.agents.contains_key(stance) {
                return Err(ConfigError::invalid(format!(
                    "{} debate has no agent for stance {}",
                    S::debate_name(),
                    stance
                )));
            }
        }
        Ok(())
    }

    pub fn max_rounds(&self) -> u32 {
        self.breaker.max_rounds()
    }

    /// Fresh debate state for a new instance of this debate.
    pub fn open(&self) -> DebateState<S> {
        DebateState::new(self.breaker.max_rounds())
    }

    /// Play one full round and evaluate consensus and the round cap.
    pub async fn run_round(
        &self,
        debate: &mut DebateState<S>,
        briefing: &Briefing,
    ) -> Result<RoundReport<S>, DebateError> {
        if debate.is_terminal() {
            return Err(DebateError::AlreadyTerminated {
                debate: S::debate_name(),
                phase: debate.phase,
            });
        }

        if self.breaker.trips_before_start() {
            let outcome = BreakerOutcome::MaxRoundsExceeded {
                rounds: debate.round_count,
                max_rounds: 0,
            };
            debate.transition(DebatePhase::ForcedTermination, "max_rounds is zero; debate skipped")?;
            info!(debate = S::debate_name(), "debate skipped, forced termination");
            return Ok(RoundReport {
                round: debate.round_count,
                failures: Vec::new(),
                quality_score: None,
                outcome,
            });
        }

        let round = debate.round_count + 1;
        let mut failures = Vec::new();

        for &stance in S::speaking_order() {
            let result = match self.agents.get(&stance) {
                Some(agent) => {
                    let ctx = TurnContext {
                        stance,
                        round,
                        briefing,
                        debate: &*debate,
                    };
                    self.invoke(agent.as_ref(), &ctx).await
                }
                None => Err(format!("no agent registered for {}", stance)),
            };

            match result {
                Ok(text) => {
                    debug!(debate = S::debate_name(), round, stance = %stance, chars = text.len(), "turn recorded");
                    debate.record_turn(stance, text, false);
                }
                Err(cause) => {
                    let failure = TurnFailure {
                        stance,
                        round,
                        cause,
                    };
                    warn!(debate = S::debate_name(), round, stance = %stance, cause = %failure.cause, "turn failed, recording empty turn");
                    debate.record_turn(stance, String::new(), true);
                    failures.push(failure);
                }
            }
        }

        let completed = debate.complete_round();
        let quality_score = self.score_round(debate).await;
        let signal = self.detector.evaluate_latest(debate, quality_score);
        let outcome = self.breaker.evaluate(completed, &signal);

        if let Some(phase) = outcome.target_phase() {
            debate.transition(phase, &outcome.to_string())?;
            info!(debate = S::debate_name(), round = completed, phase = %phase, outcome = %outcome, "debate terminated");
        } else {
            debug!(debate = S::debate_name(), round = completed, "no consensus, continuing");
        }

        Ok(RoundReport {
            round: completed,
            failures,
            quality_score,
            outcome,
        })
    }

    async fn invoke(
        &self,
        agent: &dyn StanceAgent<S>,
        ctx: &TurnContext<'_, S>,
    ) -> Result<String, String> {
        let call = AssertUnwindSafe(agent.take_turn(ctx)).catch_unwind();
        let joined = match self.turn_timeout {
            Some(limit) => match tokio::time::timeout(limit, call).await {
                Ok(joined) => joined,
                Err(_) => return Err(format!("turn timed out after {:?}", limit)),
            },
            None => call.await,
        };
        match joined {
            Ok(Ok(text)) => Ok(text),
            Ok(Err(e)) => Err(e.to_string()),
            Err(payload) => Err(format!("turn panicked: {}", panic_message(payload.as_ref()))),
        }
    }

    async fn score_round(&self, debate: &DebateState<S>) -> Option<f64> {
        let scorer = self.scorer.as_ref()?;
        if !self.detector.wants_quality_score(debate.round_count) {
            return None;
        }
        let text = debate.latest_round_text();
        let scored = match self.turn_timeout {
            Some(limit) => tokio::time::timeout(limit, scorer.score(&text))
                .await
                .unwrap_or(Err(CollaboratorError::Timeout(limit))),
            None => scorer.score(&text).await,
        };
        match scored {
            Ok(score) => Some(score),
            Err(e) => {
                warn!(debate = S::debate_name(), round = debate.round_count, error = %e, "quality scoring failed, ignoring");
                None
            }
        }
    }
}

/// A debate can be judged once, and only after a consensus or forced ending.
pub fn ensure_judgeable<S: Stance>(debate: &DebateState<S>) -> Result<(), DebateError> {
    if !debate.is_terminal() {
        return Err(DebateError::NotTerminated {
            debate: S::debate_name(),
        });
    }
    if !debate.phase.is_judgeable() {
        return Err(DebateError::NotJudgeable {
            debate: S::debate_name(),
            phase: debate.phase,
        });
    }
    if debate.is_judged() {
        return Err(DebateError::AlreadyJudged {
            debate: S::debate_name(),
        });
    }
    Ok(())
}

/// Rule on a terminated debate. Writes `judge_decision` exactly once.
pub async fn judge_debate<S: Stance>(
    debate: &mut DebateState<S>,
    briefing: &Briefing,
    judge: &JudgeSynthesizer,
) -> Result<String, DebateError> {
    ensure_judgeable(debate)?;
    let decision = judge.synthesize(debate, briefing).await?;
    debate.judge_decision = decision.clone();
    info!(debate = S::debate_name(), rounds = debate.round_count, phase = %debate.phase, "judge decision recorded");
    Ok(decision)
}
