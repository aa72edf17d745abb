//! Round-cap circuit breaker for debates.

use serde::{Deserialize, Serialize};

use super::consensus::ConsensusSignal;
use super::state::DebatePhase;

/// Verdict of the breaker after a completed round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum BreakerOutcome {
    /// Keep debating.
    Continue,
    /// Stop: the detector fired on the round just completed.
    Consensus(ConsensusSignal),
    /// Stop: round cap reached without consensus.
    MaxRoundsExceeded { rounds: u32, max_rounds: u32 },
}

impl BreakerOutcome {
    pub fn should_stop(&self) -> bool {
        !matches!(self, Self::Continue)
    }

    /// Phase the debate moves to, if it stops.
    pub fn target_phase(&self) -> Option<DebatePhase> {
        match self {
            Self::Continue => None,
            Self::Consensus(_) => Some(DebatePhase::ConsensusReached),
            Self::MaxRoundsExceeded { .. } => Some(DebatePhase::ForcedTermination),
        }
    }
}

impl std::fmt::Display for BreakerOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Continue => write!(f, "continue"),
            Self::Consensus(signal) => write!(f, "consensus: {}", signal),
            Self::MaxRoundsExceeded { rounds, max_rounds } => {
                write!(f, "max_rounds_exceeded ({}/{})", rounds, max_rounds)
            }
        }
    }
}

/// Hard cutoff independent of consensus detection.
#[derive(Debug, Clone, Copy)]
pub struct CircuitBreaker {
    max_rounds: u32,
}

impl CircuitBreaker {
    pub fn new(max_rounds: u32) -> Self {
        Self { max_rounds }
    }

    pub fn max_rounds(&self) -> u32 {
        self.max_rounds
    }

    /// Whether a debate may not even start. A cap of zero skips the debate.
    pub fn trips_before_start(&self) -> bool {
        self.max_rounds == 0
    }

    /// Evaluate after a completed round. Consensus on the round wins over
    /// the cap when both apply.
    pub fn evaluate(&self, round_count: u32, signal: &ConsensusSignal) -> BreakerOutcome {
        if signal.is_consensus() {
            return BreakerOutcome::Consensus(signal.clone());
        }
        if round_count >= self.max_rounds {
            return BreakerOutcome::MaxRoundsExceeded {
                rounds: round_count,
                max_rounds: self.max_rounds,
            };
        }
        BreakerOutcome::Continue
    }
}
