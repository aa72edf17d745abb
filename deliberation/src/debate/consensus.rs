//! Heuristic consensus detection over the latest debate round.
//!
//! Two signals, checked in order:
//! 1. any configured phrase appears in the round's combined text
//!    (case-insensitive substring);
//! 2. an external quality score is supplied, enough rounds have completed,
//!    and the score meets the threshold.
//!
//! Neither is a semantic judgment. The circuit breaker is what guarantees
//! termination.

use serde::{Deserialize, Serialize};

use super::state::{DebateState, Stance};
use crate::config::ConsensusSettings;

/// Why the detector did or did not report consensus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "signal")]
pub enum ConsensusSignal {
    None,
    PhraseMatch { phrase: String },
    QualityThreshold { score: f64, threshold: f64 },
}

impl ConsensusSignal {
    pub fn is_consensus(&self) -> bool {
        !matches!(self, Self::None)
    }
}

impl std::fmt::Display for ConsensusSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::PhraseMatch { phrase } => write!(f, "phrase_match ({:?})", phrase),
            Self::QualityThreshold { score, threshold } => {
                write!(f, "quality_threshold ({:.2} >= {:.2})", score, threshold)
            }
        }
    }
}

/// Pure consensus heuristic. Same inputs, same answer.
#[derive(Debug, Clone)]
pub struct ConsensusDetector {
    /// Lower-cased, empty entries dropped.
    phrases: Vec<String>,
    quality_threshold: Option<f64>,
    min_quality_rounds: u32,
}

impl ConsensusDetector {
    pub fn new(settings: &ConsensusSettings) -> Self {
        Self {
            phrases: settings
                .phrases
                .iter()
                .map(|p| p.trim().to_lowercase())
                .filter(|p| !p.is_empty())
                .collect(),
            quality_threshold: settings.quality_threshold,
            min_quality_rounds: settings.min_quality_rounds,
        }
    }

    /// Whether the quality score is worth fetching for this round count.
    pub fn wants_quality_score(&self, round_count: u32) -> bool {
        self.quality_threshold.is_some() && round_count >= self.min_quality_rounds
    }

    pub fn evaluate(
        &self,
        round_text: &str,
        round_count: u32,
        quality_score: Option<f64>,
    ) -> ConsensusSignal {
        let lowered = round_text.to_lowercase();
        if let Some(phrase) = self.phrases.iter().find(|p| lowered.contains(p.as_str())) {
            return ConsensusSignal::PhraseMatch {
                phrase: phrase.clone(),
            };
        }

        if let (Some(threshold), Some(score)) = (self.quality_threshold, quality_score) {
            if round_count >= self.min_quality_rounds && score >= threshold {
                return ConsensusSignal::QualityThreshold { score, threshold };
            }
        }

        ConsensusSignal::None
    }

    pub fn detect(&self, round_text: &str, round_count: u32, quality_score: Option<f64>) -> bool {
        self.evaluate(round_text, round_count, quality_score)
            .is_consensus()
    }

    /// Evaluate the most recently completed round of a debate.
    pub fn evaluate_latest<S: Stance>(
        &self,
        debate: &DebateState<S>,
        quality_score: Option<f64>,
    ) -> ConsensusSignal {
        self.evaluate(
            &debate.latest_round_text(),
            debate.round_count,
            quality_score,
        )
    }
}
