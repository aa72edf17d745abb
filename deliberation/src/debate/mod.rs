//! Bounded Debates: Research and Risk
//!
//! One generic coordinator drives both debates of the pipeline: the
//! research debate (bull vs. bear) and the risk debate (aggressive,
//! conservative, neutral). Each instance is bounded by a circuit breaker
//! on the round count and may stop early on heuristic consensus.
//!
//! # Debate Flow
//!
//! ```text
//! Active ──round──▶ [consensus on latest round?]
//!   ▲                   │
//!   │                   ├─ Yes ───────────────▶ ConsensusReached ─┐
//!   │                   ├─ No, rounds left ─┐                     ├─▶ judge (once)
//!   │                   └─ No, at cap ──────┼─▶ ForcedTermination ┘
//!   └───────────────────────────────────────┘
//!
//!   step budget exhausted while Active ──▶ BudgetExceeded (never judged)
//! ```

pub mod consensus;
pub mod coordinator;
pub mod guardrails;
pub mod state;

pub use consensus::{ConsensusDetector, ConsensusSignal};
pub use coordinator::{
    ensure_judgeable, judge_debate, Briefing, DebateCoordinator, DebateError, RoundReport,
    StanceAgent, TurnContext, TurnFailure,
};
pub use guardrails::{BreakerOutcome, CircuitBreaker};
pub use state::{
    DebatePhase, DebateState, PhaseTransition, ResearchStance, RiskStance, Stance,
    TransitionError, TurnRecord,
};
