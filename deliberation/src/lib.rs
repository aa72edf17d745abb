//! Deliberation core for single-subject trading decisions.
//!
//! A run moves one subject and reference date through a fixed pipeline:
//!
//! ```text
//! analysts (fan-out) → research debate ⟲ → research judge → trader
//!                    → risk debate ⟲ → risk judge → final arbiter → halt
//! ```
//!
//! # Pieces
//!
//! - [`graph::GraphExecutor`]: explicit FSM loop over a [`state::SharedState`],
//!   bounded by a step budget, with per-node timeout, panic capture, and
//!   checkpointing after every merge.
//! - [`analysts::AnalystDispatcher`] and [`analysts::ToolInvocationGuard`]:
//!   concurrent analyst tasks, each required to show data-retrieval evidence
//!   or be flagged degraded.
//! - [`debate::DebateCoordinator`]: one generic bounded debate, instantiated
//!   for bull/bear research and aggressive/conservative/neutral risk, with a
//!   consensus detector and a round-cap circuit breaker.
//! - [`synthesis`]: judge, trader, and final arbiter reasoning calls.
//! - [`checkpoint`]: JSON snapshots and resume.
//!
//! The crate performs no network or file access of its own beyond
//! [`checkpoint::JsonFileStore`]; models and data feeds come in through the
//! traits in [`collaborators`].
//!
//! # Usage
//!
//! ```ignore
//! let pipeline = TradingPipeline::builder(RunConfig::default())
//!     .quick_reasoning(quick)
//!     .deep_reasoning(deep)
//!     .data_source(data)
//!     .analyst(market)
//!     .research_agent(ResearchStance::Bull, bull)
//!     .research_agent(ResearchStance::Bear, bear)
//!     // ... one agent per risk stance
//!     .build()?;
//! let outcome = pipeline.propagate("NVDA", date).await?;
//! println!("{}", outcome.summary_line());
//! ```

#![allow(clippy::uninlined_format_args)]

pub mod analysts;
pub mod checkpoint;
pub mod collaborators;
pub mod config;
pub mod debate;
pub mod error;
pub mod graph;
pub mod pipeline;
pub mod signal;
pub mod state;
pub mod synthesis;

pub use analysts::{AnalystContext, AnalystTask, ToolBox};
pub use checkpoint::{CheckpointStore, JsonFileStore, MemoryStore, RunSnapshot};
pub use collaborators::{ContextRefs, DataKind, DataRetrieval, QualityScorer, ReasoningCall};
pub use config::{ConsensusSettings, DebateSettings, RunConfig};
pub use debate::{
    DebatePhase, DebateState, ResearchStance, RiskStance, Stance, StanceAgent, TurnContext,
};
pub use error::{CheckpointError, CollaboratorError, ConfigError, NodeError, StateError};
pub use graph::{NodeId, RunOutcome, TerminationReason};
pub use pipeline::{PipelineBuilder, TradingPipeline};
pub use signal::{extract_signal, Signal};
pub use state::{
    is_valid_subject, AnalystKind, AnalystReport, LogEntry, LogKind, ReportStatus, SharedState,
};
