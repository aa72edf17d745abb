//! Pipeline graph: node identities, routing, the executor, and the nodes.

pub mod executor;
pub mod nodes;
pub mod routing;

pub use executor::{GraphExecutor, Node, RunOutcome, TerminationReason};
pub use nodes::{
    AnalystsNode, DebateRoundNode, DebateSlot, FinalArbiterNode, JudgeNode, TraderNode,
};
pub use routing::{is_legal_transition, pipeline_route, NodeId, Router, RoutingDecision};
