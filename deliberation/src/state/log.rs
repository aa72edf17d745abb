//! Append-only audit log carried inside the shared state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::graph::NodeId;

/// Category of an audit entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogKind {
    /// A node returned and its update was merged.
    NodeCompleted,
    /// A node failed; the run halts.
    NodeFailure,
    /// A debate turn failed and was recorded as an empty turn.
    TurnFailure,
    /// An analyst report was accepted without retrieval evidence.
    DegradedInput,
    /// A debate left the active phase.
    DebateTerminated,
    /// The step budget ran out; the run halts.
    BudgetExceeded,
    /// A snapshot could not be persisted.
    CheckpointFailure,
    /// Routing returned halt after the final node.
    RunCompleted,
}

impl std::fmt::Display for LogKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NodeCompleted => write!(f, "node_completed"),
            Self::NodeFailure => write!(f, "node_failure"),
            Self::TurnFailure => write!(f, "turn_failure"),
            Self::DegradedInput => write!(f, "degraded_input"),
            Self::DebateTerminated => write!(f, "debate_terminated"),
            Self::BudgetExceeded => write!(f, "budget_exceeded"),
            Self::CheckpointFailure => write!(f, "checkpoint_failure"),
            Self::RunCompleted => write!(f, "run_completed"),
        }
    }
}

/// One (action, timestamp) audit record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Position in the log; assigned on append, starts at 1.
    pub seq: u64,
    pub timestamp: DateTime<Utc>,
    pub kind: LogKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node: Option<NodeId>,
    pub action: String,
}

impl LogEntry {
    pub fn new(kind: LogKind, action: impl Into<String>) -> Self {
        Self {
            seq: 0,
            timestamp: Utc::now(),
            kind,
            node: None,
            action: action.into(),
        }
    }

    pub fn with_node(mut self, node: NodeId) -> Self {
        self.node = Some(node);
        self
    }
}

impl std::fmt::Display for LogEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.node {
            Some(node) => write!(
                f,
                "#{} {} [{}] {}: {}",
                self.seq,
                self.timestamp.to_rfc3339(),
                self.kind,
                node,
                self.action
            ),
            None => write!(
                f,
                "#{} {} [{}] {}",
                self.seq,
                self.timestamp.to_rfc3339(),
                self.kind,
                self.action
            ),
        }
    }
}
