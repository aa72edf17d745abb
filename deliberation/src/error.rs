//! Error taxonomy for the deliberation core.
//!
//! | Error               | Fatal to run | Where it is absorbed                    |
//! |---------------------|--------------|-----------------------------------------|
//! | `CollaboratorError` | no           | turn / analyst level, or wrapped below  |
//! | `NodeError`         | yes          | executor → `TerminationReason::NodeFailure` |
//! | `StateError`        | yes          | executor merge step → `NodeFailure`     |
//! | `CheckpointError`   | no (save)    | logged by the executor; fatal on resume |
//! | `ConfigError`       | yes          | pipeline construction                   |
//!
//! Degraded analyst input and failed debate turns are not errors at this
//! level: they are recorded in the shared state's append log.

use std::time::Duration;

use thiserror::Error;

use crate::debate::DebateError;
use crate::graph::NodeId;
use crate::state::StateField;

/// Failure of an external collaborator call (reasoning, data retrieval, scoring).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CollaboratorError {
    #[error("request failed: {0}")]
    RequestFailed(String),

    #[error("call timed out after {0:?}")]
    Timeout(Duration),

    #[error("empty response from {0}")]
    EmptyResponse(String),

    #[error("collaborator unavailable: {0}")]
    Unavailable(String),

    #[error("response parse error: {0}")]
    ParseError(String),
}

impl CollaboratorError {
    /// Whether a retry could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::RequestFailed(_) | Self::Timeout(_))
    }
}

/// Unrecoverable failure of a pipeline node.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NodeError {
    #[error(transparent)]
    Collaborator(#[from] CollaboratorError),

    #[error("missing input: {0}")]
    MissingInput(String),

    #[error("node panicked: {0}")]
    Panicked(String),

    #[error("node timed out after {0:?}")]
    TimedOut(Duration),

    #[error("no node registered for {0}")]
    NotRegistered(NodeId),

    #[error("illegal route {from} → {to}")]
    IllegalRoute { from: NodeId, to: NodeId },

    #[error(transparent)]
    Debate(#[from] DebateError),

    #[error(transparent)]
    State(#[from] StateError),
}

impl NodeError {
    pub fn missing(what: impl Into<String>) -> Self {
        Self::MissingInput(what.into())
    }
}

/// Best-effort text of a caught panic payload.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Rejected merge of a node's partial update into the shared state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StateError {
    #[error("state is sealed; the run has already terminated")]
    Sealed,

    #[error("node {node} does not own field {field}")]
    OwnershipViolation { node: NodeId, field: StateField },

    #[error("append-only invariant violated on {field}: {reason}")]
    AppendOnlyViolation { field: StateField, reason: String },
}

/// Checkpoint persistence failure.
#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("snapshot version mismatch: expected {expected}, found {found}")]
    VersionMismatch { expected: u32, found: u32 },

    #[error("no snapshot stored for run {0}")]
    NotFound(String),

    #[error("invalid run id {0:?}")]
    InvalidRunId(String),

    #[error("run {0} already terminated; sealed snapshots cannot be resumed")]
    AlreadyTerminated(String),

    #[error("snapshot failed integrity check: {0}")]
    Corrupted(String),

    #[error("no checkpoint store configured")]
    NoStore,
}

/// Invalid run or pipeline configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("pipeline is missing a collaborator: {0}")]
    MissingCollaborator(&'static str),
}

impl ConfigError {
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::Invalid(message.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collaborator_error_transient() {
        assert!(CollaboratorError::RequestFailed("503".into()).is_transient());
        assert!(CollaboratorError::Timeout(Duration::from_secs(1)).is_transient());
        assert!(!CollaboratorError::EmptyResponse("judge".into()).is_transient());
        assert!(!CollaboratorError::Unavailable("no key".into()).is_transient());
    }

    #[test]
    fn test_node_error_display() {
        let err = NodeError::from(CollaboratorError::RequestFailed("boom".into()));
        assert_eq!(err.to_string(), "request failed: boom");

        let err = NodeError::IllegalRoute {
            from: NodeId::Trader,
            to: NodeId::Analysts,
        };
        assert!(err.to_string().contains("trader"));
        assert!(err.to_string().contains("analysts"));

        let err = NodeError::missing("investment plan");
        assert!(err.to_string().contains("investment plan"));
    }

    #[test]
    fn test_panic_message() {
        let payload: Box<dyn std::any::Any + Send> = Box::new("boom");
        assert_eq!(panic_message(payload.as_ref()), "boom");
        let payload: Box<dyn std::any::Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(payload.as_ref()), "bang");
        let payload: Box<dyn std::any::Any + Send> = Box::new(7_u8);
        assert_eq!(panic_message(payload.as_ref()), "non-string panic payload");
    }

    #[test]
    fn test_state_error_display() {
        let err = StateError::OwnershipViolation {
            node: NodeId::Trader,
            field: StateField::FinalDecision,
        };
        assert!(err.to_string().contains("final_decision"));
        assert!(StateError::Sealed.to_string().contains("sealed"));
    }

    #[test]
    fn test_checkpoint_error_display() {
        let err = CheckpointError::VersionMismatch {
            expected: 1,
            found: 9,
        };
        assert!(err.to_string().contains("version mismatch"));
        let err = CheckpointError::AlreadyTerminated("r-1".into());
        assert!(err.to_string().contains("r-1"));
    }
}
