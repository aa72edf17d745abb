//! Graph executor: the explicit finite-state loop that drives a run.
//!
//! ```text
//! loop {
//!     route(state) ── Halt ──────────────▶ finish(Completed)
//!        │ Next(node)
//!     steps < budget? ── no ─────────────▶ finish(BudgetExceeded)
//!     legal edge & registered? ── no ────▶ finish(NodeFailure)
//!     invoke(node) under timeout + panic capture
//!     merge(update) ── rejected/failed ──▶ finish(NodeFailure)
//!     checkpoint
//! }
//! ```
//!
//! The executor owns the state for the whole run. Nodes see it read-only and
//! return partial updates; exactly one merge happens between one node's
//! completion and the next node's dispatch.

use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::routing::{is_legal_transition, NodeId, Router, RoutingDecision};
use crate::checkpoint::{validate_snapshot, CheckpointStore, RunSnapshot};
use crate::error::{panic_message, CheckpointError, NodeError};
use crate::state::{LogEntry, LogKind, SharedState, StateUpdate};

/// One pipeline step: reads the state, returns a partial update.
#[async_trait]
pub trait Node: Send + Sync {
    fn id(&self) -> NodeId;

    async fn run(&self, state: &SharedState) -> Result<StateUpdate, NodeError>;
}

/// Why a run stopped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum TerminationReason {
    /// Routing returned halt.
    Completed,
    /// The step budget ran out before routing halted.
    BudgetExceeded { steps: u32, budget: u32 },
    /// A node failed, or its update was rejected.
    NodeFailure { node: NodeId, cause: String },
}

impl TerminationReason {
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed)
    }
}

impl std::fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Completed => write!(f, "completed"),
            Self::BudgetExceeded { steps, budget } => {
                write!(f, "budget_exceeded ({}/{} steps)", steps, budget)
            }
            Self::NodeFailure { node, cause } => write!(f, "node_failure ({}): {}", node, cause),
        }
    }
}

/// Always-well-formed result of a run: final state plus reason.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunOutcome {
    pub state: SharedState,
    pub reason: TerminationReason,
    /// Node invocations performed, including those before a resume.
    pub steps: u32,
}

impl RunOutcome {
    pub fn summary_line(&self) -> String {
        let decision = self
            .state
            .final_signal
            .map(|s| s.to_string())
            .unwrap_or_else(|| "none".to_string());
        format!(
            "[{}] {} steps | run={} | {} @ {} | signal={}",
            self.reason,
            self.steps,
            self.state.run_id,
            self.state.subject,
            self.state.trade_date,
            decision
        )
    }
}

/// Drives nodes by routing over the shared state, under a step budget.
pub struct GraphExecutor {
    nodes: BTreeMap<NodeId, Arc<dyn Node>>,
    router: Router,
    node_timeout: Option<Duration>,
    store: Option<Arc<dyn CheckpointStore>>,
}

impl GraphExecutor {
    pub fn new(router: Router) -> Self {
        Self {
            nodes: BTreeMap::new(),
            router,
            node_timeout: None,
            store: None,
        }
    }

    pub fn with_node(mut self, node: Arc<dyn Node>) -> Self {
        self.nodes.insert(node.id(), node);
        self
    }

    pub fn with_node_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.node_timeout = timeout;
        self
    }

    pub fn with_store(mut self, store: Arc<dyn CheckpointStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn registered(&self) -> Vec<NodeId> {
        self.nodes.keys().copied().collect()
    }

    /// Run from a fresh state until halt, failure, or budget exhaustion.
    pub async fn run(&self, state: SharedState, step_budget: u32) -> RunOutcome {
        info!(run_id = %state.run_id, subject = %state.subject, date = %state.trade_date, step_budget, "run started");
        self.drive(state, 0, None, step_budget).await
    }

    /// Continue a run from its latest snapshot. Steps already taken count
    /// against `step_budget`.
    pub async fn resume(&self, run_id: &str, step_budget: u32) -> Result<RunOutcome, CheckpointError> {
        let store = self.store.as_ref().ok_or(CheckpointError::NoStore)?;
        let snapshot = store.load(run_id)?;
        if snapshot.is_terminal() {
            return Err(CheckpointError::AlreadyTerminated(run_id.to_string()));
        }
        validate_snapshot(&snapshot)?;
        info!(run_id, steps = snapshot.steps, last_node = ?snapshot.last_node, step_budget, "run resumed");
        Ok(self
            .drive(snapshot.state, snapshot.steps, snapshot.last_node, step_budget)
            .await)
    }

    async fn drive(
        &self,
        mut state: SharedState,
        mut steps: u32,
        mut last: Option<NodeId>,
        budget: u32,
    ) -> RunOutcome {
        loop {
            let next = match (self.router)(&state) {
                RoutingDecision::Halt => {
                    return self.finish(state, steps, last, TerminationReason::Completed)
                }
                RoutingDecision::Next(node) => node,
            };

            if steps >= budget {
                let reason = TerminationReason::BudgetExceeded { steps, budget };
                return self.finish(state, steps, last, reason);
            }

            if !is_legal_transition(last, next) {
                let from = last.unwrap_or(next);
                let cause = NodeError::IllegalRoute { from, to: next };
                return self.fail(state, steps, last, next, cause);
            }

            let Some(node) = self.nodes.get(&next) else {
                return self.fail(state, steps, last, next, NodeError::NotRegistered(next));
            };

            steps += 1;
            debug!(node = %next, step = steps, "invoking node");
            let merged = match self.invoke(node.as_ref(), &state).await {
                Ok(update) => state.apply(next, update).map_err(NodeError::from),
                Err(e) => Err(e),
            };
            if let Err(cause) = merged {
                return self.fail(state, steps, last, next, cause);
            }

            state.append(
                LogEntry::new(LogKind::NodeCompleted, format!("step {}", steps)).with_node(next),
            );
            info!(node = %next, step = steps, budget, "node completed");
            last = Some(next);
            self.checkpoint(&mut state, steps, last);
        }
    }

    async fn invoke(&self, node: &dyn Node, state: &SharedState) -> Result<StateUpdate, NodeError> {
        let call = AssertUnwindSafe(node.run(state)).catch_unwind();
        let joined = match self.node_timeout {
            Some(limit) => tokio::time::timeout(limit, call)
                .await
                .map_err(|_| NodeError::TimedOut(limit))?,
            None => call.await,
        };
        joined.map_err(|payload| NodeError::Panicked(panic_message(payload.as_ref())))?
    }

    fn fail(
        &self,
        state: SharedState,
        steps: u32,
        last: Option<NodeId>,
        node: NodeId,
        cause: NodeError,
    ) -> RunOutcome {
        warn!(node = %node, step = steps, error = %cause, "node failed, halting run");
        let reason = TerminationReason::NodeFailure {
            node,
            cause: cause.to_string(),
        };
        self.finish(state, steps, last, reason)
    }

    /// Log the terminal entry, seal, and take the final snapshot.
    fn finish(
        &self,
        mut state: SharedState,
        steps: u32,
        last: Option<NodeId>,
        reason: TerminationReason,
    ) -> RunOutcome {
        match &reason {
            TerminationReason::Completed => {
                state.append(LogEntry::new(
                    LogKind::RunCompleted,
                    format!("halted after {} steps", steps),
                ));
            }
            TerminationReason::BudgetExceeded { steps, budget } => {
                state.append(LogEntry::new(
                    LogKind::BudgetExceeded,
                    format!("step budget exhausted ({}/{})", steps, budget),
                ));
                if state.mark_debates_budget_exceeded() > 0 {
                    state.append(LogEntry::new(
                        LogKind::DebateTerminated,
                        "active debate halted by step budget",
                    ));
                }
            }
            TerminationReason::NodeFailure { node, cause } => {
                state.append(LogEntry::new(LogKind::NodeFailure, cause.clone()).with_node(*node));
            }
        }
        state.seal();
        self.checkpoint(&mut state, steps, last);
        info!(run_id = %state.run_id, steps, reason = %reason, "run finished");
        RunOutcome {
            state,
            reason,
            steps,
        }
    }

    /// Save a snapshot; a failed save is logged and the run continues.
    fn checkpoint(&self, state: &mut SharedState, steps: u32, last: Option<NodeId>) {
        let Some(store) = &self.store else {
            return;
        };
        if let Err(e) = store.save(&RunSnapshot::capture(state, steps, last)) {
            warn!(run_id = %state.run_id, step = steps, error = %e, "checkpoint save failed");
            state.append(LogEntry::new(
                LogKind::CheckpointFailure,
                format!("snapshot at step {} not saved: {}", steps, e),
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use chrono::NaiveDate;

    use super::*;
    use crate::checkpoint::MemoryStore;
    use crate::debate::{DebatePhase, DebateState, ResearchStance};
    use crate::state::{AnalystKind, AnalystReport};

    fn state() -> SharedState {
        SharedState::with_run_id("run-1", "AMD", NaiveDate::from_ymd_opt(2024, 1, 2).unwrap())
    }

    /// Loops on the research debate forever unless the debate terminates.
    fn looping_route(state: &SharedState) -> RoutingDecision {
        if state.analyst_reports.is_empty() {
            return RoutingDecision::Next(NodeId::Analysts);
        }
        match &state.research_debate {
            Some(d) if d.is_terminal() => RoutingDecision::Halt,
            _ => RoutingDecision::Next(NodeId::ResearchDebate),
        }
    }

    fn always_trader(_state: &SharedState) -> RoutingDecision {
        RoutingDecision::Next(NodeId::Trader)
    }

    struct Reports;

    #[async_trait]
    impl Node for Reports {
        fn id(&self) -> NodeId {
            NodeId::Analysts
        }

        async fn run(&self, _state: &SharedState) -> Result<StateUpdate, NodeError> {
            let mut reports = BTreeMap::new();
            reports.insert(
                AnalystKind::Market,
                AnalystReport::ok(AnalystKind::Market, "m".into(), 1, 1),
            );
            Ok(StateUpdate {
                analyst_reports: Some(reports),
                ..Default::default()
            })
        }
    }

    /// Plays an empty round; never reaches a terminal phase.
    struct EndlessDebate(AtomicU32);

    #[async_trait]
    impl Node for EndlessDebate {
        fn id(&self) -> NodeId {
            NodeId::ResearchDebate
        }

        async fn run(&self, state: &SharedState) -> Result<StateUpdate, NodeError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            let mut debate = state
                .research_debate
                .clone()
                .unwrap_or_else(|| DebateState::<ResearchStance>::new(u32::MAX));
            debate.record_turn(ResearchStance::Bull, "again".into(), false);
            debate.complete_round();
            Ok(StateUpdate {
                research_debate: Some(debate),
                ..Default::default()
            })
        }
    }

    struct Broken;

    #[async_trait]
    impl Node for Broken {
        fn id(&self) -> NodeId {
            NodeId::Analysts
        }

        async fn run(&self, _state: &SharedState) -> Result<StateUpdate, NodeError> {
            Err(NodeError::missing("everything"))
        }
    }

    struct Panics;

    #[async_trait]
    impl Node for Panics {
        fn id(&self) -> NodeId {
            NodeId::Analysts
        }

        async fn run(&self, _state: &SharedState) -> Result<StateUpdate, NodeError> {
            panic!("node exploded");
        }
    }

    struct Hangs;

    #[async_trait]
    impl Node for Hangs {
        fn id(&self) -> NodeId {
            NodeId::Analysts
        }

        async fn run(&self, _state: &SharedState) -> Result<StateUpdate, NodeError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(StateUpdate::new())
        }
    }

    /// Writes a field it does not own.
    struct Trespasser;

    #[async_trait]
    impl Node for Trespasser {
        fn id(&self) -> NodeId {
            NodeId::Analysts
        }

        async fn run(&self, _state: &SharedState) -> Result<StateUpdate, NodeError> {
            Ok(StateUpdate {
                final_decision: Some("BUY".into()),
                ..Default::default()
            })
        }
    }

    #[tokio::test]
    async fn test_budget_bounds_invocations() {
        for budget in [0, 1, 2, 5, 17] {
            let debate = Arc::new(EndlessDebate(AtomicU32::new(0)));
            let executor = GraphExecutor::new(looping_route)
                .with_node(Arc::new(Reports))
                .with_node(debate.clone());
            let outcome = executor.run(state(), budget).await;

            assert_eq!(outcome.steps, budget);
            assert_eq!(
                outcome.reason,
                TerminationReason::BudgetExceeded {
                    steps: budget,
                    budget
                }
            );
            assert_eq!(
                debate.0.load(Ordering::SeqCst),
                budget.saturating_sub(1)
            );
            assert!(outcome.state.is_sealed());
            assert_eq!(outcome.state.log_count(LogKind::BudgetExceeded), 1);
        }
    }

    #[tokio::test]
    async fn test_budget_halt_marks_active_debate() {
        let executor = GraphExecutor::new(looping_route)
            .with_node(Arc::new(Reports))
            .with_node(Arc::new(EndlessDebate(AtomicU32::new(0))));
        let outcome = executor.run(state(), 3).await;
        let debate = outcome.state.research_debate.as_ref().unwrap();
        assert_eq!(debate.phase, DebatePhase::BudgetExceeded);
        assert_eq!(debate.round_count, 2);
        assert_eq!(outcome.state.log_count(LogKind::DebateTerminated), 1);
    }

    #[tokio::test]
    async fn test_node_error_is_node_failure() {
        let executor = GraphExecutor::new(looping_route).with_node(Arc::new(Broken));
        let outcome = executor.run(state(), 10).await;
        match &outcome.reason {
            TerminationReason::NodeFailure { node, cause } => {
                assert_eq!(*node, NodeId::Analysts);
                assert!(cause.contains("everything"));
            }
            other => panic!("unexpected reason {:?}", other),
        }
        assert_eq!(outcome.steps, 1);
        assert_eq!(outcome.state.log_count(LogKind::NodeFailure), 1);
        assert!(outcome.state.analyst_reports.is_empty());
    }

    #[tokio::test]
    async fn test_panicking_node_is_node_failure() {
        let executor = GraphExecutor::new(looping_route).with_node(Arc::new(Panics));
        let outcome = executor.run(state(), 10).await;
        assert!(outcome.reason.to_string().contains("node exploded"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_node_timeout_is_node_failure() {
        let executor = GraphExecutor::new(looping_route)
            .with_node(Arc::new(Hangs))
            .with_node_timeout(Some(Duration::from_secs(30)));
        let outcome = executor.run(state(), 10).await;
        assert!(outcome.reason.to_string().contains("timed out"));
    }

    #[tokio::test]
    async fn test_ownership_violation_is_node_failure() {
        let executor = GraphExecutor::new(looping_route).with_node(Arc::new(Trespasser));
        let outcome = executor.run(state(), 10).await;
        assert!(outcome.reason.to_string().contains("does not own"));
        assert!(outcome.state.final_decision.is_empty());
    }

    #[tokio::test]
    async fn test_unregistered_node_is_node_failure() {
        let executor = GraphExecutor::new(looping_route).with_node(Arc::new(Reports));
        let outcome = executor.run(state(), 10).await;
        assert_eq!(
            outcome.reason,
            TerminationReason::NodeFailure {
                node: NodeId::ResearchDebate,
                cause: "no node registered for research_debate".into()
            }
        );
        assert_eq!(outcome.steps, 1);
    }

    #[tokio::test]
    async fn test_illegal_route_is_node_failure() {
        struct Plan;

        #[async_trait]
        impl Node for Plan {
            fn id(&self) -> NodeId {
                NodeId::Trader
            }

            async fn run(&self, _state: &SharedState) -> Result<StateUpdate, NodeError> {
                Ok(StateUpdate {
                    trader_plan: Some("plan".into()),
                    ..Default::default()
                })
            }
        }

        let executor = GraphExecutor::new(always_trader).with_node(Arc::new(Plan));
        let outcome = executor.run(state(), 10).await;
        assert_eq!(outcome.steps, 1);
        assert!(outcome.reason.to_string().contains("illegal route trader → trader"));
    }

    #[tokio::test]
    async fn test_checkpoint_after_every_node_and_on_finish() {
        let store = Arc::new(MemoryStore::new());
        let executor = GraphExecutor::new(looping_route)
            .with_node(Arc::new(Reports))
            .with_node(Arc::new(EndlessDebate(AtomicU32::new(0))))
            .with_store(store.clone());
        executor.run(state(), 3).await;

        let history = store.history("run-1");
        assert_eq!(history.len(), 4);
        let steps: Vec<u32> = history.iter().map(|s| s.steps).collect();
        assert_eq!(steps, vec![1, 2, 3, 3]);
        assert!(history.last().unwrap().is_terminal());
        assert!(!history[2].is_terminal());
    }

    #[tokio::test]
    async fn test_resume_counts_previous_steps() {
        let store = Arc::new(MemoryStore::new());
        let executor = GraphExecutor::new(looping_route)
            .with_node(Arc::new(Reports))
            .with_node(Arc::new(EndlessDebate(AtomicU32::new(0))))
            .with_store(store.clone());
        executor.run(state(), 3).await;

        // Drop the sealed final snapshot: the run "crashed" after step 3.
        store.truncate("run-1", 3);
        let outcome = executor.resume("run-1", 5).await.unwrap();
        assert_eq!(outcome.steps, 5);
        assert_eq!(
            outcome.state.research_debate.as_ref().unwrap().round_count,
            4
        );
    }

    #[tokio::test]
    async fn test_resume_sealed_run_rejected() {
        let store = Arc::new(MemoryStore::new());
        let executor = GraphExecutor::new(looping_route)
            .with_node(Arc::new(Reports))
            .with_node(Arc::new(EndlessDebate(AtomicU32::new(0))))
            .with_store(store.clone());
        executor.run(state(), 2).await;
        let err = executor.resume("run-1", 10).await.unwrap_err();
        assert!(matches!(err, CheckpointError::AlreadyTerminated(_)));
    }

    #[tokio::test]
    async fn test_resume_without_store() {
        let executor = GraphExecutor::new(looping_route);
        let err = executor.resume("run-1", 10).await.unwrap_err();
        assert!(matches!(err, CheckpointError::NoStore));
    }

    #[test]
    fn test_termination_reason_display() {
        assert_eq!(TerminationReason::Completed.to_string(), "completed");
        let reason = TerminationReason::BudgetExceeded { steps: 2, budget: 2 };
        assert_eq!(reason.to_string(), "budget_exceeded (2/2 steps)");
    }
}
