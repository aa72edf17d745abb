//! The seven pipeline nodes.
//!
//! Every node reads the shared state and returns a partial update that only
//! touches the fields it owns. Debate nodes are generic over the stance set;
//! [`DebateSlot`] binds a stance set to its state field and node ids.

use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use super::executor::Node;
use super::routing::NodeId;
use crate::analysts::{AnalystDispatcher, AnalystTask};
use crate::debate::{
    judge_debate, Briefing, DebateCoordinator, DebateState, ResearchStance, RiskStance, Stance,
};
use crate::error::NodeError;
use crate::signal::extract_signal;
use crate::state::{LogEntry, LogKind, SharedState, StateUpdate};
use crate::synthesis::{FinalArbiter, JudgeSynthesizer, TraderSynthesizer};

/// Where a stance set's debate lives in the shared state.
pub trait DebateSlot: Stance {
    const ROUND_NODE: NodeId;
    const JUDGE_NODE: NodeId;

    fn debate(state: &SharedState) -> Option<&DebateState<Self>>;

    fn put(update: &mut StateUpdate, debate: DebateState<Self>);

    /// Material the participants and the judge argue from.
    fn briefing(state: &SharedState) -> Result<Briefing, NodeError>;
}

impl DebateSlot for ResearchStance {
    const ROUND_NODE: NodeId = NodeId::ResearchDebate;
    const JUDGE_NODE: NodeId = NodeId::ResearchJudge;

    fn debate(state: &SharedState) -> Option<&DebateState<Self>> {
        state.research_debate.as_ref()
    }

    fn put(update: &mut StateUpdate, debate: DebateState<Self>) {
        update.research_debate = Some(debate);
    }

    fn briefing(state: &SharedState) -> Result<Briefing, NodeError> {
        if state.analyst_reports.is_empty() {
            return Err(NodeError::missing("analyst reports"));
        }
        Ok(Briefing {
            subject: state.subject.clone(),
            trade_date: state.trade_date,
            context: state.reports_digest(),
        })
    }
}

impl DebateSlot for RiskStance {
    const ROUND_NODE: NodeId = NodeId::RiskDebate;
    const JUDGE_NODE: NodeId = NodeId::RiskJudge;

    fn debate(state: &SharedState) -> Option<&DebateState<Self>> {
        state.risk_debate.as_ref()
    }

    fn put(update: &mut StateUpdate, debate: DebateState<Self>) {
        update.risk_debate = Some(debate);
    }

    fn briefing(state: &SharedState) -> Result<Briefing, NodeError> {
        if state.trader_plan.is_empty() {
            return Err(NodeError::missing("trader plan"));
        }
        Ok(Briefing {
            subject: state.subject.clone(),
            trade_date: state.trade_date,
            context: format!(
                "## Trader plan\n{}\n\n## Investment plan\n{}\n\n## Analyst reports\n{}",
                state.trader_plan,
                state.investment_plan,
                state.reports_digest()
            ),
        })
    }
}

// ── Analysts ───────────────────────────────────────────────────────

/// Fans out to every configured analyst and collects one report each.
pub struct AnalystsNode {
    dispatcher: AnalystDispatcher,
    tasks: Vec<Arc<dyn AnalystTask>>,
}

impl AnalystsNode {
    pub fn new(dispatcher: AnalystDispatcher, tasks: Vec<Arc<dyn AnalystTask>>) -> Self {
        Self { dispatcher, tasks }
    }
}

#[async_trait]
impl Node for AnalystsNode {
    fn id(&self) -> NodeId {
        NodeId::Analysts
    }

    async fn run(&self, state: &SharedState) -> Result<StateUpdate, NodeError> {
        if self.tasks.is_empty() {
            return Err(NodeError::missing("analyst tasks"));
        }
        let reports = self
            .dispatcher
            .dispatch(&state.subject, state.trade_date, &self.tasks)
            .await;

        let mut update = StateUpdate::new();
        for report in reports.values().filter(|r| r.is_degraded()) {
            update = update.log(LogEntry::new(
                LogKind::DegradedInput,
                format!(
                    "{} report {}: {}",
                    report.analyst,
                    report.status,
                    report.note.as_deref().unwrap_or("no retrieval evidence")
                ),
            ));
        }
        update.analyst_reports = Some(reports);
        Ok(update)
    }
}

// ── Debates ────────────────────────────────────────────────────────

/// Plays one round of a debate per invocation; routing loops it.
pub struct DebateRoundNode<S: DebateSlot> {
    coordinator: DebateCoordinator<S>,
}

impl<S: DebateSlot> DebateRoundNode<S> {
    pub fn new(coordinator: DebateCoordinator<S>) -> Self {
        Self { coordinator }
    }
}

#[async_trait]
impl<S: DebateSlot> Node for DebateRoundNode<S> {
    fn id(&self) -> NodeId {
        S::ROUND_NODE
    }

    async fn run(&self, state: &SharedState) -> Result<StateUpdate, NodeError> {
        let briefing = S::briefing(state)?;
        let mut debate = match S::debate(state) {
            Some(existing) => existing.clone(),
            None => {
                debug!(debate = S::debate_name(), max_rounds = self.coordinator.max_rounds(), "opening debate");
                self.coordinator.open()
            }
        };

        let report = self.coordinator.run_round(&mut debate, &briefing).await?;

        let mut update = StateUpdate::new();
        for failure in &report.failures {
            update = update.log(LogEntry::new(LogKind::TurnFailure, failure.to_string()));
        }
        if let Some(phase) = report.terminated() {
            update = update.log(LogEntry::new(
                LogKind::DebateTerminated,
                format!(
                    "{} debate {} after {} round(s): {}",
                    S::debate_name(),
                    phase,
                    debate.round_count,
                    report.outcome
                ),
            ));
        }
        S::put(&mut update, debate);
        Ok(update)
    }
}

/// Rules on a terminated debate, once.
pub struct JudgeNode<S: DebateSlot> {
    judge: JudgeSynthesizer,
    _stance: PhantomData<S>,
}

impl<S: DebateSlot> JudgeNode<S> {
    pub fn new(judge: JudgeSynthesizer) -> Self {
        Self {
            judge,
            _stance: PhantomData,
        }
    }
}

#[async_trait]
impl<S: DebateSlot> Node for JudgeNode<S> {
    fn id(&self) -> NodeId {
        S::JUDGE_NODE
    }

    async fn run(&self, state: &SharedState) -> Result<StateUpdate, NodeError> {
        let mut debate = S::debate(state)
            .cloned()
            .ok_or_else(|| NodeError::missing(format!("{} debate", S::debate_name())))?;
        let briefing = S::briefing(state)?;

        let decision = judge_debate(&mut debate, &briefing, &self.judge).await?;

        let mut update = StateUpdate::new();
        if S::JUDGE_NODE == NodeId::ResearchJudge {
            update.investment_plan = Some(decision);
        }
        S::put(&mut update, debate);
        Ok(update)
    }
}

// ── Synthesizers ───────────────────────────────────────────────────

pub struct TraderNode {
    trader: TraderSynthesizer,
}

impl TraderNode {
    pub fn new(trader: TraderSynthesizer) -> Self {
        Self { trader }
    }
}

#[async_trait]
impl Node for TraderNode {
    fn id(&self) -> NodeId {
        NodeId::Trader
    }

    async fn run(&self, state: &SharedState) -> Result<StateUpdate, NodeError> {
        if state.investment_plan.is_empty() {
            return Err(NodeError::missing("investment plan"));
        }
        let plan = self.trader.synthesize(state).await?;
        Ok(StateUpdate {
            trader_plan: Some(plan),
            ..Default::default()
        })
    }
}

pub struct FinalArbiterNode {
    arbiter: FinalArbiter,
}

impl FinalArbiterNode {
    pub fn new(arbiter: FinalArbiter) -> Self {
        Self { arbiter }
    }
}

#[async_trait]
impl Node for FinalArbiterNode {
    fn id(&self) -> NodeId {
        NodeId::FinalArbiter
    }

    async fn run(&self, state: &SharedState) -> Result<StateUpdate, NodeError> {
        let judged = state
            .risk_debate
            .as_ref()
            .is_some_and(DebateState::is_judged);
        if state.trader_plan.is_empty() || !judged {
            return Err(NodeError::missing("trader plan and risk judgment"));
        }
        let decision = self.arbiter.synthesize(state).await?;
        let signal = extract_signal(&decision);
        info!(signal = ?signal, "final decision synthesized");
        Ok(StateUpdate {
            final_decision: Some(decision),
            final_signal: signal,
            ..Default::default()
        })
    }
}
