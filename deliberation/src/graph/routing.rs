//! Node identities, pure routing, and the legal edge table.

use serde::{Deserialize, Serialize};

use crate::state::{SharedState, StateField};

/// A pipeline node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeId {
    Analysts,
    /// One full research round per invocation.
    ResearchDebate,
    ResearchJudge,
    Trader,
    /// One full risk round per invocation.
    RiskDebate,
    RiskJudge,
    FinalArbiter,
}

impl NodeId {
    pub fn all() -> &'static [NodeId] {
        &[
            NodeId::Analysts,
            NodeId::ResearchDebate,
            NodeId::ResearchJudge,
            NodeId::Trader,
            NodeId::RiskDebate,
            NodeId::RiskJudge,
            NodeId::FinalArbiter,
        ]
    }

    /// Fields this node may write. The audit log is open to every node.
    pub fn owned_fields(self) -> &'static [StateField] {
        match self {
            Self::Analysts => &[StateField::AnalystReports],
            Self::ResearchDebate => &[StateField::ResearchDebate],
            Self::ResearchJudge => &[StateField::ResearchDebate, StateField::InvestmentPlan],
            Self::Trader => &[StateField::TraderPlan],
            Self::RiskDebate => &[StateField::RiskDebate],
            Self::RiskJudge => &[StateField::RiskDebate],
            Self::FinalArbiter => &[StateField::FinalDecision, StateField::FinalSignal],
        }
    }

    /// Debate-round nodes may route back to themselves.
    pub fn is_debate_round(self) -> bool {
        matches!(self, Self::ResearchDebate | Self::RiskDebate)
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Analysts => write!(f, "analysts"),
            Self::ResearchDebate => write!(f, "research_debate"),
            Self::ResearchJudge => write!(f, "research_judge"),
            Self::Trader => write!(f, "trader"),
            Self::RiskDebate => write!(f, "risk_debate"),
            Self::RiskJudge => write!(f, "risk_judge"),
            Self::FinalArbiter => write!(f, "final_arbiter"),
        }
    }
}

/// What runs next.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutingDecision {
    Next(NodeId),
    Halt,
}

impl std::fmt::Display for RoutingDecision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Next(node) => write!(f, "next({})", node),
            Self::Halt => write!(f, "halt"),
        }
    }
}

/// Routing rule: a pure predicate over the state.
pub type Router = fn(&SharedState) -> RoutingDecision;

/// The trading pipeline's routing: the first missing artifact wins.
///
/// ```text
/// analysts → research_debate ⟲ → research_judge → trader
///          → risk_debate ⟲ → risk_judge → final_arbiter → halt
/// ```
pub fn pipeline_route(state: &SharedState) -> RoutingDecision {
    use RoutingDecision::{Halt, Next};

    if state.analyst_reports.is_empty() {
        return Next(NodeId::Analysts);
    }
    match &state.research_debate {
        None => return Next(NodeId::ResearchDebate),
        Some(d) if !d.is_terminal() => return Next(NodeId::ResearchDebate),
        Some(d) if !d.is_judged() => return Next(NodeId::ResearchJudge),
        Some(_) => {}
    }
    if state.trader_plan.is_empty() {
        return Next(NodeId::Trader);
    }
    match &state.risk_debate {
        None => return Next(NodeId::RiskDebate),
        Some(d) if !d.is_terminal() => return Next(NodeId::RiskDebate),
        Some(d) if !d.is_judged() => return Next(NodeId::RiskJudge),
        Some(_) => {}
    }
    if state.final_decision.is_empty() {
        return Next(NodeId::FinalArbiter);
    }
    Halt
}

/// Whether `from → to` is an edge of the pipeline. `None` is the start of a
/// run or a resume, from which any node may be entered.
pub fn is_legal_transition(from: Option<NodeId>, to: NodeId) -> bool {
    use NodeId::*;

    let Some(from) = from else {
        return true;
    };

    matches!(
        (from, to),
        (Analysts, ResearchDebate)
            | (ResearchDebate, ResearchDebate)
            | (ResearchDebate, ResearchJudge)
            | (ResearchJudge, Trader)
            | (Trader, RiskDebate)
            | (RiskDebate, RiskDebate)
            | (RiskDebate, RiskJudge)
            | (RiskJudge, FinalArbiter)
    )
}
