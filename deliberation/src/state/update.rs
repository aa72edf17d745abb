//! Partial state updates and the executor's merge rules.
//!
//! Two field kinds merge differently:
//! - scalar fields (plans, decision, signal, reports, debate snapshots) are
//!   replace-if-present, and only by a node that owns the field;
//! - the audit log is append-only and open to every node.
//!
//! Debate snapshots are replaced wholesale but must extend the previous
//! value: histories and transcript keep their prefix, `round_count` never
//! decreases, a terminal phase and a written judge decision never change.
//! Validation runs before anything is written, so a rejected update leaves
//! the state untouched.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::warn;

use super::log::{LogEntry, LogKind};
use super::types::{AnalystKind, AnalystReport, SharedState};
use crate::debate::{DebatePhase, DebateState, ResearchStance, RiskStance, Stance};
use crate::error::StateError;
use crate::graph::NodeId;
use crate::signal::Signal;

/// Writable fields of [`SharedState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StateField {
    AnalystReports,
    ResearchDebate,
    InvestmentPlan,
    TraderPlan,
    RiskDebate,
    FinalDecision,
    FinalSignal,
}

impl std::fmt::Display for StateField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AnalystReports => write!(f, "analyst_reports"),
            Self::ResearchDebate => write!(f, "research_debate"),
            Self::InvestmentPlan => write!(f, "investment_plan"),
            Self::TraderPlan => write!(f, "trader_plan"),
            Self::RiskDebate => write!(f, "risk_debate"),
            Self::FinalDecision => write!(f, "final_decision"),
            Self::FinalSignal => write!(f, "final_signal"),
        }
    }
}

/// A node's partial update. `None` leaves the field as it is.
#[derive(Debug, Clone, Default)]
pub struct StateUpdate {
    pub analyst_reports: Option<BTreeMap<AnalystKind, AnalystReport>>,
    pub research_debate: Option<DebateState<ResearchStance>>,
    pub investment_plan: Option<String>,
    pub trader_plan: Option<String>,
    pub risk_debate: Option<DebateState<RiskStance>>,
    pub final_decision: Option<String>,
    pub final_signal: Option<Signal>,
    /// Appended to the audit log in order.
    pub log: Vec<LogEntry>,
}

impl StateUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn log(mut self, entry: LogEntry) -> Self {
        self.log.push(entry);
        self
    }

    /// Scalar fields this update would write.
    pub fn touched_fields(&self) -> Vec<StateField> {
        let mut fields = Vec::new();
        if self.analyst_reports.is_some() {
            fields.push(StateField::AnalystReports);
        }
        if self.research_debate.is_some() {
            fields.push(StateField::ResearchDebate);
        }
        if self.investment_plan.is_some() {
            fields.push(StateField::InvestmentPlan);
        }
        if self.trader_plan.is_some() {
            fields.push(StateField::TraderPlan);
        }
        if self.risk_debate.is_some() {
            fields.push(StateField::RiskDebate);
        }
        if self.final_decision.is_some() {
            fields.push(StateField::FinalDecision);
        }
        if self.final_signal.is_some() {
            fields.push(StateField::FinalSignal);
        }
        fields
    }
}

fn check_debate_extends<S: Stance>(
    field: StateField,
    old: Option<&DebateState<S>>,
    new: &DebateState<S>,
) -> Result<(), StateError> {
    let Some(old) = old else {
        return Ok(());
    };
    let violation = |reason: String| StateError::AppendOnlyViolation { field, reason };

    if new.round_count < old.round_count {
        return Err(violation(format!(
            "round_count decreased from {} to {}",
            old.round_count, new.round_count
        )));
    }
    for (stance, old_history) in &old.histories {
        let new_history = new.histories.get(stance).map(Vec::as_slice).unwrap_or(&[]);
        if !new_history.starts_with(old_history) {
            return Err(violation(format!("history of {} was rewritten", stance)));
        }
    }
    if !new.transcript.starts_with(&old.transcript) {
        return Err(violation("transcript was rewritten".to_string()));
    }
    if !new.transitions.starts_with(&old.transitions) {
        return Err(violation("phase transitions were rewritten".to_string()));
    }
    if old.phase.is_terminal() && new.phase != old.phase {
        return Err(violation(format!(
            "terminal phase {} changed to {}",
            old.phase, new.phase
        )));
    }
    if !old.judge_decision.is_empty() && new.judge_decision != old.judge_decision {
        return Err(violation("judge decision was overwritten".to_string()));
    }
    Ok(())
}

impl SharedState {
    /// Merge a node's update. Atomic: on error nothing is written.
    pub fn apply(&mut self, node: NodeId, update: StateUpdate) -> Result<(), StateError> {
        if self.sealed {
            return Err(StateError::Sealed);
        }

        let owned = node.owned_fields();
        for field in update.touched_fields() {
            if !owned.contains(&field) {
                return Err(StateError::OwnershipViolation { node, field });
            }
        }
        if let Some(debate) = &update.research_debate {
            check_debate_extends(
                StateField::ResearchDebate,
                self.research_debate.as_ref(),
                debate,
            )?;
        }
        if let Some(debate) = &update.risk_debate {
            check_debate_extends(StateField::RiskDebate, self.risk_debate.as_ref(), debate)?;
        }

        let StateUpdate {
            analyst_reports,
            research_debate,
            investment_plan,
            trader_plan,
            risk_debate,
            final_decision,
            final_signal,
            log,
        } = update;

        if let Some(reports) = analyst_reports {
            self.analyst_reports.extend(reports);
        }
        if let Some(debate) = research_debate {
            self.research_debate = Some(debate);
        }
        if let Some(plan) = investment_plan {
            self.investment_plan = plan;
        }
        if let Some(plan) = trader_plan {
            self.trader_plan = plan;
        }
        if let Some(debate) = risk_debate {
            self.risk_debate = Some(debate);
        }
        if let Some(decision) = final_decision {
            self.final_decision = decision;
        }
        if let Some(signal) = final_signal {
            self.final_signal = Some(signal);
        }
        for mut entry in log {
            if entry.node.is_none() {
                entry.node = Some(node);
            }
            self.append(entry);
        }
        Ok(())
    }

    /// Append to the audit log, assigning the next sequence number.
    pub(crate) fn append(&mut self, mut entry: LogEntry) {
        entry.seq = self.append_log.len() as u64 + 1;
        self.append_log.push(entry);
    }

    /// Move any still-active debate to `BudgetExceeded`. Returns how many moved.
    pub(crate) fn mark_debates_budget_exceeded(&mut self) -> usize {
        let mut moved = 0;
        if let Some(debate) = self.research_debate.as_mut() {
            moved += usize::from(budget_exceed(debate));
        }
        if let Some(debate) = self.risk_debate.as_mut() {
            moved += usize::from(budget_exceed(debate));
        }
        moved
    }

    pub(crate) fn seal(&mut self) {
        self.sealed = true;
    }
}

fn budget_exceed<S: Stance>(debate: &mut DebateState<S>) -> bool {
    if debate.phase != DebatePhase::Active {
        return false;
    }
    match debate.transition(DebatePhase::BudgetExceeded, "step budget exhausted") {
        Ok(()) => true,
        Err(e) => {
            warn!(error = %e, "could not mark debate as budget-exceeded");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn state() -> SharedState {
        SharedState::with_run_id(
            "run-1",
            "AMD",
            NaiveDate::from_ymd_opt(2024, 1, 2).unwrap(),
        )
    }

    #[test]
    fn test_apply_replaces_owned_scalar() {
        let mut s = state();
        let update = StateUpdate {
            trader_plan: Some("buy 100".into()),
            ..Default::default()
        };
        s.apply(NodeId::Trader, update).unwrap();
        assert_eq!(s.trader_plan, "buy 100");
        assert!(s.investment_plan.is_empty());
    }

    #[test]
    fn test_apply_rejects_unowned_field() {
        let mut s = state();
        let update = StateUpdate {
            final_decision: Some("SELL".into()),
            ..Default::default()
        };
        let err = s.apply(NodeId::Trader, update).unwrap_err();
        assert_eq!(
            err,
            StateError::OwnershipViolation {
                node: NodeId::Trader,
                field: StateField::FinalDecision,
            }
        );
        assert!(s.final_decision.is_empty());
    }

    #[test]
    fn test_apply_is_atomic_on_rejection() {
        let mut s = state();
        let update = StateUpdate {
            trader_plan: Some("plan".into()),
            final_decision: Some("SELL".into()),
            log: vec![LogEntry::new(LogKind::NodeCompleted, "x")],
            ..Default::default()
        };
        assert!(s.apply(NodeId::Trader, update).is_err());
        assert!(s.trader_plan.is_empty());
        assert!(s.append_log.is_empty());
    }

    #[test]
    fn test_log_appends_with_sequence_and_node() {
        let mut s = state();
        let update = StateUpdate::new()
            .log(LogEntry::new(LogKind::DegradedInput, "news degraded"))
            .log(LogEntry::new(LogKind::DegradedInput, "market degraded"));
        s.apply(NodeId::Analysts, update).unwrap();
        let update = StateUpdate::new().log(LogEntry::new(LogKind::NodeCompleted, "again"));
        s.apply(NodeId::Analysts, update).unwrap();

        let seqs: Vec<u64> = s.append_log.iter().map(|e| e.seq).collect();
        assert_eq!(seqs, vec![1, 2, 3]);
        assert!(s.append_log.iter().all(|e| e.node == Some(NodeId::Analysts)));
    }

    #[test]
    fn test_debate_round_count_cannot_decrease() {
        let mut s = state();
        let mut debate: DebateState<ResearchStance> = DebateState::new(3);
        debate.record_turn(ResearchStance::Bull, "up".into(), false);
        debate.record_turn(ResearchStance::Bear, "down".into(), false);
        debate.complete_round();
        s.apply(
            NodeId::ResearchDebate,
            StateUpdate {
                research_debate: Some(debate),
                ..Default::default()
            },
        )
        .unwrap();

        let stale: DebateState<ResearchStance> = DebateState::new(3);
        let err = s
            .apply(
                NodeId::ResearchDebate,
                StateUpdate {
                    research_debate: Some(stale),
                    ..Default::default()
                },
            )
            .unwrap_err();
        assert!(matches!(
            err,
            StateError::AppendOnlyViolation {
                field: StateField::ResearchDebate,
                ..
            }
        ));
        assert_eq!(s.research_debate.as_ref().unwrap().round_count, 1);
    }

    #[test]
    fn test_debate_history_cannot_be_rewritten() {
        let mut s = state();
        let mut debate: DebateState<RiskStance> = DebateState::new(2);
        debate.record_turn(RiskStance::Aggressive, "lever up".into(), false);
        s.risk_debate = Some(debate.clone());

        let mut rewritten = debate;
        rewritten
            .histories
            .insert(RiskStance::Aggressive, vec!["something else".into()]);
        let err = s
            .apply(
                NodeId::RiskDebate,
                StateUpdate {
                    risk_debate: Some(rewritten),
                    ..Default::default()
                },
            )
            .unwrap_err();
        assert!(err.to_string().contains("aggressive"));
    }

    #[test]
    fn test_judge_decision_cannot_be_overwritten() {
        let mut s = state();
        let mut debate: DebateState<ResearchStance> = DebateState::new(1);
        debate.judge_decision = "go long".into();
        s.research_debate = Some(debate.clone());

        let mut changed = debate;
        changed.judge_decision = "go short".into();
        let result = s.apply(
            NodeId::ResearchJudge,
            StateUpdate {
                research_debate: Some(changed),
                ..Default::default()
            },
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_sealed_state_rejects_updates() {
        let mut s = state();
        s.seal();
        let err = s.apply(NodeId::Trader, StateUpdate::new()).unwrap_err();
        assert_eq!(err, StateError::Sealed);
    }

    #[test]
    fn test_mark_debates_budget_exceeded() {
        let mut s = state();
        s.research_debate = Some(DebateState::new(2));
        let mut finished: DebateState<RiskStance> = DebateState::new(1);
        finished
            .transition(DebatePhase::ForcedTermination, "cap")
            .unwrap();
        s.risk_debate = Some(finished);

        assert_eq!(s.mark_debates_budget_exceeded(), 1);
        assert_eq!(
            s.research_debate.as_ref().unwrap().phase,
            DebatePhase::BudgetExceeded
        );
        assert_eq!(
            s.risk_debate.as_ref().unwrap().phase,
            DebatePhase::ForcedTermination
        );
    }

    #[test]
    fn test_touched_fields() {
        let update = StateUpdate {
            final_decision: Some("x".into()),
            final_signal: Some(Signal::Hold),
            ..Default::default()
        };
        assert_eq!(
            update.touched_fields(),
            vec![StateField::FinalDecision, StateField::FinalSignal]
        );
        assert!(StateUpdate::new().touched_fields().is_empty());
    }
}
