//! Single-call synthesizers: debate judge, trader, and final arbiter.
//!
//! Each wraps one opaque reasoning call. The content of their output is not
//! this crate's concern; what is enforced is that the output is non-empty
//! and bounded by the per-call timeout.

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::collaborators::{reason_with_timeout, ContextRefs, ReasoningCall};
use crate::debate::{Briefing, DebateState, Stance};
use crate::error::CollaboratorError;
use crate::state::SharedState;

/// Reject blank synthesizer output.
fn non_empty(who: &str, text: String) -> Result<String, CollaboratorError> {
    if text.trim().is_empty() {
        return Err(CollaboratorError::EmptyResponse(who.to_string()));
    }
    Ok(text)
}

fn base_refs(subject: &str, trade_date: impl std::fmt::Display) -> ContextRefs {
    let mut refs = ContextRefs::new();
    refs.insert("subject".to_string(), subject.to_string());
    refs.insert("trade_date".to_string(), trade_date.to_string());
    refs
}

pub fn judge_prompt<S: Stance>(debate: &DebateState<S>, briefing: &Briefing) -> String {
    let participants = S::speaking_order()
        .iter()
        .map(|s| s.to_string())
        .collect::<Vec<_>>()
        .join(", ");
    let transcript = if debate.transcript.is_empty() {
        "(no arguments were made)".to_string()
    } else {
        debate.transcript_text()
    };
    format!(
        "You are the judge of the {name} debate on {subject} for {date}.\n\
         Participants: {participants}. The debate ended in {phase} after {rounds} round(s).\n\
         Weigh the arguments, commit to a clear recommendation (BUY, SELL or HOLD), \
         and give a concrete plan with rationale. Empty turns are failed turns; \
         do not read them as concessions.\n\n\
         ## Material\n{context}\n\n## Transcript\n{transcript}",
        name = S::debate_name(),
        subject = briefing.subject,
        date = briefing.trade_date,
        phase = debate.phase,
        rounds = debate.round_count,
        context = briefing.context,
    )
}

pub fn trader_prompt(state: &SharedState) -> String {
    format!(
        "You are the trader for {subject} on {date}. Turn the investment plan below \
         into an execution-oriented plan: direction, sizing, entry and exit levels. \
         Reports marked degraded or timed_out lacked data; discount them.\n\
         End with 'FINAL TRANSACTION PROPOSAL: **BUY/HOLD/SELL**'.\n\n\
         ## Investment plan\n{plan}\n\n## Analyst reports\n{reports}",
        subject = state.subject,
        date = state.trade_date,
        plan = state.investment_plan,
        reports = state.reports_digest(),
    )
}

pub fn arbiter_prompt(state: &SharedState) -> String {
    let risk_judgment = state
        .risk_debate
        .as_ref()
        .map(|d| d.judge_decision.as_str())
        .unwrap_or_default();
    format!(
        "You are the portfolio manager making the final call on {subject} for {date}. \
         Reconcile the trader's plan with the risk committee's judgment and decide.\n\
         End with 'FINAL TRANSACTION PROPOSAL: **BUY/HOLD/SELL**'.\n\n\
         ## Trader plan\n{trader}\n\n## Risk judgment\n{risk}",
        subject = state.subject,
        date = state.trade_date,
        trader = state.trader_plan,
        risk = risk_judgment,
    )
}

/// Rules on a terminated debate. Used once per debate instance.
pub struct JudgeSynthesizer {
    call: Arc<dyn ReasoningCall>,
    timeout: Option<Duration>,
}

impl JudgeSynthesizer {
    pub fn new(call: Arc<dyn ReasoningCall>, timeout: Option<Duration>) -> Self {
        Self { call, timeout }
    }

    pub async fn synthesize<S: Stance>(
        &self,
        debate: &DebateState<S>,
        briefing: &Briefing,
    ) -> Result<String, CollaboratorError> {
        let mut refs = base_refs(&briefing.subject, briefing.trade_date);
        refs.insert("debate".to_string(), S::debate_name().to_string());
        refs.insert("phase".to_string(), debate.phase.to_string());
        let prompt = judge_prompt(debate, briefing);
        debug!(debate = S::debate_name(), prompt_chars = prompt.len(), "invoking judge");
        let text = reason_with_timeout(self.call.as_ref(), &prompt, &refs, self.timeout).await?;
        non_empty(&format!("{} judge", S::debate_name()), text)
    }
}

/// Turns the research judgment and analyst reports into a trader plan.
pub struct TraderSynthesizer {
    call: Arc<dyn ReasoningCall>,
    timeout: Option<Duration>,
}

impl TraderSynthesizer {
    pub fn new(call: Arc<dyn ReasoningCall>, timeout: Option<Duration>) -> Self {
        Self { call, timeout }
    }

    pub async fn synthesize(&self, state: &SharedState) -> Result<String, CollaboratorError> {
        let refs = base_refs(&state.subject, state.trade_date);
        let prompt = trader_prompt(state);
        let text = reason_with_timeout(self.call.as_ref(), &prompt, &refs, self.timeout).await?;
        non_empty("trader", text)
    }
}

/// Reconciles the trader plan with the risk judgment into the final decision.
pub struct FinalArbiter {
    call: Arc<dyn ReasoningCall>,
    timeout: Option<Duration>,
}

impl FinalArbiter {
    pub fn new(call: Arc<dyn ReasoningCall>, timeout: Option<Duration>) -> Self {
        Self { call, timeout }
    }

    pub async fn synthesize(&self, state: &SharedState) -> Result<String, CollaboratorError> {
        let refs = base_refs(&state.subject, state.trade_date);
        let prompt = arbiter_prompt(state);
        let text = reason_with_timeout(self.call.as_ref(), &prompt, &refs, self.timeout).await?;
        non_empty("final arbiter", text)
    }
}
