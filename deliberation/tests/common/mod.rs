//! Deterministic scripted collaborators shared by the integration tests.
//! No network, no randomness: every call returns canned text.

#![allow(dead_code)]

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use deliberation::{
    AnalystContext, AnalystKind, AnalystTask, CollaboratorError, ContextRefs, DataKind,
    DataRetrieval, QualityScorer, ReasoningCall, ResearchStance, RiskStance, RunConfig, Stance,
    StanceAgent, ToolBox, TradingPipeline,
};
use deliberation::pipeline::PipelineBuilder;

pub const JUDGE_TEXT: &str = "Weighed both sides. Plan: accumulate on dips. FINAL DECISION: BUY";
pub const TRADER_TEXT: &str = "Enter 2% position at open.\nFINAL TRANSACTION PROPOSAL: **BUY**";
pub const ARBITER_TEXT: &str = "Risk is acceptable.\nFINAL TRANSACTION PROPOSAL: **BUY**";

pub fn date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 5, 10).unwrap()
}

// ── Reasoning ──────────────────────────────────────────────────────

/// Returns the same text for every prompt and counts calls.
pub struct Fixed {
    text: String,
    calls: AtomicU32,
}

impl Fixed {
    pub fn new(text: &str) -> Arc<Self> {
        Arc::new(Self {
            text: text.to_string(),
            calls: AtomicU32::new(0),
        })
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ReasoningCall for Fixed {
    async fn complete(
        &self,
        _prompt: &str,
        _context: &ContextRefs,
    ) -> Result<String, CollaboratorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.text.clone())
    }
}

/// Judges and arbiter on the deep call: answers by prompt role.
pub struct Deep;

#[async_trait]
impl ReasoningCall for Deep {
    async fn complete(
        &self,
        prompt: &str,
        _context: &ContextRefs,
    ) -> Result<String, CollaboratorError> {
        if prompt.contains("portfolio manager") {
            Ok(ARBITER_TEXT.to_string())
        } else {
            Ok(JUDGE_TEXT.to_string())
        }
    }
}

// ── Data and analysts ──────────────────────────────────────────────

pub struct Feed;

#[async_trait]
impl DataRetrieval for Feed {
    async fn retrieve(
        &self,
        subject: &str,
        date: NaiveDate,
        kind: DataKind,
    ) -> Result<String, CollaboratorError> {
        Ok(format!("{} for {} on {}", kind, subject, date))
    }
}

/// Never answers within any reasonable call timeout.
pub struct HangingFeed;

#[async_trait]
impl DataRetrieval for HangingFeed {
    async fn retrieve(
        &self,
        _subject: &str,
        _date: NaiveDate,
        _kind: DataKind,
    ) -> Result<String, CollaboratorError> {
        tokio::time::sleep(Duration::from_secs(24 * 3600)).await;
        Ok("too late".to_string())
    }
}

/// Pulls every data kind of its analyst role, then reports.
pub struct Diligent(pub AnalystKind);

#[async_trait]
impl AnalystTask for Diligent {
    fn kind(&self) -> AnalystKind {
        self.0
    }

    async fn run(&self, ctx: &AnalystContext, tools: &ToolBox) -> Result<String, CollaboratorError> {
        let mut lines = Vec::new();
        for kind in self.0.data_kinds() {
            lines.push(tools.fetch(*kind).await?);
        }
        Ok(format!("{} report for {}: {}", self.0, ctx.subject, lines.join("; ")))
    }
}

/// Never touches the data tools.
pub struct Lazy(pub AnalystKind);

#[async_trait]
impl AnalystTask for Lazy {
    fn kind(&self) -> AnalystKind {
        self.0
    }

    async fn run(&self, _ctx: &AnalystContext, _tools: &ToolBox) -> Result<String, CollaboratorError> {
        Ok("gut feeling".to_string())
    }
}

/// Never finishes.
pub struct Stuck(pub AnalystKind);

#[async_trait]
impl AnalystTask for Stuck {
    fn kind(&self) -> AnalystKind {
        self.0
    }

    async fn run(&self, _ctx: &AnalystContext, _tools: &ToolBox) -> Result<String, CollaboratorError> {
        tokio::time::sleep(Duration::from_secs(24 * 3600)).await;
        Ok("too late".to_string())
    }
}

pub fn diligent_analysts() -> Vec<Arc<dyn AnalystTask>> {
    AnalystKind::all()
        .iter()
        .map(|k| Arc::new(Diligent(*k)) as Arc<dyn AnalystTask>)
        .collect()
}

// ── Debaters ───────────────────────────────────────────────────────

/// Argues without ever using an agreement phrase.
pub struct Arguer;

#[async_trait]
impl<S: Stance> StanceAgent<S> for Arguer {
    async fn take_turn(
        &self,
        ctx: &deliberation::TurnContext<'_, S>,
    ) -> Result<String, CollaboratorError> {
        Ok(format!("{} round {}: my position stands", ctx.stance, ctx.round))
    }
}

/// Agrees on sight.
pub struct Agreeable;

#[async_trait]
impl<S: Stance> StanceAgent<S> for Agreeable {
    async fn take_turn(
        &self,
        ctx: &deliberation::TurnContext<'_, S>,
    ) -> Result<String, CollaboratorError> {
        Ok(format!("{}: I concur, consensus reached", ctx.stance))
    }
}

/// Fails on one specific round, argues otherwise.
pub struct FailsOnRound(pub u32);

#[async_trait]
impl<S: Stance> StanceAgent<S> for FailsOnRound {
    async fn take_turn(
        &self,
        ctx: &deliberation::TurnContext<'_, S>,
    ) -> Result<String, CollaboratorError> {
        if ctx.round == self.0 {
            return Err(CollaboratorError::RequestFailed("upstream 503".to_string()));
        }
        Ok(format!("{} round {}: still arguing", ctx.stance, ctx.round))
    }
}

pub struct FixedScore(pub f64);

#[async_trait]
impl QualityScorer for FixedScore {
    async fn score(&self, _round_text: &str) -> Result<f64, CollaboratorError> {
        Ok(self.0)
    }
}

// ── Wiring ─────────────────────────────────────────────────────────

/// Full desk with scripted collaborators; tests override pieces on top.
pub fn desk(config: RunConfig, analysts: Vec<Arc<dyn AnalystTask>>) -> PipelineBuilder {
    let mut builder = TradingPipeline::builder(config)
        .quick_reasoning(Fixed::new(TRADER_TEXT))
        .deep_reasoning(Arc::new(Deep))
        .data_source(Arc::new(Feed));
    for task in analysts {
        builder = builder.analyst(task);
    }
    for stance in ResearchStance::speaking_order() {
        builder = builder.research_agent(*stance, Arc::new(Arguer));
    }
    for stance in RiskStance::speaking_order() {
        builder = builder.risk_agent(*stance, Arc::new(Arguer));
    }
    builder
}
