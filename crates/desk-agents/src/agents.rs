//! Reasoning-backed analysts, debaters and round scorer.

use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use deliberation::{
    AnalystContext, AnalystKind, AnalystTask, CollaboratorError, ContextRefs, QualityScorer,
    ReasoningCall, Stance, StanceAgent, ToolBox, TurnContext,
};
use regex::Regex;
use tracing::debug;

static SCORE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:^|[^\d.])((?:0(?:\.\d+)?)|(?:1(?:\.0+)?))(?:$|[^\d.])")
        .expect("SCORE_PATTERN regex should compile")
});

fn analyst_brief(kind: AnalystKind) -> &'static str {
    match kind {
        AnalystKind::Market => {
            "You are the market analyst. Read price action and technical indicators, \
             describe trend, momentum and volatility, and note levels that matter."
        }
        AnalystKind::Sentiment => {
            "You are the sentiment analyst. Summarize what social media and retail \
             chatter say about the subject and how that mood has been shifting."
        }
        AnalystKind::News => {
            "You are the news analyst. Pick out the company, macro and insider news \
             that could move the subject, and say which way."
        }
        AnalystKind::Fundamentals => {
            "You are the fundamentals analyst. Assess the financial statements: \
             growth, margins, balance sheet strength and cash generation."
        }
    }
}

fn refs(subject: &str, date: impl std::fmt::Display) -> ContextRefs {
    let mut refs = ContextRefs::new();
    refs.insert("subject".into(), subject.to_string());
    refs.insert("trade_date".into(), date.to_string());
    refs
}

/// Pulls every data kind of its role through the tool box, then asks the
/// reasoning call for a report.
pub struct ReasoningAnalyst {
    kind: AnalystKind,
    call: Arc<dyn ReasoningCall>,
}

impl ReasoningAnalyst {
    pub fn new(kind: AnalystKind, call: Arc<dyn ReasoningCall>) -> Self {
        Self { kind, call }
    }

    pub fn prompt(&self, ctx: &AnalystContext, sections: &[String]) -> String {
        let data = if sections.is_empty() {
            "(no data could be retrieved)".to_string()
        } else {
            sections.join("\n\n")
        };
        let mut prompt = format!(
            "{brief}\n\nSubject: {subject}\nDate: {date}\n\n## Retrieved data\n{data}\n\n\
             Write a concise report ending with a markdown table of key points.",
            brief = analyst_brief(self.kind),
            subject = ctx.subject,
            date = ctx.trade_date,
        );
        if let Some(reminder) = ctx.tool_reminder() {
            prompt.push_str("\n\n");
            prompt.push_str(reminder);
        }
        prompt
    }
}

#[async_trait]
impl AnalystTask for ReasoningAnalyst {
    fn kind(&self) -> AnalystKind {
        self.kind
    }

    async fn run(&self, ctx: &AnalystContext, tools: &ToolBox) -> Result<String, CollaboratorError> {
        let mut sections = Vec::new();
        for kind in self.kind.data_kinds() {
            match tools.fetch(*kind).await {
                Ok(text) => sections.push(format!("### {}\n{}", kind, text.trim())),
                Err(e) => {
                    debug!(analyst = %self.kind, kind = %kind, error = %e, "data kind unavailable")
                }
            }
        }
        let prompt = self.prompt(ctx, &sections);
        self.call
            .complete(&prompt, &refs(&ctx.subject, ctx.trade_date))
            .await
    }
}

/// One debater for any stance set; the stance decides the role.
pub struct ReasoningDebater {
    call: Arc<dyn ReasoningCall>,
}

impl ReasoningDebater {
    pub fn new(call: Arc<dyn ReasoningCall>) -> Self {
        Self { call }
    }
}

pub fn debater_prompt<S: Stance>(ctx: &TurnContext<'_, S>) -> String {
    let own = ctx.debate.history(ctx.stance);
    let own_last = own.last().map(String::as_str).unwrap_or("(none yet)");
    let opponents = ctx
        .opponents_latest()
        .into_iter()
        .map(|(stance, text)| {
            let text = if text.is_empty() { "(no argument)" } else { text };
            format!("- {}: {}", stance, text)
        })
        .collect::<Vec<_>>();
    let opponents = if opponents.is_empty() {
        "(nobody has spoken yet)".to_string()
    } else {
        opponents.join("\n")
    };
    format!(
        "{brief}\n\nThis is round {round} of at most {max} in the {name} debate on {subject} \
         for {date}.\n\n## Material\n{context}\n\n## Your last argument\n{own_last}\n\n\
         ## Latest from the others\n{opponents}\n\n\
         Respond directly to the others' points. If you are persuaded, say so plainly.",
        brief = ctx.stance.role_brief(),
        round = ctx.round,
        max = ctx.debate.max_rounds,
        name = S::debate_name(),
        subject = ctx.briefing.subject,
        date = ctx.briefing.trade_date,
        context = ctx.briefing.context,
    )
}

#[async_trait]
impl<S: Stance> StanceAgent<S> for ReasoningDebater {
    async fn take_turn(&self, ctx: &TurnContext<'_, S>) -> Result<String, CollaboratorError> {
        let mut refs = refs(&ctx.briefing.subject, ctx.briefing.trade_date);
        refs.insert("stance".into(), ctx.stance.to_string());
        let text = self.call.complete(&debater_prompt(ctx), &refs).await?;
        Ok(format!("{} analyst: {}", ctx.stance, text.trim()))
    }
}

/// Asks the model how settled a round is, on a 0 to 1 scale.
pub struct ReasoningScorer {
    call: Arc<dyn ReasoningCall>,
}

impl ReasoningScorer {
    pub fn new(call: Arc<dyn ReasoningCall>) -> Self {
        Self { call }
    }
}

/// First number in `[0, 1]` found in the reply.
pub fn parse_score(text: &str) -> Option<f64> {
    SCORE_PATTERN
        .captures(text)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse::<f64>().ok())
}

#[async_trait]
impl QualityScorer for ReasoningScorer {
    async fn score(&self, round_text: &str) -> Result<f64, CollaboratorError> {
        let prompt = format!(
            "Rate how well-argued and settled this debate round is, from 0 (unresolved, \
             shallow) to 1 (thorough, converged). Reply with the number only.\n\n{}",
            round_text
        );
        let reply = self.call.complete(&prompt, &ContextRefs::new()).await?;
        parse_score(&reply)
            .ok_or_else(|| CollaboratorError::ParseError(format!("no score in {:?}", reply)))
    }
}
