//! Shared run state and analyst report types.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::log::{LogEntry, LogKind};
use crate::collaborators::DataKind;
use crate::debate::{DebateState, ResearchStance, RiskStance};
use crate::signal::Signal;

/// Analyst role in the fan-out stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalystKind {
    Market,
    Sentiment,
    News,
    Fundamentals,
}

impl AnalystKind {
    pub fn all() -> &'static [AnalystKind] {
        &[
            AnalystKind::Market,
            AnalystKind::Sentiment,
            AnalystKind::News,
            AnalystKind::Fundamentals,
        ]
    }

    /// Data feeds this analyst is expected to pull.
    pub fn data_kinds(self) -> &'static [DataKind] {
        match self {
            Self::Market => &[DataKind::PriceHistory, DataKind::TechnicalIndicators],
            Self::Sentiment => &[DataKind::SocialSentiment],
            Self::News => &[
                DataKind::CompanyNews,
                DataKind::GlobalNews,
                DataKind::InsiderTransactions,
            ],
            Self::Fundamentals => &[
                DataKind::Fundamentals,
                DataKind::BalanceSheet,
                DataKind::CashFlow,
                DataKind::IncomeStatement,
            ],
        }
    }
}

impl std::fmt::Display for AnalystKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Market => write!(f, "market"),
            Self::Sentiment => write!(f, "sentiment"),
            Self::News => write!(f, "news"),
            Self::Fundamentals => write!(f, "fundamentals"),
        }
    }
}

/// Outcome of a single guarded analyst task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportStatus {
    /// Report backed by at least one successful data retrieval.
    Ok,
    /// Retries exhausted without retrieval evidence, or the task failed.
    Degraded,
    /// Task did not finish inside the dispatcher's per-task timeout.
    TimedOut,
}

impl std::fmt::Display for ReportStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ok => write!(f, "ok"),
            Self::Degraded => write!(f, "degraded"),
            Self::TimedOut => write!(f, "timed_out"),
        }
    }
}

/// One analyst's contribution to the run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalystReport {
    pub analyst: AnalystKind,
    pub content: String,
    /// Set by the tool invocation guard when retrieval evidence was observed.
    pub tool_invoked: bool,
    pub status: ReportStatus,
    /// Attempts consumed by the guard (0 when the task never reported back).
    pub attempts: u32,
    /// Successful retrievals observed on the accepted attempt.
    pub tool_calls: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl AnalystReport {
    pub fn ok(analyst: AnalystKind, content: String, attempts: u32, tool_calls: u32) -> Self {
        Self {
            analyst,
            content,
            tool_invoked: true,
            status: ReportStatus::Ok,
            attempts,
            tool_calls,
            note: None,
        }
    }

    pub fn degraded(analyst: AnalystKind, content: String, attempts: u32, note: &str) -> Self {
        Self {
            analyst,
            content,
            tool_invoked: false,
            status: ReportStatus::Degraded,
            attempts,
            tool_calls: 0,
            note: Some(note.to_string()),
        }
    }

    pub fn timed_out(analyst: AnalystKind, limit: Duration) -> Self {
        Self {
            analyst,
            content: String::new(),
            tool_invoked: false,
            status: ReportStatus::TimedOut,
            attempts: 0,
            tool_calls: 0,
            note: Some(format!("analyst timed out after {:?}", limit)),
        }
    }

    /// Timed-out reports are a form of degradation.
    pub fn is_degraded(&self) -> bool {
        self.status != ReportStatus::Ok
    }

    /// Usable downstream: either tool-backed or explicitly flagged degraded.
    pub fn is_valid_input(&self) -> bool {
        self.tool_invoked || self.is_degraded()
    }

    /// Section for downstream prompts; degraded reports are flagged, never
    /// passed off as real findings.
    pub fn prompt_section(&self) -> String {
        let title = format!("{} report", self.analyst);
        if !self.is_degraded() {
            return format!("### {}\n{}", title, self.content);
        }
        let body = if self.content.trim().is_empty() {
            "(no content)"
        } else {
            self.content.as_str()
        };
        format!(
            "### {} [{}: {}]\n{}",
            title,
            self.status,
            self.note.as_deref().unwrap_or("no retrieval evidence"),
            body
        )
    }
}

/// Tickers like `BRK.B`, `^GSPC` or `EURUSD=X`; nothing that walks paths.
///
/// Subjects name result directories, so separators and `.`/`..` are refused.
pub fn is_valid_subject(subject: &str) -> bool {
    !subject.is_empty()
        && subject.len() <= 32
        && subject != "."
        && subject != ".."
        && subject
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '^' | '=' | '_'))
}

/// The single mutable record owned by the executor for one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SharedState {
    pub run_id: String,
    pub subject: String,
    pub trade_date: NaiveDate,
    #[serde(default)]
    pub analyst_reports: BTreeMap<AnalystKind, AnalystReport>,
    #[serde(default)]
    pub research_debate: Option<DebateState<ResearchStance>>,
    #[serde(default)]
    pub investment_plan: String,
    #[serde(default)]
    pub trader_plan: String,
    #[serde(default)]
    pub risk_debate: Option<DebateState<RiskStance>>,
    #[serde(default)]
    pub final_decision: String,
    #[serde(default)]
    pub final_signal: Option<Signal>,
    #[serde(default)]
    pub append_log: Vec<LogEntry>,
    #[serde(default)]
    pub(crate) sealed: bool,
}

impl SharedState {
    /// Fresh state for one subject and reference date, with a random run id.
    pub fn new(subject: &str, trade_date: NaiveDate) -> Self {
        Self::with_run_id(&uuid::Uuid::new_v4().to_string(), subject, trade_date)
    }

    pub fn with_run_id(run_id: &str, subject: &str, trade_date: NaiveDate) -> Self {
        Self {
            run_id: run_id.to_string(),
            subject: subject.to_string(),
            trade_date,
            analyst_reports: BTreeMap::new(),
            research_debate: None,
            investment_plan: String::new(),
            trader_plan: String::new(),
            risk_debate: None,
            final_decision: String::new(),
            final_signal: None,
            append_log: Vec::new(),
            sealed: false,
        }
    }

    pub fn report(&self, kind: AnalystKind) -> Option<&AnalystReport> {
        self.analyst_reports.get(&kind)
    }

    /// Reports flagged degraded or timed out.
    pub fn degraded_reports(&self) -> Vec<&AnalystReport> {
        self.analyst_reports
            .values()
            .filter(|r| r.is_degraded())
            .collect()
    }

    /// All reports rendered for a prompt, in analyst order.
    pub fn reports_digest(&self) -> String {
        self.analyst_reports
            .values()
            .map(AnalystReport::prompt_section)
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    /// Whether the run has terminated and the state is read-only.
    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    /// Number of log entries of the given kind.
    pub fn log_count(&self, kind: LogKind) -> usize {
        self.append_log.iter().filter(|e| e.kind == kind).count()
    }

    /// Compact status line.
    pub fn status_line(&self) -> String {
        format!(
            "[{}] {} @ {} | reports={} degraded={} | plan={} trader={} | decision={} | log={}",
            self.run_id,
            self.subject,
            self.trade_date,
            self.analyst_reports.len(),
            self.degraded_reports().len(),
            !self.investment_plan.is_empty(),
            !self.trader_plan.is_empty(),
            self.final_signal
                .map(|s| s.to_string())
                .unwrap_or_else(|| "none".to_string()),
            self.append_log.len()
        )
    }
}
