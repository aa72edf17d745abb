//! External collaborator contracts.
//!
//! The core never talks to a model or a market-data feed directly. It
//! consumes three narrow async traits and treats every implementation as
//! opaque: calls may block, fail, or time out.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::CollaboratorError;

/// Named references handed to a reasoning call alongside the prompt.
pub type ContextRefs = BTreeMap<String, String>;

/// Opaque prompt-in / text-out reasoning call.
#[async_trait]
pub trait ReasoningCall: Send + Sync {
    async fn complete(&self, prompt: &str, context: &ContextRefs)
        -> Result<String, CollaboratorError>;
}

/// Category of external data an analyst can pull.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataKind {
    PriceHistory,
    TechnicalIndicators,
    SocialSentiment,
    CompanyNews,
    GlobalNews,
    InsiderTransactions,
    Fundamentals,
    BalanceSheet,
    CashFlow,
    IncomeStatement,
}

impl DataKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PriceHistory => "price_history",
            Self::TechnicalIndicators => "technical_indicators",
            Self::SocialSentiment => "social_sentiment",
            Self::CompanyNews => "company_news",
            Self::GlobalNews => "global_news",
            Self::InsiderTransactions => "insider_transactions",
            Self::Fundamentals => "fundamentals",
            Self::BalanceSheet => "balance_sheet",
            Self::CashFlow => "cash_flow",
            Self::IncomeStatement => "income_statement",
        }
    }
}

impl std::fmt::Display for DataKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// External data retrieval. Invocations are observed by the tool
/// invocation guard through [`crate::analysts::ToolBox`].
#[async_trait]
pub trait DataRetrieval: Send + Sync {
    async fn retrieve(
        &self,
        subject: &str,
        date: NaiveDate,
        kind: DataKind,
    ) -> Result<String, CollaboratorError>;
}

/// Optional external judge of debate content quality, in `[0.0, 1.0]`.
#[async_trait]
pub trait QualityScorer: Send + Sync {
    async fn score(&self, round_text: &str) -> Result<f64, CollaboratorError>;
}

/// Run a reasoning call under an optional per-call timeout.
pub async fn reason_with_timeout(
    call: &dyn ReasoningCall,
    prompt: &str,
    context: &ContextRefs,
    timeout: Option<Duration>,
) -> Result<String, CollaboratorError> {
    match timeout {
        Some(limit) => tokio::time::timeout(limit, call.complete(prompt, context))
            .await
            .map_err(|_| CollaboratorError::Timeout(limit))?,
        None => call.complete(prompt, context).await,
    }
}
