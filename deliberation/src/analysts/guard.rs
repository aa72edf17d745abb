//! Tool invocation guard: an analyst report counts only if the analyst
//! actually pulled external data.
//!
//! Every data retrieval goes through a [`ToolBox`] that records a
//! [`ToolTrace`]. The guard runs a bounded attempt loop; an attempt is
//! accepted once its trace shows at least one successful retrieval. When
//! the attempts run out the last content is kept, flagged degraded.
//!
//! Each retrieval is bounded by the per-call timeout, so a hanging feed
//! fails one call instead of eating the analyst's whole time budget.

use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::collaborators::{DataKind, DataRetrieval};
use crate::error::{panic_message, CollaboratorError};
use crate::state::{AnalystKind, AnalystReport};

/// One observed retrieval call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRecord {
    pub kind: DataKind,
    pub ok: bool,
    /// Size of the returned payload (0 on failure).
    pub chars: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Execution trace of one analyst attempt.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolTrace {
    calls: Vec<ToolCallRecord>,
}

impl ToolTrace {
    pub fn record(&mut self, call: ToolCallRecord) {
        self.calls.push(call);
    }

    pub fn calls(&self) -> &[ToolCallRecord] {
        &self.calls
    }

    pub fn total_calls(&self) -> usize {
        self.calls.len()
    }

    /// Only successful retrievals count as evidence.
    pub fn successful_calls(&self) -> usize {
        self.calls.iter().filter(|c| c.ok).count()
    }

    pub fn has_evidence(&self) -> bool {
        self.successful_calls() > 0
    }
}

/// Retrieval capability handed to an analyst attempt. Observable: every
/// call lands in the attempt's trace.
pub struct ToolBox {
    source: Arc<dyn DataRetrieval>,
    subject: String,
    trade_date: NaiveDate,
    call_timeout: Option<Duration>,
    trace: Mutex<ToolTrace>,
}

impl ToolBox {
    pub fn new(source: Arc<dyn DataRetrieval>, subject: &str, trade_date: NaiveDate) -> Self {
        Self {
            source,
            subject: subject.to_string(),
            trade_date,
            call_timeout: None,
            trace: Mutex::new(ToolTrace::default()),
        }
    }

    /// Bound every retrieval; an expired call is recorded as a failed one.
    pub fn with_call_timeout(mut self, limit: Option<Duration>) -> Self {
        self.call_timeout = limit;
        self
    }

    pub async fn fetch(&self, kind: DataKind) -> Result<String, CollaboratorError> {
        let retrieval = self.source.retrieve(&self.subject, self.trade_date, kind);
        let result = match self.call_timeout {
            Some(limit) => match tokio::time::timeout(limit, retrieval).await {
                Ok(result) => result,
                Err(_) => Err(CollaboratorError::Timeout(limit)),
            },
            None => retrieval.await,
        };
        let record = match &result {
            Ok(text) => ToolCallRecord {
                kind,
                ok: true,
                chars: text.len(),
                error: None,
            },
            Err(e) => ToolCallRecord {
                kind,
                ok: false,
                chars: 0,
                error: Some(e.to_string()),
            },
        };
        debug!(subject = %self.subject, kind = %kind, ok = record.ok, "data retrieval");
        self.trace
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .record(record);
        result
    }

    pub fn trace(&self) -> ToolTrace {
        self.trace
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

/// Per-attempt inputs for an analyst.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalystContext {
    pub subject: String,
    pub trade_date: NaiveDate,
    /// 1-indexed attempt number.
    pub attempt: u32,
    /// Set on re-prompts: the previous attempt showed no retrieval evidence.
    pub insist_on_tools: bool,
}

impl AnalystContext {
    /// Instruction appended to the analyst's prompt on a re-prompt.
    pub fn tool_reminder(&self) -> Option<&'static str> {
        self.insist_on_tools.then_some(
            "Your previous answer did not use any data tools. You MUST call the \
             retrieval tools for this subject and date before writing the report.",
        )
    }
}

/// One analyst's report-producing attempt. Should be idempotent.
#[async_trait]
pub trait AnalystTask: Send + Sync {
    fn kind(&self) -> AnalystKind;

    async fn run(&self, ctx: &AnalystContext, tools: &ToolBox)
        -> Result<String, CollaboratorError>;
}

/// Bounded retry loop around an analyst attempt.
pub struct ToolInvocationGuard {
    source: Arc<dyn DataRetrieval>,
    max_retries: u32,
    call_timeout: Option<Duration>,
}

impl ToolInvocationGuard {
    pub fn new(source: Arc<dyn DataRetrieval>, max_retries: u32) -> Self {
        Self {
            source,
            max_retries,
            call_timeout: None,
        }
    }

    /// Per-retrieval limit handed to every attempt's [`ToolBox`].
    pub fn with_call_timeout(mut self, limit: Option<Duration>) -> Self {
        self.call_timeout = limit;
        self
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Always returns a report: tool-backed, or degraded after
    /// `max_retries + 1` attempts.
    pub async fn guard(
        &self,
        task: &dyn AnalystTask,
        subject: &str,
        trade_date: NaiveDate,
    ) -> AnalystReport {
        let analyst = task.kind();
        let attempts = self.max_retries + 1;
        let mut last_content = String::new();
        let mut last_problem = String::from("no attempt ran");

        for attempt in 1..=attempts {
            let tools = ToolBox::new(self.source.clone(), subject, trade_date)
                .with_call_timeout(self.call_timeout);
            let ctx = AnalystContext {
                subject: subject.to_string(),
                trade_date,
                attempt,
                insist_on_tools: attempt > 1,
            };

            let result = AssertUnwindSafe(task.run(&ctx, &tools))
                .catch_unwind()
                .await;
            let trace = tools.trace();

            match result {
                Ok(Ok(content)) if trace.has_evidence() => {
                    info!(analyst = %analyst, attempt, tool_calls = trace.successful_calls(), "analyst report accepted");
                    return AnalystReport::ok(
                        analyst,
                        content,
                        attempt,
                        trace.successful_calls() as u32,
                    );
                }
                Ok(Ok(content)) => {
                    last_problem = if trace.total_calls() == 0 {
                        "no retrieval call recorded".to_string()
                    } else {
                        format!("all {} retrieval calls failed", trace.total_calls())
                    };
                    last_content = content;
                }
                Ok(Err(e)) => {
                    last_problem = format!("attempt failed: {}", e);
                }
                Err(payload) => {
                    last_problem = format!(
                        "attempt panicked: {}",
                        panic_message(payload.as_ref())
                    );
                }
            }

            if attempt < attempts {
                info!(analyst = %analyst, attempt, problem = %last_problem, "no tool evidence, re-prompting");
            }
        }

        warn!(analyst = %analyst, attempts, problem = %last_problem, "retries exhausted, report degraded");
        AnalystReport::degraded(
            analyst,
            last_content,
            attempts,
            &format!("retries exhausted: {}", last_problem),
        )
    }
}
