//! Analyst fan-out / fan-in.
//!
//! ```text
//!              ┌─▶ guard(market)       ─┐
//! dispatch ────┼─▶ guard(sentiment)    ─┼──▶ barrier ──▶ {kind: report}
//!              ├─▶ guard(news)         ─┤   (all done or timed out)
//!              └─▶ guard(fundamentals) ─┘
//! ```
//!
//! Each task runs in its own `JoinSet` slot under a per-task timeout. The
//! barrier waits for every slot; one slow analyst never blocks another.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::NaiveDate;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use super::guard::{AnalystTask, ToolInvocationGuard};
use crate::state::{AnalystKind, AnalystReport};

pub struct AnalystDispatcher {
    guard: Arc<ToolInvocationGuard>,
    task_timeout: Duration,
}

impl AnalystDispatcher {
    pub fn new(guard: Arc<ToolInvocationGuard>, task_timeout: Duration) -> Self {
        Self {
            guard,
            task_timeout,
        }
    }

    /// Run every task concurrently. The result holds exactly one report per
    /// distinct analyst kind requested.
    pub async fn dispatch(
        &self,
        subject: &str,
        trade_date: NaiveDate,
        tasks: &[Arc<dyn AnalystTask>],
    ) -> BTreeMap<AnalystKind, AnalystReport> {
        let started = Instant::now();
        let subject: Arc<str> = Arc::from(subject);
        let mut requested: Vec<AnalystKind> = Vec::new();
        let mut join_set: JoinSet<AnalystReport> = JoinSet::new();

        for task in tasks {
            let kind = task.kind();
            if requested.contains(&kind) {
                warn!(analyst = %kind, "duplicate analyst task skipped");
                continue;
            }
            requested.push(kind);

            let guard = self.guard.clone();
            let task = task.clone();
            let subject = subject.clone();
            let limit = self.task_timeout;

            join_set.spawn(async move {
                match tokio::time::timeout(limit, guard.guard(task.as_ref(), &subject, trade_date))
                    .await
                {
                    Ok(report) => report,
                    Err(_) => {
                        warn!(analyst = %kind, timeout_secs = limit.as_secs(), "analyst timed out");
                        AnalystReport::timed_out(kind, limit)
                    }
                }
            });
        }

        let mut reports = BTreeMap::new();
        while let Some(res) = join_set.join_next().await {
            match res {
                Ok(report) => {
                    debug!(analyst = %report.analyst, status = %report.status, "analyst finished");
                    reports.insert(report.analyst, report);
                }
                Err(e) => {
                    warn!(error = %e, "analyst task aborted");
                }
            }
        }

        for kind in &requested {
            reports.entry(*kind).or_insert_with(|| {
                AnalystReport::degraded(*kind, String::new(), 0, "analyst task aborted")
            });
        }

        info!(
            analysts = reports.len(),
            degraded = reports.values().filter(|r| r.is_degraded()).count(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "analyst fan-in complete"
        );
        reports
    }
}
