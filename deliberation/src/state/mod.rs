//! Shared run state, the audit log, and the executor's merge rules.

pub mod log;
pub mod types;
pub mod update;

pub use log::{LogEntry, LogKind};
pub use types::{is_valid_subject, AnalystKind, AnalystReport, ReportStatus, SharedState};
pub use update::{StateField, StateUpdate};
