//! Analyst stage: guarded tasks and their concurrent dispatcher.

pub mod dispatcher;
pub mod guard;

pub use dispatcher::AnalystDispatcher;
pub use guard::{
    AnalystContext, AnalystTask, ToolBox, ToolCallRecord, ToolInvocationGuard, ToolTrace,
};
