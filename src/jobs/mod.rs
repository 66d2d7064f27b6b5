//! Analysis jobs: types, handlers and their shared context

pub mod context;
pub mod handlers;
pub mod types;

pub use context::JobContext;
pub use handlers::{HandlerRegistry, JobHandler, JobOutcome};
pub use types::{AnalysisJob, IdempotencyKey, JobKind, JobParams, JobPriority};
