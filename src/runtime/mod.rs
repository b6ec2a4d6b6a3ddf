//! Workflow execution: scheduler, worker backends, retry, results

pub mod result;
pub mod retry;
pub mod scheduler;
pub mod worker;

pub use result::{RunResult, RunStats, UnitError, UnitErrorKind};
pub use retry::{RetryConfig, RetryPolicy};
pub use scheduler::{RunConfig, Scheduler};
pub use worker::{
    create_backend, LocalBackend, MockBackend, MockBehavior, WorkUnit, WorkerBackend,
    WorkerFailure,
};
