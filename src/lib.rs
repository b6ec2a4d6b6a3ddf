//! Braid - dataflow workflow engine
//!
//! Tasks (pure functions, shell commands, nested workflows) compose
//! into directed acyclic graphs; the engine type-checks every wire at
//! construction, fans out over parametric splits, gathers on combine,
//! caches outputs by content hash, and executes units concurrently on
//! a selectable worker backend.
//!
//! ## Module Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        DOMAIN MODEL                          │
//! │  types/     type lattice, assignability, format registry     │
//! │  value      concrete values, lazy fields, input slots        │
//! │  task/      task definitions, command templates              │
//! └──────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌──────────────────────────────────────────────────────────────┐
//! │                      APPLICATION LAYER                       │
//! │  graph/     builder, frozen GraphSpec, state-shape lattice   │
//! │  runtime/   scheduler, worker backends, retry, results       │
//! └──────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌──────────────────────────────────────────────────────────────┐
//! │                    INFRASTRUCTURE LAYER                      │
//! │  store      per-unit output storage (DashMap)                │
//! │  cache/     content-addressed cache with exclusive claims    │
//! │  event      append-only run event log                        │
//! │  error      coded error types with fix suggestions           │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use braid::{
//!     create_backend, Bindings, FieldSpec, Invoke, RunConfig, Scheduler, TaskDef, TypeSpec,
//!     WorkflowBuilder,
//! };
//!
//! let add = TaskDef::function("add", |inputs| {
//!     let a = inputs["a"].as_i64().unwrap_or(0);
//!     let b = inputs["b"].as_i64().unwrap_or(0);
//!     let mut out = Bindings::new();
//!     out.insert("out".into(), serde_json::json!(a + b));
//!     Ok(out)
//! })
//! .with_input(FieldSpec::required("a", TypeSpec::Int))
//! .with_input(FieldSpec::required("b", TypeSpec::Int))
//! .with_output(FieldSpec::out("out", TypeSpec::Int));
//!
//! let spec = WorkflowBuilder::scope("pipeline", |wf| {
//!     let sum = wf.add(Invoke::task(&add).with("a", 2i64).with("b", 3i64))?;
//!     wf.export("sum", sum.output("out")?)?;
//!     Ok(())
//! })?;
//!
//! let scheduler = Scheduler::new(RunConfig::new(create_backend("local")?));
//! let result = scheduler.submit(&spec, Bindings::new()).await?;
//! assert_eq!(result.output("sum"), Some(&serde_json::json!(5)));
//! # Ok::<(), braid::BraidError>(())
//! ```

// ═══════════════════════════════════════════════════════════════
// DOMAIN MODEL
// ═══════════════════════════════════════════════════════════════
pub mod task;
pub mod types;
pub mod value;

// ═══════════════════════════════════════════════════════════════
// APPLICATION LAYER
// ═══════════════════════════════════════════════════════════════
pub mod graph;
pub mod runtime;

// ═══════════════════════════════════════════════════════════════
// INFRASTRUCTURE LAYER
// ═══════════════════════════════════════════════════════════════
pub mod cache;
pub mod error;
pub mod event;
pub mod store;

// ═══════════════════════════════════════════════════════════════
// PUBLIC API RE-EXPORTS
// ═══════════════════════════════════════════════════════════════

// Error types
pub use error::{BraidError, FixSuggestion, Result};

// Domain model
pub use task::{CommandTemplate, Environment, FieldSpec, TaskDef, TaskKind};
pub use types::{
    assignable, check_value, Assignability, FormatRegistry, StaticFormatRegistry, TypeSpec,
};
pub use value::{AxisId, Bindings, Coord, InputSlot, LazyField};

// Graph construction
pub use graph::{GraphSpec, Invoke, Node, NodeHandle, StateShape, WorkflowBuilder};

// Execution
pub use runtime::{
    create_backend, LocalBackend, MockBackend, MockBehavior, RetryConfig, RunConfig, RunResult,
    RunStats, Scheduler, UnitError, UnitErrorKind, WorkUnit, WorkerBackend, WorkerFailure,
};

// Infrastructure
pub use cache::ExecutionCache;
pub use event::{Event, EventKind, EventLog};
pub use store::{UnitId, UnitRecord, UnitStatus, ValueStore};
