//! Run results
//!
//! The user-facing view of a completed submission: workflow outputs,
//! per-unit error reports, and run statistics (executed vs cache-hit
//! unit counts — a warm re-run shows zero executions).

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Value;

use super::worker::WorkerFailure;

/// Classification of a per-unit error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitErrorKind {
    /// The worker reported a failure (includes runtime type mismatches)
    Worker,
    Timeout,
    Cancelled,
    /// Not executed: an upstream dependency failed
    Unreachable,
    /// Not executed: an uncombined axis had zero states
    EmptySplit,
    /// Cache layer failure (corrupt entry, undigestable file input)
    Cache,
}

/// One failed or skipped unit
#[derive(Debug, Clone, Serialize)]
pub struct UnitError {
    pub unit: String,
    pub kind: UnitErrorKind,
    pub message: String,
    /// Captured stdout for worker failures
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stdout: Option<String>,
    /// Captured stderr for worker failures
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stderr: Option<String>,
    /// For unreachable units: the unit whose failure propagated here
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_unit: Option<String>,
}

impl UnitError {
    pub fn worker(unit: impl Into<String>, failure: &WorkerFailure) -> Self {
        Self {
            unit: unit.into(),
            kind: UnitErrorKind::Worker,
            message: failure.message.clone(),
            stdout: failure.stdout.clone(),
            stderr: failure.stderr.clone(),
            source_unit: None,
        }
    }

    pub fn new(unit: impl Into<String>, kind: UnitErrorKind, message: impl Into<String>) -> Self {
        Self {
            unit: unit.into(),
            kind,
            message: message.into(),
            stdout: None,
            stderr: None,
            source_unit: None,
        }
    }

    pub fn unreachable(unit: impl Into<String>, source: impl Into<String>) -> Self {
        let source = source.into();
        Self {
            unit: unit.into(),
            kind: UnitErrorKind::Unreachable,
            message: format!("upstream unit '{source}' did not produce outputs"),
            stdout: None,
            stderr: None,
            source_unit: Some(source),
        }
    }
}

/// Execution counters for one run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunStats {
    /// Work units enumerated (including unreachable ones)
    pub units_total: usize,
    /// Units actually dispatched to a worker
    pub units_executed: usize,
    /// Units satisfied from the cache
    pub cache_hits: usize,
}

/// Result of one workflow submission
#[derive(Debug)]
pub struct RunResult {
    /// Materialized workflow outputs (failed outputs are absent)
    pub outputs: BTreeMap<String, Value>,
    /// Per-unit errors, keyed by unit display id
    pub errors: BTreeMap<String, UnitError>,
    /// True if any unit failed or was skipped
    pub errored: bool,
    /// True if the run was cancelled
    pub cancelled: bool,
    pub stats: RunStats,
}

impl RunResult {
    pub fn output(&self, name: &str) -> Option<&Value> {
        self.outputs.get(name)
    }

    pub fn is_success(&self) -> bool {
        !self.errored && !self.cancelled
    }
}
