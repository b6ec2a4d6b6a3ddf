//! Run event log
//!
//! Append-only audit trail of one scheduler run: monotonic sequence
//! ids, millisecond timestamps relative to run start, serializable
//! event kinds. Structured logging goes through `tracing`; the event
//! log is the inspectable record a caller can export after submission.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;
use serde::Serialize;
use serde_json::Value;

/// Single event in the run log
#[derive(Debug, Clone, Serialize)]
pub struct Event {
    /// Monotonic sequence id (ordering)
    pub id: u64,
    /// Time since run start (ms)
    pub timestamp_ms: u64,
    pub kind: EventKind,
}

/// All event types
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    RunStarted {
        workflow: Arc<str>,
        node_count: usize,
    },
    RunCompleted {
        duration_ms: u64,
        errored: bool,
    },
    RunCancelled,

    UnitScheduled {
        unit: String,
    },
    UnitStarted {
        unit: String,
        inputs: Value,
    },
    CacheHit {
        unit: String,
        key: String,
    },
    UnitCompleted {
        unit: String,
        duration_ms: u64,
    },
    UnitFailed {
        unit: String,
        error: String,
        duration_ms: u64,
    },
    UnitUnreachable {
        unit: String,
        source: String,
    },
}

#[derive(Debug)]
struct Inner {
    events: RwLock<Vec<Event>>,
    next_id: AtomicU64,
    start: Instant,
}

/// Thread-safe, append-only log of run events
#[derive(Debug, Clone)]
pub struct EventLog {
    inner: Arc<Inner>,
}

impl EventLog {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                events: RwLock::new(Vec::new()),
                next_id: AtomicU64::new(0),
                start: Instant::now(),
            }),
        }
    }

    /// Append an event
    pub fn emit(&self, kind: EventKind) {
        let event = Event {
            id: self.inner.next_id.fetch_add(1, Ordering::SeqCst),
            timestamp_ms: self.inner.start.elapsed().as_millis() as u64,
            kind,
        };
        self.inner.events.write().push(event);
    }

    /// Snapshot of all events so far
    pub fn events(&self) -> Vec<Event> {
        self.inner.events.read().clone()
    }

    /// Events touching one unit (by display id)
    pub fn filter_unit(&self, unit: &str) -> Vec<Event> {
        self.inner
            .events
            .read()
            .iter()
            .filter(|e| match &e.kind {
                EventKind::UnitScheduled { unit: u }
                | EventKind::UnitStarted { unit: u, .. }
                | EventKind::CacheHit { unit: u, .. }
                | EventKind::UnitCompleted { unit: u, .. }
                | EventKind::UnitFailed { unit: u, .. }
                | EventKind::UnitUnreachable { unit: u, .. } => u == unit,
                _ => false,
            })
            .cloned()
            .collect()
    }

    /// Export the log as a JSON array
    pub fn to_json(&self) -> Value {
        serde_json::to_value(self.events()).unwrap_or(Value::Null)
    }

    pub fn len(&self) -> usize {
        self.inner.events.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.events.read().is_empty()
    }
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new()
    }
}
