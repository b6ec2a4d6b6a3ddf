//! Frozen workflow graphs
//!
//! A [`GraphSpec`] is the pure data structure a builder produces:
//! insertion-ordered nodes (insertion order is topological order — the
//! builder only lets inputs reference already-added nodes), declared
//! workflow inputs, and exported outputs. Edges are implicit in the lazy
//! input slots. Nothing in here executes; the scheduler consumes the
//! frozen spec.

pub mod builder;
pub mod state;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use indexmap::IndexMap;

use crate::task::{Environment, FieldSpec, TaskDef};
use crate::runtime::retry::RetryConfig;
use crate::value::{AxisId, InputSlot, LazyField};

pub use builder::{Invoke, NodeHandle, WorkflowBuilder};
pub use state::{resolve_shapes, AxisInfo, NodeStates, StateShape};

/// One split declaration on a node: one axis advancing one or more
/// fields in lockstep (a group with >1 field is a *linked* split).
#[derive(Debug, Clone, PartialEq)]
pub struct SplitGroup {
    pub axis: AxisId,
    pub fields: Vec<String>,
    /// Cardinality, taken from the bound sequences at build time
    pub len: usize,
}

/// A task invocation frozen into the graph
#[derive(Debug, Clone)]
pub struct Node {
    pub name: Arc<str>,
    pub task: Arc<TaskDef>,
    pub inputs: BTreeMap<String, InputSlot>,
    pub splits: Vec<SplitGroup>,
    /// Axes closed at this node: outputs are gathered along them and the
    /// axes disappear from the downstream state shape
    pub combines: Vec<AxisId>,
    pub env: Option<Environment>,
    pub retry: Option<RetryConfig>,
    pub timeout: Option<Duration>,
}

impl Node {
    /// The split group covering `field`, if any
    pub fn split_group_for(&self, field: &str) -> Option<&SplitGroup> {
        self.splits
            .iter()
            .find(|g| g.fields.iter().any(|f| f == field))
    }

    /// Node-level environment, falling back to the task definition's
    pub fn effective_env(&self) -> Option<&Environment> {
        self.env.as_ref().or(self.task.env.as_ref())
    }

    pub fn effective_retry(&self) -> Option<&RetryConfig> {
        self.retry.as_ref().or(self.task.retry.as_ref())
    }

    pub fn effective_timeout(&self) -> Option<Duration> {
        self.timeout.or(self.task.timeout)
    }

    /// Names of the upstream nodes this node reads from
    pub fn producers(&self) -> impl Iterator<Item = &Arc<str>> {
        self.inputs
            .values()
            .filter_map(|slot| slot.as_lazy().map(|l| &l.node))
    }
}

/// Frozen DAG: the builder's output and the scheduler's input
#[derive(Debug, Clone)]
pub struct GraphSpec {
    pub name: Arc<str>,
    /// Declared workflow inputs
    pub inputs: Vec<FieldSpec>,
    /// Nodes in insertion (= topological) order
    pub nodes: IndexMap<Arc<str>, Node>,
    /// Exported workflow outputs
    pub outputs: IndexMap<String, LazyField>,
}

impl GraphSpec {
    pub fn node(&self, name: &str) -> Option<&Node> {
        self.nodes.get(name)
    }

    pub fn input(&self, name: &str) -> Option<&FieldSpec> {
        self.inputs.iter().find(|f| f.name == name)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}
