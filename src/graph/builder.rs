//! Workflow construction context
//!
//! [`WorkflowBuilder`] is the construction context: nodes are added one
//! at a time, every wire is type-checked as it is made, and the result
//! freezes into a [`GraphSpec`]. Because a [`NodeHandle`] only exists
//! after its node was added, lazy inputs can never point forward —
//! insertion order is topological order by construction.
//!
//! `add` never runs a task; it records a pure data structure.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use indexmap::IndexMap;
use rustc_hash::FxHashSet;
use serde_json::Value;
use tracing::debug;

use crate::error::{BraidError, Result};
use crate::runtime::retry::RetryConfig;
use crate::task::{Environment, FieldSpec, TaskDef};
use crate::types::{assignable, check_value, coerce_value, Assignability, FormatRegistry, StaticFormatRegistry, TypeSpec};
use crate::value::{AxisId, InputSlot, LazyField};

use super::{GraphSpec, Node, SplitGroup};

/// A pending task invocation: the task plus everything declared on the
/// call site (bindings, name, split/combine, overrides).
#[derive(Debug, Clone)]
pub struct Invoke {
    task: Arc<TaskDef>,
    name: Option<String>,
    inputs: BTreeMap<String, InputSlot>,
    splits: Vec<Vec<String>>,
    combines: Vec<String>,
    env: Option<Environment>,
    retry: Option<RetryConfig>,
    timeout: Option<Duration>,
}

impl Invoke {
    pub fn task(task: &TaskDef) -> Self {
        Self::new(Arc::new(task.clone()))
    }

    pub fn new(task: Arc<TaskDef>) -> Self {
        Self {
            task,
            name: None,
            inputs: BTreeMap::new(),
            splits: Vec::new(),
            combines: Vec::new(),
            env: None,
            retry: None,
            timeout: None,
        }
    }

    /// Explicit node name (must be unique; unnamed nodes get the task id
    /// with a numeric suffix when needed)
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Bind an input field to a concrete value, a lazy field, or a
    /// workflow parameter
    pub fn with(mut self, field: impl Into<String>, value: impl Into<InputSlot>) -> Self {
        self.inputs.insert(field.into(), value.into());
        self
    }

    /// Iterate execution over the bound sequence of `field` (one axis)
    pub fn split(mut self, field: impl Into<String>) -> Self {
        self.splits.push(vec![field.into()]);
        self
    }

    /// Iterate several fields in lockstep (one linked axis; equal lengths)
    pub fn split_linked<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.splits.push(fields.into_iter().map(Into::into).collect());
        self
    }

    /// Close an axis: gather outputs along it into a sequence. Accepts a
    /// local split field name or an upstream `"node.field"` axis id.
    pub fn combine(mut self, axis: impl Into<String>) -> Self {
        self.combines.push(axis.into());
        self
    }

    pub fn with_env(mut self, env: Environment) -> Self {
        self.env = Some(env);
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = Some(retry);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Proxy over a just-added node's outputs.
///
/// Attribute access is spelled `handle.output("field")`; the returned
/// [`LazyField`] carries the declared output type (wrapped in `Seq` when
/// the node combines axes) and the node's visible split axes.
#[derive(Debug, Clone)]
pub struct NodeHandle {
    name: Arc<str>,
    outputs: Vec<(Arc<str>, TypeSpec)>,
    axes: Vec<AxisId>,
    combined: bool,
}

impl NodeHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Lazy reference to one output field
    pub fn output(&self, field: &str) -> Result<LazyField> {
        let (field, ty) = self
            .outputs
            .iter()
            .find(|(name, _)| &**name == field)
            .ok_or_else(|| BraidError::UnknownOutputField {
                node: self.name.to_string(),
                field: field.to_string(),
            })?;
        let ty = if self.combined {
            TypeSpec::seq(ty.clone())
        } else {
            ty.clone()
        };
        Ok(LazyField {
            node: Arc::clone(&self.name),
            field: Arc::clone(field),
            ty,
            axes: self.axes.clone(),
        })
    }

    /// Lazy reference for single-output tasks
    pub fn lazy(&self) -> Result<LazyField> {
        match self.outputs.as_slice() {
            [(field, _)] => {
                let field = field.to_string();
                self.output(&field)
            }
            _ => Err(BraidError::UnknownOutputField {
                node: self.name.to_string(),
                field: format!("<single output expected, task has {}>", self.outputs.len()),
            }),
        }
    }
}

/// The construction context
pub struct WorkflowBuilder {
    name: Arc<str>,
    inputs: Vec<FieldSpec>,
    nodes: IndexMap<Arc<str>, Node>,
    outputs: IndexMap<String, LazyField>,
    formats: Arc<dyn FormatRegistry>,
    used_names: FxHashSet<Arc<str>>,
}

impl WorkflowBuilder {
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        Self {
            name: name.into(),
            inputs: Vec::new(),
            nodes: IndexMap::new(),
            outputs: IndexMap::new(),
            formats: Arc::new(StaticFormatRegistry::new()),
            used_names: FxHashSet::default(),
        }
    }

    /// Run a constructor closure against a fresh builder and freeze.
    pub fn scope<F>(name: impl Into<Arc<str>>, f: F) -> Result<GraphSpec>
    where
        F: FnOnce(&mut WorkflowBuilder) -> Result<()>,
    {
        let mut builder = WorkflowBuilder::new(name);
        f(&mut builder)?;
        builder.freeze()
    }

    /// Install a format registry for file-type checks
    pub fn with_formats(mut self, formats: Arc<dyn FormatRegistry>) -> Self {
        self.formats = formats;
        self
    }

    /// Declare a workflow-level input
    pub fn declare_input(&mut self, field: FieldSpec) -> &mut Self {
        self.inputs.retain(|f| f.name != field.name);
        self.inputs.push(field);
        self
    }

    /// Slot referencing a declared workflow input
    pub fn param(&self, name: &str) -> Result<InputSlot> {
        if self.inputs.iter().any(|f| f.name == name) {
            Ok(InputSlot::Param(name.to_string()))
        } else {
            Err(BraidError::UnknownWorkflowInput {
                name: name.to_string(),
            })
        }
    }

    /// Names of the nodes added so far.
    ///
    /// Constructors can inspect the in-progress workflow while building
    /// (read node names, look at bound inputs) without running anything.
    pub fn node_names(&self) -> impl Iterator<Item = &Arc<str>> {
        self.nodes.keys()
    }

    pub fn node(&self, name: &str) -> Option<&Node> {
        self.nodes.get(name)
    }

    /// Add a task invocation as a new node.
    ///
    /// Resolves and type-checks every input, records split/combine axes,
    /// appends the node, and returns the outputs proxy.
    pub fn add(&mut self, invoke: Invoke) -> Result<NodeHandle> {
        let Invoke {
            task,
            name,
            inputs: bound,
            splits,
            combines,
            env,
            retry,
            timeout,
        } = invoke;

        let name = self.assign_name(name, &task)?;

        // Fields covered by a split advance element-wise; their bound
        // values are sequences of the declared element type
        let mut split_fields: FxHashSet<&str> = FxHashSet::default();
        for group in &splits {
            for field in group {
                if task.input(field).is_none() {
                    return Err(BraidError::SplitUnknownField {
                        node: name.to_string(),
                        field: field.clone(),
                    });
                }
                if !split_fields.insert(field.as_str()) {
                    return Err(BraidError::DuplicateSplit {
                        node: name.to_string(),
                        field: field.clone(),
                    });
                }
            }
        }

        let mut inputs = BTreeMap::new();
        for (field, slot) in bound {
            let spec = task.input(&field).ok_or_else(|| BraidError::UnknownInput {
                node: name.to_string(),
                field: field.clone(),
                task: task.id.to_string(),
            })?;
            let is_split = split_fields.contains(field.as_str());
            let slot = self.check_slot(&name, spec, slot, is_split)?;
            inputs.insert(field, slot);
        }

        // Unbound fields: defaults are materialized, required fields error
        for spec in &task.inputs {
            if inputs.contains_key(&spec.name) {
                continue;
            }
            if let Some(default) = &spec.default {
                inputs.insert(spec.name.clone(), InputSlot::Concrete(default.clone()));
            } else if spec.required {
                return Err(BraidError::MissingRequiredInput {
                    node: name.to_string(),
                    field: spec.name.clone(),
                });
            }
        }

        // Split groups: axis id from the first field, cardinality from
        // the bound sequences, linked fields must agree
        let mut groups = Vec::new();
        for group in splits {
            let Some(first) = group.first() else {
                continue;
            };
            let axis: AxisId = Arc::from(format!("{name}.{first}"));
            let mut len = None;
            for field in &group {
                let seq_len = match inputs.get(field) {
                    Some(InputSlot::Concrete(Value::Array(items))) => items.len(),
                    _ => {
                        return Err(BraidError::SplitNotSequence {
                            node: name.to_string(),
                            field: field.clone(),
                        })
                    }
                };
                match len {
                    None => len = Some(seq_len),
                    Some(expected) if expected != seq_len => {
                        return Err(BraidError::LinkedLengthMismatch {
                            node: name.to_string(),
                            field: field.clone(),
                            expected,
                            actual: seq_len,
                        })
                    }
                    Some(_) => {}
                }
            }
            groups.push(SplitGroup {
                axis,
                fields: group,
                len: len.unwrap_or(0),
            });
        }

        // Full axis set: axes inherited through lazy inputs (first seen
        // wins the position), then local split axes
        let mut full_axes: Vec<AxisId> = Vec::new();
        for slot in inputs.values() {
            if let InputSlot::Lazy(lazy) = slot {
                for axis in &lazy.axes {
                    if !full_axes.contains(axis) {
                        full_axes.push(Arc::clone(axis));
                    }
                }
            }
        }
        for group in &groups {
            full_axes.push(Arc::clone(&group.axis));
        }

        // Combine targets resolve to an axis present on this node
        let mut combined: Vec<AxisId> = Vec::new();
        for target in combines {
            let axis: AxisId = if target.contains('.') {
                Arc::from(target.as_str())
            } else {
                match groups
                    .iter()
                    .find(|g| g.fields.iter().any(|f| *f == target))
                {
                    Some(group) => Arc::clone(&group.axis),
                    None => Arc::from(format!("{name}.{target}")),
                }
            };
            if !full_axes.contains(&axis) {
                return Err(BraidError::UnknownAxis {
                    node: name.to_string(),
                    axis: axis.to_string(),
                });
            }
            if !combined.contains(&axis) {
                combined.push(axis);
            }
        }

        let visible: Vec<AxisId> = full_axes
            .iter()
            .filter(|a| !combined.contains(a))
            .cloned()
            .collect();

        debug!(node = %name, task = %task.id, axes = full_axes.len(), "node added");

        let handle = NodeHandle {
            name: Arc::clone(&name),
            outputs: task
                .outputs
                .iter()
                .map(|f| (Arc::from(f.name.as_str()), f.ty.clone()))
                .collect(),
            axes: visible,
            combined: !combined.is_empty(),
        };

        self.nodes.insert(
            Arc::clone(&name),
            Node {
                name,
                task,
                inputs,
                splits: groups,
                combines: combined,
                env,
                retry,
                timeout,
            },
        );

        Ok(handle)
    }

    /// Export a lazy field as a workflow output
    pub fn export(&mut self, name: impl Into<String>, lazy: LazyField) -> Result<()> {
        let name = name.into();
        if self.outputs.contains_key(&name) {
            return Err(BraidError::DuplicateOutput { name });
        }
        let node = self
            .nodes
            .get(&*lazy.node)
            .ok_or_else(|| BraidError::UnknownOutputField {
                node: lazy.node.to_string(),
                field: lazy.field.to_string(),
            })?;
        if node.task.output(&lazy.field).is_none() {
            return Err(BraidError::UnknownOutputField {
                node: lazy.node.to_string(),
                field: lazy.field.to_string(),
            });
        }
        self.outputs.insert(name, lazy);
        Ok(())
    }

    /// Freeze into an immutable [`GraphSpec`]
    pub fn freeze(self) -> Result<GraphSpec> {
        Ok(GraphSpec {
            name: self.name,
            inputs: self.inputs,
            nodes: self.nodes,
            outputs: self.outputs,
        })
    }

    fn assign_name(&mut self, explicit: Option<String>, task: &TaskDef) -> Result<Arc<str>> {
        let name: Arc<str> = match explicit {
            Some(name) => {
                let name: Arc<str> = Arc::from(name.as_str());
                if self.used_names.contains(&name) {
                    return Err(BraidError::DuplicateNodeName {
                        name: name.to_string(),
                    });
                }
                name
            }
            None => {
                if !self.used_names.contains(&task.id) {
                    Arc::clone(&task.id)
                } else {
                    let mut counter = 2;
                    loop {
                        let candidate: Arc<str> = Arc::from(format!("{}-{counter}", task.id));
                        if !self.used_names.contains(&candidate) {
                            break candidate;
                        }
                        counter += 1;
                    }
                }
            }
        };
        self.used_names.insert(Arc::clone(&name));
        Ok(name)
    }

    fn check_slot(
        &self,
        node: &Arc<str>,
        spec: &FieldSpec,
        slot: InputSlot,
        is_split: bool,
    ) -> Result<InputSlot> {
        match slot {
            InputSlot::Concrete(value) => {
                if is_split {
                    let items = match value {
                        Value::Array(items) => items,
                        _ => {
                            return Err(BraidError::SplitNotSequence {
                                node: node.to_string(),
                                field: spec.name.clone(),
                            })
                        }
                    };
                    let mut coerced = Vec::with_capacity(items.len());
                    for item in items {
                        match check_value(&item, &spec.ty, self.formats.as_ref()) {
                            Assignability::Reject => {
                                return Err(BraidError::ValueMismatch {
                                    node: node.to_string(),
                                    field: spec.name.clone(),
                                    expected: spec.ty.to_string(),
                                    actual: item.to_string(),
                                })
                            }
                            Assignability::Coerce => coerced.push(coerce_value(item, &spec.ty)),
                            Assignability::Ok => coerced.push(item),
                        }
                    }
                    Ok(InputSlot::Concrete(Value::Array(coerced)))
                } else {
                    match check_value(&value, &spec.ty, self.formats.as_ref()) {
                        Assignability::Reject => Err(BraidError::ValueMismatch {
                            node: node.to_string(),
                            field: spec.name.clone(),
                            expected: spec.ty.to_string(),
                            actual: value.to_string(),
                        }),
                        Assignability::Coerce => {
                            Ok(InputSlot::Concrete(coerce_value(value, &spec.ty)))
                        }
                        Assignability::Ok => Ok(InputSlot::Concrete(value)),
                    }
                }
            }
            InputSlot::Lazy(lazy) => {
                if is_split {
                    return Err(BraidError::SplitNotSequence {
                        node: node.to_string(),
                        field: spec.name.clone(),
                    });
                }
                match assignable(&lazy.ty, &spec.ty, self.formats.as_ref()) {
                    Assignability::Reject => Err(BraidError::TypeMismatch {
                        src_node: lazy.node.to_string(),
                        src_field: lazy.field.to_string(),
                        src_ty: lazy.ty.to_string(),
                        dst_node: node.to_string(),
                        dst_field: spec.name.clone(),
                        dst_ty: spec.ty.to_string(),
                    }),
                    _ => Ok(InputSlot::Lazy(lazy)),
                }
            }
            InputSlot::Param(param) => {
                let declared = self
                    .inputs
                    .iter()
                    .find(|f| f.name == param)
                    .ok_or_else(|| BraidError::UnknownWorkflowInput {
                        name: param.clone(),
                    })?;
                match assignable(&declared.ty, &spec.ty, self.formats.as_ref()) {
                    Assignability::Reject => Err(BraidError::TypeMismatch {
                        src_node: "inputs".to_string(),
                        src_field: param,
                        src_ty: declared.ty.to_string(),
                        dst_node: node.to_string(),
                        dst_field: spec.name.clone(),
                        dst_ty: spec.ty.to_string(),
                    }),
                    _ => Ok(InputSlot::Param(param)),
                }
            }
        }
    }
}
