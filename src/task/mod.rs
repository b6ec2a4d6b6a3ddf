//! Task definitions
//!
//! A [`TaskDef`] is the immutable descriptor of one runnable unit of
//! work: typed input and output fields plus an executable. The three
//! executable kinds are a tagged variant, never inheritance:
//!
//! - `Function` — pure in-process closure over resolved bindings
//! - `Command` — shell command template with typed placeholders
//! - `SubWorkflow` — constructor closure expanded at execution time
//!
//! Definitions are registered once, shared as `Arc<TaskDef>`, and never
//! mutated afterwards.

pub mod template;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;
use crate::graph::GraphSpec;
use crate::runtime::retry::RetryConfig;
use crate::types::TypeSpec;
use crate::value::Bindings;

pub use template::CommandTemplate;

/// In-process executable: resolved inputs → outputs
pub type TaskFn = Arc<dyn Fn(&Bindings) -> anyhow::Result<Bindings> + Send + Sync>;

/// Sub-workflow constructor: concrete inputs → nested graph
pub type WorkflowCtor = Arc<dyn Fn(&Bindings) -> Result<GraphSpec> + Send + Sync>;

/// Descriptor of one input or output field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    pub ty: TypeSpec,
    pub default: Option<Value>,
    pub required: bool,
}

impl FieldSpec {
    /// Required input field
    pub fn required(name: impl Into<String>, ty: TypeSpec) -> Self {
        Self {
            name: name.into(),
            ty,
            default: None,
            required: true,
        }
    }

    /// Optional input field with a default
    pub fn optional(name: impl Into<String>, ty: TypeSpec, default: Value) -> Self {
        Self {
            name: name.into(),
            ty,
            default: Some(default),
            required: false,
        }
    }

    /// Output field
    pub fn out(name: impl Into<String>, ty: TypeSpec) -> Self {
        Self {
            name: name.into(),
            ty,
            default: None,
            required: false,
        }
    }
}

/// Execution environment binding, resolved per node.
///
/// The id participates in the cache key: the same inputs under a
/// different environment are a different cache entry.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Environment {
    pub id: String,
    pub vars: BTreeMap<String, String>,
}

impl Environment {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            vars: BTreeMap::new(),
        }
    }

    pub fn with_var(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.vars.insert(key.into(), value.into());
        self
    }
}

/// The executable kind of a task
#[derive(Clone)]
pub enum TaskKind {
    /// Pure in-process computation
    Function(TaskFn),
    /// External shell command
    Command(CommandTemplate),
    /// Nested workflow, expanded by the scheduler at execution time
    SubWorkflow(WorkflowCtor),
}

impl TaskKind {
    pub fn label(&self) -> &'static str {
        match self {
            TaskKind::Function(_) => "function",
            TaskKind::Command(_) => "command",
            TaskKind::SubWorkflow(_) => "sub-workflow",
        }
    }
}

impl fmt::Debug for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskKind::Function(_) => f.write_str("Function(..)"),
            TaskKind::Command(tpl) => f.debug_tuple("Command").field(&tpl.raw()).finish(),
            TaskKind::SubWorkflow(_) => f.write_str("SubWorkflow(..)"),
        }
    }
}

/// Immutable task descriptor
#[derive(Debug, Clone)]
pub struct TaskDef {
    pub id: Arc<str>,
    pub kind: TaskKind,
    pub inputs: Vec<FieldSpec>,
    pub outputs: Vec<FieldSpec>,
    pub env: Option<Environment>,
    pub retry: Option<RetryConfig>,
    pub timeout: Option<Duration>,
}

impl TaskDef {
    /// Define an in-process function task
    pub fn function<F>(id: impl Into<Arc<str>>, f: F) -> Self
    where
        F: Fn(&Bindings) -> anyhow::Result<Bindings> + Send + Sync + 'static,
    {
        Self {
            id: id.into(),
            kind: TaskKind::Function(Arc::new(f)),
            inputs: Vec::new(),
            outputs: Vec::new(),
            env: None,
            retry: None,
            timeout: None,
        }
    }

    /// Define a shell command task; input/output fields are derived from
    /// the template placeholders.
    pub fn command(id: impl Into<Arc<str>>, template: &str) -> Result<Self> {
        let template = CommandTemplate::parse(template)?;
        let inputs = template
            .inputs()
            .iter()
            .map(|i| FieldSpec {
                name: i.name.clone(),
                ty: i.ty.clone(),
                default: i.default.clone(),
                required: !i.optional,
            })
            .collect();
        let outputs = template
            .outputs()
            .iter()
            .map(|o| FieldSpec::out(o.name.clone(), o.ty.clone()))
            .collect();
        Ok(Self {
            id: id.into(),
            kind: TaskKind::Command(template),
            inputs,
            outputs,
            env: None,
            retry: None,
            timeout: None,
        })
    }

    /// Define a sub-workflow task. The constructor runs at execution
    /// time against concrete inputs, so nesting may recurse.
    pub fn workflow<F>(id: impl Into<Arc<str>>, ctor: F) -> Self
    where
        F: Fn(&Bindings) -> Result<GraphSpec> + Send + Sync + 'static,
    {
        Self {
            id: id.into(),
            kind: TaskKind::SubWorkflow(Arc::new(ctor)),
            inputs: Vec::new(),
            outputs: Vec::new(),
            env: None,
            retry: None,
            timeout: None,
        }
    }

    pub fn with_input(mut self, field: FieldSpec) -> Self {
        self.inputs.retain(|f| f.name != field.name);
        self.inputs.push(field);
        self
    }

    pub fn with_output(mut self, field: FieldSpec) -> Self {
        self.outputs.retain(|f| f.name != field.name);
        self.outputs.push(field);
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

    /// Look up an input field by name
    pub fn input(&self, name: &str) -> Option<&FieldSpec> {
        self.inputs.iter().find(|f| f.name == name)
    }

    /// Look up an output field by name
    pub fn output(&self, name: &str) -> Option<&FieldSpec> {
        self.outputs.iter().find(|f| f.name == name)
    }

    pub fn is_sub_workflow(&self) -> bool {
        matches!(self.kind, TaskKind::SubWorkflow(_))
    }
}
