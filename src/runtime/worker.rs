//! Worker backends
//!
//! Uniform contract for executing work units: the scheduler hands a
//! backend a [`WorkUnit`] (task, resolved inputs, environment) and gets
//! back output bindings or a [`WorkerFailure`] with captured
//! stdout/stderr. Backends are created by name through
//! [`create_backend`]:
//!
//! | Name | Use case |
//! |------|----------|
//! | `local` | In-process functions and `sh -c` commands |
//! | `mock` | Tests: scripted outputs/failures, submission recording |

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use camino::{Utf8Path, Utf8PathBuf};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::error::{BraidError, Result};
use crate::store::UnitId;
use crate::task::{Environment, TaskDef, TaskKind};
use crate::types::TypeSpec;
use crate::value::Bindings;

/// A single dispatchable execution instance
#[derive(Debug, Clone)]
pub struct WorkUnit {
    pub id: UnitId,
    pub task: Arc<TaskDef>,
    pub inputs: Bindings,
    pub env: Environment,
}

/// Worker-side failure with captured process output
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct WorkerFailure {
    pub message: String,
    pub stdout: Option<String>,
    pub stderr: Option<String>,
}

impl WorkerFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            stdout: None,
            stderr: None,
        }
    }

    pub fn with_capture(message: impl Into<String>, stdout: String, stderr: String) -> Self {
        Self {
            message: message.into(),
            stdout: Some(stdout),
            stderr: Some(stderr),
        }
    }
}

/// Uniform worker contract: submit a unit, get outputs or a failure.
#[async_trait]
pub trait WorkerBackend: Send + Sync {
    /// Backend name (e.g. "local", "mock")
    fn name(&self) -> &str;

    /// Execute one work unit to completion
    async fn submit(&self, unit: &WorkUnit) -> std::result::Result<Bindings, WorkerFailure>;

    /// Best-effort abort of a dispatched unit
    async fn cancel(&self, _unit: &UnitId) {}

    /// Whether the backend's environment is usable
    fn is_available(&self) -> bool {
        true
    }
}

/// Create a backend by name
pub fn create_backend(name: &str) -> Result<Arc<dyn WorkerBackend>> {
    match name.to_lowercase().as_str() {
        "local" => Ok(Arc::new(LocalBackend::new())),
        "mock" => Ok(Arc::new(MockBackend::new())),
        other => Err(BraidError::UnknownBackend {
            name: other.to_string(),
        }),
    }
}

// ═══════════════════════════════════════════════════════════════
// LOCAL BACKEND
// ═══════════════════════════════════════════════════════════════

/// Executes functions on the blocking pool and commands via `sh -c`.
///
/// Each command unit gets a scratch directory under the work root;
/// declared file outputs are materialized there and returned as paths.
pub struct LocalBackend {
    work_root: Utf8PathBuf,
}

impl LocalBackend {
    pub fn new() -> Self {
        let mut root = std::env::temp_dir();
        root.push("braid-work");
        Self {
            work_root: Utf8PathBuf::from_path_buf(root)
                .unwrap_or_else(|_| Utf8PathBuf::from("/tmp/braid-work")),
        }
    }

    pub fn with_work_root(root: impl AsRef<Utf8Path>) -> Self {
        Self {
            work_root: root.as_ref().to_owned(),
        }
    }

    async fn run_command(
        &self,
        unit: &WorkUnit,
        template: &crate::task::CommandTemplate,
    ) -> std::result::Result<Bindings, WorkerFailure> {
        let scratch = self.work_root.join(Uuid::new_v4().to_string());
        std::fs::create_dir_all(&scratch)
            .map_err(|e| WorkerFailure::new(format!("cannot create scratch dir: {e}")))?;

        // Relative output paths resolve under the scratch dir
        let rel_paths = template
            .resolve_output_paths(&unit.inputs)
            .map_err(|e| WorkerFailure::new(e.to_string()))?;
        let mut out_paths = std::collections::BTreeMap::new();
        for (name, rel) in rel_paths {
            out_paths.insert(name, scratch.join(rel).to_string());
        }

        let cmd = template.render(&unit.inputs, &out_paths);
        debug!(unit = %unit.id, %cmd, "dispatching command");

        let output = tokio::process::Command::new("sh")
            .arg("-c")
            .arg(&cmd)
            .current_dir(&scratch)
            .envs(&unit.env.vars)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| WorkerFailure::new(format!("failed to spawn command: {e}")))?;

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();

        if !output.status.success() {
            return Err(WorkerFailure::with_capture(
                format!("command failed with {}", output.status),
                stdout,
                stderr,
            ));
        }

        let mut outputs = Bindings::new();
        for field in template.outputs() {
            match out_paths.get(&field.name) {
                Some(path) => {
                    if !Utf8Path::new(path).exists() {
                        return Err(WorkerFailure::with_capture(
                            format!("declared file output '{}' was not produced", field.name),
                            stdout,
                            stderr,
                        ));
                    }
                    outputs.insert(field.name.clone(), Value::String(path.clone()));
                }
                None => {
                    outputs.insert(
                        field.name.clone(),
                        parse_stdout(stdout.trim(), &field.ty).map_err(|reason| {
                            WorkerFailure::with_capture(reason, stdout.clone(), stderr.clone())
                        })?,
                    );
                }
            }
        }
        // Bare commands still expose their stdout
        if template.outputs().is_empty() {
            outputs.insert("stdout".into(), Value::String(stdout.trim().to_string()));
        }

        Ok(outputs)
    }
}

impl Default for LocalBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl WorkerBackend for LocalBackend {
    fn name(&self) -> &str {
        "local"
    }

    #[instrument(skip(self, unit), fields(unit = %unit.id, kind = unit.task.kind.label()))]
    async fn submit(&self, unit: &WorkUnit) -> std::result::Result<Bindings, WorkerFailure> {
        match &unit.task.kind {
            TaskKind::Function(f) => {
                let f = Arc::clone(f);
                let inputs = unit.inputs.clone();
                tokio::task::spawn_blocking(move || f(&inputs))
                    .await
                    .map_err(|e| WorkerFailure::new(format!("function panicked: {e}")))?
                    .map_err(|e| WorkerFailure::new(e.to_string()))
            }
            TaskKind::Command(template) => self.run_command(unit, template).await,
            TaskKind::SubWorkflow(_) => Err(WorkerFailure::new(
                "sub-workflows are expanded by the scheduler, not dispatched to a backend",
            )),
        }
    }
}

/// Parse trimmed stdout into a declared output type
fn parse_stdout(stdout: &str, ty: &TypeSpec) -> std::result::Result<Value, String> {
    match ty {
        TypeSpec::Str | TypeSpec::Any => Ok(Value::String(stdout.to_string())),
        TypeSpec::Int => stdout
            .parse::<i64>()
            .map(Value::from)
            .map_err(|_| format!("stdout '{stdout}' is not an integer")),
        TypeSpec::Float => stdout
            .parse::<f64>()
            .map(Value::from)
            .map_err(|_| format!("stdout '{stdout}' is not a float")),
        TypeSpec::Bool => match stdout {
            "true" | "1" => Ok(Value::Bool(true)),
            "false" | "0" => Ok(Value::Bool(false)),
            other => Err(format!("stdout '{other}' is not a bool")),
        },
        _ => serde_json::from_str(stdout)
            .map_err(|_| format!("stdout is not valid JSON for type {ty}")),
    }
}

// ═══════════════════════════════════════════════════════════════
// MOCK BACKEND
// ═══════════════════════════════════════════════════════════════

/// Scripted behavior for one task id on the mock backend
#[derive(Debug, Clone)]
pub enum MockBehavior {
    /// Always return these outputs
    Outputs(Bindings),
    /// Always fail with this message
    Fail(String),
    /// Fail the first `n` submissions, then execute normally
    FailTimes(u32, String),
}

/// Test backend: records submissions, executes function tasks, and
/// honors scripted per-task overrides.
pub struct MockBackend {
    behaviors: DashMap<String, MockBehavior>,
    fail_counters: DashMap<String, u32>,
    submitted: Mutex<Vec<String>>,
    submissions: AtomicUsize,
}

impl MockBackend {
    pub fn new() -> Self {
        Self {
            behaviors: DashMap::new(),
            fail_counters: DashMap::new(),
            submitted: Mutex::new(Vec::new()),
            submissions: AtomicUsize::new(0),
        }
    }

    /// Script a behavior for every unit of the given task
    pub fn script(&self, task_id: impl Into<String>, behavior: MockBehavior) {
        self.behaviors.insert(task_id.into(), behavior);
    }

    /// Total number of submissions seen
    pub fn submissions(&self) -> usize {
        self.submissions.load(Ordering::SeqCst)
    }

    /// Display ids of submitted units, in submission order
    pub fn submitted_units(&self) -> Vec<String> {
        self.submitted.lock().clone()
    }

    fn execute_function(
        &self,
        unit: &WorkUnit,
    ) -> std::result::Result<Bindings, WorkerFailure> {
        match &unit.task.kind {
            TaskKind::Function(f) => f(&unit.inputs).map_err(|e| WorkerFailure::new(e.to_string())),
            _ => Err(WorkerFailure::new(format!(
                "mock backend has no script for {} task '{}'",
                unit.task.kind.label(),
                unit.task.id
            ))),
        }
    }
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl WorkerBackend for MockBackend {
    fn name(&self) -> &str {
        "mock"
    }

    async fn submit(&self, unit: &WorkUnit) -> std::result::Result<Bindings, WorkerFailure> {
        self.submissions.fetch_add(1, Ordering::SeqCst);
        self.submitted.lock().push(unit.id.to_string());

        let behavior = self.behaviors.get(&*unit.task.id).map(|b| b.clone());
        match behavior {
            Some(MockBehavior::Outputs(outputs)) => Ok(outputs),
            Some(MockBehavior::Fail(message)) => Err(WorkerFailure::new(message)),
            Some(MockBehavior::FailTimes(n, message)) => {
                let mut counter = self.fail_counters.entry(unit.task.id.to_string()).or_insert(0);
                if *counter < n {
                    *counter += 1;
                    Err(WorkerFailure::new(message))
                } else {
                    drop(counter);
                    self.execute_function(unit)
                }
            }
            None => self.execute_function(unit),
        }
    }
}
