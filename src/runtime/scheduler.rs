//! Scheduler/submitter
//!
//! Drives a frozen [`GraphSpec`] to completion: resolves workflow
//! inputs, expands state shapes, enumerates work units in dependency
//! order, consults the cache, dispatches to the worker backend through
//! a `JoinSet`, and routes results back into the [`ValueStore`].
//!
//! One logical scheduler task owns all graph bookkeeping; mutation
//! happens between suspension points (`join_next`, cache waits,
//! cancellation), so no locks guard the run state itself. Workers run
//! in parallel on the runtime.
//!
//! Failures are isolated per unit: dependents of a failed cell become
//! *unreachable* (never dispatched) and reference the failing unit;
//! independent branches keep running. Sub-workflow nodes are expanded
//! here at execution time — the constructor sees concrete inputs, so
//! nesting may recurse.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use rustc_hash::{FxHashMap, FxHashSet};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::cache::{self, CacheAcquire, CacheClaim, ExecutionCache};
use crate::error::{BraidError, Result};
use crate::event::{EventKind, EventLog};
use crate::graph::state::{collect_output, resolve_unit_inputs, InputResolution, OutputError};
use crate::graph::{resolve_shapes, GraphSpec, Node, NodeStates};
use crate::store::{UnitId, UnitRecord, ValueStore};
use crate::task::{Environment, TaskKind};
use crate::types::{check_value, coerce_value, Assignability, FormatRegistry, StaticFormatRegistry};
use crate::value::{Bindings, InputSlot};

use super::result::{RunResult, RunStats, UnitError, UnitErrorKind};
use super::retry::{RetryConfig, RetryPolicy};
use super::worker::{WorkUnit, WorkerBackend, WorkerFailure};

/// Configuration of one scheduler instance
#[derive(Clone)]
pub struct RunConfig {
    pub backend: Arc<dyn WorkerBackend>,
    pub cache: Option<Arc<ExecutionCache>>,
    pub formats: Arc<dyn FormatRegistry>,
    /// Maximum number of units in flight at once
    pub max_concurrent_units: usize,
    /// Wall-clock timeout per unit unless the task/node overrides it
    pub default_timeout: Duration,
    /// Retry policy unless the task/node overrides it
    pub default_retry: RetryConfig,
}

impl RunConfig {
    pub fn new(backend: Arc<dyn WorkerBackend>) -> Self {
        Self {
            backend,
            cache: None,
            formats: Arc::new(StaticFormatRegistry::new()),
            max_concurrent_units: 10,
            default_timeout: Duration::from_secs(300),
            default_retry: RetryConfig::default(),
        }
    }

    pub fn with_cache(mut self, cache: Arc<ExecutionCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_formats(mut self, formats: Arc<dyn FormatRegistry>) -> Self {
        self.formats = formats;
        self
    }

    pub fn with_max_concurrent_units(mut self, max: usize) -> Self {
        self.max_concurrent_units = max.max(1);
        self
    }

    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    pub fn with_default_retry(mut self, retry: RetryConfig) -> Self {
        self.default_retry = retry;
        self
    }
}

/// Shared run context handed into spawned unit futures
#[derive(Clone)]
struct RunCtx {
    config: Arc<RunConfig>,
    events: EventLog,
}

/// Workflow scheduler: submits frozen graphs against a backend
pub struct Scheduler {
    config: Arc<RunConfig>,
    events: EventLog,
}

impl Scheduler {
    pub fn new(config: RunConfig) -> Self {
        Self {
            config: Arc::new(config),
            events: EventLog::new(),
        }
    }

    /// Event log of this scheduler's runs
    pub fn events(&self) -> &EventLog {
        &self.events
    }

    /// Run a workflow to completion
    pub async fn submit(&self, spec: &GraphSpec, inputs: Bindings) -> Result<RunResult> {
        self.submit_with_cancel(spec, inputs, CancellationToken::new())
            .await
    }

    /// Run a workflow; cancelling the token stops dispatch, aborts
    /// in-flight units best-effort, and drains.
    #[instrument(skip_all, fields(workflow = %spec.name, nodes = spec.len()))]
    pub async fn submit_with_cancel(
        &self,
        spec: &GraphSpec,
        inputs: Bindings,
        token: CancellationToken,
    ) -> Result<RunResult> {
        if !self.config.backend.is_available() {
            return Err(BraidError::EnvUnavailable {
                backend: self.config.backend.name().to_string(),
                reason: "backend reports unavailable".to_string(),
            });
        }

        let resolved = resolve_workflow_inputs(spec, &inputs, self.config.formats.as_ref(), true)?;
        let spec = Arc::new(substitute_params(spec, &resolved));

        let ctx = RunCtx {
            config: Arc::clone(&self.config),
            events: self.events.clone(),
        };

        info!(workflow = %spec.name, "starting run");
        self.events.emit(EventKind::RunStarted {
            workflow: Arc::clone(&spec.name),
            node_count: spec.len(),
        });
        let start = Instant::now();

        let inner = run_spec(ctx, spec, token, String::new()).await?;

        self.events.emit(EventKind::RunCompleted {
            duration_ms: start.elapsed().as_millis() as u64,
            errored: !inner.errors.is_empty(),
        });

        Ok(RunResult {
            outputs: inner.outputs,
            errored: !inner.errors.is_empty(),
            errors: inner.errors,
            cancelled: inner.cancelled,
            stats: inner.stats,
        })
    }
}

/// Outcome of one (possibly nested) run
struct InnerRun {
    outputs: BTreeMap<String, serde_json::Value>,
    errors: BTreeMap<String, UnitError>,
    cancelled: bool,
    stats: RunStats,
}

/// Result of one unit future
struct UnitOutcome {
    unit: UnitId,
    display: String,
    result: ExecResult,
    duration: Duration,
    /// Errors and stats surfaced by an expanded sub-workflow
    nested_errors: BTreeMap<String, UnitError>,
    nested_stats: RunStats,
}

enum ExecResult {
    /// Executed by a worker
    Done(Bindings),
    /// Satisfied from the cache
    Cached(Bindings),
    Failed(UnitError),
}

/// Drive one (possibly nested) graph to completion.
fn run_spec(
    ctx: RunCtx,
    spec: Arc<GraphSpec>,
    token: CancellationToken,
    prefix: String,
) -> BoxFuture<'static, Result<InnerRun>> {
    async move {
        let shapes = resolve_shapes(&spec)?;
        let store = ValueStore::new();
        let semaphore = Arc::new(Semaphore::new(ctx.config.max_concurrent_units));

        let order: Vec<Arc<str>> = spec.nodes.keys().cloned().collect();
        let mut started: FxHashSet<Arc<str>> = FxHashSet::default();
        let mut terminal: FxHashSet<Arc<str>> = FxHashSet::default();
        let mut remaining: FxHashMap<Arc<str>, usize> = FxHashMap::default();
        let mut in_flight: FxHashSet<UnitId> = FxHashSet::default();

        let mut errors: BTreeMap<String, UnitError> = BTreeMap::new();
        let mut stats = RunStats::default();
        for name in &order {
            stats.units_total += shapes[name].full.num_states();
        }

        let mut join_set: JoinSet<UnitOutcome> = JoinSet::new();
        let mut cancelled = false;

        loop {
            // Start every node whose producers are all terminal
            let mut progressed = false;
            if !cancelled {
                for name in &order {
                    if started.contains(name) {
                        continue;
                    }
                    let node = &spec.nodes[name];
                    if !node.producers().all(|p| terminal.contains(p)) {
                        continue;
                    }
                    started.insert(Arc::clone(name));
                    progressed = true;

                    let coords = shapes[name].full.coords();
                    if coords.is_empty() {
                        // Empty split: vacuously terminal, no outputs
                        debug!(node = %name, "zero states, node skipped");
                        terminal.insert(Arc::clone(name));
                        continue;
                    }
                    remaining.insert(Arc::clone(name), coords.len());

                    for coord in coords {
                        let unit = UnitId::new(Arc::clone(name), coord);
                        let display = format!("{prefix}{unit}");
                        ctx.events.emit(EventKind::UnitScheduled {
                            unit: display.clone(),
                        });

                        match resolve_unit_inputs(&shapes, node, &unit.coord, &store) {
                            InputResolution::Blocked { source } => {
                                let source = format!("{prefix}{source}");
                                ctx.events.emit(EventKind::UnitUnreachable {
                                    unit: display.clone(),
                                    source: source.clone(),
                                });
                                store.insert(unit.clone(), UnitRecord::unreachable(source.clone()));
                                errors.insert(
                                    display.clone(),
                                    UnitError::unreachable(display, source),
                                );
                                finish_unit(name, &mut remaining, &mut terminal);
                            }
                            InputResolution::Ready(inputs) => {
                                in_flight.insert(unit.clone());
                                let fut = execute_unit(
                                    ctx.clone(),
                                    node.clone(),
                                    unit,
                                    display,
                                    inputs,
                                    token.clone(),
                                );
                                let permit = Arc::clone(&semaphore);
                                join_set.spawn(async move {
                                    let _permit = permit
                                        .acquire_owned()
                                        .await
                                        .expect("semaphore never closed");
                                    fut.await
                                });
                            }
                        }
                    }
                }
            }

            if join_set.is_empty() {
                if cancelled || terminal.len() == order.len() {
                    break;
                }
                if !progressed {
                    // Insertion order is topological, so this is a bug
                    return Err(BraidError::WorkerFailure {
                        unit: "<scheduler>".to_string(),
                        message: "no units ready but workflow not complete".to_string(),
                    });
                }
                continue;
            }

            tokio::select! {
                _ = token.cancelled(), if !cancelled => {
                    cancelled = true;
                    warn!(workflow = %spec.name, "run cancelled, draining");
                    ctx.events.emit(EventKind::RunCancelled);
                    join_set.abort_all();
                    for unit in &in_flight {
                        ctx.config.backend.cancel(unit).await;
                    }
                }
                joined = join_set.join_next() => {
                    match joined {
                        Some(Ok(outcome)) => {
                            in_flight.remove(&outcome.unit);
                            apply_outcome(
                                outcome,
                                &store,
                                &mut errors,
                                &mut stats,
                                &mut remaining,
                                &mut terminal,
                                &ctx.events,
                            );
                        }
                        Some(Err(join_err)) if join_err.is_cancelled() => {
                            // Aborted by cancellation; marked below
                        }
                        Some(Err(join_err)) => {
                            warn!(error = %join_err, "unit task panicked");
                        }
                        None => {}
                    }
                }
            }
        }

        if cancelled {
            // Mark everything that never finished
            for name in &order {
                for coord in shapes[name].full.coords() {
                    let unit = UnitId::new(Arc::clone(name), coord);
                    if store.contains(&unit) {
                        continue;
                    }
                    let display = format!("{prefix}{unit}");
                    store.insert(unit, UnitRecord::cancelled());
                    errors.insert(
                        display.clone(),
                        UnitError::new(display, UnitErrorKind::Cancelled, "run cancelled"),
                    );
                }
            }
        }

        let outputs = assemble_outputs(&spec, &shapes, &store, &prefix, &mut errors);

        Ok(InnerRun {
            outputs,
            errors,
            cancelled,
            stats,
        })
    }
    .boxed()
}

/// Book-keeping for a finished unit: write-back, counters, readiness
fn apply_outcome(
    outcome: UnitOutcome,
    store: &ValueStore,
    errors: &mut BTreeMap<String, UnitError>,
    stats: &mut RunStats,
    remaining: &mut FxHashMap<Arc<str>, usize>,
    terminal: &mut FxHashSet<Arc<str>>,
    events: &EventLog,
) {
    stats.units_executed += outcome.nested_stats.units_executed;
    stats.cache_hits += outcome.nested_stats.cache_hits;
    stats.units_total += outcome.nested_stats.units_total;
    errors.extend(outcome.nested_errors);

    let node = Arc::clone(&outcome.unit.node);
    match outcome.result {
        ExecResult::Done(outputs) => {
            stats.units_executed += 1;
            events.emit(EventKind::UnitCompleted {
                unit: outcome.display,
                duration_ms: outcome.duration.as_millis() as u64,
            });
            store.insert(outcome.unit, UnitRecord::done(outputs, outcome.duration));
        }
        ExecResult::Cached(outputs) => {
            stats.cache_hits += 1;
            events.emit(EventKind::UnitCompleted {
                unit: outcome.display,
                duration_ms: outcome.duration.as_millis() as u64,
            });
            store.insert(outcome.unit, UnitRecord::cached(outputs));
        }
        ExecResult::Failed(error) => {
            events.emit(EventKind::UnitFailed {
                unit: outcome.display.clone(),
                error: error.message.clone(),
                duration_ms: outcome.duration.as_millis() as u64,
            });
            store.insert(
                outcome.unit,
                UnitRecord::failed(error.message.clone(), outcome.duration),
            );
            errors.insert(outcome.display, error);
        }
    }

    finish_unit(&node, remaining, terminal);
}

fn finish_unit(
    node: &Arc<str>,
    remaining: &mut FxHashMap<Arc<str>, usize>,
    terminal: &mut FxHashSet<Arc<str>>,
) {
    if let Some(count) = remaining.get_mut(node) {
        *count -= 1;
        if *count == 0 {
            terminal.insert(Arc::clone(node));
        }
    }
}

/// Materialize exported outputs; failed outputs stay absent (the
/// responsible unit error is already recorded).
fn assemble_outputs(
    spec: &GraphSpec,
    shapes: &FxHashMap<Arc<str>, NodeStates>,
    store: &ValueStore,
    prefix: &str,
    errors: &mut BTreeMap<String, UnitError>,
) -> BTreeMap<String, serde_json::Value> {
    let mut outputs = BTreeMap::new();
    for (name, lazy) in &spec.outputs {
        match collect_output(shapes, lazy, store) {
            Ok(value) => {
                outputs.insert(name.clone(), value);
            }
            Err(OutputError::Empty { axis }) => {
                let display = format!("{prefix}{}", lazy.node);
                errors.entry(display.clone()).or_insert_with(|| {
                    UnitError::new(
                        display,
                        UnitErrorKind::EmptySplit,
                        format!("axis '{axis}' has no states; output '{name}' cannot materialize"),
                    )
                });
            }
            Err(OutputError::Blocked { .. }) => {
                // The failing unit already has an error entry
            }
        }
    }
    outputs
}

/// Execute one unit: runtime type re-check, cache consult, dispatch
/// with retry and timeout, sub-workflow expansion.
async fn execute_unit(
    ctx: RunCtx,
    node: Node,
    unit: UnitId,
    display: String,
    inputs: Bindings,
    token: CancellationToken,
) -> UnitOutcome {
    let start = Instant::now();
    ctx.events.emit(EventKind::UnitStarted {
        unit: display.clone(),
        inputs: serde_json::to_value(&inputs).unwrap_or(serde_json::Value::Null),
    });

    let mut nested_errors = BTreeMap::new();
    let mut nested_stats = RunStats::default();

    let result = match runtime_type_check(&ctx, &node, &display, &inputs) {
        Some(failed) => failed,
        None => {
            let env = node.effective_env().cloned().unwrap_or_default();
            if node.task.is_sub_workflow() {
                execute_sub_workflow(
                    &ctx,
                    &node,
                    &display,
                    &inputs,
                    &env,
                    token,
                    &mut nested_errors,
                    &mut nested_stats,
                )
                .await
            } else {
                execute_task(&ctx, &node, &unit, &display, &inputs, &env).await
            }
        }
    };

    UnitOutcome {
        unit,
        display,
        result,
        duration: start.elapsed(),
        nested_errors,
        nested_stats,
    }
}

/// Dispatch-time re-check of input values against declared types.
///
/// Wires typed `Any` pass the builder unconditionally; a value that
/// does not conform at dispatch is a worker failure.
fn runtime_type_check(
    ctx: &RunCtx,
    node: &Node,
    display: &str,
    inputs: &Bindings,
) -> Option<ExecResult> {
    for field in &node.task.inputs {
        if let Some(value) = inputs.get(&field.name) {
            if check_value(value, &field.ty, ctx.config.formats.as_ref()) == Assignability::Reject {
                let err = BraidError::RuntimeTypeMismatch {
                    unit: display.to_string(),
                    field: field.name.clone(),
                    expected: field.ty.to_string(),
                    actual: value.to_string(),
                };
                return Some(ExecResult::Failed(UnitError::new(
                    display.to_string(),
                    UnitErrorKind::Worker,
                    err.to_string(),
                )));
            }
        }
    }
    None
}

fn cache_error(display: &str, e: impl std::fmt::Display) -> ExecResult {
    ExecResult::Failed(UnitError::new(
        display.to_string(),
        UnitErrorKind::Cache,
        e.to_string(),
    ))
}

/// Function/command execution path: cache consult, claim, retry, publish
async fn execute_task(
    ctx: &RunCtx,
    node: &Node,
    unit: &UnitId,
    display: &str,
    inputs: &Bindings,
    env: &Environment,
) -> ExecResult {
    let Some(cache) = ctx.config.cache.clone() else {
        return match attempt_unit(ctx, node, unit, display, inputs, env).await {
            Ok(outputs) => ExecResult::Done(outputs),
            Err(error) => ExecResult::Failed(error),
        };
    };

    let record = match cache::canonical_record(&node.task, inputs, &env.id, None) {
        Ok(record) => record,
        Err(e) => return cache_error(display, e),
    };
    let key = match cache::cache_key(&record) {
        Ok(key) => key,
        Err(e) => return cache_error(display, e),
    };

    match cache.acquire(&key).await {
        Err(e) => cache_error(display, e),
        Ok(CacheAcquire::Hit(outputs)) => {
            ctx.events.emit(EventKind::CacheHit {
                unit: display.to_string(),
                key,
            });
            ExecResult::Cached(outputs)
        }
        Ok(CacheAcquire::Claimed(claim)) => {
            match attempt_unit(ctx, node, unit, display, inputs, env).await {
                Ok(outputs) => match cache.publish(claim, &record, &outputs, &node.task) {
                    Ok(published) => ExecResult::Done(published),
                    Err(e) => cache_error(display, e),
                },
                Err(error) => {
                    let _ = cache.release_failed(claim, &error.message);
                    ExecResult::Failed(error)
                }
            }
        }
    }
}

/// One dispatch through the retry policy, each attempt under the unit's
/// wall-clock timeout. The cache claim (if any) is held by the caller
/// across the whole loop.
async fn attempt_unit(
    ctx: &RunCtx,
    node: &Node,
    unit: &UnitId,
    display: &str,
    inputs: &Bindings,
    env: &Environment,
) -> std::result::Result<Bindings, UnitError> {
    let timeout = node
        .effective_timeout()
        .unwrap_or(ctx.config.default_timeout);
    let retry = node
        .effective_retry()
        .cloned()
        .unwrap_or_else(|| ctx.config.default_retry.clone());
    let policy = RetryPolicy::new(retry);

    let work_unit = WorkUnit {
        id: unit.clone(),
        task: Arc::clone(&node.task),
        inputs: inputs.clone(),
        env: env.clone(),
    };

    // Preserve the last worker capture across retries for the report
    let capture: Arc<Mutex<Option<WorkerFailure>>> = Arc::new(Mutex::new(None));

    let result = policy
        .execute(|| {
            let work_unit = work_unit.clone();
            let backend = Arc::clone(&ctx.config.backend);
            let capture = Arc::clone(&capture);
            let display = display.to_string();
            async move {
                match tokio::time::timeout(timeout, backend.submit(&work_unit)).await {
                    Err(_) => Err(BraidError::UnitTimeout {
                        unit: display,
                        timeout_ms: timeout.as_millis() as u64,
                    }),
                    Ok(Ok(outputs)) => Ok(outputs),
                    Ok(Err(failure)) => {
                        let message = failure.message.clone();
                        *capture.lock() = Some(failure);
                        Err(BraidError::WorkerFailure {
                            unit: display,
                            message,
                        })
                    }
                }
            }
        })
        .await;

    result.map_err(|e| {
        let kind = match &e {
            BraidError::UnitTimeout { .. } => UnitErrorKind::Timeout,
            _ => UnitErrorKind::Worker,
        };
        let mut error = UnitError::new(display.to_string(), kind, e.to_string());
        if let Some(failure) = capture.lock().take() {
            error.stdout = failure.stdout;
            error.stderr = failure.stderr;
        }
        error
    })
}

/// Expand and run a sub-workflow node.
///
/// The constructor runs against concrete inputs; the nested graph's
/// cache key includes its structural digest, so equal expansions share
/// entries across runs.
#[allow(clippy::too_many_arguments)]
async fn execute_sub_workflow(
    ctx: &RunCtx,
    node: &Node,
    display: &str,
    inputs: &Bindings,
    env: &Environment,
    token: CancellationToken,
    nested_errors: &mut BTreeMap<String, UnitError>,
    nested_stats: &mut RunStats,
) -> ExecResult {
    let TaskKind::SubWorkflow(ctor) = &node.task.kind else {
        unreachable!("caller checked the task kind");
    };

    let sub_spec = match ctor(inputs) {
        Ok(spec) => spec,
        Err(e) => {
            return ExecResult::Failed(UnitError::new(
                display.to_string(),
                UnitErrorKind::Worker,
                format!("sub-workflow construction failed: {e}"),
            ))
        }
    };

    // Sub-workflow declared inputs resolve from this unit's bindings
    let provided: Bindings = inputs
        .iter()
        .filter(|(name, _)| sub_spec.input(name).is_some())
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect();
    let resolved =
        match resolve_workflow_inputs(&sub_spec, &provided, ctx.config.formats.as_ref(), false) {
            Ok(resolved) => resolved,
            Err(e) => {
                return ExecResult::Failed(UnitError::new(
                    display.to_string(),
                    UnitErrorKind::Worker,
                    e.to_string(),
                ))
            }
        };
    let sub_spec = Arc::new(substitute_params(&sub_spec, &resolved));

    // Cache key covers the expanded structure
    let mut claim: Option<(CacheClaim, serde_json::Value)> = None;
    if let Some(cache) = &ctx.config.cache {
        let structural = match cache::structural_digest(&sub_spec) {
            Ok(digest) => digest,
            Err(e) => return cache_error(display, e),
        };
        let record = match cache::canonical_record(&node.task, inputs, &env.id, Some(&structural)) {
            Ok(record) => record,
            Err(e) => return cache_error(display, e),
        };
        let key = match cache::cache_key(&record) {
            Ok(key) => key,
            Err(e) => return cache_error(display, e),
        };
        match cache.acquire(&key).await {
            Err(e) => return cache_error(display, e),
            Ok(CacheAcquire::Hit(outputs)) => {
                ctx.events.emit(EventKind::CacheHit {
                    unit: display.to_string(),
                    key,
                });
                return ExecResult::Cached(outputs);
            }
            Ok(CacheAcquire::Claimed(acquired)) => claim = Some((acquired, record)),
        }
    }

    let inner = match run_spec(ctx.clone(), sub_spec, token, format!("{display}/")).await {
        Ok(inner) => inner,
        Err(e) => {
            return ExecResult::Failed(UnitError::new(
                display.to_string(),
                UnitErrorKind::Worker,
                e.to_string(),
            ))
        }
    };

    *nested_stats = inner.stats;
    *nested_errors = inner.errors.clone();

    if inner.cancelled {
        return ExecResult::Failed(UnitError::new(
            display.to_string(),
            UnitErrorKind::Cancelled,
            "sub-workflow cancelled",
        ));
    }
    if !inner.errors.is_empty() {
        if let (Some(cache), Some((held, _))) = (&ctx.config.cache, claim) {
            let _ = cache.release_failed(held, "sub-workflow failed");
        }
        let sources: Vec<&str> = inner.errors.keys().map(String::as_str).collect();
        return ExecResult::Failed(UnitError::new(
            display.to_string(),
            UnitErrorKind::Worker,
            format!("sub-workflow failed in: {}", sources.join(", ")),
        ));
    }

    let outputs: Bindings = inner.outputs.into_iter().collect();
    match (&ctx.config.cache, claim) {
        (Some(cache), Some((held, record))) => {
            match cache.publish(held, &record, &outputs, &node.task) {
                Ok(published) => ExecResult::Done(published),
                Err(e) => cache_error(display, e),
            }
        }
        _ => ExecResult::Done(outputs),
    }
}

/// Validate submitted workflow inputs against declarations, apply
/// defaults and coercions. `strict` also rejects undeclared inputs.
fn resolve_workflow_inputs(
    spec: &GraphSpec,
    provided: &Bindings,
    formats: &dyn FormatRegistry,
    strict: bool,
) -> Result<Bindings> {
    let mut resolved = Bindings::new();

    for field in &spec.inputs {
        match provided.get(&field.name) {
            Some(value) => match check_value(value, &field.ty, formats) {
                Assignability::Reject => {
                    return Err(BraidError::InvalidInput {
                        name: field.name.clone(),
                        reason: format!("value {value} does not conform to {}", field.ty),
                    })
                }
                Assignability::Coerce => {
                    resolved.insert(field.name.clone(), coerce_value(value.clone(), &field.ty));
                }
                Assignability::Ok => {
                    resolved.insert(field.name.clone(), value.clone());
                }
            },
            None => match &field.default {
                Some(default) => {
                    resolved.insert(field.name.clone(), default.clone());
                }
                None if field.required => {
                    return Err(BraidError::InvalidInput {
                        name: field.name.clone(),
                        reason: "required input missing".to_string(),
                    })
                }
                None => {}
            },
        }
    }

    if strict {
        for name in provided.keys() {
            if spec.input(name).is_none() {
                return Err(BraidError::InvalidInput {
                    name: name.clone(),
                    reason: "input is not declared by the workflow".to_string(),
                });
            }
        }
    }

    Ok(resolved)
}

/// Replace every `Param` slot with its resolved concrete value
fn substitute_params(spec: &GraphSpec, resolved: &Bindings) -> GraphSpec {
    let mut spec = spec.clone();
    for node in spec.nodes.values_mut() {
        for slot in node.inputs.values_mut() {
            if let InputSlot::Param(name) = slot {
                if let Some(value) = resolved.get(name) {
                    *slot = InputSlot::Concrete(value.clone());
                }
            }
        }
    }
    spec
}
