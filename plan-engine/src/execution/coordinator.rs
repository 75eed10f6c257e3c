// Execution Coordinator
// Drives a plan to completion: readiness, dispatch, skip propagation and run results

use crate::config::{ExecutionConfig, ExecutionMode};
use crate::error::{EngineError, EngineResult, StepErrorKind, StepExecutionError};
use crate::execution::context::StepEvent;
use crate::execution::events::{
    EventSender, ExecutionEvent, LogLevel, LogRecord, LogSink, ProgressSender, TracingLogSink,
};
use crate::execution::resources::Resources;
use crate::execution::step::{StepExecutor, StepOutcome};
use crate::plan::{ExecutionPlan, ExecutionStep, StepKind, StepOutputHandle};
use crate::storage::{store_from_config, IntermediateStore, ObjectStoreRegistry};
use crate::types::{RuntimeType, Value};

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, debug_span, info, warn, Instrument};

const UPSTREAM_FAILED: &str = "upstream step failed";
const RUN_ABORTED: &str = "run aborted after a step failure";
const RUN_CANCELED: &str = "run canceled";

/// How ready steps are dispatched
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulingMode {
    /// One step at a time, in plan order
    Sequential,
    /// Up to `max_concurrent` steps in flight
    MultiWorker { max_concurrent: usize },
}

/// Configuration for plan execution
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    pub scheduling: SchedulingMode,
    /// Keep running independent branches after a failure
    pub continue_on_error: bool,
    /// Per-step limit; a step over it fails with kind `Timeout`
    pub step_timeout: Option<Duration>,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            scheduling: SchedulingMode::Sequential,
            continue_on_error: false,
            step_timeout: None,
        }
    }
}

impl ExecutorConfig {
    pub fn from_config(config: &ExecutionConfig) -> EngineResult<Self> {
        let scheduling = match config.mode {
            ExecutionMode::Sequential => SchedulingMode::Sequential,
            ExecutionMode::MultiWorker => {
                let max_concurrent = match config.max_concurrent {
                    Some(0) => {
                        return Err(EngineError::config(
                            "execution.max_concurrent must be at least 1",
                        ))
                    }
                    Some(n) => n,
                    None => std::thread::available_parallelism()
                        .map(|n| n.get())
                        .unwrap_or(1),
                };
                SchedulingMode::MultiWorker { max_concurrent }
            }
        };

        Ok(Self {
            scheduling,
            continue_on_error: config.continue_on_error,
            step_timeout: config.step_timeout_secs.map(Duration::from_secs),
        })
    }

    pub fn multi_worker(max_concurrent: usize) -> Self {
        Self {
            scheduling: SchedulingMode::MultiWorker { max_concurrent },
            ..Self::default()
        }
    }

    pub fn with_continue_on_error(mut self, continue_on_error: bool) -> Self {
        self.continue_on_error = continue_on_error;
        self
    }

    pub fn with_step_timeout(mut self, timeout: Duration) -> Self {
        self.step_timeout = Some(timeout);
        self
    }

    fn max_concurrent(&self) -> usize {
        match self.scheduling {
            SchedulingMode::Sequential => 1,
            SchedulingMode::MultiWorker { max_concurrent } => max_concurrent.max(1),
        }
    }
}

/// Lifecycle state of a step within a run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepState {
    Pending,
    Running,
    Success,
    Failure,
    Skipped,
}

impl StepState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, StepState::Success | StepState::Failure | StepState::Skipped)
    }
}

/// Final state of one step
#[derive(Debug, Clone)]
pub struct StepRecord {
    pub step_key: String,
    pub kind: StepKind,
    pub state: StepState,
    pub error: Option<StepExecutionError>,
    pub skip_reason: Option<String>,
    pub duration: Option<Duration>,
}

/// Result of executing a plan
#[derive(Debug, Clone)]
pub struct RunResult {
    pub run_id: String,
    pub success: bool,
    pub canceled: bool,
    /// Every event of the run, in emission order
    pub events: Vec<ExecutionEvent>,
    /// One record per plan step, in plan order
    pub steps: Vec<StepRecord>,
    pub duration: Duration,
}

impl RunResult {
    pub fn step(&self, step_key: &str) -> Option<&StepRecord> {
        self.steps.iter().find(|s| s.step_key == step_key)
    }

    pub fn state_of(&self, step_key: &str) -> Option<StepState> {
        self.step(step_key).map(|s| s.state)
    }

    pub fn failed_steps(&self) -> Vec<&StepRecord> {
        self.steps
            .iter()
            .filter(|s| s.state == StepState::Failure)
            .collect()
    }

    pub fn skipped_steps(&self) -> Vec<&StepRecord> {
        self.steps
            .iter()
            .filter(|s| s.state == StepState::Skipped)
            .collect()
    }

    /// Value a step emitted for one of its outputs during this run
    pub fn output_value(&self, step_key: &str, output_name: &str) -> Option<&Value> {
        self.events.iter().find_map(|event| match event {
            ExecutionEvent::StepOutput {
                step_key: key,
                output_name: name,
                value,
                ..
            } if key == step_key && name == output_name => Some(value),
            _ => None,
        })
    }
}

/// Collects run events and forwards them to the progress channel
struct EventLog {
    events: Vec<ExecutionEvent>,
    progress: Option<ProgressSender>,
}

impl EventLog {
    fn emit(&mut self, event: ExecutionEvent) {
        self.progress.send_event(event.clone());
        self.events.push(event);
    }
}

enum Readiness {
    Ready,
    Waiting,
    Blocked(String),
}

/// Bookkeeping for one run
struct RunState<'a> {
    plan: &'a ExecutionPlan,
    run_id: String,
    records: Vec<StepRecord>,
    log: EventLog,
    log_sink: Arc<dyn LogSink>,
}

impl<'a> RunState<'a> {
    fn engine_log(&mut self, level: LogLevel, message: String, step_key: Option<&str>) {
        let mut record = LogRecord::new(level, message, &self.run_id);
        if let Some(step_key) = step_key {
            record = record.for_step(step_key);
        }
        self.log_sink.log(&record);
        self.log.emit(ExecutionEvent::Log(record));
    }

    fn skip(&mut self, index: usize, reason: String) {
        let step_key = self.records[index].step_key.clone();
        debug!(run_id = %self.run_id, step_key = %step_key, reason = %reason, "skipping step");
        self.records[index].state = StepState::Skipped;
        self.records[index].skip_reason = Some(reason.clone());
        self.log.emit(ExecutionEvent::StepSkipped {
            run_id: self.run_id.clone(),
            step_key,
            reason,
        });
    }

    /// A pending step is ready once every input is stored, blocked once a producer
    /// finished without storing what it reads
    fn readiness(&self, step: &ExecutionStep, store: &dyn IntermediateStore) -> Readiness {
        if store.all_inputs_covered(&self.run_id, step) {
            return Readiness::Ready;
        }

        for input in &step.inputs {
            if store.has_value(&self.run_id, &input.upstream) {
                continue;
            }
            let Some(producer) = self.plan.position(&input.upstream.step_key) else {
                return Readiness::Blocked(format!(
                    "external input {} is not stored",
                    input.upstream
                ));
            };
            let record = &self.records[producer];
            match record.state {
                StepState::Failure => return Readiness::Blocked(UPSTREAM_FAILED.to_string()),
                StepState::Skipped => {
                    return Readiness::Blocked(
                        record
                            .skip_reason
                            .clone()
                            .unwrap_or_else(|| UPSTREAM_FAILED.to_string()),
                    )
                }
                StepState::Success => {
                    return Readiness::Blocked(format!(
                        "upstream output {} was not produced",
                        input.upstream
                    ))
                }
                StepState::Pending | StepState::Running => {}
            }
        }
        Readiness::Waiting
    }
}

/// Executes plans against an intermediates store
pub struct PlanExecutor {
    store: Arc<dyn IntermediateStore>,
    config: ExecutorConfig,
    event_tx: Option<ProgressSender>,
    log_sink: Arc<dyn LogSink>,
    cancel: CancellationToken,
}

impl PlanExecutor {
    pub fn new(store: Arc<dyn IntermediateStore>) -> Self {
        Self {
            store,
            config: ExecutorConfig::default(),
            event_tx: None,
            log_sink: Arc::new(TracingLogSink),
            cancel: CancellationToken::new(),
        }
    }

    /// Executor whose store and scheduling come from the plan's configuration
    pub fn for_plan(
        plan: &ExecutionPlan,
        object_stores: &ObjectStoreRegistry,
    ) -> EngineResult<Self> {
        let storage = &plan.config().storage;
        let store = store_from_config(storage, plan.storage_plugins(), object_stores)?;
        let config = ExecutorConfig::from_config(&plan.config().execution)?;
        Ok(Self::new(store).with_config(config))
    }

    pub fn with_config(mut self, config: ExecutorConfig) -> Self {
        self.config = config;
        self
    }

    /// Set progress event sender
    pub fn with_progress(mut self, tx: ProgressSender) -> Self {
        self.event_tx = Some(tx);
        self
    }

    pub fn with_log_sink(mut self, sink: Arc<dyn LogSink>) -> Self {
        self.log_sink = sink;
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn store(&self) -> &Arc<dyn IntermediateStore> {
        &self.store
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Execute every step of `plan`
    pub async fn execute(
        &self,
        plan: &ExecutionPlan,
        run_id: Option<String>,
    ) -> EngineResult<RunResult> {
        let run_id = resolve_run_id(plan, run_id);
        self.run(plan, run_id, None).await
    }

    /// Execute only `step_keys` under a fresh run, reading everything else from `prior_run_id`
    pub async fn execute_subset(
        &self,
        plan: &ExecutionPlan,
        prior_run_id: &str,
        step_keys: &[&str],
        run_id: Option<String>,
    ) -> EngineResult<RunResult> {
        let subset = plan.build_subset_plan(step_keys)?;
        let run_id = run_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        if run_id == prior_run_id {
            return Err(EngineError::config(format!(
                "re-execution needs a fresh run id, got the prior run id '{}'",
                prior_run_id
            )));
        }
        self.run(&subset, run_id, Some(prior_run_id)).await
    }

    async fn run(
        &self,
        plan: &ExecutionPlan,
        run_id: String,
        prior_run_id: Option<&str>,
    ) -> EngineResult<RunResult> {
        let start = Instant::now();

        let resources = Arc::new(Resources::acquire(plan.mode(), plan.config()).await?);

        let mut state = RunState {
            plan,
            run_id: run_id.clone(),
            records: plan
                .steps()
                .iter()
                .map(|step| StepRecord {
                    step_key: step.key.clone(),
                    kind: step.kind,
                    state: StepState::Pending,
                    error: None,
                    skip_reason: None,
                    duration: None,
                })
                .collect(),
            log: EventLog {
                events: Vec::new(),
                progress: self.event_tx.clone(),
            },
            log_sink: self.log_sink.clone(),
        };

        info!(
            run_id = %run_id,
            graph = %plan.graph_name(),
            mode = %plan.mode().name,
            store = %self.store.label(),
            steps = plan.len(),
            "starting run"
        );
        state.log.emit(ExecutionEvent::RunStarted {
            run_id: run_id.clone(),
            graph_name: plan.graph_name().to_string(),
            mode: plan.mode().name.clone(),
            total_steps: plan.len(),
            tags: plan.config().run.tags.clone(),
        });

        if let Some(prior) = prior_run_id {
            if let Err(err) = self.copy_external_inputs(plan, prior, &mut state).await {
                resources.teardown();
                return Err(err);
            }
        }

        let outcome = self.schedule(plan, &mut state, resources.clone()).await;
        resources.teardown();
        let canceled = outcome?;

        let success = !canceled && state.records.iter().all(|r| r.state != StepState::Failure);
        let duration = start.elapsed();
        info!(
            run_id = %run_id,
            success,
            canceled,
            duration_ms = duration.as_millis() as u64,
            "run finished"
        );
        state.log.emit(ExecutionEvent::RunCompleted {
            run_id: run_id.clone(),
            success,
            canceled,
            duration,
        });

        Ok(RunResult {
            run_id,
            success,
            canceled,
            events: state.log.events,
            steps: state.records,
            duration,
        })
    }

    async fn copy_external_inputs(
        &self,
        plan: &ExecutionPlan,
        prior_run_id: &str,
        state: &mut RunState<'_>,
    ) -> EngineResult<()> {
        for handle in plan.external_inputs().keys() {
            let (src, dst, copied) = (
                prior_run_id.to_string(),
                state.run_id.clone(),
                handle.clone(),
            );
            with_store(&self.store, move |store| {
                store.copy_from_prior_run(&src, &dst, &copied)
            })
            .await?;
            state.log.emit(ExecutionEvent::IntermediateCopied {
                run_id: state.run_id.clone(),
                prior_run_id: prior_run_id.to_string(),
                handle: handle.to_string(),
            });
        }
        Ok(())
    }

    /// Run the dispatch loop; returns whether the run was canceled
    async fn schedule(
        &self,
        plan: &ExecutionPlan,
        state: &mut RunState<'_>,
        resources: Arc<Resources>,
    ) -> EngineResult<bool> {
        let executor = StepExecutor::new(&state.run_id, resources, self.log_sink.clone());
        let max_concurrent = self.config.max_concurrent();
        let mut join_set: JoinSet<(usize, StepOutcome, Duration)> = JoinSet::new();
        let mut halted: Option<&'static str> = None;

        loop {
            if halted.is_none() && self.cancel.is_cancelled() {
                halted = Some(RUN_CANCELED);
            }

            if halted.is_none() {
                for index in 0..plan.len() {
                    if state.records[index].state != StepState::Pending {
                        continue;
                    }
                    let step = &plan.steps()[index];
                    match state.readiness(step, self.store.as_ref()) {
                        Readiness::Ready if join_set.len() < max_concurrent => {
                            let inputs = match self.read_inputs(plan, step, &state.run_id).await {
                                Ok(inputs) => inputs,
                                Err(err) => {
                                    join_set.abort_all();
                                    return Err(err);
                                }
                            };
                            let step = step.clone();
                            self.dispatch(&mut join_set, &executor, index, step, inputs, state);
                        }
                        Readiness::Ready | Readiness::Waiting => {}
                        Readiness::Blocked(reason) => state.skip(index, reason),
                    }
                }
            }

            if join_set.is_empty() {
                break;
            }

            // Cancellation wins over a completion that arrives at the same time
            let joined = tokio::select! {
                biased;
                _ = self.cancel.cancelled(), if halted.is_none() => {
                    info!(
                        run_id = %state.run_id,
                        "cancellation requested, waiting for in-flight steps"
                    );
                    halted = Some(RUN_CANCELED);
                    continue;
                }
                joined = join_set.join_next() => joined,
            };

            let Some(joined) = joined else {
                break;
            };
            let (index, outcome, duration) = match joined {
                Ok(done) => done,
                Err(err) => {
                    join_set.abort_all();
                    return Err(EngineError::invariant(format!(
                        "step task failed to join: {}",
                        err
                    )));
                }
            };

            if halted == Some(RUN_CANCELED) {
                state.records[index].duration = Some(duration);
                state.skip(index, RUN_CANCELED.to_string());
                continue;
            }

            let failed = match self
                .record_outcome(plan, state, index, outcome, duration)
                .await
            {
                Ok(failed) => failed,
                Err(err) => {
                    join_set.abort_all();
                    return Err(err);
                }
            };
            if failed && !self.config.continue_on_error && halted.is_none() {
                warn!(
                    run_id = %state.run_id,
                    step_key = %state.records[index].step_key,
                    "aborting run after step failure"
                );
                halted = Some(RUN_ABORTED);
            }
        }

        if let Some(reason) = halted {
            for index in 0..state.records.len() {
                if state.records[index].state == StepState::Pending {
                    state.skip(index, reason.to_string());
                }
            }
        }

        Ok(halted == Some(RUN_CANCELED))
    }

    async fn read_inputs(
        &self,
        plan: &ExecutionPlan,
        step: &ExecutionStep,
        run_id: &str,
    ) -> EngineResult<BTreeMap<String, Value>> {
        let wanted: Vec<(String, StepOutputHandle, RuntimeType)> = step
            .inputs
            .iter()
            .map(|input| {
                let runtime_type = plan
                    .output_type(&input.upstream)
                    .unwrap_or(&input.runtime_type);
                (input.name.clone(), input.upstream.clone(), runtime_type.clone())
            })
            .collect();
        let run_id = run_id.to_string();

        with_store(&self.store, move |store| {
            let mut inputs = BTreeMap::new();
            for (name, upstream, runtime_type) in &wanted {
                let value = store.read_value(&run_id, upstream, runtime_type)?;
                inputs.insert(name.clone(), value);
            }
            Ok(inputs)
        })
        .await
    }

    fn dispatch(
        &self,
        join_set: &mut JoinSet<(usize, StepOutcome, Duration)>,
        executor: &StepExecutor,
        index: usize,
        step: Arc<ExecutionStep>,
        inputs: BTreeMap<String, Value>,
        state: &mut RunState<'_>,
    ) {
        state.records[index].state = StepState::Running;
        state.log.emit(ExecutionEvent::StepStarted {
            run_id: state.run_id.clone(),
            step_key: step.key.clone(),
            kind: step.kind,
        });

        let span = debug_span!(
            "step",
            run_id = %state.run_id,
            step_key = %step.key,
            tags = ?state.plan.config().run.tags
        );
        let executor = executor.clone();
        let timeout = self.config.step_timeout;
        let task = async move {
            let started = Instant::now();
            let outcome = match timeout {
                Some(limit) => {
                    let execution = executor.execute(step.clone(), inputs);
                    match tokio::time::timeout(limit, execution).await {
                        Ok(outcome) => outcome,
                        Err(_) => StepOutcome {
                            events: Vec::new(),
                            error: Some(StepExecutionError::new(
                                &step.key,
                                step.node_handle.to_string(),
                                StepErrorKind::Timeout,
                                format!("exceeded step timeout of {:?}", limit),
                            )),
                        },
                    }
                }
                None => executor.execute(step, inputs).await,
            };
            (index, outcome, started.elapsed())
        };
        join_set.spawn(task.instrument(span));
    }

    /// Publish a finished step's events and store its outputs; returns whether it failed.
    /// Storage errors are fatal to the run.
    async fn record_outcome(
        &self,
        plan: &ExecutionPlan,
        state: &mut RunState<'_>,
        index: usize,
        outcome: StepOutcome,
        duration: Duration,
    ) -> EngineResult<bool> {
        let step = &plan.steps()[index];
        let run_id = state.run_id.clone();

        for event in &outcome.events {
            let event = match event.clone() {
                StepEvent::OutputProduced { output_name, value } => ExecutionEvent::StepOutput {
                    run_id: run_id.clone(),
                    step_key: step.key.clone(),
                    output_name,
                    value,
                },
                StepEvent::ExpectationEvaluated {
                    name,
                    success,
                    message,
                    metadata,
                } => ExecutionEvent::ExpectationEvaluated {
                    run_id: run_id.clone(),
                    step_key: step.key.clone(),
                    name,
                    success,
                    message,
                    metadata,
                },
                StepEvent::Materialized { path, description } => ExecutionEvent::Materialized {
                    run_id: run_id.clone(),
                    step_key: step.key.clone(),
                    path,
                    description,
                },
            };
            state.log.emit(event);
        }

        state.records[index].duration = Some(duration);

        if let Some(error) = outcome.error.clone() {
            warn!(run_id = %run_id, step_key = %step.key, error = %error, "step failed");
            state.records[index].state = StepState::Failure;
            state.records[index].error = Some(error.clone());
            state.log.emit(ExecutionEvent::StepFailed {
                run_id,
                step_key: step.key.clone(),
                error,
                duration,
            });
            return Ok(true);
        }

        let mut writes = Vec::new();
        for (output_name, value) in outcome.outputs() {
            let handle = StepOutputHandle::from_step(step, output_name);
            let runtime_type = step.output(output_name).map(|o| &o.runtime_type).ok_or_else(|| {
                EngineError::invariant(format!(
                    "step '{}' has no output '{}'",
                    step.key, output_name
                ))
            })?;
            writes.push((handle, runtime_type.clone(), value.clone()));
        }
        let write_run_id = run_id.clone();
        with_store(&self.store, move |store| {
            for (handle, runtime_type, value) in &writes {
                store.set_value(&write_run_id, handle, runtime_type, value)?;
            }
            Ok(())
        })
        .await?;

        let produced: Vec<&str> = outcome.outputs().map(|(name, _)| name).collect();
        let missing: Vec<&str> = step
            .outputs
            .iter()
            .map(|o| o.name.as_str())
            .filter(|name| !produced.contains(name))
            .collect();
        if !missing.is_empty() {
            state.engine_log(
                LogLevel::Info,
                format!("step '{}' did not fire outputs {:?}", step.key, missing),
                Some(&step.key),
            );
        }

        debug!(
            run_id = %run_id,
            step_key = %step.key,
            duration_ms = duration.as_millis() as u64,
            "step succeeded"
        );
        state.records[index].state = StepState::Success;
        state.log.emit(ExecutionEvent::StepSucceeded {
            run_id,
            step_key: step.key.clone(),
            duration,
        });
        Ok(false)
    }
}

/// Run a store operation; durable backends do file or network I/O, so they go to the
/// blocking pool
async fn with_store<T, F>(store: &Arc<dyn IntermediateStore>, op: F) -> EngineResult<T>
where
    T: Send + 'static,
    F: FnOnce(&dyn IntermediateStore) -> EngineResult<T> + Send + 'static,
{
    if !store.is_durable() {
        return op(store.as_ref());
    }
    let store = store.clone();
    tokio::task::spawn_blocking(move || op(store.as_ref()))
        .await
        .map_err(|err| EngineError::invariant(format!("storage task failed: {}", err)))?
}

fn resolve_run_id(plan: &ExecutionPlan, run_id: Option<String>) -> String {
    run_id
        .or_else(|| plan.config().run.run_id.clone())
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{
        InputSource, MaterializationFormat, NodeConfig, OutputTarget, ResolvedConfig,
    };
    use crate::execution::events::{progress_channel, progress_stream, MemoryLogSink};
    use crate::execution::resources::{AcquiredResource, ResourceDefinition};
    use crate::fixtures;
    use crate::graph::{
        GraphBuilder, GraphDefinition, InputDefinition, ModeDefinition, NodeDefinition,
        OutputDefinition,
    };
    use crate::plan::build_plan;
    use crate::storage::InMemoryIntermediateStore;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tokio_stream::StreamExt;

    fn memory_executor() -> PlanExecutor {
        PlanExecutor::new(Arc::new(InMemoryIntermediateStore::new()))
    }

    fn default_plan(graph: GraphDefinition) -> ExecutionPlan {
        build_plan(&graph, &ResolvedConfig::default(), None).unwrap()
    }

    fn step_keys_with(result: &RunResult, state: StepState) -> Vec<&str> {
        result
            .steps
            .iter()
            .filter(|s| s.state == state)
            .map(|s| s.step_key.as_str())
            .collect()
    }

    #[tokio::test]
    async fn test_math_graph_runs() {
        let plan = default_plan(fixtures::math_graph());
        let executor = memory_executor();

        let result = executor.execute(&plan, Some("run-1".to_string())).await.unwrap();

        assert!(result.success);
        assert_eq!(result.run_id, "run-1");
        assert_eq!(result.output_value("add_one.compute", "result"), Some(&Value::from(2i64)));
        let stored = executor
            .store()
            .read_value(
                "run-1",
                &StepOutputHandle::new("add_one.compute", "result"),
                &RuntimeType::Int,
            )
            .unwrap();
        assert_eq!(stored, Value::from(2i64));

        assert!(matches!(
            result.events.first(),
            Some(ExecutionEvent::RunStarted { total_steps: 2, .. })
        ));
        assert!(matches!(
            result.events.last(),
            Some(ExecutionEvent::RunCompleted { success: true, .. })
        ));
    }

    #[tokio::test]
    async fn test_failure_with_continue_on_error() {
        let plan = default_plan(fixtures::failing_graph());
        let executor =
            memory_executor().with_config(ExecutorConfig::default().with_continue_on_error(true));

        let result = executor.execute(&plan, None).await.unwrap();

        assert!(!result.success);
        assert_eq!(result.state_of("return_two.compute"), Some(StepState::Success));
        let failed = result.step("always_fail.compute").unwrap();
        assert_eq!(failed.state, StepState::Failure);
        let error = failed.error.as_ref().unwrap();
        assert_eq!(error.kind, StepErrorKind::UserCode);
        assert!(error.message.contains(fixtures::FAILURE_MESSAGE));
    }

    #[tokio::test]
    async fn test_abort_on_first_failure_skips_pending() {
        let plan = default_plan(fixtures::failing_graph());
        assert_eq!(plan.keys()[0], "always_fail.compute");

        let result = memory_executor().execute(&plan, None).await.unwrap();

        assert!(!result.success);
        assert!(!result.canceled);
        let skipped = result.step("return_two.compute").unwrap();
        assert_eq!(skipped.state, StepState::Skipped);
        assert_eq!(skipped.skip_reason.as_deref(), Some(RUN_ABORTED));
    }

    #[tokio::test]
    async fn test_fan_in_scenario() {
        let plan = default_plan(fixtures::fan_in_graph());
        let result = memory_executor().execute(&plan, None).await.unwrap();

        assert!(result.success);
        assert_eq!(result.output_value("add.compute", "result"), Some(&Value::from(5i64)));
    }

    #[tokio::test]
    async fn test_list_fan_in_concatenates_in_order() {
        let plan =
            default_plan(fixtures::list_fan_in_graph());
        let result = memory_executor().execute(&plan, None).await.unwrap();

        assert!(result.success);
        assert_eq!(
            result.output_value("sum.input.nums.fan_in", crate::plan::FAN_IN_OUTPUT),
            Some(&Value::from(vec![2i64, 3]))
        );
        assert_eq!(result.output_value("sum.compute", "result"), Some(&Value::from(5i64)));
    }

    #[tokio::test]
    async fn test_reexecution_copies_prior_intermediates() {
        let plan = default_plan(fixtures::chain_graph());
        let executor = memory_executor();

        let first = executor.execute(&plan, Some("run-a".to_string())).await.unwrap();
        assert!(first.success);
        let expected = first.output_value("add_two.compute", "result").cloned();

        let second = executor
            .execute_subset(&plan, "run-a", &["add_two.compute"], Some("run-b".to_string()))
            .await
            .unwrap();

        assert!(second.success);
        assert_eq!(second.steps.len(), 1);
        assert_eq!(second.output_value("add_two.compute", "result").cloned(), expected);
        assert!(second.events.iter().any(|e| matches!(
            e,
            ExecutionEvent::IntermediateCopied { prior_run_id, handle, .. }
                if prior_run_id == "run-a" && handle == "add_one.compute:result"
        )));
        assert!(second
            .events
            .iter()
            .all(|e| !matches!(
                e,
                ExecutionEvent::StepStarted { step_key, .. } if step_key != "add_two.compute"
            )));
    }

    #[tokio::test]
    async fn test_reexecution_rejects_same_run_id() {
        let plan = default_plan(fixtures::chain_graph());
        let err = memory_executor()
            .execute_subset(&plan, "run-a", &["add_two.compute"], Some("run-a".to_string()))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Config(_)));
    }

    #[tokio::test]
    async fn test_reexecution_without_prior_values_is_fatal() {
        let plan = default_plan(fixtures::chain_graph());
        let err = memory_executor()
            .execute_subset(&plan, "never-ran", &["add_two.compute"], None)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::MissingIntermediate { .. }));
    }

    #[tokio::test]
    async fn test_failed_expectation_skips_dependents() {
        let plan =
            build_plan(&fixtures::checked_graph_with_seed(-5), &ResolvedConfig::default(), None)
                .unwrap();
        let result = memory_executor()
            .with_config(ExecutorConfig::default().with_continue_on_error(true))
            .execute(&plan, None)
            .await
            .unwrap();

        assert!(!result.success);
        let failed = result.step("add_one.input.num.expectation.positive").unwrap();
        assert_eq!(failed.state, StepState::Failure);
        assert_eq!(failed.error.as_ref().map(|e| e.kind), Some(StepErrorKind::ExpectationFailed));
        assert!(result.events.iter().any(|e| matches!(
            e,
            ExecutionEvent::ExpectationEvaluated { name, success: false, .. } if name == "positive"
        )));

        for key in [
            "add_one.input.num.expectations.join",
            "add_one.compute",
            "add_one.output.result.expectation.below_ten",
            "add_one.output.result.expectations.join",
        ] {
            let record = result.step(key).unwrap();
            assert_eq!(record.state, StepState::Skipped, "{}", key);
            assert_eq!(record.skip_reason.as_deref(), Some(UPSTREAM_FAILED));
        }
    }

    #[tokio::test]
    async fn test_expectations_pass_through_value() {
        let plan = default_plan(fixtures::checked_graph());
        let result = memory_executor().execute(&plan, None).await.unwrap();

        assert!(result.success);
        assert_eq!(
            result.output_value(
                "add_one.output.result.expectations.join",
                crate::plan::EXPECTATION_OUTPUT
            ),
            Some(&Value::from(2i64))
        );
    }

    #[tokio::test]
    async fn test_unfired_optional_output_skips_consumer() {
        let plan = default_plan(fixtures::optional_graph());
        let sink = MemoryLogSink::new();
        let result = memory_executor()
            .with_log_sink(Arc::new(sink.clone()))
            .execute(&plan, None)
            .await
            .unwrap();

        assert!(result.success);
        assert_eq!(result.state_of("maybe.compute"), Some(StepState::Success));
        assert_eq!(result.state_of("consume.compute"), Some(StepState::Skipped));
        assert_eq!(result.state_of("after_consume.compute"), Some(StepState::Skipped));
        assert!(result
            .step("consume.compute")
            .and_then(|s| s.skip_reason.as_deref())
            .unwrap()
            .contains("was not produced"));
        assert!(sink
            .records()
            .iter()
            .any(|r| r.level == LogLevel::Info && r.message.contains("did not fire outputs")));
    }

    #[tokio::test]
    async fn test_multi_worker_matches_sequential() {
        let plan = default_plan(fixtures::composite_graph());

        let sequential = memory_executor().execute(&plan, None).await.unwrap();
        let parallel = memory_executor()
            .with_config(ExecutorConfig::multi_worker(4))
            .execute(&plan, None)
            .await
            .unwrap();

        assert!(sequential.success && parallel.success);
        assert_eq!(
            sequential.output_value("double.compute", "result"),
            parallel.output_value("double.compute", "result")
        );
        assert_eq!(parallel.output_value("double.compute", "result"), Some(&Value::from(8i64)));
    }

    #[tokio::test]
    async fn test_multi_worker_runs_independent_steps_concurrently() {
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let mut builder = GraphBuilder::new("wide");
        for name in ["a", "b", "c"] {
            let in_flight = in_flight.clone();
            let peak = peak.clone();
            builder.add_node(
                NodeDefinition::new(name)
                    .output(OutputDefinition::result(RuntimeType::Int))
                    .compute(move |ctx| {
                        let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        std::thread::sleep(Duration::from_millis(100));
                        in_flight.fetch_sub(1, Ordering::SeqCst);
                        ctx.output("result", 1i64);
                        Ok(())
                    }),
            );
        }
        let plan = build_plan(&builder.build().unwrap(), &ResolvedConfig::default(), None).unwrap();

        let result = memory_executor()
            .with_config(ExecutorConfig::multi_worker(3))
            .execute(&plan, None)
            .await
            .unwrap();

        assert!(result.success);
        assert!(peak.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test]
    async fn test_step_timeout() {
        let mut builder = GraphBuilder::new("slow");
        builder.add_node(
            NodeDefinition::new("sleepy")
                .output(OutputDefinition::result(RuntimeType::Int))
                .compute(|ctx| {
                    std::thread::sleep(Duration::from_millis(300));
                    ctx.output("result", 1i64);
                    Ok(())
                }),
        );
        let plan = build_plan(&builder.build().unwrap(), &ResolvedConfig::default(), None).unwrap();

        let result = memory_executor()
            .with_config(ExecutorConfig::default().with_step_timeout(Duration::from_millis(20)))
            .execute(&plan, None)
            .await
            .unwrap();

        assert!(!result.success);
        let record = result.step("sleepy.compute").unwrap();
        assert_eq!(record.error.as_ref().map(|e| e.kind), Some(StepErrorKind::Timeout));
    }

    #[tokio::test]
    async fn test_cancellation_stops_dispatch() {
        let token = CancellationToken::new();
        let trigger = token.clone();
        let mut builder = GraphBuilder::new("cancel");
        let first = builder.add_node(
            NodeDefinition::new("first")
                .output(OutputDefinition::result(RuntimeType::Int))
                .compute(move |ctx| {
                    trigger.cancel();
                    ctx.output("result", 1i64);
                    Ok(())
                }),
        );
        let second = builder.add_node(
            NodeDefinition::new("second")
                .input(InputDefinition::new("num", RuntimeType::Int))
                .output(OutputDefinition::result(RuntimeType::Int))
                .compute(|_| panic!("must not run after cancellation")),
        );
        builder.bind(&second).input("num", first.output("result"));
        let plan = build_plan(&builder.build().unwrap(), &ResolvedConfig::default(), None).unwrap();

        let result = memory_executor()
            .with_cancellation(token)
            .execute(&plan, None)
            .await
            .unwrap();

        assert!(result.canceled);
        assert!(!result.success);
        assert_eq!(
            step_keys_with(&result, StepState::Skipped),
            vec!["first.compute", "second.compute"]
        );
        assert!(result
            .steps
            .iter()
            .all(|s| s.skip_reason.as_deref() == Some(RUN_CANCELED)));
    }

    #[tokio::test]
    async fn test_resources_reach_steps_and_are_torn_down() {
        let torn_down = Arc::new(AtomicUsize::new(0));
        let counter = torn_down.clone();
        let db = ResourceDefinition::from_fn(move |config: Value| {
            let counter = counter.clone();
            async move {
                let base = config.get("base").and_then(|v| v.as_number()).unwrap_or(0.0) as i64;
                Ok(AcquiredResource::new(base).with_teardown(move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                }))
            }
        });

        let mut builder = GraphBuilder::new("with_db");
        builder.add_node(
            NodeDefinition::new("lookup")
                .output(OutputDefinition::result(RuntimeType::Int))
                .requires_resource("db")
                .compute(|ctx| {
                    let base = ctx.resource::<i64>("db")?;
                    ctx.output("result", *base + 1);
                    Ok(())
                }),
        );
        builder.mode(ModeDefinition::new("local").resource("db", db));
        let graph = builder.build().unwrap();
        let config =
            ResolvedConfig::from_yaml_str("resources:\n  db:\n    config:\n      base: 41\n")
                .unwrap();
        let plan = build_plan(&graph, &config, None).unwrap();

        let result = memory_executor().execute(&plan, None).await.unwrap();

        assert!(result.success);
        assert_eq!(result.output_value("lookup.compute", "result"), Some(&Value::from(42i64)));
        assert_eq!(torn_down.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_resource_failure_is_fatal_before_steps() {
        let broken = ResourceDefinition::from_fn(|_config: Value| async move {
            Err::<AcquiredResource, crate::error::BoxError>("unreachable host".into())
        });
        let mut builder = GraphBuilder::new("broken");
        builder.add_node(
            NodeDefinition::new("noop")
                .output(OutputDefinition::result(RuntimeType::Int))
                .compute(|ctx| {
                    ctx.output("result", 1i64);
                    Ok(())
                }),
        );
        builder.mode(ModeDefinition::new("local").resource("db", broken));
        let plan = build_plan(&builder.build().unwrap(), &ResolvedConfig::default(), None).unwrap();

        let err = memory_executor().execute(&plan, None).await.unwrap_err();
        assert!(matches!(err, EngineError::ResourceInit { .. }));
    }

    #[tokio::test]
    async fn test_value_thunk_and_materialization() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out").join("add_one.json");
        let config = ResolvedConfig::default().with_node(
            "add_one",
            NodeConfig::new()
                .with_input("num", InputSource::value(41i64))
                .with_output(OutputTarget::new("result", &out, MaterializationFormat::Json)),
        );
        let plan = build_plan(&fixtures::unbound_graph(), &config, None).unwrap();

        let result = memory_executor().execute(&plan, None).await.unwrap();

        assert!(result.success);
        assert_eq!(std::fs::read_to_string(&out).unwrap().trim(), "42.0");
        assert!(result
            .events
            .iter()
            .any(|e| matches!(
                e,
                ExecutionEvent::Materialized { path, .. } if path.ends_with("add_one.json")
            )));
    }

    #[tokio::test]
    async fn test_durable_store_persists_between_executors() {
        let dir = tempfile::tempdir().unwrap();
        let config = ResolvedConfig::default()
            .with_storage(crate::config::StorageConfig::filesystem(dir.path()));
        let plan = build_plan(&fixtures::chain_graph(), &config, None).unwrap();
        let registry = ObjectStoreRegistry::new();

        let first = PlanExecutor::for_plan(&plan, &registry).unwrap();
        let run = first.execute(&plan, Some("durable-a".to_string())).await.unwrap();
        assert!(run.success);
        drop(first);

        let second = PlanExecutor::for_plan(&plan, &registry).unwrap();
        let rerun = second
            .execute_subset(&plan, "durable-a", &["add_two.compute"], Some("durable-b".to_string()))
            .await
            .unwrap();
        assert!(rerun.success);
        assert_eq!(
            rerun.output_value("add_two.compute", "result"),
            run.output_value("add_two.compute", "result")
        );
        assert!(dir
            .path()
            .join("durable-b/intermediates/add_one.compute/result")
            .exists());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_multi_worker_on_filesystem_store() {
        let dir = tempfile::tempdir().unwrap();
        let config = ResolvedConfig::default()
            .with_storage(crate::config::StorageConfig::filesystem(dir.path()));
        let plan = build_plan(&fixtures::fan_in_graph(), &config, None).unwrap();
        let executor = PlanExecutor::for_plan(&plan, &ObjectStoreRegistry::new())
            .unwrap()
            .with_config(ExecutorConfig::multi_worker(4));

        let result = executor.execute(&plan, Some("fs-multi".to_string())).await.unwrap();

        assert!(result.success);
        assert_eq!(result.output_value("add.compute", "result"), Some(&Value::from(5i64)));
        for step in ["return_two.compute", "return_three.compute", "add.compute"] {
            let path = dir.path().join("fs-multi/intermediates").join(step).join("result");
            assert!(path.exists(), "{}", path.display());
        }
    }

    #[tokio::test]
    async fn test_non_finite_output_on_durable_store_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let mut builder = GraphBuilder::new("ratio");
        builder.add_node(
            NodeDefinition::new("ratio")
                .output(OutputDefinition::result(RuntimeType::Float))
                .compute(|ctx| {
                    ctx.output("result", 0.0f64 / 0.0);
                    Ok(())
                }),
        );
        let config = ResolvedConfig::default()
            .with_storage(crate::config::StorageConfig::filesystem(dir.path()));
        let plan = build_plan(&builder.build().unwrap(), &config, None).unwrap();
        let executor = PlanExecutor::for_plan(&plan, &ObjectStoreRegistry::new()).unwrap();

        let err = executor.execute(&plan, None).await.unwrap_err();
        assert!(matches!(err, EngineError::Codec(_)));
    }

    #[tokio::test]
    async fn test_progress_channel_sees_every_event() {
        let (tx, rx) = progress_channel();
        let plan = default_plan(fixtures::math_graph());
        let result = memory_executor()
            .with_progress(tx)
            .execute(&plan, None)
            .await
            .unwrap();

        let streamed: Vec<ExecutionEvent> = {
            let mut stream = progress_stream(rx);
            let mut seen = Vec::new();
            while let Some(event) = stream.next().await {
                let done = matches!(event, ExecutionEvent::RunCompleted { .. });
                seen.push(event);
                if done {
                    break;
                }
            }
            seen
        };
        assert_eq!(streamed.len(), result.events.len());
        assert!(streamed.iter().all(|e| e.run_id() == result.run_id));
    }

    #[tokio::test]
    async fn test_run_id_from_config_and_tags() {
        let mut config = ResolvedConfig::default();
        config.run.run_id = Some("configured".to_string());
        config.run.tags.insert("team".to_string(), "data".to_string());
        let plan = build_plan(&fixtures::math_graph(), &config, None).unwrap();

        let result = memory_executor().execute(&plan, None).await.unwrap();
        assert_eq!(result.run_id, "configured");
        match &result.events[0] {
            ExecutionEvent::RunStarted { tags, .. } => {
                assert_eq!(tags.get("team").map(String::as_str), Some("data"))
            }
            other => panic!("unexpected first event {:?}", other),
        }
    }

    #[test]
    fn test_executor_config_from_config() {
        let mut config = ExecutionConfig::default();
        let parsed = ExecutorConfig::from_config(&config).unwrap();
        assert_eq!(parsed.scheduling, SchedulingMode::Sequential);
        assert!(!parsed.continue_on_error);

        config.mode = ExecutionMode::MultiWorker;
        config.max_concurrent = Some(3);
        config.step_timeout_secs = Some(5);
        let parsed = ExecutorConfig::from_config(&config).unwrap();
        assert_eq!(parsed.scheduling, SchedulingMode::MultiWorker { max_concurrent: 3 });
        assert_eq!(parsed.step_timeout, Some(Duration::from_secs(5)));

        config.max_concurrent = None;
        assert!(matches!(
            ExecutorConfig::from_config(&config).unwrap().scheduling,
            SchedulingMode::MultiWorker { max_concurrent } if max_concurrent >= 1
        ));

        config.max_concurrent = Some(0);
        assert!(matches!(ExecutorConfig::from_config(&config), Err(EngineError::Config(_))));
    }

    #[tokio::test]
    async fn test_user_logs_reach_sink() {
        let sink = MemoryLogSink::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let captured = seen.clone();
        let mut builder = GraphBuilder::new("chatty");
        builder.add_node(
            NodeDefinition::new("talker")
                .output(OutputDefinition::result(RuntimeType::Int))
                .compute(move |ctx| {
                    captured.lock().unwrap().push(ctx.run_id().to_string());
                    ctx.log_info("hello from talker");
                    ctx.output("result", 1i64);
                    Ok(())
                }),
        );
        let plan = build_plan(&builder.build().unwrap(), &ResolvedConfig::default(), None).unwrap();

        let result = memory_executor()
            .with_log_sink(Arc::new(sink.clone()))
            .execute(&plan, Some("chat".to_string()))
            .await
            .unwrap();

        assert!(result.success);
        assert_eq!(*seen.lock().unwrap(), vec!["chat".to_string()]);
        let records = sink.records();
        assert!(records
            .iter()
            .any(|r| {
                r.message == "hello from talker" && r.step_key.as_deref() == Some("talker.compute")
            }));
    }
}
