// Step Executor
// Runs one execution step and turns its work into a checked event sequence

use crate::config::{FileFormat, FileInput, MaterializationFormat};
use crate::error::{StepErrorKind, StepExecutionError};
use crate::execution::context::{ComputeContext, StepEvent};
use crate::execution::events::LogSink;
use crate::execution::resources::Resources;
use crate::graph::{ComputeFn, ExpectationDefinition};
use crate::plan::{
    ExecutionStep, JoinMode, StepCompute, EXPECTATION_INPUT, EXPECTATION_OUTPUT,
    MATERIALIZE_INPUT, THUNK_OUTPUT,
};
use crate::storage::codec::Codec;
use crate::types::Value;

use std::any::Any;
use std::collections::{BTreeMap, BTreeSet};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// Events a step produced and, when it failed, why
#[derive(Debug, Clone)]
pub struct StepOutcome {
    pub events: Vec<StepEvent>,
    pub error: Option<StepExecutionError>,
}

impl StepOutcome {
    fn ok(events: Vec<StepEvent>) -> Self {
        Self {
            events,
            error: None,
        }
    }

    fn failed(events: Vec<StepEvent>, error: StepExecutionError) -> Self {
        Self {
            events,
            error: Some(error),
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    /// Produced outputs, in emission order
    pub fn outputs(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.events.iter().filter_map(|event| match event {
            StepEvent::OutputProduced { output_name, value } => Some((output_name.as_str(), value)),
            _ => None,
        })
    }
}

/// Executes steps of one run; cheap to clone into worker tasks
#[derive(Clone)]
pub struct StepExecutor {
    run_id: String,
    resources: Arc<Resources>,
    log_sink: Arc<dyn LogSink>,
}

impl StepExecutor {
    pub fn new(
        run_id: impl Into<String>,
        resources: Arc<Resources>,
        log_sink: Arc<dyn LogSink>,
    ) -> Self {
        Self {
            run_id: run_id.into(),
            resources,
            log_sink,
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Run `step` with its bound inputs
    pub async fn execute(
        &self,
        step: Arc<ExecutionStep>,
        inputs: BTreeMap<String, Value>,
    ) -> StepOutcome {
        debug!(run_id = %self.run_id, step_key = %step.key, kind = %step.kind, "executing step");

        if let Err(error) = check_inputs(&step, &inputs) {
            return StepOutcome::failed(Vec::new(), error);
        }

        let outcome = match &step.compute {
            StepCompute::Node { compute, config } => {
                self.run_compute(&step, compute.clone(), config.clone(), inputs)
                    .await
            }
            StepCompute::Value(value) => {
                StepOutcome::ok(vec![StepEvent::output(THUNK_OUTPUT, value.clone())])
            }
            StepCompute::ReadInput(source) => match read_input(source).await {
                Ok(value) => StepOutcome::ok(vec![StepEvent::output(THUNK_OUTPUT, value)]),
                Err(message) => StepOutcome::failed(
                    Vec::new(),
                    step_error(&step, StepErrorKind::Io, message),
                ),
            },
            StepCompute::Expectation(expectation) => {
                run_expectation(&step, expectation, inputs)
            }
            StepCompute::Join(mode) => run_join(&step, *mode, inputs),
            StepCompute::Materialize { path, format } => {
                materialize(&step, path, *format, inputs).await
            }
            StepCompute::Serialize { path, codec } => {
                serialize(&step, path, codec.as_ref(), inputs).await
            }
        };

        match (outcome.error.is_none(), check_outputs(&step, &outcome.events)) {
            (true, Err(error)) => StepOutcome::failed(outcome.events, error),
            _ => outcome,
        }
    }

    async fn run_compute(
        &self,
        step: &Arc<ExecutionStep>,
        compute: ComputeFn,
        config: Value,
        inputs: BTreeMap<String, Value>,
    ) -> StepOutcome {
        let mut ctx = ComputeContext::new(
            &self.run_id,
            &step.key,
            step.node_handle.to_string(),
            inputs,
            config,
            self.resources.view(&step.required_resources),
            self.log_sink.clone(),
        );

        // User code may block; keep it off the scheduler threads
        let joined = tokio::task::spawn_blocking(move || {
            let result = catch_unwind(AssertUnwindSafe(|| compute(&mut ctx)));
            (ctx.into_events(), result)
        })
        .await;

        match joined {
            Ok((events, Ok(Ok(())))) => StepOutcome::ok(events),
            Ok((events, Ok(Err(err)))) => StepOutcome::failed(
                events,
                StepExecutionError::from_user_error(&step.key, step.node_handle.to_string(), &*err),
            ),
            Ok((events, Err(payload))) => StepOutcome::failed(
                events,
                step_error(step, StepErrorKind::Panic, panic_message(payload.as_ref())),
            ),
            Err(join_err) => StepOutcome::failed(
                Vec::new(),
                step_error(step, StepErrorKind::Panic, join_err.to_string()),
            ),
        }
    }
}

fn step_error(
    step: &ExecutionStep,
    kind: StepErrorKind,
    message: impl Into<String>,
) -> StepExecutionError {
    StepExecutionError::new(&step.key, step.node_handle.to_string(), kind, message)
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        format!("panicked: {}", message)
    } else if let Some(message) = payload.downcast_ref::<String>() {
        format!("panicked: {}", message)
    } else {
        "panicked".to_string()
    }
}

fn check_inputs(
    step: &ExecutionStep,
    inputs: &BTreeMap<String, Value>,
) -> Result<(), StepExecutionError> {
    for input in &step.inputs {
        let value = inputs.get(&input.name).ok_or_else(|| {
            step_error(
                step,
                StepErrorKind::InvariantViolation,
                format!("input '{}' was not bound", input.name),
            )
        })?;
        input.runtime_type.type_check(value).map_err(|message| {
            let message = format!("input '{}': {}", input.name, message);
            step_error(step, StepErrorKind::TypeCheck, message)
        })?;
    }
    Ok(())
}

/// Every output event must name a declared output, once, with a value of its type
fn check_outputs(step: &ExecutionStep, events: &[StepEvent]) -> Result<(), StepExecutionError> {
    let mut seen = BTreeSet::new();
    for event in events {
        let StepEvent::OutputProduced { output_name, value } = event else {
            continue;
        };
        let output = step.output(output_name).ok_or_else(|| {
            step_error(
                step,
                StepErrorKind::InvariantViolation,
                format!("produced undeclared output '{}'", output_name),
            )
        })?;
        if !seen.insert(output_name.as_str()) {
            return Err(step_error(
                step,
                StepErrorKind::InvariantViolation,
                format!("produced output '{}' more than once", output_name),
            ));
        }
        output.runtime_type.type_check(value).map_err(|message| {
            let message = format!("output '{}': {}", output_name, message);
            step_error(step, StepErrorKind::TypeCheck, message)
        })?;
    }
    Ok(())
}

async fn read_input(source: &FileInput) -> Result<Value, String> {
    let content = tokio::fs::read_to_string(&source.path)
        .await
        .map_err(|e| format!("failed to read {}: {}", source.path.display(), e))?;

    match source.format {
        FileFormat::Json => serde_json::from_str(&content)
            .map_err(|e| format!("invalid JSON in {}: {}", source.path.display(), e)),
        FileFormat::Yaml => serde_yaml::from_str(&content)
            .map_err(|e| format!("invalid YAML in {}: {}", source.path.display(), e)),
        FileFormat::Text => Ok(Value::String(content)),
    }
}

fn run_expectation(
    step: &ExecutionStep,
    expectation: &ExpectationDefinition,
    mut inputs: BTreeMap<String, Value>,
) -> StepOutcome {
    let value = inputs.remove(EXPECTATION_INPUT).unwrap_or_default();
    let check = expectation.check.clone();
    let result = match catch_unwind(AssertUnwindSafe(|| check(&value))) {
        Ok(result) => result,
        Err(payload) => {
            return StepOutcome::failed(
                Vec::new(),
                step_error(step, StepErrorKind::Panic, panic_message(payload.as_ref())),
            )
        }
    };

    let success = result.success;
    let message = result.message.clone();
    let mut events = vec![StepEvent::expectation(&expectation.name, result)];
    if success {
        events.push(StepEvent::output(EXPECTATION_OUTPUT, value));
        StepOutcome::ok(events)
    } else {
        let message =
            message.unwrap_or_else(|| format!("expectation '{}' failed", expectation.name));
        StepOutcome::failed(events, step_error(step, StepErrorKind::ExpectationFailed, message))
    }
}

fn run_join(
    step: &ExecutionStep,
    mode: JoinMode,
    mut inputs: BTreeMap<String, Value>,
) -> StepOutcome {
    let Some(output) = step.outputs.first() else {
        return StepOutcome::failed(
            Vec::new(),
            step_error(step, StepErrorKind::InvariantViolation, "join step declares no output"),
        );
    };

    let ordered: Vec<Value> = step
        .inputs
        .iter()
        .filter_map(|input| inputs.remove(&input.name))
        .collect();

    let value = match mode {
        JoinMode::Passthrough => ordered.into_iter().next().unwrap_or_default(),
        JoinMode::Concat => Value::Array(ordered),
    };
    StepOutcome::ok(vec![StepEvent::output(&output.name, value)])
}

async fn write_file(path: &Path, bytes: Vec<u8>) -> Result<(), String> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| format!("failed to create {}: {}", parent.display(), e))?;
    }
    tokio::fs::write(path, bytes)
        .await
        .map_err(|e| format!("failed to write {}: {}", path.display(), e))
}

async fn materialize(
    step: &ExecutionStep,
    path: &Path,
    format: MaterializationFormat,
    inputs: BTreeMap<String, Value>,
) -> StepOutcome {
    let value = inputs.get(MATERIALIZE_INPUT).cloned().unwrap_or_default();
    let rendered = match format {
        MaterializationFormat::Yaml => serde_yaml::to_string(&value).map_err(|e| e.to_string()),
        _ => serde_json::to_string_pretty(&value).map_err(|e| e.to_string()),
    };

    let result = match rendered {
        Ok(text) => write_file(path, text.into_bytes()).await,
        Err(message) => Err(message),
    };
    match result {
        Ok(()) => StepOutcome::ok(vec![StepEvent::Materialized {
            path: path.display().to_string(),
            description: Some(format!("{:?} document", format).to_lowercase()),
        }]),
        Err(message) => {
            StepOutcome::failed(Vec::new(), step_error(step, StepErrorKind::Io, message))
        }
    }
}

async fn serialize(
    step: &ExecutionStep,
    path: &Path,
    codec: &dyn Codec,
    inputs: BTreeMap<String, Value>,
) -> StepOutcome {
    let value = inputs.get(MATERIALIZE_INPUT).cloned().unwrap_or_default();
    let result = match codec.encode(&value) {
        Ok(bytes) => write_file(path, bytes).await,
        Err(err) => Err(err.to_string()),
    };
    match result {
        Ok(()) => StepOutcome::ok(vec![StepEvent::Materialized {
            path: path.display().to_string(),
            description: Some(format!("serialized with {} codec", codec.name())),
        }]),
        Err(message) => {
            StepOutcome::failed(Vec::new(), step_error(step, StepErrorKind::Io, message))
        }
    }
}
