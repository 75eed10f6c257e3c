// Thunk Steps
// Steps that bring values in from configuration and write outputs back out

use crate::config::{FileInput, MaterializationFormat, OutputTarget};
use crate::graph::NodeHandle;
use crate::plan::objects::{
    ExecutionStep, ExecutionValueSubplan, StepCompute, StepInput, StepKind, StepOutput,
    StepOutputHandle, MATERIALIZE_INPUT, THUNK_OUTPUT,
};
use crate::storage::plugins::TypeStoragePluginRegistry;
use crate::types::{RuntimeType, Value};

/// Publish a literal config value as the input's source
pub fn create_value_thunk(
    handle: &NodeHandle,
    input_name: &str,
    runtime_type: &RuntimeType,
    value: Value,
) -> ExecutionValueSubplan {
    let step = ExecutionStep::new(
        format!("{}.input.{}.value", handle, input_name),
        StepKind::ValueThunk,
        handle.clone(),
        StepCompute::Value(value),
    )
    .with_output(StepOutput::new(THUNK_OUTPUT, runtime_type.clone(), false));

    ExecutionValueSubplan::single(step, THUNK_OUTPUT)
}

/// Read the input's value from an external file
pub fn create_input_thunk(
    handle: &NodeHandle,
    input_name: &str,
    runtime_type: &RuntimeType,
    source: FileInput,
) -> ExecutionValueSubplan {
    let mut step = ExecutionStep::new(
        format!("{}.input.{}.read", handle, input_name),
        StepKind::InputThunk,
        handle.clone(),
        StepCompute::ReadInput(source.clone()),
    )
    .with_output(StepOutput::new(THUNK_OUTPUT, runtime_type.clone(), false));
    step.metadata
        .insert("path".to_string(), source.path.display().to_string());

    ExecutionValueSubplan::single(step, THUNK_OUTPUT)
}

/// One step per configured target of an output, in configuration order
pub fn create_materialization_steps(
    handle: &NodeHandle,
    output_name: &str,
    runtime_type: &RuntimeType,
    upstream: &StepOutputHandle,
    targets: &[&OutputTarget],
    plugins: &TypeStoragePluginRegistry,
) -> Vec<ExecutionStep> {
    targets
        .iter()
        .enumerate()
        .map(|(i, target)| {
            let (key, kind, compute) = match target.format {
                MaterializationFormat::Serialized => (
                    format!("{}.output.{}.serialize.{}", handle, output_name, i),
                    StepKind::Serialize,
                    StepCompute::Serialize {
                        path: target.path.clone(),
                        codec: plugins.codec_for(runtime_type),
                    },
                ),
                format => (
                    format!("{}.output.{}.materialize.{}", handle, output_name, i),
                    StepKind::MaterializationThunk,
                    StepCompute::Materialize {
                        path: target.path.clone(),
                        format,
                    },
                ),
            };

            let mut step = ExecutionStep::new(key, kind, handle.clone(), compute).with_input(
                StepInput::new(MATERIALIZE_INPUT, runtime_type.clone(), upstream.clone()),
            );
            step.metadata
                .insert("path".to_string(), target.path.display().to_string());
            step
        })
        .collect()
}
