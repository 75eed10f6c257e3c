// Expectation Steps
// Gates a value behind its declared expectations, joined back into one handle

use crate::graph::{ExpectationDefinition, NodeHandle};
use crate::plan::join::create_join_step;
use crate::plan::objects::{
    ExecutionStep, ExecutionValueSubplan, JoinMode, StepCompute, StepInput, StepKind, StepOutput,
    StepOutputHandle, EXPECTATION_INPUT, EXPECTATION_OUTPUT,
};
use crate::types::RuntimeType;

/// Which side of the compute step a port sits on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortSide {
    Input,
    Output,
}

impl PortSide {
    fn label(&self) -> &'static str {
        match self {
            PortSide::Input => "input",
            PortSide::Output => "output",
        }
    }

    fn step_kind(&self) -> StepKind {
        match self {
            PortSide::Input => StepKind::InputExpectation,
            PortSide::Output => StepKind::OutputExpectation,
        }
    }
}

/// Wrap `source` in one expectation step per check and a join that republishes the value.
/// With no expectations the source handle is returned unchanged.
pub fn decorate_with_expectations(
    handle: &NodeHandle,
    side: PortSide,
    port_name: &str,
    runtime_type: &RuntimeType,
    source: StepOutputHandle,
    expectations: &[ExpectationDefinition],
) -> ExecutionValueSubplan {
    if expectations.is_empty() {
        return ExecutionValueSubplan::empty(source);
    }

    let prefix = format!("{}.{}.{}", handle, side.label(), port_name);
    let mut steps: Vec<ExecutionStep> = expectations
        .iter()
        .map(|expectation| {
            let mut step = ExecutionStep::new(
                format!("{}.expectation.{}", prefix, expectation.name),
                side.step_kind(),
                handle.clone(),
                StepCompute::Expectation(expectation.clone()),
            )
            .with_input(StepInput::new(
                EXPECTATION_INPUT,
                runtime_type.clone(),
                source.clone(),
            ))
            .with_output(StepOutput::new(EXPECTATION_OUTPUT, runtime_type.clone(), true));
            step.metadata
                .insert("expectation".to_string(), expectation.name.clone());
            if let Some(description) = &expectation.description {
                step.metadata
                    .insert("description".to_string(), description.clone());
            }
            step
        })
        .collect();

    let gated: Vec<StepOutputHandle> = steps
        .iter()
        .map(|s| s.output_handle(EXPECTATION_OUTPUT))
        .collect();
    let join = create_join_step(
        format!("{}.expectations.join", prefix),
        handle,
        JoinMode::Passthrough,
        &gated,
        runtime_type,
        StepOutput::new(EXPECTATION_OUTPUT, runtime_type.clone(), false),
    );
    let terminal = join.output_handle(EXPECTATION_OUTPUT);
    steps.push(join);

    ExecutionValueSubplan { steps, terminal }
}
