// Join Steps
// Fan-in steps that combine several upstream outputs into one value

use crate::graph::NodeHandle;
use crate::plan::objects::{
    ExecutionStep, ExecutionValueSubplan, JoinMode, StepCompute, StepInput, StepKind, StepOutput,
    StepOutputHandle, FAN_IN_OUTPUT,
};
use crate::types::RuntimeType;

/// Join the outputs bound to a fan-in input into one list, in binding order
pub fn create_fan_in_join(
    handle: &NodeHandle,
    input_name: &str,
    runtime_type: &RuntimeType,
    upstream: &[StepOutputHandle],
) -> ExecutionValueSubplan {
    let element_type = match runtime_type {
        RuntimeType::List(inner) => inner.as_ref().clone(),
        _ => RuntimeType::Any,
    };

    let step = create_join_step(
        format!("{}.input.{}.fan_in", handle, input_name),
        handle,
        JoinMode::Concat,
        upstream,
        &element_type,
        StepOutput::new(FAN_IN_OUTPUT, runtime_type.clone(), false),
    );

    ExecutionValueSubplan::single(step, FAN_IN_OUTPUT)
}

/// Join step whose inputs are named after the handles they read
pub(crate) fn create_join_step(
    key: String,
    handle: &NodeHandle,
    mode: JoinMode,
    upstream: &[StepOutputHandle],
    input_type: &RuntimeType,
    output: StepOutput,
) -> ExecutionStep {
    let mut step = ExecutionStep::new(key, StepKind::Join, handle.clone(), StepCompute::Join(mode));
    for source in upstream {
        step.inputs.push(StepInput::new(
            source.to_string(),
            input_type.clone(),
            source.clone(),
        ));
    }
    step.outputs.push(output);
    step
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fan_in_join_preserves_order() {
        let handle = NodeHandle::root("add");
        let upstream = vec![
            StepOutputHandle::new("return_two.compute", "result"),
            StepOutputHandle::new("return_three.compute", "result"),
        ];
        let subplan = create_fan_in_join(
            &handle,
            "nums",
            &RuntimeType::list(RuntimeType::Int),
            &upstream,
        );

        let step = &subplan.steps[0];
        assert_eq!(step.key, "add.input.nums.fan_in");
        assert_eq!(step.kind, StepKind::Join);
        let names: Vec<&str> = step.inputs.iter().map(|i| i.name.as_str()).collect();
        assert_eq!(
            names,
            vec!["return_two.compute:result", "return_three.compute:result"]
        );
        assert!(step.inputs.iter().all(|i| i.runtime_type == RuntimeType::Int));
        assert_eq!(subplan.terminal.output_name, FAN_IN_OUTPUT);
    }
}
