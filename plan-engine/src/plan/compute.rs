// Compute Steps
// The one step per node that runs the user compute body

use crate::config::ResolvedConfig;
use crate::error::{EngineError, EngineResult};
use crate::graph::{NodeBody, NodeDefinition, NodeHandle};
use crate::plan::objects::{ExecutionStep, StepCompute, StepInput, StepKind, StepOutput};

/// Build the compute step of a leaf node from its already-resolved inputs
pub fn create_compute_step(
    handle: &NodeHandle,
    definition: &NodeDefinition,
    inputs: Vec<StepInput>,
    config: &ResolvedConfig,
) -> EngineResult<ExecutionStep> {
    let compute = match &definition.body {
        NodeBody::Compute(Some(compute)) => compute.clone(),
        NodeBody::Compute(None) => {
            return Err(EngineError::invariant(format!(
                "definition '{}' used by node '{}' has no compute function",
                definition.name, handle
            )))
        }
        NodeBody::Composite(_) => {
            return Err(EngineError::invariant(format!(
                "composite node '{}' cannot have a compute step",
                handle
            )))
        }
    };

    let mut step = ExecutionStep::new(
        format!("{}.compute", handle),
        StepKind::Compute,
        handle.clone(),
        StepCompute::Node {
            compute,
            config: config.node_payload(handle),
        },
    );
    step.inputs = inputs;
    step.outputs = definition
        .outputs
        .iter()
        .map(|o| StepOutput::new(&o.name, o.runtime_type.clone(), o.optional))
        .collect();
    step.required_resources = definition.required_resources.clone();
    step.logging_tags
        .insert("definition".to_string(), definition.name.clone());

    if let Some(metadata_fn) = &definition.metadata_fn {
        step.metadata = metadata_fn(config);
    }

    Ok(step)
}
