// Plan Builder
// Walks a graph in topological order and synthesizes its execution steps

use crate::config::{InputSource, NodeConfig, OutputTarget, ResolvedConfig};
use crate::error::{EngineError, EngineResult};
use crate::graph::{
    GraphDefinition, InputDefinition, ModeDefinition, Node, NodeHandle, OutputDefinition,
};
use crate::plan::compute::create_compute_step;
use crate::plan::expectations::{decorate_with_expectations, PortSide};
use crate::plan::join::create_fan_in_join;
use crate::plan::objects::{ExecutionStep, ExecutionValueSubplan, StepInput, StepOutputHandle};
use crate::plan::thunks::{create_input_thunk, create_materialization_steps, create_value_thunk};

use std::collections::{BTreeMap, HashMap};
use tracing::debug;

/// (node name, port name) within one graph scope
type PortKey = (String, String);

/// Accumulates steps while visiting a graph and its nested composites
pub(crate) struct PlanBuilder<'a> {
    root: &'a GraphDefinition,
    config: &'a ResolvedConfig,
    mode: &'a ModeDefinition,
    steps: Vec<ExecutionStep>,
}

impl<'a> PlanBuilder<'a> {
    pub fn new(
        root: &'a GraphDefinition,
        config: &'a ResolvedConfig,
        mode: &'a ModeDefinition,
    ) -> Self {
        Self {
            root,
            config,
            mode,
            steps: Vec::new(),
        }
    }

    /// Visit the root graph and return the steps in plan order
    pub fn build(mut self) -> EngineResult<Vec<ExecutionStep>> {
        let root = self.root;
        check_config_nodes(root, &self.config.nodes, None)?;
        self.visit_graph(root, None, &HashMap::new())?;

        if self.config.storage.is_durable() {
            let plugins = root.storage_plugins();
            for step in &self.steps {
                for output in &step.outputs {
                    plugins.check_supported(&output.runtime_type)?;
                }
            }
        }

        Ok(self.steps)
    }

    /// Visit every node of `graph`; returns the terminal handle of each produced output
    fn visit_graph(
        &mut self,
        graph: &GraphDefinition,
        parent: Option<&NodeHandle>,
        mapped_inputs: &HashMap<PortKey, StepOutputHandle>,
    ) -> EngineResult<HashMap<PortKey, StepOutputHandle>> {
        let mut outputs: HashMap<PortKey, StepOutputHandle> = HashMap::new();

        for node in graph.topological_order() {
            let handle = NodeHandle::new(&node.name, parent);
            debug!(node = %handle, "planning node");

            let mut resolved: Vec<(&InputDefinition, StepOutputHandle)> = Vec::new();
            for input in &node.definition.inputs {
                if let Some(source) =
                    self.resolve_input(graph, node, &handle, input, mapped_inputs, &outputs)?
                {
                    resolved.push((input, source));
                }
            }
            self.check_config_ports(node, &handle)?;

            match node.definition.composite() {
                None => {
                    self.check_resources(node, &handle)?;

                    let mut step_inputs = Vec::with_capacity(resolved.len());
                    for (input, source) in resolved {
                        let gated = if self.config.expectations.evaluate {
                            self.push_subplan(decorate_with_expectations(
                                &handle,
                                PortSide::Input,
                                &input.name,
                                &input.runtime_type,
                                source,
                                &input.expectations,
                            ))
                        } else {
                            source
                        };
                        let runtime_type = input.runtime_type.clone();
                        step_inputs.push(StepInput::new(&input.name, runtime_type, gated));
                    }

                    let compute =
                        create_compute_step(&handle, &node.definition, step_inputs, self.config)?;
                    let compute_key = compute.key.clone();
                    self.steps.push(compute);

                    for output in &node.definition.outputs {
                        let produced = StepOutputHandle::new(&compute_key, &output.name);
                        let terminal = if self.config.expectations.evaluate {
                            self.push_subplan(decorate_with_expectations(
                                &handle,
                                PortSide::Output,
                                &output.name,
                                &output.runtime_type,
                                produced,
                                &output.expectations,
                            ))
                        } else {
                            produced
                        };
                        self.push_materializations(&handle, output, &terminal);
                        outputs.insert((node.name.clone(), output.name.clone()), terminal);
                    }
                }
                Some(body) => {
                    let mut inner_inputs: HashMap<PortKey, StepOutputHandle> = HashMap::new();
                    for (input, source) in resolved {
                        for mapping in body.mapped_inputs(&input.name) {
                            inner_inputs.insert(
                                (mapping.node.clone(), mapping.input.clone()),
                                source.clone(),
                            );
                        }
                    }

                    let inner_outputs =
                        self.visit_graph(&body.graph, Some(&handle), &inner_inputs)?;

                    for output in &node.definition.outputs {
                        let terminal = body
                            .output_mapping(&output.name)
                            .and_then(|m| inner_outputs.get(&(m.node.clone(), m.output.clone())))
                            .cloned()
                            .ok_or_else(|| {
                                EngineError::invariant(format!(
                                    "composite '{}' output '{}' has no inner step",
                                    handle, output.name
                                ))
                            })?;
                        self.push_materializations(&handle, output, &terminal);
                        outputs.insert((node.name.clone(), output.name.clone()), terminal);
                    }
                }
            }
        }

        Ok(outputs)
    }

    /// Find the source of one input: graph dependency, composite mapping, config value, or none
    fn resolve_input(
        &mut self,
        graph: &GraphDefinition,
        node: &Node,
        handle: &NodeHandle,
        input: &InputDefinition,
        mapped_inputs: &HashMap<PortKey, StepOutputHandle>,
        outputs: &HashMap<PortKey, StepOutputHandle>,
    ) -> EngineResult<Option<StepOutputHandle>> {
        let structure = graph.dependency_structure();
        let deps = structure.deps_of(&node.name, &input.name)?;

        if !deps.is_empty() {
            let mut upstream = Vec::with_capacity(deps.len());
            for dep in deps {
                let key = (dep.node.name().to_string(), dep.output_name.clone());
                let terminal = outputs.get(&key).cloned().ok_or_else(|| {
                    EngineError::invariant(format!(
                        "input '{}' of '{}' depends on '{}' which has not been planned",
                        input.name, handle, dep
                    ))
                })?;
                upstream.push(terminal);
            }

            if structure.is_fan_in(&node.name, &input.name) {
                let subplan =
                    create_fan_in_join(handle, &input.name, &input.runtime_type, &upstream);
                return Ok(Some(self.push_subplan(subplan)));
            }
            return Ok(upstream.into_iter().next());
        }

        if let Some(source) = mapped_inputs.get(&(node.name.clone(), input.name.clone())) {
            return Ok(Some(source.clone()));
        }

        let configured = self
            .config
            .node_config(handle)
            .and_then(|c| c.inputs.get(&input.name));
        match configured {
            Some(InputSource::Value(value)) => {
                let subplan =
                    create_value_thunk(handle, &input.name, &input.runtime_type, value.clone());
                Ok(Some(self.push_subplan(subplan)))
            }
            Some(InputSource::File(file)) => {
                let subplan =
                    create_input_thunk(handle, &input.name, &input.runtime_type, file.clone());
                Ok(Some(self.push_subplan(subplan)))
            }
            None if input.optional => Ok(None),
            None => Err(EngineError::plan(format!(
                "input '{}' of node '{}' has no upstream dependency and no configured value",
                input.name, handle
            ))),
        }
    }

    fn push_subplan(&mut self, subplan: ExecutionValueSubplan) -> StepOutputHandle {
        self.steps.extend(subplan.steps);
        subplan.terminal
    }

    fn push_materializations(
        &mut self,
        handle: &NodeHandle,
        output: &OutputDefinition,
        terminal: &StepOutputHandle,
    ) {
        let targets: Vec<&OutputTarget> = self
            .config
            .node_config(handle)
            .map(|c| c.outputs.iter().filter(|t| t.output == output.name).collect())
            .unwrap_or_default();
        if targets.is_empty() {
            return;
        }

        let steps = create_materialization_steps(
            handle,
            &output.name,
            &output.runtime_type,
            terminal,
            &targets,
            self.root.storage_plugins(),
        );
        self.steps.extend(steps);
    }

    fn check_resources(&self, node: &Node, handle: &NodeHandle) -> EngineResult<()> {
        for resource in &node.definition.required_resources {
            if !self.mode.has_resource(resource) {
                return Err(EngineError::plan(format!(
                    "node '{}' requires resource '{}', which mode '{}' does not provide",
                    handle, resource, self.mode.name
                )));
            }
        }
        Ok(())
    }

    /// Config may only name ports the node declares
    fn check_config_ports(&self, node: &Node, handle: &NodeHandle) -> EngineResult<()> {
        let Some(node_config) = self.config.node_config(handle) else {
            return Ok(());
        };

        for name in node_config.inputs.keys() {
            if node.definition.input_def(name).is_none() {
                return Err(EngineError::plan(format!(
                    "config supplies input '{}' to node '{}', which declares no such input",
                    name, handle
                )));
            }
        }
        for target in &node_config.outputs {
            if node.definition.output_def(&target.output).is_none() {
                return Err(EngineError::plan(format!(
                    "config materializes output '{}' of node '{}', which declares no such output",
                    target.output, handle
                )));
            }
        }
        Ok(())
    }
}

/// Every configured node must exist at its nesting level
fn check_config_nodes(
    graph: &GraphDefinition,
    nodes: &BTreeMap<String, NodeConfig>,
    parent: Option<&NodeHandle>,
) -> EngineResult<()> {
    for (name, node_config) in nodes {
        let handle = NodeHandle::new(name, parent);
        let node = graph.node(name).ok_or_else(|| {
            EngineError::plan(format!(
                "config references node '{}', which graph '{}' does not contain",
                handle, graph.name
            ))
        })?;

        match node.definition.composite() {
            Some(body) => check_config_nodes(&body.graph, &node_config.nodes, Some(&handle))?,
            None if !node_config.nodes.is_empty() => {
                return Err(EngineError::plan(format!(
                    "config nests nodes under '{}', which is not a composite",
                    handle
                )))
            }
            None => {}
        }
    }
    Ok(())
}
