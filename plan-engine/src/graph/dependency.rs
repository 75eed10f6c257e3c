// Dependency Structure
// Input -> output adjacency index for one graph scope, with reverse lookups

use crate::graph::handle::{InputHandle, NodeHandle, OutputHandle};
use crate::graph::{GraphError, Node};

use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Declared binding of one node input to its upstream outputs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyDefinition {
    pub node: String,
    pub input: String,
    /// Upstream (node, output) pairs in declaration order
    pub upstream: Vec<(String, String)>,
    /// True when declared as an explicit fan-in
    pub fan_in: bool,
}

/// Read-only dependency index built once per graph scope
#[derive(Debug, Clone, Default)]
pub struct DependencyStructure {
    forward: BTreeMap<InputHandle, Vec<OutputHandle>>,
    reverse: BTreeMap<OutputHandle, Vec<InputHandle>>,
    fan_in: BTreeSet<InputHandle>,
    node_inputs: HashMap<String, BTreeSet<String>>,
}

impl DependencyStructure {
    /// Build and validate the index for the given nodes
    pub fn build(
        nodes: &[Node],
        dependencies: &[DependencyDefinition],
    ) -> Result<Self, GraphError> {
        let by_name: HashMap<&str, &Node> = nodes.iter().map(|n| (n.name.as_str(), n)).collect();

        let mut structure = Self {
            node_inputs: nodes
                .iter()
                .map(|n| {
                    let inputs = n.definition.inputs.iter().map(|i| i.name.clone()).collect();
                    (n.name.clone(), inputs)
                })
                .collect(),
            ..Default::default()
        };

        for dep in dependencies {
            let target = by_name.get(dep.node.as_str()).ok_or_else(|| {
                GraphError::unknown_dependency(format!(
                    "dependency declared for unknown node '{}'",
                    dep.node
                ))
            })?;

            if target.definition.input_def(&dep.input).is_none() {
                return Err(GraphError::unknown_dependency(format!(
                    "node '{}' has no input named '{}'",
                    dep.node, dep.input
                )));
            }

            let input_handle = InputHandle::new(NodeHandle::root(&dep.node), &dep.input);
            if structure.forward.contains_key(&input_handle) {
                return Err(GraphError::invalid_structure(format!(
                    "input '{}' is bound more than once; declare a fan-in to combine upstreams",
                    input_handle
                )));
            }

            if dep.upstream.is_empty() {
                return Err(GraphError::invalid_structure(format!(
                    "input '{}' is bound to no upstream outputs",
                    input_handle
                )));
            }

            if dep.upstream.len() > 1 && !dep.fan_in {
                return Err(GraphError::invalid_structure(format!(
                    "input '{}' has several upstreams but is not declared as a fan-in",
                    input_handle
                )));
            }

            let mut seen = BTreeSet::new();
            let mut outputs = Vec::with_capacity(dep.upstream.len());
            for (upstream_node, upstream_output) in &dep.upstream {
                let source = by_name.get(upstream_node.as_str()).ok_or_else(|| {
                    GraphError::unknown_dependency(format!(
                        "input '{}' depends on unknown node '{}'",
                        input_handle, upstream_node
                    ))
                })?;

                if source.definition.output_def(upstream_output).is_none() {
                    return Err(GraphError::unknown_dependency(format!(
                        "input '{}' depends on unknown output '{}:{}'",
                        input_handle, upstream_node, upstream_output
                    )));
                }

                let key = format!("{}:{}", upstream_node, upstream_output);
                if !seen.insert(key.clone()) {
                    return Err(GraphError::invalid_structure(format!(
                        "fan-in for '{}' lists '{}' more than once",
                        input_handle, key
                    )));
                }

                let output_handle =
                    OutputHandle::new(NodeHandle::root(upstream_node), upstream_output);
                structure
                    .reverse
                    .entry(output_handle.clone())
                    .or_default()
                    .push(input_handle.clone());
                outputs.push(output_handle);
            }

            if dep.fan_in {
                structure.fan_in.insert(input_handle.clone());
            }
            structure.forward.insert(input_handle, outputs);
        }

        Ok(structure)
    }

    /// Upstream outputs feeding `node.input_name`; empty when the input is unbound
    pub fn deps_of(&self, node: &str, input_name: &str) -> Result<&[OutputHandle], GraphError> {
        let known = self
            .node_inputs
            .get(node)
            .map(|inputs| inputs.contains(input_name))
            .unwrap_or(false);
        if !known {
            return Err(GraphError::unknown_input(format!(
                "node '{}' has no input named '{}'",
                node, input_name
            )));
        }

        let handle = InputHandle::new(NodeHandle::root(node), input_name);
        Ok(self
            .forward
            .get(&handle)
            .map(|outputs| outputs.as_slice())
            .unwrap_or(&[]))
    }

    pub fn has_deps(&self, node: &str, input_name: &str) -> bool {
        self.forward
            .contains_key(&InputHandle::new(NodeHandle::root(node), input_name))
    }

    pub fn is_fan_in(&self, node: &str, input_name: &str) -> bool {
        self.fan_in
            .contains(&InputHandle::new(NodeHandle::root(node), input_name))
    }

    /// Outputs of `node` mapped to the inputs that consume them
    pub fn dependents_of(&self, node: &str) -> BTreeMap<OutputHandle, Vec<InputHandle>> {
        self.reverse
            .iter()
            .filter(|(output, _)| output.node.name() == node)
            .map(|(output, inputs)| (output.clone(), inputs.clone()))
            .collect()
    }

    /// Names of nodes `node` reads from, deduplicated
    pub fn upstream_nodes(&self, node: &str) -> BTreeSet<String> {
        self.forward
            .iter()
            .filter(|(input, _)| input.node.name() == node)
            .flat_map(|(_, outputs)| outputs.iter().map(|o| o.node.name().to_string()))
            .collect()
    }

    /// Every bound input with its upstream outputs
    pub fn iter(&self) -> impl Iterator<Item = (&InputHandle, &[OutputHandle])> {
        self.forward.iter().map(|(k, v)| (k, v.as_slice()))
    }

    pub fn len(&self) -> usize {
        self.forward.len()
    }

    pub fn is_empty(&self) -> bool {
        self.forward.is_empty()
    }
}
