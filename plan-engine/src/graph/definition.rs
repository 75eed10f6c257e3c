// Node Definitions
// Processing-unit definitions: ports, expectations, compute bodies and composites

use crate::config::ResolvedConfig;
use crate::error::BoxError;
use crate::execution::context::ComputeContext;
use crate::graph::{GraphDefinition, GraphError};
use crate::types::{RuntimeType, Value};

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

/// User compute body; emits events through the context
pub type ComputeFn = Arc<dyn Fn(&mut ComputeContext) -> Result<(), BoxError> + Send + Sync>;

/// Data-quality check run against a single value
pub type ExpectationFn = Arc<dyn Fn(&Value) -> ExpectationResult + Send + Sync>;

/// Produces free-form step metadata from the resolved configuration
pub type StepMetadataFn = Arc<dyn Fn(&ResolvedConfig) -> BTreeMap<String, String> + Send + Sync>;

/// Outcome of an expectation check
#[derive(Debug, Clone, PartialEq)]
pub struct ExpectationResult {
    pub success: bool,
    pub message: Option<String>,
    pub metadata: BTreeMap<String, Value>,
}

impl ExpectationResult {
    pub fn passed() -> Self {
        Self {
            success: true,
            message: None,
            metadata: BTreeMap::new(),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: Some(message.into()),
            metadata: BTreeMap::new(),
        }
    }

    pub fn from_bool(success: bool) -> Self {
        if success {
            Self::passed()
        } else {
            Self {
                success: false,
                message: None,
                metadata: BTreeMap::new(),
            }
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// Named check attached to an input or output
#[derive(Clone)]
pub struct ExpectationDefinition {
    pub name: String,
    pub description: Option<String>,
    pub check: ExpectationFn,
}

impl ExpectationDefinition {
    pub fn new(
        name: impl Into<String>,
        check: impl Fn(&Value) -> ExpectationResult + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            description: None,
            check: Arc::new(check),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

impl fmt::Debug for ExpectationDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExpectationDefinition")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// Declared input port
#[derive(Debug, Clone)]
pub struct InputDefinition {
    pub name: String,
    pub runtime_type: RuntimeType,
    /// Optional inputs may be left unbound
    pub optional: bool,
    pub expectations: Vec<ExpectationDefinition>,
}

impl InputDefinition {
    pub fn new(name: impl Into<String>, runtime_type: RuntimeType) -> Self {
        Self {
            name: name.into(),
            runtime_type,
            optional: false,
            expectations: Vec::new(),
        }
    }

    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    pub fn with_expectation(mut self, expectation: ExpectationDefinition) -> Self {
        self.expectations.push(expectation);
        self
    }
}

/// Declared output port
#[derive(Debug, Clone)]
pub struct OutputDefinition {
    pub name: String,
    pub runtime_type: RuntimeType,
    /// Optional outputs may legitimately never be produced
    pub optional: bool,
    pub expectations: Vec<ExpectationDefinition>,
}

impl OutputDefinition {
    pub fn new(name: impl Into<String>, runtime_type: RuntimeType) -> Self {
        Self {
            name: name.into(),
            runtime_type,
            optional: false,
            expectations: Vec::new(),
        }
    }

    /// Single output named "result"
    pub fn result(runtime_type: RuntimeType) -> Self {
        Self::new(DEFAULT_OUTPUT, runtime_type)
    }

    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    pub fn with_expectation(mut self, expectation: ExpectationDefinition) -> Self {
        self.expectations.push(expectation);
        self
    }
}

/// Name of the output most nodes produce
pub const DEFAULT_OUTPUT: &str = "result";

/// Maps a composite's external input onto an inner node input
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputMapping {
    pub external: String,
    pub node: String,
    pub input: String,
}

/// Exposes an inner node output as a composite output
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputMapping {
    pub external: String,
    pub node: String,
    pub output: String,
}

/// Body of a node: either a compute function or a nested graph
#[derive(Clone)]
pub enum NodeBody {
    Compute(Option<ComputeFn>),
    Composite(CompositeBody),
}

/// Nested graph with its resolved port mappings
#[derive(Debug, Clone)]
pub struct CompositeBody {
    pub graph: Arc<GraphDefinition>,
    pub input_mappings: Vec<InputMapping>,
    pub output_mappings: Vec<OutputMapping>,
}

impl CompositeBody {
    /// Inner (node, input) pairs fed by an external input
    pub fn mapped_inputs(&self, external: &str) -> impl Iterator<Item = &InputMapping> {
        let external = external.to_string();
        self.input_mappings
            .iter()
            .filter(move |m| m.external == external)
    }

    pub fn output_mapping(&self, external: &str) -> Option<&OutputMapping> {
        self.output_mappings.iter().find(|m| m.external == external)
    }
}

/// Definition of a processing unit
#[derive(Clone)]
pub struct NodeDefinition {
    pub name: String,
    pub description: Option<String>,
    pub inputs: Vec<InputDefinition>,
    pub outputs: Vec<OutputDefinition>,
    pub required_resources: BTreeSet<String>,
    pub metadata_fn: Option<StepMetadataFn>,
    pub body: NodeBody,
}

impl NodeDefinition {
    /// Start a compute node definition; the compute body is attached with `compute`
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            inputs: Vec::new(),
            outputs: Vec::new(),
            required_resources: BTreeSet::new(),
            metadata_fn: None,
            body: NodeBody::Compute(None),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn input(mut self, input: InputDefinition) -> Self {
        self.inputs.push(input);
        self
    }

    pub fn output(mut self, output: OutputDefinition) -> Self {
        self.outputs.push(output);
        self
    }

    pub fn requires_resource(mut self, name: impl Into<String>) -> Self {
        self.required_resources.insert(name.into());
        self
    }

    pub fn with_metadata(
        mut self,
        metadata_fn: impl Fn(&ResolvedConfig) -> BTreeMap<String, String> + Send + Sync + 'static,
    ) -> Self {
        self.metadata_fn = Some(Arc::new(metadata_fn));
        self
    }

    pub fn compute(
        mut self,
        compute: impl Fn(&mut ComputeContext) -> Result<(), BoxError> + Send + Sync + 'static,
    ) -> Self {
        self.body = NodeBody::Compute(Some(Arc::new(compute)));
        self
    }

    pub fn input_def(&self, name: &str) -> Option<&InputDefinition> {
        self.inputs.iter().find(|i| i.name == name)
    }

    pub fn output_def(&self, name: &str) -> Option<&OutputDefinition> {
        self.outputs.iter().find(|o| o.name == name)
    }

    pub fn is_composite(&self) -> bool {
        matches!(self.body, NodeBody::Composite(_))
    }

    pub fn composite(&self) -> Option<&CompositeBody> {
        match &self.body {
            NodeBody::Composite(body) => Some(body),
            NodeBody::Compute(_) => None,
        }
    }

    /// Check port names are unique, and expectation names unique per port
    pub fn validate(&self) -> Result<(), GraphError> {
        let mut seen = BTreeSet::new();
        for input in &self.inputs {
            if !seen.insert(input.name.as_str()) {
                return Err(GraphError::invalid_structure(format!(
                    "definition '{}' declares input '{}' more than once",
                    self.name, input.name
                )));
            }
            self.check_expectation_names("input", &input.name, &input.expectations)?;
        }

        let mut seen = BTreeSet::new();
        for output in &self.outputs {
            if !seen.insert(output.name.as_str()) {
                return Err(GraphError::invalid_structure(format!(
                    "definition '{}' declares output '{}' more than once",
                    self.name, output.name
                )));
            }
            self.check_expectation_names("output", &output.name, &output.expectations)?;
        }

        Ok(())
    }

    fn check_expectation_names(
        &self,
        direction: &str,
        port: &str,
        expectations: &[ExpectationDefinition],
    ) -> Result<(), GraphError> {
        let mut seen = BTreeSet::new();
        for expectation in expectations {
            if !seen.insert(expectation.name.as_str()) {
                return Err(GraphError::invalid_structure(format!(
                    "definition '{}' declares expectation '{}' on {} '{}' more than once",
                    self.name, expectation.name, direction, port
                )));
            }
        }
        Ok(())
    }
}

impl fmt::Debug for NodeDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeDefinition")
            .field("name", &self.name)
            .field("inputs", &self.inputs)
            .field("outputs", &self.outputs)
            .field("required_resources", &self.required_resources)
            .field("composite", &self.is_composite())
            .finish_non_exhaustive()
    }
}

/// Builds a composite node definition from an inner graph and its port mappings
pub struct CompositeBuilder {
    name: String,
    description: Option<String>,
    graph: Arc<GraphDefinition>,
    input_mappings: Vec<InputMapping>,
    output_mappings: Vec<OutputMapping>,
}

impl CompositeBuilder {
    pub fn new(name: impl Into<String>, graph: GraphDefinition) -> Self {
        Self {
            name: name.into(),
            description: None,
            graph: Arc::new(graph),
            input_mappings: Vec::new(),
            output_mappings: Vec::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn map_input(
        mut self,
        external: impl Into<String>,
        node: impl Into<String>,
        input: impl Into<String>,
    ) -> Self {
        self.input_mappings.push(InputMapping {
            external: external.into(),
            node: node.into(),
            input: input.into(),
        });
        self
    }

    pub fn map_output(
        mut self,
        external: impl Into<String>,
        node: impl Into<String>,
        output: impl Into<String>,
    ) -> Self {
        self.output_mappings.push(OutputMapping {
            external: external.into(),
            node: node.into(),
            output: output.into(),
        });
        self
    }

    /// Resolve every mapping against the inner graph and derive the external ports
    pub fn build(self) -> Result<NodeDefinition, GraphError> {
        let mut inputs: Vec<InputDefinition> = Vec::new();
        let mut mapped_targets = BTreeSet::new();

        for mapping in &self.input_mappings {
            let node = self.graph.node(&mapping.node).ok_or_else(|| {
                GraphError::unknown_dependency(format!(
                    "composite '{}' maps input '{}' to unknown node '{}'",
                    self.name, mapping.external, mapping.node
                ))
            })?;
            let inner = node.definition.input_def(&mapping.input).ok_or_else(|| {
                GraphError::unknown_dependency(format!(
                    "composite '{}' maps input '{}' to unknown input '{}.{}'",
                    self.name, mapping.external, mapping.node, mapping.input
                ))
            })?;

            if !mapped_targets.insert((mapping.node.clone(), mapping.input.clone())) {
                return Err(GraphError::invalid_structure(format!(
                    "composite '{}' maps '{}.{}' more than once",
                    self.name, mapping.node, mapping.input
                )));
            }

            if self
                .graph
                .dependency_structure()
                .has_deps(&mapping.node, &mapping.input)
            {
                return Err(GraphError::invalid_structure(format!(
                    "composite '{}' maps input '{}' onto '{}.{}', which already has a dependency",
                    self.name, mapping.external, mapping.node, mapping.input
                )));
            }

            match inputs.iter_mut().find(|i| i.name == mapping.external) {
                Some(existing) => {
                    if existing.runtime_type != inner.runtime_type {
                        return Err(GraphError::invalid_structure(format!(
                            "composite '{}' input '{}' maps onto inputs of different types \
                             ({} and {})",
                            self.name, mapping.external, existing.runtime_type, inner.runtime_type
                        )));
                    }
                    existing.optional = existing.optional && inner.optional;
                }
                None => inputs.push(InputDefinition {
                    name: mapping.external.clone(),
                    runtime_type: inner.runtime_type.clone(),
                    optional: inner.optional,
                    expectations: Vec::new(),
                }),
            }
        }

        let mut outputs: Vec<OutputDefinition> = Vec::new();
        for mapping in &self.output_mappings {
            if outputs.iter().any(|o| o.name == mapping.external) {
                return Err(GraphError::invalid_structure(format!(
                    "composite '{}' maps output '{}' more than once",
                    self.name, mapping.external
                )));
            }
            let node = self.graph.node(&mapping.node).ok_or_else(|| {
                GraphError::unknown_dependency(format!(
                    "composite '{}' maps output '{}' from unknown node '{}'",
                    self.name, mapping.external, mapping.node
                ))
            })?;
            let inner = node.definition.output_def(&mapping.output).ok_or_else(|| {
                GraphError::unknown_dependency(format!(
                    "composite '{}' maps output '{}' from unknown output '{}.{}'",
                    self.name, mapping.external, mapping.node, mapping.output
                ))
            })?;
            outputs.push(OutputDefinition {
                name: mapping.external.clone(),
                runtime_type: inner.runtime_type.clone(),
                optional: inner.optional,
                expectations: Vec::new(),
            });
        }

        Ok(NodeDefinition {
            name: self.name,
            description: self.description,
            inputs,
            outputs,
            required_resources: self.graph.required_resources(),
            metadata_fn: None,
            body: NodeBody::Composite(CompositeBody {
                graph: self.graph,
                input_mappings: self.input_mappings,
                output_mappings: self.output_mappings,
            }),
        })
    }
}
