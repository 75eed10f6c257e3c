// Plan Objects
// Execution steps, their inputs/outputs and run-scoped output handles

use crate::config::{FileInput, MaterializationFormat};
use crate::graph::{ComputeFn, ExpectationDefinition, NodeHandle};
use crate::storage::codec::Codec;
use crate::types::{RuntimeType, Value};

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// Output name of thunk steps
pub const THUNK_OUTPUT: &str = "value";
/// Input name of expectation steps
pub const EXPECTATION_INPUT: &str = "expectation_input";
/// Output name of expectation and expectation-join steps
pub const EXPECTATION_OUTPUT: &str = "expectation_value";
/// Output name of fan-in join steps
pub const FAN_IN_OUTPUT: &str = "fan_in";
/// Input name of materialization and serialization steps
pub const MATERIALIZE_INPUT: &str = "value";

/// What a step is for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum StepKind {
    Compute,
    /// Reads an input value from an external file
    InputThunk,
    /// Publishes a literal input value
    ValueThunk,
    InputExpectation,
    OutputExpectation,
    Join,
    /// Writes an output with its storage codec
    Serialize,
    /// Writes an output as a readable document
    MaterializationThunk,
}

impl fmt::Display for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            StepKind::Compute => "COMPUTE",
            StepKind::InputThunk => "INPUT_THUNK",
            StepKind::ValueThunk => "VALUE_THUNK",
            StepKind::InputExpectation => "INPUT_EXPECTATION",
            StepKind::OutputExpectation => "OUTPUT_EXPECTATION",
            StepKind::Join => "JOIN",
            StepKind::Serialize => "SERIALIZE",
            StepKind::MaterializationThunk => "MATERIALIZATION_THUNK",
        };
        write!(f, "{}", label)
    }
}

impl StepKind {
    pub fn is_expectation(&self) -> bool {
        matches!(self, StepKind::InputExpectation | StepKind::OutputExpectation)
    }
}

/// Run-scoped address of one produced value: (step key, output name)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StepOutputHandle {
    pub step_key: String,
    pub output_name: String,
}

impl StepOutputHandle {
    pub fn new(step_key: impl Into<String>, output_name: impl Into<String>) -> Self {
        Self {
            step_key: step_key.into(),
            output_name: output_name.into(),
        }
    }

    pub fn from_step(step: &ExecutionStep, output_name: &str) -> Self {
        Self::new(&step.key, output_name)
    }
}

impl fmt::Display for StepOutputHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.step_key, self.output_name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepInput {
    pub name: String,
    pub runtime_type: RuntimeType,
    pub upstream: StepOutputHandle,
}

impl StepInput {
    pub fn new(
        name: impl Into<String>,
        runtime_type: RuntimeType,
        upstream: StepOutputHandle,
    ) -> Self {
        Self {
            name: name.into(),
            runtime_type,
            upstream,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepOutput {
    pub name: String,
    pub runtime_type: RuntimeType,
    pub optional: bool,
}

impl StepOutput {
    pub fn new(name: impl Into<String>, runtime_type: RuntimeType, optional: bool) -> Self {
        Self {
            name: name.into(),
            runtime_type,
            optional,
        }
    }
}

/// How a join step combines its inputs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinMode {
    /// Republish the first input once every input is present
    Passthrough,
    /// Publish all inputs as a list, in input order
    Concat,
}

/// The work a step performs
#[derive(Clone)]
pub enum StepCompute {
    /// User compute body with the node's config payload
    Node { compute: ComputeFn, config: Value },
    Value(Value),
    ReadInput(FileInput),
    Expectation(ExpectationDefinition),
    Join(JoinMode),
    Materialize {
        path: PathBuf,
        format: MaterializationFormat,
    },
    Serialize {
        path: PathBuf,
        codec: Arc<dyn Codec>,
    },
}

impl fmt::Debug for StepCompute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepCompute::Node { config, .. } => {
                f.debug_struct("Node").field("config", config).finish_non_exhaustive()
            }
            StepCompute::Value(value) => f.debug_tuple("Value").field(value).finish(),
            StepCompute::ReadInput(input) => f.debug_tuple("ReadInput").field(input).finish(),
            StepCompute::Expectation(def) => f.debug_tuple("Expectation").field(&def.name).finish(),
            StepCompute::Join(mode) => f.debug_tuple("Join").field(mode).finish(),
            StepCompute::Materialize { path, format } => f
                .debug_struct("Materialize")
                .field("path", path)
                .field("format", format)
                .finish(),
            StepCompute::Serialize { path, codec } => f
                .debug_struct("Serialize")
                .field("path", path)
                .field("codec", &codec.name())
                .finish(),
        }
    }
}

/// Atomic unit of a plan
#[derive(Debug, Clone)]
pub struct ExecutionStep {
    /// Globally unique key: node handle plus purpose suffix
    pub key: String,
    pub kind: StepKind,
    pub node_handle: NodeHandle,
    pub inputs: Vec<StepInput>,
    pub outputs: Vec<StepOutput>,
    pub compute: StepCompute,
    /// Resources the step may look up
    pub required_resources: BTreeSet<String>,
    pub metadata: BTreeMap<String, String>,
    pub logging_tags: BTreeMap<String, String>,
}

impl ExecutionStep {
    pub fn new(
        key: impl Into<String>,
        kind: StepKind,
        node_handle: NodeHandle,
        compute: StepCompute,
    ) -> Self {
        let key = key.into();
        let mut logging_tags = BTreeMap::new();
        logging_tags.insert("step_key".to_string(), key.clone());
        logging_tags.insert("node".to_string(), node_handle.to_string());
        logging_tags.insert("step_kind".to_string(), kind.to_string());

        Self {
            key,
            kind,
            node_handle,
            inputs: Vec::new(),
            outputs: Vec::new(),
            compute,
            required_resources: BTreeSet::new(),
            metadata: BTreeMap::new(),
            logging_tags,
        }
    }

    pub fn with_input(mut self, input: StepInput) -> Self {
        self.inputs.push(input);
        self
    }

    pub fn with_output(mut self, output: StepOutput) -> Self {
        self.outputs.push(output);
        self
    }

    pub fn input(&self, name: &str) -> Option<&StepInput> {
        self.inputs.iter().find(|i| i.name == name)
    }

    pub fn output(&self, name: &str) -> Option<&StepOutput> {
        self.outputs.iter().find(|o| o.name == name)
    }

    pub fn output_handle(&self, name: &str) -> StepOutputHandle {
        StepOutputHandle::from_step(self, name)
    }

    /// Upstream step keys, deduplicated in input order
    pub fn upstream_keys(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = Vec::new();
        for input in &self.inputs {
            if !keys.contains(&input.upstream.step_key.as_str()) {
                keys.push(&input.upstream.step_key);
            }
        }
        keys
    }
}

/// Steps synthesized for one value, with the handle downstream consumers should read
#[derive(Debug, Clone)]
pub struct ExecutionValueSubplan {
    pub steps: Vec<ExecutionStep>,
    pub terminal: StepOutputHandle,
}

impl ExecutionValueSubplan {
    /// No extra steps; consumers read `terminal` directly
    pub fn empty(terminal: StepOutputHandle) -> Self {
        Self {
            steps: Vec::new(),
            terminal,
        }
    }

    pub fn single(step: ExecutionStep, output_name: &str) -> Self {
        let terminal = step.output_handle(output_name);
        Self {
            steps: vec![step],
            terminal,
        }
    }
}
