// Resolved Configuration
// Validated run configuration: per-node payloads, resources, storage and execution settings

use crate::error::{EngineError, EngineResult};
use crate::graph::NodeHandle;
use crate::types::Value;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Fully resolved configuration for building and executing a plan
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ResolvedConfig {
    /// Per-node configuration keyed by node name; composites nest their children
    pub nodes: BTreeMap<String, NodeConfig>,
    pub resources: BTreeMap<String, ResourceConfig>,
    pub expectations: ExpectationsConfig,
    pub storage: StorageConfig,
    pub execution: ExecutionConfig,
    pub run: RunConfig,
}

impl ResolvedConfig {
    pub fn from_yaml_str(content: &str) -> EngineResult<Self> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(content).map_err(|e| EngineError::config(e.to_string()))
    }

    pub fn from_json_str(content: &str) -> EngineResult<Self> {
        serde_json::from_str(content).map_err(|e| EngineError::config(e.to_string()))
    }

    /// Load from a YAML (or JSON, by extension) file
    pub fn from_file(path: impl AsRef<Path>) -> EngineResult<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::from_json_str(&content),
            _ => Self::from_yaml_str(&content),
        }
    }

    /// Configuration of the node at `handle`, following composite nesting
    pub fn node_config(&self, handle: &NodeHandle) -> Option<&NodeConfig> {
        let mut segments = handle.path().into_iter();
        let mut current = self.nodes.get(segments.next()?)?;
        for segment in segments {
            current = current.nodes.get(segment)?;
        }
        Some(current)
    }

    /// Config payload handed to the node's compute body (Null when absent)
    pub fn node_payload(&self, handle: &NodeHandle) -> Value {
        self.node_config(handle)
            .map(|c| c.config.clone())
            .unwrap_or_default()
    }

    pub fn resource_payload(&self, name: &str) -> Value {
        self.resources
            .get(name)
            .map(|r| r.config.clone())
            .unwrap_or_default()
    }

    pub fn with_node(mut self, name: impl Into<String>, node: NodeConfig) -> Self {
        self.nodes.insert(name.into(), node);
        self
    }

    pub fn with_storage(mut self, storage: StorageConfig) -> Self {
        self.storage = storage;
        self
    }

    pub fn with_expectations(mut self, evaluate: bool) -> Self {
        self.expectations.evaluate = evaluate;
        self
    }
}

/// Configuration for one node
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NodeConfig {
    /// Payload made available to the compute body
    pub config: Value,
    /// Values for inputs that have no upstream dependency
    pub inputs: BTreeMap<String, InputSource>,
    /// Materialization targets for outputs
    pub outputs: Vec<OutputTarget>,
    /// Children of a composite node
    pub nodes: BTreeMap<String, NodeConfig>,
}

impl NodeConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(mut self, config: impl Into<Value>) -> Self {
        self.config = config.into();
        self
    }

    pub fn with_input(mut self, name: impl Into<String>, source: InputSource) -> Self {
        self.inputs.insert(name.into(), source);
        self
    }

    pub fn with_output(mut self, target: OutputTarget) -> Self {
        self.outputs.push(target);
        self
    }

    pub fn with_child(mut self, name: impl Into<String>, child: NodeConfig) -> Self {
        self.nodes.insert(name.into(), child);
        self
    }
}

/// Where an unbound input gets its value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum InputSource {
    /// Read from an external file
    File(FileInput),
    /// Literal value
    Value(Value),
}

impl InputSource {
    pub fn value(value: impl Into<Value>) -> Self {
        InputSource::Value(value.into())
    }

    pub fn file(path: impl Into<PathBuf>, format: FileFormat) -> Self {
        InputSource::File(FileInput {
            path: path.into(),
            format,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileInput {
    pub path: PathBuf,
    #[serde(default)]
    pub format: FileFormat,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileFormat {
    #[default]
    Json,
    Yaml,
    Text,
}

/// Materialization target for one output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OutputTarget {
    #[serde(default = "default_output_name")]
    pub output: String,
    pub path: PathBuf,
    #[serde(default)]
    pub format: MaterializationFormat,
}

impl OutputTarget {
    pub fn new(
        output: impl Into<String>,
        path: impl Into<PathBuf>,
        format: MaterializationFormat,
    ) -> Self {
        Self {
            output: output.into(),
            path: path.into(),
            format,
        }
    }
}

fn default_output_name() -> String {
    crate::graph::DEFAULT_OUTPUT.to_string()
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MaterializationFormat {
    /// Human-readable JSON document
    #[default]
    Json,
    /// Human-readable YAML document
    Yaml,
    /// Bytes of the type's storage codec
    Serialized,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ResourceConfig {
    pub config: Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ExpectationsConfig {
    /// When false, no expectation steps are synthesized
    pub evaluate: bool,
}

impl Default for ExpectationsConfig {
    fn default() -> Self {
        Self { evaluate: true }
    }
}

/// Intermediates backend selector
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum StorageConfig {
    #[default]
    InMemory,
    Filesystem {
        /// Root directory (default: ~/.planrun/storage/)
        #[serde(default)]
        base_dir: Option<PathBuf>,
    },
    /// Object store registered under `name`
    ObjectStore { name: String },
}

impl StorageConfig {
    pub fn filesystem(base_dir: impl Into<PathBuf>) -> Self {
        StorageConfig::Filesystem {
            base_dir: Some(base_dir.into()),
        }
    }

    pub fn is_durable(&self) -> bool {
        !matches!(self, StorageConfig::InMemory)
    }

    pub fn label(&self) -> &str {
        match self {
            StorageConfig::InMemory => "in_memory",
            StorageConfig::Filesystem { .. } => "filesystem",
            StorageConfig::ObjectStore { name } => name,
        }
    }
}

/// Default root for filesystem intermediates
pub fn default_storage_root() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".planrun")
        .join("storage")
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    #[default]
    Sequential,
    MultiWorker,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ExecutionConfig {
    pub mode: ExecutionMode,
    /// Worker pool size in multi-worker mode (default: available parallelism)
    pub max_concurrent: Option<usize>,
    /// Keep running independent branches after a step fails
    pub continue_on_error: bool,
    pub step_timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RunConfig {
    /// Run id to use; generated when absent
    pub run_id: Option<String>,
    pub tags: BTreeMap<String, String>,
}
