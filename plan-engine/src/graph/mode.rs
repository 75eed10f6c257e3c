// Modes and Presets
// Named resource tables a graph can run under, plus named (mode, config) pairs

use crate::config::ResolvedConfig;
use crate::execution::resources::ResourceDefinition;

use std::fmt;

/// Name given to the implicit mode of graphs that declare none
pub const DEFAULT_MODE: &str = "default";

/// A named set of resource definitions
#[derive(Clone)]
pub struct ModeDefinition {
    pub name: String,
    pub description: Option<String>,
    /// Resources in acquisition order
    pub resources: Vec<(String, ResourceDefinition)>,
}

impl ModeDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            resources: Vec::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn resource(mut self, name: impl Into<String>, definition: ResourceDefinition) -> Self {
        let name = name.into();
        self.resources.retain(|(existing, _)| *existing != name);
        self.resources.push((name, definition));
        self
    }

    pub fn has_resource(&self, name: &str) -> bool {
        self.resources.iter().any(|(n, _)| n == name)
    }

    pub fn resource_names(&self) -> Vec<&str> {
        self.resources.iter().map(|(n, _)| n.as_str()).collect()
    }
}

impl Default for ModeDefinition {
    fn default() -> Self {
        Self::new(DEFAULT_MODE)
    }
}

impl fmt::Debug for ModeDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModeDefinition")
            .field("name", &self.name)
            .field("resources", &self.resource_names())
            .finish()
    }
}

/// A named, ready-to-run (mode, config) combination
#[derive(Debug, Clone)]
pub struct PresetDefinition {
    pub name: String,
    pub mode: String,
    pub config: ResolvedConfig,
}

impl PresetDefinition {
    pub fn new(name: impl Into<String>, mode: impl Into<String>, config: ResolvedConfig) -> Self {
        Self {
            name: name.into(),
            mode: mode.into(),
            config,
        }
    }
}
