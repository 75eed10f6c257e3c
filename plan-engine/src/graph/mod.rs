// Graph Model
// Nodes, dependencies, modes and the validated graph definition

pub mod builder;
pub mod definition;
pub mod dependency;
pub mod handle;
pub mod mode;

pub use builder::{Binder, GraphBuilder, NodeRef, OutputRef};
pub use definition::{
    CompositeBuilder, ComputeFn, ExpectationDefinition, ExpectationResult, InputDefinition,
    NodeBody, NodeDefinition, OutputDefinition, DEFAULT_OUTPUT,
};
pub use dependency::{DependencyDefinition, DependencyStructure};
pub use handle::{InputHandle, NodeHandle, OutputHandle};
pub use mode::{ModeDefinition, PresetDefinition, DEFAULT_MODE};

use crate::storage::plugins::TypeStoragePluginRegistry;

use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

/// Error type for graph operations
#[derive(Debug, Clone)]
pub struct GraphError {
    pub message: String,
    pub kind: GraphErrorKind,
    /// Offending node path for cyclic graphs
    pub path: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GraphErrorKind {
    /// Circular dependency detected
    CyclicDependency,
    /// Reference to an unknown node, input or output
    UnknownDependency,
    /// Query for an input a node does not declare
    UnknownInput,
    /// Invalid graph structure
    InvalidStructure,
}

impl fmt::Display for GraphError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "graph error: {}", self.message)
    }
}

impl std::error::Error for GraphError {}

impl GraphError {
    pub fn cyclic(path: Vec<String>) -> Self {
        Self {
            message: format!("circular dependency detected: {}", path.join(" -> ")),
            kind: GraphErrorKind::CyclicDependency,
            path,
        }
    }

    pub fn unknown_dependency(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind: GraphErrorKind::UnknownDependency,
            path: Vec::new(),
        }
    }

    pub fn unknown_input(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind: GraphErrorKind::UnknownInput,
            path: Vec::new(),
        }
    }

    pub fn invalid_structure(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind: GraphErrorKind::InvalidStructure,
            path: Vec::new(),
        }
    }
}

/// A named instance of a definition inside a graph
#[derive(Debug, Clone)]
pub struct Node {
    pub name: String,
    pub definition: Arc<NodeDefinition>,
}

/// Validated, immutable computation graph
#[derive(Clone)]
pub struct GraphDefinition {
    pub name: String,
    pub description: Option<String>,
    nodes: Vec<Node>,
    node_indices: HashMap<String, usize>,
    dependencies: Vec<DependencyDefinition>,
    dependency_structure: DependencyStructure,
    modes: Vec<ModeDefinition>,
    presets: Vec<PresetDefinition>,
    storage_plugins: TypeStoragePluginRegistry,
}

/// Pieces assembled by the builder before validation
pub(crate) struct GraphParts {
    pub name: String,
    pub description: Option<String>,
    pub nodes: Vec<Node>,
    pub dependencies: Vec<DependencyDefinition>,
    pub modes: Vec<ModeDefinition>,
    pub presets: Vec<PresetDefinition>,
    pub storage_plugins: TypeStoragePluginRegistry,
}

impl GraphDefinition {
    pub(crate) fn from_parts(parts: GraphParts) -> Result<Self, GraphError> {
        let mut node_indices = HashMap::new();
        for (i, node) in parts.nodes.iter().enumerate() {
            if node.name.is_empty() || node.name.contains(|c: char| c == '.' || c == '/') {
                return Err(GraphError::invalid_structure(format!(
                    "graph '{}' has invalid node name '{}': names must be non-empty \
                     and contain neither '.' nor '/'",
                    parts.name, node.name
                )));
            }
            node.definition.validate()?;
            if node_indices.insert(node.name.clone(), i).is_some() {
                return Err(GraphError::invalid_structure(format!(
                    "graph '{}' contains more than one node named '{}'",
                    parts.name, node.name
                )));
            }
        }

        let dependency_structure = DependencyStructure::build(&parts.nodes, &parts.dependencies)?;

        let modes = if parts.modes.is_empty() {
            vec![ModeDefinition::default()]
        } else {
            parts.modes
        };
        let mut mode_names = HashSet::new();
        for mode in &modes {
            if !mode_names.insert(mode.name.as_str()) {
                return Err(GraphError::invalid_structure(format!(
                    "graph '{}' declares mode '{}' more than once",
                    parts.name, mode.name
                )));
            }
        }

        let mut preset_names = HashSet::new();
        for preset in &parts.presets {
            if !preset_names.insert(preset.name.as_str()) {
                return Err(GraphError::invalid_structure(format!(
                    "graph '{}' declares preset '{}' more than once",
                    parts.name, preset.name
                )));
            }
            if !mode_names.contains(preset.mode.as_str()) {
                return Err(GraphError::invalid_structure(format!(
                    "preset '{}' references unknown mode '{}'",
                    preset.name, preset.mode
                )));
            }
        }

        let graph = Self {
            name: parts.name,
            description: parts.description,
            nodes: parts.nodes,
            node_indices,
            dependencies: parts.dependencies,
            dependency_structure,
            modes,
            presets: parts.presets,
            storage_plugins: parts.storage_plugins,
        };

        graph.detect_cycles()?;
        Ok(graph)
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn node(&self, name: &str) -> Option<&Node> {
        self.node_indices.get(name).map(|&i| &self.nodes[i])
    }

    pub fn dependency_structure(&self) -> &DependencyStructure {
        &self.dependency_structure
    }

    pub fn modes(&self) -> &[ModeDefinition] {
        &self.modes
    }

    /// Mode by name; the first declared mode when `name` is None
    pub fn mode(&self, name: Option<&str>) -> Option<&ModeDefinition> {
        match name {
            Some(name) => self.modes.iter().find(|m| m.name == name),
            None => self.modes.first(),
        }
    }

    pub fn presets(&self) -> &[PresetDefinition] {
        &self.presets
    }

    pub fn preset(&self, name: &str) -> Option<&PresetDefinition> {
        self.presets.iter().find(|p| p.name == name)
    }

    pub fn storage_plugins(&self) -> &TypeStoragePluginRegistry {
        &self.storage_plugins
    }

    /// Union of resources required by every node, including nested composites
    pub fn required_resources(&self) -> BTreeSet<String> {
        self.nodes
            .iter()
            .flat_map(|n| n.definition.required_resources.iter().cloned())
            .collect()
    }

    /// Detect cycles in node dependencies using DFS
    fn detect_cycles(&self) -> Result<(), GraphError> {
        let mut visited = HashSet::new();
        let mut rec_stack = HashSet::new();

        for node in &self.nodes {
            if !visited.contains(&node.name) {
                if let Some(cycle) = self.dfs_cycle(&node.name, &mut visited, &mut rec_stack) {
                    return Err(GraphError::cyclic(cycle));
                }
            }
        }

        Ok(())
    }

    fn dfs_cycle(
        &self,
        name: &str,
        visited: &mut HashSet<String>,
        rec_stack: &mut HashSet<String>,
    ) -> Option<Vec<String>> {
        visited.insert(name.to_string());
        rec_stack.insert(name.to_string());

        for dep in self.dependency_structure.upstream_nodes(name) {
            if !visited.contains(&dep) {
                if let Some(mut cycle) = self.dfs_cycle(&dep, visited, rec_stack) {
                    if cycle.first() != cycle.last() {
                        cycle.insert(0, name.to_string());
                    }
                    return Some(cycle);
                }
            } else if rec_stack.contains(&dep) {
                return Some(vec![name.to_string(), dep]);
            }
        }

        rec_stack.remove(name);
        None
    }

    /// Nodes in topological order; ties break by declaration order
    pub fn topological_order(&self) -> Vec<&Node> {
        // Kahn's algorithm over upstream edges
        let mut in_degree: Vec<usize> = vec![0; self.nodes.len()];
        let mut downstream: Vec<Vec<usize>> = vec![Vec::new(); self.nodes.len()];

        for (i, node) in self.nodes.iter().enumerate() {
            for dep in self.dependency_structure.upstream_nodes(&node.name) {
                if let Some(&j) = self.node_indices.get(&dep) {
                    downstream[j].push(i);
                    in_degree[i] += 1;
                }
            }
        }

        let mut ready: BTreeSet<usize> = in_degree
            .iter()
            .enumerate()
            .filter(|(_, &deg)| deg == 0)
            .map(|(i, _)| i)
            .collect();

        let mut result = Vec::with_capacity(self.nodes.len());
        while let Some(i) = ready.pop_first() {
            result.push(&self.nodes[i]);
            for &next in &downstream[i] {
                in_degree[next] -= 1;
                if in_degree[next] == 0 {
                    ready.insert(next);
                }
            }
        }

        result
    }

    /// Group nodes into levels that could run side by side
    pub fn parallel_levels(&self) -> Vec<Vec<&Node>> {
        let mut level_of: HashMap<&str, usize> = HashMap::new();
        let mut levels: Vec<Vec<&Node>> = Vec::new();

        for node in self.topological_order() {
            let level = self
                .dependency_structure
                .upstream_nodes(&node.name)
                .iter()
                .filter_map(|dep| level_of.get(dep.as_str()))
                .map(|l| l + 1)
                .max()
                .unwrap_or(0);
            level_of.insert(&node.name, level);
            if levels.len() <= level {
                levels.resize_with(level + 1, Vec::new);
            }
            levels[level].push(node);
        }

        levels
    }

    /// Restrict the graph to the named nodes and the dependencies among them
    pub fn subgraph(&self, node_names: &[&str]) -> Result<GraphDefinition, GraphError> {
        let selected: HashSet<&str> = node_names.iter().copied().collect();
        for name in &selected {
            if !self.node_indices.contains_key(*name) {
                return Err(GraphError::unknown_dependency(format!(
                    "graph '{}' has no node named '{}'",
                    self.name, name
                )));
            }
        }

        let nodes: Vec<Node> = self
            .nodes
            .iter()
            .filter(|n| selected.contains(n.name.as_str()))
            .cloned()
            .collect();

        let dependencies = self
            .dependencies
            .iter()
            .filter(|d| selected.contains(d.node.as_str()))
            .filter_map(|d| {
                let upstream: Vec<(String, String)> = d
                    .upstream
                    .iter()
                    .filter(|(node, _)| selected.contains(node.as_str()))
                    .cloned()
                    .collect();
                if upstream.is_empty() {
                    None
                } else {
                    Some(DependencyDefinition {
                        upstream,
                        ..d.clone()
                    })
                }
            })
            .collect();

        GraphDefinition::from_parts(GraphParts {
            name: self.name.clone(),
            description: self.description.clone(),
            nodes,
            dependencies,
            modes: self.modes.clone(),
            presets: self.presets.clone(),
            storage_plugins: self.storage_plugins.clone(),
        })
    }
}

impl fmt::Debug for GraphDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GraphDefinition")
            .field("name", &self.name)
            .field("nodes", &self.nodes.iter().map(|n| &n.name).collect::<Vec<_>>())
            .field("dependencies", &self.dependency_structure.len())
            .field("modes", &self.modes)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures;
    use crate::types::RuntimeType;

    fn make_def(name: &str, inputs: &[&str]) -> NodeDefinition {
        let mut def = NodeDefinition::new(name).output(OutputDefinition::result(RuntimeType::Int));
        for input in inputs {
            def = def.input(InputDefinition::new(*input, RuntimeType::Int));
        }
        def
    }

    #[test]
    fn test_linear_topological_order() {
        let graph = fixtures::math_graph();
        let order: Vec<&str> = graph
            .topological_order()
            .iter()
            .map(|n| n.name.as_str())
            .collect();
        assert_eq!(order, vec!["return_one", "add_one"]);
    }

    #[test]
    fn test_order_ignores_declaration_when_dependencies_disagree() {
        let mut builder = GraphBuilder::new("reversed");
        let sink = builder.add_node(make_def("sink", &["x"]));
        let source = builder.add_node(make_def("source", &[]));
        builder.bind(&sink).input("x", source.output("result"));
        let graph = builder.build().unwrap();

        let order: Vec<&str> = graph
            .topological_order()
            .iter()
            .map(|n| n.name.as_str())
            .collect();
        assert_eq!(order, vec!["source", "sink"]);
    }

    #[test]
    fn test_cycle_detection_reports_path() {
        let mut builder = GraphBuilder::new("cyclic");
        let a = builder.add_node(make_def("a", &["x"]));
        let b = builder.add_node(make_def("b", &["x"]));
        let c = builder.add_node(make_def("c", &["x"]));
        builder.bind(&a).input("x", c.output("result"));
        builder.bind(&b).input("x", a.output("result"));
        builder.bind(&c).input("x", b.output("result"));

        let err = builder.build().unwrap_err();
        assert_eq!(err.kind, GraphErrorKind::CyclicDependency);
        assert!(err.path.len() >= 2);
        assert!(err.message.contains(" -> "));
    }

    #[test]
    fn test_self_loop_is_cycle() {
        let mut builder = GraphBuilder::new("loop");
        let a = builder.add_node(make_def("a", &["x"]));
        builder.bind(&a).input("x", a.output("result"));

        let err = builder.build().unwrap_err();
        assert_eq!(err.kind, GraphErrorKind::CyclicDependency);
        assert_eq!(err.path, vec!["a", "a"]);
    }

    #[test]
    fn test_parallel_levels() {
        let graph = fixtures::fan_in_graph();
        let levels = graph.parallel_levels();
        assert_eq!(levels.len(), 2);
        assert_eq!(levels[0].len(), 2);
        assert_eq!(levels[1][0].name, "add");
    }

    #[test]
    fn test_duplicate_node_names() {
        let mut builder = GraphBuilder::new("dupes");
        builder.add_node(make_def("a", &[]));
        builder.add_node(make_def("a", &[]));
        let err = builder.build().unwrap_err();
        assert_eq!(err.kind, GraphErrorKind::InvalidStructure);
    }

    #[test]
    fn test_node_names_with_separators_rejected() {
        for name in ["a.b", "a/b", ""] {
            let mut builder = GraphBuilder::new("bad_names");
            builder.add_node(make_def(name, &[]));
            let err = builder.build().unwrap_err();
            assert_eq!(err.kind, GraphErrorKind::InvalidStructure, "name {:?}", name);
        }
    }

    #[test]
    fn test_root_name_cannot_shadow_composite_step_key() {
        let mut inner = GraphBuilder::new("inner");
        inner.add_node(make_def("b", &[]));
        let composite = CompositeBuilder::new("a", inner.build().unwrap())
            .map_output("result", "b", "result")
            .build()
            .unwrap();

        let mut builder = GraphBuilder::new("shadow");
        builder.add_node(composite);
        builder.add_node(make_def("a.b", &[]));
        let err = builder.build().unwrap_err();
        assert_eq!(err.kind, GraphErrorKind::InvalidStructure);
        assert!(err.message.contains("'a.b'"));
    }

    #[test]
    fn test_default_mode_is_first() {
        let graph = fixtures::math_graph();
        assert_eq!(graph.mode(None).map(|m| m.name.as_str()), Some(DEFAULT_MODE));
        assert!(graph.mode(Some("missing")).is_none());
    }

    #[test]
    fn test_subgraph_keeps_internal_dependencies() {
        let graph = fixtures::chain_graph();
        let sub = graph.subgraph(&["add_one", "add_two"]).unwrap();

        assert_eq!(sub.nodes().len(), 2);
        assert!(sub.dependency_structure().has_deps("add_two", "num"));
        assert!(!sub.dependency_structure().has_deps("add_one", "num"));

        let err = graph.subgraph(&["ghost"]).unwrap_err();
        assert_eq!(err.kind, GraphErrorKind::UnknownDependency);
    }
}
