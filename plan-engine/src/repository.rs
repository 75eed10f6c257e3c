// Graph Repository
// Named collection of graphs, looked up by name

use crate::graph::{GraphDefinition, GraphError};

use std::collections::BTreeMap;
use std::sync::Arc;

/// Repository of graphs
#[derive(Clone, Default)]
pub struct Repository {
    pub name: String,
    graphs: BTreeMap<String, Arc<GraphDefinition>>,
}

impl Repository {
    /// Create an empty repository
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            graphs: BTreeMap::new(),
        }
    }

    /// Add a graph; graph names are unique within a repository
    pub fn add_graph(&mut self, graph: GraphDefinition) -> Result<(), GraphError> {
        if self.graphs.contains_key(&graph.name) {
            return Err(GraphError::invalid_structure(format!(
                "repository '{}' already contains a graph named '{}'",
                self.name, graph.name
            )));
        }
        self.graphs.insert(graph.name.clone(), Arc::new(graph));
        Ok(())
    }

    pub fn with_graph(mut self, graph: GraphDefinition) -> Result<Self, GraphError> {
        self.add_graph(graph)?;
        Ok(self)
    }

    pub fn get(&self, name: &str) -> Option<&Arc<GraphDefinition>> {
        self.graphs.get(name)
    }

    /// Graph by name, or an error listing what exists
    pub fn graph(&self, name: &str) -> Result<&Arc<GraphDefinition>, GraphError> {
        self.graphs.get(name).ok_or_else(|| {
            GraphError::unknown_dependency(format!(
                "repository '{}' has no graph named '{}' (available: {})",
                self.name,
                name,
                self.names().join(", ")
            ))
        })
    }

    /// Graph names in sorted order
    pub fn names(&self) -> Vec<&str> {
        self.graphs.keys().map(String::as_str).collect()
    }

    pub fn graphs(&self) -> impl Iterator<Item = &Arc<GraphDefinition>> {
        self.graphs.values()
    }

    pub fn len(&self) -> usize {
        self.graphs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.graphs.is_empty()
    }
}
