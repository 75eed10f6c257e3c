// Graph Builder
// Explicit builder for graphs: typed node lookup and input binding calls

use crate::graph::definition::NodeDefinition;
use crate::graph::dependency::DependencyDefinition;
use crate::graph::mode::{ModeDefinition, PresetDefinition};
use crate::graph::{GraphDefinition, GraphError, GraphParts, Node};
use crate::storage::plugins::{TypeStoragePlugin, TypeStoragePluginRegistry};

use std::sync::Arc;

/// Reference to a node added to a builder
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeRef {
    name: String,
}

impl NodeRef {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Reference one of this node's outputs
    pub fn output(&self, name: impl Into<String>) -> OutputRef {
        OutputRef {
            node: self.name.clone(),
            output: name.into(),
        }
    }
}

/// Reference to a node output, used as the upstream side of a binding
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputRef {
    pub node: String,
    pub output: String,
}

/// Incrementally assembles a graph; validation happens in `build`
pub struct GraphBuilder {
    name: String,
    description: Option<String>,
    nodes: Vec<Node>,
    dependencies: Vec<DependencyDefinition>,
    modes: Vec<ModeDefinition>,
    presets: Vec<PresetDefinition>,
    storage_plugins: TypeStoragePluginRegistry,
    errors: Vec<GraphError>,
}

impl GraphBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            nodes: Vec::new(),
            dependencies: Vec::new(),
            modes: Vec::new(),
            presets: Vec::new(),
            storage_plugins: TypeStoragePluginRegistry::new(),
            errors: Vec::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Add a node named after its definition
    pub fn add_node(&mut self, definition: NodeDefinition) -> NodeRef {
        let name = definition.name.clone();
        self.add_node_as(name, definition)
    }

    /// Add a node under an alias, allowing one definition to appear several times
    pub fn add_node_as(&mut self, alias: impl Into<String>, definition: NodeDefinition) -> NodeRef {
        self.add_shared_node_as(alias, Arc::new(definition))
    }

    pub fn add_shared_node_as(
        &mut self,
        alias: impl Into<String>,
        definition: Arc<NodeDefinition>,
    ) -> NodeRef {
        let name = alias.into();
        self.nodes.push(Node {
            name: name.clone(),
            definition,
        });
        NodeRef { name }
    }

    /// Look up a previously added node by name
    pub fn node(&self, name: &str) -> Result<NodeRef, GraphError> {
        if self.nodes.iter().any(|n| n.name == name) {
            Ok(NodeRef {
                name: name.to_string(),
            })
        } else {
            Err(GraphError::unknown_dependency(format!(
                "graph '{}' has no node named '{}'",
                self.name, name
            )))
        }
    }

    /// Start binding inputs of `node`
    pub fn bind(&mut self, node: &NodeRef) -> Binder<'_> {
        Binder {
            builder: self,
            node: node.name.clone(),
        }
    }

    pub fn mode(&mut self, mode: ModeDefinition) -> &mut Self {
        self.modes.push(mode);
        self
    }

    pub fn preset(&mut self, preset: PresetDefinition) -> &mut Self {
        self.presets.push(preset);
        self
    }

    pub fn storage_plugin(&mut self, plugin: TypeStoragePlugin) -> &mut Self {
        if let Err(err) = self.storage_plugins.register(plugin) {
            self.errors.push(err);
        }
        self
    }

    /// Validate and freeze the graph
    pub fn build(self) -> Result<GraphDefinition, GraphError> {
        if let Some(err) = self.errors.into_iter().next() {
            return Err(err);
        }

        GraphDefinition::from_parts(GraphParts {
            name: self.name,
            description: self.description,
            nodes: self.nodes,
            dependencies: self.dependencies,
            modes: self.modes,
            presets: self.presets,
            storage_plugins: self.storage_plugins,
        })
    }
}

/// Binds inputs of a single node to upstream outputs
pub struct Binder<'a> {
    builder: &'a mut GraphBuilder,
    node: String,
}

impl<'a> Binder<'a> {
    /// Bind `name` to a single upstream output
    pub fn input(self, name: impl Into<String>, upstream: OutputRef) -> Self {
        self.push(name.into(), vec![upstream], false)
    }

    /// Bind `name` to several upstream outputs; the input receives them as a list
    pub fn fan_in(self, name: impl Into<String>, upstream: Vec<OutputRef>) -> Self {
        self.push(name.into(), upstream, true)
    }

    fn push(self, input: String, upstream: Vec<OutputRef>, fan_in: bool) -> Self {
        self.builder.dependencies.push(DependencyDefinition {
            node: self.node.clone(),
            input,
            upstream: upstream.into_iter().map(|o| (o.node, o.output)).collect(),
            fan_in,
        });
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::definition::{InputDefinition, OutputDefinition};
    use crate::graph::GraphErrorKind;
    use crate::types::RuntimeType;

    fn make_def(name: &str, inputs: &[&str]) -> NodeDefinition {
        let mut def = NodeDefinition::new(name).output(OutputDefinition::result(RuntimeType::Int));
        for input in inputs {
            def = def.input(InputDefinition::new(*input, RuntimeType::Int));
        }
        def
    }

    #[test]
    fn test_node_lookup() {
        let mut builder = GraphBuilder::new("g");
        let added = builder.add_node(make_def("a", &[]));
        assert_eq!(builder.node("a").unwrap(), added);
        assert_eq!(
            builder.node("b").unwrap_err().kind,
            GraphErrorKind::UnknownDependency
        );
    }

    #[test]
    fn test_alias_reuses_definition() {
        let mut builder = GraphBuilder::new("g");
        let def = Arc::new(make_def("add_one", &["num"]));
        let source = builder.add_node(make_def("source", &[]));
        let first = builder.add_shared_node_as("first", def.clone());
        let second = builder.add_shared_node_as("second", def);
        builder.bind(&first).input("num", source.output("result"));
        builder.bind(&second).input("num", first.output("result"));

        let graph = builder.build().unwrap();
        assert_eq!(graph.nodes().len(), 3);
        assert!(Arc::ptr_eq(
            &graph.node("first").unwrap().definition,
            &graph.node("second").unwrap().definition
        ));
    }

    #[test]
    fn test_binding_unknown_input() {
        let mut builder = GraphBuilder::new("g");
        let a = builder.add_node(make_def("a", &[]));
        let b = builder.add_node(make_def("b", &["x"]));
        builder.bind(&b).input("y", a.output("result"));

        let err = builder.build().unwrap_err();
        assert_eq!(err.kind, GraphErrorKind::UnknownDependency);
    }

    #[test]
    fn test_binding_unknown_output() {
        let mut builder = GraphBuilder::new("g");
        let a = builder.add_node(make_def("a", &[]));
        let b = builder.add_node(make_def("b", &["x"]));
        builder.bind(&b).input("x", a.output("missing"));

        let err = builder.build().unwrap_err();
        assert!(err.message.contains("a:missing"));
    }

    #[test]
    fn test_chained_bindings() {
        let mut builder = GraphBuilder::new("g");
        let two = builder.add_node(make_def("two", &[]));
        let three = builder.add_node(make_def("three", &[]));
        let add = builder.add_node(make_def("add", &["num_one", "num_two"]));
        builder
            .bind(&add)
            .input("num_one", two.output("result"))
            .input("num_two", three.output("result"));

        let graph = builder.build().unwrap();
        assert_eq!(graph.dependency_structure().len(), 2);
    }

    #[test]
    fn test_duplicate_mode_rejected() {
        let mut builder = GraphBuilder::new("g");
        builder.add_node(make_def("a", &[]));
        builder
            .mode(ModeDefinition::new("local"))
            .mode(ModeDefinition::new("local"));
        let err = builder.build().unwrap_err();
        assert!(err.message.contains("mode 'local'"));
    }
}
