// Graph Handles
// Path-based identifiers for nodes and their ports across nested graphs

use std::fmt;
use std::sync::Arc;

/// Path identifying a node across composite nesting levels ("outer.inner.leaf")
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeHandle {
    parent: Option<Arc<NodeHandle>>,
    name: String,
}

impl NodeHandle {
    pub fn new(name: impl Into<String>, parent: Option<&NodeHandle>) -> Self {
        Self {
            parent: parent.map(|p| Arc::new(p.clone())),
            name: name.into(),
        }
    }

    pub fn root(name: impl Into<String>) -> Self {
        Self::new(name, None)
    }

    /// Parse a dotted path back into a handle
    pub fn from_path(path: &str) -> Option<Self> {
        let mut handle: Option<NodeHandle> = None;
        for segment in path.split('.') {
            if segment.is_empty() {
                return None;
            }
            handle = Some(NodeHandle::new(segment, handle.as_ref()));
        }
        handle
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn parent(&self) -> Option<&NodeHandle> {
        self.parent.as_deref()
    }

    /// Handle of a node nested directly inside this one
    pub fn child(&self, name: impl Into<String>) -> Self {
        Self::new(name, Some(self))
    }

    /// Path segments from the outermost ancestor down to this node
    pub fn path(&self) -> Vec<&str> {
        let mut segments = vec![self.name.as_str()];
        let mut current = self.parent.as_deref();
        while let Some(handle) = current {
            segments.push(handle.name.as_str());
            current = handle.parent.as_deref();
        }
        segments.reverse();
        segments
    }

    pub fn depth(&self) -> usize {
        self.path().len() - 1
    }
}

impl fmt::Display for NodeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.path().join("."))
    }
}

/// One input slot of a node, identified by (node, input name)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InputHandle {
    pub node: NodeHandle,
    pub input_name: String,
}

impl InputHandle {
    pub fn new(node: NodeHandle, input_name: impl Into<String>) -> Self {
        Self {
            node,
            input_name: input_name.into(),
        }
    }
}

impl fmt::Display for InputHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.node, self.input_name)
    }
}

/// One output slot of a node, identified by (node, output name)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OutputHandle {
    pub node: NodeHandle,
    pub output_name: String,
}

impl OutputHandle {
    pub fn new(node: NodeHandle, output_name: impl Into<String>) -> Self {
        Self {
            node,
            output_name: output_name.into(),
        }
    }
}

impl fmt::Display for OutputHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.node, self.output_name)
    }
}
