//! Graphs, nodes and value declarations

use super::attribute::{Attribute, AttributeKind, AttributeValue};
use super::tensor::TensorData;
use super::types::Type;
use crate::error::{InferenceError, Result};
use indexmap::{IndexMap, IndexSet};
use petgraph::algo::toposort;
use petgraph::graph::DiGraph;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A named value with an optional declared type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValueInfo {
    pub name: String,
    #[serde(default)]
    pub ty: Option<Type>,
}

impl ValueInfo {
    pub fn new(name: impl Into<String>, ty: Option<Type>) -> Self {
        Self {
            name: name.into(),
            ty,
        }
    }
}

/// An operator application
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Node {
    #[serde(default)]
    pub name: String,
    /// Operator domain; empty for the default ONNX domain
    #[serde(default)]
    pub domain: String,
    pub op_type: String,
    /// Ordered inputs; `None` marks an omitted optional input
    #[serde(default)]
    pub inputs: Vec<Option<String>>,
    /// Ordered outputs; `None` marks an output the graph does not use
    #[serde(default)]
    pub outputs: Vec<Option<String>>,
    #[serde(default)]
    pub attributes: Vec<Attribute>,
}

impl Node {
    pub fn new(op_type: impl Into<String>) -> Self {
        Self {
            op_type: op_type.into(),
            ..Default::default()
        }
    }

    pub fn in_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = domain.into();
        self
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Append an input; an empty name is an omitted input
    pub fn with_input(mut self, name: &str) -> Self {
        self.inputs.push((!name.is_empty()).then(|| name.to_string()));
        self
    }

    pub fn with_inputs<'a>(mut self, names: impl IntoIterator<Item = &'a str>) -> Self {
        for name in names {
            self = self.with_input(name);
        }
        self
    }

    pub fn with_omitted_input(mut self) -> Self {
        self.inputs.push(None);
        self
    }

    pub fn with_output(mut self, name: &str) -> Self {
        self.outputs.push((!name.is_empty()).then(|| name.to_string()));
        self
    }

    pub fn with_outputs<'a>(mut self, names: impl IntoIterator<Item = &'a str>) -> Self {
        for name in names {
            self = self.with_output(name);
        }
        self
    }

    pub fn with_attr(mut self, attr: Attribute) -> Self {
        self.attributes.push(attr);
        self
    }

    /// `domain.op_type`, or just `op_type` in the default domain
    pub fn qualified_op(&self) -> String {
        if self.domain.is_empty() {
            self.op_type.clone()
        } else {
            format!("{}.{}", self.domain, self.op_type)
        }
    }

    /// Node name, or a name derived from the first output for anonymous nodes
    pub fn display_name(&self) -> String {
        if !self.name.is_empty() {
            return self.name.clone();
        }
        match self.outputs.iter().flatten().next() {
            Some(output) => format!("{}->{}", self.op_type, output),
            None => self.op_type.clone(),
        }
    }

    pub fn input(&self, index: usize) -> Option<&str> {
        self.inputs.get(index).and_then(|name| name.as_deref())
    }

    pub fn output(&self, index: usize) -> Option<&str> {
        self.outputs.get(index).and_then(|name| name.as_deref())
    }

    pub fn attr(&self, name: &str) -> Option<&Attribute> {
        self.attributes.iter().find(|attr| attr.name == name)
    }

    pub fn has_attr(&self, name: &str) -> bool {
        self.attr(name).is_some()
    }

    fn typed_attr<'a, T>(
        &'a self,
        name: &str,
        expected: AttributeKind,
        extract: impl Fn(&'a AttributeValue) -> Option<T>,
    ) -> Result<Option<T>> {
        match self.attr(name) {
            None => Ok(None),
            Some(attr) => extract(&attr.value).map(Some).ok_or_else(|| InferenceError::AttributeMissing {
                name: name.to_string(),
                expected,
            }),
        }
    }

    pub fn attr_int(&self, name: &str) -> Result<Option<i64>> {
        self.typed_attr(name, AttributeKind::Int, |value| match value {
            AttributeValue::Int(v) => Some(*v),
            _ => None,
        })
    }

    pub fn attr_float(&self, name: &str) -> Result<Option<f32>> {
        self.typed_attr(name, AttributeKind::Float, |value| match value {
            AttributeValue::Float(v) => Some(*v),
            _ => None,
        })
    }

    pub fn attr_string(&self, name: &str) -> Result<Option<&str>> {
        self.typed_attr(name, AttributeKind::String, |value| match value {
            AttributeValue::String(v) => Some(v.as_str()),
            _ => None,
        })
    }

    pub fn attr_ints(&self, name: &str) -> Result<Option<&[i64]>> {
        self.typed_attr(name, AttributeKind::Ints, |value| match value {
            AttributeValue::Ints(v) => Some(v.as_slice()),
            _ => None,
        })
    }

    pub fn attr_floats(&self, name: &str) -> Result<Option<&[f32]>> {
        self.typed_attr(name, AttributeKind::Floats, |value| match value {
            AttributeValue::Floats(v) => Some(v.as_slice()),
            _ => None,
        })
    }

    pub fn attr_strings(&self, name: &str) -> Result<Option<&[String]>> {
        self.typed_attr(name, AttributeKind::Strings, |value| match value {
            AttributeValue::Strings(v) => Some(v.as_slice()),
            _ => None,
        })
    }

    pub fn attr_tensor(&self, name: &str) -> Result<Option<&TensorData>> {
        self.typed_attr(name, AttributeKind::Tensor, |value| match value {
            AttributeValue::Tensor(v) => Some(v),
            _ => None,
        })
    }

    pub fn attr_graph(&self, name: &str) -> Result<Option<&Graph>> {
        self.typed_attr(name, AttributeKind::Graph, |value| match value {
            AttributeValue::Graph(v) => Some(v.as_ref()),
            _ => None,
        })
    }

    pub fn attr_type(&self, name: &str) -> Result<Option<&Type>> {
        self.typed_attr(name, AttributeKind::Type, |value| match value {
            AttributeValue::Type(v) => Some(v),
            _ => None,
        })
    }

    pub fn require_int(&self, name: &str) -> Result<i64> {
        self.attr_int(name)?.ok_or_else(|| missing(name, AttributeKind::Int))
    }

    pub fn require_graph(&self, name: &str) -> Result<&Graph> {
        self.attr_graph(name)?.ok_or_else(|| missing(name, AttributeKind::Graph))
    }

    /// Subgraphs embedded in this node's attributes
    pub fn subgraphs(&self) -> impl Iterator<Item = &Graph> {
        self.attributes.iter().flat_map(|attr| attr.subgraphs())
    }

    /// Values this node reads: explicit inputs plus values captured by its subgraphs
    pub fn referenced_values(&self) -> IndexSet<String> {
        let mut names: IndexSet<String> = self.inputs.iter().flatten().cloned().collect();
        for graph in self.subgraphs() {
            names.extend(graph.captured_values());
        }
        names
    }
}

fn missing(name: &str, expected: AttributeKind) -> InferenceError {
    InferenceError::AttributeMissing {
        name: name.to_string(),
        expected,
    }
}

/// A dataflow graph: the main graph, a control-flow branch or a specialized function body
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Graph {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub inputs: Vec<ValueInfo>,
    #[serde(default)]
    pub outputs: Vec<ValueInfo>,
    #[serde(default)]
    pub initializers: IndexMap<String, TensorData>,
    #[serde(default)]
    pub nodes: Vec<Node>,
    /// Declared or inferred types of intermediate values
    #[serde(default)]
    pub value_info: IndexMap<String, Type>,
}

impl Graph {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_input(mut self, name: &str, ty: impl Into<Option<Type>>) -> Self {
        self.inputs.push(ValueInfo::new(name, ty.into()));
        self
    }

    pub fn with_output(mut self, name: &str, ty: impl Into<Option<Type>>) -> Self {
        self.outputs.push(ValueInfo::new(name, ty.into()));
        self
    }

    pub fn with_node(mut self, node: Node) -> Self {
        self.nodes.push(node);
        self
    }

    pub fn with_initializer(mut self, name: &str, data: TensorData) -> Self {
        self.initializers.insert(name.to_string(), data);
        self
    }

    pub fn with_value_info(mut self, name: &str, ty: Type) -> Self {
        self.value_info.insert(name.to_string(), ty);
        self
    }

    /// Declared type of a value: graph input, graph output or `value_info` entry
    pub fn declared_type(&self, name: &str) -> Option<&Type> {
        self.inputs
            .iter()
            .chain(self.outputs.iter())
            .find(|info| info.name == name)
            .and_then(|info| info.ty.as_ref())
            .or_else(|| self.value_info.get(name))
    }

    /// Map from value name to the index of the node producing it
    pub fn producers(&self) -> Result<HashMap<&str, usize>> {
        let mut producers: HashMap<&str, usize> = HashMap::new();
        let sources: IndexSet<&str> = self
            .inputs
            .iter()
            .map(|info| info.name.as_str())
            .chain(self.initializers.keys().map(String::as_str))
            .collect();

        for (index, node) in self.nodes.iter().enumerate() {
            for output in node.outputs.iter().flatten() {
                if sources.contains(output.as_str()) {
                    return Err(InvalidGraph::redefined(output, node));
                }
                if producers.insert(output.as_str(), index).is_some() {
                    return Err(InvalidGraph::redefined(output, node));
                }
            }
        }
        Ok(producers)
    }

    /// The node producing `name`, if it is produced inside this graph
    pub fn producer(&self, name: &str) -> Option<&Node> {
        self.nodes
            .iter()
            .find(|node| node.outputs.iter().flatten().any(|output| output == name))
    }

    /// Nodes reading `name`, directly or through a subgraph capture
    pub fn consumers(&self, name: &str) -> Vec<&Node> {
        self.nodes
            .iter()
            .filter(|node| node.referenced_values().contains(name))
            .collect()
    }

    /// Names defined inside this graph (inputs, initializers and node outputs)
    pub fn defined_values(&self) -> IndexSet<String> {
        let mut defined: IndexSet<String> = self.inputs.iter().map(|info| info.name.clone()).collect();
        defined.extend(self.initializers.keys().cloned());
        for node in &self.nodes {
            defined.extend(node.outputs.iter().flatten().cloned());
        }
        defined
    }

    /// Values read by this graph (or its nested subgraphs) but defined in an enclosing scope
    pub fn captured_values(&self) -> IndexSet<String> {
        let defined = self.defined_values();
        let mut captured = IndexSet::new();
        for node in &self.nodes {
            for name in node.referenced_values() {
                if !defined.contains(&name) {
                    captured.insert(name);
                }
            }
        }
        for output in &self.outputs {
            if !defined.contains(&output.name) {
                captured.insert(output.name.clone());
            }
        }
        captured
    }

    /// Node indices in dependency order. Values captured from enclosing scopes do not
    /// create edges; values captured by a node's subgraphs do.
    pub fn topological_order(&self) -> Result<Vec<usize>> {
        let producers = self.producers()?;
        let mut deps: DiGraph<usize, ()> = DiGraph::with_capacity(self.nodes.len(), self.nodes.len());
        let indices: Vec<_> = (0..self.nodes.len()).map(|i| deps.add_node(i)).collect();

        for (consumer, node) in self.nodes.iter().enumerate() {
            for name in node.referenced_values() {
                if let Some(&producer) = producers.get(name.as_str()) {
                    deps.add_edge(indices[producer], indices[consumer], ());
                }
            }
        }

        toposort(&deps, None)
            .map(|order| order.into_iter().map(|ix| deps[ix]).collect())
            .map_err(|cycle| {
                let node = &self.nodes[deps[cycle.node_id()]];
                InferenceError::InvalidGraph(format!(
                    "graph '{}' has a cycle through node '{}'",
                    self.name,
                    node.display_name()
                ))
            })
    }
}

struct InvalidGraph;

impl InvalidGraph {
    fn redefined(name: &str, node: &Node) -> InferenceError {
        InferenceError::InvalidGraph(format!(
            "value '{name}' is defined more than once (again by node '{}')",
            node.display_name()
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::types::{ElementKind, Shape};

    fn float(dims: &[u64]) -> Type {
        Type::tensor(ElementKind::Float, Shape::known(dims))
    }

    #[test]
    fn test_topological_order_reorders_nodes() {
        let graph = Graph::new("g")
            .with_input("x", float(&[2]))
            .with_node(Node::new("Relu").with_input("t").with_output("y"))
            .with_node(Node::new("Neg").with_input("x").with_output("t"));
        assert_eq!(graph.topological_order().unwrap(), vec![1, 0]);
    }

    #[test]
    fn test_cycle_is_rejected() {
        let graph = Graph::new("g")
            .with_node(Node::new("Relu").named("a").with_input("u").with_output("t"))
            .with_node(Node::new("Relu").named("b").with_input("t").with_output("u"));
        let err = graph.topological_order().unwrap_err();
        assert!(matches!(err, InferenceError::InvalidGraph(_)));
    }

    #[test]
    fn test_duplicate_producer_is_rejected() {
        let graph = Graph::new("g")
            .with_input("x", None)
            .with_node(Node::new("Neg").with_input("x").with_output("x"));
        assert!(graph.producers().is_err());
    }

    #[test]
    fn test_captured_values_of_branch() {
        let branch = Graph::new("then")
            .with_node(Node::new("Cast").with_input("x").with_output("z").with_attr(Attribute::int("to", 6)))
            .with_output("z", None);
        assert_eq!(branch.captured_values().into_iter().collect::<Vec<_>>(), vec!["x".to_string()]);

        let passthrough = Graph::new("else").with_output("x", None);
        assert!(passthrough.captured_values().contains("x"));
    }

    #[test]
    fn test_subgraph_capture_orders_producer_first() {
        let branch = Graph::new("then")
            .with_node(Node::new("Identity").with_input("late").with_output("z"))
            .with_output("z", None);
        let graph = Graph::new("g")
            .with_input("cond", Type::scalar(ElementKind::Bool))
            .with_input("x", float(&[1]))
            .with_node(
                Node::new("If")
                    .with_input("cond")
                    .with_output("y")
                    .with_attr(Attribute::graph("then_branch", branch.clone()))
                    .with_attr(Attribute::graph("else_branch", branch)),
            )
            .with_node(Node::new("Neg").with_input("x").with_output("late"));
        assert_eq!(graph.topological_order().unwrap(), vec![1, 0]);
        assert_eq!(graph.consumers("late").len(), 1);
        assert_eq!(graph.producer("late").map(|n| n.op_type.as_str()), Some("Neg"));
    }

    #[test]
    fn test_attribute_kind_checking() {
        let node = Node::new("Cast").with_attr(Attribute::string("to", "int32"));
        let err = node.attr_int("to").unwrap_err();
        assert_eq!(
            err,
            InferenceError::AttributeMissing {
                name: "to".to_string(),
                expected: AttributeKind::Int
            }
        );
        assert_eq!(node.attr_int("missing").unwrap(), None);
        assert!(node.require_int("missing").is_err());
    }

    #[test]
    fn test_omitted_inputs() {
        let node = Node::new("Clip").with_inputs(["x", "", "max"]);
        assert_eq!(node.input(0), Some("x"));
        assert_eq!(node.input(1), None);
        assert_eq!(node.input(2), Some("max"));
        assert_eq!(node.display_name(), "Clip");
    }
}
