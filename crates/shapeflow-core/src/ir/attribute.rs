//! Node attributes
//!
//! Inside a function body an attribute may be a [`AttributeValue::Ref`], a deferred reference
//! to an attribute of the calling node. References are replaced by literals when the body is
//! specialized for a call site; rules never see them.

use super::graph::Graph;
use super::tensor::TensorData;
use super::types::Type;
use serde::{Deserialize, Serialize};
use strum::Display;

/// Declared kind of an attribute
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum AttributeKind {
    Int,
    Float,
    String,
    Tensor,
    Graph,
    Type,
    Ints,
    Floats,
    Strings,
    Tensors,
    Graphs,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttributeValue {
    Int(i64),
    Float(f32),
    String(String),
    Tensor(TensorData),
    Graph(Box<Graph>),
    Type(Type),
    Ints(Vec<i64>),
    Floats(Vec<f32>),
    Strings(Vec<String>),
    Tensors(Vec<TensorData>),
    Graphs(Vec<Graph>),
    /// Reference to the enclosing call's attribute `name`
    Ref { name: String, kind: AttributeKind },
}

impl AttributeValue {
    pub fn kind(&self) -> AttributeKind {
        match self {
            AttributeValue::Int(_) => AttributeKind::Int,
            AttributeValue::Float(_) => AttributeKind::Float,
            AttributeValue::String(_) => AttributeKind::String,
            AttributeValue::Tensor(_) => AttributeKind::Tensor,
            AttributeValue::Graph(_) => AttributeKind::Graph,
            AttributeValue::Type(_) => AttributeKind::Type,
            AttributeValue::Ints(_) => AttributeKind::Ints,
            AttributeValue::Floats(_) => AttributeKind::Floats,
            AttributeValue::Strings(_) => AttributeKind::Strings,
            AttributeValue::Tensors(_) => AttributeKind::Tensors,
            AttributeValue::Graphs(_) => AttributeKind::Graphs,
            AttributeValue::Ref { kind, .. } => *kind,
        }
    }

    pub fn is_ref(&self) -> bool {
        matches!(self, AttributeValue::Ref { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attribute {
    pub name: String,
    pub value: AttributeValue,
}

impl Attribute {
    pub fn new(name: impl Into<String>, value: AttributeValue) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }

    pub fn int(name: impl Into<String>, value: i64) -> Self {
        Self::new(name, AttributeValue::Int(value))
    }

    pub fn float(name: impl Into<String>, value: f32) -> Self {
        Self::new(name, AttributeValue::Float(value))
    }

    pub fn string(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self::new(name, AttributeValue::String(value.into()))
    }

    pub fn ints(name: impl Into<String>, values: Vec<i64>) -> Self {
        Self::new(name, AttributeValue::Ints(values))
    }

    pub fn floats(name: impl Into<String>, values: Vec<f32>) -> Self {
        Self::new(name, AttributeValue::Floats(values))
    }

    pub fn strings(name: impl Into<String>, values: Vec<String>) -> Self {
        Self::new(name, AttributeValue::Strings(values))
    }

    pub fn tensor(name: impl Into<String>, value: TensorData) -> Self {
        Self::new(name, AttributeValue::Tensor(value))
    }

    pub fn graph(name: impl Into<String>, graph: Graph) -> Self {
        Self::new(name, AttributeValue::Graph(Box::new(graph)))
    }

    pub fn ty(name: impl Into<String>, ty: Type) -> Self {
        Self::new(name, AttributeValue::Type(ty))
    }

    /// `name: kind = @target` inside a function body
    pub fn reference(name: impl Into<String>, target: impl Into<String>, kind: AttributeKind) -> Self {
        Self::new(
            name,
            AttributeValue::Ref {
                name: target.into(),
                kind,
            },
        )
    }

    pub fn kind(&self) -> AttributeKind {
        self.value.kind()
    }

    /// Graphs held by this attribute
    pub fn subgraphs(&self) -> Vec<&Graph> {
        match &self.value {
            AttributeValue::Graph(graph) => vec![graph.as_ref()],
            AttributeValue::Graphs(graphs) => graphs.iter().collect(),
            _ => Vec::new(),
        }
    }

    pub(crate) fn subgraphs_mut(&mut self) -> Vec<&mut Graph> {
        match &mut self.value {
            AttributeValue::Graph(graph) => vec![graph.as_mut()],
            AttributeValue::Graphs(graphs) => graphs.iter_mut().collect(),
            _ => Vec::new(),
        }
    }
}
