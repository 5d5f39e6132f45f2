//! Error types for type and shape inference
//!
//! Every hard failure of an inference pass is an [`InferenceError`]. Failures raised by an
//! operator rule are wrapped in [`InferenceError::Node`] by the driver so the caller can see
//! which node (and, for nested function bodies or branches, which chain of nodes) rejected
//! its inputs.

use crate::ir::AttributeKind;
use thiserror::Error;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, InferenceError>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum InferenceError {
    #[error("no inference rule for operator '{op_type}' in domain '{domain}' at opset version {version}")]
    UnknownOperator {
        domain: String,
        op_type: String,
        version: i64,
    },

    #[error("type mismatch: {0}")]
    TypeMismatch(String),

    #[error("shape mismatch: {0}")]
    ShapeMismatch(String),

    #[error("required input #{index} is missing")]
    MissingRequiredInput { index: usize },

    #[error("attribute '{name}' is missing or is not of kind {expected}")]
    AttributeMissing { name: String, expected: AttributeKind },

    #[error("nesting depth {depth} exceeds the limit of {limit} while entering '{target}'")]
    RecursionLimit {
        depth: usize,
        limit: usize,
        target: String,
    },

    #[error("type of value '{value}' could not be inferred")]
    UnknownType { value: String },

    #[error("invalid graph: {0}")]
    InvalidGraph(String),

    #[error("node '{node}' ({op_type}) with inputs [{}] failed", inputs.join(", "))]
    Node {
        node: String,
        op_type: String,
        inputs: Vec<String>,
        #[source]
        source: Box<InferenceError>,
    },
}

/// Discriminant of an [`InferenceError`], ignoring node context
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    UnknownOperator,
    TypeMismatch,
    ShapeMismatch,
    MissingRequiredInput,
    AttributeMissing,
    RecursionLimit,
    UnknownType,
    InvalidGraph,
}

impl InferenceError {
    /// Innermost error, skipping any node context wrappers
    pub fn root(&self) -> &InferenceError {
        let mut current = self;
        while let InferenceError::Node { source, .. } = current {
            current = source;
        }
        current
    }

    /// Kind of the innermost error
    pub fn kind(&self) -> ErrorKind {
        match self.root() {
            InferenceError::UnknownOperator { .. } => ErrorKind::UnknownOperator,
            InferenceError::TypeMismatch(_) => ErrorKind::TypeMismatch,
            InferenceError::ShapeMismatch(_) => ErrorKind::ShapeMismatch,
            InferenceError::MissingRequiredInput { .. } => ErrorKind::MissingRequiredInput,
            InferenceError::AttributeMissing { .. } => ErrorKind::AttributeMissing,
            InferenceError::RecursionLimit { .. } => ErrorKind::RecursionLimit,
            InferenceError::UnknownType { .. } => ErrorKind::UnknownType,
            InferenceError::InvalidGraph(_) => ErrorKind::InvalidGraph,
            InferenceError::Node { .. } => unreachable!("root() never returns a node wrapper"),
        }
    }

    /// Chain of node names from the outermost to the innermost failing node
    pub fn node_path(&self) -> Vec<&str> {
        let mut path = Vec::new();
        let mut current = self;
        while let InferenceError::Node { node, source, .. } = current {
            path.push(node.as_str());
            current = source;
        }
        path
    }

    pub(crate) fn in_node(self, node: &crate::ir::Node) -> Self {
        InferenceError::Node {
            node: node.display_name(),
            op_type: node.qualified_op(),
            inputs: node
                .inputs
                .iter()
                .map(|input| input.clone().unwrap_or_default())
                .collect(),
            source: Box::new(self),
        }
    }
}
