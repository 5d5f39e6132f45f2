//! Models, opset imports and user-defined functions

use super::attribute::Attribute;
use super::graph::{Graph, Node};
use super::types::Type;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;

/// The default operator domain. `ai.onnx` is an alias for it.
pub const DEFAULT_DOMAIN: &str = "";

pub(crate) fn normalize_domain(domain: &str) -> &str {
    if domain == "ai.onnx" {
        DEFAULT_DOMAIN
    } else {
        domain
    }
}

/// Operator set versions imported by a model or function, keyed by domain
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OpsetImports(IndexMap<String, i64>);

impl OpsetImports {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, domain: &str, version: i64) -> Self {
        self.insert(domain, version);
        self
    }

    pub fn insert(&mut self, domain: &str, version: i64) {
        self.0.insert(normalize_domain(domain).to_string(), version);
    }

    pub fn version(&self, domain: &str) -> Option<i64> {
        self.0.get(normalize_domain(domain)).copied()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, i64)> {
        self.0.iter().map(|(domain, version)| (domain.as_str(), *version))
    }

    /// These imports, with domains missing here taken from `outer`
    pub fn or_else(&self, outer: &OpsetImports) -> OpsetImports {
        let mut merged = self.clone();
        for (domain, version) in outer.iter() {
            merged.0.entry(domain.to_string()).or_insert(version);
        }
        merged
    }
}

/// Identity of a function definition
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FunctionKey {
    pub domain: String,
    pub name: String,
    pub version: i64,
}

impl fmt::Display for FunctionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.domain.is_empty() {
            write!(f, "{}@{}", self.name, self.version)
        } else {
            write!(f, "{}.{}@{}", self.domain, self.name, self.version)
        }
    }
}

fn default_function_version() -> i64 {
    1
}

/// A named, versioned, attribute-parameterized subgraph usable as a single call node.
///
/// The body is a template: nodes may carry attribute references that are only resolved
/// when the function is specialized for a call site.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionDef {
    pub domain: String,
    pub name: String,
    #[serde(default = "default_function_version")]
    pub version: i64,
    #[serde(default)]
    pub inputs: Vec<String>,
    #[serde(default)]
    pub outputs: Vec<String>,
    /// Formal attribute parameters
    #[serde(default)]
    pub attributes: Vec<String>,
    /// Formal attribute parameters that carry a default value
    #[serde(default)]
    pub attribute_defaults: Vec<Attribute>,
    #[serde(default)]
    pub opset_imports: OpsetImports,
    #[serde(default)]
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub value_info: IndexMap<String, Type>,
}

impl FunctionDef {
    pub fn new(domain: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            name: name.into(),
            version: default_function_version(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            attributes: Vec::new(),
            attribute_defaults: Vec::new(),
            opset_imports: OpsetImports::new(),
            nodes: Vec::new(),
            value_info: IndexMap::new(),
        }
    }

    pub fn with_version(mut self, version: i64) -> Self {
        self.version = version;
        self
    }

    pub fn with_inputs<'a>(mut self, names: impl IntoIterator<Item = &'a str>) -> Self {
        self.inputs.extend(names.into_iter().map(str::to_string));
        self
    }

    pub fn with_outputs<'a>(mut self, names: impl IntoIterator<Item = &'a str>) -> Self {
        self.outputs.extend(names.into_iter().map(str::to_string));
        self
    }

    pub fn with_attributes<'a>(mut self, names: impl IntoIterator<Item = &'a str>) -> Self {
        self.attributes.extend(names.into_iter().map(str::to_string));
        self
    }

    /// Declare a formal attribute parameter with a default value
    pub fn with_attribute_default(mut self, default: Attribute) -> Self {
        self.attribute_defaults.push(default);
        self
    }

    pub fn with_opset(mut self, domain: &str, version: i64) -> Self {
        self.opset_imports.insert(domain, version);
        self
    }

    pub fn with_node(mut self, node: Node) -> Self {
        self.nodes.push(node);
        self
    }

    pub fn key(&self) -> FunctionKey {
        FunctionKey {
            domain: normalize_domain(&self.domain).to_string(),
            name: self.name.clone(),
            version: self.version,
        }
    }

    pub fn attribute_default(&self, name: &str) -> Option<&Attribute> {
        self.attribute_defaults.iter().find(|attr| attr.name == name)
    }

    /// Whether `name` is a formal attribute parameter of this function
    pub fn declares_attribute(&self, name: &str) -> bool {
        self.attributes.iter().any(|attr| attr == name) || self.attribute_default(name).is_some()
    }
}

fn default_ir_version() -> i64 {
    8
}

/// A complete program: opset imports, the main graph and its function library
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Model {
    #[serde(default = "default_ir_version")]
    pub ir_version: i64,
    #[serde(default)]
    pub opset_imports: OpsetImports,
    pub graph: Graph,
    #[serde(default)]
    pub functions: Vec<FunctionDef>,
}

impl Model {
    pub fn new(graph: Graph) -> Self {
        Self {
            ir_version: default_ir_version(),
            opset_imports: OpsetImports::new(),
            graph,
            functions: Vec::new(),
        }
    }

    pub fn with_opset(mut self, domain: &str, version: i64) -> Self {
        self.opset_imports.insert(domain, version);
        self
    }

    pub fn with_function(mut self, function: FunctionDef) -> Self {
        self.functions.push(function);
        self
    }
}
