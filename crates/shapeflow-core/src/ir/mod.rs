//! In-memory program representation
//!
//! Construction and read access only; no inference logic lives here.

pub mod attribute;
pub mod graph;
pub mod model;
pub mod tensor;
pub mod types;

pub use attribute::{Attribute, AttributeKind, AttributeValue};
pub use graph::{Graph, Node, ValueInfo};
pub use model::{FunctionDef, FunctionKey, Model, OpsetImports, DEFAULT_DOMAIN};
pub use tensor::{TensorData, TensorValues};
pub use types::{Dim, Dims, ElementKind, Shape, TensorType, Type};
