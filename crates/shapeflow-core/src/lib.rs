//! Static type and shape inference for ONNX-style dataflow graphs.
//!
//! Given a [`Model`] whose nodes are typed operators, user-defined functions and
//! control-flow constructs, the engine propagates element kinds and (possibly symbolic)
//! shapes from the graph inputs to every value. Small constant tensors that determine
//! shapes are folded along the way under a fixed budget.
//!
//! ```
//! use shapeflow_core::ir::{ElementKind, Graph, Model, Node, Shape, Type};
//! use shapeflow_core::ShapeInference;
//!
//! let graph = Graph::new("main")
//!     .with_input("a", Type::tensor(ElementKind::Float, Shape::known(&[3, 4, 5])))
//!     .with_input("b", Type::tensor(ElementKind::Float, Shape::known(&[5])))
//!     .with_output("c", None)
//!     .with_node(Node::new("Add").with_inputs(["a", "b"]).with_output("c"));
//! let mut model = Model::new(graph).with_opset("", 18);
//!
//! ShapeInference::new().infer_model(&mut model)?;
//! assert_eq!(model.graph.outputs[0].ty.as_ref().unwrap().to_string(), "float[3,4,5]");
//! # Ok::<(), shapeflow_core::InferenceError>(())
//! ```

pub mod config;
pub mod control_flow;
pub mod driver;
pub mod error;
pub mod function;
pub mod ir;
pub mod partial_eval;
pub mod rules;
pub mod symbolic;

pub use config::InferenceConfig;
pub use driver::{infer_shapes, InferenceResult, InferenceSummary, ShapeInference};
pub use error::{ErrorKind, InferenceError, Result};
pub use function::inline_local_functions;
pub use ir::{Graph, Model, Node, Type};
pub use rules::{InferenceRule, RuleContext, RuleRegistry};
