//! Inference driver: traversal, scoping and commit-on-success

mod engine;
mod graph;
mod scope;

pub use engine::{infer_shapes, InferenceResult, InferenceSummary, ShapeInference};
pub use graph::{opset_version, Binding, GraphInferencer, GraphOutcome, InferenceStats, LATEST_DEFAULT_OPSET};
pub use scope::Scope;
