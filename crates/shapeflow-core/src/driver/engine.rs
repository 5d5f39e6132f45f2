//! Public entry points: infer a model and commit the result

use super::graph::{GraphInferencer, GraphOutcome};
use super::scope::Scope;
use crate::config::InferenceConfig;
use crate::error::{InferenceError, Result};
use crate::function::FunctionRegistry;
use crate::ir::{Graph, Model, Type};
use crate::partial_eval::PartialValueEnv;
use crate::rules::RuleRegistry;
use indexmap::IndexMap;
use serde::Serialize;
use std::sync::Arc;
use tracing::debug;

/// Counters describing a successful pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct InferenceSummary {
    /// Main-graph values with a known type
    pub values_typed: usize,
    /// Main-graph values left unknown
    pub values_unknown: usize,
    /// Main-graph values with a statically known value
    pub partial_values: usize,
    pub nodes_visited: usize,
    pub function_expansions: usize,
    pub expansion_cache_hits: usize,
    pub budget_exhausted: bool,
}

/// Uncommitted result of inferring a model
#[derive(Debug, Clone)]
pub struct InferenceResult {
    /// Side table of the main graph, in definition order
    pub types: IndexMap<String, Option<Type>>,
    /// Types of the main graph's outputs
    pub outputs: Vec<Option<Type>>,
    pub summary: InferenceSummary,
}

impl InferenceResult {
    pub fn type_of(&self, name: &str) -> Option<&Type> {
        self.types.get(name).and_then(Option::as_ref)
    }

    /// Write the refined types into the main graph: output declarations and `value_info`
    /// entries for intermediate values. Graph inputs and initializers are left alone.
    pub fn commit(&self, graph: &mut Graph) {
        for (output, ty) in graph.outputs.iter_mut().zip(&self.outputs) {
            if ty.is_some() {
                output.ty = ty.clone();
            }
        }
        for (name, ty) in &self.types {
            let Some(ty) = ty else {
                continue;
            };
            let is_boundary = graph.inputs.iter().chain(&graph.outputs).any(|info| &info.name == name)
                || graph.initializers.contains_key(name);
            if !is_boundary {
                graph.value_info.insert(name.clone(), ty.clone());
            }
        }
    }
}

/// Type and shape inference over models.
///
/// The rule registry is shared and read-only, so one engine can serve concurrent
/// invocations over independent models.
#[derive(Debug, Clone)]
pub struct ShapeInference {
    rules: Arc<RuleRegistry>,
    config: InferenceConfig,
}

impl ShapeInference {
    pub fn new() -> Self {
        Self {
            rules: Arc::new(RuleRegistry::new()),
            config: InferenceConfig::default(),
        }
    }

    pub fn with_config(mut self, config: InferenceConfig) -> Self {
        self.config = config;
        self
    }

    /// Use a custom rule registry, e.g. one extended with vendor operators
    pub fn with_registry(mut self, rules: Arc<RuleRegistry>) -> Self {
        self.rules = rules;
        self
    }

    pub fn config(&self) -> &InferenceConfig {
        &self.config
    }

    pub fn rules(&self) -> &RuleRegistry {
        &self.rules
    }

    /// Infer every value of `model` without modifying it
    pub fn infer(&self, model: &Model) -> Result<InferenceResult> {
        let functions = FunctionRegistry::new(&model.functions);
        let mut inferencer = GraphInferencer::new(&self.rules, &functions, &self.config);
        let mut scope = Scope::root(PartialValueEnv::from_config(&self.config));
        let GraphOutcome { outputs, .. } =
            inferencer.infer_graph(&model.graph, &model.opset_imports, &mut scope, &[])?;
        let (types, values) = scope.into_parts();

        if self.config.strict_mode {
            let is_input = |name: &str| model.graph.inputs.iter().any(|info| info.name == name);
            if let Some((name, _)) = types.iter().find(|(name, ty)| ty.is_none() && !is_input(name.as_str())) {
                return Err(InferenceError::UnknownType { value: name.clone() });
            }
            if let Some(output) = model.graph.outputs.iter().zip(&outputs).find(|(_, ty)| ty.is_none()) {
                return Err(InferenceError::UnknownType {
                    value: output.0.name.clone(),
                });
            }
        }

        let stats = inferencer.stats();
        let values_typed = types.values().filter(|ty| ty.is_some()).count();
        let summary = InferenceSummary {
            values_typed,
            values_unknown: types.len() - values_typed,
            partial_values: values.len(),
            nodes_visited: stats.nodes,
            function_expansions: stats.expansions,
            expansion_cache_hits: inferencer.cache().hits(),
            budget_exhausted: stats.budget_exhausted || values.is_exhausted(),
        };
        debug!(?summary, "inference finished");
        Ok(InferenceResult { types, outputs, summary })
    }

    /// Infer `model` and commit the refined types into it. On failure the model is untouched.
    pub fn infer_model(&self, model: &mut Model) -> Result<InferenceSummary> {
        let result = self.infer(model)?;
        result.commit(&mut model.graph);
        Ok(result.summary)
    }
}

impl Default for ShapeInference {
    fn default() -> Self {
        Self::new()
    }
}

/// Infer and commit with the default rules
pub fn infer_shapes(model: &mut Model, config: &InferenceConfig) -> Result<InferenceSummary> {
    ShapeInference::new().with_config(config.clone()).infer_model(model)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::ir::{ElementKind, Node, Shape};

    fn float(dims: &[u64]) -> Type {
        Type::tensor(ElementKind::Float, Shape::known(dims))
    }

    fn relu_chain() -> Model {
        let graph = Graph::new("g")
            .with_input("x", float(&[2, 3]))
            .with_output("z", None)
            .with_node(Node::new("Relu").with_input("x").with_output("y"))
            .with_node(Node::new("Neg").with_input("y").with_output("z"));
        Model::new(graph).with_opset("", 18)
    }

    #[test]
    fn test_commit_writes_outputs_and_value_info() {
        let mut model = relu_chain();
        let summary = ShapeInference::new().infer_model(&mut model).unwrap();
        assert_eq!(model.graph.outputs[0].ty, Some(float(&[2, 3])));
        assert_eq!(model.graph.value_info.get("y"), Some(&float(&[2, 3])));
        assert!(!model.graph.value_info.contains_key("x"));
        assert_eq!(summary.values_typed, 3);
        assert_eq!(summary.nodes_visited, 2);
    }

    #[test]
    fn test_strict_mode_reports_unknown_values() {
        let graph = Graph::new("g")
            .with_input("x", None)
            .with_output("y", None)
            .with_node(Node::new("Relu").with_input("x").with_output("y"));
        let mut model = Model::new(graph);
        let engine = ShapeInference::new().with_config(InferenceConfig::default().strict());
        let err = engine.infer_model(&mut model).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnknownType);
        assert_eq!(model.graph.outputs[0].ty, None);

        let summary = ShapeInference::new().infer_model(&mut model).unwrap();
        assert_eq!(summary.values_unknown, 2);
    }

    #[test]
    fn test_infer_leaves_model_untouched() {
        let model = relu_chain();
        let result = ShapeInference::new().infer(&model).unwrap();
        assert_eq!(result.type_of("y"), Some(&float(&[2, 3])));
        assert!(model.graph.value_info.is_empty());
    }
}
