//! Inference of a single graph against a scope chain
//!
//! Nodes are visited in dependency order. Each node's inputs are read through the scope
//! chain, the node is dispatched (control flow, local function or operator rule), and its
//! outputs are reconciled with any declared type and written to the innermost scope.

use super::scope::Scope;
use crate::config::InferenceConfig;
use crate::control_flow::{infer_if, infer_loop, is_control_flow};
use crate::error::{InferenceError, Result};
use crate::function::{specialize, Expansion, ExpansionCache, ExpansionKey, FunctionRegistry};
use crate::ir::model::normalize_domain;
use crate::ir::{FunctionDef, Graph, Node, OpsetImports, TensorData, Type};
use crate::partial_eval::{evaluate, is_allowed, PartialValueEnv};
use crate::rules::{RuleContext, RuleInput, RuleOutput, RuleRegistry};
use crate::symbolic::refine_option;
use tracing::{debug, trace, warn};

/// Default-domain opset assumed when a model imports none
pub const LATEST_DEFAULT_OPSET: i64 = 21;

/// Opset version a node in `domain` is interpreted at
pub fn opset_version(opsets: &OpsetImports, domain: &str) -> i64 {
    opsets.version(domain).unwrap_or_else(|| {
        if normalize_domain(domain).is_empty() {
            LATEST_DEFAULT_OPSET
        } else {
            1
        }
    })
}

/// Type and known value bound to a formal graph input
#[derive(Debug, Clone, Default)]
pub struct Binding {
    pub ty: Option<Type>,
    pub value: Option<TensorData>,
}

impl Binding {
    pub fn of_type(ty: Option<Type>) -> Self {
        Self { ty, value: None }
    }
}

/// Output types and values of an inferred graph
#[derive(Debug, Clone)]
pub struct GraphOutcome {
    pub outputs: Vec<Option<Type>>,
    pub output_values: Vec<Option<TensorData>>,
}

/// Counters collected over one invocation
#[derive(Debug, Clone, Default)]
pub struct InferenceStats {
    pub nodes: usize,
    pub expansions: usize,
    pub budget_exhausted: bool,
}

/// Result of dispatching one node
struct Dispatched {
    types: RuleOutput,
    values: Vec<Option<TensorData>>,
    /// Budget cost of computing `values`
    cost: usize,
}

impl Dispatched {
    fn types(types: RuleOutput) -> Self {
        Self {
            types,
            values: Vec::new(),
            cost: 0,
        }
    }
}

/// Walks graphs for one inference invocation.
///
/// Holds the invocation-local state (expansion cache, counters, nesting depth); the rule
/// and function registries are shared read-only.
pub struct GraphInferencer<'a> {
    rules: &'a RuleRegistry,
    functions: &'a FunctionRegistry<'a>,
    config: &'a InferenceConfig,
    cache: ExpansionCache,
    stats: InferenceStats,
    depth: usize,
}

impl<'a> GraphInferencer<'a> {
    pub fn new(rules: &'a RuleRegistry, functions: &'a FunctionRegistry<'a>, config: &'a InferenceConfig) -> Self {
        Self {
            rules,
            functions,
            config,
            cache: ExpansionCache::new(),
            stats: InferenceStats::default(),
            depth: 0,
        }
    }

    pub fn stats(&self) -> &InferenceStats {
        &self.stats
    }

    pub fn cache(&self) -> &ExpansionCache {
        &self.cache
    }

    /// Infer `graph` into `scope`. Formal inputs are bound positionally from `bindings`;
    /// with no bindings they keep their declared types.
    pub fn infer_graph(
        &mut self,
        graph: &Graph,
        opsets: &OpsetImports,
        scope: &mut Scope<'_>,
        bindings: &[Binding],
    ) -> Result<GraphOutcome> {
        debug!(graph = %graph.name, nodes = graph.nodes.len(), depth = self.depth, "inferring graph");
        self.bind_inputs(graph, scope, bindings)?;
        for (name, data) in &graph.initializers {
            if scope.is_local(name) {
                continue;
            }
            let (ty, kept) = self.reconcile(name, graph.declared_type(name), Some(data.value_type()))?;
            scope.define(name, ty);
            if kept {
                scope.values_mut().insert(name, data.clone());
            }
        }

        for index in graph.topological_order()? {
            let node = &graph.nodes[index];
            self.infer_node(node, graph, opsets, scope)
                .map_err(|err| err.in_node(node))?;
        }

        let mut outputs = Vec::with_capacity(graph.outputs.len());
        let mut output_values = Vec::with_capacity(graph.outputs.len());
        for output in &graph.outputs {
            let ty = scope.lookup(&output.name).ok_or_else(|| {
                InferenceError::InvalidGraph(format!(
                    "output '{}' of graph '{}' is never defined",
                    output.name, graph.name
                ))
            })?;
            let (ty, kept) = self.reconcile(&output.name, output.ty.as_ref(), ty.cloned())?;
            outputs.push(ty);
            output_values.push(scope.value(&output.name).filter(|_| kept).cloned());
        }
        debug!(graph = %graph.name, values = scope.values().len(), "graph inferred");
        Ok(GraphOutcome { outputs, output_values })
    }

    fn bind_inputs(&self, graph: &Graph, scope: &mut Scope<'_>, bindings: &[Binding]) -> Result<()> {
        if !bindings.is_empty() && bindings.len() != graph.inputs.len() {
            return Err(InferenceError::InvalidGraph(format!(
                "graph '{}' takes {} inputs, {} were bound",
                graph.name,
                graph.inputs.len(),
                bindings.len()
            )));
        }
        for (index, input) in graph.inputs.iter().enumerate() {
            let binding = bindings.get(index);
            let (ty, kept) = self.reconcile(&input.name, input.ty.as_ref(), binding.and_then(|b| b.ty.clone()))?;
            scope.define(&input.name, ty);
            if let Some(value) = binding.and_then(|b| b.value.clone()).filter(|_| kept) {
                scope.values_mut().insert(&input.name, value);
            }
        }
        Ok(())
    }

    /// Merge an inferred type into a declared one. The flag is false when a conflicting
    /// declaration replaced the inferred type, so a partial value computed for it no longer applies.
    fn reconcile(&self, name: &str, declared: Option<&Type>, inferred: Option<Type>) -> Result<(Option<Type>, bool)> {
        match refine_option(declared, inferred.as_ref()) {
            Ok(ty) => Ok((ty, true)),
            Err(err) if self.config.check_declared_types => Err(err),
            Err(err) => {
                debug!(value = name, %err, "declared type overrides the inferred one");
                Ok((declared.cloned(), false))
            }
        }
    }

    fn infer_node(&mut self, node: &Node, graph: &Graph, opsets: &OpsetImports, scope: &mut Scope<'_>) -> Result<()> {
        let dispatched = {
            let inputs = node
                .inputs
                .iter()
                .map(|input| match input {
                    None => Ok(RuleInput::default()),
                    Some(name) => match scope.lookup(name) {
                        None => Err(InferenceError::InvalidGraph(format!(
                            "value '{name}' is read but never defined"
                        ))),
                        Some(ty) => Ok(RuleInput {
                            name: Some(name.as_str()),
                            ty,
                            value: scope.value(name),
                        }),
                    },
                })
                .collect::<Result<Vec<_>>>()?;
            let ctx = RuleContext::new(node, opset_version(opsets, &node.domain), inputs);
            self.dispatch(&ctx, opsets, scope)?
        };
        self.stats.nodes += 1;

        let Dispatched { mut types, values, cost } = dispatched;
        types.resize(node.outputs.len(), None);
        trace!(
            node = %node.display_name(),
            outputs = ?types.iter().map(|ty| ty.as_ref().map_or_else(|| "?".to_string(), Type::to_string)).collect::<Vec<_>>(),
            "node inferred"
        );

        let charged = !values.iter().any(Option::is_some) || scope.values_mut().charge(cost);
        for (index, output) in node.outputs.iter().enumerate() {
            let Some(name) = output else {
                continue;
            };
            let (ty, kept) = self.reconcile(name, graph.declared_type(name), types[index].take())?;
            scope.define(name, ty);
            if let Some(Some(value)) = values.get(index) {
                if charged && kept {
                    scope.values_mut().insert(name, value.clone());
                }
            }
        }
        Ok(())
    }

    fn dispatch(&mut self, ctx: &RuleContext<'_>, opsets: &OpsetImports, scope: &Scope<'_>) -> Result<Dispatched> {
        let node = ctx.node;
        let default_domain = normalize_domain(&node.domain).is_empty();
        if default_domain && is_control_flow(&node.op_type) {
            let max_iterations = self.config.max_loop_iterations;
            let mut runner = |graph: &Graph, inputs: &[Option<Type>]| self.infer_subgraph(graph, inputs, opsets, scope);
            let types = match node.op_type.as_str() {
                "If" => infer_if(ctx, &mut runner)?,
                _ => infer_loop(ctx, &mut runner, max_iterations)?,
            };
            return Ok(Dispatched::types(types));
        }

        if let Some(function) = self.functions.resolve(&node.domain, &node.op_type, opsets) {
            return self.expand_call(function, ctx, opsets);
        }

        let rule = match self.rules.lookup(&node.domain, &node.op_type, ctx.version) {
            Ok(rule) => rule,
            Err(err @ InferenceError::UnknownOperator { .. }) if !self.config.strict_mode => {
                warn!(node = %node.display_name(), "{err}; outputs left unknown");
                return Ok(Dispatched::types(vec![None; ctx.num_outputs()]));
            }
            Err(err) => return Err(err),
        };
        let types = rule.infer(ctx)?;

        let env = scope.values();
        if !env.can_evaluate() || !is_allowed(&node.domain, &node.op_type) {
            return Ok(Dispatched::types(types));
        }
        let Some(value) = evaluate(ctx, &types, env.max_elements()) else {
            return Ok(Dispatched::types(types));
        };
        let cost = ctx.inputs.iter().filter_map(|input| input.value).map(TensorData::len).sum::<usize>() + 1;
        Ok(Dispatched {
            types,
            values: vec![Some(value)],
            cost,
        })
    }

    /// Nesting guard for function bodies and subgraphs
    fn enter(&mut self, target: &str) -> Result<()> {
        if self.depth >= self.config.max_recursion_depth {
            return Err(InferenceError::RecursionLimit {
                depth: self.depth + 1,
                limit: self.config.max_recursion_depth,
                target: target.to_string(),
            });
        }
        self.depth += 1;
        Ok(())
    }

    fn leave(&mut self, values: &PartialValueEnv) {
        self.depth -= 1;
        if values.is_exhausted() {
            self.stats.budget_exhausted = true;
        }
    }

    /// A branch or loop body, read-only over the enclosing scopes. Partial values computed
    /// inside stay inside.
    fn infer_subgraph(
        &mut self,
        graph: &Graph,
        inputs: &[Option<Type>],
        opsets: &OpsetImports,
        outer: &Scope<'_>,
    ) -> Result<Vec<Option<Type>>> {
        self.enter(&graph.name)?;
        let mut scope = outer.child(PartialValueEnv::from_config(self.config));
        let bindings: Vec<Binding> = inputs.iter().cloned().map(Binding::of_type).collect();
        let result = self.infer_graph(graph, opsets, &mut scope, &bindings);
        self.leave(scope.values());
        Ok(result?.outputs)
    }

    /// Infer a call to a local function on a body specialized for this call site
    fn expand_call(&mut self, function: &FunctionDef, ctx: &RuleContext<'_>, opsets: &OpsetImports) -> Result<Dispatched> {
        let key = function.key();
        let specialization = specialize(function, ctx.node)?;
        let bindings: Vec<Binding> = specialization
            .bound_inputs
            .iter()
            .map(|&index| Binding {
                ty: ctx.inputs[index].ty.cloned(),
                value: ctx.inputs[index].value.cloned(),
            })
            .collect();

        let body_opsets = function.opset_imports.or_else(opsets);
        let cache_key = ExpansionKey::new(
            key.clone(),
            &specialization.bindings,
            bindings.iter().map(|b| b.ty.clone()).collect(),
            &bindings.iter().map(|b| b.value.as_ref()).collect::<Vec<_>>(),
            &body_opsets,
        );
        if let Some(cache_key) = &cache_key {
            if let Some(hit) = self.cache.get(cache_key) {
                debug!(function = %key, "expansion cache hit");
                return Ok(dispatched_call(hit.clone()));
            }
        }

        self.enter(&key.to_string())?;
        debug!(function = %key, call = %ctx.node.display_name(), depth = self.depth, "expanding call");
        let mut scope = Scope::root(PartialValueEnv::from_config(self.config));
        let result = self.infer_graph(&specialization.graph, &body_opsets, &mut scope, &bindings);
        self.leave(scope.values());
        let outcome = result?;
        self.stats.expansions += 1;

        let expansion = Expansion {
            types: outcome.outputs,
            values: outcome.output_values,
        };
        if let Some(cache_key) = cache_key {
            self.cache.insert(cache_key, expansion.clone());
        }
        Ok(dispatched_call(expansion))
    }
}

fn dispatched_call(expansion: Expansion) -> Dispatched {
    Dispatched {
        types: expansion.types,
        values: expansion.values,
        cost: 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::ir::{Attribute, ElementKind, Model, Shape};

    fn float(dims: &[u64]) -> Type {
        Type::tensor(ElementKind::Float, Shape::known(dims))
    }

    fn run(model: &Model, config: &InferenceConfig) -> Result<(GraphOutcome, InferenceStats)> {
        let rules = RuleRegistry::new();
        let functions = FunctionRegistry::new(&model.functions);
        let mut inferencer = GraphInferencer::new(&rules, &functions, config);
        let mut scope = Scope::root(PartialValueEnv::from_config(config));
        let outcome = inferencer.infer_graph(&model.graph, &model.opset_imports, &mut scope, &[])?;
        Ok((outcome, inferencer.stats().clone()))
    }

    #[test]
    fn test_opset_defaults() {
        let opsets = OpsetImports::new().with("", 13);
        assert_eq!(opset_version(&opsets, "ai.onnx"), 13);
        assert_eq!(opset_version(&OpsetImports::new(), ""), LATEST_DEFAULT_OPSET);
        assert_eq!(opset_version(&OpsetImports::new(), "custom"), 1);
    }

    #[test]
    fn test_dangling_input_is_invalid() {
        let graph = Graph::new("g")
            .with_output("y", None)
            .with_node(Node::new("Relu").with_input("missing").with_output("y"));
        let err = run(&Model::new(graph), &InferenceConfig::default()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidGraph);
        assert_eq!(err.node_path(), vec!["Relu->y"]);
    }

    #[test]
    fn test_branch_reads_outer_scope() {
        let then_branch = Graph::new("then")
            .with_output("t", None)
            .with_node(Node::new("Relu").with_input("x").with_output("t"));
        let else_branch = Graph::new("else")
            .with_output("e", None)
            .with_node(Node::new("Neg").with_input("x").with_output("e"));
        let graph = Graph::new("g")
            .with_input("cond", Type::scalar(ElementKind::Bool))
            .with_input("x", float(&[2, 3]))
            .with_output("y", None)
            .with_node(
                Node::new("If")
                    .with_input("cond")
                    .with_output("y")
                    .with_attr(Attribute::graph("then_branch", then_branch))
                    .with_attr(Attribute::graph("else_branch", else_branch)),
            );
        let (outcome, _) = run(&Model::new(graph), &InferenceConfig::default()).unwrap();
        assert_eq!(outcome.outputs[0], Some(float(&[2, 3])));
    }

    #[test]
    fn test_overridden_declaration_drops_partial_value() {
        let declared = Type::tensor(ElementKind::Int64, Shape::known(&[4]));
        let graph = Graph::new("g")
            .with_input("x", float(&[6]))
            .with_output("y", None)
            .with_value_info("shape", declared.clone())
            .with_node(
                Node::new("Constant")
                    .with_output("shape")
                    .with_attr(Attribute::tensor("value", TensorData::ints(vec![2, 3]))),
            )
            .with_node(Node::new("Reshape").with_inputs(["x", "shape"]).with_output("y"));
        let relaxed = InferenceConfig::default().with_declared_type_checks(false);
        let (outcome, _) = run(&Model::new(graph.clone()), &relaxed).unwrap();
        assert_eq!(outcome.outputs[0].as_ref().map(Type::to_string).as_deref(), Some("float[?,?,?,?]"));

        let err = run(&Model::new(graph), &InferenceConfig::default()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ShapeMismatch);
    }

    #[test]
    fn test_subgraph_depth_limit() {
        let inner = Graph::new("inner")
            .with_output("t", None)
            .with_node(Node::new("Relu").with_input("x").with_output("t"));
        let graph = Graph::new("g")
            .with_input("cond", Type::scalar(ElementKind::Bool))
            .with_input("x", float(&[2]))
            .with_output("y", None)
            .with_node(
                Node::new("If")
                    .with_input("cond")
                    .with_output("y")
                    .with_attr(Attribute::graph("then_branch", inner.clone()))
                    .with_attr(Attribute::graph("else_branch", inner)),
            );
        let config = InferenceConfig::default().with_max_recursion_depth(0);
        let err = run(&Model::new(graph), &config).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::RecursionLimit);
    }

    #[test]
    fn test_unknown_operator_degrades() {
        let graph = Graph::new("g")
            .with_input("x", float(&[2]))
            .with_output("y", None)
            .with_node(Node::new("Mystery").in_domain("vendor").with_input("x").with_output("y"));
        let model = Model::new(graph);
        let (outcome, stats) = run(&model, &InferenceConfig::default()).unwrap();
        assert_eq!(outcome.outputs, vec![None]);
        assert_eq!(stats.nodes, 1);

        let err = run(&model, &InferenceConfig::default().strict()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnknownOperator);
    }

    #[test]
    fn test_declared_type_conflict() {
        let graph = Graph::new("g")
            .with_input("x", float(&[2]))
            .with_output("y", float(&[3]))
            .with_node(Node::new("Relu").with_input("x").with_output("y"));
        let model = Model::new(graph);
        let err = run(&model, &InferenceConfig::default()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ShapeMismatch);

        let relaxed = InferenceConfig::default().with_declared_type_checks(false);
        let (outcome, _) = run(&model, &relaxed).unwrap();
        assert_eq!(outcome.outputs[0], Some(float(&[3])));
    }
}
