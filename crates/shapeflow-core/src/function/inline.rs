//! Model-wide inlining of local functions
//!
//! Every call to a model-local function is replaced by a renamed copy of its specialized
//! body, recursively, after which the model no longer needs its function library.

use super::registry::FunctionRegistry;
use super::specialize::{bind_attributes, check_arity, substitute_attributes};
use crate::error::{InferenceError, Result};
use crate::ir::{FunctionDef, Graph, Model, Node, OpsetImports, Type};
use std::collections::{HashMap, HashSet};
use tracing::debug;

/// Hands out names that do not clash with anything already in the model
#[derive(Debug, Default)]
pub struct NameGenerator {
    used: HashSet<String>,
    call_sites: usize,
}

impl NameGenerator {
    /// Seeded with every name in the model's main graph, nested subgraphs included
    pub fn for_model(model: &Model) -> Self {
        let mut names = Self::default();
        names.reserve_graph(&model.graph);
        names
    }

    fn reserve_graph(&mut self, graph: &Graph) {
        self.used.extend(graph.inputs.iter().map(|info| info.name.clone()));
        self.used.extend(graph.outputs.iter().map(|info| info.name.clone()));
        self.used.extend(graph.initializers.keys().cloned());
        self.used.extend(graph.value_info.keys().cloned());
        for node in &graph.nodes {
            if !node.name.is_empty() {
                self.used.insert(node.name.clone());
            }
            self.used.extend(node.inputs.iter().flatten().cloned());
            self.used.extend(node.outputs.iter().flatten().cloned());
            for subgraph in node.subgraphs() {
                self.reserve_graph(subgraph);
            }
        }
    }

    pub fn is_used(&self, name: &str) -> bool {
        self.used.contains(name)
    }

    /// Number identifying the next call site
    pub fn call_site(&mut self) -> usize {
        self.call_sites += 1;
        self.call_sites
    }

    /// `candidate`, or `candidate_<k>` for the first free `k`
    pub fn unique(&mut self, candidate: String) -> String {
        let mut name = candidate.clone();
        let mut k = 1;
        while self.used.contains(&name) {
            name = format!("{candidate}_{k}");
            k += 1;
        }
        self.used.insert(name.clone());
        name
    }
}

/// Renames one instantiated body. A name maps to its replacement, or to `None` when it
/// stands for an input the call omits.
struct Renamer<'n> {
    names: &'n mut NameGenerator,
    site: usize,
    map: HashMap<String, Option<String>>,
}

impl Renamer<'_> {
    fn fresh(&mut self, name: &str) -> String {
        self.names.unique(format!("{name}__{}", self.site))
    }

    fn define(&mut self, name: &str) {
        let renamed = self.fresh(name);
        self.map.insert(name.to_string(), Some(renamed));
    }

    fn rename(&self, name: &str) -> Option<String> {
        match self.map.get(name) {
            Some(mapped) => mapped.clone(),
            None => Some(name.to_string()),
        }
    }

    fn rename_nodes(&mut self, nodes: &mut [Node]) {
        for node in nodes.iter() {
            for output in node.outputs.iter().flatten() {
                if !self.map.contains_key(output) {
                    self.define(output);
                }
            }
        }
        for node in nodes.iter_mut() {
            if !node.name.is_empty() {
                node.name = self.fresh(&node.name);
            }
            for input in node.inputs.iter_mut() {
                if let Some(name) = input.take() {
                    *input = self.rename(&name);
                }
            }
            for output in node.outputs.iter_mut() {
                if let Some(name) = output.take() {
                    *output = self.rename(&name);
                }
            }
            for attr in node.attributes.iter_mut() {
                for graph in attr.subgraphs_mut() {
                    self.rename_subgraph(graph);
                }
            }
        }
    }

    /// Names a subgraph defines shadow outer ones and are renamed in a nested scope
    fn rename_subgraph(&mut self, graph: &mut Graph) {
        let outer = self.map.clone();
        for name in graph.defined_values() {
            self.define(&name);
        }
        for input in graph.inputs.iter_mut() {
            if let Some(Some(renamed)) = self.map.get(&input.name) {
                input.name = renamed.clone();
            }
        }
        graph.initializers = std::mem::take(&mut graph.initializers)
            .into_iter()
            .map(|(name, data)| (self.rename(&name).unwrap_or(name), data))
            .collect();
        self.rename_nodes(&mut graph.nodes);
        for output in graph.outputs.iter_mut() {
            if let Some(Some(renamed)) = self.map.get(&output.name) {
                output.name = renamed.clone();
            }
        }
        graph.value_info = std::mem::take(&mut graph.value_info)
            .into_iter()
            .map(|(name, ty)| (self.rename(&name).unwrap_or(name), ty))
            .collect();
        self.map = outer;
    }
}

/// A renamed copy of `function`'s body for `call`, with the body's declared value types
pub fn instantiate(
    function: &FunctionDef,
    call: &Node,
    names: &mut NameGenerator,
) -> Result<(Vec<Node>, Vec<(String, Type)>)> {
    check_arity(function, call)?;
    let mut nodes = function.nodes.clone();
    substitute_attributes(&mut nodes, &bind_attributes(function, call))?;

    let site = names.call_site();
    let mut renamer = Renamer {
        names,
        site,
        map: HashMap::new(),
    };
    for (index, formal) in function.inputs.iter().enumerate() {
        renamer.map.insert(formal.clone(), call.input(index).map(str::to_string));
    }
    let mut passthrough = Vec::new();
    for (index, formal) in function.outputs.iter().enumerate() {
        let call_output = call.output(index);
        if let Some(input) = function.inputs.iter().position(|name| name == formal) {
            // An output that is also an input keeps the input's binding inside the body.
            if let (Some(source), Some(target)) = (call.input(input), call_output) {
                passthrough.push(Node::new("Identity").with_input(source).with_output(target));
            }
            continue;
        }
        let actual = match call_output {
            Some(actual) => actual.to_string(),
            None => renamer.fresh(formal),
        };
        renamer.map.insert(formal.clone(), Some(actual));
    }
    renamer.rename_nodes(&mut nodes);
    nodes.splice(0..0, passthrough);

    let value_info = function
        .value_info
        .iter()
        .filter_map(|(name, ty)| renamer.rename(name).map(|renamed| (renamed, ty.clone())))
        .collect();
    Ok((nodes, value_info))
}

struct Inliner<'a, 'm> {
    registry: &'a FunctionRegistry<'m>,
    names: NameGenerator,
    max_depth: usize,
    inlined: usize,
    imports: OpsetImports,
    value_info: Vec<(String, Type)>,
}

impl Inliner<'_, '_> {
    fn inline_graph(&mut self, graph: &mut Graph, opsets: &OpsetImports, depth: usize) -> Result<()> {
        let outer = std::mem::take(&mut self.value_info);
        graph.nodes = self.inline_nodes(std::mem::take(&mut graph.nodes), opsets, depth)?;
        for (name, ty) in std::mem::replace(&mut self.value_info, outer) {
            graph.value_info.entry(name).or_insert(ty);
        }
        Ok(())
    }

    fn inline_nodes(&mut self, nodes: Vec<Node>, opsets: &OpsetImports, depth: usize) -> Result<Vec<Node>> {
        let mut inlined = Vec::with_capacity(nodes.len());
        for mut node in nodes {
            for attr in node.attributes.iter_mut() {
                for graph in attr.subgraphs_mut() {
                    self.inline_graph(graph, opsets, depth)?;
                }
            }
            let Some(function) = self.registry.resolve(&node.domain, &node.op_type, opsets) else {
                inlined.push(node);
                continue;
            };
            if depth >= self.max_depth {
                return Err(InferenceError::RecursionLimit {
                    depth: depth + 1,
                    limit: self.max_depth,
                    target: function.key().to_string(),
                }
                .in_node(&node));
            }
            let (body, value_info) =
                instantiate(function, &node, &mut self.names).map_err(|err| err.in_node(&node))?;
            debug!(function = %function.key(), call = %node.display_name(), depth, "inlining call");
            for (domain, version) in function.opset_imports.iter() {
                if self.imports.version(domain).is_none() {
                    self.imports.insert(domain, version);
                }
            }
            let body_opsets = function.opset_imports.or_else(opsets);
            let body = self
                .inline_nodes(body, &body_opsets, depth + 1)
                .map_err(|err| err.in_node(&node))?;
            inlined.extend(body);
            self.value_info.extend(value_info);
            self.inlined += 1;
        }
        Ok(inlined)
    }
}

/// Replace every call to a model-local function with its body and clear the function list.
///
/// Returns the number of calls inlined. On failure the model is left unchanged.
pub fn inline_local_functions(model: &mut Model, max_depth: usize) -> Result<usize> {
    if model.functions.is_empty() {
        return Ok(0);
    }
    let (graph, inlined, imports) = {
        let registry = FunctionRegistry::new(&model.functions);
        let mut inliner = Inliner {
            registry: &registry,
            names: NameGenerator::for_model(model),
            max_depth,
            inlined: 0,
            imports: OpsetImports::new(),
            value_info: Vec::new(),
        };
        let mut graph = model.graph.clone();
        inliner.inline_graph(&mut graph, &model.opset_imports, 0)?;
        (graph, inliner.inlined, inliner.imports)
    };

    model.graph = graph;
    model.functions.clear();
    for (domain, version) in imports.iter() {
        if model.opset_imports.version(domain).is_none() {
            model.opset_imports.insert(domain, version);
        }
    }
    debug!(inlined, "local functions inlined");
    Ok(inlined)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::ir::{Attribute, AttributeKind, ElementKind, Shape};

    fn float(dims: &[u64]) -> Type {
        Type::tensor(ElementKind::Float, Shape::known(dims))
    }

    fn square_plus() -> FunctionDef {
        FunctionDef::new("local", "square_plus")
            .with_inputs(["x", "y"])
            .with_outputs(["z"])
            .with_node(Node::new("Mul").named("mul").with_inputs(["x", "x"]).with_output("sq"))
            .with_node(Node::new("Add").with_inputs(["sq", "y"]).with_output("z"))
    }

    #[test]
    fn test_inline_renames_body_values() {
        let graph = Graph::new("main")
            .with_input("a", float(&[2]))
            .with_input("b", float(&[2]))
            .with_output("c", None)
            .with_node(Node::new("square_plus").in_domain("local").with_inputs(["a", "b"]).with_output("c"))
            .with_node(Node::new("Relu").with_input("c").with_output("sq"));
        let mut model = Model::new(graph).with_opset("", 18).with_opset("local", 1).with_function(square_plus());

        assert_eq!(inline_local_functions(&mut model, 8).unwrap(), 1);
        assert!(model.functions.is_empty());
        let nodes = &model.graph.nodes;
        assert_eq!(nodes.len(), 3);
        assert_eq!(nodes[0].name, "mul__1");
        assert_eq!(nodes[0].inputs, vec![Some("a".to_string()), Some("a".to_string())]);
        assert_eq!(nodes[0].outputs, vec![Some("sq__1".to_string())]);
        assert_eq!(nodes[1].inputs, vec![Some("sq__1".to_string()), Some("b".to_string())]);
        assert_eq!(nodes[1].outputs, vec![Some("c".to_string())]);
    }

    #[test]
    fn test_inline_nested_calls_and_attributes() {
        let inner = FunctionDef::new("local", "cast")
            .with_inputs(["x"])
            .with_outputs(["y"])
            .with_attributes(["to"])
            .with_node(
                Node::new("Cast")
                    .with_input("x")
                    .with_output("y")
                    .with_attr(Attribute::reference("to", "to", AttributeKind::Int)),
            );
        let outer = FunctionDef::new("local", "wrap")
            .with_inputs(["x"])
            .with_outputs(["y"])
            .with_attributes(["target"])
            .with_node(
                Node::new("cast")
                    .in_domain("local")
                    .with_input("x")
                    .with_output("t")
                    .with_attr(Attribute::reference("to", "target", AttributeKind::Int)),
            )
            .with_node(Node::new("Identity").with_input("t").with_output("y"));
        let graph = Graph::new("main")
            .with_input("a", float(&[2]))
            .with_output("b", None)
            .with_node(
                Node::new("wrap")
                    .in_domain("local")
                    .with_input("a")
                    .with_output("b")
                    .with_attr(Attribute::int("target", 6)),
            );
        let mut model = Model::new(graph).with_function(inner).with_function(outer);

        assert_eq!(inline_local_functions(&mut model, 8).unwrap(), 2);
        let nodes = &model.graph.nodes;
        assert_eq!(nodes.len(), 2);
        assert_eq!(nodes[0].op_type, "Cast");
        assert_eq!(nodes[0].attr_int("to").unwrap(), Some(6));
        assert_eq!(nodes[0].inputs, vec![Some("a".to_string())]);
        assert_eq!(nodes[1].outputs, vec![Some("b".to_string())]);
        assert_eq!(nodes[0].outputs, nodes[1].inputs);
    }

    #[test]
    fn test_omitted_output_gets_fresh_name() {
        let graph = Graph::new("main")
            .with_input("a", float(&[2]))
            .with_node(Node::new("square_plus").in_domain("local").with_inputs(["a", "a"]));
        let mut model = Model::new(graph).with_function(square_plus());
        inline_local_functions(&mut model, 8).unwrap();
        assert_eq!(model.graph.nodes[1].outputs, vec![Some("z__1".to_string())]);
    }

    #[test]
    fn test_output_named_like_an_input_is_copied() {
        let tee = FunctionDef::new("local", "tee")
            .with_inputs(["x"])
            .with_outputs(["y", "x"])
            .with_node(Node::new("Relu").with_input("x").with_output("y"));
        let graph = Graph::new("main")
            .with_input("a", float(&[2]))
            .with_output("b", None)
            .with_output("c", None)
            .with_node(Node::new("tee").in_domain("local").with_input("a").with_outputs(["b", "c"]));
        let mut model = Model::new(graph).with_function(tee);

        assert_eq!(inline_local_functions(&mut model, 8).unwrap(), 1);
        let nodes = &model.graph.nodes;
        assert_eq!(nodes.len(), 2);
        assert_eq!(nodes[0].op_type, "Identity");
        assert_eq!(nodes[0].inputs, vec![Some("a".to_string())]);
        assert_eq!(nodes[0].outputs, vec![Some("c".to_string())]);
        assert_eq!(nodes[1].op_type, "Relu");
        assert_eq!(nodes[1].inputs, vec![Some("a".to_string())]);
        assert_eq!(nodes[1].outputs, vec![Some("b".to_string())]);
    }

    #[test]
    fn test_recursive_function_hits_limit() {
        let looping = FunctionDef::new("local", "again")
            .with_inputs(["x"])
            .with_outputs(["y"])
            .with_node(Node::new("again").in_domain("local").with_input("x").with_output("y"));
        let graph = Graph::new("main")
            .with_input("a", float(&[1]))
            .with_output("b", None)
            .with_node(Node::new("again").in_domain("local").with_input("a").with_output("b"));
        let mut model = Model::new(graph).with_function(looping);
        let before = model.clone();
        let err = inline_local_functions(&mut model, 4).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::RecursionLimit);
        assert_eq!(model, before);
    }

    #[test]
    fn test_name_generator_avoids_clashes() {
        let graph = Graph::new("main").with_input("t__1", None);
        let mut names = NameGenerator::for_model(&Model::new(graph));
        assert_eq!(names.unique("t__1".to_string()), "t__1_1");
        assert_eq!(names.unique("u".to_string()), "u");
        assert!(names.is_used("u"));
    }
}
