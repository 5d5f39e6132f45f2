//! Per-call-site copies of function bodies
//!
//! A function body is a template. Specializing it for a call produces an independent graph
//! in which every attribute reference holds the call's literal value and formal inputs the
//! call omits are omitted wherever the body reads them. The template is never modified.

use crate::error::{InferenceError, Result};
use crate::ir::{Attribute, AttributeValue, FunctionDef, Graph, Node, ValueInfo};
use indexmap::IndexMap;
use std::collections::HashSet;

/// Formal attribute name to the value bound at a call site
pub type AttributeBindings = IndexMap<String, Attribute>;

/// A function body ready for inference at one call site
#[derive(Debug, Clone)]
pub struct Specialization {
    pub graph: Graph,
    pub bindings: AttributeBindings,
    /// Formal inputs the call supplies, by position
    pub bound_inputs: Vec<usize>,
}

/// Attribute values a call binds: its own attributes for declared parameters, falling back
/// to the definition's defaults. Parameters with neither stay unbound.
pub fn bind_attributes(function: &FunctionDef, call: &Node) -> AttributeBindings {
    let mut bindings = AttributeBindings::new();
    let declared = function
        .attributes
        .iter()
        .map(String::as_str)
        .chain(function.attribute_defaults.iter().map(|attr| attr.name.as_str()));
    for name in declared {
        if bindings.contains_key(name) {
            continue;
        }
        if let Some(bound) = call.attr(name).or_else(|| function.attribute_default(name)) {
            bindings.insert(name.to_string(), bound.clone());
        }
    }
    bindings
}

/// Replace attribute references with bound values, dropping references to unbound parameters
pub fn substitute_attributes(nodes: &mut [Node], bindings: &AttributeBindings) -> Result<()> {
    for node in nodes {
        let mut resolved = Vec::with_capacity(node.attributes.len());
        for mut attr in std::mem::take(&mut node.attributes) {
            if let AttributeValue::Ref { name: target, kind } = &attr.value {
                let Some(bound) = bindings.get(target) else {
                    continue;
                };
                if bound.kind() != *kind {
                    return Err(InferenceError::AttributeMissing {
                        name: target.clone(),
                        expected: *kind,
                    });
                }
                attr.value = bound.value.clone();
            }
            for graph in attr.subgraphs_mut() {
                substitute_attributes(&mut graph.nodes, bindings)?;
            }
            resolved.push(attr);
        }
        node.attributes = resolved;
    }
    Ok(())
}

/// Turn reads of `omitted` into omitted inputs, respecting names a subgraph redefines
fn omit_inputs(nodes: &mut [Node], omitted: &HashSet<String>) {
    for node in nodes {
        for input in node.inputs.iter_mut() {
            if input.as_ref().is_some_and(|name| omitted.contains(name)) {
                *input = None;
            }
        }
        for attr in node.attributes.iter_mut() {
            for graph in attr.subgraphs_mut() {
                let defined = graph.defined_values();
                let visible: HashSet<String> = omitted.iter().filter(|name| !defined.contains(*name)).cloned().collect();
                omit_inputs(&mut graph.nodes, &visible);
            }
        }
    }
}

pub fn check_arity(function: &FunctionDef, call: &Node) -> Result<()> {
    if call.inputs.len() > function.inputs.len() || call.outputs.len() > function.outputs.len() {
        return Err(InferenceError::InvalidGraph(format!(
            "call to {} passes {} inputs and {} outputs, but it declares {} and {}",
            function.key(),
            call.inputs.len(),
            call.outputs.len(),
            function.inputs.len(),
            function.outputs.len()
        )));
    }
    Ok(())
}

/// Build the call-site-local body of `function` for `call`
pub fn specialize(function: &FunctionDef, call: &Node) -> Result<Specialization> {
    check_arity(function, call)?;
    let bindings = bind_attributes(function, call);

    let mut graph = Graph::new(function.key().to_string());
    let mut bound_inputs = Vec::new();
    let mut omitted = HashSet::new();
    for (index, formal) in function.inputs.iter().enumerate() {
        if call.input(index).is_some() {
            graph.inputs.push(ValueInfo::new(formal, None));
            bound_inputs.push(index);
        } else {
            omitted.insert(formal.clone());
        }
    }
    graph.outputs = function.outputs.iter().map(|name| ValueInfo::new(name, None)).collect();
    graph.value_info = function.value_info.clone();
    graph.nodes = function.nodes.clone();

    substitute_attributes(&mut graph.nodes, &bindings)?;
    if !omitted.is_empty() {
        omit_inputs(&mut graph.nodes, &omitted);
    }
    Ok(Specialization {
        graph,
        bindings,
        bound_inputs,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::ir::AttributeKind;

    fn cast_function() -> FunctionDef {
        FunctionDef::new("local", "cast_to")
            .with_inputs(["x", "y"])
            .with_outputs(["z"])
            .with_attributes(["to"])
            .with_node(
                Node::new("Cast")
                    .with_input("x")
                    .with_output("t")
                    .with_attr(Attribute::reference("to", "to", AttributeKind::Int)),
            )
            .with_node(Node::new("Add").with_inputs(["t", "y"]).with_output("z"))
    }

    #[test]
    fn test_references_take_call_values() {
        let function = cast_function();
        let call = Node::new("cast_to")
            .in_domain("local")
            .with_inputs(["a", "b"])
            .with_output("c")
            .with_attr(Attribute::int("to", 6));
        let spec = specialize(&function, &call).unwrap();
        assert_eq!(spec.graph.nodes[0].attr_int("to").unwrap(), Some(6));
        assert!(function.nodes[0].attributes[0].value.is_ref());
        assert_eq!(spec.bound_inputs, vec![0, 1]);
    }

    #[test]
    fn test_unbound_reference_is_dropped() {
        let function = cast_function();
        let call = Node::new("cast_to").with_inputs(["a", "b"]).with_output("c");
        let spec = specialize(&function, &call).unwrap();
        assert!(spec.graph.nodes[0].attributes.is_empty());
    }

    #[test]
    fn test_default_binding() {
        let function = cast_function().with_attribute_default(Attribute::int("to", 7));
        let call = Node::new("cast_to").with_inputs(["a", "b"]).with_output("c");
        let spec = specialize(&function, &call).unwrap();
        assert_eq!(spec.graph.nodes[0].attr_int("to").unwrap(), Some(7));
        assert_eq!(spec.bindings.len(), 1);
    }

    #[test]
    fn test_kind_mismatch() {
        let function = cast_function();
        let call = Node::new("cast_to")
            .with_inputs(["a", "b"])
            .with_output("c")
            .with_attr(Attribute::string("to", "int32"));
        assert_eq!(specialize(&function, &call).unwrap_err().kind(), ErrorKind::AttributeMissing);
    }

    #[test]
    fn test_omitted_formal_becomes_omitted_input() {
        let function = cast_function();
        let call = Node::new("cast_to").with_inputs(["a"]).with_output("c");
        let spec = specialize(&function, &call).unwrap();
        assert_eq!(spec.graph.inputs.len(), 1);
        assert_eq!(spec.graph.nodes[1].inputs, vec![Some("t".to_string()), None]);
    }

    #[test]
    fn test_arity() {
        let function = cast_function();
        let call = Node::new("cast_to").with_inputs(["a", "b", "c"]).with_output("d");
        assert_eq!(specialize(&function, &call).unwrap_err().kind(), ErrorKind::InvalidGraph);
    }
}
