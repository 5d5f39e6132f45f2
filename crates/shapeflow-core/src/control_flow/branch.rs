//! `If` and `Loop`
//!
//! Subgraphs are inferred through a [`SubgraphRunner`], which the driver implements on top of
//! its scope chain. Branch outputs are merged with [`merge_all`]; loop-carried types are merged
//! with the incoming types until they stop changing.

use super::merge::merge_all;
use crate::error::{InferenceError, Result};
use crate::ir::{Dim, ElementKind, Graph, Shape, Type};
use crate::rules::{RuleContext, RuleOutput};
use tracing::{debug, warn};

/// Infers a subgraph against the current scope, given types for its formal inputs
pub trait SubgraphRunner {
    fn run(&mut self, graph: &Graph, inputs: &[Option<Type>]) -> Result<Vec<Option<Type>>>;
}

impl<F> SubgraphRunner for F
where
    F: FnMut(&Graph, &[Option<Type>]) -> Result<Vec<Option<Type>>>,
{
    fn run(&mut self, graph: &Graph, inputs: &[Option<Type>]) -> Result<Vec<Option<Type>>> {
        self(graph, inputs)
    }
}

/// Run a subgraph and check it yielded one type per declared output
fn run_checked(runner: &mut impl SubgraphRunner, graph: &Graph, inputs: &[Option<Type>]) -> Result<Vec<Option<Type>>> {
    let outputs = runner.run(graph, inputs)?;
    if outputs.len() != graph.outputs.len() {
        return Err(InferenceError::InvalidGraph(format!(
            "subgraph '{}' yielded {} outputs, expected {}",
            graph.name,
            outputs.len(),
            graph.outputs.len()
        )));
    }
    Ok(outputs)
}

/// Whether a default-domain operator is handled here instead of by a rule
pub fn is_control_flow(op_type: &str) -> bool {
    matches!(op_type, "If" | "Loop")
}

fn expect_bool_scalar(ctx: &RuleContext<'_>, index: usize, what: &str) -> Result<()> {
    match ctx.input_type(index)? {
        Some(Type::Tensor(tensor)) if tensor.elem != ElementKind::Bool => Err(InferenceError::TypeMismatch(format!(
            "{} {what} must be bool, found {}",
            ctx.op(),
            tensor.elem
        ))),
        Some(Type::Tensor(tensor)) if tensor.shape.num_elements().is_some_and(|n| n != 1) => {
            Err(InferenceError::ShapeMismatch(format!(
                "{} {what} must hold a single element, found shape {}",
                ctx.op(),
                tensor.shape
            )))
        }
        Some(other @ (Type::Optional(_) | Type::Sequence(_))) => Err(InferenceError::TypeMismatch(format!(
            "{} {what} must be a tensor, found {other}",
            ctx.op()
        ))),
        _ => Ok(()),
    }
}

/// `If(cond) then_branch else_branch`
pub fn infer_if(ctx: &RuleContext<'_>, runner: &mut impl SubgraphRunner) -> Result<RuleOutput> {
    expect_bool_scalar(ctx, 0, "condition")?;
    let branches = [
        ctx.node.require_graph("then_branch")?,
        ctx.node.require_graph("else_branch")?,
    ];

    let mut results = Vec::with_capacity(branches.len());
    for branch in branches {
        if branch.outputs.len() != ctx.num_outputs() {
            return Err(InferenceError::InvalidGraph(format!(
                "branch '{}' has {} outputs but If has {}",
                branch.name,
                branch.outputs.len(),
                ctx.num_outputs()
            )));
        }
        results.push(run_checked(runner, branch, &[])?);
    }

    (0..ctx.num_outputs())
        .map(|position| {
            merge_all(results.iter().map(|outputs| outputs[position].as_ref())).map_err(|err| {
                InferenceError::TypeMismatch(format!("If branches disagree on output #{position}: {err}"))
            })
        })
        .collect()
}

/// `Loop(M?, cond?, v_initial...) body`.
///
/// The body takes `(iteration, condition, carried...)` and yields
/// `(condition, carried..., scan...)`. Scan outputs gain a leading dimension, which is
/// concrete only when the trip count is known and no condition can end the loop early.
pub fn infer_loop(ctx: &RuleContext<'_>, runner: &mut impl SubgraphRunner, max_iterations: usize) -> Result<RuleOutput> {
    let body = ctx.node.require_graph("body")?;
    if ctx.is_present(1) {
        expect_bool_scalar(ctx, 1, "condition")?;
    }
    let carried_count = ctx.num_inputs().saturating_sub(2);
    if body.inputs.len() != carried_count + 2 {
        return Err(InferenceError::InvalidGraph(format!(
            "loop body '{}' takes {} inputs, expected {}",
            body.name,
            body.inputs.len(),
            carried_count + 2
        )));
    }
    if body.outputs.len() < carried_count + 1 {
        return Err(InferenceError::InvalidGraph(format!(
            "loop body '{}' yields {} outputs, expected at least {}",
            body.name,
            body.outputs.len(),
            carried_count + 1
        )));
    }
    let scan_count = body.outputs.len() - carried_count - 1;
    if ctx.num_outputs() > carried_count + scan_count {
        return Err(InferenceError::InvalidGraph(format!(
            "Loop has {} outputs but its body yields only {}",
            ctx.num_outputs(),
            carried_count + scan_count
        )));
    }

    let mut carried: Vec<Option<Type>> = (0..carried_count)
        .map(|i| ctx.inputs[i + 2].ty.cloned())
        .collect();
    let mut outputs = Vec::new();
    let mut converged = false;
    for iteration in 1..=max_iterations.max(1) {
        let mut inputs = vec![
            Some(Type::scalar(ElementKind::Int64)),
            Some(Type::scalar(ElementKind::Bool)),
        ];
        inputs.extend(carried.iter().cloned());
        outputs = run_checked(runner, body, &inputs)?;

        let next = carried
            .iter()
            .zip(&outputs[1..=carried_count])
            .enumerate()
            .map(|(i, (before, after))| {
                merge_all([before.as_ref(), after.as_ref()]).map_err(|err| {
                    InferenceError::TypeMismatch(format!("loop-carried value #{i} changes type: {err}"))
                })
            })
            .collect::<Result<Vec<_>>>()?;
        debug!(iteration, changed = next != carried, "loop fixed-point iteration");
        if next == carried {
            converged = true;
            break;
        }
        carried = next;
    }
    if !converged {
        warn!(
            node = %ctx.node.display_name(),
            iterations = max_iterations,
            "loop-carried types did not reach a fixed point; keeping the last merge"
        );
    }

    let trip_count = match (ctx.is_present(1), ctx.value(0).and_then(|v| v.scalar_i64())) {
        (false, Some(count)) if count >= 0 => Dim::Known(count as u64),
        _ => Dim::Unknown,
    };
    let scans = outputs[carried_count + 1..]
        .iter()
        .map(|ty| stack(ty.as_ref(), &trip_count))
        .collect::<Result<Vec<_>>>()?;

    let mut result: RuleOutput = carried;
    result.extend(scans);
    result.truncate(ctx.num_outputs());
    Ok(result)
}

/// Type of a scan output: per-iteration values stacked along a new leading axis
fn stack(ty: Option<&Type>, leading: &Dim) -> Result<Option<Type>> {
    match ty {
        None => Ok(None),
        Some(Type::Tensor(tensor)) => {
            let shape = match &tensor.shape {
                Shape::Unranked => Shape::Unranked,
                Shape::Ranked(dims) => Shape::from_dims(std::iter::once(leading.clone()).chain(dims.iter().cloned())),
            };
            Ok(Some(Type::tensor(tensor.elem, shape)))
        }
        Some(other) => Err(InferenceError::TypeMismatch(format!(
            "scan outputs of a loop must be tensors, found {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::ir::{Attribute, Node, TensorData};
    use crate::rules::RuleInput;

    fn float(dims: &[u64]) -> Type {
        Type::tensor(ElementKind::Float, Shape::known(dims))
    }

    fn branch(name: &str) -> Graph {
        Graph::new(name).with_output(&format!("{name}_out"), None)
    }

    fn if_node() -> Node {
        Node::new("If")
            .with_input("cond")
            .with_output("y")
            .with_attr(Attribute::graph("then_branch", branch("then")))
            .with_attr(Attribute::graph("else_branch", branch("else")))
    }

    fn context<'a>(node: &'a Node, types: &'a [Option<Type>], values: &'a [Option<TensorData>]) -> RuleContext<'a> {
        let inputs = (0..node.inputs.len())
            .map(|i| RuleInput {
                name: node.input(i),
                ty: types.get(i).and_then(Option::as_ref),
                value: values.get(i).and_then(Option::as_ref),
            })
            .collect();
        RuleContext::new(node, 18, inputs)
    }

    #[test]
    fn test_if_merges_branch_outputs() {
        let node = if_node();
        let types = [Some(Type::scalar(ElementKind::Bool))];
        let ctx = context(&node, &types, &[]);
        let mut runner = |graph: &Graph, _: &[Option<Type>]| -> Result<Vec<Option<Type>>> {
            Ok(vec![Some(if graph.name == "then" { float(&[2, 3]) } else { float(&[2, 5]) })])
        };
        let out = infer_if(&ctx, &mut runner).unwrap();
        assert_eq!(out[0].as_ref().unwrap().to_string(), "float[2,?]");
    }

    #[test]
    fn test_if_branch_kind_conflict() {
        let node = if_node();
        let ctx = context(&node, &[], &[]);
        let mut runner = |graph: &Graph, _: &[Option<Type>]| -> Result<Vec<Option<Type>>> {
            let elem = if graph.name == "then" { ElementKind::Int32 } else { ElementKind::Int64 };
            Ok(vec![Some(Type::scalar(elem))])
        };
        assert_eq!(infer_if(&ctx, &mut runner).unwrap_err().kind(), ErrorKind::TypeMismatch);
    }

    #[test]
    fn test_if_condition_must_be_bool() {
        let node = if_node();
        let types = [Some(float(&[]))];
        let ctx = context(&node, &types, &[]);
        let mut runner = |_: &Graph, _: &[Option<Type>]| -> Result<Vec<Option<Type>>> { Ok(vec![None]) };
        assert_eq!(infer_if(&ctx, &mut runner).unwrap_err().kind(), ErrorKind::TypeMismatch);
    }

    #[test]
    fn test_if_branch_arity() {
        let node = if_node().with_output("z");
        let ctx = context(&node, &[], &[]);
        let mut runner = |_: &Graph, _: &[Option<Type>]| -> Result<Vec<Option<Type>>> { Ok(vec![None]) };
        assert_eq!(infer_if(&ctx, &mut runner).unwrap_err().kind(), ErrorKind::InvalidGraph);
    }

    fn loop_node() -> Node {
        let body = Graph::new("body")
            .with_input("i", None)
            .with_input("c", None)
            .with_input("acc", None)
            .with_output("c_out", None)
            .with_output("acc_out", None)
            .with_output("scan", None);
        Node::new("Loop")
            .with_inputs(["M", "", "acc0"])
            .with_outputs(["acc_final", "scanned"])
            .with_attr(Attribute::graph("body", body))
    }

    #[test]
    fn test_loop_reaches_fixed_point() {
        let node = loop_node();
        let types = [Some(Type::scalar(ElementKind::Int64)), None, Some(float(&[4]))];
        let values = [Some(TensorData::int_scalar(5))];
        let ctx = context(&node, &types, &values);
        let mut calls = 0;
        let mut runner = |_: &Graph, inputs: &[Option<Type>]| -> Result<Vec<Option<Type>>> {
            calls += 1;
            Ok(vec![Some(Type::scalar(ElementKind::Bool)), inputs[2].clone(), Some(float(&[3]))])
        };
        let out = infer_loop(&ctx, &mut runner, 8).unwrap();
        assert_eq!(out[0].as_ref().unwrap().to_string(), "float[4]");
        assert_eq!(out[1].as_ref().unwrap().to_string(), "float[5,3]");
        assert_eq!(calls, 1);
    }

    #[test]
    fn test_loop_widens_growing_carried_value() {
        let node = loop_node();
        let types = [None, None, Some(float(&[1]))];
        let ctx = context(&node, &types, &[]);
        let mut runner = |_: &Graph, inputs: &[Option<Type>]| -> Result<Vec<Option<Type>>> {
            let grown = match inputs[2].as_ref().and_then(Type::shape).and_then(Shape::concrete) {
                Some(dims) => float(&[dims[0] + 1]),
                None => Type::tensor(ElementKind::Float, Shape::of_rank(1)),
            };
            Ok(vec![None, Some(grown), None])
        };
        let out = infer_loop(&ctx, &mut runner, 8).unwrap();
        assert_eq!(out[0].as_ref().unwrap().to_string(), "float[?]");
        assert_eq!(out[1], None);
    }

    #[test]
    fn test_loop_body_arity() {
        let node = Node::new("Loop")
            .with_inputs(["M", ""])
            .with_output("y")
            .with_attr(Attribute::graph("body", Graph::new("body").with_output("c", None)));
        let ctx = context(&node, &[], &[]);
        let mut runner = |_: &Graph, _: &[Option<Type>]| -> Result<Vec<Option<Type>>> { Ok(vec![None]) };
        assert_eq!(infer_loop(&ctx, &mut runner, 8).unwrap_err().kind(), ErrorKind::InvalidGraph);
    }
}
