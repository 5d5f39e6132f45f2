//! Reference kernels for the shape-safe operator allow-list
//!
//! A kernel only runs when every input it reads has a known value, and it gives up (returns
//! `None`) instead of failing on anything unusual: unsupported element storage, overflow,
//! division by zero or a result larger than the element cap. Input validation is the rule's
//! job, which always runs first.

use crate::ir::{ElementKind, TensorData, TensorValues, Type};
use crate::rules::{
    constant_data, normalize_axis, range_length, shape_range, slice_bounds, RuleContext,
};

/// Operators with a kernel
pub const ALLOW_LIST: &[&str] = &[
    "Constant",
    "Identity",
    "Cast",
    "Shape",
    "Size",
    "Add",
    "Sub",
    "Mul",
    "Div",
    "Neg",
    "Abs",
    "Concat",
    "Gather",
    "Slice",
    "Squeeze",
    "Unsqueeze",
    "Reshape",
    "Flatten",
    "Range",
    "ConstantOfShape",
];

pub fn is_allowed(domain: &str, op_type: &str) -> bool {
    (domain.is_empty() || domain == "ai.onnx") && ALLOW_LIST.contains(&op_type)
}

/// Evaluate output 0 of an allow-listed node. `outputs` are the types the rule inferred.
pub fn evaluate(ctx: &RuleContext<'_>, outputs: &[Option<Type>], max_elements: usize) -> Option<TensorData> {
    let result = match ctx.op() {
        "Constant" => constant_data(ctx.node).ok().flatten(),
        "Identity" => ctx.value(0).cloned(),
        "Cast" => {
            let elem = ElementKind::from_code(ctx.node.attr_int("to").ok()??)?;
            cast(ctx.value(0)?, elem)
        }
        "Shape" => shape_of(ctx),
        "Size" => {
            let count = ctx.inputs.first()?.ty?.shape()?.num_elements()?;
            Some(TensorData::int_scalar(i64::try_from(count).ok()?))
        }
        "Add" => binary(ctx.value(0)?, ctx.value(1)?, BinaryOp::Add, max_elements),
        "Sub" => binary(ctx.value(0)?, ctx.value(1)?, BinaryOp::Sub, max_elements),
        "Mul" => binary(ctx.value(0)?, ctx.value(1)?, BinaryOp::Mul, max_elements),
        "Div" => binary(ctx.value(0)?, ctx.value(1)?, BinaryOp::Div, max_elements),
        "Neg" => unary(ctx.value(0)?, i64::checked_neg, |x| -x),
        "Abs" => unary(ctx.value(0)?, i64::checked_abs, f64::abs),
        "Concat" => concat(ctx),
        "Gather" => gather(ctx),
        "Slice" => slice(ctx),
        "Squeeze" | "Unsqueeze" | "Reshape" | "Flatten" => relabel(ctx.value(0)?, outputs.first()?.as_ref()?),
        "Range" => range(ctx, max_elements),
        "ConstantOfShape" => constant_of_shape(ctx, max_elements),
        _ => None,
    }?;
    (result.len() <= max_elements).then_some(result)
}

/// Same elements, with the concrete dims of the inferred output type
fn relabel(data: &TensorData, output: &Type) -> Option<TensorData> {
    let dims = output.shape()?.concrete()?;
    data.with_dims(dims.into_iter().map(|d| d as usize).collect())
}

/// Two's-complement truncation of `x` to the width of an integer element kind
fn wrap_int(x: i64, elem: ElementKind) -> i64 {
    match elem {
        ElementKind::Int8 => i64::from(x as i8),
        ElementKind::Uint8 => i64::from(x as u8),
        ElementKind::Int16 => i64::from(x as i16),
        ElementKind::Uint16 => i64::from(x as u16),
        ElementKind::Int32 => i64::from(x as i32),
        ElementKind::Uint32 => i64::from(x as u32),
        _ => x,
    }
}

fn cast(data: &TensorData, elem: ElementKind) -> Option<TensorData> {
    let values = match (&data.values, elem) {
        (TensorValues::Ints(v), e) if e.is_integer() => TensorValues::Ints(v.iter().map(|&x| wrap_int(x, e)).collect()),
        (TensorValues::Ints(v), e) if e.is_float() => TensorValues::Floats(v.iter().map(|&x| x as f64).collect()),
        (TensorValues::Ints(v), ElementKind::Bool) => TensorValues::Bools(v.iter().map(|&x| x != 0).collect()),
        (TensorValues::Floats(v), e) if e.is_integer() => {
            TensorValues::Ints(
                v.iter()
                    .map(|&x| x.is_finite().then(|| wrap_int(x.trunc() as i64, e)))
                    .collect::<Option<_>>()?,
            )
        }
        (TensorValues::Floats(v), e) if e.is_float() => TensorValues::Floats(v.clone()),
        (TensorValues::Floats(v), ElementKind::Bool) => TensorValues::Bools(v.iter().map(|&x| x != 0.0).collect()),
        (TensorValues::Bools(v), e) if e.is_integer() => TensorValues::Ints(v.iter().map(|&b| i64::from(b)).collect()),
        (TensorValues::Bools(v), e) if e.is_float() => {
            TensorValues::Floats(v.iter().map(|&b| if b { 1.0 } else { 0.0 }).collect())
        }
        (TensorValues::Bools(v), ElementKind::Bool) => TensorValues::Bools(v.clone()),
        (TensorValues::Strings(v), ElementKind::String) => TensorValues::Strings(v.clone()),
        _ => return None,
    };
    TensorData::new(elem, data.dims.clone(), values).ok()
}

fn shape_of(ctx: &RuleContext<'_>) -> Option<TensorData> {
    let dims = ctx.inputs.first()?.ty?.shape()?.dims()?;
    let (start, end) = shape_range(ctx.node, dims.len()).ok()?;
    let values = dims[start..end]
        .iter()
        .map(|dim| dim.known().and_then(|d| i64::try_from(d).ok()))
        .collect::<Option<Vec<_>>>()?;
    Some(TensorData::ints(values))
}

#[derive(Debug, Clone, Copy)]
enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
}

impl BinaryOp {
    fn ints(self, a: i64, b: i64) -> Option<i64> {
        match self {
            BinaryOp::Add => a.checked_add(b),
            BinaryOp::Sub => a.checked_sub(b),
            BinaryOp::Mul => a.checked_mul(b),
            BinaryOp::Div => a.checked_div(b),
        }
    }

    fn floats(self, a: f64, b: f64) -> Option<f64> {
        let result = match self {
            BinaryOp::Add => a + b,
            BinaryOp::Sub => a - b,
            BinaryOp::Mul => a * b,
            BinaryOp::Div => a / b,
        };
        result.is_finite().then_some(result)
    }
}

/// Numpy broadcast of concrete dims
fn broadcast_dims(a: &[usize], b: &[usize]) -> Option<Vec<usize>> {
    let rank = a.len().max(b.len());
    (0..rank)
        .map(|i| {
            let x = i.checked_sub(rank - a.len()).map_or(1, |j| a[j]);
            let y = i.checked_sub(rank - b.len()).map_or(1, |j| b[j]);
            match (x, y) {
                _ if x == y => Some(x),
                (1, other) | (other, 1) => Some(other),
                _ => None,
            }
        })
        .collect()
}

/// Flat index into a broadcast source for a flat index into the output
fn source_index(mut out_index: usize, out_dims: &[usize], src_dims: &[usize]) -> usize {
    let offset = out_dims.len() - src_dims.len();
    let mut index = 0;
    let mut stride = 1;
    for axis in (0..out_dims.len()).rev() {
        let coord = out_index % out_dims[axis];
        out_index /= out_dims[axis];
        if axis >= offset {
            let dim = src_dims[axis - offset];
            if dim != 1 {
                index += coord * stride;
            }
            stride *= dim;
        }
    }
    index
}

fn broadcast_apply<T: Copy>(
    a: &[T],
    a_dims: &[usize],
    b: &[T],
    b_dims: &[usize],
    out_dims: &[usize],
    f: impl Fn(T, T) -> Option<T>,
) -> Option<Vec<T>> {
    let total: usize = out_dims.iter().product();
    (0..total)
        .map(|i| {
            let x = a[source_index(i, out_dims, a_dims)];
            let y = b[source_index(i, out_dims, b_dims)];
            f(x, y)
        })
        .collect()
}

fn binary(a: &TensorData, b: &TensorData, op: BinaryOp, max_elements: usize) -> Option<TensorData> {
    if a.elem != b.elem {
        return None;
    }
    let out_dims = broadcast_dims(&a.dims, &b.dims)?;
    if out_dims.iter().product::<usize>() > max_elements {
        return None;
    }
    let values = match (&a.values, &b.values) {
        (TensorValues::Ints(x), TensorValues::Ints(y)) => {
            TensorValues::Ints(broadcast_apply(x, &a.dims, y, &b.dims, &out_dims, |p, q| op.ints(p, q))?)
        }
        (TensorValues::Floats(x), TensorValues::Floats(y)) => {
            TensorValues::Floats(broadcast_apply(x, &a.dims, y, &b.dims, &out_dims, |p, q| op.floats(p, q))?)
        }
        _ => return None,
    };
    TensorData::new(a.elem, out_dims, values).ok()
}

fn unary(data: &TensorData, int_op: impl Fn(i64) -> Option<i64>, float_op: impl Fn(f64) -> f64) -> Option<TensorData> {
    let values = match &data.values {
        TensorValues::Ints(v) => TensorValues::Ints(v.iter().map(|&x| int_op(x)).collect::<Option<_>>()?),
        TensorValues::Floats(v) => TensorValues::Floats(v.iter().map(|&x| float_op(x)).collect()),
        _ => return None,
    };
    TensorData::new(data.elem, data.dims.clone(), values).ok()
}

/// Split `values` into `outer` chunks of `chunk` elements each, if that covers them exactly
fn chunks<T: Clone>(values: &[T], outer: usize, chunk: usize) -> Option<Vec<&[T]>> {
    if outer.checked_mul(chunk)? != values.len() {
        return None;
    }
    Some((0..outer).map(|i| &values[i * chunk..(i + 1) * chunk]).collect())
}

fn concat(ctx: &RuleContext<'_>) -> Option<TensorData> {
    let parts = (0..ctx.num_inputs()).map(|i| ctx.value(i)).collect::<Option<Vec<_>>>()?;
    let first = parts.first()?;
    let rank = first.rank();
    let axis = normalize_axis(ctx.node.attr_int("axis").ok()??, rank).ok()?;
    let off_axis_differs = |p: &TensorData| (0..rank).any(|d| d != axis && p.dims[d] != first.dims[d]);
    if parts.iter().any(|p| p.rank() != rank || p.elem != first.elem || off_axis_differs(p)) {
        return None;
    }
    let outer: usize = first.dims[..axis].iter().product();
    let inner: usize = first.dims[axis + 1..].iter().product();
    let mut dims = first.dims.clone();
    dims[axis] = parts.iter().map(|p| p.dims[axis]).sum();

    macro_rules! join {
        ($variant:ident) => {{
            let sources = parts
                .iter()
                .map(|p| match &p.values {
                    TensorValues::$variant(v) => chunks(v, outer, p.dims[axis].checked_mul(inner)?),
                    _ => None,
                })
                .collect::<Option<Vec<_>>>()?;
            let mut out = Vec::new();
            for i in 0..outer {
                for source in &sources {
                    out.extend_from_slice(source[i]);
                }
            }
            TensorValues::$variant(out)
        }};
    }

    let values = match &first.values {
        TensorValues::Ints(_) => join!(Ints),
        TensorValues::Floats(_) => join!(Floats),
        TensorValues::Bools(_) => join!(Bools),
        TensorValues::Strings(_) => join!(Strings),
    };
    TensorData::new(first.elem, dims, values).ok()
}

/// `Gather` along axis 0
fn gather(ctx: &RuleContext<'_>) -> Option<TensorData> {
    let data = ctx.value(0)?;
    let indices = ctx.value(1)?;
    let axis = normalize_axis(ctx.node.attr_int("axis").ok()?.unwrap_or(0), data.rank()).ok()?;
    if axis != 0 {
        return None;
    }
    let rows = *data.dims.first()? as i64;
    let inner: usize = data.dims[1..].iter().product();
    let positions = indices
        .as_ints()?
        .iter()
        .map(|&i| {
            let i = if i < 0 { i + rows } else { i };
            (0..rows).contains(&i).then_some(i as usize)
        })
        .collect::<Option<Vec<_>>>()?;
    let mut dims = indices.dims.clone();
    dims.extend_from_slice(&data.dims[1..]);

    macro_rules! pick {
        ($v:expr, $variant:ident) => {
            TensorValues::$variant(
                positions
                    .iter()
                    .flat_map(|&p| $v[p * inner..(p + 1) * inner].iter().cloned())
                    .collect(),
            )
        };
    }

    let values = match &data.values {
        TensorValues::Ints(v) => pick!(v, Ints),
        TensorValues::Floats(v) => pick!(v, Floats),
        TensorValues::Bools(v) => pick!(v, Bools),
        TensorValues::Strings(v) => pick!(v, Strings),
    };
    TensorData::new(data.elem, dims, values).ok()
}

/// `Slice` of a 1-D tensor
fn slice(ctx: &RuleContext<'_>) -> Option<TensorData> {
    let data = ctx.value(0)?;
    if data.rank() != 1 {
        return None;
    }
    let (start, end, step) = if ctx.version >= 10 {
        let first = |index: usize| ctx.int_values(index).and_then(|v| (v.len() == 1).then(|| v[0]));
        if ctx.is_present(3) && ctx.int_values(3)?.iter().any(|&axis| axis != 0 && axis != -1) {
            return None;
        }
        let step = if ctx.is_present(4) { first(4)? } else { 1 };
        (first(1)?, first(2)?, step)
    } else {
        let starts = ctx.node.attr_ints("starts").ok()??;
        let ends = ctx.node.attr_ints("ends").ok()??;
        if starts.len() != 1 || ends.len() != 1 {
            return None;
        }
        (starts[0], ends[0], 1)
    };
    if step == 0 {
        return None;
    }
    let (first, len) = slice_bounds(data.dims[0] as u64, start, end, step);
    let positions: Vec<usize> = (0..len as i64).map(|k| (first + k * step) as usize).collect();

    macro_rules! pick {
        ($v:expr, $variant:ident) => {
            TensorValues::$variant(positions.iter().map(|&p| $v[p].clone()).collect())
        };
    }

    let values = match &data.values {
        TensorValues::Ints(v) => pick!(v, Ints),
        TensorValues::Floats(v) => pick!(v, Floats),
        TensorValues::Bools(v) => pick!(v, Bools),
        TensorValues::Strings(v) => pick!(v, Strings),
    };
    TensorData::new(data.elem, vec![positions.len()], values).ok()
}

fn range(ctx: &RuleContext<'_>, max_elements: usize) -> Option<TensorData> {
    let (start, limit, delta) = (ctx.value(0)?, ctx.value(1)?, ctx.value(2)?);
    let len = range_length(start.scalar_f64()?, limit.scalar_f64()?, delta.scalar_f64()?).ok()? as usize;
    if len > max_elements {
        return None;
    }
    let values = match (&start.values, &delta.values) {
        (TensorValues::Ints(_), TensorValues::Ints(_)) => {
            let (s, d) = (start.scalar_i64()?, delta.scalar_i64()?);
            TensorValues::Ints(
                (0..len as i64)
                    .map(|k| k.checked_mul(d).and_then(|offset| s.checked_add(offset)))
                    .collect::<Option<_>>()?,
            )
        }
        (TensorValues::Floats(_), TensorValues::Floats(_)) => {
            let (s, d) = (start.scalar_f64()?, delta.scalar_f64()?);
            TensorValues::Floats((0..len).map(|k| s + k as f64 * d).collect())
        }
        _ => return None,
    };
    TensorData::new(start.elem, vec![len], values).ok()
}

fn constant_of_shape(ctx: &RuleContext<'_>, max_elements: usize) -> Option<TensorData> {
    let dims = ctx
        .int_values(0)?
        .into_iter()
        .map(|d| usize::try_from(d).ok())
        .collect::<Option<Vec<_>>>()?;
    let total = dims.iter().try_fold(1usize, |acc, &d| acc.checked_mul(d))?;
    if total > max_elements {
        return None;
    }
    let fill = match ctx.node.attr_tensor("value").ok()? {
        Some(value) if value.len() == 1 => value.clone(),
        Some(_) => return None,
        None => TensorData::floats(vec![0.0]),
    };
    let values = match &fill.values {
        TensorValues::Ints(v) => TensorValues::Ints(vec![v[0]; total]),
        TensorValues::Floats(v) => TensorValues::Floats(vec![v[0]; total]),
        TensorValues::Bools(v) => TensorValues::Bools(vec![v[0]; total]),
        TensorValues::Strings(v) => TensorValues::Strings(vec![v[0].clone(); total]),
    };
    TensorData::new(fill.elem, dims, values).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Attribute, Dim, Node, Shape};
    use crate::rules::RuleInput;

    fn eval(node: &Node, version: i64, values: &[Option<TensorData>], types: &[Option<Type>], outputs: &[Option<Type>]) -> Option<TensorData> {
        let inputs = (0..node.inputs.len())
            .map(|i| RuleInput {
                name: node.input(i),
                ty: types.get(i).and_then(Option::as_ref),
                value: values.get(i).and_then(Option::as_ref),
            })
            .collect();
        evaluate(&RuleContext::new(node, version, inputs), outputs, 1_024)
    }

    #[test]
    fn test_mul_broadcasts_scalar() {
        let node = Node::new("Mul").with_inputs(["a", "b"]).with_output("c");
        let out = eval(&node, 18, &[Some(TensorData::ints(vec![4, 2, 8])), Some(TensorData::int_scalar(2))], &[], &[]).unwrap();
        assert_eq!(out, TensorData::ints(vec![8, 4, 16]));
    }

    #[test]
    fn test_add_broadcasts_rows() {
        let node = Node::new("Add").with_inputs(["a", "b"]).with_output("c");
        let a = TensorData::ints(vec![1, 2, 3, 4, 5, 6]).with_dims(vec![2, 3]).unwrap();
        let b = TensorData::ints(vec![10, 20, 30]);
        let out = eval(&node, 18, &[Some(a), Some(b)], &[], &[]).unwrap();
        assert_eq!(out.dims, vec![2, 3]);
        assert_eq!(out.as_ints().unwrap(), &[11, 22, 33, 14, 25, 36]);
    }

    #[test]
    fn test_division_by_zero_gives_up() {
        let node = Node::new("Div").with_inputs(["a", "b"]).with_output("c");
        assert!(eval(&node, 18, &[Some(TensorData::int_scalar(1)), Some(TensorData::int_scalar(0))], &[], &[]).is_none());
    }

    #[test]
    fn test_shape_of_concrete_input() {
        let node = Node::new("Shape").with_input("x").with_output("s");
        let ty = Type::tensor(ElementKind::Float, Shape::known(&[2, 3, 4]));
        let out = eval(&node, 18, &[None], &[Some(ty.clone())], &[]).unwrap();
        assert_eq!(out, TensorData::ints(vec![2, 3, 4]));

        let sliced = node.clone().with_attr(Attribute::int("start", 1));
        assert_eq!(eval(&sliced, 18, &[None], &[Some(ty)], &[]).unwrap(), TensorData::ints(vec![3, 4]));

        let symbolic = Type::tensor(ElementKind::Float, Shape::from_dims([Dim::symbol("N")]));
        assert!(eval(&node, 18, &[None], &[Some(symbolic)], &[]).is_none());
    }

    #[test]
    fn test_concat_and_gather() {
        let node = Node::new("Concat").with_inputs(["a", "b"]).with_output("c").with_attr(Attribute::int("axis", 0));
        let out = eval(&node, 13, &[Some(TensorData::ints(vec![1, 2])), Some(TensorData::ints(vec![3]))], &[], &[]).unwrap();
        assert_eq!(out, TensorData::ints(vec![1, 2, 3]));

        let node = Node::new("Gather").with_inputs(["data", "idx"]).with_output("g");
        let out = eval(&node, 13, &[Some(TensorData::ints(vec![5, 6, 7])), Some(TensorData::int_scalar(-1))], &[], &[]).unwrap();
        assert_eq!(out, TensorData::int_scalar(7));
    }

    #[test]
    fn test_slice_one_dimensional() {
        let node = Node::new("Slice").with_inputs(["data", "starts", "ends"]).with_output("s");
        let values = [
            Some(TensorData::ints(vec![10, 20, 30, 40])),
            Some(TensorData::ints(vec![1])),
            Some(TensorData::ints(vec![-1])),
        ];
        assert_eq!(eval(&node, 13, &values, &[], &[]).unwrap(), TensorData::ints(vec![20, 30]));
    }

    #[test]
    fn test_reshape_relabels_dims() {
        let node = Node::new("Reshape").with_inputs(["data", "shape"]).with_output("r");
        let output = Some(Type::tensor(ElementKind::Int64, Shape::known(&[2, 2])));
        let out = eval(&node, 18, &[Some(TensorData::ints(vec![1, 2, 3, 4])), None], &[], &[output]).unwrap();
        assert_eq!(out.dims, vec![2, 2]);
    }

    #[test]
    fn test_range_and_constant_of_shape() {
        let node = Node::new("Range").with_inputs(["s", "l", "d"]).with_output("r");
        let values = [Some(TensorData::int_scalar(1)), Some(TensorData::int_scalar(7)), Some(TensorData::int_scalar(2))];
        assert_eq!(eval(&node, 11, &values, &[], &[]).unwrap(), TensorData::ints(vec![1, 3, 5]));

        let node = Node::new("ConstantOfShape").with_input("shape").with_output("c");
        let out = eval(&node, 20, &[Some(TensorData::ints(vec![2, 2]))], &[], &[]).unwrap();
        assert_eq!(out.len(), 4);
        assert_eq!(out.elem, ElementKind::Float);
    }

    #[test]
    fn test_cast_values() {
        let node = Node::new("Cast").with_input("x").with_output("y").with_attr(Attribute::int("to", 1));
        let out = eval(&node, 18, &[Some(TensorData::ints(vec![1, 2]))], &[], &[]).unwrap();
        assert_eq!(out, TensorData::floats(vec![1.0, 2.0]));
    }

    #[test]
    fn test_cast_wraps_to_narrow_integers() {
        let cast_to = |to: ElementKind| {
            Node::new("Cast").with_input("x").with_output("y").with_attr(Attribute::int("to", to.code()))
        };
        let wide = [Some(TensorData::ints(vec![300, -1, 1 << 32]))];
        let out = eval(&cast_to(ElementKind::Uint8), 18, &wide, &[], &[]).unwrap();
        assert_eq!(out.values, TensorValues::Ints(vec![44, 255, 0]));
        let out = eval(&cast_to(ElementKind::Int8), 18, &wide, &[], &[]).unwrap();
        assert_eq!(out.values, TensorValues::Ints(vec![44, -1, 0]));
        let out = eval(&cast_to(ElementKind::Int32), 18, &[Some(TensorData::floats(vec![2_147_483_648.0]))], &[], &[]).unwrap();
        assert_eq!(out.values, TensorValues::Ints(vec![-2_147_483_648]));
    }

    #[test]
    fn test_range_overflow_is_not_folded() {
        // The f64 length estimate rounds `start` down and overshoots `i64::MAX`.
        let node = Node::new("Range").with_inputs(["s", "l", "d"]).with_output("r");
        let values = [
            Some(TensorData::int_scalar(i64::MAX - 1_000)),
            Some(TensorData::int_scalar(i64::MAX)),
            Some(TensorData::int_scalar(1)),
        ];
        assert!(eval(&node, 11, &values, &[], &[]).is_none());
    }

    #[test]
    fn test_concat_of_mismatched_parts_is_not_folded() {
        let node = Node::new("Concat").with_inputs(["a", "b"]).with_output("c").with_attr(Attribute::int("axis", 1));
        let a = TensorData::ints(vec![1, 2, 3, 4, 5, 6]).with_dims(vec![2, 3]).unwrap();
        let b = TensorData::ints(vec![1, 2, 3, 4, 5, 6, 7, 8, 9]).with_dims(vec![3, 3]).unwrap();
        assert!(eval(&node, 13, &[Some(a), Some(b)], &[], &[]).is_none());
    }

    #[test]
    fn test_element_cap() {
        let node = Node::new("ConstantOfShape").with_input("shape").with_output("c");
        assert!(eval(&node, 20, &[Some(TensorData::ints(vec![1_000, 1_000]))], &[], &[]).is_none());
    }
}
