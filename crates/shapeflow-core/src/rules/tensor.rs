//! Constants and shape manipulation
//!
//! Several of these operators take their target shape, axes or bounds as a tensor input. When
//! that tensor has a known partial value the output shape is computed exactly; otherwise the
//! rule falls back to whatever the input's own type says (usually just the output rank).

use super::{
    common_elem, normalize_axes, normalize_axis, Axes, AxesSource, InferenceRule, RuleContext, RuleOutput,
    RuleRegistry,
};
use crate::error::{InferenceError, Result};
use crate::ir::{
    AttributeKind, Dim, Dims, ElementKind, Node, Shape, TensorData, TensorType, TensorValues, Type,
};
use crate::symbolic::{broadcast_shapes, refine_dim};

pub(super) fn register(registry: &mut RuleRegistry) {
    registry.register("", "Constant", 1, ConstantRule);
    registry.register("", "ConstantOfShape", 9, ConstantOfShapeRule);
    registry.register("", "Shape", 1, ShapeRule);
    registry.register("", "Size", 1, SizeRule);
    registry.register("", "Reshape", 5, ReshapeRule);
    registry.register("", "Expand", 8, ExpandRule);
    registry.register("", "Flatten", 1, FlattenRule);
    registry.register("", "Squeeze", 1, SqueezeRule { axes: AxesSource::Attribute });
    registry.register("", "Squeeze", 13, SqueezeRule { axes: AxesSource::Input(1) });
    registry.register("", "Unsqueeze", 1, UnsqueezeRule { axes: AxesSource::Attribute });
    registry.register("", "Unsqueeze", 13, UnsqueezeRule { axes: AxesSource::Input(1) });
    registry.register("", "Transpose", 1, TransposeRule);
    registry.register("", "Concat", 1, ConcatRule);
    registry.register("", "Gather", 1, GatherRule);
    registry.register("", "Slice", 1, SliceRule { bounds_from_inputs: false });
    registry.register("", "Slice", 10, SliceRule { bounds_from_inputs: true });
    registry.register("", "Range", 11, RangeRule);
    registry.register("", "Tile", 6, TileRule);
}

const CONSTANT_VALUE_ATTRIBUTES: &[&str] = &[
    "value",
    "value_int",
    "value_ints",
    "value_float",
    "value_floats",
    "value_string",
    "value_strings",
];

/// The tensor a `Constant`-style node carries in one of its value attributes.
///
/// Returns `None` when the node has no value attribute.
pub fn constant_data(node: &Node) -> Result<Option<TensorData>> {
    let present: Vec<&str> = CONSTANT_VALUE_ATTRIBUTES
        .iter()
        .copied()
        .filter(|name| node.has_attr(name))
        .collect();
    if present.len() > 1 {
        return Err(InferenceError::InvalidGraph(format!(
            "{} carries more than one value attribute: {}",
            node.op_type,
            present.join(", ")
        )));
    }
    let Some(&name) = present.first() else {
        return Ok(None);
    };
    let missing = |expected| InferenceError::AttributeMissing {
        name: name.to_string(),
        expected,
    };
    let data = match name {
        "value" => node.attr_tensor(name)?.cloned(),
        "value_int" => node.attr_int(name)?.map(TensorData::int_scalar),
        "value_ints" => node.attr_ints(name)?.map(|v| TensorData::ints(v.to_vec())),
        "value_float" => node.attr_float(name)?.map(|v| TensorData::float_scalar(f64::from(v))),
        "value_floats" => node
            .attr_floats(name)?
            .map(|v| TensorData::floats(v.iter().map(|&x| f64::from(x)).collect())),
        "value_string" => node.attr_string(name)?.map(|v| TensorData {
            elem: ElementKind::String,
            dims: vec![],
            values: TensorValues::Strings(vec![v.to_string()]),
        }),
        _ => node.attr_strings(name)?.map(|v| TensorData {
            elem: ElementKind::String,
            dims: vec![v.len()],
            values: TensorValues::Strings(v.to_vec()),
        }),
    };
    data.map(Some).ok_or_else(|| missing(AttributeKind::Tensor))
}

/// Target dimensions from a known integer vector; negative entries are rejected
fn dims_from_values(op: &str, values: &[i64]) -> Result<Shape> {
    values
        .iter()
        .map(|&v| {
            u64::try_from(v).map(Dim::Known).map_err(|_| {
                InferenceError::ShapeMismatch(format!("{op} target dimension {v} is negative"))
            })
        })
        .collect::<Result<Dims>>()
        .map(Shape::Ranked)
}

/// Rank of the shape described by a 1-D shape tensor whose values are unknown
fn shape_of_unknown_target(target: Option<&TensorType>) -> Shape {
    match target.and_then(|t| t.shape.dims()) {
        Some([Dim::Known(len)]) => Shape::of_rank(*len as usize),
        _ => Shape::Unranked,
    }
}

/// Product of dims, unknown if any factor is or the product overflows
fn dim_product(dims: &[Dim]) -> Dim {
    dims.iter()
        .try_fold(1u64, |acc, dim| acc.checked_mul(dim.known()?))
        .map_or(Dim::Unknown, Dim::Known)
}

pub struct ConstantRule;

impl InferenceRule for ConstantRule {
    fn infer(&self, ctx: &RuleContext<'_>) -> Result<RuleOutput> {
        let data = constant_data(ctx.node)?.ok_or_else(|| InferenceError::AttributeMissing {
            name: "value".to_string(),
            expected: AttributeKind::Tensor,
        })?;
        Ok(vec![Some(data.value_type())])
    }
}

pub struct ConstantOfShapeRule;

impl InferenceRule for ConstantOfShapeRule {
    fn infer(&self, ctx: &RuleContext<'_>) -> Result<RuleOutput> {
        let target = ctx.tensor(0)?;
        let elem = ctx.node.attr_tensor("value")?.map_or(ElementKind::Float, |v| v.elem);
        let shape = match ctx.int_values(0) {
            Some(values) => dims_from_values(ctx.op(), &values)?,
            None => shape_of_unknown_target(target),
        };
        Ok(vec![Some(Type::tensor(elem, shape))])
    }
}

/// Clamped `[start, end)` range of `Shape`'s output over a tensor of rank `rank`
pub fn shape_range(node: &Node, rank: usize) -> Result<(usize, usize)> {
    let clamp = |v: i64| {
        let v = if v < 0 { v + rank as i64 } else { v };
        v.clamp(0, rank as i64) as usize
    };
    let start = clamp(node.attr_int("start")?.unwrap_or(0));
    let end = clamp(node.attr_int("end")?.unwrap_or(rank as i64));
    Ok((start, end.max(start)))
}

pub struct ShapeRule;

impl InferenceRule for ShapeRule {
    fn infer(&self, ctx: &RuleContext<'_>) -> Result<RuleOutput> {
        let len = match ctx.tensor(0)?.and_then(TensorType::rank) {
            Some(rank) => {
                let (start, end) = shape_range(ctx.node, rank)?;
                Dim::Known((end - start) as u64)
            }
            None => Dim::Unknown,
        };
        Ok(vec![Some(Type::tensor(ElementKind::Int64, Shape::from_dims([len])))])
    }
}

pub struct SizeRule;

impl InferenceRule for SizeRule {
    fn infer(&self, ctx: &RuleContext<'_>) -> Result<RuleOutput> {
        ctx.require(0)?;
        Ok(vec![Some(Type::scalar(ElementKind::Int64))])
    }
}

/// Output shape of `Reshape` for a known target vector
pub fn reshape_target(input: &Shape, target: &[i64], allow_zero: bool) -> Result<Shape> {
    let mut dims = Dims::with_capacity(target.len());
    let mut inferred_at: Option<usize> = None;
    for (i, &value) in target.iter().enumerate() {
        let dim = match value {
            -1 => {
                if inferred_at.replace(i).is_some() {
                    return Err(InferenceError::ShapeMismatch(
                        "Reshape target has more than one -1 dimension".to_string(),
                    ));
                }
                Dim::Unknown
            }
            0 if !allow_zero => match input.dims() {
                Some(input_dims) => input_dims.get(i).cloned().ok_or_else(|| {
                    InferenceError::ShapeMismatch(format!(
                        "Reshape target copies dimension {i} of a rank {} input",
                        input_dims.len()
                    ))
                })?,
                None => Dim::Unknown,
            },
            v if v < 0 => {
                return Err(InferenceError::ShapeMismatch(format!(
                    "Reshape target dimension {v} is invalid"
                )))
            }
            v => Dim::Known(v as u64),
        };
        dims.push(dim);
    }

    if let Some(total) = input.num_elements() {
        let known = dims
            .iter()
            .enumerate()
            .filter(|(i, _)| Some(*i) != inferred_at)
            .try_fold(1u64, |acc, (_, d)| acc.checked_mul(d.known()?));
        match (inferred_at, known) {
            (Some(i), Some(known)) => {
                if known == 0 || total % known != 0 {
                    return Err(InferenceError::ShapeMismatch(format!(
                        "cannot reshape {total} elements into {}",
                        Shape::Ranked(dims)
                    )));
                }
                dims[i] = Dim::Known(total / known);
            }
            (None, Some(known)) if known != total => {
                return Err(InferenceError::ShapeMismatch(format!(
                    "cannot reshape {total} elements into {known}"
                )));
            }
            _ => {}
        }
    }
    Ok(Shape::Ranked(dims))
}

pub struct ReshapeRule;

impl InferenceRule for ReshapeRule {
    fn infer(&self, ctx: &RuleContext<'_>) -> Result<RuleOutput> {
        let data = ctx.tensor(0)?;
        let target = ctx.tensor(1)?;
        let allow_zero = ctx.node.attr_int("allowzero")?.unwrap_or(0) != 0;
        let Some(data) = data else {
            return Ok(vec![None]);
        };
        let shape = match ctx.int_values(1) {
            Some(values) => reshape_target(&data.shape, &values, allow_zero)?,
            None => shape_of_unknown_target(target),
        };
        Ok(vec![Some(Type::tensor(data.elem, shape))])
    }
}

pub struct ExpandRule;

impl InferenceRule for ExpandRule {
    fn infer(&self, ctx: &RuleContext<'_>) -> Result<RuleOutput> {
        let data = ctx.tensor(0)?;
        let target = ctx.tensor(1)?;
        let Some(data) = data else {
            return Ok(vec![None]);
        };
        let target = match ctx.int_values(1) {
            Some(values) => dims_from_values(ctx.op(), &values)?,
            None => shape_of_unknown_target(target),
        };
        Ok(vec![Some(Type::tensor(data.elem, broadcast_shapes(&data.shape, &target)?))])
    }
}

pub struct FlattenRule;

impl InferenceRule for FlattenRule {
    fn infer(&self, ctx: &RuleContext<'_>) -> Result<RuleOutput> {
        let Some(data) = ctx.tensor(0)? else {
            return Ok(vec![None]);
        };
        let axis = ctx.node.attr_int("axis")?.unwrap_or(1);
        let shape = match data.shape.dims() {
            Some(dims) => {
                // Flatten accepts axis == rank.
                let rank = dims.len() as i64;
                if axis < -rank || axis > rank {
                    return Err(InferenceError::ShapeMismatch(format!(
                        "Flatten axis {axis} is out of range for rank {rank}"
                    )));
                }
                let axis = (if axis < 0 { axis + rank } else { axis }) as usize;
                Shape::from_dims([dim_product(&dims[..axis]), dim_product(&dims[axis..])])
            }
            None => Shape::of_rank(2),
        };
        Ok(vec![Some(Type::tensor(data.elem, shape))])
    }
}

pub struct SqueezeRule {
    pub axes: AxesSource,
}

impl InferenceRule for SqueezeRule {
    fn infer(&self, ctx: &RuleContext<'_>) -> Result<RuleOutput> {
        let Some(data) = ctx.tensor(0)? else {
            return Ok(vec![None]);
        };
        let axes = ctx.axes(self.axes)?;
        let Some(dims) = data.shape.dims() else {
            return Ok(vec![Some(Type::unranked(data.elem))]);
        };
        let shape = match axes {
            Axes::Unknown => Shape::Unranked,
            Axes::Absent => {
                if dims.iter().all(Dim::is_known) {
                    Shape::from_dims(dims.iter().filter(|d| **d != Dim::Known(1)).cloned())
                } else {
                    Shape::Unranked
                }
            }
            Axes::Known(axes) => {
                let axes = normalize_axes(&axes, dims.len())?;
                for &axis in &axes {
                    if let Dim::Known(n) = dims[axis] {
                        if n != 1 {
                            return Err(InferenceError::ShapeMismatch(format!(
                                "cannot squeeze axis {axis} of length {n}"
                            )));
                        }
                    }
                }
                Shape::from_dims(
                    dims.iter()
                        .enumerate()
                        .filter(|(i, _)| !axes.contains(i))
                        .map(|(_, d)| d.clone()),
                )
            }
        };
        Ok(vec![Some(Type::tensor(data.elem, shape))])
    }
}

pub struct UnsqueezeRule {
    pub axes: AxesSource,
}

impl InferenceRule for UnsqueezeRule {
    fn infer(&self, ctx: &RuleContext<'_>) -> Result<RuleOutput> {
        let Some(data) = ctx.tensor(0)? else {
            return Ok(vec![None]);
        };
        let rank = data.rank();
        let shape = match ctx.axes(self.axes)? {
            Axes::Absent => {
                return Err(match self.axes {
                    AxesSource::Attribute => InferenceError::AttributeMissing {
                        name: "axes".to_string(),
                        expected: AttributeKind::Ints,
                    },
                    AxesSource::Input(index) => InferenceError::MissingRequiredInput { index },
                })
            }
            Axes::Unknown => match (rank, ctx.tensor(1)?.and_then(|t| t.shape.dims())) {
                (Some(rank), Some([Dim::Known(n)])) => Shape::of_rank(rank + *n as usize),
                _ => Shape::Unranked,
            },
            Axes::Known(axes) => match data.shape.dims() {
                Some(dims) => {
                    let out_rank = dims.len() + axes.len();
                    let axes = normalize_axes(&axes, out_rank)?;
                    let mut remaining = dims.iter();
                    let mut out = Dims::with_capacity(out_rank);
                    for i in 0..out_rank {
                        if axes.contains(&i) {
                            out.push(Dim::Known(1));
                        } else if let Some(dim) = remaining.next() {
                            out.push(dim.clone());
                        }
                    }
                    Shape::Ranked(out)
                }
                None => Shape::Unranked,
            },
        };
        Ok(vec![Some(Type::tensor(data.elem, shape))])
    }
}

pub struct TransposeRule;

impl InferenceRule for TransposeRule {
    fn infer(&self, ctx: &RuleContext<'_>) -> Result<RuleOutput> {
        let Some(data) = ctx.tensor(0)? else {
            return Ok(vec![None]);
        };
        let perm = ctx.node.attr_ints("perm")?;
        let shape = match (data.shape.dims(), perm) {
            (Some(dims), Some(perm)) => {
                if perm.len() != dims.len() {
                    return Err(InferenceError::ShapeMismatch(format!(
                        "Transpose perm has {} entries for a rank {} input",
                        perm.len(),
                        dims.len()
                    )));
                }
                let perm = normalize_axes(perm, dims.len())?;
                Shape::from_dims(perm.iter().map(|&axis| dims[axis].clone()))
            }
            (Some(dims), None) => Shape::from_dims(dims.iter().rev().cloned()),
            (None, Some(perm)) => Shape::of_rank(perm.len()),
            (None, None) => Shape::Unranked,
        };
        Ok(vec![Some(Type::tensor(data.elem, shape))])
    }
}

pub struct ConcatRule;

impl InferenceRule for ConcatRule {
    fn infer(&self, ctx: &RuleContext<'_>) -> Result<RuleOutput> {
        let axis = ctx.node.require_int("axis")?;
        if ctx.num_inputs() == 0 {
            return Err(InferenceError::MissingRequiredInput { index: 0 });
        }
        let operands = (0..ctx.num_inputs())
            .map(|i| ctx.tensor(i))
            .collect::<Result<Vec<_>>>()?;
        let Some(elem) = common_elem(ctx.op(), &operands)? else {
            return Ok(vec![None]);
        };
        let ranked: Vec<&[Dim]> = operands.iter().flatten().filter_map(|t| t.shape.dims()).collect();
        let Some(rank) = ranked.first().map(|dims| dims.len()) else {
            return Ok(vec![Some(Type::unranked(elem))]);
        };
        if let Some(other) = ranked.iter().find(|dims| dims.len() != rank) {
            return Err(InferenceError::ShapeMismatch(format!(
                "Concat inputs have ranks {rank} and {}",
                other.len()
            )));
        }
        let axis = normalize_axis(axis, rank)?;
        let all_ranked = ranked.len() == operands.len();

        let mut dims = Dims::with_capacity(rank);
        for d in 0..rank {
            if d == axis {
                let total = ranked.iter().try_fold(0u64, |acc, dims| acc.checked_add(dims[d].known()?));
                dims.push(match total {
                    Some(total) if all_ranked => Dim::Known(total),
                    _ => Dim::Unknown,
                });
            } else {
                let mut merged = Dim::Unknown;
                for operand in &ranked {
                    merged = refine_dim(&merged, &operand[d]).map_err(|_| {
                        InferenceError::ShapeMismatch(format!("Concat inputs disagree on dimension {d}"))
                    })?;
                }
                dims.push(merged);
            }
        }
        Ok(vec![Some(Type::tensor(elem, Shape::Ranked(dims)))])
    }
}

pub struct GatherRule;

impl InferenceRule for GatherRule {
    fn infer(&self, ctx: &RuleContext<'_>) -> Result<RuleOutput> {
        let data = ctx.tensor(0)?;
        let indices = ctx.tensor(1)?;
        if let Some(indices) = indices {
            if !matches!(indices.elem, ElementKind::Int32 | ElementKind::Int64) {
                return Err(InferenceError::TypeMismatch(format!(
                    "Gather indices must be int32 or int64, found {}",
                    indices.elem
                )));
            }
        }
        let Some(data) = data else {
            return Ok(vec![None]);
        };
        let axis = ctx.node.attr_int("axis")?.unwrap_or(0);
        let data_dims = data.shape.dims();
        let axis = data_dims.map(|dims| normalize_axis(axis, dims.len())).transpose()?;
        let shape = match (data_dims, axis, indices.and_then(|t| t.shape.dims())) {
            (Some(dims), Some(axis), Some(index_dims)) => Shape::from_dims(
                dims[..axis]
                    .iter()
                    .chain(index_dims)
                    .chain(&dims[axis + 1..])
                    .cloned(),
            ),
            _ => Shape::Unranked,
        };
        Ok(vec![Some(Type::tensor(data.elem, shape))])
    }
}

/// First index and element count of a slice along an axis of length `dim`
pub fn slice_bounds(dim: u64, start: i64, end: i64, step: i64) -> (i64, u64) {
    if dim == 0 {
        return (0, 0);
    }
    let dim = i128::from(dim);
    let adjust = |v: i64| {
        let v = i128::from(v);
        if v < 0 {
            v + dim
        } else {
            v
        }
    };
    let step = i128::from(step);
    let (start, end) = if step > 0 {
        (adjust(start).clamp(0, dim), adjust(end).clamp(0, dim))
    } else {
        (adjust(start).clamp(0, dim - 1), adjust(end).clamp(-1, dim - 1))
    };
    let len = if step > 0 {
        (end - start + step - 1) / step
    } else {
        (start - end - step - 1) / -step
    };
    (start as i64, len.max(0) as u64)
}

/// Slice parameters, each known or not
struct SliceParams {
    starts: Option<Vec<i64>>,
    ends: Option<Vec<i64>>,
    axes: Option<Vec<i64>>,
    steps: Option<Vec<i64>>,
}

pub struct SliceRule {
    /// Starts, ends, axes and steps are inputs rather than attributes (opset 10 on)
    pub bounds_from_inputs: bool,
}

impl SliceRule {
    fn params(&self, ctx: &RuleContext<'_>) -> Result<SliceParams> {
        if self.bounds_from_inputs {
            ctx.require(1)?;
            ctx.require(2)?;
            let starts = ctx.int_values(1);
            let axes = if ctx.is_present(3) {
                ctx.int_values(3)
            } else {
                starts.as_ref().map(|s| (0..s.len() as i64).collect())
            };
            let steps = if ctx.is_present(4) {
                ctx.int_values(4)
            } else {
                starts.as_ref().map(|s| vec![1; s.len()])
            };
            Ok(SliceParams {
                ends: ctx.int_values(2),
                starts,
                axes,
                steps,
            })
        } else {
            let required = |name: &str| {
                ctx.node.attr_ints(name)?.map(<[i64]>::to_vec).ok_or_else(|| {
                    InferenceError::AttributeMissing {
                        name: name.to_string(),
                        expected: AttributeKind::Ints,
                    }
                })
            };
            let starts = required("starts")?;
            let ends = required("ends")?;
            let axes = match ctx.node.attr_ints("axes")? {
                Some(axes) => axes.to_vec(),
                None => (0..starts.len() as i64).collect(),
            };
            Ok(SliceParams {
                steps: Some(vec![1; starts.len()]),
                starts: Some(starts),
                ends: Some(ends),
                axes: Some(axes),
            })
        }
    }
}

impl InferenceRule for SliceRule {
    fn infer(&self, ctx: &RuleContext<'_>) -> Result<RuleOutput> {
        let data = ctx.tensor(0)?;
        let params = self.params(ctx)?;
        let Some(data) = data else {
            return Ok(vec![None]);
        };
        let Some(dims) = data.shape.dims() else {
            return Ok(vec![Some(Type::unranked(data.elem))]);
        };
        let Some(axes) = params.axes else {
            return Ok(vec![Some(Type::tensor(data.elem, Shape::of_rank(dims.len())))]);
        };
        let axes = normalize_axes(&axes, dims.len())?;
        let mut out: Dims = dims.iter().cloned().collect();

        let (Some(starts), Some(ends), Some(steps)) = (params.starts, params.ends, params.steps) else {
            for &axis in &axes {
                out[axis] = Dim::Unknown;
            }
            return Ok(vec![Some(Type::tensor(data.elem, Shape::Ranked(out)))]);
        };
        if starts.len() != axes.len() || ends.len() != axes.len() || steps.len() != axes.len() {
            return Err(InferenceError::ShapeMismatch(
                "Slice starts, ends, axes and steps differ in length".to_string(),
            ));
        }
        for (i, &axis) in axes.iter().enumerate() {
            if steps[i] == 0 {
                return Err(InferenceError::ShapeMismatch("Slice step cannot be 0".to_string()));
            }
            out[axis] = match dims[axis] {
                Dim::Known(dim) => Dim::Known(slice_bounds(dim, starts[i], ends[i], steps[i]).1),
                _ => Dim::Unknown,
            };
        }
        Ok(vec![Some(Type::tensor(data.elem, Shape::Ranked(out)))])
    }
}

/// Number of elements `Range(start, limit, delta)` produces
pub fn range_length(start: f64, limit: f64, delta: f64) -> Result<u64> {
    if delta == 0.0 {
        return Err(InferenceError::ShapeMismatch("Range delta cannot be 0".to_string()));
    }
    Ok(((limit - start) / delta).ceil().max(0.0) as u64)
}

pub struct RangeRule;

impl InferenceRule for RangeRule {
    fn infer(&self, ctx: &RuleContext<'_>) -> Result<RuleOutput> {
        let operands = [ctx.tensor(0)?, ctx.tensor(1)?, ctx.tensor(2)?];
        for (index, operand) in operands.iter().enumerate() {
            if let Some(rank) = operand.and_then(TensorType::rank) {
                if rank != 0 {
                    return Err(InferenceError::ShapeMismatch(format!(
                        "Range input #{index} must be a scalar, found rank {rank}"
                    )));
                }
            }
        }
        let Some(elem) = common_elem(ctx.op(), &operands)? else {
            return Ok(vec![None]);
        };
        let bounds = (0..3)
            .map(|i| ctx.value(i).and_then(TensorData::scalar_f64))
            .collect::<Option<Vec<f64>>>();
        let len = match bounds.as_deref() {
            Some(&[start, limit, delta]) => Dim::Known(range_length(start, limit, delta)?),
            _ => Dim::Unknown,
        };
        Ok(vec![Some(Type::tensor(elem, Shape::from_dims([len])))])
    }
}

pub struct TileRule;

impl InferenceRule for TileRule {
    fn infer(&self, ctx: &RuleContext<'_>) -> Result<RuleOutput> {
        let data = ctx.tensor(0)?;
        ctx.require(1)?;
        let Some(data) = data else {
            return Ok(vec![None]);
        };
        let Some(dims) = data.shape.dims() else {
            return Ok(vec![Some(Type::unranked(data.elem))]);
        };
        let shape = match ctx.int_values(1) {
            Some(repeats) => {
                if repeats.len() != dims.len() {
                    return Err(InferenceError::ShapeMismatch(format!(
                        "Tile has {} repeats for a rank {} input",
                        repeats.len(),
                        dims.len()
                    )));
                }
                Shape::from_dims(dims.iter().zip(&repeats).map(|(dim, &r)| match (dim, u64::try_from(r)) {
                    (_, Ok(1)) => dim.clone(),
                    (Dim::Known(d), Ok(r)) => d.checked_mul(r).map_or(Dim::Unknown, Dim::Known),
                    _ => Dim::Unknown,
                }))
            }
            None => Shape::of_rank(dims.len()),
        };
        Ok(vec![Some(Type::tensor(data.elem, shape))])
    }
}
