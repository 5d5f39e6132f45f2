//! Reductions

use super::{normalize_axes, normalize_axis, Axes, AxesSource, InferenceRule, RuleContext, RuleOutput, RuleRegistry};
use crate::error::Result;
use crate::ir::{Dim, Dims, ElementKind, Shape, Type};

pub(super) fn register(registry: &mut RuleRegistry) {
    registry.register("", "ReduceSum", 1, ReduceRule { axes: AxesSource::Attribute });
    registry.register("", "ReduceSum", 13, ReduceRule { axes: AxesSource::Input(1) });
    for op in ["ReduceMean", "ReduceMax", "ReduceMin"] {
        registry.register("", op, 1, ReduceRule { axes: AxesSource::Attribute });
        registry.register("", op, 18, ReduceRule { axes: AxesSource::Input(1) });
    }
    registry.register("", "ArgMax", 1, ArgReduceRule);
    registry.register("", "ArgMin", 1, ArgReduceRule);
}

/// Keep or drop the reduced axes of `dims`
fn reduced(dims: &[Dim], axes: &[usize], keep_dims: bool) -> Shape {
    let mut out = Dims::with_capacity(dims.len());
    for (i, dim) in dims.iter().enumerate() {
        if !axes.contains(&i) {
            out.push(dim.clone());
        } else if keep_dims {
            out.push(Dim::Known(1));
        }
    }
    Shape::Ranked(out)
}

/// `ReduceSum`-style operators. An absent axes list reduces every axis unless
/// `noop_with_empty_axes` is set.
pub struct ReduceRule {
    pub axes: AxesSource,
}

impl InferenceRule for ReduceRule {
    fn infer(&self, ctx: &RuleContext<'_>) -> Result<RuleOutput> {
        let Some(data) = ctx.tensor(0)? else {
            return Ok(vec![None]);
        };
        let keep_dims = ctx.node.attr_int("keepdims")?.unwrap_or(1) != 0;
        let noop_when_empty = ctx.node.attr_int("noop_with_empty_axes")?.unwrap_or(0) != 0;
        let axes = ctx.axes(self.axes)?;
        let Some(dims) = data.shape.dims() else {
            return Ok(vec![Some(Type::unranked(data.elem))]);
        };

        let axes = match axes {
            Axes::Known(axes) if !axes.is_empty() => normalize_axes(&axes, dims.len())?,
            Axes::Unknown if keep_dims => {
                return Ok(vec![Some(Type::tensor(data.elem, Shape::of_rank(dims.len())))]);
            }
            Axes::Unknown => return Ok(vec![Some(Type::unranked(data.elem))]),
            _ if noop_when_empty => return Ok(vec![Some(Type::Tensor(data.clone()))]),
            _ => (0..dims.len()).collect(),
        };
        Ok(vec![Some(Type::tensor(data.elem, reduced(dims, &axes, keep_dims)))])
    }
}

/// `ArgMax` / `ArgMin`: int64 indices along one axis
pub struct ArgReduceRule;

impl InferenceRule for ArgReduceRule {
    fn infer(&self, ctx: &RuleContext<'_>) -> Result<RuleOutput> {
        let data = ctx.tensor(0)?;
        let axis = ctx.node.attr_int("axis")?.unwrap_or(0);
        let keep_dims = ctx.node.attr_int("keepdims")?.unwrap_or(1) != 0;
        let shape = match data.and_then(|t| t.shape.dims()) {
            Some(dims) => reduced(dims, &[normalize_axis(axis, dims.len())?], keep_dims),
            None => Shape::Unranked,
        };
        Ok(vec![Some(Type::tensor(ElementKind::Int64, shape))])
    }
}
