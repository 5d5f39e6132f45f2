//! Matrix products

use super::{common_elem, InferenceRule, RuleContext, RuleOutput, RuleRegistry};
use crate::error::{InferenceError, Result};
use crate::ir::{Dim, Dims, Shape, Type};
use crate::symbolic::{broadcast_shapes, refine_dim};

pub(super) fn register(registry: &mut RuleRegistry) {
    registry.register("", "MatMul", 1, MatMulRule);
    registry.register("", "Gemm", 1, GemmRule);
}

fn contract(lhs: &Dim, rhs: &Dim) -> Result<()> {
    refine_dim(lhs, rhs).map(|_| ()).map_err(|_| {
        InferenceError::ShapeMismatch(format!("inner dimensions {lhs} and {rhs} differ"))
    })
}

/// Numpy `matmul` shape: 1-D operands are promoted and the promoted axis dropped afterwards,
/// leading batch dimensions broadcast
pub fn matmul_shape(lhs: &Shape, rhs: &Shape) -> Result<Shape> {
    let (Some(a), Some(b)) = (lhs.dims(), rhs.dims()) else {
        return Ok(Shape::Unranked);
    };
    if a.is_empty() || b.is_empty() {
        return Err(InferenceError::ShapeMismatch("MatMul operands cannot be scalars".to_string()));
    }
    let a: Dims = if a.len() == 1 {
        [Dim::Known(1), a[0].clone()].into_iter().collect()
    } else {
        a.iter().cloned().collect()
    };
    let b: Dims = if b.len() == 1 {
        [b[0].clone(), Dim::Known(1)].into_iter().collect()
    } else {
        b.iter().cloned().collect()
    };
    let (ra, rb) = (a.len(), b.len());
    contract(&a[ra - 1], &b[rb - 2])?;

    let batch = broadcast_shapes(
        &Shape::from_dims(a[..ra - 2].iter().cloned()),
        &Shape::from_dims(b[..rb - 2].iter().cloned()),
    )?;
    let mut dims: Dims = batch.dims().map(|d| d.iter().cloned().collect()).unwrap_or_default();
    if lhs.rank() != Some(1) {
        dims.push(a[ra - 2].clone());
    }
    if rhs.rank() != Some(1) {
        dims.push(b[rb - 1].clone());
    }
    Ok(Shape::Ranked(dims))
}

pub struct MatMulRule;

impl InferenceRule for MatMulRule {
    fn infer(&self, ctx: &RuleContext<'_>) -> Result<RuleOutput> {
        let operands = [ctx.tensor(0)?, ctx.tensor(1)?];
        let Some(elem) = common_elem(ctx.op(), &operands)? else {
            return Ok(vec![None]);
        };
        let shape = match operands {
            [Some(a), Some(b)] => matmul_shape(&a.shape, &b.shape)?,
            _ => Shape::Unranked,
        };
        Ok(vec![Some(Type::tensor(elem, shape))])
    }
}

/// `Gemm`: `alpha * A' * B' + beta * C` over 2-D operands
pub struct GemmRule;

impl GemmRule {
    fn matrix<'d>(dims: Option<&'d [Dim]>, name: &str, transposed: bool) -> Result<Option<(&'d Dim, &'d Dim)>> {
        match dims {
            None => Ok(None),
            Some([rows, cols]) if transposed => Ok(Some((cols, rows))),
            Some([rows, cols]) => Ok(Some((rows, cols))),
            Some(other) => Err(InferenceError::ShapeMismatch(format!(
                "Gemm operand {name} must be 2-D, found rank {}",
                other.len()
            ))),
        }
    }
}

impl InferenceRule for GemmRule {
    fn infer(&self, ctx: &RuleContext<'_>) -> Result<RuleOutput> {
        let a = ctx.tensor(0)?;
        let b = ctx.tensor(1)?;
        let c = ctx.optional_tensor(2)?;
        let Some(elem) = common_elem(ctx.op(), &[a, b, c])? else {
            return Ok(vec![None]);
        };
        let trans_a = ctx.node.attr_int("transA")?.unwrap_or(0) != 0;
        let trans_b = ctx.node.attr_int("transB")?.unwrap_or(0) != 0;
        let a = Self::matrix(a.and_then(|t| t.shape.dims()), "A", trans_a)?;
        let b = Self::matrix(b.and_then(|t| t.shape.dims()), "B", trans_b)?;
        if let (Some((_, k1)), Some((k2, _))) = (a, b) {
            contract(k1, k2)?;
        }
        let m = a.map_or(Dim::Unknown, |(m, _)| m.clone());
        let n = b.map_or(Dim::Unknown, |(_, n)| n.clone());
        let shape = Shape::from_dims([m, n]);
        if let Some(c) = c {
            broadcast_shapes(&c.shape, &shape)?;
        }
        Ok(vec![Some(Type::tensor(elem, shape))])
    }
}
