//! Multidirectional (numpy-style) broadcasting over symbolic shapes
//!
//! Shapes are aligned from the trailing dimension. Missing leading dimensions behave as `1`.

use crate::error::{InferenceError, Result};
use crate::ir::{Dim, Dims, Shape, TensorType};

/// Broadcast one aligned pair of dimensions
pub fn broadcast_dim(lhs: &Dim, rhs: &Dim) -> Result<Dim> {
    match (lhs, rhs) {
        (Dim::Known(a), Dim::Known(b)) if a == b => Ok(lhs.clone()),
        (Dim::Known(1), other) | (other, Dim::Known(1)) => Ok(other.clone()),
        (Dim::Known(a), Dim::Known(b)) => Err(InferenceError::ShapeMismatch(format!(
            "dimensions {a} and {b} cannot be broadcast"
        ))),
        (Dim::Symbol(a), Dim::Symbol(b)) if a == b => Ok(lhs.clone()),
        _ => Ok(Dim::Unknown),
    }
}

/// Broadcast two shapes. An unranked operand gives an unranked result.
pub fn broadcast_shapes(lhs: &Shape, rhs: &Shape) -> Result<Shape> {
    let (Shape::Ranked(a), Shape::Ranked(b)) = (lhs, rhs) else {
        return Ok(Shape::Unranked);
    };
    let rank = a.len().max(b.len());
    let mut dims = Dims::with_capacity(rank);
    for i in 0..rank {
        let x = i.checked_sub(rank - a.len()).map(|j| &a[j]);
        let y = i.checked_sub(rank - b.len()).map(|j| &b[j]);
        let dim = match (x, y) {
            (Some(x), Some(y)) => broadcast_dim(x, y).map_err(|err| match err {
                InferenceError::ShapeMismatch(_) => {
                    InferenceError::ShapeMismatch(format!("shapes {lhs} and {rhs} cannot be broadcast"))
                }
                other => other,
            })?,
            (Some(d), None) | (None, Some(d)) => d.clone(),
            (None, None) => Dim::Unknown,
        };
        dims.push(dim);
    }
    Ok(Shape::Ranked(dims))
}

/// Broadcast any number of shapes, left to right
pub fn broadcast_all<'a>(shapes: impl IntoIterator<Item = &'a Shape>) -> Result<Shape> {
    let mut iter = shapes.into_iter();
    let Some(first) = iter.next() else {
        return Ok(Shape::scalar());
    };
    iter.try_fold(first.clone(), |acc, shape| broadcast_shapes(&acc, shape))
}

/// Broadcast two tensor operands that must share an element kind
pub fn broadcast_tensors(lhs: &TensorType, rhs: &TensorType) -> Result<TensorType> {
    if lhs.elem != rhs.elem {
        return Err(InferenceError::TypeMismatch(format!(
            "operand element kinds {} and {} differ",
            lhs.elem, rhs.elem
        )));
    }
    Ok(TensorType::new(lhs.elem, broadcast_shapes(&lhs.shape, &rhs.shape)?))
}
