//! Precision order over dims, shapes and types
//!
//! `refine_*` is the meet of the lattice: it combines two descriptions of the same value into
//! the most precise one and fails on a provable conflict. `join_*` is the join used when
//! several control-flow paths may define a value.

use crate::error::{InferenceError, Result};
use crate::ir::{Dim, Shape, Type};

/// Combine two descriptions of the same axis
pub fn refine_dim(declared: &Dim, inferred: &Dim) -> Result<Dim> {
    match (declared, inferred) {
        (Dim::Known(a), Dim::Known(b)) if a != b => Err(InferenceError::ShapeMismatch(format!(
            "dimension {a} conflicts with {b}"
        ))),
        (Dim::Known(_), _) => Ok(declared.clone()),
        (_, Dim::Known(_)) => Ok(inferred.clone()),
        // Two distinct symbols may name the same length; the declared name wins.
        (Dim::Symbol(_), _) => Ok(declared.clone()),
        (Dim::Unknown, other) => Ok(other.clone()),
    }
}

pub fn refine_shape(declared: &Shape, inferred: &Shape) -> Result<Shape> {
    match (declared, inferred) {
        (Shape::Unranked, other) | (other, Shape::Unranked) => Ok(other.clone()),
        (Shape::Ranked(a), Shape::Ranked(b)) => {
            if a.len() != b.len() {
                return Err(InferenceError::ShapeMismatch(format!(
                    "rank {} conflicts with rank {} ({declared} vs {inferred})",
                    a.len(),
                    b.len()
                )));
            }
            a.iter()
                .zip(b.iter())
                .map(|(x, y)| refine_dim(x, y))
                .collect::<Result<_>>()
                .map(Shape::Ranked)
        }
    }
}

/// Most precise type consistent with both `declared` and `inferred`
pub fn refine_type(declared: &Type, inferred: &Type) -> Result<Type> {
    match (declared, inferred) {
        (Type::Tensor(a), Type::Tensor(b)) => {
            if a.elem != b.elem {
                return Err(InferenceError::TypeMismatch(format!(
                    "element kind {} conflicts with {}",
                    a.elem, b.elem
                )));
            }
            Ok(Type::tensor(a.elem, refine_shape(&a.shape, &b.shape)?))
        }
        (Type::Optional(None), Type::Optional(inner)) | (Type::Optional(inner), Type::Optional(None)) => {
            Ok(Type::Optional(inner.clone()))
        }
        (Type::Optional(Some(a)), Type::Optional(Some(b))) => Ok(Type::optional(refine_type(a, b)?)),
        (Type::Sequence(a), Type::Sequence(b)) => Ok(Type::sequence(refine_type(a, b)?)),
        _ => Err(InferenceError::TypeMismatch(format!(
            "{} type {declared} conflicts with {} type {inferred}",
            declared.constructor(),
            inferred.constructor()
        ))),
    }
}

/// [`refine_type`] where either side may be entirely unknown
pub fn refine_option(declared: Option<&Type>, inferred: Option<&Type>) -> Result<Option<Type>> {
    match (declared, inferred) {
        (Some(a), Some(b)) => refine_type(a, b).map(Some),
        (Some(ty), None) | (None, Some(ty)) => Ok(Some(ty.clone())),
        (None, None) => Ok(None),
    }
}

/// Least precise dim covering both; any disagreement is unknown
pub fn join_dim(a: &Dim, b: &Dim) -> Dim {
    if a == b {
        a.clone()
    } else {
        Dim::Unknown
    }
}

/// Dimension-wise join; disagreeing ranks give an unranked shape
pub fn join_shape(a: &Shape, b: &Shape) -> Shape {
    match (a, b) {
        (Shape::Ranked(x), Shape::Ranked(y)) if x.len() == y.len() => {
            Shape::Ranked(x.iter().zip(y.iter()).map(|(p, q)| join_dim(p, q)).collect())
        }
        _ => Shape::Unranked,
    }
}

/// Whether `fine` is at least as precise as `coarse`
pub fn dim_refines(fine: &Dim, coarse: &Dim) -> bool {
    match (fine, coarse) {
        (_, Dim::Unknown) => true,
        (Dim::Known(_), Dim::Symbol(_)) => true,
        _ => fine == coarse,
    }
}

pub fn shape_refines(fine: &Shape, coarse: &Shape) -> bool {
    match (fine, coarse) {
        (_, Shape::Unranked) => true,
        (Shape::Unranked, Shape::Ranked(_)) => false,
        (Shape::Ranked(a), Shape::Ranked(b)) => {
            a.len() == b.len() && a.iter().zip(b.iter()).all(|(x, y)| dim_refines(x, y))
        }
    }
}

pub fn type_refines(fine: &Type, coarse: &Type) -> bool {
    match (fine, coarse) {
        (Type::Tensor(a), Type::Tensor(b)) => a.elem == b.elem && shape_refines(&a.shape, &b.shape),
        (Type::Optional(_), Type::Optional(None)) => true,
        (Type::Optional(Some(a)), Type::Optional(Some(b))) => type_refines(a, b),
        (Type::Sequence(a), Type::Sequence(b)) => type_refines(a, b),
        _ => false,
    }
}

/// [`type_refines`] lifted to possibly-unknown types
pub fn refines(fine: Option<&Type>, coarse: Option<&Type>) -> bool {
    match (fine, coarse) {
        (_, None) => true,
        (None, Some(_)) => false,
        (Some(a), Some(b)) => type_refines(a, b),
    }
}
