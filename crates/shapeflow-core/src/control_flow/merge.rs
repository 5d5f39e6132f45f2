//! Type join across control-flow paths
//!
//! Branch outputs are unified position by position. Element kinds must agree exactly; shapes
//! keep only what every path agrees on.

use crate::error::{InferenceError, Result};
use crate::ir::Type;
use crate::symbolic::join_shape;

/// Least precise type covering both `a` and `b`
pub fn merge_types(a: &Type, b: &Type) -> Result<Type> {
    match (a, b) {
        (Type::Tensor(x), Type::Tensor(y)) => {
            if x.elem != y.elem {
                return Err(InferenceError::TypeMismatch(format!(
                    "element kinds {} and {} cannot be merged",
                    x.elem, y.elem
                )));
            }
            Ok(Type::tensor(x.elem, join_shape(&x.shape, &y.shape)))
        }
        (Type::Optional(Some(x)), Type::Optional(Some(y))) => Ok(Type::optional(merge_types(x, y)?)),
        (Type::Optional(_), Type::Optional(_)) => Ok(Type::Optional(None)),
        (Type::Sequence(x), Type::Sequence(y)) => Ok(Type::sequence(merge_types(x, y)?)),
        _ => Err(InferenceError::TypeMismatch(format!(
            "{a} and {b} cannot be merged"
        ))),
    }
}

/// Merge possibly unknown types from several paths.
///
/// Known types are checked against each other first, so a conflict is reported even when some
/// path left its type unknown; the merged result is unknown if any path's type is.
pub fn merge_all<'a>(types: impl IntoIterator<Item = Option<&'a Type>>) -> Result<Option<Type>> {
    let mut merged: Option<Type> = None;
    let mut any_unknown = false;
    for ty in types {
        match ty {
            Some(ty) => {
                merged = Some(match merged {
                    Some(acc) => merge_types(&acc, ty)?,
                    None => ty.clone(),
                });
            }
            None => any_unknown = true,
        }
    }
    Ok(if any_unknown { None } else { merged })
}
