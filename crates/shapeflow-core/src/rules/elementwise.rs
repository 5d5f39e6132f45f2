//! Unary elementwise operators and casts

use super::{normalize_axis, InferenceRule, RuleContext, RuleOutput, RuleRegistry};
use crate::error::{InferenceError, Result};
use crate::ir::{AttributeKind, ElementKind, Shape, Type};

const UNARY_OPS: &[&str] = &[
    "Neg",
    "Abs",
    "Relu",
    "Sigmoid",
    "Tanh",
    "Exp",
    "Log",
    "Sqrt",
    "Reciprocal",
    "Floor",
    "Ceil",
    "Round",
    "Erf",
    "Sin",
    "Cos",
    "Sign",
];

pub(super) fn register(registry: &mut RuleRegistry) {
    registry.register("", "Identity", 1, IdentityRule);
    for op in UNARY_OPS {
        registry.register("", op, 1, UnaryRule);
    }
    registry.register("", "Not", 1, NotRule);
    registry.register("", "Softmax", 1, SoftmaxRule { default_axis: 1 });
    registry.register("", "Softmax", 13, SoftmaxRule { default_axis: -1 });
    registry.register("", "LogSoftmax", 1, SoftmaxRule { default_axis: 1 });
    registry.register("", "LogSoftmax", 13, SoftmaxRule { default_axis: -1 });
    registry.register("", "Dropout", 1, DropoutRule);
    registry.register("", "Cast", 1, CastRule);
    registry.register("", "CastLike", 15, CastLikeRule);
}

/// `Identity`: passes any type through, including optionals and sequences
pub struct IdentityRule;

impl InferenceRule for IdentityRule {
    fn infer(&self, ctx: &RuleContext<'_>) -> Result<RuleOutput> {
        Ok(vec![ctx.input_type(0)?.cloned()])
    }
}

/// Type-preserving tensor operators
pub struct UnaryRule;

impl InferenceRule for UnaryRule {
    fn infer(&self, ctx: &RuleContext<'_>) -> Result<RuleOutput> {
        Ok(vec![ctx.tensor(0)?.cloned().map(Type::Tensor)])
    }
}

pub struct NotRule;

impl InferenceRule for NotRule {
    fn infer(&self, ctx: &RuleContext<'_>) -> Result<RuleOutput> {
        match ctx.tensor(0)? {
            Some(input) if input.elem != ElementKind::Bool => Err(InferenceError::TypeMismatch(format!(
                "Not expects a bool tensor, found {}",
                input.elem
            ))),
            Some(input) => Ok(vec![Some(Type::Tensor(input.clone()))]),
            None => Ok(vec![Some(Type::unranked(ElementKind::Bool))]),
        }
    }
}

/// `Softmax` and `LogSoftmax`; the default axis changed at opset 13
pub struct SoftmaxRule {
    pub default_axis: i64,
}

impl InferenceRule for SoftmaxRule {
    fn infer(&self, ctx: &RuleContext<'_>) -> Result<RuleOutput> {
        let Some(input) = ctx.tensor(0)? else {
            return Ok(vec![None]);
        };
        let axis = ctx.node.attr_int("axis")?.unwrap_or(self.default_axis);
        if let Some(rank) = input.rank() {
            normalize_axis(axis, rank)?;
        }
        Ok(vec![Some(Type::Tensor(input.clone()))])
    }
}

/// `Dropout`: output plus an optional bool mask of the same shape
pub struct DropoutRule;

impl InferenceRule for DropoutRule {
    fn infer(&self, ctx: &RuleContext<'_>) -> Result<RuleOutput> {
        let input = ctx.tensor(0)?;
        let mask_shape = input.map_or(Shape::Unranked, |t| t.shape.clone());
        Ok(vec![
            input.cloned().map(Type::Tensor),
            Some(Type::tensor(ElementKind::Bool, mask_shape)),
        ])
    }
}

/// `Cast(to)`: element kind from the attribute, shape from the input
pub struct CastRule;

impl InferenceRule for CastRule {
    fn infer(&self, ctx: &RuleContext<'_>) -> Result<RuleOutput> {
        let code = ctx.node.attr_int("to")?.ok_or_else(|| InferenceError::AttributeMissing {
            name: "to".to_string(),
            expected: AttributeKind::Int,
        })?;
        let elem = ElementKind::from_code(code)
            .ok_or_else(|| InferenceError::TypeMismatch(format!("Cast to unsupported element code {code}")))?;
        let shape = ctx.tensor(0)?.map_or(Shape::Unranked, |t| t.shape.clone());
        Ok(vec![Some(Type::tensor(elem, shape))])
    }
}

/// `CastLike`: element kind of the second input, shape of the first
pub struct CastLikeRule;

impl InferenceRule for CastLikeRule {
    fn infer(&self, ctx: &RuleContext<'_>) -> Result<RuleOutput> {
        let shape = ctx.tensor(0)?.map_or(Shape::Unranked, |t| t.shape.clone());
        Ok(vec![ctx.tensor(1)?.map(|target| Type::tensor(target.elem, shape))])
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::{float, infer_one, run};
    use crate::ir::{Attribute, ElementKind, Type};

    #[test]
    fn test_unary_preserves_type() {
        assert_eq!(infer_one("Relu", 18, &[(Some(float(&[2, 3])), None)], vec![]).unwrap(), "float[2,3]");
        assert_eq!(infer_one("Exp", 18, &[(None, None)], vec![]).unwrap(), "?");
    }

    #[test]
    fn test_identity_passes_optionals() {
        let ty = Type::optional(float(&[1]));
        assert_eq!(infer_one("Identity", 18, &[(Some(ty), None)], vec![]).unwrap(), "optional(float[1])");
    }

    #[test]
    fn test_cast_uses_target_kind() {
        let out = infer_one("Cast", 18, &[(Some(float(&[4])), None)], vec![Attribute::int("to", 6)]).unwrap();
        assert_eq!(out, "int32[4]");
        let out = infer_one("Cast", 18, &[(None, None)], vec![Attribute::int("to", 7)]).unwrap();
        assert_eq!(out, "int64");
    }

    #[test]
    fn test_cast_requires_int_attribute() {
        let err = infer_one("Cast", 18, &[(Some(float(&[4])), None)], vec![]).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::AttributeMissing);
        let err = infer_one("Cast", 18, &[(Some(float(&[4])), None)], vec![Attribute::float("to", 6.0)]).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::AttributeMissing);
    }

    #[test]
    fn test_softmax_axis_checked() {
        let input = [(Some(float(&[2, 3])), None)];
        assert!(infer_one("Softmax", 13, &input, vec![Attribute::int("axis", 2)]).is_err());
        assert_eq!(infer_one("Softmax", 13, &input, vec![]).unwrap(), "float[2,3]");
    }

    #[test]
    fn test_not_requires_bool() {
        assert!(infer_one("Not", 1, &[(Some(float(&[1])), None)], vec![]).is_err());
        let bools = Type::tensor(ElementKind::Bool, crate::ir::Shape::known(&[2]));
        assert_eq!(infer_one("Not", 1, &[(Some(bools), None)], vec![]).unwrap(), "bool[2]");
    }

    #[test]
    fn test_dropout_mask() {
        let outputs = run("Dropout", 13, &[(Some(float(&[5])), None)], vec![], 2).unwrap();
        assert_eq!(outputs[1].as_ref().unwrap().to_string(), "bool[5]");
    }
}
