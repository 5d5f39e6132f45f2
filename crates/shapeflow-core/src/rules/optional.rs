//! Optional values: construction, presence check and element extraction
//!
//! From opset 18 the introspection operators also accept plain tensors and sequences (which
//! are always present) and an omitted input (always absent).

use super::{constant_data, InferenceRule, RuleContext, RuleOutput, RuleRegistry};
use crate::error::{InferenceError, Result};
use crate::ir::{AttributeKind, ElementKind, Type};
use crate::symbolic::refine_option;

pub(super) fn register(registry: &mut RuleRegistry) {
    registry.register("", "Optional", 15, OptionalRule);
    registry.register("", "OptionalHasElement", 15, HasElementRule { accepts_plain: false });
    registry.register("", "OptionalHasElement", 18, HasElementRule { accepts_plain: true });
    registry.register("", "OptionalGetElement", 15, GetElementRule { accepts_plain: false });
    registry.register("", "OptionalGetElement", 18, GetElementRule { accepts_plain: true });
}

fn missing_type_hint() -> InferenceError {
    InferenceError::AttributeMissing {
        name: "type".to_string(),
        expected: AttributeKind::Type,
    }
}

/// `Optional(input?)`: wraps its input, a constant value attribute, or nothing
pub struct OptionalRule;

impl InferenceRule for OptionalRule {
    fn infer(&self, ctx: &RuleContext<'_>) -> Result<RuleOutput> {
        let hint = ctx.node.attr_type("type")?;
        let value = constant_data(ctx.node)?;
        let inner = match (ctx.is_present(0), value) {
            (true, Some(_)) => {
                return Err(InferenceError::TypeMismatch(
                    "Optional takes either an input or a value attribute, not both".to_string(),
                ))
            }
            (true, None) => refine_option(hint, ctx.input_type(0)?)?,
            (false, Some(value)) => refine_option(hint, Some(&value.value_type()))?,
            (false, None) => Some(hint.cloned().ok_or_else(missing_type_hint)?),
        };
        Ok(vec![Some(Type::Optional(inner.map(Box::new)))])
    }
}

pub struct HasElementRule {
    pub accepts_plain: bool,
}

impl InferenceRule for HasElementRule {
    fn infer(&self, ctx: &RuleContext<'_>) -> Result<RuleOutput> {
        if !self.accepts_plain {
            match ctx.input_type(0)? {
                Some(ty) if !ty.is_optional() => {
                    return Err(InferenceError::TypeMismatch(format!(
                        "OptionalHasElement expects an optional input, found {ty}"
                    )))
                }
                _ => {}
            }
        }
        Ok(vec![Some(Type::scalar(ElementKind::Bool))])
    }
}

pub struct GetElementRule {
    pub accepts_plain: bool,
}

impl InferenceRule for GetElementRule {
    fn infer(&self, ctx: &RuleContext<'_>) -> Result<RuleOutput> {
        let hint = ctx.node.attr_type("type")?;
        if !ctx.is_present(0) {
            if !self.accepts_plain {
                return Err(InferenceError::MissingRequiredInput { index: 0 });
            }
            return Ok(vec![Some(hint.cloned().ok_or_else(missing_type_hint)?)]);
        }
        let element = match ctx.input_type(0)? {
            None => hint.cloned(),
            // The hint only stands in for an element type the input does not carry.
            Some(Type::Optional(Some(inner))) => Some(inner.as_ref().clone()),
            Some(Type::Optional(None)) => Some(hint.cloned().ok_or_else(missing_type_hint)?),
            Some(plain) if self.accepts_plain => Some(plain.clone()),
            Some(plain) => {
                return Err(InferenceError::TypeMismatch(format!(
                    "OptionalGetElement expects an optional input, found {plain}"
                )))
            }
        };
        Ok(vec![element])
    }
}
