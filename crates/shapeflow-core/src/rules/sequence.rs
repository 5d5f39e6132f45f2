//! Sequences of tensors
//!
//! Element types of a sequence built from several tensors are merged with the same policy as
//! control-flow branches: the element kind must agree, shapes keep what all members share.

use super::{InferenceRule, RuleContext, RuleOutput, RuleRegistry};
use crate::control_flow::merge_types;
use crate::error::{InferenceError, Result};
use crate::ir::{ElementKind, Type};

pub(super) fn register(registry: &mut RuleRegistry) {
    registry.register("", "SequenceEmpty", 11, SequenceEmptyRule);
    registry.register("", "SequenceConstruct", 11, SequenceConstructRule);
    registry.register("", "SequenceAt", 11, SequenceAtRule);
    registry.register("", "SequenceLength", 11, SequenceLengthRule);
    registry.register("", "SequenceInsert", 11, SequenceInsertRule);
}

/// Element type of a sequence-typed input, `None` when unknown
fn element_type<'a>(ctx: &RuleContext<'a>, index: usize) -> Result<Option<&'a Type>> {
    match ctx.input_type(index)? {
        None => Ok(None),
        Some(Type::Sequence(element)) => Ok(Some(element.as_ref())),
        Some(other) => Err(InferenceError::TypeMismatch(format!(
            "input #{index} of {} must be a sequence, found {other}",
            ctx.op()
        ))),
    }
}

/// Merge sequence member types; an unknown member leaves only the element kind known
fn merge_members(op: &str, members: &[Option<&Type>]) -> Result<Option<Type>> {
    let mut merged: Option<Type> = None;
    for member in members.iter().flatten() {
        merged = Some(match merged {
            Some(acc) => merge_types(&acc, member)
                .map_err(|err| InferenceError::TypeMismatch(format!("{op} members disagree: {err}")))?,
            None => (*member).clone(),
        });
    }
    if members.iter().any(Option::is_none) {
        return Ok(merged.and_then(|ty| ty.elem()).map(Type::unranked));
    }
    Ok(merged)
}

/// `SequenceEmpty(dtype)`
pub struct SequenceEmptyRule;

impl InferenceRule for SequenceEmptyRule {
    fn infer(&self, ctx: &RuleContext<'_>) -> Result<RuleOutput> {
        let elem = match ctx.node.attr_int("dtype")? {
            None => ElementKind::Float,
            Some(code) => ElementKind::from_code(code).ok_or_else(|| {
                InferenceError::TypeMismatch(format!("SequenceEmpty of unsupported element code {code}"))
            })?,
        };
        Ok(vec![Some(Type::sequence(Type::unranked(elem)))])
    }
}

pub struct SequenceConstructRule;

impl InferenceRule for SequenceConstructRule {
    fn infer(&self, ctx: &RuleContext<'_>) -> Result<RuleOutput> {
        if ctx.num_inputs() == 0 {
            return Err(InferenceError::MissingRequiredInput { index: 0 });
        }
        let members = (0..ctx.num_inputs())
            .map(|i| ctx.tensor(i).map(|t| t.and(ctx.inputs[i].ty)))
            .collect::<Result<Vec<_>>>()?;
        Ok(vec![merge_members(ctx.op(), &members)?.map(Type::sequence)])
    }
}

pub struct SequenceAtRule;

impl InferenceRule for SequenceAtRule {
    fn infer(&self, ctx: &RuleContext<'_>) -> Result<RuleOutput> {
        ctx.require(1)?;
        Ok(vec![element_type(ctx, 0)?.cloned()])
    }
}

pub struct SequenceLengthRule;

impl InferenceRule for SequenceLengthRule {
    fn infer(&self, ctx: &RuleContext<'_>) -> Result<RuleOutput> {
        element_type(ctx, 0)?;
        Ok(vec![Some(Type::scalar(ElementKind::Int64))])
    }
}

pub struct SequenceInsertRule;

impl InferenceRule for SequenceInsertRule {
    fn infer(&self, ctx: &RuleContext<'_>) -> Result<RuleOutput> {
        let element = element_type(ctx, 0)?;
        let inserted = ctx.tensor(1)?.and(ctx.inputs[1].ty);
        let merged = merge_members(ctx.op(), &[element, inserted])?;
        Ok(vec![merged.map(Type::sequence)])
    }
}
