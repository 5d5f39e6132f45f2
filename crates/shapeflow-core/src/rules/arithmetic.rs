//! Broadcasting binary and variadic operators

use super::{common_elem, InferenceRule, RuleContext, RuleOutput, RuleRegistry};
use crate::error::{InferenceError, Result};
use crate::ir::{ElementKind, Shape, TensorType, Type};
use crate::symbolic::broadcast_shapes;

pub(super) fn register(registry: &mut RuleRegistry) {
    for op in ["Add", "Sub", "Mul", "Div", "Mod"] {
        registry.register("", op, 1, BinaryRule { result: ResultKind::SameAsOperands, operands: OperandKind::Numeric });
    }
    registry.register("", "BitShift", 11, BinaryRule { result: ResultKind::SameAsOperands, operands: OperandKind::Integer });
    for op in ["Equal", "Less", "Greater", "LessOrEqual", "GreaterOrEqual"] {
        registry.register("", op, 1, BinaryRule { result: ResultKind::Bool, operands: OperandKind::Any });
    }
    for op in ["And", "Or", "Xor"] {
        registry.register("", op, 1, BinaryRule { result: ResultKind::Bool, operands: OperandKind::Bool });
    }
    registry.register("", "Pow", 1, PowRule);
    for op in ["Max", "Min", "Sum", "Mean"] {
        registry.register("", op, 1, VariadicRule);
    }
    registry.register("", "Where", 9, WhereRule);
}

/// Element kind of a binary operator's result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultKind {
    SameAsOperands,
    Bool,
}

/// Element kinds a binary operator accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperandKind {
    Any,
    Numeric,
    Integer,
    Bool,
}

impl OperandKind {
    fn accepts(self, elem: ElementKind) -> bool {
        match self {
            OperandKind::Any => true,
            OperandKind::Numeric => elem.is_numeric(),
            OperandKind::Integer => elem.is_integer(),
            OperandKind::Bool => elem == ElementKind::Bool,
        }
    }
}

/// Broadcast shape of all operands; any unknown operand gives an unranked shape
fn broadcast_operands(operands: &[Option<&TensorType>]) -> Result<Shape> {
    let mut shape: Option<Shape> = None;
    let mut any_unknown = false;
    for operand in operands {
        match operand {
            Some(tensor) => {
                shape = Some(match shape {
                    Some(acc) => broadcast_shapes(&acc, &tensor.shape)?,
                    None => tensor.shape.clone(),
                });
            }
            None => any_unknown = true,
        }
    }
    Ok(match shape {
        Some(shape) if !any_unknown => shape,
        _ => Shape::Unranked,
    })
}

/// Two-operand broadcasting operator
pub struct BinaryRule {
    pub result: ResultKind,
    pub operands: OperandKind,
}

impl InferenceRule for BinaryRule {
    fn infer(&self, ctx: &RuleContext<'_>) -> Result<RuleOutput> {
        let operands = [ctx.tensor(0)?, ctx.tensor(1)?];
        let elem = common_elem(ctx.op(), &operands)?;
        if let Some(elem) = elem {
            if !self.operands.accepts(elem) {
                return Err(InferenceError::TypeMismatch(format!(
                    "{} does not accept {elem} operands",
                    ctx.op()
                )));
            }
        }
        let shape = broadcast_operands(&operands)?;
        let elem = match self.result {
            ResultKind::Bool => Some(ElementKind::Bool),
            ResultKind::SameAsOperands => elem,
        };
        Ok(vec![elem.map(|elem| Type::tensor(elem, shape))])
    }
}

/// `Pow`: the result takes the base's element kind; the exponent may differ
pub struct PowRule;

impl InferenceRule for PowRule {
    fn infer(&self, ctx: &RuleContext<'_>) -> Result<RuleOutput> {
        let base = ctx.tensor(0)?;
        let exponent = ctx.tensor(1)?;
        let shape = broadcast_operands(&[base, exponent])?;
        Ok(vec![base.map(|base| Type::tensor(base.elem, shape))])
    }
}

/// `Max`, `Min`, `Sum`, `Mean`: any number of broadcast operands of one kind
pub struct VariadicRule;

impl InferenceRule for VariadicRule {
    fn infer(&self, ctx: &RuleContext<'_>) -> Result<RuleOutput> {
        if ctx.num_inputs() == 0 {
            return Err(InferenceError::MissingRequiredInput { index: 0 });
        }
        let operands = (0..ctx.num_inputs())
            .map(|i| ctx.tensor(i))
            .collect::<Result<Vec<_>>>()?;
        let elem = common_elem(ctx.op(), &operands)?;
        let shape = broadcast_operands(&operands)?;
        Ok(vec![elem.map(|elem| Type::tensor(elem, shape))])
    }
}

/// `Where(condition, x, y)`: three-way broadcast, kind of `x`/`y`
pub struct WhereRule;

impl InferenceRule for WhereRule {
    fn infer(&self, ctx: &RuleContext<'_>) -> Result<RuleOutput> {
        let condition = ctx.tensor(0)?;
        if let Some(condition) = condition {
            if condition.elem != ElementKind::Bool {
                return Err(InferenceError::TypeMismatch(format!(
                    "Where condition must be bool, found {}",
                    condition.elem
                )));
            }
        }
        let branches = [ctx.tensor(1)?, ctx.tensor(2)?];
        let elem = common_elem(ctx.op(), &branches)?;
        let shape = broadcast_operands(&[condition, branches[0], branches[1]])?;
        Ok(vec![elem.map(|elem| Type::tensor(elem, shape))])
    }
}
