//! Operator inference rules
//!
//! Each operator has a rule mapping input types, known partial values and attributes to
//! output types. Rules are registered per `(domain, op_type)` with the opset version they
//! apply from; a lookup picks the newest rule not newer than the requested version.
//!
//! Rules are monotone: an unknown input yields an unknown (or less precise) output instead of
//! an error. They fail only when the inputs they do know about are provably inconsistent.

mod arithmetic;
mod elementwise;
mod linalg;
mod optional;
mod reduce;
mod sequence;
mod tensor;

use crate::error::{InferenceError, Result};
use crate::ir::{model::normalize_domain, ElementKind, Node, TensorData, TensorType, Type};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

pub use arithmetic::*;
pub use elementwise::*;
pub use linalg::*;
pub use optional::*;
pub use reduce::*;
pub use sequence::*;
pub use tensor::*;

/// Output types of one node application, positionally; `None` is an unknown type
pub type RuleOutput = Vec<Option<Type>>;

/// Trait for per-operator inference rules
pub trait InferenceRule: Send + Sync {
    fn infer(&self, ctx: &RuleContext<'_>) -> Result<RuleOutput>;
}

impl<F> InferenceRule for F
where
    F: Fn(&RuleContext<'_>) -> Result<RuleOutput> + Send + Sync,
{
    fn infer(&self, ctx: &RuleContext<'_>) -> Result<RuleOutput> {
        self(ctx)
    }
}

/// What a rule knows about one positional input
#[derive(Debug, Clone, Copy, Default)]
pub struct RuleInput<'a> {
    /// `None` when the input is omitted
    pub name: Option<&'a str>,
    pub ty: Option<&'a Type>,
    pub value: Option<&'a TensorData>,
}

/// Everything a rule may look at for one node
#[derive(Debug)]
pub struct RuleContext<'a> {
    pub node: &'a Node,
    /// Opset version the node is interpreted at
    pub version: i64,
    pub inputs: Vec<RuleInput<'a>>,
}

/// Where a list of axes comes from for operators that moved it from an attribute to an input
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AxesSource {
    Attribute,
    Input(usize),
}

/// An axes list as far as it is statically known
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Axes {
    Absent,
    Known(Vec<i64>),
    Unknown,
}

impl<'a> RuleContext<'a> {
    pub fn new(node: &'a Node, version: i64, inputs: Vec<RuleInput<'a>>) -> Self {
        Self {
            node,
            version,
            inputs,
        }
    }

    pub fn op(&self) -> &str {
        &self.node.op_type
    }

    pub fn num_inputs(&self) -> usize {
        self.inputs.len()
    }

    pub fn num_outputs(&self) -> usize {
        self.node.outputs.len()
    }

    pub fn is_present(&self, index: usize) -> bool {
        self.inputs.get(index).is_some_and(|input| input.name.is_some())
    }

    /// A non-omitted input
    pub fn require(&self, index: usize) -> Result<&RuleInput<'a>> {
        match self.inputs.get(index) {
            Some(input) if input.name.is_some() => Ok(input),
            _ => Err(InferenceError::MissingRequiredInput { index }),
        }
    }

    pub fn input_type(&self, index: usize) -> Result<Option<&'a Type>> {
        Ok(self.require(index)?.ty)
    }

    /// Tensor type of a required input; a non-tensor type is a mismatch
    pub fn tensor(&self, index: usize) -> Result<Option<&'a TensorType>> {
        match self.input_type(index)? {
            None => Ok(None),
            Some(Type::Tensor(tensor)) => Ok(Some(tensor)),
            Some(other) => Err(InferenceError::TypeMismatch(format!(
                "input #{index} of {} must be a tensor, found {other}",
                self.op()
            ))),
        }
    }

    /// Tensor type of an input that may be omitted
    pub fn optional_tensor(&self, index: usize) -> Result<Option<&'a TensorType>> {
        if self.is_present(index) {
            self.tensor(index)
        } else {
            Ok(None)
        }
    }

    pub fn value(&self, index: usize) -> Option<&'a TensorData> {
        self.inputs.get(index).and_then(|input| input.value)
    }

    /// Known integer elements of a scalar or 1-D input
    pub fn int_values(&self, index: usize) -> Option<Vec<i64>> {
        self.value(index).and_then(TensorData::to_int_vec)
    }

    /// Resolve an axes list from its attribute or input
    pub fn axes(&self, source: AxesSource) -> Result<Axes> {
        match source {
            AxesSource::Attribute => Ok(match self.node.attr_ints("axes")? {
                Some(axes) => Axes::Known(axes.to_vec()),
                None => Axes::Absent,
            }),
            AxesSource::Input(index) if !self.is_present(index) => Ok(Axes::Absent),
            AxesSource::Input(index) => Ok(match self.int_values(index) {
                Some(axes) => Axes::Known(axes),
                None => Axes::Unknown,
            }),
        }
    }

    /// Same type for every output
    pub fn broadcast_output(&self, ty: Option<Type>) -> RuleOutput {
        vec![ty; self.num_outputs().max(1)]
    }
}

/// Normalize a possibly negative axis against a known rank
pub fn normalize_axis(axis: i64, rank: usize) -> Result<usize> {
    let signed_rank = rank as i64;
    let normalized = if axis < 0 { axis + signed_rank } else { axis };
    if (0..signed_rank).contains(&normalized) {
        Ok(normalized as usize)
    } else {
        Err(InferenceError::ShapeMismatch(format!(
            "axis {axis} is out of range for rank {rank}"
        )))
    }
}

/// Normalize a list of axes, rejecting duplicates
pub fn normalize_axes(axes: &[i64], rank: usize) -> Result<Vec<usize>> {
    let mut normalized = Vec::with_capacity(axes.len());
    for &axis in axes {
        let axis = normalize_axis(axis, rank)?;
        if normalized.contains(&axis) {
            return Err(InferenceError::ShapeMismatch(format!("axis {axis} is repeated")));
        }
        normalized.push(axis);
    }
    Ok(normalized)
}

/// Common element kind of the known operands; every known operand must agree
pub(crate) fn common_elem(op: &str, operands: &[Option<&TensorType>]) -> Result<Option<ElementKind>> {
    let mut elem: Option<ElementKind> = None;
    for operand in operands.iter().flatten() {
        match elem {
            Some(seen) if seen != operand.elem => {
                return Err(InferenceError::TypeMismatch(format!(
                    "{op} operands have element kinds {seen} and {}",
                    operand.elem
                )));
            }
            _ => elem = Some(operand.elem),
        }
    }
    Ok(elem)
}

type RuleVersions = BTreeMap<i64, Arc<dyn InferenceRule>>;

/// Registry of operator rules, keyed by domain and operator and versioned by opset
pub struct RuleRegistry {
    rules: HashMap<(String, String), RuleVersions>,
}

impl RuleRegistry {
    /// Registry preloaded with the default-domain operators
    pub fn new() -> Self {
        let mut registry = Self::empty();
        elementwise::register(&mut registry);
        arithmetic::register(&mut registry);
        tensor::register(&mut registry);
        reduce::register(&mut registry);
        linalg::register(&mut registry);
        optional::register(&mut registry);
        sequence::register(&mut registry);
        registry
    }

    pub fn empty() -> Self {
        Self { rules: HashMap::new() }
    }

    /// Register `rule` for `op_type` from opset `since_version` on
    pub fn register(
        &mut self,
        domain: &str,
        op_type: &str,
        since_version: i64,
        rule: impl InferenceRule + 'static,
    ) {
        self.register_shared(domain, op_type, since_version, Arc::new(rule));
    }

    pub fn register_shared(
        &mut self,
        domain: &str,
        op_type: &str,
        since_version: i64,
        rule: Arc<dyn InferenceRule>,
    ) {
        self.rules
            .entry((normalize_domain(domain).to_string(), op_type.to_string()))
            .or_default()
            .insert(since_version, rule);
    }

    /// Newest rule for `op_type` whose version does not exceed `version`
    pub fn lookup(&self, domain: &str, op_type: &str, version: i64) -> Result<&dyn InferenceRule> {
        let domain = normalize_domain(domain);
        self.rules
            .get(&(domain.to_string(), op_type.to_string()))
            .and_then(|versions| versions.range(..=version).next_back())
            .map(|(_, rule)| rule.as_ref())
            .ok_or_else(|| InferenceError::UnknownOperator {
                domain: domain.to_string(),
                op_type: op_type.to_string(),
                version,
            })
    }

    pub fn contains(&self, domain: &str, op_type: &str) -> bool {
        self.rules
            .contains_key(&(normalize_domain(domain).to_string(), op_type.to_string()))
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

impl Default for RuleRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for RuleRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuleRegistry")
            .field("operators", &self.rules.len())
            .finish()
    }
}
