//! Small concrete tensors: constant attributes, initializers and partial values

use super::types::{ElementKind, Shape, TensorType, Type};
use crate::error::{InferenceError, Result};
use serde::{Deserialize, Serialize};

/// Flat element storage. Every integer kind is widened to `i64`, every float kind to `f64`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TensorValues {
    Ints(Vec<i64>),
    Floats(Vec<f64>),
    Bools(Vec<bool>),
    Strings(Vec<String>),
}

impl TensorValues {
    pub fn len(&self) -> usize {
        match self {
            TensorValues::Ints(v) => v.len(),
            TensorValues::Floats(v) => v.len(),
            TensorValues::Bools(v) => v.len(),
            TensorValues::Strings(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Storage variant that holds elements of `elem`
    fn accepts(&self, elem: ElementKind) -> bool {
        match self {
            TensorValues::Ints(_) => elem.is_integer(),
            TensorValues::Floats(_) => elem.is_float(),
            TensorValues::Bools(_) => elem == ElementKind::Bool,
            TensorValues::Strings(_) => elem == ElementKind::String,
        }
    }
}

/// A concrete tensor value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TensorData {
    pub elem: ElementKind,
    pub dims: Vec<usize>,
    pub values: TensorValues,
}

impl TensorData {
    /// Build a tensor, checking the element count and storage variant
    pub fn new(elem: ElementKind, dims: Vec<usize>, values: TensorValues) -> Result<Self> {
        let expected: usize = dims.iter().product();
        if values.len() != expected {
            return Err(InferenceError::ShapeMismatch(format!(
                "tensor of shape {dims:?} needs {expected} elements, found {}",
                values.len()
            )));
        }
        if !values.accepts(elem) {
            return Err(InferenceError::TypeMismatch(format!(
                "element storage does not hold {elem} values"
            )));
        }
        Ok(Self { elem, dims, values })
    }

    /// 1-D int64 tensor
    pub fn ints(values: Vec<i64>) -> Self {
        Self {
            elem: ElementKind::Int64,
            dims: vec![values.len()],
            values: TensorValues::Ints(values),
        }
    }

    /// int64 scalar
    pub fn int_scalar(value: i64) -> Self {
        Self {
            elem: ElementKind::Int64,
            dims: vec![],
            values: TensorValues::Ints(vec![value]),
        }
    }

    /// 1-D float tensor
    pub fn floats(values: Vec<f64>) -> Self {
        Self {
            elem: ElementKind::Float,
            dims: vec![values.len()],
            values: TensorValues::Floats(values),
        }
    }

    pub fn float_scalar(value: f64) -> Self {
        Self {
            elem: ElementKind::Float,
            dims: vec![],
            values: TensorValues::Floats(vec![value]),
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    pub fn shape(&self) -> Shape {
        Shape::known(&self.dims.iter().map(|&d| d as u64).collect::<Vec<_>>())
    }

    pub fn tensor_type(&self) -> TensorType {
        TensorType::new(self.elem, self.shape())
    }

    pub fn value_type(&self) -> Type {
        Type::Tensor(self.tensor_type())
    }

    pub fn as_ints(&self) -> Option<&[i64]> {
        match &self.values {
            TensorValues::Ints(values) => Some(values),
            _ => None,
        }
    }

    /// Integer elements of a scalar or 1-D tensor
    pub fn to_int_vec(&self) -> Option<Vec<i64>> {
        if self.rank() > 1 {
            return None;
        }
        match &self.values {
            TensorValues::Ints(values) => Some(values.clone()),
            TensorValues::Bools(values) => Some(values.iter().map(|&b| b as i64).collect()),
            _ => None,
        }
    }

    /// The single element of a one-element tensor, as an integer
    pub fn scalar_i64(&self) -> Option<i64> {
        match &self.values {
            TensorValues::Ints(values) if values.len() == 1 => Some(values[0]),
            TensorValues::Bools(values) if values.len() == 1 => Some(values[0] as i64),
            _ => None,
        }
    }

    /// The single element of a one-element numeric tensor, as a float
    pub fn scalar_f64(&self) -> Option<f64> {
        match &self.values {
            TensorValues::Ints(values) if values.len() == 1 => Some(values[0] as f64),
            TensorValues::Floats(values) if values.len() == 1 => Some(values[0]),
            _ => None,
        }
    }

    /// Same elements under new dimensions
    pub fn with_dims(&self, dims: Vec<usize>) -> Option<Self> {
        if dims.iter().product::<usize>() != self.len() {
            return None;
        }
        Some(Self {
            elem: self.elem,
            dims,
            values: self.values.clone(),
        })
    }
}
