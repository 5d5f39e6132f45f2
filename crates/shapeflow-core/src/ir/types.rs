//! Element kinds, dimensions, shapes and value types
//!
//! These form the inference lattice:
//! - a value with no [`Type`] at all is unknown (the top of the lattice),
//! - a tensor of unknown rank is less precise than one of known rank,
//! - an unknown dimension is less precise than a symbolic one, which is less precise
//!   than a concrete one.

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::fmt;
use strum::{Display, EnumString};

/// Scalar data type of a tensor
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ElementKind {
    Float,
    Uint8,
    Int8,
    Uint16,
    Int16,
    Int32,
    Int64,
    String,
    Bool,
    Float16,
    Double,
    Uint32,
    Uint64,
    Complex64,
    Complex128,
    Bfloat16,
}

impl ElementKind {
    /// Map an ONNX `TensorProto.DataType` code to an element kind
    pub fn from_code(code: i64) -> Option<Self> {
        let kind = match code {
            1 => Self::Float,
            2 => Self::Uint8,
            3 => Self::Int8,
            4 => Self::Uint16,
            5 => Self::Int16,
            6 => Self::Int32,
            7 => Self::Int64,
            8 => Self::String,
            9 => Self::Bool,
            10 => Self::Float16,
            11 => Self::Double,
            12 => Self::Uint32,
            13 => Self::Uint64,
            14 => Self::Complex64,
            15 => Self::Complex128,
            16 => Self::Bfloat16,
            _ => return None,
        };
        Some(kind)
    }

    /// The ONNX `TensorProto.DataType` code of this kind
    pub fn code(self) -> i64 {
        match self {
            Self::Float => 1,
            Self::Uint8 => 2,
            Self::Int8 => 3,
            Self::Uint16 => 4,
            Self::Int16 => 5,
            Self::Int32 => 6,
            Self::Int64 => 7,
            Self::String => 8,
            Self::Bool => 9,
            Self::Float16 => 10,
            Self::Double => 11,
            Self::Uint32 => 12,
            Self::Uint64 => 13,
            Self::Complex64 => 14,
            Self::Complex128 => 15,
            Self::Bfloat16 => 16,
        }
    }

    pub fn is_integer(self) -> bool {
        matches!(
            self,
            Self::Uint8
                | Self::Int8
                | Self::Uint16
                | Self::Int16
                | Self::Int32
                | Self::Int64
                | Self::Uint32
                | Self::Uint64
        )
    }

    pub fn is_float(self) -> bool {
        matches!(self, Self::Float | Self::Float16 | Self::Double | Self::Bfloat16)
    }

    pub fn is_numeric(self) -> bool {
        self.is_integer() || self.is_float() || matches!(self, Self::Complex64 | Self::Complex128)
    }
}

/// One axis length
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dim {
    Known(u64),
    Symbol(String),
    Unknown,
}

impl Dim {
    pub fn symbol(name: impl Into<String>) -> Self {
        Dim::Symbol(name.into())
    }

    pub fn known(&self) -> Option<u64> {
        match self {
            Dim::Known(value) => Some(*value),
            _ => None,
        }
    }

    pub fn is_known(&self) -> bool {
        matches!(self, Dim::Known(_))
    }

    /// Two dims are compatible unless they are distinct concrete values
    pub fn is_compatible(&self, other: &Dim) -> bool {
        match (self, other) {
            (Dim::Known(a), Dim::Known(b)) => a == b,
            _ => true,
        }
    }
}

impl From<u64> for Dim {
    fn from(value: u64) -> Self {
        Dim::Known(value)
    }
}

impl From<&str> for Dim {
    fn from(name: &str) -> Self {
        Dim::Symbol(name.to_string())
    }
}

impl fmt::Display for Dim {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dim::Known(value) => write!(f, "{value}"),
            Dim::Symbol(name) => write!(f, "{name}"),
            Dim::Unknown => write!(f, "?"),
        }
    }
}

pub type Dims = SmallVec<[Dim; 4]>;

/// Ordered dimensions, or unknown rank
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Shape {
    Unranked,
    Ranked(Dims),
}

impl Shape {
    pub fn scalar() -> Self {
        Shape::Ranked(Dims::new())
    }

    /// Fully concrete shape
    pub fn known(dims: &[u64]) -> Self {
        Shape::Ranked(dims.iter().map(|&d| Dim::Known(d)).collect())
    }

    /// Known rank with every dimension unknown
    pub fn of_rank(rank: usize) -> Self {
        Shape::Ranked(std::iter::repeat(Dim::Unknown).take(rank).collect())
    }

    pub fn from_dims(dims: impl IntoIterator<Item = Dim>) -> Self {
        Shape::Ranked(dims.into_iter().collect())
    }

    pub fn rank(&self) -> Option<usize> {
        match self {
            Shape::Unranked => None,
            Shape::Ranked(dims) => Some(dims.len()),
        }
    }

    pub fn dims(&self) -> Option<&[Dim]> {
        match self {
            Shape::Unranked => None,
            Shape::Ranked(dims) => Some(dims),
        }
    }

    /// Concrete dimensions, if every dimension is known
    pub fn concrete(&self) -> Option<Vec<u64>> {
        self.dims()?.iter().map(Dim::known).collect()
    }

    /// Number of elements, if every dimension is known and the count fits in a `u64`
    pub fn num_elements(&self) -> Option<u64> {
        self.concrete()?.into_iter().try_fold(1u64, u64::checked_mul)
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Shape::Unranked => Ok(()),
            Shape::Ranked(dims) => {
                write!(f, "[")?;
                for (i, dim) in dims.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "{dim}")?;
                }
                write!(f, "]")
            }
        }
    }
}

/// Element kind plus shape
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TensorType {
    pub elem: ElementKind,
    pub shape: Shape,
}

impl TensorType {
    pub fn new(elem: ElementKind, shape: Shape) -> Self {
        Self { elem, shape }
    }

    pub fn rank(&self) -> Option<usize> {
        self.shape.rank()
    }
}

/// Static type of a value
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Type {
    Tensor(TensorType),
    /// Optional value; `None` when the element type is not known
    Optional(Option<Box<Type>>),
    Sequence(Box<Type>),
}

impl Type {
    pub fn tensor(elem: ElementKind, shape: Shape) -> Self {
        Type::Tensor(TensorType::new(elem, shape))
    }

    /// Tensor of unknown rank
    pub fn unranked(elem: ElementKind) -> Self {
        Type::tensor(elem, Shape::Unranked)
    }

    pub fn scalar(elem: ElementKind) -> Self {
        Type::tensor(elem, Shape::scalar())
    }

    pub fn optional(inner: Type) -> Self {
        Type::Optional(Some(Box::new(inner)))
    }

    pub fn sequence(inner: Type) -> Self {
        Type::Sequence(Box::new(inner))
    }

    pub fn as_tensor(&self) -> Option<&TensorType> {
        match self {
            Type::Tensor(tensor) => Some(tensor),
            _ => None,
        }
    }

    pub fn elem(&self) -> Option<ElementKind> {
        self.as_tensor().map(|t| t.elem)
    }

    pub fn shape(&self) -> Option<&Shape> {
        self.as_tensor().map(|t| &t.shape)
    }

    pub fn is_optional(&self) -> bool {
        matches!(self, Type::Optional(_))
    }

    /// Name of the type constructor, used in diagnostics
    pub fn constructor(&self) -> &'static str {
        match self {
            Type::Tensor(_) => "tensor",
            Type::Optional(_) => "optional",
            Type::Sequence(_) => "sequence",
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Tensor(tensor) => write!(f, "{}{}", tensor.elem, tensor.shape),
            Type::Optional(Some(inner)) => write!(f, "optional({inner})"),
            Type::Optional(None) => write!(f, "optional(?)"),
            Type::Sequence(inner) => write!(f, "seq({inner})"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_element_kind_codes_round_trip() {
        for code in 1..=16 {
            let kind = ElementKind::from_code(code).unwrap();
            assert_eq!(kind.code(), code);
        }
        assert_eq!(ElementKind::from_code(0), None);
        assert_eq!(ElementKind::from_code(6), Some(ElementKind::Int32));
        assert_eq!(ElementKind::from_code(7), Some(ElementKind::Int64));
    }

    #[test]
    fn test_element_kind_names() {
        assert_eq!(ElementKind::Float16.to_string(), "float16");
        assert_eq!(ElementKind::from_str("int64").unwrap(), ElementKind::Int64);
    }

    #[test]
    fn test_dim_compatibility() {
        assert!(Dim::Known(3).is_compatible(&Dim::Known(3)));
        assert!(!Dim::Known(3).is_compatible(&Dim::Known(4)));
        assert!(Dim::Known(3).is_compatible(&Dim::Unknown));
        assert!(Dim::symbol("N").is_compatible(&Dim::symbol("N")));
    }

    #[test]
    fn test_shape_queries() {
        let shape = Shape::from_dims([Dim::Known(2), Dim::symbol("N")]);
        assert_eq!(shape.rank(), Some(2));
        assert_eq!(shape.concrete(), None);
        assert_eq!(Shape::known(&[2, 3, 4]).num_elements(), Some(24));
        assert_eq!(Shape::known(&[1 << 40, 1 << 40]).num_elements(), None);
        assert_eq!(Shape::Unranked.rank(), None);
    }

    #[test]
    fn test_type_display() {
        let ty = Type::tensor(ElementKind::Float, Shape::from_dims([Dim::symbol("N"), Dim::Unknown, Dim::Known(3)]));
        assert_eq!(ty.to_string(), "float[N,?,3]");
        assert_eq!(Type::unranked(ElementKind::Int64).to_string(), "int64");
        assert_eq!(Type::scalar(ElementKind::Bool).to_string(), "bool[]");
        assert_eq!(
            Type::optional(Type::scalar(ElementKind::Float)).to_string(),
            "optional(float[])"
        );
        assert_eq!(Type::Optional(None).to_string(), "optional(?)");
    }
}
