//! Partial evaluation of shape-determining values
//!
//! Small integer tensors that flow into `Reshape`, `Expand`, `Slice` and friends are often
//! computable statically (`Shape` of a concretely shaped input, constants, simple arithmetic
//! on them). Tracking them lets those operators produce concrete output shapes.

mod env;
mod kernels;

pub use env::PartialValueEnv;
pub use kernels::{evaluate, is_allowed, ALLOW_LIST};
