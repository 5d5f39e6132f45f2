//! Shape lattice and broadcasting shared by the operator rules

pub mod broadcast;
pub mod dim;

pub use broadcast::{broadcast_all, broadcast_dim, broadcast_shapes, broadcast_tensors};
pub use dim::{join_dim, join_shape, refine_dim, refine_option, refine_shape, refine_type, refines};
