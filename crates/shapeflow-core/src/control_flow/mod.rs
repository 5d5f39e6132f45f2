//! Control-flow operators and the branch merge policy

mod branch;
mod merge;

pub use branch::{infer_if, infer_loop, is_control_flow, SubgraphRunner};
pub use merge::{merge_all, merge_types};
