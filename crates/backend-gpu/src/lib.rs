//! wgpu backend for memwall.

pub mod planner;
pub mod runtime;
pub mod shader;

pub use planner::{DispatchLimits, DispatchPlan};
pub use runtime::*;
