//! Host reference device for memwall.
//!
//! Runs the benchmark kernels natively on the CPU behind the same
//! [`memwall_device::ComputeDevice`] seam as the GPU backends, with a real
//! asynchronous queue and its own clock. Used when no GPU is present and by
//! the test suites.

pub mod compiler;
pub mod kernels;
pub mod runtime;

pub use compiler::HostProgram;
pub use runtime::*;
