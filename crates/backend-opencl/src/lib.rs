//! OpenCL backend for memwall.
//!
//! The driver binding is only compiled with the `opencl` feature, so the
//! workspace builds on machines without an ICD loader.

pub mod info;
#[cfg(feature = "opencl")]
pub mod runtime;

pub use info::*;
#[cfg(feature = "opencl")]
pub use runtime::*;

/// Whether this build can open OpenCL devices.
pub const OPENCL_ENABLED: bool = cfg!(feature = "opencl");
