//! Kernel sources, variants and benchmark suites for memwall.

pub mod case;
pub mod matmul;
pub mod memory;
pub mod reduce;
pub mod registry;
pub mod source;
pub mod variant;
pub mod vecadd;
pub mod workload;

pub use case::*;
pub use matmul::*;
pub use memory::*;
pub use reduce::*;
pub use registry::*;
pub use source::*;
pub use variant::*;
pub use vecadd::*;
pub use workload::*;
