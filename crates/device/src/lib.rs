//! Device abstraction for memwall.

pub mod capabilities;
pub mod device;
pub mod error;

pub use capabilities::*;
pub use device::*;
pub use error::{ErrorKind, ProbeError, Result};
