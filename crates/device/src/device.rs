//! The seam every backend implements.
//!
//! A backend owns one device, one context and one in-order command queue.
//! Kernel launches are asynchronous: [`ComputeDevice::enqueue`] hands back an
//! opaque pending launch that exposes no timing data. The only way to obtain
//! the device's start/end timestamps is [`ComputeDevice::wait`], which first
//! blocks until that launch has completed. Profiling data can therefore never
//! be read from an operation that is still in flight.

use crate::capabilities::DeviceCapabilities;
use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Source language a backend compiles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KernelDialect {
    OpenClC,
    Wgsl,
}

impl KernelDialect {
    pub fn extension(&self) -> &'static str {
        match self {
            KernelDialect::OpenClC => "cl",
            KernelDialect::Wgsl => "wgsl",
        }
    }
}

impl fmt::Display for KernelDialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KernelDialect::OpenClC => f.write_str("OpenCL C"),
            KernelDialect::Wgsl => f.write_str("WGSL"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferAccess {
    ReadOnly,
    WriteOnly,
    ReadWrite,
}

/// Which clock produced a span.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClockDomain {
    /// Timestamps recorded by the device for the operation itself.
    Device,
    /// Host-side measurement around submission and completion.
    Host,
}

/// Start/end timestamps of one completed operation, in nanoseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceSpan {
    pub start_ns: u64,
    pub end_ns: u64,
    pub clock: ClockDomain,
}

impl DeviceSpan {
    pub fn device(start_ns: u64, end_ns: u64) -> Self {
        Self {
            start_ns,
            end_ns,
            clock: ClockDomain::Device,
        }
    }

    pub fn host(start_ns: u64, end_ns: u64) -> Self {
        Self {
            start_ns,
            end_ns,
            clock: ClockDomain::Host,
        }
    }

    pub fn elapsed_ns(&self) -> u64 {
        self.end_ns.saturating_sub(self.start_ns)
    }

    pub fn elapsed_ms(&self) -> f64 {
        self.elapsed_ns() as f64 / 1e6
    }
}

/// One bound kernel argument, in declaration order.
pub enum KernelArg<'a, B> {
    Buffer(&'a B),
    Int(i32),
    Uint(u32),
    Float(f32),
    /// On-chip scratch of the given size in bytes; no host data is copied.
    Local(usize),
}

impl<B> Clone for KernelArg<'_, B> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<B> Copy for KernelArg<'_, B> {}

impl<B> fmt::Debug for KernelArg<'_, B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KernelArg::Buffer(_) => f.write_str("Buffer"),
            KernelArg::Int(v) => write!(f, "Int({v})"),
            KernelArg::Uint(v) => write!(f, "Uint({v})"),
            KernelArg::Float(v) => write!(f, "Float({v})"),
            KernelArg::Local(bytes) => write!(f, "Local({bytes} B)"),
        }
    }
}

impl<B> KernelArg<'_, B> {
    pub fn local_bytes(&self) -> usize {
        match self {
            KernelArg::Local(bytes) => *bytes,
            _ => 0,
        }
    }
}

pub trait ComputeDevice {
    type Program;
    type Kernel;
    type Buffer;
    /// A launch that has been enqueued but not yet synchronized.
    type Launch;

    fn dialect(&self) -> KernelDialect;

    /// Re-read the device properties. Repeated calls return identical values.
    fn query(&self) -> Result<DeviceCapabilities>;

    /// Compile `sources` as one program. Failures carry the compiler log.
    fn build(&self, sources: &[&str], options: &str) -> Result<Self::Program>;

    fn entry_points(&self, program: &Self::Program) -> Vec<String>;

    fn create_kernel(&self, program: &Self::Program, entry_point: &str) -> Result<Self::Kernel>;

    /// Allocate an uninitialised buffer of `len` `f32` elements.
    fn allocate(&self, len: usize, access: BufferAccess) -> Result<Self::Buffer>;

    /// Copy `data` into `buffer` and wait for the copy to finish.
    fn write(&self, buffer: &mut Self::Buffer, data: &[f32]) -> Result<DeviceSpan>;

    /// Copy `buffer` back into `out` and wait for the copy to finish.
    fn read(&self, buffer: &Self::Buffer, out: &mut [f32]) -> Result<DeviceSpan>;

    /// Enqueue a kernel without blocking.
    fn enqueue(
        &self,
        kernel: &Self::Kernel,
        args: &[KernelArg<'_, Self::Buffer>],
        global: &[usize],
        local: Option<&[usize]>,
    ) -> Result<Self::Launch>;

    /// Block until `launch` completes (or `timeout` expires) and return its
    /// device-recorded span.
    fn wait(&self, launch: Self::Launch, timeout: Duration) -> Result<DeviceSpan>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn span_reports_milliseconds() {
        let span = DeviceSpan::device(1_000_000, 3_500_000);
        assert_eq!(span.elapsed_ns(), 2_500_000);
        assert!((span.elapsed_ms() - 2.5).abs() < 1e-12);
    }

    #[test]
    fn reversed_span_saturates_to_zero() {
        let span = DeviceSpan::host(10, 5);
        assert_eq!(span.elapsed_ns(), 0);
        assert_eq!(span.clock, ClockDomain::Host);
    }

    #[test]
    fn only_local_arguments_reserve_scratch() {
        let buffer = vec![0.0f32; 4];
        let args: [KernelArg<'_, Vec<f32>>; 3] =
            [KernelArg::Buffer(&buffer), KernelArg::Local(1024), KernelArg::Int(7)];
        let reserved: usize = args.iter().map(KernelArg::local_bytes).sum();
        assert_eq!(reserved, 1024);
    }
}
