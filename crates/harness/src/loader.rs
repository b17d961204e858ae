//! Kernel program loader: source lookup, compilation and entry-point
//! resolution.

use crate::session::DeviceSession;
use memwall_device::{ComputeDevice, ProbeError, Result};
use memwall_kernels::{BenchmarkCase, KernelSourceRepository};
use std::fmt;
use tracing::{debug, info};

/// `-D` defines every kernel source understands, plus free-form extras.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildOptions {
    pub tile_size: Option<usize>,
    pub wpt: Option<usize>,
    pub local_size: Option<usize>,
    pub extra: String,
}

impl BuildOptions {
    /// Defines for a suite whose cases share one tile and local size.
    pub fn for_case(case: &BenchmarkCase, wpt: usize, extra: &str) -> Self {
        Self {
            tile_size: (case.tile > 0).then_some(case.tile),
            wpt: (case.tile > 0).then_some(wpt),
            local_size: Some(case.local_size),
            extra: extra.trim().to_string(),
        }
    }
}

impl fmt::Display for BuildOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let defines = [
            ("TILE_SIZE", self.tile_size),
            ("WPT", self.wpt),
            ("LOCAL_SIZE", self.local_size),
        ];
        let mut parts: Vec<String> = defines
            .iter()
            .filter_map(|(name, value)| value.map(|v| format!("-D{name}={v}")))
            .collect();
        if !self.extra.is_empty() {
            parts.push(self.extra.clone());
        }
        f.write_str(&parts.join(" "))
    }
}

pub struct KernelLoader<'s, D: ComputeDevice> {
    session: &'s DeviceSession<D>,
    repository: &'s KernelSourceRepository,
}

impl<'s, D: ComputeDevice> KernelLoader<'s, D> {
    pub fn new(session: &'s DeviceSession<D>, repository: &'s KernelSourceRepository) -> Self {
        Self { session, repository }
    }

    /// Compile source texts as one program. The compiler log of a failed
    /// build is returned verbatim.
    pub fn compile(&self, sources: &[&str], options: &BuildOptions) -> Result<D::Program> {
        let options = options.to_string();
        debug!(sources = sources.len(), options = %options, "compiling program");
        self.session.device().build(sources, &options)
    }

    /// Load the named sources from the repository and compile them together.
    pub fn load(&self, names: &[&str], options: &BuildOptions) -> Result<D::Program> {
        let texts = names
            .iter()
            .map(|name| self.repository.load_text(name))
            .collect::<Result<Vec<_>>>()?;
        let borrowed: Vec<&str> = texts.iter().map(String::as_str).collect();
        let program = self.compile(&borrowed, options)?;
        info!(sources = ?names, "program built");
        Ok(program)
    }

    pub fn resolve(&self, program: &D::Program, entry_point: &str) -> Result<D::Kernel> {
        let device = self.session.device();
        if !device.entry_points(program).iter().any(|name| name == entry_point) {
            return Err(ProbeError::KernelNotFound {
                name: entry_point.to_string(),
            });
        }
        device.create_kernel(program, entry_point)
    }
}
