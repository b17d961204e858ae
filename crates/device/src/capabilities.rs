//! Static device properties captured once per run.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Below this much on-chip memory, tiles have to stay small.
pub const SMALL_LOCAL_MEMORY_BYTES: u64 = 32 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Host,
    Wgpu,
    OpenCl,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BackendKind::Host => "host",
            BackendKind::Wgpu => "wgpu",
            BackendKind::OpenCl => "opencl",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceClass {
    #[default]
    Gpu,
    Cpu,
    Any,
}

impl fmt::Display for DeviceClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DeviceClass::Gpu => "GPU",
            DeviceClass::Cpu => "CPU",
            DeviceClass::Any => "any",
        };
        f.write_str(name)
    }
}

/// Which device a backend should open.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceSelector {
    pub platform: usize,
    pub class: DeviceClass,
    pub index: usize,
}

/// Read-only capability snapshot.
///
/// Fields a driver may refuse to report are `Option`; `None` means "not
/// reported" and is rendered as `n/a`. Consumers needing a number fall back
/// through the accessor methods, which document the value they substitute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceCapabilities {
    pub backend: BackendKind,
    pub platform: String,
    pub name: String,
    pub vendor: String,
    pub driver_version: String,
    pub device_class: DeviceClass,
    pub max_compute_units: Option<u32>,
    pub max_clock_mhz: Option<u32>,
    pub max_work_group_size: usize,
    pub max_work_item_dimensions: u32,
    pub max_work_item_sizes: Vec<usize>,
    pub global_mem_bytes: Option<u64>,
    pub global_mem_cache_bytes: Option<u64>,
    pub local_mem_bytes: u64,
    pub max_alloc_bytes: u64,
    pub preferred_vector_width_float: Option<u32>,
    pub preferred_vector_width_half: Option<u32>,
    pub extensions: Vec<String>,
    pub supports_fp16: bool,
    /// Best-effort: some drivers reject the query outright.
    pub unified_memory: Option<bool>,
}

impl DeviceCapabilities {
    /// Unified memory as a plain flag; an unreported value counts as
    /// discrete memory.
    pub fn is_unified_memory(&self) -> bool {
        self.unified_memory.unwrap_or(false)
    }

    pub fn has_small_local_memory(&self) -> bool {
        self.local_mem_bytes < SMALL_LOCAL_MEMORY_BYTES
    }

    pub fn tiling_hint(&self) -> &'static str {
        if self.has_small_local_memory() {
            "Small SRAM detected. Use aggressive tiling and small block sizes."
        } else {
            "Large SRAM available. Ideal for high-performance fused kernels."
        }
    }

    /// Maximum work-items along `dim`; dimensions the device did not report
    /// are limited by the overall work-group size.
    pub fn max_work_items_in(&self, dim: usize) -> usize {
        self.max_work_item_sizes
            .get(dim)
            .copied()
            .unwrap_or(self.max_work_group_size)
    }

    pub fn has_extension(&self, name: &str) -> bool {
        self.extensions.iter().any(|ext| ext == name)
    }
}

#[cfg(test)]
pub(crate) fn sample_capabilities() -> DeviceCapabilities {
    DeviceCapabilities {
        backend: BackendKind::Host,
        platform: "test platform".into(),
        name: "test device".into(),
        vendor: "memwall".into(),
        driver_version: "1.0".into(),
        device_class: DeviceClass::Cpu,
        max_compute_units: Some(8),
        max_clock_mhz: None,
        max_work_group_size: 256,
        max_work_item_dimensions: 3,
        max_work_item_sizes: vec![256, 256, 64],
        global_mem_bytes: Some(1 << 30),
        global_mem_cache_bytes: None,
        local_mem_bytes: 16 * 1024,
        max_alloc_bytes: 256 << 20,
        preferred_vector_width_float: Some(4),
        preferred_vector_width_half: None,
        extensions: vec!["cl_khr_fp16".into()],
        supports_fp16: true,
        unified_memory: None,
    }
}
