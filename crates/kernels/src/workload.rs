//! Benchmark suites.
//!
//! A [`Workload`] describes everything the harness needs to run one suite:
//! which sources to compile, which variants to launch (reference first), how
//! sizes become cases, how host inputs are generated and what the correct
//! output is. The harness itself stays suite-agnostic.

use crate::case::{BenchmarkCase, InputFill, ProblemSize};
use crate::variant::KernelVariant;
use memwall_device::{DeviceCapabilities, KernelDialect, ProbeError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Tile edges tried in order when the device decides the tile size.
pub const TILE_CANDIDATES: [usize; 4] = [32, 16, 8, 4];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Suite {
    Memory,
    Matmul,
    Reduce,
    VecAdd,
}

impl fmt::Display for Suite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Suite::Memory => "memory",
            Suite::Matmul => "matmul",
            Suite::Reduce => "reduce",
            Suite::VecAdd => "vec-add",
        };
        f.write_str(name)
    }
}

/// Per-run knobs for a suite. `tile: None` lets the device decide.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkloadParams {
    pub sizes: Vec<usize>,
    pub iterations: u32,
    pub local_size: usize,
    pub tile: Option<usize>,
    pub wpt: usize,
}

impl Default for WorkloadParams {
    fn default() -> Self {
        Self {
            sizes: Vec::new(),
            iterations: 1,
            local_size: 256,
            tile: None,
            wpt: 4,
        }
    }
}

pub trait Workload: Send + Sync {
    fn suite(&self) -> Suite;

    fn title(&self) -> &'static str;

    /// Header of the CSV size column.
    fn size_label(&self) -> &'static str;

    /// Logical source names, compiled together as one program.
    fn sources(&self, dialect: KernelDialect) -> &'static [&'static str];

    /// Variants in launch order; the first one is the reference.
    fn variants(&self, params: &WorkloadParams) -> Vec<KernelVariant>;

    fn default_params(&self) -> WorkloadParams;

    /// Validate `params` against the device and expand them into cases.
    fn cases(&self, params: &WorkloadParams, caps: &DeviceCapabilities) -> Result<Vec<BenchmarkCase>>;

    /// Host inputs, indexed by `ArgSlot::Input` / `ArgSlot::InPlace`.
    fn inputs(&self, case: &BenchmarkCase, fill: InputFill) -> Vec<Vec<f32>>;

    fn output_len(&self, case: &BenchmarkCase) -> usize;

    /// Host-computed expected output, when the suite can afford one.
    fn host_reference(&self, case: &BenchmarkCase, inputs: &[Vec<f32>]) -> Option<Vec<f32>>;

    /// Bytes the kernel logically moves, for bandwidth figures.
    fn bytes_moved(&self, case: &BenchmarkCase) -> f64;

    fn flops(&self, case: &BenchmarkCase) -> f64;
}

pub type DynWorkload = Arc<dyn Workload>;

/// Sizes must be non-empty, strictly ascending and non-zero.
pub fn validate_sizes(sizes: &[usize]) -> Result<()> {
    if sizes.is_empty() {
        return Err(ProbeError::InvalidConfig("size list is empty".into()));
    }
    if sizes.contains(&0) {
        return Err(ProbeError::InvalidConfig("sizes must be positive".into()));
    }
    if let Some(pair) = sizes.windows(2).find(|pair| pair[0] >= pair[1]) {
        return Err(ProbeError::InvalidConfig(format!(
            "sizes must be strictly ascending ({} is followed by {})",
            pair[0], pair[1]
        )));
    }
    Ok(())
}

/// Largest candidate tile whose square fits a work-group, whose edge fits
/// each of the first two work-item dimensions, that is divisible by `wpt`,
/// and whose two float tiles fit local memory.
pub fn choose_tile(caps: &DeviceCapabilities, wpt: usize) -> Result<usize> {
    TILE_CANDIDATES
        .iter()
        .copied()
        .find(|&tile| tile_fits(caps, tile, wpt))
        .ok_or_else(|| {
            ProbeError::InvalidConfig(format!(
                "no tile size in {TILE_CANDIDATES:?} fits device '{}' (max work-group {}, local memory {} B)",
                caps.name, caps.max_work_group_size, caps.local_mem_bytes
            ))
        })
}

pub fn tile_fits(caps: &DeviceCapabilities, tile: usize, wpt: usize) -> bool {
    let wpt = wpt.max(1);
    let two_tiles = (2 * tile * tile * std::mem::size_of::<f32>()) as u64;
    tile % wpt == 0
        && tile * tile <= caps.max_work_group_size
        && tile <= caps.max_work_items_in(0)
        && tile <= caps.max_work_items_in(1)
        && two_tiles <= caps.local_mem_bytes
}

/// Linear suites: every size a multiple of the local size, which must be a
/// positive power of two.
pub(crate) fn linear_cases(
    params: &WorkloadParams,
    iterations: u32,
) -> Result<Vec<BenchmarkCase>> {
    validate_sizes(&params.sizes)?;
    let local = params.local_size;
    if local == 0 || !local.is_power_of_two() {
        return Err(ProbeError::InvalidConfig(format!(
            "local size {local} must be a positive power of two"
        )));
    }
    if let Some(size) = params.sizes.iter().find(|&&size| size % local != 0) {
        return Err(ProbeError::InvalidConfig(format!(
            "size {size} is not a multiple of the local size {local}"
        )));
    }
    Ok(params
        .sizes
        .iter()
        .enumerate()
        .map(|(index, &n)| BenchmarkCase {
            index,
            size: ProblemSize::Elements(n),
            iterations,
            local_size: local,
            tile: params.tile.unwrap_or(0),
        })
        .collect())
}

#[cfg(test)]
pub(crate) fn test_capabilities() -> DeviceCapabilities {
    use memwall_device::{BackendKind, DeviceClass};
    DeviceCapabilities {
        backend: BackendKind::Host,
        platform: "test".into(),
        name: "test device".into(),
        vendor: "memwall".into(),
        driver_version: "1".into(),
        device_class: DeviceClass::Cpu,
        max_compute_units: Some(4),
        max_clock_mhz: None,
        max_work_group_size: 256,
        max_work_item_dimensions: 3,
        max_work_item_sizes: vec![256, 256, 64],
        global_mem_bytes: Some(1 << 30),
        global_mem_cache_bytes: None,
        local_mem_bytes: 32 * 1024,
        max_alloc_bytes: 256 << 20,
        preferred_vector_width_float: Some(1),
        preferred_vector_width_half: None,
        extensions: Vec::new(),
        supports_fp16: false,
        unified_memory: Some(true),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sizes_must_ascend_strictly() {
        assert!(validate_sizes(&[128, 256, 512]).is_ok());
        assert!(validate_sizes(&[]).is_err());
        let err = validate_sizes(&[256, 128]).unwrap_err();
        assert!(err.to_string().contains("256 is followed by 128"));
        assert!(validate_sizes(&[128, 128]).is_err());
    }

    #[test]
    fn tile_respects_group_size_and_local_memory() {
        let mut caps = test_capabilities();
        assert_eq!(choose_tile(&caps, 4).unwrap(), 16);

        caps.max_work_group_size = 1024;
        caps.max_work_item_sizes = vec![1024, 1024, 64];
        assert_eq!(choose_tile(&caps, 4).unwrap(), 32);

        caps.local_mem_bytes = 1024;
        assert_eq!(choose_tile(&caps, 4).unwrap(), 8);

        caps.local_mem_bytes = 64;
        assert!(choose_tile(&caps, 4).is_err());
    }

    #[test]
    fn linear_sizes_must_align_with_the_local_size() {
        let params = WorkloadParams {
            sizes: vec![1024, 1000],
            ..WorkloadParams::default()
        };
        let err = linear_cases(&params, 1).unwrap_err();
        assert!(err.to_string().contains("1000"));
    }
}
