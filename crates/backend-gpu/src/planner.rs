//! Dispatch planning: NDRange extents to workgroup counts, and scalar
//! arguments to a uniform block.

use bytemuck::{Pod, Zeroable};
use memwall_device::{KernelArg, ProbeError, Result};

/// Device limits that shape a dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchLimits {
    pub max_invocations: usize,
    pub max_size: [usize; 3],
    pub max_groups_per_dim: usize,
    pub max_workgroup_storage: usize,
}

impl DispatchLimits {
    pub fn from_wgpu(limits: &wgpu::Limits) -> Self {
        Self {
            max_invocations: limits.max_compute_invocations_per_workgroup as usize,
            max_size: [
                limits.max_compute_workgroup_size_x as usize,
                limits.max_compute_workgroup_size_y as usize,
                limits.max_compute_workgroup_size_z as usize,
            ],
            max_groups_per_dim: limits.max_compute_workgroups_per_dimension as usize,
            max_workgroup_storage: limits.max_compute_workgroup_storage_size as usize,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchPlan {
    pub groups: [u32; 3],
    pub workgroup: [usize; 3],
    /// A one-dimensional range was spread over x and y to respect the
    /// per-dimension group limit.
    pub folded: bool,
}

impl DispatchPlan {
    pub fn group_count(&self) -> usize {
        self.groups.iter().map(|&g| g as usize).product()
    }
}

/// Workgroup sizes are fixed in WGSL, so every launch must state its local
/// extent and it must divide the global extent.
pub fn plan_dispatch(
    name: &str,
    global: &[usize],
    local: Option<&[usize]>,
    local_bytes: usize,
    limits: &DispatchLimits,
) -> Result<DispatchPlan> {
    let operation = format!("enqueue {name}");
    if global.is_empty() || global.len() > 3 {
        return Err(ProbeError::device(operation, format!("{} dimensions requested", global.len())));
    }
    let local = local.ok_or_else(|| {
        ProbeError::device(operation.as_str(), "WGSL entry points need an explicit local size")
    })?;
    if local.len() != global.len() {
        return Err(ProbeError::device(operation, "local and global extents differ in rank"));
    }

    let items: usize = local.iter().product();
    if items > limits.max_invocations {
        return Err(ProbeError::resource(format!(
            "work-group of {items} items exceeds the maximum of {}",
            limits.max_invocations
        )));
    }
    if local_bytes > limits.max_workgroup_storage {
        return Err(ProbeError::resource(format!(
            "local reservation of {local_bytes} B exceeds {} B of workgroup storage",
            limits.max_workgroup_storage
        )));
    }

    let mut workgroup = [1usize; 3];
    let mut groups = [1usize; 3];
    for (dim, (&l, &g)) in local.iter().zip(global).enumerate() {
        if l == 0 || l > limits.max_size[dim] {
            return Err(ProbeError::resource(format!(
                "local size {l} in dimension {dim} exceeds the maximum of {}",
                limits.max_size[dim]
            )));
        }
        if g % l != 0 {
            return Err(ProbeError::device(
                operation,
                format!("global size {g} is not a multiple of local size {l} in dimension {dim}"),
            ));
        }
        workgroup[dim] = l;
        groups[dim] = g / l;
    }

    let max = limits.max_groups_per_dim.max(1);
    let mut folded = false;
    if global.len() == 1 && groups[0] > max {
        let total = groups[0];
        groups[0] = max;
        groups[1] = total.div_ceil(max);
        folded = true;
    }
    if let Some(dim) = groups.iter().position(|&g| g > max) {
        return Err(ProbeError::resource(format!(
            "{} workgroups in dimension {dim} exceed the maximum of {max}",
            groups[dim]
        )));
    }

    Ok(DispatchPlan {
        groups: [groups[0] as u32, groups[1] as u32, groups[2] as u32],
        workgroup,
        folded,
    })
}

/// Sixteen bytes of scalar arguments, the alignment unit of a uniform block.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct ParamBlock {
    pub words: [u32; 4],
}

/// Pack scalar arguments in declaration order as 32-bit words. Buffers and
/// local reservations take no uniform space. Returns no blocks when the
/// kernel has no scalar arguments.
pub fn pack_scalars<B>(args: &[KernelArg<'_, B>]) -> Vec<ParamBlock> {
    let words: Vec<u32> = args
        .iter()
        .filter_map(|arg| match *arg {
            KernelArg::Int(v) => Some(v as u32),
            KernelArg::Uint(v) => Some(v),
            KernelArg::Float(v) => Some(v.to_bits()),
            KernelArg::Buffer(_) | KernelArg::Local(_) => None,
        })
        .collect();
    words
        .chunks(4)
        .map(|chunk| {
            let mut block = ParamBlock::default();
            block.words[..chunk.len()].copy_from_slice(chunk);
            block
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits() -> DispatchLimits {
        DispatchLimits {
            max_invocations: 256,
            max_size: [256, 256, 64],
            max_groups_per_dim: 65_535,
            max_workgroup_storage: 16 * 1024,
        }
    }

    #[test]
    fn two_dimensional_ranges_divide_evenly() {
        let plan = plan_dispatch("matmul", &[512, 256], Some(&[16, 16]), 2048, &limits()).unwrap();
        assert_eq!(plan.groups, [32, 16, 1]);
        assert_eq!(plan.workgroup, [16, 16, 1]);
        assert!(!plan.folded);
    }

    #[test]
    fn wide_linear_ranges_fold_into_two_dimensions() {
        let global = 256 * 80_000;
        let plan = plan_dispatch("benchmark_global", &[global], Some(&[256]), 0, &limits()).unwrap();
        assert!(plan.folded);
        assert_eq!(plan.groups[0], 65_535);
        assert_eq!(plan.groups[1], 2);
        assert!(plan.group_count() >= 80_000);
    }

    #[test]
    fn limits_are_resource_errors() {
        let err = plan_dispatch("k", &[1024], Some(&[512]), 0, &limits()).unwrap_err();
        assert_eq!(err.kind(), memwall_device::ErrorKind::Resource);

        let err = plan_dispatch("k", &[1024], Some(&[256]), 32 * 1024, &limits()).unwrap_err();
        assert!(err.to_string().contains("workgroup storage"), "{err}");
    }

    #[test]
    fn missing_local_size_is_rejected() {
        let err = plan_dispatch("k", &[1024], None, 0, &limits()).unwrap_err();
        assert_eq!(err.kind(), memwall_device::ErrorKind::Device);
    }

    #[test]
    fn scalars_pack_into_padded_blocks() {
        let buffer = ();
        let args: [KernelArg<'_, ()>; 5] = [
            KernelArg::Buffer(&buffer),
            KernelArg::Int(-1),
            KernelArg::Local(1024),
            KernelArg::Uint(7),
            KernelArg::Float(1.5),
        ];
        let blocks = pack_scalars(&args);
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].words, [u32::MAX, 7, 1.5f32.to_bits(), 0]);
        assert_eq!(bytemuck::cast_slice::<ParamBlock, u8>(&blocks).len(), 16);

        let only_buffers: [KernelArg<'_, ()>; 1] = [KernelArg::Buffer(&buffer)];
        assert!(pack_scalars(&only_buffers).is_empty());
    }
}
