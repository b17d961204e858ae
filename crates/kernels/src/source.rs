//! Kernel source lookup.
//!
//! Sources are opaque text. The repository either serves the copies compiled
//! into the binary or reads them from a directory chosen at run time, which
//! lets kernels be edited without rebuilding.

use memwall_device::{ProbeError, Result};
use std::fs;
use std::path::{Path, PathBuf};

const EMBEDDED: &[(&str, &str)] = &[
    ("memory_bench.cl", include_str!("../kernels/opencl/memory_bench.cl")),
    ("naive_matmul.cl", include_str!("../kernels/opencl/naive_matmul.cl")),
    ("matmul.cl", include_str!("../kernels/opencl/matmul.cl")),
    ("register_matmul.cl", include_str!("../kernels/opencl/register_matmul.cl")),
    ("sum_reduce.cl", include_str!("../kernels/opencl/sum_reduce.cl")),
    ("vec_add.cl", include_str!("../kernels/opencl/vec_add.cl")),
    ("memory_bench.wgsl", include_str!("../kernels/wgsl/memory_bench.wgsl")),
    ("matmul.wgsl", include_str!("../kernels/wgsl/matmul.wgsl")),
    ("sum_reduce.wgsl", include_str!("../kernels/wgsl/sum_reduce.wgsl")),
    ("vec_add.wgsl", include_str!("../kernels/wgsl/vec_add.wgsl")),
];

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum KernelSourceRepository {
    #[default]
    Embedded,
    Directory(PathBuf),
}

impl KernelSourceRepository {
    pub fn directory(path: impl Into<PathBuf>) -> Self {
        KernelSourceRepository::Directory(path.into())
    }

    /// Return the text of `logical_name`, e.g. `"matmul.cl"`.
    pub fn load_text(&self, logical_name: &str) -> Result<String> {
        match self {
            KernelSourceRepository::Embedded => EMBEDDED
                .iter()
                .find(|(name, _)| *name == logical_name)
                .map(|(_, text)| text.to_string())
                .ok_or_else(|| ProbeError::FileNotFound {
                    name: logical_name.to_string(),
                    location: "embedded kernels".to_string(),
                }),
            KernelSourceRepository::Directory(dir) => read_from(dir, logical_name),
        }
    }

    pub fn embedded_names() -> impl Iterator<Item = &'static str> {
        EMBEDDED.iter().map(|(name, _)| *name)
    }
}

fn read_from(dir: &Path, logical_name: &str) -> Result<String> {
    let path = dir.join(logical_name);
    if !path.is_file() {
        return Err(ProbeError::FileNotFound {
            name: logical_name.to_string(),
            location: dir.display().to_string(),
        });
    }
    fs::read_to_string(&path).map_err(|err| ProbeError::io(path, err))
}
