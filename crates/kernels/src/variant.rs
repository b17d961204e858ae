//! Kernel variants: one implementation strategy of a suite's computation.

use crate::case::{BenchmarkCase, LaunchShape, ProblemSize};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Strategy {
    Naive,
    SharedTiled,
    RegisterBlocked,
    GlobalMemory,
    LocalMemory,
    PrivateMemory,
    TreeReduction,
    Elementwise,
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Strategy::Naive => "naive",
            Strategy::SharedTiled => "shared-tiled",
            Strategy::RegisterBlocked => "register-blocked",
            Strategy::GlobalMemory => "global-memory",
            Strategy::LocalMemory => "local-memory",
            Strategy::PrivateMemory => "private-memory",
            Strategy::TreeReduction => "tree-reduction",
            Strategy::Elementwise => "elementwise",
        };
        f.write_str(name)
    }
}

/// Integer scalars a kernel can receive, resolved per case.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scalar {
    Elements,
    Iterations,
    Rows,
    Cols,
    Depth,
}

impl Scalar {
    pub fn value(&self, case: &BenchmarkCase) -> usize {
        match (self, case.size) {
            (Scalar::Iterations, _) => case.iterations as usize,
            (Scalar::Elements, size) => size.elements(),
            (Scalar::Rows, ProblemSize::Matrix { m, .. }) => m,
            (Scalar::Cols, ProblemSize::Matrix { n, .. }) => n,
            (Scalar::Depth, ProblemSize::Matrix { k, .. }) => k,
            (_, ProblemSize::Elements(n)) => n,
        }
    }
}

/// One declared kernel argument, in declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArgSlot {
    /// Read-only buffer filled from host input `index`.
    Input(usize),
    /// Write-only result buffer, read back after the launch.
    Output,
    /// Buffer filled from host input `index`, updated by the kernel and read back.
    InPlace(usize),
    Scalar(Scalar),
    /// Dynamic on-chip scratch sized per work-item of the local extent.
    LocalScratch { bytes_per_item: usize },
}

impl ArgSlot {
    pub fn is_result(&self) -> bool {
        matches!(self, ArgSlot::Output | ArgSlot::InPlace(_))
    }
}

/// How a case's problem size maps onto global and local extents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Geometry {
    /// One work-item per element, work-groups of the case's local size.
    Linear,
    /// Global (N, M), local (TILE, TILE).
    Tiled2d,
    /// Each work-item computes `wpt` output columns: global (N / wpt, M),
    /// local (TILE / wpt, TILE).
    RegisterBlocked { wpt: usize },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KernelVariant {
    pub strategy: Strategy,
    pub entry_point: String,
    /// Console label, e.g. "SRAM Tiled".
    pub label: String,
    /// CSV column stem, e.g. "SharedTiled" for `SharedTiled_ms`.
    pub csv_label: String,
    pub args: Vec<ArgSlot>,
    /// Number of TILE x TILE float tiles the kernel declares in local memory.
    pub static_tiles: usize,
    pub geometry: Geometry,
    pub reference: bool,
}

impl KernelVariant {
    pub fn new(
        strategy: Strategy,
        entry_point: impl Into<String>,
        label: impl Into<String>,
        csv_label: impl Into<String>,
    ) -> Self {
        Self {
            strategy,
            entry_point: entry_point.into(),
            label: label.into(),
            csv_label: csv_label.into(),
            args: Vec::new(),
            static_tiles: 0,
            geometry: Geometry::Linear,
            reference: false,
        }
    }

    pub fn with_args(mut self, args: impl IntoIterator<Item = ArgSlot>) -> Self {
        self.args.extend(args);
        self
    }

    pub fn with_geometry(mut self, geometry: Geometry) -> Self {
        self.geometry = geometry;
        self
    }

    pub fn with_static_tiles(mut self, tiles: usize) -> Self {
        self.static_tiles = tiles;
        self
    }

    pub fn as_reference(mut self) -> Self {
        self.reference = true;
        self
    }

    pub fn csv_column(&self) -> String {
        format!("{}_ms", self.csv_label)
    }

    pub fn launch(&self, case: &BenchmarkCase) -> LaunchShape {
        match (self.geometry, case.size) {
            (Geometry::Tiled2d, ProblemSize::Matrix { m, n, .. }) => {
                LaunchShape::new(vec![n, m], Some(vec![case.tile, case.tile]))
            }
            (Geometry::RegisterBlocked { wpt }, ProblemSize::Matrix { m, n, .. }) => {
                let wpt = wpt.max(1);
                LaunchShape::new(vec![n / wpt, m], Some(vec![case.tile / wpt, case.tile]))
            }
            (_, size) => LaunchShape::new(vec![size.elements()], Some(vec![case.local_size])),
        }
    }

    pub fn static_local_bytes(&self, case: &BenchmarkCase) -> usize {
        self.static_tiles * case.tile * case.tile * std::mem::size_of::<f32>()
    }

    pub fn dynamic_local_bytes(&self, local_items: usize) -> usize {
        self.args
            .iter()
            .map(|slot| match slot {
                ArgSlot::LocalScratch { bytes_per_item } => bytes_per_item * local_items,
                _ => 0,
            })
            .sum()
    }

    /// Total on-chip memory the launch needs for `case`.
    pub fn local_reservation(&self, case: &BenchmarkCase) -> usize {
        let local_items = self.launch(case).local_items();
        self.static_local_bytes(case) + self.dynamic_local_bytes(local_items)
    }

    pub fn result_slot(&self) -> Option<(usize, ArgSlot)> {
        self.args
            .iter()
            .copied()
            .enumerate()
            .find(|(_, slot)| slot.is_result())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matrix_case(n: usize, tile: usize) -> BenchmarkCase {
        BenchmarkCase {
            index: 0,
            size: ProblemSize::square(n),
            iterations: 1,
            local_size: tile * tile,
            tile,
        }
    }

    #[test]
    fn register_blocking_shrinks_the_grid_horizontally() {
        let variant = KernelVariant::new(Strategy::RegisterBlocked, "register_matmul", "Register", "RB")
            .with_geometry(Geometry::RegisterBlocked { wpt: 4 });
        let shape = variant.launch(&matrix_case(256, 16));
        assert_eq!(shape.global, vec![64, 256]);
        assert_eq!(shape.local, Some(vec![4, 16]));
    }

    #[test]
    fn reservation_adds_static_tiles_and_scratch() {
        let tiled = KernelVariant::new(Strategy::SharedTiled, "matmul", "SRAM Tiled", "SharedTiled")
            .with_geometry(Geometry::Tiled2d)
            .with_static_tiles(2);
        assert_eq!(tiled.local_reservation(&matrix_case(128, 16)), 2 * 16 * 16 * 4);

        let reduce = KernelVariant::new(Strategy::TreeReduction, "sum_reduce", "Sum", "SumReduce")
            .with_args([ArgSlot::Input(0), ArgSlot::Output, ArgSlot::LocalScratch { bytes_per_item: 4 }]);
        let case = BenchmarkCase {
            index: 0,
            size: ProblemSize::Elements(1024),
            iterations: 1,
            local_size: 256,
            tile: 16,
        };
        assert_eq!(reduce.local_reservation(&case), 1024);
        assert_eq!(reduce.result_slot(), Some((1, ArgSlot::Output)));
    }

    #[test]
    fn scalars_resolve_against_the_case() {
        let case = BenchmarkCase {
            index: 0,
            size: ProblemSize::Matrix { m: 32, n: 64, k: 16 },
            iterations: 7,
            local_size: 64,
            tile: 8,
        };
        assert_eq!(Scalar::Rows.value(&case), 32);
        assert_eq!(Scalar::Cols.value(&case), 64);
        assert_eq!(Scalar::Depth.value(&case), 16);
        assert_eq!(Scalar::Iterations.value(&case), 7);
    }
}
