//! Dense matrix multiplication suite: naive, shared-tiled and
//! register-blocked variants of C = A * B.

use crate::case::{BenchmarkCase, InputFill, ProblemSize};
use crate::variant::{ArgSlot, Geometry, KernelVariant, Scalar, Strategy};
use crate::workload::{choose_tile, tile_fits, validate_sizes, Suite, Workload, WorkloadParams};
use memwall_device::{DeviceCapabilities, KernelDialect, ProbeError, Result};
use ndarray::ArrayView2;
use tracing::debug;

pub const MATMUL_SIZES: [usize; 6] = [128, 256, 512, 1024, 2048, 4096];
pub const MATMUL_WPT: usize = 4;
pub const LHS_FILL: f32 = 1.0;
pub const RHS_FILL: f32 = 2.0;

/// Largest size checked against the host reference; beyond it the naive
/// device result is the only baseline.
pub const HOST_REFERENCE_LIMIT: usize = 1024;

const MATMUL_ARGS: [ArgSlot; 6] = [
    ArgSlot::Input(0),
    ArgSlot::Input(1),
    ArgSlot::Output,
    ArgSlot::Scalar(Scalar::Rows),
    ArgSlot::Scalar(Scalar::Cols),
    ArgSlot::Scalar(Scalar::Depth),
];

#[derive(Debug, Default, Clone, Copy)]
pub struct MatmulWorkload;

impl MatmulWorkload {
    pub fn new() -> Self {
        Self
    }
}

impl Workload for MatmulWorkload {
    fn suite(&self) -> Suite {
        Suite::Matmul
    }

    fn title(&self) -> &'static str {
        "Matrix multiplication strategies"
    }

    fn size_label(&self) -> &'static str {
        "N"
    }

    fn sources(&self, dialect: KernelDialect) -> &'static [&'static str] {
        match dialect {
            KernelDialect::OpenClC => &["naive_matmul.cl", "matmul.cl", "register_matmul.cl"],
            KernelDialect::Wgsl => &["matmul.wgsl"],
        }
    }

    fn variants(&self, params: &WorkloadParams) -> Vec<KernelVariant> {
        vec![
            KernelVariant::new(Strategy::Naive, "naive_matmul", "Naive", "Naive")
                .with_args(MATMUL_ARGS)
                .with_geometry(Geometry::Tiled2d)
                .as_reference(),
            KernelVariant::new(Strategy::SharedTiled, "matmul", "SRAM Tiled", "SharedTiled")
                .with_args(MATMUL_ARGS)
                .with_geometry(Geometry::Tiled2d)
                .with_static_tiles(2),
            KernelVariant::new(
                Strategy::RegisterBlocked,
                "register_matmul",
                "Register Tiled",
                "RegisterBlocked",
            )
            .with_args(MATMUL_ARGS)
            .with_geometry(Geometry::RegisterBlocked { wpt: params.wpt })
            .with_static_tiles(2),
        ]
    }

    fn default_params(&self) -> WorkloadParams {
        WorkloadParams {
            sizes: MATMUL_SIZES.to_vec(),
            iterations: 1,
            local_size: 256,
            tile: None,
            wpt: MATMUL_WPT,
        }
    }

    fn cases(&self, params: &WorkloadParams, caps: &DeviceCapabilities) -> Result<Vec<BenchmarkCase>> {
        validate_sizes(&params.sizes)?;
        if params.wpt == 0 {
            return Err(ProbeError::InvalidConfig("work per thread must be positive".into()));
        }
        let tile = match params.tile {
            Some(tile) => {
                if tile == 0 || tile % params.wpt != 0 {
                    return Err(ProbeError::InvalidConfig(format!(
                        "tile size {tile} must be a positive multiple of the work per thread {}",
                        params.wpt
                    )));
                }
                if !tile_fits(caps, tile, params.wpt) {
                    debug!(tile, "requested tile exceeds device limits; launches will be rejected");
                }
                tile
            }
            None => choose_tile(caps, params.wpt)?,
        };
        if let Some(n) = params.sizes.iter().find(|&&n| n % tile != 0) {
            return Err(ProbeError::InvalidConfig(format!(
                "matrix size {n} is not a multiple of the tile size {tile}"
            )));
        }
        Ok(params
            .sizes
            .iter()
            .enumerate()
            .map(|(index, &n)| BenchmarkCase {
                index,
                size: ProblemSize::square(n),
                iterations: 1,
                local_size: tile * tile,
                tile,
            })
            .collect())
    }

    fn inputs(&self, case: &BenchmarkCase, fill: InputFill) -> Vec<Vec<f32>> {
        let (m, n, k) = dims(case);
        let stream = 2 * case.index as u64;
        vec![
            fill.generate(m * k, LHS_FILL, stream),
            fill.generate(k * n, RHS_FILL, stream + 1),
        ]
    }

    fn output_len(&self, case: &BenchmarkCase) -> usize {
        case.size.elements()
    }

    fn host_reference(&self, case: &BenchmarkCase, inputs: &[Vec<f32>]) -> Option<Vec<f32>> {
        let (m, n, k) = dims(case);
        if n > HOST_REFERENCE_LIMIT {
            return None;
        }
        let [lhs, rhs] = inputs else {
            return None;
        };
        reference_matmul(lhs, rhs, m, n, k).ok()
    }

    /// A and B read once, C written once.
    fn bytes_moved(&self, case: &BenchmarkCase) -> f64 {
        let (m, n, k) = dims(case);
        ((m * k + k * n + m * n) * std::mem::size_of::<f32>()) as f64
    }

    fn flops(&self, case: &BenchmarkCase) -> f64 {
        let (m, n, k) = dims(case);
        2.0 * m as f64 * n as f64 * k as f64
    }
}

fn dims(case: &BenchmarkCase) -> (usize, usize, usize) {
    match case.size {
        ProblemSize::Matrix { m, n, k } => (m, n, k),
        ProblemSize::Elements(n) => (n, n, n),
    }
}

/// Row-major C (m x n) = A (m x k) * B (k x n) on the host.
pub fn reference_matmul(lhs: &[f32], rhs: &[f32], m: usize, n: usize, k: usize) -> Result<Vec<f32>> {
    let lhs = ArrayView2::from_shape((m, k), lhs)
        .map_err(|err| ProbeError::resource(format!("lhs is not {m}x{k}: {err}")))?;
    let rhs = ArrayView2::from_shape((k, n), rhs)
        .map_err(|err| ProbeError::resource(format!("rhs is not {k}x{n}: {err}")))?;
    validate_matmul_inputs(&lhs, &rhs)?;
    Ok(lhs.dot(&rhs).into_raw_vec())
}

pub fn validate_matmul_inputs(lhs: &ArrayView2<'_, f32>, rhs: &ArrayView2<'_, f32>) -> Result<()> {
    if lhs.ncols() != rhs.nrows() {
        return Err(ProbeError::resource(format!(
            "matmul dimension mismatch: lhs {}x{} vs rhs {}x{}",
            lhs.nrows(),
            lhs.ncols(),
            rhs.nrows(),
            rhs.ncols()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workload::test_capabilities;
    use approx::assert_abs_diff_eq;

    #[test]
    fn uniform_inputs_give_two_k_everywhere() {
        let workload = MatmulWorkload::new();
        let params = WorkloadParams {
            sizes: vec![64],
            ..workload.default_params()
        };
        let case = &workload.cases(&params, &test_capabilities()).unwrap()[0];
        let inputs = workload.inputs(case, InputFill::Constant);
        let expected = workload.host_reference(case, &inputs).unwrap();
        assert_eq!(expected.len(), 64 * 64);
        for value in expected {
            assert_abs_diff_eq!(value, 128.0, epsilon = 1e-6);
        }
    }

    #[test]
    fn reference_matches_a_hand_computed_product() {
        let lhs = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        let rhs = [7.0, 8.0, 9.0, 10.0, 11.0, 12.0];
        let product = reference_matmul(&lhs, &rhs, 2, 2, 3).unwrap();
        assert_eq!(product, vec![58.0, 64.0, 139.0, 154.0]);
    }

    #[test]
    fn sizes_must_be_tile_multiples() {
        let workload = MatmulWorkload::new();
        let params = WorkloadParams {
            sizes: vec![128, 200],
            ..workload.default_params()
        };
        let err = workload.cases(&params, &test_capabilities()).unwrap_err();
        assert!(err.to_string().contains("200"), "{err}");
    }

    #[test]
    fn tile_comes_from_the_device_unless_overridden() {
        let workload = MatmulWorkload::new();
        let mut params = WorkloadParams {
            sizes: vec![128],
            ..workload.default_params()
        };
        let cases = workload.cases(&params, &test_capabilities()).unwrap();
        assert_eq!(cases[0].tile, 16);

        params.tile = Some(8);
        let cases = workload.cases(&params, &test_capabilities()).unwrap();
        assert_eq!(cases[0].tile, 8);
        assert_eq!(cases[0].local_size, 64);

        params.tile = Some(6);
        assert!(workload.cases(&params, &test_capabilities()).is_err());
    }

    #[test]
    fn variants_start_with_the_naive_reference() {
        let variants = MatmulWorkload::new().variants(&WorkloadParams::default());
        assert!(variants[0].reference);
        assert_eq!(variants[0].entry_point, "naive_matmul");
        assert!(variants[1..].iter().all(|variant| !variant.reference));
        let columns: Vec<_> = variants.iter().map(KernelVariant::csv_column).collect();
        assert_eq!(columns, ["Naive_ms", "SharedTiled_ms", "RegisterBlocked_ms"]);
    }
}
