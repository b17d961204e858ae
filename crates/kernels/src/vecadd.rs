//! Element-wise vector addition, the bandwidth-bound baseline.

use crate::case::{BenchmarkCase, InputFill};
use crate::variant::{ArgSlot, KernelVariant, Scalar, Strategy};
use crate::workload::{linear_cases, Suite, Workload, WorkloadParams};
use memwall_device::{DeviceCapabilities, KernelDialect, Result};
use rayon::prelude::*;

pub const VEC_ADD_SIZES: [usize; 2] = [1_000_000, 10_000_000];

#[derive(Debug, Default, Clone, Copy)]
pub struct VecAddWorkload;

impl VecAddWorkload {
    pub fn new() -> Self {
        Self
    }
}

impl Workload for VecAddWorkload {
    fn suite(&self) -> Suite {
        Suite::VecAdd
    }

    fn title(&self) -> &'static str {
        "Vector addition"
    }

    fn size_label(&self) -> &'static str {
        "Elements"
    }

    fn sources(&self, dialect: KernelDialect) -> &'static [&'static str] {
        match dialect {
            KernelDialect::OpenClC => &["vec_add.cl"],
            KernelDialect::Wgsl => &["vec_add.wgsl"],
        }
    }

    fn variants(&self, _params: &WorkloadParams) -> Vec<KernelVariant> {
        vec![KernelVariant::new(Strategy::Elementwise, "vec_add", "Vec Add", "VecAdd")
            .with_args([
                ArgSlot::Input(0),
                ArgSlot::Input(1),
                ArgSlot::Output,
                ArgSlot::Scalar(Scalar::Elements),
            ])
            .as_reference()]
    }

    fn default_params(&self) -> WorkloadParams {
        WorkloadParams {
            sizes: VEC_ADD_SIZES.to_vec(),
            local_size: 64,
            ..WorkloadParams::default()
        }
    }

    fn cases(&self, params: &WorkloadParams, _caps: &DeviceCapabilities) -> Result<Vec<BenchmarkCase>> {
        linear_cases(params, 1)
    }

    fn inputs(&self, case: &BenchmarkCase, fill: InputFill) -> Vec<Vec<f32>> {
        let n = case.size.elements();
        let stream = 2 * case.index as u64;
        vec![fill.generate(n, 1.0, stream), fill.generate(n, 2.0, stream + 1)]
    }

    fn output_len(&self, case: &BenchmarkCase) -> usize {
        case.size.elements()
    }

    fn host_reference(&self, _case: &BenchmarkCase, inputs: &[Vec<f32>]) -> Option<Vec<f32>> {
        let [a, b] = inputs else {
            return None;
        };
        Some(a.par_iter().zip(b.par_iter()).map(|(x, y)| x + y).collect())
    }

    /// Two reads and one write per element.
    fn bytes_moved(&self, case: &BenchmarkCase) -> f64 {
        (3 * case.size.elements() * std::mem::size_of::<f32>()) as f64
    }

    fn flops(&self, case: &BenchmarkCase) -> f64 {
        case.size.elements() as f64
    }
}
