//! Memory-tier suite: global (HRAM), local (SRAM) and private (register)
//! accumulation over identical extents and iteration counts.

use crate::case::{BenchmarkCase, InputFill};
use crate::variant::{ArgSlot, KernelVariant, Scalar, Strategy};
use crate::workload::{linear_cases, Suite, Workload, WorkloadParams};
use memwall_device::{DeviceCapabilities, KernelDialect, Result};
use rayon::prelude::*;

pub const MEMORY_SIZES: [usize; 6] = [256_000, 1_024_000, 2_560_000, 5_120_000, 10_240_000, 20_480_000];
pub const MEMORY_ITERATIONS: u32 = 10_000;

#[derive(Debug, Default, Clone, Copy)]
pub struct MemoryWorkload;

impl MemoryWorkload {
    pub fn new() -> Self {
        Self
    }
}

impl Workload for MemoryWorkload {
    fn suite(&self) -> Suite {
        Suite::Memory
    }

    fn title(&self) -> &'static str {
        "Scaling the memory wall"
    }

    fn size_label(&self) -> &'static str {
        "Elements"
    }

    fn sources(&self, dialect: KernelDialect) -> &'static [&'static str] {
        match dialect {
            KernelDialect::OpenClC => &["memory_bench.cl"],
            KernelDialect::Wgsl => &["memory_bench.wgsl"],
        }
    }

    fn variants(&self, _params: &WorkloadParams) -> Vec<KernelVariant> {
        vec![
            KernelVariant::new(Strategy::GlobalMemory, "benchmark_global", "HRAM", "HRAM")
                .with_args([ArgSlot::InPlace(0), ArgSlot::Scalar(Scalar::Iterations)])
                .as_reference(),
            KernelVariant::new(Strategy::LocalMemory, "benchmark_local", "SRAM", "SRAM").with_args([
                ArgSlot::InPlace(0),
                ArgSlot::LocalScratch {
                    bytes_per_item: std::mem::size_of::<f32>(),
                },
                ArgSlot::Scalar(Scalar::Iterations),
            ]),
            KernelVariant::new(Strategy::PrivateMemory, "benchmark_private", "Registers", "Registers")
                .with_args([ArgSlot::InPlace(0), ArgSlot::Scalar(Scalar::Iterations)]),
        ]
    }

    fn default_params(&self) -> WorkloadParams {
        WorkloadParams {
            sizes: MEMORY_SIZES.to_vec(),
            iterations: MEMORY_ITERATIONS,
            local_size: 256,
            ..WorkloadParams::default()
        }
    }

    fn cases(&self, params: &WorkloadParams, _caps: &DeviceCapabilities) -> Result<Vec<BenchmarkCase>> {
        linear_cases(params, params.iterations.max(1))
    }

    fn inputs(&self, case: &BenchmarkCase, fill: InputFill) -> Vec<Vec<f32>> {
        vec![fill.generate(case.size.elements(), 1.0, case.index as u64)]
    }

    fn output_len(&self, case: &BenchmarkCase) -> usize {
        case.size.elements()
    }

    /// Every kernel leaves `iterations * x` in each slot.
    fn host_reference(&self, case: &BenchmarkCase, inputs: &[Vec<f32>]) -> Option<Vec<f32>> {
        let scale = case.iterations as f32;
        let data = inputs.first()?;
        Some(data.par_iter().map(|x| x * scale).collect())
    }

    fn bytes_moved(&self, case: &BenchmarkCase) -> f64 {
        case.size.elements() as f64 * case.iterations as f64 * std::mem::size_of::<f32>() as f64
    }

    fn flops(&self, case: &BenchmarkCase) -> f64 {
        case.size.elements() as f64 * case.iterations as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workload::test_capabilities;

    #[test]
    fn tiers_share_extents_and_iterations() {
        let workload = MemoryWorkload::new();
        let params = WorkloadParams {
            sizes: vec![256_000, 1_024_000],
            ..workload.default_params()
        };
        let cases = workload.cases(&params, &test_capabilities()).unwrap();
        assert_eq!(cases.len(), 2);
        for case in &cases {
            assert_eq!(case.iterations, MEMORY_ITERATIONS);
            let shapes: Vec<_> = workload
                .variants(&params)
                .iter()
                .map(|variant| variant.launch(case))
                .collect();
            assert!(shapes.windows(2).all(|pair| pair[0] == pair[1]));
        }
    }

    #[test]
    fn only_the_local_tier_reserves_scratch() {
        let workload = MemoryWorkload::new();
        let params = workload.default_params();
        let case = &workload.cases(&params, &test_capabilities()).unwrap()[0];
        let reservations: Vec<_> = workload
            .variants(&params)
            .iter()
            .map(|variant| variant.local_reservation(case))
            .collect();
        assert_eq!(reservations, vec![0, 1024, 0]);
    }

    #[test]
    fn reference_output_is_scaled_input() {
        let workload = MemoryWorkload::new();
        let params = WorkloadParams {
            sizes: vec![512],
            iterations: 10_000,
            ..WorkloadParams::default()
        };
        let case = &workload.cases(&params, &test_capabilities()).unwrap()[0];
        let inputs = workload.inputs(case, InputFill::Constant);
        let expected = workload.host_reference(case, &inputs).unwrap();
        assert!(expected.iter().all(|&v| v == 10_000.0));
    }
}
