//! Work-group sum reduction: each group folds its slice into one partial sum.

use crate::case::{BenchmarkCase, InputFill};
use crate::variant::{ArgSlot, KernelVariant, Strategy};
use crate::workload::{linear_cases, Suite, Workload, WorkloadParams};
use memwall_device::{DeviceCapabilities, KernelDialect, Result};

#[derive(Debug, Default, Clone, Copy)]
pub struct ReduceWorkload;

impl ReduceWorkload {
    pub fn new() -> Self {
        Self
    }
}

impl Workload for ReduceWorkload {
    fn suite(&self) -> Suite {
        Suite::Reduce
    }

    fn title(&self) -> &'static str {
        "Work-group reduction"
    }

    fn size_label(&self) -> &'static str {
        "Elements"
    }

    fn sources(&self, dialect: KernelDialect) -> &'static [&'static str] {
        match dialect {
            KernelDialect::OpenClC => &["sum_reduce.cl"],
            KernelDialect::Wgsl => &["sum_reduce.wgsl"],
        }
    }

    fn variants(&self, _params: &WorkloadParams) -> Vec<KernelVariant> {
        vec![KernelVariant::new(Strategy::TreeReduction, "sum_reduce", "Sum Reduce", "SumReduce")
            .with_args([
                ArgSlot::Input(0),
                ArgSlot::Output,
                ArgSlot::LocalScratch {
                    bytes_per_item: std::mem::size_of::<f32>(),
                },
            ])
            .as_reference()]
    }

    fn default_params(&self) -> WorkloadParams {
        WorkloadParams {
            sizes: vec![1024],
            local_size: 256,
            ..WorkloadParams::default()
        }
    }

    fn cases(&self, params: &WorkloadParams, _caps: &DeviceCapabilities) -> Result<Vec<BenchmarkCase>> {
        linear_cases(params, 1)
    }

    fn inputs(&self, case: &BenchmarkCase, fill: InputFill) -> Vec<Vec<f32>> {
        vec![fill.generate(case.size.elements(), 1.0, case.index as u64)]
    }

    /// One partial sum per work-group.
    fn output_len(&self, case: &BenchmarkCase) -> usize {
        case.size.elements() / case.local_size.max(1)
    }

    fn host_reference(&self, case: &BenchmarkCase, inputs: &[Vec<f32>]) -> Option<Vec<f32>> {
        let data = inputs.first()?;
        Some(partial_sums(data, case.local_size))
    }

    fn bytes_moved(&self, case: &BenchmarkCase) -> f64 {
        ((case.size.elements() + self.output_len(case)) * std::mem::size_of::<f32>()) as f64
    }

    fn flops(&self, case: &BenchmarkCase) -> f64 {
        case.size.elements() as f64
    }
}

pub fn partial_sums(data: &[f32], group: usize) -> Vec<f32> {
    data.chunks(group.max(1)).map(|chunk| chunk.iter().sum()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workload::test_capabilities;

    #[test]
    fn ones_reduce_to_one_partial_per_group() {
        let workload = ReduceWorkload::new();
        let params = workload.default_params();
        let case = &workload.cases(&params, &test_capabilities()).unwrap()[0];
        assert_eq!(workload.output_len(case), 4);

        let inputs = workload.inputs(case, InputFill::Constant);
        let partials = workload.host_reference(case, &inputs).unwrap();
        assert_eq!(partials, vec![256.0; 4]);
        assert_eq!(partials.iter().sum::<f32>(), 1024.0);
    }

    #[test]
    fn local_size_must_be_a_power_of_two() {
        let workload = ReduceWorkload::new();
        let params = WorkloadParams {
            local_size: 96,
            sizes: vec![960],
            ..workload.default_params()
        };
        assert!(workload.cases(&params, &test_capabilities()).is_err());
    }
}
