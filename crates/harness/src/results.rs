//! Measurements produced by a sweep.

use crate::verifier::Correctness;
use memwall_kernels::{KernelVariant, ProblemSize, Strategy, Suite};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub variant: String,
    pub strategy: Strategy,
    pub case_index: usize,
    pub case_label: String,
    pub size: ProblemSize,
    /// Device clock only.
    pub kernel_ms: f64,
    pub transfer_in_ms: f64,
    pub transfer_out_ms: f64,
    pub correctness: Correctness,
    pub bytes_moved: f64,
    pub flops: f64,
}

impl ExecutionResult {
    pub fn bandwidth_gbps(&self) -> f64 {
        per_second(self.bytes_moved / 1e9, self.kernel_ms)
    }

    pub fn gflops(&self) -> f64 {
        per_second(self.flops / 1e9, self.kernel_ms)
    }
}

fn per_second(amount: f64, ms: f64) -> f64 {
    if ms > 0.0 {
        amount / (ms / 1000.0)
    } else {
        0.0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariantSummary {
    pub label: String,
    pub csv_label: String,
    pub strategy: Strategy,
    pub reference: bool,
}

impl From<&KernelVariant> for VariantSummary {
    fn from(variant: &KernelVariant) -> Self {
        Self {
            label: variant.label.clone(),
            csv_label: variant.csv_label.clone(),
            strategy: variant.strategy,
            reference: variant.reference,
        }
    }
}

impl VariantSummary {
    pub fn csv_column(&self) -> String {
        format!("{}_ms", self.csv_label)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseSummary {
    pub index: usize,
    pub label: String,
    pub size: ProblemSize,
    /// Set when the case was skipped under the `skip` resource policy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skipped: Option<String>,
}

/// Results of one suite, ascending by size with the reference variant
/// first within each size.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkRun {
    pub device: String,
    pub suite: Suite,
    pub title: String,
    pub size_label: String,
    pub variants: Vec<VariantSummary>,
    pub cases: Vec<CaseSummary>,
    pub results: Vec<ExecutionResult>,
}

impl BenchmarkRun {
    pub fn reference(&self) -> Option<&VariantSummary> {
        self.variants.iter().find(|variant| variant.reference)
    }

    pub fn results_for(&self, case_index: usize) -> impl Iterator<Item = &ExecutionResult> {
        self.results
            .iter()
            .filter(move |result| result.case_index == case_index)
    }

    pub fn result(&self, case_index: usize, variant: &str) -> Option<&ExecutionResult> {
        self.results_for(case_index)
            .find(|result| result.variant == variant)
    }

    /// Reference kernel time over this result's kernel time.
    pub fn speedup(&self, result: &ExecutionResult) -> Option<f64> {
        let reference = self.reference()?;
        let baseline = self.result(result.case_index, &reference.label)?;
        (result.kernel_ms > 0.0).then(|| baseline.kernel_ms / result.kernel_ms)
    }

    pub fn skipped(&self) -> impl Iterator<Item = &CaseSummary> {
        self.cases.iter().filter(|case| case.skipped.is_some())
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    pub fn result(case_index: usize, variant: &str, n: usize, kernel_ms: f64) -> ExecutionResult {
        ExecutionResult {
            variant: variant.to_string(),
            strategy: Strategy::Naive,
            case_index,
            case_label: format!("N={n}"),
            size: ProblemSize::square(n),
            kernel_ms,
            transfer_in_ms: 0.5,
            transfer_out_ms: 0.25,
            correctness: Correctness::Pass,
            bytes_moved: 3.0 * (n * n * 4) as f64,
            flops: 2.0 * (n * n * n) as f64,
        }
    }

    pub fn matmul_run() -> BenchmarkRun {
        let variant = |label: &str, csv: &str, reference| VariantSummary {
            label: label.to_string(),
            csv_label: csv.to_string(),
            strategy: Strategy::Naive,
            reference,
        };
        BenchmarkRun {
            device: "test device".into(),
            suite: Suite::Matmul,
            title: "Matrix multiplication strategies".into(),
            size_label: "N".into(),
            variants: vec![
                variant("Naive", "Naive", true),
                variant("SRAM Tiled", "SharedTiled", false),
            ],
            cases: [128, 256]
                .iter()
                .enumerate()
                .map(|(index, &n)| CaseSummary {
                    index,
                    label: format!("N={n}"),
                    size: ProblemSize::square(n),
                    skipped: None,
                })
                .collect(),
            results: vec![
                result(0, "Naive", 128, 2.0),
                result(0, "SRAM Tiled", 128, 1.0),
                result(1, "Naive", 256, 8.0),
                result(1, "SRAM Tiled", 256, 2.5),
            ],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use approx::assert_relative_eq;

    #[test]
    fn speedup_is_reference_over_candidate() {
        let run = matmul_run();
        let tiled = run.result(1, "SRAM Tiled").unwrap();
        assert_relative_eq!(run.speedup(tiled).unwrap(), 3.2);
        let naive = run.result(1, "Naive").unwrap();
        assert_relative_eq!(run.speedup(naive).unwrap(), 1.0);
    }

    #[test]
    fn throughput_uses_kernel_time() {
        let result = result(0, "Naive", 1000, 1000.0);
        assert_relative_eq!(result.gflops(), 2.0);
        assert_relative_eq!(result.bandwidth_gbps(), 0.012);
    }
}
