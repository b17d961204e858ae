//! Console tables, the CSV artifact and the JSON run report.

use crate::results::BenchmarkRun;
use memwall_device::{DeviceCapabilities, ProbeError, Result};
use std::fmt::Write as _;
use std::path::Path;
use tracing::info;

pub const DEFAULT_CSV_PATH: &str = "benchmark_results.csv";

fn opt<T: ToString>(value: Option<T>) -> String {
    value.map(|v| v.to_string()).unwrap_or_else(|| "n/a".to_string())
}

fn mib(bytes: u64) -> String {
    format!("{:.1} MiB", bytes as f64 / (1024.0 * 1024.0))
}

/// Human-readable capability listing; unreported fields show as `n/a`.
pub fn capability_report(caps: &DeviceCapabilities) -> String {
    let mut out = String::new();
    let sizes: Vec<String> = caps.max_work_item_sizes.iter().map(usize::to_string).collect();
    let unified = caps.unified_memory.map(|unified| if unified { "yes" } else { "no" });
    let rows = [
        ("Backend", caps.backend.to_string()),
        ("Platform", caps.platform.clone()),
        ("Device", caps.name.clone()),
        ("Vendor", caps.vendor.clone()),
        ("Driver", caps.driver_version.clone()),
        ("Class", caps.device_class.to_string()),
        ("Compute units", opt(caps.max_compute_units)),
        ("Max clock (MHz)", opt(caps.max_clock_mhz)),
        ("Max work-group size", caps.max_work_group_size.to_string()),
        ("Work-item dimensions", caps.max_work_item_dimensions.to_string()),
        ("Max work-item sizes", sizes.join(" x ")),
        ("Global memory", opt(caps.global_mem_bytes.map(mib))),
        ("Global memory cache", opt(caps.global_mem_cache_bytes.map(|b| format!("{} KiB", b / 1024)))),
        ("Local memory", format!("{} KiB", caps.local_mem_bytes / 1024)),
        ("Max allocation", mib(caps.max_alloc_bytes)),
        ("Vector width (float)", opt(caps.preferred_vector_width_float)),
        ("Vector width (half)", opt(caps.preferred_vector_width_half)),
        ("FP16", if caps.supports_fp16 { "yes" } else { "no" }.to_string()),
        ("Unified memory", opt(unified)),
    ];
    for (name, value) in rows {
        let _ = writeln!(out, "{name:<22} {value}");
    }
    let _ = writeln!(out, "\n{}", caps.tiling_hint());
    out
}

/// One row per (size, variant), then a summary of the largest case.
pub fn tabulate(run: &BenchmarkRun) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{} on {}", run.title, run.device);
    let _ = writeln!(
        out,
        "{:<18} {:<16} {:>12} {:>10} {:>10} {:>10} {:>10} {:>8} {:>9}",
        "Case", "Variant", "Kernel ms", "In ms", "Out ms", "GB/s", "GFLOP/s", "Check", "Speedup"
    );

    for case in &run.cases {
        if let Some(reason) = &case.skipped {
            let _ = writeln!(out, "{:<18} skipped: {reason}", case.label);
            continue;
        }
        for result in run.results_for(case.index) {
            let reference = run.reference().is_some_and(|r| r.label == result.variant);
            let speedup = match run.speedup(result) {
                Some(ratio) if !reference => format!("{ratio:.2}x"),
                _ => "-".to_string(),
            };
            let _ = writeln!(
                out,
                "{:<18} {:<16} {:>12.4} {:>10.4} {:>10.4} {:>10.2} {:>10.2} {:>8} {:>9}",
                case.label,
                result.variant,
                result.kernel_ms,
                result.transfer_in_ms,
                result.transfer_out_ms,
                result.bandwidth_gbps(),
                result.gflops(),
                result.correctness.to_string(),
                speedup
            );
        }
    }

    if let Some(summary) = summary_line(run) {
        let _ = writeln!(out, "\n{summary}");
    }
    out
}

fn summary_line(run: &BenchmarkRun) -> Option<String> {
    let reference = run.reference()?;
    let last = run.cases.iter().rev().find(|case| case.skipped.is_none())?;
    let ratios: Vec<String> = run
        .results_for(last.index)
        .filter(|result| result.variant != reference.label)
        .filter_map(|result| run.speedup(result).map(|ratio| format!("{} {ratio:.2}x", result.variant)))
        .collect();
    if ratios.is_empty() {
        return None;
    }
    Some(format!(
        "Summary ({}): {} vs {}",
        last.label,
        ratios.join(", "),
        reference.label
    ))
}

/// Overwrite `path` with `<SizeLabel>,<Variant>_ms,...`, one row per swept
/// size in ascending order. A variant without a measurement leaves its cell
/// empty.
pub fn export_csv(path: &Path, run: &BenchmarkRun) -> Result<()> {
    let io = |err: csv::Error| ProbeError::io(path, err.into());
    let mut writer = csv::Writer::from_path(path).map_err(io)?;

    let mut header = vec![run.size_label.clone()];
    header.extend(run.variants.iter().map(|variant| variant.csv_column()));
    writer.write_record(&header).map_err(io)?;

    for case in &run.cases {
        let mut row = vec![case.size.primary().to_string()];
        row.extend(run.variants.iter().map(|variant| {
            run.result(case.index, &variant.label)
                .map(|result| format!("{:.6}", result.kernel_ms))
                .unwrap_or_default()
        }));
        writer.write_record(&row).map_err(io)?;
    }
    writer
        .flush()
        .map_err(|err| ProbeError::io(path, err))?;
    info!(path = %path.display(), rows = run.cases.len(), "CSV written");
    Ok(())
}

pub fn save_json(path: &Path, run: &BenchmarkRun) -> Result<()> {
    let json = serde_json::to_string_pretty(run)
        .map_err(|err| ProbeError::io(path, err.into()))?;
    std::fs::write(path, json).map_err(|err| ProbeError::io(path, err))?;
    info!(path = %path.display(), "JSON report written");
    Ok(())
}

pub fn load_json(path: &Path) -> Result<BenchmarkRun> {
    let json = std::fs::read_to_string(path).map_err(|err| ProbeError::io(path, err))?;
    serde_json::from_str(&json).map_err(|err| ProbeError::io(path, err.into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::results::fixtures::matmul_run;

    #[test]
    fn table_shows_speedups_for_non_reference_variants() {
        let table = tabulate(&matmul_run());
        assert!(table.contains("2.00x"), "{table}");
        assert!(table.contains("3.20x"), "{table}");
        assert!(table.contains("Summary (N=256): SRAM Tiled 3.20x vs Naive"), "{table}");
    }

    #[test]
    fn csv_has_one_row_per_size() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("results.csv");
        std::fs::write(&path, "stale contents\nfrom an older run\n1\n2\n3\n").unwrap();

        let mut run = matmul_run();
        run.results.retain(|result| !(result.case_index == 1 && result.variant == "SRAM Tiled"));
        export_csv(&path, &run).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines, ["N,Naive_ms,SharedTiled_ms", "128,2.000000,1.000000", "256,8.000000,"]);
    }

    #[test]
    fn json_report_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.json");
        let run = matmul_run();
        save_json(&path, &run).unwrap();
        assert_eq!(load_json(&path).unwrap(), run);
    }

    #[test]
    fn unreported_capabilities_render_as_na() {
        let caps = DeviceCapabilities {
            backend: memwall_device::BackendKind::Host,
            platform: "p".into(),
            name: "d".into(),
            vendor: "v".into(),
            driver_version: "1".into(),
            device_class: memwall_device::DeviceClass::Cpu,
            max_compute_units: None,
            max_clock_mhz: None,
            max_work_group_size: 256,
            max_work_item_dimensions: 3,
            max_work_item_sizes: vec![256, 256, 64],
            global_mem_bytes: None,
            global_mem_cache_bytes: None,
            local_mem_bytes: 16 * 1024,
            max_alloc_bytes: 1 << 20,
            preferred_vector_width_float: None,
            preferred_vector_width_half: None,
            extensions: Vec::new(),
            supports_fp16: false,
            unified_memory: None,
        };
        let text = capability_report(&caps);
        assert!(text.contains("Unified memory         n/a"), "{text}");
        assert!(text.contains("Small SRAM detected"), "{text}");
    }
}
