//! File-based run configuration, layered under the command line.

use crate::harness::{ResourcePolicy, SweepOptions};
use crate::report::DEFAULT_CSV_PATH;
use crate::run::RunOptions;
use crate::session::DEFAULT_SYNC_TIMEOUT;
use crate::verifier::{Verifier, DEFAULT_TOLERANCE};
use memwall_device::{BackendKind, DeviceClass, DeviceSelector, ProbeError, Result};
use memwall_kernels::{InputFill, KernelSourceRepository, Suite, Workload, WorkloadParams};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Per-suite overrides; unset fields keep the suite's defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SuiteOverrides {
    pub sizes: Option<Vec<usize>>,
    pub iterations: Option<u32>,
    pub local_size: Option<usize>,
    pub tile: Option<usize>,
    pub wpt: Option<usize>,
}

impl SuiteOverrides {
    pub fn apply(&self, params: &mut WorkloadParams) {
        if let Some(sizes) = &self.sizes {
            params.sizes = sizes.clone();
        }
        if let Some(iterations) = self.iterations {
            params.iterations = iterations;
        }
        if let Some(local_size) = self.local_size {
            params.local_size = local_size;
        }
        if self.tile.is_some() {
            params.tile = self.tile;
        }
        if let Some(wpt) = self.wpt {
            params.wpt = wpt;
        }
    }

    /// Fields set in `other` win.
    pub fn merge(&mut self, other: &SuiteOverrides) {
        if other.sizes.is_some() {
            self.sizes = other.sizes.clone();
        }
        self.iterations = other.iterations.or(self.iterations);
        self.local_size = other.local_size.or(self.local_size);
        self.tile = other.tile.or(self.tile);
        self.wpt = other.wpt.or(self.wpt);
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RunConfig {
    pub backend: BackendKind,
    pub platform: usize,
    /// Unset means the backend's default: `any` on the host, `gpu` elsewhere.
    pub device_class: Option<DeviceClass>,
    pub device_index: usize,
    pub sync_timeout_ms: u64,
    pub resource_policy: ResourcePolicy,
    pub tolerance: f32,
    pub build_options: String,
    pub kernel_dir: Option<PathBuf>,
    pub csv_path: PathBuf,
    pub json_path: Option<PathBuf>,
    /// Seed for random inputs; constant fills when unset.
    pub random_seed: Option<u64>,
    pub memory: SuiteOverrides,
    pub matmul: SuiteOverrides,
    pub reduce: SuiteOverrides,
    pub vec_add: SuiteOverrides,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::Host,
            platform: 0,
            device_class: None,
            device_index: 0,
            sync_timeout_ms: DEFAULT_SYNC_TIMEOUT.as_millis() as u64,
            resource_policy: ResourcePolicy::Abort,
            tolerance: DEFAULT_TOLERANCE,
            build_options: String::new(),
            kernel_dir: None,
            csv_path: PathBuf::from(DEFAULT_CSV_PATH),
            json_path: None,
            random_seed: None,
            memory: SuiteOverrides::default(),
            matmul: SuiteOverrides::default(),
            reduce: SuiteOverrides::default(),
            vec_add: SuiteOverrides::default(),
        }
    }
}

impl RunConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|err| ProbeError::io(path, err))?;
        let config: RunConfig = serde_json::from_str(&text)
            .map_err(|err| ProbeError::InvalidConfig(format!("{}: {err}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.sync_timeout_ms == 0 {
            return Err(ProbeError::InvalidConfig("sync_timeout_ms must be positive".into()));
        }
        Verifier::with_tolerance(self.tolerance)?;
        Ok(())
    }

    pub fn selector(&self) -> DeviceSelector {
        let class = self.device_class.unwrap_or(match self.backend {
            BackendKind::Host => DeviceClass::Any,
            BackendKind::Wgpu | BackendKind::OpenCl => DeviceClass::Gpu,
        });
        DeviceSelector {
            platform: self.platform,
            class,
            index: self.device_index,
        }
    }

    pub fn sync_timeout(&self) -> Duration {
        Duration::from_millis(self.sync_timeout_ms)
    }

    pub fn overrides(&self, suite: Suite) -> &SuiteOverrides {
        match suite {
            Suite::Memory => &self.memory,
            Suite::Matmul => &self.matmul,
            Suite::Reduce => &self.reduce,
            Suite::VecAdd => &self.vec_add,
        }
    }

    pub fn overrides_mut(&mut self, suite: Suite) -> &mut SuiteOverrides {
        match suite {
            Suite::Memory => &mut self.memory,
            Suite::Matmul => &mut self.matmul,
            Suite::Reduce => &mut self.reduce,
            Suite::VecAdd => &mut self.vec_add,
        }
    }

    pub fn fill(&self) -> InputFill {
        match self.random_seed {
            Some(seed) => InputFill::Random { seed },
            None => InputFill::Constant,
        }
    }

    /// The suite's defaults with this config's overrides on top.
    pub fn params_for(&self, workload: &dyn Workload) -> WorkloadParams {
        let mut params = workload.default_params();
        self.overrides(workload.suite()).apply(&mut params);
        params
    }

    pub fn repository(&self) -> KernelSourceRepository {
        match &self.kernel_dir {
            Some(dir) => KernelSourceRepository::directory(dir),
            None => KernelSourceRepository::Embedded,
        }
    }

    pub fn run_options(&self, workload: &dyn Workload) -> Result<RunOptions> {
        Ok(RunOptions {
            params: self.params_for(workload),
            sweep: SweepOptions {
                fill: self.fill(),
                policy: self.resource_policy,
                verifier: Verifier::with_tolerance(self.tolerance)?,
            },
            extra_build_options: self.build_options.clone(),
            repository: self.repository(),
            csv_path: Some(self.csv_path.clone()),
            json_path: self.json_path.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use memwall_kernels::{MatmulWorkload, MemoryWorkload};

    #[test]
    fn partial_file_keeps_defaults() {
        let config: RunConfig = serde_json::from_str(
            r#"{ "backend": "wgpu", "resource_policy": "skip", "matmul": { "sizes": [64, 128] } }"#,
        )
        .unwrap();
        assert_eq!(config.backend, BackendKind::Wgpu);
        assert_eq!(config.resource_policy, ResourcePolicy::Skip);
        assert_eq!(config.csv_path, PathBuf::from("benchmark_results.csv"));

        let params = config.params_for(&MatmulWorkload::new());
        assert_eq!(params.sizes, vec![64, 128]);
        assert_eq!(params.wpt, 4);
        let memory = config.params_for(&MemoryWorkload::new());
        assert_eq!(memory.iterations, 10_000);
    }

    #[test]
    fn unknown_keys_and_bad_values_are_configuration_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{ "sync_timeout": 5 }"#).unwrap();
        assert!(matches!(RunConfig::load(&path), Err(ProbeError::InvalidConfig(_))));

        std::fs::write(&path, r#"{ "sync_timeout_ms": 0 }"#).unwrap();
        assert!(matches!(RunConfig::load(&path), Err(ProbeError::InvalidConfig(_))));

        let missing = dir.path().join("absent.json");
        assert!(matches!(RunConfig::load(&missing), Err(ProbeError::Io { .. })));
    }

    #[test]
    fn command_line_overrides_win() {
        let mut base = SuiteOverrides {
            sizes: Some(vec![1024]),
            iterations: Some(10),
            ..SuiteOverrides::default()
        };
        base.merge(&SuiteOverrides {
            iterations: Some(20),
            ..SuiteOverrides::default()
        });
        assert_eq!(base.sizes, Some(vec![1024]));
        assert_eq!(base.iterations, Some(20));
    }

    #[test]
    fn seed_switches_to_random_inputs() {
        let config = RunConfig {
            random_seed: Some(7),
            ..RunConfig::default()
        };
        assert_eq!(config.fill(), InputFill::Random { seed: 7 });
        let options = config.run_options(&MatmulWorkload::new()).unwrap();
        assert_eq!(options.sweep.fill, InputFill::Random { seed: 7 });
    }

    #[test]
    fn device_class_defaults_per_backend() {
        let host = RunConfig::default();
        assert_eq!(host.selector().class, DeviceClass::Any);

        let wgpu: RunConfig = serde_json::from_str(r#"{ "backend": "wgpu", "device_index": 1 }"#).unwrap();
        assert_eq!(wgpu.selector().class, DeviceClass::Gpu);
        assert_eq!(wgpu.selector().index, 1);

        let pinned: RunConfig = serde_json::from_str(r#"{ "device_class": "cpu" }"#).unwrap();
        assert_eq!(pinned.backend, BackendKind::Host);
        assert_eq!(pinned.selector().class, DeviceClass::Cpu);
    }
}
