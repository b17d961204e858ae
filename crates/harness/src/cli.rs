//! CLI wiring for the memwall benchmark runner.

use crate::config::{RunConfig, SuiteOverrides};
use crate::harness::ResourcePolicy;
use crate::report;
use crate::run::SuiteRunner;
use crate::session::DeviceSession;
use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use memwall_backend_cpu::{HostDevice, HostDeviceOptions};
use memwall_backend_gpu::WgpuDevice;
use memwall_device::{BackendKind, ComputeDevice, DeviceClass, ProbeError};
use memwall_kernels::{Suite, WorkloadRegistry};
use std::path::PathBuf;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "memwall", about = "Memory-hierarchy benchmarks for compute devices")]
pub struct Cli {
    #[arg(long, value_enum, global = true)]
    pub backend: Option<BackendArg>,

    #[arg(long, value_enum, global = true)]
    pub device_class: Option<ClassArg>,

    #[arg(long, global = true)]
    pub platform: Option<usize>,

    /// Device index within the platform and class.
    #[arg(long, global = true)]
    pub device: Option<usize>,

    /// JSON run configuration; flags override its values.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[arg(long, global = true)]
    pub csv: Option<PathBuf>,

    #[arg(long, global = true)]
    pub json: Option<PathBuf>,

    /// Read kernel sources from this directory instead of the built-in copies.
    #[arg(long, global = true)]
    pub kernel_dir: Option<PathBuf>,

    #[arg(long, global = true)]
    pub sync_timeout_ms: Option<u64>,

    #[arg(long, value_enum, global = true)]
    pub resource_policy: Option<PolicyArg>,

    /// Seeded random inputs instead of constant fills.
    #[arg(long, value_name = "SEED", global = true)]
    pub random_inputs: Option<u64>,

    #[arg(long, global = true)]
    pub tolerance: Option<f32>,

    /// Appended verbatim to the generated build options.
    #[arg(long, global = true, allow_hyphen_values = true)]
    pub build_options: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
pub enum BackendArg {
    Host,
    Wgpu,
    Opencl,
}

impl From<BackendArg> for BackendKind {
    fn from(value: BackendArg) -> BackendKind {
        match value {
            BackendArg::Host => BackendKind::Host,
            BackendArg::Wgpu => BackendKind::Wgpu,
            BackendArg::Opencl => BackendKind::OpenCl,
        }
    }
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
pub enum ClassArg {
    Gpu,
    Cpu,
    Any,
}

impl From<ClassArg> for DeviceClass {
    fn from(value: ClassArg) -> DeviceClass {
        match value {
            ClassArg::Gpu => DeviceClass::Gpu,
            ClassArg::Cpu => DeviceClass::Cpu,
            ClassArg::Any => DeviceClass::Any,
        }
    }
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
pub enum PolicyArg {
    Abort,
    Skip,
}

impl From<PolicyArg> for ResourcePolicy {
    fn from(value: PolicyArg) -> ResourcePolicy {
        match value {
            PolicyArg::Abort => ResourcePolicy::Abort,
            PolicyArg::Skip => ResourcePolicy::Skip,
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Print the capability report of the selected device.
    Info,
    /// Global, local and private memory access under repeated updates.
    Memory(SuiteArgs),
    /// Naive, shared-tiled and register-blocked matrix multiplication.
    Matmul(SuiteArgs),
    /// Work-group tree reduction.
    Reduce(SuiteArgs),
    /// Element-wise vector addition.
    VecAdd(SuiteArgs),
}

#[derive(Args, Debug, Clone, Default)]
pub struct SuiteArgs {
    /// Comma-separated, strictly ascending.
    #[arg(long, value_delimiter = ',')]
    pub sizes: Option<Vec<usize>>,

    #[arg(long)]
    pub iterations: Option<u32>,

    #[arg(long)]
    pub local_size: Option<usize>,

    /// Matmul tile edge; chosen from the device limits when omitted.
    #[arg(long)]
    pub tile: Option<usize>,

    /// Matmul work per thread.
    #[arg(long)]
    pub wpt: Option<usize>,
}

impl From<&SuiteArgs> for SuiteOverrides {
    fn from(args: &SuiteArgs) -> SuiteOverrides {
        SuiteOverrides {
            sizes: args.sizes.clone(),
            iterations: args.iterations,
            local_size: args.local_size,
            tile: args.tile,
            wpt: args.wpt,
        }
    }
}

impl Command {
    pub fn suite(&self) -> Option<(Suite, &SuiteArgs)> {
        match self {
            Command::Info => None,
            Command::Memory(args) => Some((Suite::Memory, args)),
            Command::Matmul(args) => Some((Suite::Matmul, args)),
            Command::Reduce(args) => Some((Suite::Reduce, args)),
            Command::VecAdd(args) => Some((Suite::VecAdd, args)),
        }
    }
}

impl Cli {
    /// The config file (or defaults) with every given flag applied on top.
    pub fn resolve_config(&self) -> Result<RunConfig> {
        let mut config = match &self.config {
            Some(path) => RunConfig::load(path)?,
            None => RunConfig::default(),
        };

        if let Some(backend) = self.backend {
            config.backend = backend.into();
        }
        if let Some(class) = self.device_class {
            config.device_class = Some(class.into());
        }
        if let Some(platform) = self.platform {
            config.platform = platform;
        }
        if let Some(index) = self.device {
            config.device_index = index;
        }
        if let Some(path) = &self.csv {
            config.csv_path = path.clone();
        }
        if self.json.is_some() {
            config.json_path = self.json.clone();
        }
        if self.kernel_dir.is_some() {
            config.kernel_dir = self.kernel_dir.clone();
        }
        if let Some(ms) = self.sync_timeout_ms {
            config.sync_timeout_ms = ms;
        }
        if let Some(policy) = self.resource_policy {
            config.resource_policy = policy.into();
        }
        if self.random_inputs.is_some() {
            config.random_seed = self.random_inputs;
        }
        if let Some(tolerance) = self.tolerance {
            config.tolerance = tolerance;
        }
        if let Some(options) = &self.build_options {
            config.build_options = options.clone();
        }
        if let Some((suite, args)) = self.command.suite() {
            config.overrides_mut(suite).merge(&SuiteOverrides::from(args));
        }

        config.validate()?;
        Ok(config)
    }
}

pub fn run_cli(cli: Cli) -> Result<()> {
    tracing_subscriber::fmt::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let config = cli.resolve_config()?;
    let selector = config.selector();
    info!(backend = %config.backend, class = %selector.class, "opening device");

    match config.backend {
        BackendKind::Host => {
            let device = HostDevice::open(&selector, HostDeviceOptions::default())?;
            execute(device, &config, &cli.command)
        }
        BackendKind::Wgpu => execute(WgpuDevice::open(&selector)?, &config, &cli.command),
        BackendKind::OpenCl => run_opencl(&config, &cli.command),
    }
}

#[cfg(feature = "opencl")]
fn run_opencl(config: &RunConfig, command: &Command) -> Result<()> {
    let device = memwall_backend_opencl::OpenClDevice::open(&config.selector())?;
    execute(device, config, command)
}

#[cfg(not(feature = "opencl"))]
fn run_opencl(_config: &RunConfig, _command: &Command) -> Result<()> {
    Err(ProbeError::InvalidConfig(
        "this binary was built without OpenCL support (enable the `opencl` feature)".into(),
    )
    .into())
}

fn execute<D: ComputeDevice>(device: D, config: &RunConfig, command: &Command) -> Result<()> {
    let session = DeviceSession::with_timeout(device, config.sync_timeout())?;

    let Some((suite, _)) = command.suite() else {
        print!("{}", report::capability_report(session.capabilities()));
        return Ok(());
    };

    let registry = WorkloadRegistry::with_default_workloads();
    let workload = registry
        .find(suite)
        .ok_or_else(|| ProbeError::InvalidConfig(format!("no workload registered for suite '{suite}'")))?;
    let options = config.run_options(workload.as_ref())?;

    println!("{}\n", session.capabilities().tiling_hint());
    let mut runner = SuiteRunner::new(&session);
    let outcome = runner
        .run(workload.as_ref(), &options)
        .with_context(|| format!("{suite} run stopped in state {}", runner.state().phase()))?;

    print!("{}", outcome.table);
    println!("\nResults saved to {}", config.csv_path.display());
    if let Some(path) = &config.json_path {
        println!("Run report saved to {}", path.display());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn suite_flags_layer_over_defaults() {
        let cli = Cli::try_parse_from([
            "memwall",
            "--csv",
            "out.csv",
            "--resource-policy",
            "skip",
            "matmul",
            "--sizes",
            "64,128",
            "--tile",
            "16",
        ])
        .unwrap();
        let config = cli.resolve_config().unwrap();
        assert_eq!(config.backend, BackendKind::Host);
        assert_eq!(config.selector().class, DeviceClass::Any);
        assert_eq!(config.csv_path, PathBuf::from("out.csv"));
        assert_eq!(config.resource_policy, ResourcePolicy::Skip);
        assert_eq!(config.matmul.sizes, Some(vec![64, 128]));
        assert_eq!(config.matmul.tile, Some(16));
        assert_eq!(config.memory, SuiteOverrides::default());
    }

    #[test]
    fn global_flags_are_accepted_after_the_subcommand() {
        let cli = Cli::try_parse_from(["memwall", "vec-add", "--backend", "wgpu", "--device-class", "gpu"]).unwrap();
        let config = cli.resolve_config().unwrap();
        assert_eq!(config.backend, BackendKind::Wgpu);
        assert_eq!(config.selector().class, DeviceClass::Gpu);
        assert!(matches!(cli.command, Command::VecAdd(_)));
    }

    #[test]
    fn config_file_device_class_survives_without_the_flag() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{ "backend": "host", "device_class": "cpu" }"#).unwrap();
        let path = path.to_str().unwrap();

        let config = Cli::try_parse_from(["memwall", "--config", path, "info"])
            .unwrap()
            .resolve_config()
            .unwrap();
        assert_eq!(config.selector().class, DeviceClass::Cpu);

        let config = Cli::try_parse_from(["memwall", "--config", path, "--device-class", "any", "info"])
            .unwrap()
            .resolve_config()
            .unwrap();
        assert_eq!(config.selector().class, DeviceClass::Any);
    }

    #[test]
    fn zero_timeout_is_rejected() {
        let cli = Cli::try_parse_from(["memwall", "--sync-timeout-ms", "0", "info"]).unwrap();
        assert!(cli.resolve_config().is_err());
    }
}
