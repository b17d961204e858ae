//! Run lifecycle: the phase state machine and the driver that walks a
//! suite through it.

use crate::harness::{Harness, PreparedVariant, SweepOptions};
use crate::loader::{BuildOptions, KernelLoader};
use crate::report;
use crate::results::BenchmarkRun;
use crate::session::DeviceSession;
use memwall_device::{ComputeDevice, ProbeError, Result};
use memwall_kernels::{KernelSourceRepository, Workload, WorkloadParams};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use tracing::{error, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    Configured,
    Building,
    Ready,
    Executing,
    Aggregating,
    Reported,
    BuildFailed,
    ExecutionFailed,
}

impl RunPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunPhase::Reported | RunPhase::BuildFailed | RunPhase::ExecutionFailed)
    }

    pub fn can_advance_to(&self, next: RunPhase) -> bool {
        use RunPhase::*;
        matches!(
            (self, next),
            (Configured, Building)
                | (Building, Ready)
                | (Building, BuildFailed)
                | (Ready, Executing)
                | (Executing, Aggregating)
                | (Executing, ExecutionFailed)
                | (Aggregating, Reported)
        )
    }
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunPhase::Configured => "CONFIGURED",
            RunPhase::Building => "BUILDING",
            RunPhase::Ready => "READY",
            RunPhase::Executing => "EXECUTING",
            RunPhase::Aggregating => "AGGREGATING",
            RunPhase::Reported => "REPORTED",
            RunPhase::BuildFailed => "BUILD_FAILED",
            RunPhase::ExecutionFailed => "EXECUTION_FAILED",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunState {
    phase: RunPhase,
    history: Vec<RunPhase>,
}

impl Default for RunState {
    fn default() -> Self {
        Self {
            phase: RunPhase::Configured,
            history: vec![RunPhase::Configured],
        }
    }
}

impl RunState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phase(&self) -> RunPhase {
        self.phase
    }

    pub fn history(&self) -> &[RunPhase] {
        &self.history
    }

    pub fn advance(&mut self, next: RunPhase) -> Result<()> {
        if !self.phase.can_advance_to(next) {
            return Err(ProbeError::InvalidConfig(format!(
                "illegal run transition {} -> {next}",
                self.phase
            )));
        }
        info!(from = %self.phase, to = %next, "run phase");
        self.phase = next;
        self.history.push(next);
        Ok(())
    }
}

/// Everything a suite run needs besides the device.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub params: WorkloadParams,
    pub sweep: SweepOptions,
    pub extra_build_options: String,
    pub repository: KernelSourceRepository,
    pub csv_path: Option<PathBuf>,
    pub json_path: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub run: BenchmarkRun,
    pub table: String,
    pub state: RunState,
}

pub struct SuiteRunner<'s, D: ComputeDevice> {
    session: &'s DeviceSession<D>,
    state: RunState,
}

impl<'s, D: ComputeDevice> SuiteRunner<'s, D> {
    pub fn new(session: &'s DeviceSession<D>) -> Self {
        Self {
            session,
            state: RunState::new(),
        }
    }

    pub fn state(&self) -> &RunState {
        &self.state
    }

    /// Configure, build, sweep and report one suite. On failure the runner
    /// is left in the terminal phase for the stage that failed.
    pub fn run(&mut self, workload: &dyn Workload, options: &RunOptions) -> Result<RunOutcome> {
        let caps = self.session.capabilities();
        let cases = workload.cases(&options.params, caps)?;
        let variants = workload.variants(&options.params);
        let first = cases
            .first()
            .ok_or_else(|| ProbeError::InvalidConfig("no sizes to sweep".into()))?;
        info!(suite = %workload.suite(), cases = cases.len(), variants = variants.len(), "run configured");

        self.state.advance(RunPhase::Building)?;
        let build_options = BuildOptions::for_case(first, options.params.wpt, &options.extra_build_options);
        let prepared = match self.build(workload, &variants, &options.repository, &build_options) {
            Ok(prepared) => prepared,
            Err(err) => {
                error!(error = %err, "build failed");
                self.state.advance(RunPhase::BuildFailed)?;
                return Err(err);
            }
        };
        self.state.advance(RunPhase::Ready)?;

        self.state.advance(RunPhase::Executing)?;
        let run = match Harness::new(self.session).sweep(workload, &cases, &prepared, &options.sweep) {
            Ok(run) => run,
            Err(err) => {
                error!(error = %err, "execution failed");
                self.state.advance(RunPhase::ExecutionFailed)?;
                return Err(err);
            }
        };

        self.state.advance(RunPhase::Aggregating)?;
        let table = report::tabulate(&run);
        if let Some(path) = &options.csv_path {
            report::export_csv(path, &run)?;
        }
        if let Some(path) = &options.json_path {
            report::save_json(path, &run)?;
        }
        self.state.advance(RunPhase::Reported)?;

        Ok(RunOutcome {
            run,
            table,
            state: self.state.clone(),
        })
    }

    fn build(
        &self,
        workload: &dyn Workload,
        variants: &[memwall_kernels::KernelVariant],
        repository: &KernelSourceRepository,
        build_options: &BuildOptions,
    ) -> Result<Vec<PreparedVariant<D::Kernel>>> {
        let loader = KernelLoader::new(self.session, repository);
        let program = loader.load(workload.sources(self.session.device().dialect()), build_options)?;
        variants
            .iter()
            .map(|variant| {
                Ok(PreparedVariant {
                    variant: variant.clone(),
                    kernel: loader.resolve(&program, &variant.entry_point)?,
                })
            })
            .collect()
    }
}
