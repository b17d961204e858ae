//! Measurement engine for memwall.
//!
//! A [`DeviceSession`] holds one open device and its capability snapshot.
//! The [`KernelLoader`] builds suite programs against it, the [`Harness`]
//! times launches and sweeps sizes, and [`SuiteRunner`] walks a whole suite
//! through build, execution and reporting.

#[cfg(feature = "cli")]
pub mod cli;
pub mod config;
pub mod harness;
pub mod loader;
pub mod report;
pub mod results;
pub mod run;
pub mod session;
pub mod verifier;

pub use config::{RunConfig, SuiteOverrides};
pub use harness::{Harness, PreparedVariant, ResourcePolicy, SweepOptions, Timing};
pub use loader::{BuildOptions, KernelLoader};
pub use results::{BenchmarkRun, CaseSummary, ExecutionResult, VariantSummary};
pub use run::{RunOptions, RunOutcome, RunPhase, RunState, SuiteRunner};
pub use session::{DeviceSession, DEFAULT_SYNC_TIMEOUT};
pub use verifier::{compare, Correctness, Verifier, DEFAULT_TOLERANCE};
