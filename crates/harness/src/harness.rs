//! Execution harness: timed single launches and the size/variant sweep.

use crate::results::{BenchmarkRun, CaseSummary, ExecutionResult, VariantSummary};
use crate::session::DeviceSession;
use crate::verifier::{Correctness, Verifier};
use memwall_device::{
    BufferAccess, ClockDomain, ComputeDevice, DeviceSpan, ErrorKind, KernelArg, ProbeError, Result,
};
use memwall_kernels::{ArgSlot, BenchmarkCase, InputFill, KernelVariant, LaunchShape, Workload};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// What a sweep does with a case that exceeds a device limit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourcePolicy {
    #[default]
    Abort,
    Skip,
}

/// Device-clock duration of one completed launch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Timing {
    pub span: DeviceSpan,
    pub kernel_ms: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SweepOptions {
    pub fill: InputFill,
    pub policy: ResourcePolicy,
    pub verifier: Verifier,
}

/// A variant together with its resolved kernel.
pub struct PreparedVariant<K> {
    pub variant: KernelVariant,
    pub kernel: K,
}

struct Measurement {
    output: Vec<f32>,
    timing: Timing,
    transfer_in_ms: f64,
    transfer_out_ms: f64,
}

pub struct Harness<'s, D: ComputeDevice> {
    session: &'s DeviceSession<D>,
}

impl<'s, D: ComputeDevice> Harness<'s, D> {
    pub fn new(session: &'s DeviceSession<D>) -> Self {
        Self { session }
    }

    /// Reject a launch the device cannot hold before anything is enqueued.
    /// `static_local_bytes` is on-chip memory the kernel declares itself.
    pub fn check_launch(&self, shape: &LaunchShape, static_local_bytes: usize, dynamic_local_bytes: usize) -> Result<()> {
        let caps = self.session.capabilities();
        if let Some(local) = &shape.local {
            let items: usize = local.iter().product();
            if items > caps.max_work_group_size {
                return Err(ProbeError::resource(format!(
                    "work-group of {items} items exceeds the maximum of {}",
                    caps.max_work_group_size
                )));
            }
            for (dim, &size) in local.iter().enumerate() {
                let limit = caps.max_work_items_in(dim);
                if size > limit {
                    return Err(ProbeError::resource(format!(
                        "local size {size} in dimension {dim} exceeds the maximum of {limit}"
                    )));
                }
            }
        }
        let reserved = static_local_bytes + dynamic_local_bytes;
        if reserved as u64 > caps.local_mem_bytes {
            return Err(ProbeError::resource(format!(
                "local reservation of {reserved} B exceeds {} B of local memory",
                caps.local_mem_bytes
            )));
        }
        Ok(())
    }

    /// Launch `kernel` once, wait for it and return its device-clock span.
    pub fn run_once(
        &self,
        kernel: &D::Kernel,
        args: &[KernelArg<'_, D::Buffer>],
        shape: &LaunchShape,
        static_local_bytes: usize,
    ) -> Result<Timing> {
        let dynamic: usize = args.iter().map(KernelArg::local_bytes).sum();
        self.check_launch(shape, static_local_bytes, dynamic)?;
        self.launch_and_wait(kernel, args, shape)
    }

    fn launch_and_wait(
        &self,
        kernel: &D::Kernel,
        args: &[KernelArg<'_, D::Buffer>],
        shape: &LaunchShape,
    ) -> Result<Timing> {
        let device = self.session.device();
        let launch = device.enqueue(kernel, args, &shape.global, shape.local.as_deref())?;
        let span = device.wait(launch, self.session.sync_timeout())?;
        if span.clock != ClockDomain::Device {
            return Err(ProbeError::device(
                "kernel timing",
                "backend returned a host-clock span for a kernel",
            ));
        }
        Ok(Timing {
            span,
            kernel_ms: span.elapsed_ms(),
        })
    }

    fn allocate(&self, len: usize, access: BufferAccess) -> Result<D::Buffer> {
        let bytes = (len * std::mem::size_of::<f32>()) as u64;
        let limit = self.session.capabilities().max_alloc_bytes;
        if bytes > limit {
            return Err(ProbeError::resource(format!(
                "buffer of {bytes} B exceeds the maximum single allocation of {limit} B"
            )));
        }
        self.session.device().allocate(len, access)
    }

    fn upload(&self, data: &[f32], access: BufferAccess, elapsed_ms: &mut f64) -> Result<D::Buffer> {
        let mut buffer = self.allocate(data.len(), access)?;
        let span = self.session.device().write(&mut buffer, data)?;
        *elapsed_ms += span.elapsed_ms();
        Ok(buffer)
    }

    /// Fresh buffers, transfer in, one launch, transfer out. Launch limits
    /// are checked before any buffer is allocated.
    fn measure(
        &self,
        workload: &dyn Workload,
        case: &BenchmarkCase,
        prepared: &PreparedVariant<D::Kernel>,
        inputs: &[Vec<f32>],
    ) -> Result<Measurement> {
        let variant = &prepared.variant;
        let shape = variant.launch(case);
        let local_items = shape.local_items();
        self.check_launch(
            &shape,
            variant.static_local_bytes(case),
            variant.dynamic_local_bytes(local_items),
        )?;

        let input = |index: usize| {
            inputs.get(index).ok_or_else(|| {
                ProbeError::InvalidConfig(format!(
                    "{} binds input {index} but the case has {} inputs",
                    variant.entry_point,
                    inputs.len()
                ))
            })
        };

        let mut transfer_in_ms = 0.0;
        let mut buffers: Vec<Option<D::Buffer>> = Vec::with_capacity(variant.args.len());
        for slot in &variant.args {
            let buffer = match *slot {
                ArgSlot::Input(index) => Some(self.upload(input(index)?, BufferAccess::ReadOnly, &mut transfer_in_ms)?),
                ArgSlot::InPlace(index) => Some(self.upload(input(index)?, BufferAccess::ReadWrite, &mut transfer_in_ms)?),
                ArgSlot::Output => Some(self.allocate(workload.output_len(case), BufferAccess::WriteOnly)?),
                ArgSlot::Scalar(_) | ArgSlot::LocalScratch { .. } => None,
            };
            buffers.push(buffer);
        }

        let args = variant
            .args
            .iter()
            .zip(&buffers)
            .map(|(slot, buffer)| match (slot, buffer) {
                (_, Some(buffer)) => Ok(KernelArg::Buffer(buffer)),
                (ArgSlot::Scalar(scalar), None) => {
                    let value = scalar.value(case);
                    i32::try_from(value).map(KernelArg::Int).map_err(|_| {
                        ProbeError::InvalidConfig(format!("{scalar:?} = {value} does not fit a kernel int"))
                    })
                }
                (ArgSlot::LocalScratch { bytes_per_item }, None) => Ok(KernelArg::Local(bytes_per_item * local_items)),
                (slot, None) => Err(ProbeError::device("bind arguments", format!("{slot:?} has no buffer"))),
            })
            .collect::<Result<Vec<_>>>()?;

        debug!(
            kernel = %variant.entry_point,
            case = %case.label(),
            global = ?shape.global,
            local = ?shape.local,
            "launching"
        );
        let timing = self.launch_and_wait(&prepared.kernel, &args, &shape)?;

        let (slot_index, slot) = variant.result_slot().ok_or_else(|| {
            ProbeError::InvalidConfig(format!("{} declares no result buffer", variant.entry_point))
        })?;
        let len = match slot {
            ArgSlot::InPlace(index) => input(index)?.len(),
            _ => workload.output_len(case),
        };
        let result_buffer = buffers
            .get(slot_index)
            .and_then(Option::as_ref)
            .ok_or_else(|| ProbeError::device("read result", "result slot has no buffer"))?;
        let mut output = vec![0.0f32; len];
        let read = self.session.device().read(result_buffer, &mut output)?;

        Ok(Measurement {
            output,
            timing,
            transfer_in_ms,
            transfer_out_ms: read.elapsed_ms(),
        })
    }

    /// Run every variant on every case. Cases must be ascending and the
    /// reference variant must come first; each variant of a case sees the
    /// same host inputs.
    pub fn sweep(
        &self,
        workload: &dyn Workload,
        cases: &[BenchmarkCase],
        variants: &[PreparedVariant<D::Kernel>],
        options: &SweepOptions,
    ) -> Result<BenchmarkRun> {
        match variants.first() {
            Some(first) if first.variant.reference => {}
            _ => {
                return Err(ProbeError::InvalidConfig(
                    "the reference variant must be swept first".into(),
                ))
            }
        }
        if cases
            .windows(2)
            .any(|pair| pair[0].size.elements() >= pair[1].size.elements())
        {
            return Err(ProbeError::InvalidConfig("sizes must be strictly ascending".into()));
        }

        let mut run = BenchmarkRun {
            device: self.session.capabilities().name.clone(),
            suite: workload.suite(),
            title: workload.title().to_string(),
            size_label: workload.size_label().to_string(),
            variants: variants.iter().map(|p| VariantSummary::from(&p.variant)).collect(),
            cases: Vec::with_capacity(cases.len()),
            results: Vec::new(),
        };

        for case in cases {
            let label = case.label();
            let mut summary = CaseSummary {
                index: case.index,
                label: label.clone(),
                size: case.size,
                skipped: None,
            };
            match self.sweep_case(workload, case, variants, options) {
                Ok(results) => run.results.extend(results),
                Err(err) if err.kind() == ErrorKind::Resource && options.policy == ResourcePolicy::Skip => {
                    let err = err.with_case(label.as_str());
                    warn!(case = %label, error = %err, "skipping case");
                    summary.skipped = Some(err.to_string());
                }
                Err(err) => return Err(err.with_case(label)),
            }
            run.cases.push(summary);
        }
        Ok(run)
    }

    fn sweep_case(
        &self,
        workload: &dyn Workload,
        case: &BenchmarkCase,
        variants: &[PreparedVariant<D::Kernel>],
        options: &SweepOptions,
    ) -> Result<Vec<ExecutionResult>> {
        let inputs = workload.inputs(case, options.fill);
        let host_reference = workload.host_reference(case, &inputs);
        let mut reference_output: Option<Vec<f32>> = None;
        let mut results = Vec::with_capacity(variants.len());

        for prepared in variants {
            let variant = &prepared.variant;
            let measurement = self.measure(workload, case, prepared, &inputs)?;
            let correctness = if variant.reference {
                options.verifier.verify(host_reference.as_deref(), &measurement.output)?
            } else {
                let baseline = reference_output.as_deref().or(host_reference.as_deref());
                options.verifier.verify(baseline, &measurement.output)?
            };
            if correctness == Correctness::Fail {
                warn!(case = %case.label(), variant = %variant.label, "output does not match the reference");
            }
            info!(
                case = %case.label(),
                variant = %variant.label,
                kernel_ms = measurement.timing.kernel_ms,
                transfer_in_ms = measurement.transfer_in_ms,
                transfer_out_ms = measurement.transfer_out_ms,
                correctness = %correctness,
                "measured"
            );

            results.push(ExecutionResult {
                variant: variant.label.clone(),
                strategy: variant.strategy,
                case_index: case.index,
                case_label: case.label(),
                size: case.size,
                kernel_ms: measurement.timing.kernel_ms,
                transfer_in_ms: measurement.transfer_in_ms,
                transfer_out_ms: measurement.transfer_out_ms,
                correctness,
                bytes_moved: workload.bytes_moved(case),
                flops: workload.flops(case),
            });
            if variant.reference {
                reference_output = Some(measurement.output);
            }
        }
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use memwall_backend_cpu::{HostDevice, HostDeviceOptions};
    use memwall_kernels::{KernelSourceRepository, ProblemSize};

    fn session(options: HostDeviceOptions) -> DeviceSession<HostDevice> {
        DeviceSession::new(HostDevice::new(options).unwrap()).unwrap()
    }

    fn vec_add(session: &DeviceSession<HostDevice>) -> memwall_backend_cpu::HostKernel {
        let source = KernelSourceRepository::default().load_text("vec_add.cl").unwrap();
        let program = session.device().build(&[&source], "").unwrap();
        session.device().create_kernel(&program, "vec_add").unwrap()
    }

    #[test]
    fn run_once_returns_a_device_span() {
        let session = session(HostDeviceOptions::default());
        let device = session.device();
        let kernel = vec_add(&session);
        let mut a = device.allocate(64, BufferAccess::ReadOnly).unwrap();
        let mut b = device.allocate(64, BufferAccess::ReadOnly).unwrap();
        let c = device.allocate(64, BufferAccess::WriteOnly).unwrap();
        device.write(&mut a, &[1.0; 64]).unwrap();
        device.write(&mut b, &[2.0; 64]).unwrap();

        let args = [
            KernelArg::Buffer(&a),
            KernelArg::Buffer(&b),
            KernelArg::Buffer(&c),
            KernelArg::Int(64),
        ];
        let shape = LaunchShape::new(vec![64], Some(vec![64]));
        let timing = Harness::new(&session).run_once(&kernel, &args, &shape, 0).unwrap();
        assert_eq!(timing.span.clock, ClockDomain::Device);
        assert!(timing.kernel_ms >= 0.0);

        let mut out = vec![0.0; 64];
        device.read(&c, &mut out).unwrap();
        assert!(out.iter().all(|&v| v == 3.0));
    }

    #[test]
    fn oversized_work_group_is_rejected_before_enqueue() {
        let session = session(HostDeviceOptions::default());
        let kernel = vec_add(&session);
        let shape = LaunchShape::new(vec![4096], Some(vec![2048]));
        let err = Harness::new(&session).run_once(&kernel, &[], &shape, 0).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Resource);
        assert_eq!(session.device().launches(), 0);
    }

    #[test]
    fn static_tiles_count_against_local_memory() {
        let session = session(HostDeviceOptions {
            local_mem_bytes: 1024,
            ..HostDeviceOptions::default()
        });
        let shape = LaunchShape::new(vec![64, 64], Some(vec![16, 16]));
        let harness = Harness::new(&session);
        assert!(harness.check_launch(&shape, 1024, 0).is_ok());
        let err = harness.check_launch(&shape, 1024, 4).unwrap_err();
        assert!(err.to_string().contains("1028 B"), "{err}");
    }

    #[test]
    fn launch_limits_are_checked_before_buffers_are_allocated() {
        let session = session(HostDeviceOptions {
            local_mem_bytes: 512,
            max_alloc_bytes: 16,
            ..HostDeviceOptions::default()
        });
        let workload = memwall_kernels::ReduceWorkload::new();
        let options = crate::run::RunOptions {
            params: memwall_kernels::WorkloadParams {
                sizes: vec![1024],
                ..workload.default_params()
            },
            ..crate::run::RunOptions::default()
        };
        let err = crate::run::SuiteRunner::new(&session)
            .run(&workload, &options)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Resource);
        assert!(err.to_string().contains("local reservation"), "{err}");
        assert!(!err.to_string().contains("buffer of"), "{err}");
        assert_eq!(session.device().launches(), 0);
    }

    #[test]
    fn sweep_requires_the_reference_first() {
        let session = session(HostDeviceOptions::default());
        let workload = memwall_kernels::VecAddWorkload::new();
        let params = memwall_kernels::WorkloadParams {
            sizes: vec![64],
            local_size: 64,
            ..workload.default_params()
        };
        let cases = workload.cases(&params, session.capabilities()).unwrap();
        assert_eq!(cases[0].size, ProblemSize::Elements(64));
        let err = Harness::new(&session)
            .sweep(&workload, &cases, &[], &SweepOptions::default())
            .unwrap_err();
        assert!(matches!(err, ProbeError::InvalidConfig(_)));
    }
}
