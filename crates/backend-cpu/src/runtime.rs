//! Host device runtime.
//!
//! A single worker thread plays the in-order command queue: transfers and
//! kernel launches are submitted as jobs, run one after another, and are
//! stamped against the device epoch by the worker itself. Enqueueing never
//! blocks; only [`ComputeDevice::wait`] (and the blocking transfers) wait on
//! the worker.

use crate::compiler::{self, HostProgram};
use crate::kernels::{self, BoundArg, HostKernelFn, LaunchContext};
use memwall_device::{
    BackendKind, BufferAccess, ComputeDevice, DeviceCapabilities, DeviceClass, DeviceSelector,
    DeviceSpan, KernelArg, KernelDialect, ProbeError, Result,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info};

pub const HOST_PLATFORM: &str = "memwall host";

#[derive(Debug, Clone, PartialEq)]
pub struct HostDeviceOptions {
    pub name: String,
    pub max_work_group_size: usize,
    pub max_work_item_sizes: Vec<usize>,
    pub local_mem_bytes: u64,
    pub max_alloc_bytes: u64,
    pub global_mem_bytes: u64,
    /// Stall before every kernel starts; lets deadlines be exercised.
    pub launch_delay: Duration,
}

impl Default for HostDeviceOptions {
    fn default() -> Self {
        Self {
            name: "memwall host CPU".to_string(),
            max_work_group_size: 1024,
            max_work_item_sizes: vec![1024, 1024, 64],
            local_mem_bytes: 64 * 1024,
            max_alloc_bytes: 1 << 30,
            global_mem_bytes: 4 << 30,
            launch_delay: Duration::ZERO,
        }
    }
}

#[derive(Debug, Clone)]
pub struct HostBuffer {
    data: Arc<Mutex<Vec<f32>>>,
    len: usize,
    access: BufferAccess,
}

impl HostBuffer {
    pub fn zeroed(len: usize, access: BufferAccess) -> Self {
        Self {
            data: Arc::new(Mutex::new(vec![0.0; len])),
            len,
            access,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn access(&self) -> BufferAccess {
        self.access
    }

    pub fn snapshot(&self) -> Result<Vec<f32>> {
        self.with_mut(|data| data.to_vec())
    }

    pub fn with_mut<R>(&self, f: impl FnOnce(&mut [f32]) -> R) -> Result<R> {
        let mut guard = self
            .data
            .lock()
            .map_err(|_| ProbeError::device("lock buffer", "a previous job panicked"))?;
        Ok(f(guard.as_mut_slice()))
    }
}

#[derive(Clone)]
pub struct HostKernel {
    name: String,
    run: HostKernelFn,
}

impl HostKernel {
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl std::fmt::Debug for HostKernel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostKernel").field("name", &self.name).finish()
    }
}

/// A submitted job whose completion has not been observed yet.
#[derive(Debug)]
pub struct HostLaunch {
    name: String,
    done: mpsc::Receiver<Result<DeviceSpan>>,
}

type Job = Box<dyn FnOnce() -> Result<()> + Send>;

struct Command {
    job: Job,
    delay: Duration,
    done: mpsc::Sender<Result<DeviceSpan>>,
}

pub struct HostDevice {
    options: HostDeviceOptions,
    queue: Option<mpsc::Sender<Command>>,
    worker: Option<JoinHandle<()>>,
    launches: AtomicUsize,
}

impl HostDevice {
    pub fn new(options: HostDeviceOptions) -> Result<Self> {
        let selector = DeviceSelector {
            class: DeviceClass::Any,
            ..DeviceSelector::default()
        };
        Self::open(&selector, options)
    }

    /// The host exposes one platform with one CPU-class device.
    pub fn open(selector: &DeviceSelector, options: HostDeviceOptions) -> Result<Self> {
        if selector.platform != 0 {
            return Err(ProbeError::InvalidConfig(format!(
                "platform index {} is out of range (1 platform available)",
                selector.platform
            )));
        }
        if selector.class == DeviceClass::Gpu || selector.index != 0 {
            return Err(ProbeError::NoDeviceFound {
                platform: HOST_PLATFORM.to_string(),
                class: selector.class.to_string(),
            });
        }

        let (sender, receiver) = mpsc::channel::<Command>();
        let epoch = Instant::now();
        let worker = thread::Builder::new()
            .name("memwall-host-queue".to_string())
            .spawn(move || run_queue(epoch, receiver))
            .map_err(|err| ProbeError::device("spawn queue worker", err))?;

        info!(device = %options.name, "opened host device");
        Ok(Self {
            options,
            queue: Some(sender),
            worker: Some(worker),
            launches: AtomicUsize::new(0),
        })
    }

    pub fn options(&self) -> &HostDeviceOptions {
        &self.options
    }

    /// Kernel launches accepted so far.
    pub fn launches(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }

    fn submit(&self, job: Job, delay: Duration) -> Result<mpsc::Receiver<Result<DeviceSpan>>> {
        let (done, receiver) = mpsc::channel();
        let queue = self
            .queue
            .as_ref()
            .ok_or_else(|| ProbeError::device("submit", "queue is shut down"))?;
        queue
            .send(Command { job, delay, done })
            .map_err(|_| ProbeError::device("submit", "queue worker exited"))?;
        Ok(receiver)
    }

    fn check_launch(&self, name: &str, global: &[usize], local: Option<&[usize]>, local_bytes: usize) -> Result<()> {
        let operation = format!("enqueue {name}");
        if global.is_empty() || global.len() > 3 {
            return Err(ProbeError::device(operation, format!("{} dimensions requested", global.len())));
        }
        if let Some(local) = local {
            if local.len() != global.len() {
                return Err(ProbeError::device(operation, "local and global extents differ in rank"));
            }
            let items: usize = local.iter().product();
            if items > self.options.max_work_group_size {
                return Err(ProbeError::resource(format!(
                    "work-group of {items} items exceeds the maximum of {}",
                    self.options.max_work_group_size
                )));
            }
            for (dim, (&l, &g)) in local.iter().zip(global).enumerate() {
                let limit = self.options.max_work_item_sizes.get(dim).copied().unwrap_or(1);
                if l == 0 || l > limit {
                    return Err(ProbeError::resource(format!(
                        "local size {l} in dimension {dim} exceeds the maximum of {limit}"
                    )));
                }
                if g % l != 0 {
                    return Err(ProbeError::device(
                        operation,
                        format!("global size {g} is not a multiple of local size {l} in dimension {dim}"),
                    ));
                }
            }
        }
        if local_bytes as u64 > self.options.local_mem_bytes {
            return Err(ProbeError::resource(format!(
                "local reservation of {local_bytes} B exceeds {} B of local memory",
                self.options.local_mem_bytes
            )));
        }
        Ok(())
    }
}

fn run_queue(epoch: Instant, receiver: mpsc::Receiver<Command>) {
    let now = |epoch: Instant| epoch.elapsed().as_nanos() as u64;
    for command in receiver {
        if !command.delay.is_zero() {
            thread::sleep(command.delay);
        }
        let start = now(epoch);
        let outcome = (command.job)();
        let end = now(epoch);
        let _ = command.done.send(outcome.map(|()| DeviceSpan::device(start, end)));
    }
}

fn await_transfer(receiver: mpsc::Receiver<Result<DeviceSpan>>, operation: &str) -> Result<DeviceSpan> {
    receiver
        .recv()
        .map_err(|_| ProbeError::device(operation, "queue worker exited"))?
}

impl Drop for HostDevice {
    fn drop(&mut self) {
        self.queue.take();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

impl ComputeDevice for HostDevice {
    type Program = HostProgram;
    type Kernel = HostKernel;
    type Buffer = HostBuffer;
    type Launch = HostLaunch;

    fn dialect(&self) -> KernelDialect {
        KernelDialect::OpenClC
    }

    fn query(&self) -> Result<DeviceCapabilities> {
        let options = &self.options;
        Ok(DeviceCapabilities {
            backend: BackendKind::Host,
            platform: HOST_PLATFORM.to_string(),
            name: options.name.clone(),
            vendor: "memwall".to_string(),
            driver_version: env!("CARGO_PKG_VERSION").to_string(),
            device_class: DeviceClass::Cpu,
            max_compute_units: Some(rayon::current_num_threads() as u32),
            max_clock_mhz: None,
            max_work_group_size: options.max_work_group_size,
            max_work_item_dimensions: options.max_work_item_sizes.len() as u32,
            max_work_item_sizes: options.max_work_item_sizes.clone(),
            global_mem_bytes: Some(options.global_mem_bytes),
            global_mem_cache_bytes: None,
            local_mem_bytes: options.local_mem_bytes,
            max_alloc_bytes: options.max_alloc_bytes,
            preferred_vector_width_float: Some(1),
            preferred_vector_width_half: None,
            extensions: Vec::new(),
            supports_fp16: false,
            unified_memory: Some(true),
        })
    }

    fn build(&self, sources: &[&str], options: &str) -> Result<HostProgram> {
        let program = compiler::compile(sources, options)?;
        debug!(
            kernels = ?program.entry_points(),
            options = program.options(),
            "host program built"
        );
        Ok(program)
    }

    fn entry_points(&self, program: &HostProgram) -> Vec<String> {
        program.entry_points().to_vec()
    }

    fn create_kernel(&self, program: &HostProgram, entry_point: &str) -> Result<HostKernel> {
        let not_found = || ProbeError::KernelNotFound {
            name: entry_point.to_string(),
        };
        if !program.declares(entry_point) {
            return Err(not_found());
        }
        let run = kernels::lookup(entry_point).ok_or_else(|| {
            debug!(entry_point, "kernel is declared but has no host implementation");
            not_found()
        })?;
        Ok(HostKernel {
            name: entry_point.to_string(),
            run,
        })
    }

    fn allocate(&self, len: usize, access: BufferAccess) -> Result<HostBuffer> {
        let bytes = (len * std::mem::size_of::<f32>()) as u64;
        if bytes > self.options.max_alloc_bytes {
            return Err(ProbeError::resource(format!(
                "buffer of {bytes} B exceeds the maximum single allocation of {} B",
                self.options.max_alloc_bytes
            )));
        }
        Ok(HostBuffer::zeroed(len, access))
    }

    fn write(&self, buffer: &mut HostBuffer, data: &[f32]) -> Result<DeviceSpan> {
        if data.len() != buffer.len() {
            return Err(ProbeError::resource(format!(
                "write of {} elements into a buffer of {}",
                data.len(),
                buffer.len()
            )));
        }
        let staged = data.to_vec();
        let target = buffer.clone();
        let done = self.submit(
            Box::new(move || target.with_mut(|dst| dst.copy_from_slice(&staged))),
            Duration::ZERO,
        )?;
        await_transfer(done, "write buffer")
    }

    fn read(&self, buffer: &HostBuffer, out: &mut [f32]) -> Result<DeviceSpan> {
        if out.len() != buffer.len() {
            return Err(ProbeError::resource(format!(
                "read of {} elements from a buffer of {}",
                out.len(),
                buffer.len()
            )));
        }
        let (sender, receiver) = mpsc::channel();
        let source = buffer.clone();
        let done = self.submit(
            Box::new(move || {
                let copy = source.snapshot()?;
                let _ = sender.send(copy);
                Ok(())
            }),
            Duration::ZERO,
        )?;
        let span = await_transfer(done, "read buffer")?;
        let copy = receiver
            .recv()
            .map_err(|_| ProbeError::device("read buffer", "no data returned"))?;
        out.copy_from_slice(&copy);
        Ok(span)
    }

    fn enqueue(
        &self,
        kernel: &HostKernel,
        args: &[KernelArg<'_, HostBuffer>],
        global: &[usize],
        local: Option<&[usize]>,
    ) -> Result<HostLaunch> {
        let local_bytes = args.iter().map(KernelArg::local_bytes).sum();
        self.check_launch(&kernel.name, global, local, local_bytes)?;

        let bound: Vec<BoundArg> = args
            .iter()
            .map(|arg| match *arg {
                KernelArg::Buffer(buffer) => BoundArg::Buffer(buffer.clone()),
                KernelArg::Int(value) => BoundArg::Int(value),
                KernelArg::Uint(value) => BoundArg::Uint(value),
                KernelArg::Float(value) => BoundArg::Float(value),
                KernelArg::Local(bytes) => BoundArg::Local(bytes),
            })
            .collect();
        let name = kernel.name.clone();
        let run = kernel.run;
        let global = global.to_vec();
        let local = local.map(<[usize]>::to_vec);
        debug!(kernel = %name, ?global, ?local, "enqueue");

        let job_name = name.clone();
        let done = self.submit(
            Box::new(move || {
                run(&LaunchContext {
                    name: &job_name,
                    args: &bound,
                    global: &global,
                    local: local.as_deref(),
                })
            }),
            self.options.launch_delay,
        )?;
        self.launches.fetch_add(1, Ordering::SeqCst);
        Ok(HostLaunch { name, done })
    }

    fn wait(&self, launch: HostLaunch, timeout: Duration) -> Result<DeviceSpan> {
        match launch.done.recv_timeout(timeout) {
            Ok(outcome) => outcome,
            Err(RecvTimeoutError::Timeout) => Err(ProbeError::Timeout {
                operation: format!("kernel {}", launch.name),
                after: timeout,
            }),
            Err(RecvTimeoutError::Disconnected) => {
                Err(ProbeError::device(format!("wait {}", launch.name), "queue worker exited"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use memwall_device::ErrorKind;
    use memwall_kernels::KernelSourceRepository;

    fn device() -> HostDevice {
        HostDevice::new(HostDeviceOptions::default()).unwrap()
    }

    fn vec_add_kernel(device: &HostDevice) -> HostKernel {
        let source = KernelSourceRepository::Embedded.load_text("vec_add.cl").unwrap();
        let program = device.build(&[&source], "").unwrap();
        device.create_kernel(&program, "vec_add").unwrap()
    }

    #[test]
    fn gpu_selection_finds_no_host_device() {
        let err = HostDevice::open(&DeviceSelector::default(), HostDeviceOptions::default())
            .err()
            .unwrap();
        assert!(matches!(err, ProbeError::NoDeviceFound { .. }));
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }

    #[test]
    fn query_is_idempotent() {
        let device = device();
        assert_eq!(device.query().unwrap(), device.query().unwrap());
    }

    #[test]
    fn vector_addition_round_trip() {
        let device = device();
        let kernel = vec_add_kernel(&device);
        let n = 256;
        let mut a = device.allocate(n, BufferAccess::ReadOnly).unwrap();
        let mut b = device.allocate(n, BufferAccess::ReadOnly).unwrap();
        let c = device.allocate(n, BufferAccess::WriteOnly).unwrap();
        device.write(&mut a, &vec![1.0; n]).unwrap();
        device.write(&mut b, &vec![2.0; n]).unwrap();

        let launch = device
            .enqueue(
                &kernel,
                &[KernelArg::Buffer(&a), KernelArg::Buffer(&b), KernelArg::Buffer(&c), KernelArg::Int(n as i32)],
                &[n],
                Some(&[64]),
            )
            .unwrap();
        let span = device.wait(launch, Duration::from_secs(5)).unwrap();
        assert!(span.end_ns >= span.start_ns);

        let mut out = vec![0.0; n];
        device.read(&c, &mut out).unwrap();
        assert!(out.iter().all(|&v| v == 3.0));
        assert_eq!(device.launches(), 1);
    }

    #[test]
    fn oversized_local_reservation_is_rejected_before_submission() {
        let device = HostDevice::new(HostDeviceOptions {
            local_mem_bytes: 512,
            ..HostDeviceOptions::default()
        })
        .unwrap();
        let source = KernelSourceRepository::Embedded.load_text("sum_reduce.cl").unwrap();
        let program = device.build(&[&source], "").unwrap();
        let kernel = device.create_kernel(&program, "sum_reduce").unwrap();
        let input = device.allocate(1024, BufferAccess::ReadOnly).unwrap();
        let output = device.allocate(4, BufferAccess::WriteOnly).unwrap();

        let err = device
            .enqueue(
                &kernel,
                &[KernelArg::Buffer(&input), KernelArg::Buffer(&output), KernelArg::Local(1024)],
                &[1024],
                Some(&[256]),
            )
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Resource);
        assert_eq!(device.launches(), 0);
    }

    #[test]
    fn stalled_launch_times_out() {
        let device = HostDevice::new(HostDeviceOptions {
            launch_delay: Duration::from_millis(300),
            ..HostDeviceOptions::default()
        })
        .unwrap();
        let kernel = vec_add_kernel(&device);
        let n = 64;
        let a = device.allocate(n, BufferAccess::ReadOnly).unwrap();
        let b = device.allocate(n, BufferAccess::ReadOnly).unwrap();
        let c = device.allocate(n, BufferAccess::WriteOnly).unwrap();
        let launch = device
            .enqueue(
                &kernel,
                &[KernelArg::Buffer(&a), KernelArg::Buffer(&b), KernelArg::Buffer(&c), KernelArg::Int(n as i32)],
                &[n],
                Some(&[64]),
            )
            .unwrap();
        let err = device.wait(launch, Duration::from_millis(10)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Timeout);
    }

    #[test]
    fn oversized_allocation_is_a_resource_error() {
        let device = HostDevice::new(HostDeviceOptions {
            max_alloc_bytes: 1024,
            ..HostDeviceOptions::default()
        })
        .unwrap();
        assert!(device.allocate(256, BufferAccess::ReadWrite).is_ok());
        let err = device.allocate(257, BufferAccess::ReadWrite).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Resource);
    }

    #[test]
    fn undeclared_entry_point_is_not_found() {
        let device = device();
        let program = device.build(&["__kernel void custom(int n) {}"], "").unwrap();
        let err = device.create_kernel(&program, "vec_add").unwrap_err();
        assert!(matches!(err, ProbeError::KernelNotFound { .. }));
        let err = device.create_kernel(&program, "custom").unwrap_err();
        assert!(matches!(err, ProbeError::KernelNotFound { .. }));
    }
}
