//! wgpu device: Vulkan, Metal and DX12 adapters behind one queue.
//!
//! Kernel spans come from timestamp queries written at the start and end of
//! the compute pass, so an adapter without `TIMESTAMP_QUERY` is refused.
//! Transfers are timed on the host because wgpu exposes no per-copy
//! timestamps.

use crate::planner::{pack_scalars, plan_dispatch, DispatchLimits};
use crate::shader;
use bytemuck::cast_slice;
use memwall_device::{
    BackendKind, BufferAccess, ComputeDevice, DeviceCapabilities, DeviceClass, DeviceSelector,
    DeviceSpan, KernelArg, KernelDialect, ProbeError, Result,
};
use pollster::block_on;
use std::sync::mpsc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};
use wgpu::util::DeviceExt;

const TIMESTAMP_BYTES: u64 = 2 * std::mem::size_of::<u64>() as u64;
const POLL_INTERVAL: Duration = Duration::from_micros(50);

pub struct WgpuProgram {
    module: wgpu::ShaderModule,
    entry_points: Vec<String>,
}

pub struct WgpuKernel {
    name: String,
    pipeline: wgpu::ComputePipeline,
    layout: wgpu::BindGroupLayout,
}

impl WgpuKernel {
    pub fn name(&self) -> &str {
        &self.name
    }
}

pub struct WgpuBuffer {
    buffer: wgpu::Buffer,
    len: usize,
    access: BufferAccess,
}

impl WgpuBuffer {
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn access(&self) -> BufferAccess {
        self.access
    }
}

/// A submitted compute pass whose timestamps are being mapped back.
pub struct WgpuLaunch {
    name: String,
    staging: wgpu::Buffer,
    mapped: mpsc::Receiver<std::result::Result<(), wgpu::BufferAsyncError>>,
}

pub struct WgpuDevice {
    platform: String,
    info: wgpu::AdapterInfo,
    features: wgpu::Features,
    limits: wgpu::Limits,
    device: wgpu::Device,
    queue: wgpu::Queue,
    timestamp_period: f32,
    epoch: Instant,
}

impl WgpuDevice {
    /// Platforms are the distinct wgpu backends, in enumeration order.
    pub fn open(selector: &DeviceSelector) -> Result<Self> {
        let instance = wgpu::Instance::default();
        let adapters = instance.enumerate_adapters(wgpu::Backends::all());
        if adapters.is_empty() {
            return Err(ProbeError::NoPlatformFound);
        }

        let mut platforms: Vec<wgpu::Backend> = Vec::new();
        for adapter in &adapters {
            let backend = adapter.get_info().backend;
            if !platforms.contains(&backend) {
                platforms.push(backend);
            }
        }
        let backend = *platforms.get(selector.platform).ok_or_else(|| {
            ProbeError::InvalidConfig(format!(
                "platform index {} out of range ({} available)",
                selector.platform,
                platforms.len()
            ))
        })?;
        let platform = format!("{backend:?}");

        let adapter = adapters
            .into_iter()
            .filter(|adapter| {
                let info = adapter.get_info();
                info.backend == backend && class_matches(selector.class, info.device_type)
            })
            .nth(selector.index)
            .ok_or_else(|| ProbeError::NoDeviceFound {
                platform: platform.clone(),
                class: selector.class.to_string(),
            })?;

        let info = adapter.get_info();
        let features = adapter.features();
        if !features.contains(wgpu::Features::TIMESTAMP_QUERY) {
            return Err(ProbeError::InvalidConfig(format!(
                "adapter '{}' does not support timestamp queries",
                info.name
            )));
        }
        let limits = adapter.limits();

        let (device, queue) = block_on(adapter.request_device(
            &wgpu::DeviceDescriptor {
                label: Some("memwall device"),
                required_features: wgpu::Features::TIMESTAMP_QUERY,
                required_limits: limits.clone(),
            },
            None,
        ))
        .map_err(|err| ProbeError::device("request_device", err))?;

        device.on_uncaptured_error(Box::new(|err| {
            error!(%err, "uncaptured wgpu error");
        }));
        let timestamp_period = queue.get_timestamp_period();

        info!(
            platform = %platform,
            device = %info.name,
            kind = ?info.device_type,
            timestamp_period,
            "wgpu device opened"
        );

        Ok(Self {
            platform,
            info,
            features,
            limits,
            device,
            queue,
            timestamp_period,
            epoch: Instant::now(),
        })
    }

    fn limits(&self) -> DispatchLimits {
        DispatchLimits::from_wgpu(&self.limits)
    }

    fn max_alloc_bytes(&self) -> u64 {
        self.limits
            .max_buffer_size
            .min(self.limits.max_storage_buffer_binding_size as u64)
    }

    fn host_ns(&self, at: Instant) -> u64 {
        at.duration_since(self.epoch).as_nanos() as u64
    }

    fn host_span(&self, started: Instant) -> DeviceSpan {
        DeviceSpan::host(self.host_ns(started), self.host_ns(Instant::now()))
    }

    /// Run `f` inside a validation error scope.
    fn scoped<T>(&self, f: impl FnOnce() -> T) -> (T, Option<wgpu::Error>) {
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let value = f();
        let err = block_on(self.device.pop_error_scope());
        (value, err)
    }

    /// Map `staging` for reading and block until the copy behind it lands.
    fn map_blocking(&self, staging: &wgpu::Buffer, operation: &str) -> Result<()> {
        let (sender, receiver) = mpsc::channel();
        staging.slice(..).map_async(wgpu::MapMode::Read, move |res| {
            let _ = sender.send(res);
        });
        self.device.poll(wgpu::Maintain::Wait);
        receiver
            .recv()
            .map_err(|_| ProbeError::device(operation, "map callback dropped"))?
            .map_err(|err| ProbeError::device(operation, err))
    }
}

fn class_matches(class: DeviceClass, kind: wgpu::DeviceType) -> bool {
    match class {
        DeviceClass::Any => true,
        DeviceClass::Cpu => kind == wgpu::DeviceType::Cpu,
        DeviceClass::Gpu => matches!(
            kind,
            wgpu::DeviceType::IntegratedGpu | wgpu::DeviceType::DiscreteGpu | wgpu::DeviceType::VirtualGpu
        ),
    }
}

fn device_class(kind: wgpu::DeviceType) -> DeviceClass {
    match kind {
        wgpu::DeviceType::Cpu => DeviceClass::Cpu,
        wgpu::DeviceType::Other => DeviceClass::Any,
        _ => DeviceClass::Gpu,
    }
}

fn byte_len(len: usize) -> u64 {
    (len.max(1) * std::mem::size_of::<f32>()) as u64
}

impl ComputeDevice for WgpuDevice {
    type Program = WgpuProgram;
    type Kernel = WgpuKernel;
    type Buffer = WgpuBuffer;
    type Launch = WgpuLaunch;

    fn dialect(&self) -> KernelDialect {
        KernelDialect::Wgsl
    }

    fn query(&self) -> Result<DeviceCapabilities> {
        let unified_memory = match self.info.device_type {
            wgpu::DeviceType::IntegratedGpu | wgpu::DeviceType::Cpu => Some(true),
            wgpu::DeviceType::DiscreteGpu => Some(false),
            other => {
                warn!(kind = ?other, "adapter does not reveal whether memory is unified");
                None
            }
        };
        let driver_version = format!("{} {}", self.info.driver, self.info.driver_info)
            .trim()
            .to_string();
        let limits = self.limits();

        Ok(DeviceCapabilities {
            backend: BackendKind::Wgpu,
            platform: self.platform.clone(),
            name: self.info.name.clone(),
            vendor: format!("0x{:04x}", self.info.vendor),
            driver_version,
            device_class: device_class(self.info.device_type),
            max_compute_units: None,
            max_clock_mhz: None,
            max_work_group_size: limits.max_invocations,
            max_work_item_dimensions: 3,
            max_work_item_sizes: limits.max_size.to_vec(),
            global_mem_bytes: None,
            global_mem_cache_bytes: None,
            local_mem_bytes: limits.max_workgroup_storage as u64,
            max_alloc_bytes: self.max_alloc_bytes(),
            preferred_vector_width_float: None,
            preferred_vector_width_half: None,
            extensions: self
                .features
                .iter_names()
                .map(|(name, _)| name.to_string())
                .collect(),
            supports_fp16: self.features.contains(wgpu::Features::SHADER_F16),
            unified_memory,
        })
    }

    fn build(&self, sources: &[&str], options: &str) -> Result<WgpuProgram> {
        let text = shader::assemble(sources, options);
        let entry_points = shader::compute_entry_points(&text);
        let (module, err) = self.scoped(|| {
            self.device.create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some("memwall program"),
                source: wgpu::ShaderSource::Wgsl(text.as_str().into()),
            })
        });
        if let Some(err) = err {
            return Err(ProbeError::Build { log: err.to_string() });
        }
        debug!(entry_points = ?entry_points, "WGSL module built");
        Ok(WgpuProgram { module, entry_points })
    }

    fn entry_points(&self, program: &WgpuProgram) -> Vec<String> {
        program.entry_points.clone()
    }

    fn create_kernel(&self, program: &WgpuProgram, entry_point: &str) -> Result<WgpuKernel> {
        if !program.entry_points.iter().any(|name| name == entry_point) {
            return Err(ProbeError::KernelNotFound {
                name: entry_point.to_string(),
            });
        }
        let (pipeline, err) = self.scoped(|| {
            self.device
                .create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                    label: Some(entry_point),
                    layout: None,
                    module: &program.module,
                    entry_point,
                })
        });
        if let Some(err) = err {
            return Err(ProbeError::Build { log: err.to_string() });
        }
        let layout = pipeline.get_bind_group_layout(0);
        Ok(WgpuKernel {
            name: entry_point.to_string(),
            pipeline,
            layout,
        })
    }

    fn allocate(&self, len: usize, access: BufferAccess) -> Result<WgpuBuffer> {
        let bytes = byte_len(len);
        if bytes > self.max_alloc_bytes() {
            return Err(ProbeError::resource(format!(
                "buffer of {bytes} B exceeds the maximum allocation of {} B",
                self.max_alloc_bytes()
            )));
        }
        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: None,
            size: bytes,
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });
        Ok(WgpuBuffer { buffer, len, access })
    }

    fn write(&self, buffer: &mut WgpuBuffer, data: &[f32]) -> Result<DeviceSpan> {
        if data.len() > buffer.len {
            return Err(ProbeError::resource(format!(
                "write of {} elements into a buffer of {}",
                data.len(),
                buffer.len
            )));
        }
        let started = Instant::now();
        self.queue.write_buffer(&buffer.buffer, 0, cast_slice(data));
        self.queue.submit(std::iter::empty());
        self.device.poll(wgpu::Maintain::Wait);
        Ok(self.host_span(started))
    }

    fn read(&self, buffer: &WgpuBuffer, out: &mut [f32]) -> Result<DeviceSpan> {
        if out.len() > buffer.len {
            return Err(ProbeError::resource(format!(
                "read of {} elements from a buffer of {}",
                out.len(),
                buffer.len
            )));
        }
        let started = Instant::now();
        let bytes = byte_len(out.len());
        let staging = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("read staging"),
            size: bytes,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some("read") });
        encoder.copy_buffer_to_buffer(&buffer.buffer, 0, &staging, 0, bytes);
        self.queue.submit(Some(encoder.finish()));
        self.map_blocking(&staging, "read buffer")?;

        {
            let data = staging.slice(..).get_mapped_range();
            let values: &[f32] = cast_slice(&data);
            out.copy_from_slice(&values[..out.len()]);
        }
        staging.unmap();
        Ok(self.host_span(started))
    }

    fn enqueue(
        &self,
        kernel: &WgpuKernel,
        args: &[KernelArg<'_, WgpuBuffer>],
        global: &[usize],
        local: Option<&[usize]>,
    ) -> Result<WgpuLaunch> {
        let local_bytes: usize = args.iter().map(KernelArg::local_bytes).sum();
        let plan = plan_dispatch(&kernel.name, global, local, local_bytes, &self.limits())?;
        if plan.folded {
            debug!(kernel = %kernel.name, groups = ?plan.groups, "folded linear dispatch");
        }

        let params = pack_scalars(args);
        let params_buffer = (!params.is_empty()).then(|| {
            self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("params"),
                contents: cast_slice(&params),
                usage: wgpu::BufferUsages::UNIFORM,
            })
        });

        let mut entries: Vec<wgpu::BindGroupEntry<'_>> = args
            .iter()
            .filter_map(|arg| match arg {
                KernelArg::Buffer(buffer) => Some(buffer.buffer.as_entire_binding()),
                _ => None,
            })
            .enumerate()
            .map(|(binding, resource)| wgpu::BindGroupEntry {
                binding: binding as u32,
                resource,
            })
            .collect();
        if let Some(params_buffer) = &params_buffer {
            entries.push(wgpu::BindGroupEntry {
                binding: entries.len() as u32,
                resource: params_buffer.as_entire_binding(),
            });
        }

        let query_set = self.device.create_query_set(&wgpu::QuerySetDescriptor {
            label: Some("kernel timestamps"),
            ty: wgpu::QueryType::Timestamp,
            count: 2,
        });
        let resolve = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("timestamp resolve"),
            size: TIMESTAMP_BYTES,
            usage: wgpu::BufferUsages::QUERY_RESOLVE | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });
        let staging = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("timestamp staging"),
            size: TIMESTAMP_BYTES,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let ((), err) = self.scoped(|| {
            let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some(kernel.name.as_str()),
                layout: &kernel.layout,
                entries: &entries,
            });
            let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some(kernel.name.as_str()),
            });
            {
                let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                    label: Some(kernel.name.as_str()),
                    timestamp_writes: Some(wgpu::ComputePassTimestampWrites {
                        query_set: &query_set,
                        beginning_of_pass_write_index: Some(0),
                        end_of_pass_write_index: Some(1),
                    }),
                });
                pass.set_pipeline(&kernel.pipeline);
                pass.set_bind_group(0, &bind_group, &[]);
                pass.dispatch_workgroups(plan.groups[0], plan.groups[1], plan.groups[2]);
            }
            encoder.resolve_query_set(&query_set, 0..2, &resolve, 0);
            encoder.copy_buffer_to_buffer(&resolve, 0, &staging, 0, TIMESTAMP_BYTES);
            self.queue.submit(Some(encoder.finish()));
        });
        if let Some(err) = err {
            return Err(ProbeError::device(format!("enqueue {}", kernel.name), err));
        }

        let (sender, mapped) = mpsc::channel();
        staging.slice(..).map_async(wgpu::MapMode::Read, move |res| {
            let _ = sender.send(res);
        });
        Ok(WgpuLaunch {
            name: kernel.name.clone(),
            staging,
            mapped,
        })
    }

    fn wait(&self, launch: WgpuLaunch, timeout: Duration) -> Result<DeviceSpan> {
        let deadline = Instant::now() + timeout;
        let mapped = loop {
            self.device.poll(wgpu::Maintain::Poll);
            match launch.mapped.try_recv() {
                Ok(result) => break result,
                Err(mpsc::TryRecvError::Empty) if Instant::now() < deadline => {
                    std::thread::sleep(POLL_INTERVAL);
                }
                Err(mpsc::TryRecvError::Empty) => {
                    return Err(ProbeError::Timeout {
                        operation: launch.name,
                        after: timeout,
                    });
                }
                Err(mpsc::TryRecvError::Disconnected) => {
                    return Err(ProbeError::device(format!("wait {}", launch.name), "map callback dropped"));
                }
            }
        };
        mapped.map_err(|err| ProbeError::device(format!("wait {}", launch.name), err))?;

        let (start, end) = {
            let data = launch.staging.slice(..).get_mapped_range();
            let ticks: &[u64] = cast_slice(&data);
            (ticks[0], ticks[1])
        };
        launch.staging.unmap();

        let period = self.timestamp_period as f64;
        Ok(DeviceSpan::device(
            (start as f64 * period) as u64,
            (end as f64 * period) as u64,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gpu_class_accepts_every_gpu_kind() {
        assert!(class_matches(DeviceClass::Gpu, wgpu::DeviceType::DiscreteGpu));
        assert!(class_matches(DeviceClass::Gpu, wgpu::DeviceType::IntegratedGpu));
        assert!(!class_matches(DeviceClass::Gpu, wgpu::DeviceType::Cpu));
        assert!(class_matches(DeviceClass::Any, wgpu::DeviceType::Other));
        assert!(class_matches(DeviceClass::Cpu, wgpu::DeviceType::Cpu));
    }

    #[test]
    fn buffers_are_never_zero_sized() {
        assert_eq!(byte_len(0), 4);
        assert_eq!(byte_len(1024), 4096);
    }

    #[test]
    fn adapter_kinds_map_to_device_classes() {
        assert_eq!(device_class(wgpu::DeviceType::VirtualGpu), DeviceClass::Gpu);
        assert_eq!(device_class(wgpu::DeviceType::Cpu), DeviceClass::Cpu);
        assert_eq!(device_class(wgpu::DeviceType::Other), DeviceClass::Any);
    }
}
