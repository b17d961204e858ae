//! OpenCL device behind an in-order, profiling-enabled command queue.

use crate::info::{clean, has_fp16, split_extensions, split_kernel_names};
use memwall_device::{
    BackendKind, BufferAccess, ComputeDevice, DeviceCapabilities, DeviceClass, DeviceSelector,
    DeviceSpan, KernelArg, KernelDialect, ProbeError, Result,
};
use opencl3::command_queue::{CommandQueue, CL_QUEUE_PROFILING_ENABLE};
use opencl3::context::Context;
use opencl3::device::{Device, CL_DEVICE_TYPE_ALL, CL_DEVICE_TYPE_CPU, CL_DEVICE_TYPE_GPU};
use opencl3::event::Event;
use opencl3::kernel::{ExecuteKernel, Kernel};
use opencl3::memory::{Buffer, CL_MEM_READ_ONLY, CL_MEM_READ_WRITE, CL_MEM_WRITE_ONLY};
use opencl3::platform::get_platforms;
use opencl3::program::Program;
use opencl3::types::{cl_device_type, cl_float, cl_int, cl_uint, CL_BLOCKING};
use std::ptr;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

const CL_COMPLETE: cl_int = 0;
const POLL_INTERVAL: Duration = Duration::from_micros(100);

pub struct OpenClProgram {
    program: Program,
    entry_points: Vec<String>,
}

pub struct OpenClKernel {
    name: String,
    kernel: Kernel,
}

pub struct OpenClBuffer {
    buffer: Buffer<cl_float>,
    len: usize,
    access: BufferAccess,
}

impl OpenClBuffer {
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

pub struct OpenClLaunch {
    name: String,
    event: Event,
}

pub struct OpenClDevice {
    platform: String,
    device: Device,
    context: Context,
    queue: CommandQueue,
}

fn device_type(class: DeviceClass) -> cl_device_type {
    match class {
        DeviceClass::Gpu => CL_DEVICE_TYPE_GPU,
        DeviceClass::Cpu => CL_DEVICE_TYPE_CPU,
        DeviceClass::Any => CL_DEVICE_TYPE_ALL,
    }
}

fn class_of(kind: cl_device_type) -> DeviceClass {
    if kind & CL_DEVICE_TYPE_GPU != 0 {
        DeviceClass::Gpu
    } else if kind & CL_DEVICE_TYPE_CPU != 0 {
        DeviceClass::Cpu
    } else {
        DeviceClass::Any
    }
}

fn cl_err(operation: &str) -> impl Fn(opencl3::error_codes::ClError) -> ProbeError + '_ {
    move |err| ProbeError::device(operation, err)
}

impl OpenClDevice {
    pub fn open(selector: &DeviceSelector) -> Result<Self> {
        let platforms = get_platforms().map_err(|_| ProbeError::NoPlatformFound)?;
        if platforms.is_empty() {
            return Err(ProbeError::NoPlatformFound);
        }
        let platform = platforms.get(selector.platform).ok_or_else(|| {
            ProbeError::InvalidConfig(format!(
                "platform index {} out of range ({} available)",
                selector.platform,
                platforms.len()
            ))
        })?;
        let platform_name = clean(&platform.name().unwrap_or_default());

        let not_found = || ProbeError::NoDeviceFound {
            platform: platform_name.clone(),
            class: selector.class.to_string(),
        };
        // CL_DEVICE_NOT_FOUND surfaces as an error rather than an empty list.
        let ids = platform
            .get_devices(device_type(selector.class))
            .map_err(|_| not_found())?;
        let id = *ids.get(selector.index).ok_or_else(not_found)?;
        let device = Device::new(id);

        let context = Context::from_device(&device).map_err(cl_err("clCreateContext"))?;
        #[allow(deprecated)]
        let queue = CommandQueue::create_default(&context, CL_QUEUE_PROFILING_ENABLE)
            .map_err(cl_err("clCreateCommandQueue"))?;

        info!(
            platform = %platform_name,
            device = %clean(&device.name().unwrap_or_default()),
            "OpenCL device opened"
        );
        Ok(Self {
            platform: platform_name,
            device,
            context,
            queue,
        })
    }

    fn max_alloc_bytes(&self) -> Result<u64> {
        self.device
            .max_mem_alloc_size()
            .map_err(cl_err("CL_DEVICE_MAX_MEM_ALLOC_SIZE"))
    }
}

fn event_span(event: &Event, operation: &str) -> Result<DeviceSpan> {
    let start = event
        .profiling_command_start()
        .map_err(cl_err(operation))?;
    let end = event.profiling_command_end().map_err(cl_err(operation))?;
    Ok(DeviceSpan::device(start, end))
}

impl ComputeDevice for OpenClDevice {
    type Program = OpenClProgram;
    type Kernel = OpenClKernel;
    type Buffer = OpenClBuffer;
    type Launch = OpenClLaunch;

    fn dialect(&self) -> KernelDialect {
        KernelDialect::OpenClC
    }

    fn query(&self) -> Result<DeviceCapabilities> {
        let device = &self.device;
        let extensions = split_extensions(&device.extensions().map_err(cl_err("CL_DEVICE_EXTENSIONS"))?);
        let unified_memory = match device.host_unified_memory() {
            Ok(unified) => Some(unified),
            Err(err) => {
                warn!(%err, "driver rejected CL_DEVICE_HOST_UNIFIED_MEMORY");
                None
            }
        };

        Ok(DeviceCapabilities {
            backend: BackendKind::OpenCl,
            platform: self.platform.clone(),
            name: clean(&device.name().map_err(cl_err("CL_DEVICE_NAME"))?),
            vendor: clean(&device.vendor().unwrap_or_default()),
            driver_version: clean(&device.driver_version().unwrap_or_default()),
            device_class: class_of(device.dev_type().map_err(cl_err("CL_DEVICE_TYPE"))?),
            max_compute_units: device.max_compute_units().ok(),
            max_clock_mhz: device.max_clock_frequency().ok(),
            max_work_group_size: device
                .max_work_group_size()
                .map_err(cl_err("CL_DEVICE_MAX_WORK_GROUP_SIZE"))?,
            max_work_item_dimensions: device
                .max_work_item_dimensions()
                .map_err(cl_err("CL_DEVICE_MAX_WORK_ITEM_DIMENSIONS"))?,
            max_work_item_sizes: device
                .max_work_item_sizes()
                .map_err(cl_err("CL_DEVICE_MAX_WORK_ITEM_SIZES"))?,
            global_mem_bytes: device.global_mem_size().ok(),
            global_mem_cache_bytes: device.global_mem_cache_size().ok(),
            local_mem_bytes: device.local_mem_size().map_err(cl_err("CL_DEVICE_LOCAL_MEM_SIZE"))?,
            max_alloc_bytes: self.max_alloc_bytes()?,
            preferred_vector_width_float: device.preferred_vector_width_float().ok(),
            preferred_vector_width_half: device.preferred_vector_width_half().ok(),
            supports_fp16: has_fp16(&extensions),
            extensions,
            unified_memory,
        })
    }

    fn build(&self, sources: &[&str], options: &str) -> Result<OpenClProgram> {
        let program = Program::create_and_build_from_sources(&self.context, sources, options)
            .map_err(|log| ProbeError::Build { log })?;
        let names = program.kernel_names().map_err(cl_err("CL_PROGRAM_KERNEL_NAMES"))?;
        let entry_points = split_kernel_names(&names);
        debug!(entry_points = ?entry_points, options, "OpenCL program built");
        Ok(OpenClProgram { program, entry_points })
    }

    fn entry_points(&self, program: &OpenClProgram) -> Vec<String> {
        program.entry_points.clone()
    }

    fn create_kernel(&self, program: &OpenClProgram, entry_point: &str) -> Result<OpenClKernel> {
        if !program.entry_points.iter().any(|name| name == entry_point) {
            return Err(ProbeError::KernelNotFound {
                name: entry_point.to_string(),
            });
        }
        let kernel = Kernel::create(&program.program, entry_point).map_err(|_| ProbeError::KernelNotFound {
            name: entry_point.to_string(),
        })?;
        Ok(OpenClKernel {
            name: entry_point.to_string(),
            kernel,
        })
    }

    fn allocate(&self, len: usize, access: BufferAccess) -> Result<OpenClBuffer> {
        let bytes = (len * std::mem::size_of::<cl_float>()) as u64;
        let limit = self.max_alloc_bytes()?;
        if bytes > limit {
            return Err(ProbeError::resource(format!(
                "buffer of {bytes} B exceeds the maximum allocation of {limit} B"
            )));
        }
        let flags = match access {
            BufferAccess::ReadOnly => CL_MEM_READ_ONLY,
            BufferAccess::WriteOnly => CL_MEM_WRITE_ONLY,
            BufferAccess::ReadWrite => CL_MEM_READ_WRITE,
        };
        let buffer = unsafe { Buffer::<cl_float>::create(&self.context, flags, len.max(1), ptr::null_mut()) }
            .map_err(|err| ProbeError::resource(format!("clCreateBuffer of {bytes} B: {err}")))?;
        Ok(OpenClBuffer { buffer, len, access })
    }

    fn write(&self, buffer: &mut OpenClBuffer, data: &[f32]) -> Result<DeviceSpan> {
        let event = unsafe {
            self.queue
                .enqueue_write_buffer(&mut buffer.buffer, CL_BLOCKING, 0, data, &[])
        }
        .map_err(cl_err("clEnqueueWriteBuffer"))?;
        event.wait().map_err(cl_err("clEnqueueWriteBuffer"))?;
        event_span(&event, "clEnqueueWriteBuffer")
    }

    fn read(&self, buffer: &OpenClBuffer, out: &mut [f32]) -> Result<DeviceSpan> {
        let event = unsafe {
            self.queue
                .enqueue_read_buffer(&buffer.buffer, CL_BLOCKING, 0, out, &[])
        }
        .map_err(cl_err("clEnqueueReadBuffer"))?;
        event.wait().map_err(cl_err("clEnqueueReadBuffer"))?;
        event_span(&event, "clEnqueueReadBuffer")
    }

    fn enqueue(
        &self,
        kernel: &OpenClKernel,
        args: &[KernelArg<'_, OpenClBuffer>],
        global: &[usize],
        local: Option<&[usize]>,
    ) -> Result<OpenClLaunch> {
        let operation = format!("enqueue {}", kernel.name);
        let mut exec = ExecuteKernel::new(&kernel.kernel);
        for arg in args {
            unsafe {
                match *arg {
                    KernelArg::Buffer(buffer) => exec.set_arg(&buffer.buffer),
                    KernelArg::Int(value) => exec.set_arg(&(value as cl_int)),
                    KernelArg::Uint(value) => exec.set_arg(&(value as cl_uint)),
                    KernelArg::Float(value) => exec.set_arg(&(value as cl_float)),
                    KernelArg::Local(bytes) => exec.set_arg_local_buffer(bytes),
                };
            }
        }
        exec.set_global_work_sizes(global);
        if let Some(local) = local {
            exec.set_local_work_sizes(local);
        }
        let event = unsafe { exec.enqueue_nd_range(&self.queue) }.map_err(|err| {
            // CL_INVALID_WORK_GROUP_SIZE and CL_OUT_OF_RESOURCES are limit
            // violations rather than driver faults.
            let text = err.to_string();
            if text.contains("WORK_GROUP_SIZE") || text.contains("OUT_OF_RESOURCES") || text.contains("WORK_ITEM_SIZE") {
                ProbeError::resource(format!("{operation}: {text}"))
            } else {
                ProbeError::device(operation.as_str(), text)
            }
        })?;
        self.queue.flush().map_err(cl_err("clFlush"))?;
        Ok(OpenClLaunch {
            name: kernel.name.clone(),
            event,
        })
    }

    fn wait(&self, launch: OpenClLaunch, timeout: Duration) -> Result<DeviceSpan> {
        let operation = format!("wait {}", launch.name);
        let deadline = Instant::now() + timeout;
        loop {
            let status = launch
                .event
                .command_execution_status()
                .map_err(cl_err(&operation))?;
            if status.0 == CL_COMPLETE {
                break;
            }
            if status.0 < 0 {
                return Err(ProbeError::device(operation, format!("command aborted with status {}", status.0)));
            }
            if Instant::now() >= deadline {
                return Err(ProbeError::Timeout {
                    operation: launch.name,
                    after: timeout,
                });
            }
            std::thread::sleep(POLL_INTERVAL);
        }
        event_span(&launch.event, &operation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_type_bits_map_to_classes() {
        assert_eq!(class_of(CL_DEVICE_TYPE_GPU), DeviceClass::Gpu);
        assert_eq!(class_of(CL_DEVICE_TYPE_CPU), DeviceClass::Cpu);
        assert_eq!(device_type(DeviceClass::Any), CL_DEVICE_TYPE_ALL);
    }
}
