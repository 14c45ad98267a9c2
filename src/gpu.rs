use std::sync::mpsc;

use crate::error::{GifcapError, GifcapResult};

/// Shared GPU execution context. All pipeline components issue work against
/// the same device/queue pair and rely on the queue's command ordering; the
/// only explicit synchronization is the blocking buffer map in
/// [`GpuContext::read_buffer`].
pub struct GpuContext {
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
}

impl GpuContext {
    pub fn new() -> GifcapResult<Self> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor::default());
        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: None,
            force_fallback_adapter: false,
        }))
        .map_err(|e| match e {
            wgpu::RequestAdapterError::NotFound { .. } => {
                GifcapError::gpu("no gpu adapter available")
            }
            other => GifcapError::gpu(format!("wgpu request_adapter failed: {other:?}")),
        })?;

        let (device, queue) = pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
            label: None,
            required_features: wgpu::Features::empty(),
            required_limits: wgpu::Limits::default(),
            experimental_features: wgpu::ExperimentalFeatures::default(),
            memory_hints: wgpu::MemoryHints::Performance,
            trace: wgpu::Trace::Off,
        }))
        .map_err(|e| GifcapError::gpu(format!("wgpu request_device failed: {e:?}")))?;

        Ok(Self { device, queue })
    }

    /// Blocking host readback of the first `len` bytes of a MAP_READ buffer.
    /// Returns only after the GPU has completed all work submitted before
    /// the call. `len` must be a multiple of 4.
    pub fn read_buffer(&self, buffer: &wgpu::Buffer, len: u64) -> GifcapResult<Vec<u8>> {
        let slice = buffer.slice(0..len);
        let (tx, rx) = mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |res| {
            let _ = tx.send(res);
        });
        self.device
            .poll(wgpu::PollType::wait_indefinitely())
            .map_err(|e| GifcapError::gpu(format!("wgpu poll failed: {e:?}")))?;
        rx.recv()
            .map_err(|_| GifcapError::gpu("readback channel closed"))?
            .map_err(|e| GifcapError::gpu(format!("readback map failed: {e:?}")))?;

        let data = slice.get_mapped_range().to_vec();
        buffer.unmap();
        Ok(data)
    }
}

pub(crate) fn align_to(value: u32, alignment: u32) -> u32 {
    let mask = alignment - 1;
    (value + mask) & !mask
}
