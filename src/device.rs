use crate::error::{Error, Result};

/// Handle to the GPU device and its submission queue. All buffer
/// creation, host writes, device copies, and readbacks go through here.
pub struct GpuDevice {
    device: wgpu::Device,
    queue: wgpu::Queue,
}

impl GpuDevice {
    /// Acquire an adapter and device. Fails with a device error when the
    /// host has no usable GPU backend.
    pub async fn open(power_preference: wgpu::PowerPreference) -> Result<Self> {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .ok_or_else(|| Error::Device("no suitable GPU adapter found".to_string()))?;

        let info = adapter.get_info();
        tracing::info!(
            adapter = %info.name,
            backend = ?info.backend,
            device_type = ?info.device_type,
            "acquired GPU adapter"
        );

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("vramdb-device"),
                    required_features: wgpu::Features::empty(),
                    required_limits: wgpu::Limits::default(),
                },
                None,
            )
            .await?;

        Ok(Self { device, queue })
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    /// Largest storage binding the sort engine may create.
    pub fn max_storage_binding(&self) -> u64 {
        self.device.limits().max_storage_buffer_binding_size as u64
    }

    /// Create a data chunk: the append-only home of row payload bytes.
    pub fn create_chunk(&self, label: &str, size: u64) -> wgpu::Buffer {
        self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size,
            usage: wgpu::BufferUsages::COPY_SRC | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        })
    }

    /// Create the gather target for a bulk read.
    pub fn create_gather(&self, size: u64) -> wgpu::Buffer {
        self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("vramdb-gather"),
            size,
            usage: wgpu::BufferUsages::COPY_SRC | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        })
    }

    /// Create a host-mappable staging buffer for readback.
    pub fn create_staging(&self, size: u64) -> wgpu::Buffer {
        self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("vramdb-staging"),
            size,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        })
    }

    /// Create a storage buffer preloaded with the given words.
    pub fn create_storage_with_data(&self, label: &str, words: &[u32]) -> wgpu::Buffer {
        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size: std::mem::size_of_val(words) as u64,
            usage: wgpu::BufferUsages::STORAGE
                | wgpu::BufferUsages::COPY_SRC
                | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: true,
        });
        if !words.is_empty() {
            let mut view = buffer.slice(..).get_mapped_range_mut();
            view.copy_from_slice(bytemuck::cast_slice(words));
        }
        buffer.unmap();
        buffer
    }

    /// Create a uniform buffer the caller rewrites between passes.
    pub fn create_uniform(&self, label: &str, size: u64) -> wgpu::Buffer {
        self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        })
    }

    /// Stage one host-to-device write, trapping validation failures so a
    /// single bad entry does not poison the whole flush.
    pub async fn checked_write(&self, buffer: &wgpu::Buffer, offset: u64, bytes: &[u8]) -> Result<()> {
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        self.queue.write_buffer(buffer, offset, bytes);
        if let Some(err) = self.device.pop_error_scope().await {
            return Err(Error::Device(err.to_string()));
        }
        Ok(())
    }

    /// Submit an encoded command buffer.
    pub fn submit(&self, encoder: wgpu::CommandEncoder) {
        self.queue.submit(Some(encoder.finish()));
    }

    /// One barrier for everything submitted so far.
    pub fn await_queue(&self) {
        self.queue.submit(std::iter::empty());
        self.device.poll(wgpu::Maintain::Wait);
    }

    /// Map a staging buffer and copy its contents out to host memory.
    pub fn read_back(&self, buffer: &wgpu::Buffer) -> Result<Vec<u8>> {
        let slice = buffer.slice(..);
        let (sender, receiver) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |res| {
            let _ = sender.send(res);
        });
        self.device.poll(wgpu::Maintain::Wait);
        receiver
            .recv()
            .map_err(|_| Error::Device("readback channel closed".to_string()))??;
        let data = slice.get_mapped_range();
        let bytes = data.to_vec();
        drop(data);
        buffer.unmap();
        Ok(bytes)
    }
}
