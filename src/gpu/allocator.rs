//! wgpu-backed slice device.
//!
//! Each slice is one device buffer. Allocation runs inside wgpu error scopes
//! so that an out-of-memory failure can be told apart from a real driver
//! problem.

use crate::error::GpuError;
use crate::gpu::buffers::{
    chunks, with_error_scopes, without_oom, Scoped, TransferBuffers, DEFAULT_CHUNK_SIZE,
};
use crate::gpu::device::GpuInfo;
use crate::traits::{Allocation, SliceDevice};
use crossbeam::channel::{self, Receiver};
use pollster::block_on;
use std::collections::HashSet;
use std::time::{Duration, Instant};
use wgpu::{Adapter, Buffer, BufferUsages, Device, Queue};

/// One allocated slice of device memory.
#[derive(Debug)]
pub struct SliceBuffer {
    id: u64,
    buffer: Buffer,
}

impl SliceBuffer {
    pub fn size(&self) -> u64 {
        self.buffer.size()
    }
}

/// Slice device over a wgpu adapter.
pub struct WgpuSliceDevice {
    /// The wgpu device that owns every slice buffer.
    device: Device,
    /// The command queue for transfers.
    queue: Queue,
    /// Information about the GPU being probed.
    gpu_info: GpuInfo,
    /// Staging and fill buffers, created before any slice.
    transfers: TransferBuffers,
    /// Largest buffer the device accepts.
    max_buffer_size: u64,
    /// Timeout for each wait on the GPU.
    timeout: Duration,
    /// Ids of slices not yet released.
    live: HashSet<u64>,
    next_id: u64,
}

impl WgpuSliceDevice {
    /// Opens the adapter for slices of `slice_size` bytes.
    ///
    /// The device is requested with the adapter's own limits so slices may
    /// exceed wgpu's conservative default buffer size.
    ///
    /// # Errors
    ///
    /// Returns `GpuError::SliceTooLarge` if a single buffer cannot hold a
    /// slice, `GpuError::InvalidSize` for zero or misaligned sizes and
    /// `GpuError::DeviceRequest` if device creation fails.
    pub fn new(
        adapter: Adapter,
        gpu_info: GpuInfo,
        slice_size: u64,
        timeout: Duration,
    ) -> Result<Self, GpuError> {
        let limits = adapter.limits();
        check_slice_size(slice_size, limits.max_buffer_size)?;

        let (device, queue) = block_on(adapter.request_device(&wgpu::DeviceDescriptor {
            label: Some("vramlock"),
            required_features: wgpu::Features::empty(),
            required_limits: limits.clone(),
            memory_hints: wgpu::MemoryHints::MemoryUsage,
            trace: wgpu::Trace::Off,
            experimental_features: wgpu::ExperimentalFeatures::disabled(),
        }))
        .map_err(|e| GpuError::DeviceRequest(e.to_string()))?;

        let transfers = TransferBuffers::new(&device, slice_size.min(DEFAULT_CHUNK_SIZE))?;

        Ok(Self {
            device,
            queue,
            gpu_info,
            transfers,
            max_buffer_size: limits.max_buffer_size,
            timeout,
            live: HashSet::new(),
            next_id: 0,
        })
    }

    /// Returns information about the GPU being probed.
    #[cfg(test)]
    pub fn gpu_info(&self) -> &GpuInfo {
        &self.gpu_info
    }

    /// Number of slices currently held on the device.
    #[cfg(test)]
    pub fn live_slices(&self) -> usize {
        self.live.len()
    }

    /// Polls the device until `rx` yields, or the timeout elapses.
    fn wait_for<T>(&self, rx: &Receiver<T>) -> Result<T, GpuError> {
        let start = Instant::now();
        loop {
            self.device
                .poll(wgpu::PollType::Poll)
                .map_err(poll_failed)?;

            if let Ok(value) = rx.try_recv() {
                return Ok(value);
            }

            if start.elapsed() > self.timeout {
                return Err(GpuError::Timeout(self.timeout.as_secs()));
            }

            std::thread::sleep(Duration::from_millis(1));
        }
    }

    /// Blocks until all submitted work, including pending writes, is done.
    fn wait_idle(&self) -> Result<(), GpuError> {
        let (tx, rx) = channel::bounded(1);
        self.queue.submit(None::<wgpu::CommandBuffer>);
        self.queue.on_submitted_work_done(move || {
            tx.send(()).ok();
        });
        self.wait_for(&rx)
    }

    /// Rewrites the upload buffer with `byte` unless it already holds it.
    ///
    /// Mapping an existing buffer allocates nothing, so this cannot fail
    /// for lack of device memory.
    fn load_upload(&mut self, byte: u8) -> Result<(), GpuError> {
        if self.transfers.upload_holds(byte) {
            return Ok(());
        }

        let upload = self.transfers.upload();
        let slice = upload.slice(..);
        let (tx, rx) = channel::bounded(1);
        slice.map_async(wgpu::MapMode::Write, move |result| {
            tx.send(result).ok();
        });
        self.wait_for(&rx)?
            .map_err(|e| GpuError::BufferMapping(e.to_string()))?;

        let mut view = slice.get_mapped_range_mut();
        view.fill(byte);
        drop(view);
        upload.unmap();

        self.transfers.set_upload_byte(byte);
        Ok(())
    }

    /// Copies `len` bytes at `offset` of `src` into the staging buffer and
    /// from there into `dst`.
    fn read_chunk(&self, src: &Buffer, offset: u64, dst: &mut [u8]) -> Result<(), GpuError> {
        let len = dst.len() as u64;
        let staging = self.transfers.staging();

        without_oom(&self.device, "copy to staging", || {
            let mut encoder = self
                .device
                .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some("readback_encoder"),
                });
            encoder.copy_buffer_to_buffer(src, offset, staging, 0, len);
            self.queue.submit(Some(encoder.finish()));
        })?;

        let slice = staging.slice(..len);
        let (tx, rx) = channel::bounded(1);
        slice.map_async(wgpu::MapMode::Read, move |result| {
            tx.send(result).ok();
        });
        self.wait_for(&rx)?
            .map_err(|e| GpuError::BufferMapping(e.to_string()))?;

        let data = slice.get_mapped_range();
        dst.copy_from_slice(&data);
        drop(data);
        staging.unmap();

        Ok(())
    }
}

impl SliceDevice for WgpuSliceDevice {
    type Handle = SliceBuffer;

    fn device_info(&self) -> String {
        self.gpu_info.header()
    }

    fn allocate(&mut self, size: u64) -> Result<Allocation<SliceBuffer>, GpuError> {
        check_slice_size(size, self.max_buffer_size)?;

        let created = with_error_scopes(&self.device, "create slice buffer", || {
            self.device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("vram_slice"),
                size,
                usage: BufferUsages::COPY_SRC | BufferUsages::COPY_DST,
                mapped_at_creation: false,
            })
        })?;

        match created {
            Scoped::Clean(buffer) => {
                let id = self.next_id;
                self.next_id += 1;
                self.live.insert(id);
                Ok(Allocation::Granted(SliceBuffer { id, buffer }))
            }
            Scoped::OutOfMemory(reason) => Ok(Allocation::Exhausted { reason }),
        }
    }

    fn release(&mut self, handle: SliceBuffer) -> Result<(), GpuError> {
        if !self.live.remove(&handle.id) {
            return Err(GpuError::UnknownHandle(format!("#{}", handle.id)));
        }
        handle.buffer.destroy();
        Ok(())
    }

    fn fill(&mut self, handle: &SliceBuffer, byte: u8) -> Result<(), GpuError> {
        self.load_upload(byte)?;

        let upload = self.transfers.upload();
        without_oom(&self.device, "fill slice", || {
            let mut encoder = self
                .device
                .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some("fill_encoder"),
                });
            for (offset, len) in chunks(handle.size(), self.transfers.chunk_size()) {
                encoder.copy_buffer_to_buffer(upload, 0, &handle.buffer, offset, len);
            }
            self.queue.submit(Some(encoder.finish()));
        })?;

        self.wait_idle()
    }

    fn read_back(&mut self, handle: &SliceBuffer, dst: &mut [u8]) -> Result<(), GpuError> {
        if dst.len() as u64 != handle.size() {
            return Err(GpuError::InvalidSize(dst.len() as u64));
        }

        let chunk_size = self.transfers.chunk_size();
        for (offset, len) in chunks(handle.size(), chunk_size) {
            let range = offset as usize..(offset + len) as usize;
            self.read_chunk(&handle.buffer, offset, &mut dst[range])?;
        }
        Ok(())
    }
}

/// A failed poll, such as a lost device, is a driver error rather than a
/// wait that runs into its timeout.
fn poll_failed(err: wgpu::PollError) -> GpuError {
    GpuError::Driver {
        operation: "poll device",
        message: err.to_string(),
    }
}

/// Rejects sizes a single device buffer cannot carry.
fn check_slice_size(size: u64, max_buffer_size: u64) -> Result<(), GpuError> {
    if size == 0 || size % wgpu::COPY_BUFFER_ALIGNMENT != 0 {
        return Err(GpuError::InvalidSize(size));
    }
    if size > max_buffer_size {
        return Err(GpuError::SliceTooLarge {
            requested: size,
            limit: max_buffer_size,
        });
    }
    Ok(())
}
