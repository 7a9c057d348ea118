//! Transfer buffers and error-scope plumbing for slice I/O.
//!
//! Slices are written and read in chunks through buffers that are created
//! once, before probing starts, so device exhaustion can never starve them.

use crate::error::GpuError;
use pollster::block_on;
use wgpu::{Buffer, BufferUsages, Device, ErrorFilter};

/// Upper bound for one fill or read-back transfer (64 MiB).
pub const DEFAULT_CHUNK_SIZE: u64 = 64 * 1024 * 1024;

/// Result of running a device call inside error scopes.
#[derive(Debug)]
pub enum Scoped<T> {
    /// The call raised no error.
    Clean(T),
    /// The device ran out of memory during the call.
    OutOfMemory(String),
}

/// Runs `f` inside out-of-memory, validation and internal error scopes.
///
/// Out-of-memory is returned as `Scoped::OutOfMemory` so the caller can
/// decide whether it means exhaustion; validation and internal errors are
/// always `GpuError::Driver`.
pub fn with_error_scopes<T>(
    device: &Device,
    operation: &'static str,
    f: impl FnOnce() -> T,
) -> Result<Scoped<T>, GpuError> {
    device.push_error_scope(ErrorFilter::Internal);
    device.push_error_scope(ErrorFilter::Validation);
    device.push_error_scope(ErrorFilter::OutOfMemory);

    let value = f();

    let out_of_memory = block_on(device.pop_error_scope());
    let validation = block_on(device.pop_error_scope());
    let internal = block_on(device.pop_error_scope());

    if let Some(err) = validation.or(internal) {
        return Err(GpuError::Driver {
            operation,
            message: err.to_string(),
        });
    }

    Ok(match out_of_memory {
        Some(err) => Scoped::OutOfMemory(err.to_string()),
        None => Scoped::Clean(value),
    })
}

/// Like `with_error_scopes`, but out-of-memory is a driver error too.
pub fn without_oom<T>(
    device: &Device,
    operation: &'static str,
    f: impl FnOnce() -> T,
) -> Result<T, GpuError> {
    match with_error_scopes(device, operation, f)? {
        Scoped::Clean(value) => Ok(value),
        Scoped::OutOfMemory(message) => Err(GpuError::Driver { operation, message }),
    }
}

/// Splits `total` bytes into `(offset, len)` transfers of at most `chunk` bytes.
pub fn chunks(total: u64, chunk: u64) -> impl Iterator<Item = (u64, u64)> {
    let step = chunk.max(1);
    (0..total)
        .step_by(step as usize)
        .map(move |offset| (offset, step.min(total - offset)))
}

/// Reusable buffers for moving slice contents between host and device.
///
/// - Staging buffer: host-mappable destination for read-back chunks
/// - Upload buffer: host-writable source of fill chunks, copied into slices
pub struct TransferBuffers {
    staging: Buffer,
    upload: Buffer,
    upload_byte: Option<u8>,
    chunk_size: u64,
}

impl TransferBuffers {
    /// Creates transfer buffers for chunks of `chunk_size` bytes.
    ///
    /// # Errors
    ///
    /// Returns `GpuError::InvalidSize` for a zero or misaligned chunk size
    /// and `GpuError::Driver` if either buffer cannot be created.
    pub fn new(device: &Device, chunk_size: u64) -> Result<Self, GpuError> {
        if chunk_size == 0 || chunk_size % wgpu::COPY_BUFFER_ALIGNMENT != 0 {
            return Err(GpuError::InvalidSize(chunk_size));
        }
        let staging = without_oom(device, "create staging buffer", || {
            device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("readback_staging"),
                size: chunk_size,
                usage: BufferUsages::MAP_READ | BufferUsages::COPY_DST,
                mapped_at_creation: false,
            })
        })?;

        let upload = without_oom(device, "create upload buffer", || {
            device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("fill_upload"),
                size: chunk_size,
                usage: BufferUsages::MAP_WRITE | BufferUsages::COPY_SRC,
                mapped_at_creation: false,
            })
        })?;

        Ok(Self {
            staging,
            upload,
            upload_byte: None,
            chunk_size,
        })
    }

    /// Returns the staging buffer.
    pub fn staging(&self) -> &Buffer {
        &self.staging
    }

    /// Returns the size of one transfer in bytes.
    pub fn chunk_size(&self) -> u64 {
        self.chunk_size
    }

    /// Returns the upload buffer.
    pub fn upload(&self) -> &Buffer {
        &self.upload
    }

    /// Whether the upload buffer already holds `byte` in every cell.
    pub fn upload_holds(&self, byte: u8) -> bool {
        self.upload_byte == Some(byte)
    }

    /// Records that the upload buffer was rewritten with `byte`.
    pub fn set_upload_byte(&mut self, byte: u8) {
        self.upload_byte = Some(byte);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::device::select_gpu;

    fn setup_device() -> Option<Device> {
        let (adapter, _) = select_gpu(0).ok()?;

        let (device, _queue) = block_on(adapter.request_device(&wgpu::DeviceDescriptor {
            label: Some("test device"),
            required_features: wgpu::Features::empty(),
            required_limits: wgpu::Limits::default(),
            memory_hints: wgpu::MemoryHints::default(),
            trace: wgpu::Trace::Off,
            experimental_features: wgpu::ExperimentalFeatures::disabled(),
        }))
        .ok()?;

        Some(device)
    }

    #[test]
    fn test_chunks_cover_total_exactly() {
        let parts: Vec<(u64, u64)> = chunks(10, 4).collect();
        assert_eq!(parts, vec![(0, 4), (4, 4), (8, 2)]);
    }

    #[test]
    fn test_chunks_single_transfer() {
        let parts: Vec<(u64, u64)> = chunks(1024, DEFAULT_CHUNK_SIZE).collect();
        assert_eq!(parts, vec![(0, 1024)]);
    }

    #[test]
    fn test_chunks_empty() {
        assert_eq!(chunks(0, 4).count(), 0);
    }

    #[test]
    fn test_transfer_buffers_creation() {
        let Some(device) = setup_device() else {
            println!("No GPU available, skipping transfer buffer test");
            return;
        };

        let buffers = TransferBuffers::new(&device, 1024 * 1024).unwrap();
        assert_eq!(buffers.chunk_size(), 1024 * 1024);
        assert_eq!(buffers.staging().size(), 1024 * 1024);
        assert_eq!(buffers.upload().size(), 1024 * 1024);
        assert!(buffers
            .upload()
            .usage()
            .contains(BufferUsages::MAP_WRITE | BufferUsages::COPY_SRC));
    }

    #[test]
    fn test_misaligned_chunk_rejected() {
        let Some(device) = setup_device() else {
            println!("No GPU available, skipping alignment test");
            return;
        };

        assert!(matches!(
            TransferBuffers::new(&device, 1023),
            Err(GpuError::InvalidSize(1023))
        ));
    }

    #[test]
    fn test_upload_byte_tracking() {
        let Some(device) = setup_device() else {
            println!("No GPU available, skipping upload tracking test");
            return;
        };

        let mut buffers = TransferBuffers::new(&device, 4096).unwrap();
        assert!(!buffers.upload_holds(0xA5));

        buffers.set_upload_byte(0xA5);
        assert!(buffers.upload_holds(0xA5));
        assert!(!buffers.upload_holds(0x5A));

        buffers.set_upload_byte(0x5A);
        assert!(buffers.upload_holds(0x5A));
    }
}
