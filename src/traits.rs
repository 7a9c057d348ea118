//! Core traits for slice probing.
//!
//! This module defines the `SliceDevice` trait that the lock controller
//! drives. The wgpu backend implements it for real hardware; tests use an
//! in-memory implementation.

use crate::error::GpuError;
use crate::verify::FILL_BYTE;
use std::time::Duration;

/// Default slice size in mebibytes.
pub const DEFAULT_SLICE_MIB: u32 = 512;

/// Default interval between liveness wake-ups once parked.
pub const DEFAULT_HEARTBEAT: Duration = Duration::from_secs(60);

/// Outcome of a slice allocation request.
#[derive(Debug)]
pub enum Allocation<H> {
    /// The device handed out a region of the requested size.
    Granted(H),
    /// The device has no memory left. Expected, never fatal.
    Exhausted {
        /// Driver diagnostic for display only.
        reason: String,
    },
}

/// Configuration for a lock run.
#[derive(Debug, Clone)]
pub struct LockConfig {
    /// Size of every slice in bytes.
    pub slice_size: u64,
    /// Byte written to every cell before the read-backs.
    pub fill_byte: u8,
    /// Interval between liveness wake-ups once parked.
    pub heartbeat: Duration,
}

impl LockConfig {
    /// Creates a configuration for slices of `slice_mib` mebibytes.
    pub fn with_slice_mib(slice_mib: u32) -> Self {
        Self {
            slice_size: u64::from(slice_mib) * 1024 * 1024,
            ..Self::default()
        }
    }
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            slice_size: u64::from(DEFAULT_SLICE_MIB) * 1024 * 1024,
            fill_byte: FILL_BYTE,
            heartbeat: DEFAULT_HEARTBEAT,
        }
    }
}

/// A device whose memory can be carved into fixed-size slices.
///
/// Every method except `allocate`'s `Exhausted` outcome reports failures as
/// `GpuError`, which the controller treats as fatal.
pub trait SliceDevice {
    /// Ownership token for one allocated region.
    type Handle;

    /// Human-readable device description.
    fn device_info(&self) -> String;

    /// Requests a new region of `size` bytes.
    ///
    /// # Returns
    /// * `Ok(Allocation::Granted(handle))` - The region is now owned by the caller
    /// * `Ok(Allocation::Exhausted { .. })` - The device is out of memory
    /// * `Err(GpuError)` - Invalid size or driver malfunction
    fn allocate(&mut self, size: u64) -> Result<Allocation<Self::Handle>, GpuError>;

    /// Returns a region to the device.
    ///
    /// Releasing a handle the device does not own is an error.
    fn release(&mut self, handle: Self::Handle) -> Result<(), GpuError>;

    /// Writes `byte` to every byte of the region.
    fn fill(&mut self, handle: &Self::Handle, byte: u8) -> Result<(), GpuError>;

    /// Copies the region into `dst`. `dst.len()` must equal the region size.
    fn read_back(&mut self, handle: &Self::Handle, dst: &mut [u8]) -> Result<(), GpuError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = LockConfig::default();
        assert_eq!(config.slice_size, 512 * 1024 * 1024);
        assert_eq!(config.fill_byte, 0xA5);
        assert_eq!(config.heartbeat, Duration::from_secs(60));
    }

    #[test]
    fn test_config_with_slice_mib() {
        let config = LockConfig::with_slice_mib(64);
        assert_eq!(config.slice_size, 64 * 1024 * 1024);
        assert_eq!(config.fill_byte, FILL_BYTE);
    }

    #[test]
    fn test_config_large_slice_does_not_overflow() {
        let config = LockConfig::with_slice_mib(u32::MAX);
        assert_eq!(config.slice_size, u64::from(u32::MAX) << 20);
    }
}
