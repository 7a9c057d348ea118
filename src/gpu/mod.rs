//! GPU/VRAM slice device.
//!
//! This module provides the wgpu implementation of `SliceDevice` for
//! cross-platform support (Vulkan, Metal, DX12): adapter enumeration,
//! slice allocation inside error scopes, and chunked fill and read-back.

pub mod allocator;
pub mod buffers;
pub mod device;

pub use allocator::WgpuSliceDevice;
pub use device::{enumerate_gpus, select_gpu};
