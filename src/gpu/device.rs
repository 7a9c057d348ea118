//! GPU device enumeration and selection.
//!
//! This module provides functions to enumerate available GPU adapters
//! and select one for slice probing.

use crate::error::GpuError;
use wgpu::{
    Adapter, Backend, Backends, DeviceType, Instance, InstanceDescriptor, MemoryBudgetThresholds,
};

/// Percent of the device-local heap budget after which buffer creation
/// reports out-of-memory.
///
/// Without this threshold the Vulkan allocator falls back to host-visible
/// memory once VRAM is full, and slices silently land in system RAM.
pub const VRAM_BUDGET_PERCENT: u8 = 95;

/// Information about an available GPU.
#[derive(Debug, Clone)]
pub struct GpuInfo {
    /// Index in the enumerated list.
    pub index: usize,
    /// GPU name (e.g., "NVIDIA GeForce RTX 4090").
    pub name: String,
    /// Vendor name (e.g., "NVIDIA").
    pub vendor: String,
    /// Graphics API backend (Vulkan, Metal, DX12, etc.).
    pub backend: Backend,
    /// Device type (discrete, integrated, virtual, etc.).
    pub device_type: DeviceType,
    /// Driver version string.
    pub driver: String,
}

impl GpuInfo {
    fn from_adapter(index: usize, adapter: &Adapter) -> Self {
        let info = adapter.get_info();
        GpuInfo {
            index,
            name: info.name,
            vendor: vendor_name(info.vendor),
            backend: info.backend,
            device_type: info.device_type,
            driver: info.driver,
        }
    }

    /// Screen header for this GPU.
    pub fn header(&self) -> String {
        format!("GPU {} ({}, {:?})", self.index, self.name, self.backend)
    }
}

impl std::fmt::Display for GpuInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[{}] {} ({}, {:?}, {:?}, driver {})",
            self.index, self.name, self.vendor, self.backend, self.device_type, self.driver
        )
    }
}

/// Instance settings shared by enumeration and selection.
fn instance_descriptor() -> InstanceDescriptor {
    InstanceDescriptor {
        memory_budget_thresholds: MemoryBudgetThresholds {
            for_resource_creation: Some(VRAM_BUDGET_PERCENT),
            ..Default::default()
        },
        ..Default::default()
    }
}

/// Enumerate all available GPU adapters.
///
/// The list may be empty if no GPUs are available.
pub fn enumerate_gpus() -> Vec<GpuInfo> {
    let instance = Instance::new(&instance_descriptor());
    let adapters: Vec<Adapter> = instance.enumerate_adapters(Backends::all());

    adapters
        .iter()
        .enumerate()
        .map(|(index, adapter)| GpuInfo::from_adapter(index, adapter))
        .collect()
}

/// Select a GPU adapter by index.
///
/// # Errors
///
/// Returns `GpuError::NoAdapter` if no GPUs are available.
/// Returns `GpuError::AdapterNotFound` if the index is out of range.
pub fn select_gpu(index: usize) -> Result<(Adapter, GpuInfo), GpuError> {
    let instance = Instance::new(&instance_descriptor());
    let adapters: Vec<Adapter> = instance.enumerate_adapters(Backends::all());

    if adapters.is_empty() {
        return Err(GpuError::NoAdapter);
    }

    if index >= adapters.len() {
        let available: Vec<String> = adapters.iter().map(|a| a.get_info().name).collect();
        return Err(GpuError::AdapterNotFound { index, available });
    }

    let adapter = adapters
        .into_iter()
        .nth(index)
        .ok_or(GpuError::NoAdapter)?;
    let info = GpuInfo::from_adapter(index, &adapter);
    Ok((adapter, info))
}

/// Convert vendor ID to human-readable name.
fn vendor_name(vendor_id: u32) -> String {
    match vendor_id {
        0x1002 => "AMD".to_string(),
        0x1010 => "ImgTec".to_string(),
        0x10DE => "NVIDIA".to_string(),
        0x13B5 => "ARM".to_string(),
        0x5143 => "Qualcomm".to_string(),
        0x8086 => "Intel".to_string(),
        0x106B => "Apple".to_string(),
        _ => format!("Unknown (0x{:04X})", vendor_id),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_info() -> GpuInfo {
        GpuInfo {
            index: 2,
            name: "Test GPU".to_string(),
            vendor: "NVIDIA".to_string(),
            backend: Backend::Vulkan,
            device_type: DeviceType::DiscreteGpu,
            driver: "1.0".to_string(),
        }
    }

    #[test]
    fn test_enumerate_gpus_returns_list() {
        // May be empty in CI without GPU, just verify it doesn't panic
        let gpus = enumerate_gpus();
        for (i, gpu) in gpus.iter().enumerate() {
            assert_eq!(gpu.index, i);
        }
    }

    #[test]
    fn test_gpu_info_display() {
        let display = format!("{}", test_info());
        assert!(display.contains("Test GPU"));
        assert!(display.contains("Vulkan"));
        assert!(display.contains("[2]"));
        assert!(display.contains("driver 1.0"));
    }

    #[test]
    fn test_gpu_info_header() {
        assert_eq!(test_info().header(), "GPU 2 (Test GPU, Vulkan)");
    }

    #[test]
    fn test_select_invalid_index() {
        match select_gpu(999) {
            Err(GpuError::AdapterNotFound { index, .. }) => {
                assert_eq!(index, 999);
            }
            Err(GpuError::NoAdapter) => {
                // Also acceptable in CI without GPU
            }
            _ => panic!("Expected AdapterNotFound or NoAdapter error"),
        }
    }

    #[test]
    fn test_select_first_gpu() {
        if enumerate_gpus().is_empty() {
            println!("No GPU available, skipping selection test");
            return;
        }

        let (_adapter, info) = select_gpu(0).unwrap();
        assert_eq!(info.index, 0);
    }

    #[test]
    fn test_instance_guards_vram_budget() {
        let descriptor = instance_descriptor();
        assert_eq!(
            descriptor.memory_budget_thresholds.for_resource_creation,
            Some(VRAM_BUDGET_PERCENT)
        );
        assert!(VRAM_BUDGET_PERCENT > 0 && VRAM_BUDGET_PERCENT <= 100);
        assert_eq!(descriptor.backends, InstanceDescriptor::default().backends);
    }

    #[test]
    fn test_vendor_names() {
        assert_eq!(vendor_name(0x10DE), "NVIDIA");
        assert_eq!(vendor_name(0x1002), "AMD");
        assert_eq!(vendor_name(0x8086), "Intel");
        assert_eq!(vendor_name(0x106B), "Apple");
        assert!(vendor_name(0x0000).contains("Unknown"));
    }
}
