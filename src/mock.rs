//! In-memory `SliceDevice` for tests.

use crate::error::GpuError;
use crate::traits::{Allocation, SliceDevice};
use std::collections::{BTreeMap, HashSet};

/// Scripted device: a fixed number of grants, optional read instability per
/// allocation ordinal, and strict release bookkeeping.
pub struct MockDevice {
    capacity: Option<usize>,
    next_id: u32,
    live: BTreeMap<u32, Vec<u8>>,
    unstable: HashSet<u32>,
    fail_read_backs: bool,
    fail_allocations: bool,
    reads_per_handle: BTreeMap<u32, u64>,
    released: Vec<u32>,
    allocation_attempts: usize,
    fills: usize,
    read_backs: usize,
}

impl MockDevice {
    pub fn new() -> Self {
        Self {
            capacity: None,
            next_id: 0,
            live: BTreeMap::new(),
            unstable: HashSet::new(),
            fail_read_backs: false,
            fail_allocations: false,
            reads_per_handle: BTreeMap::new(),
            released: Vec::new(),
            allocation_attempts: 0,
            fills: 0,
            read_backs: 0,
        }
    }

    /// Grants exactly `slices` allocations, then reports exhaustion.
    pub fn with_capacity(mut self, slices: usize) -> Self {
        self.capacity = Some(slices);
        self
    }

    /// Makes the given allocation ordinals return different bytes on
    /// successive reads.
    pub fn with_unstable_slices(mut self, ordinals: &[u32]) -> Self {
        self.unstable.extend(ordinals.iter().copied());
        self
    }

    /// Makes every read-back fail with a driver error.
    pub fn failing_read_backs(mut self) -> Self {
        self.fail_read_backs = true;
        self
    }

    /// Makes allocation fail with a driver error instead of reporting
    /// exhaustion, once the capacity is used up or at once without one.
    pub fn failing_allocations(mut self) -> Self {
        self.fail_allocations = true;
        self
    }

    pub fn live_handles(&self) -> Vec<u32> {
        self.live.keys().copied().collect()
    }

    pub fn released(&self) -> &[u32] {
        &self.released
    }

    pub fn allocation_attempts(&self) -> usize {
        self.allocation_attempts
    }

    pub fn fills(&self) -> usize {
        self.fills
    }

    pub fn read_backs(&self) -> usize {
        self.read_backs
    }

    pub fn contents(&self, handle: u32) -> &[u8] {
        &self.live[&handle]
    }

    fn region(&self, handle: u32) -> Result<&Vec<u8>, GpuError> {
        self.live
            .get(&handle)
            .ok_or_else(|| GpuError::UnknownHandle(handle.to_string()))
    }
}

impl SliceDevice for MockDevice {
    type Handle = u32;

    fn device_info(&self) -> String {
        "Mock GPU (in-memory)".to_string()
    }

    fn allocate(&mut self, size: u64) -> Result<Allocation<u32>, GpuError> {
        self.allocation_attempts += 1;
        if size == 0 {
            return Err(GpuError::InvalidSize(size));
        }
        let full = self
            .capacity
            .map_or(true, |capacity| self.next_id as usize >= capacity);
        if self.fail_allocations && full {
            return Err(GpuError::Driver {
                operation: "create slice buffer",
                message: "validation error".to_string(),
            });
        }
        if let Some(capacity) = self.capacity {
            if self.next_id as usize >= capacity {
                return Ok(Allocation::Exhausted {
                    reason: "out of device memory".to_string(),
                });
            }
        }

        let id = self.next_id;
        self.next_id += 1;
        self.live.insert(id, vec![0u8; size as usize]);
        Ok(Allocation::Granted(id))
    }

    fn release(&mut self, handle: u32) -> Result<(), GpuError> {
        if self.live.remove(&handle).is_none() {
            return Err(GpuError::UnknownHandle(handle.to_string()));
        }
        self.released.push(handle);
        Ok(())
    }

    fn fill(&mut self, handle: &u32, byte: u8) -> Result<(), GpuError> {
        self.fills += 1;
        let region = self
            .live
            .get_mut(handle)
            .ok_or_else(|| GpuError::UnknownHandle(handle.to_string()))?;
        region.fill(byte);
        Ok(())
    }

    fn read_back(&mut self, handle: &u32, dst: &mut [u8]) -> Result<(), GpuError> {
        self.read_backs += 1;
        if self.fail_read_backs {
            return Err(GpuError::Driver {
                operation: "read back",
                message: "device lost".to_string(),
            });
        }

        let region = self.region(*handle)?;
        if region.len() != dst.len() {
            return Err(GpuError::InvalidSize(dst.len() as u64));
        }
        dst.copy_from_slice(region);

        let reads = self.reads_per_handle.entry(*handle).or_insert(0);
        if self.unstable.contains(handle) && *reads % 2 == 1 {
            dst[0] ^= 0x01;
        }
        *reads += 1;
        Ok(())
    }
}
