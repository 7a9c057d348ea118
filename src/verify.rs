//! Read-stability verification of a single slice.
//!
//! A slice is filled with one byte value and read back twice. The two host
//! copies are compared with each other, not with the written pattern: a
//! region that returns different bytes on successive reads of the same write
//! is unstable, while a copy that merely differs from the pattern could be a
//! transfer-path problem.

use crate::error::GpuError;
use crate::traits::SliceDevice;

/// Byte written to every cell of a slice under test.
///
/// `0xA5` is `10100101`, so a bit drifting toward either 0 or 1 changes it.
pub const FILL_BYTE: u8 = 0xA5;

/// Result of comparing the two read-backs of a slice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Both copies are bit-identical.
    Match,
    /// The copies differ somewhere.
    Mismatch,
}

/// Compares two read-backs byte for byte.
///
/// Buffers of different length never match.
pub fn compare_readbacks(first: &[u8], second: &[u8]) -> Verdict {
    if first == second {
        Verdict::Match
    } else {
        Verdict::Mismatch
    }
}

/// Fills, reads back twice and compares.
///
/// Owns the two host buffers, which are allocated once at the slice size and
/// reused for every slice.
pub struct IntegrityVerifier {
    fill_byte: u8,
    first: Vec<u8>,
    second: Vec<u8>,
}

impl IntegrityVerifier {
    /// Creates a verifier for slices of `slice_size` bytes.
    ///
    /// # Errors
    ///
    /// Returns `GpuError::InvalidSize` if the size is zero or does not fit
    /// in host memory addressing.
    pub fn new(slice_size: u64, fill_byte: u8) -> Result<Self, GpuError> {
        let len = usize::try_from(slice_size)
            .ok()
            .filter(|&len| len > 0)
            .ok_or(GpuError::InvalidSize(slice_size))?;

        Ok(Self {
            fill_byte,
            first: vec![0u8; len],
            second: vec![0u8; len],
        })
    }

    /// Verifies one slice.
    ///
    /// No retries: a single mismatch is reported as is.
    pub fn verify<D: SliceDevice>(
        &mut self,
        device: &mut D,
        handle: &D::Handle,
    ) -> Result<Verdict, GpuError> {
        device.fill(handle, self.fill_byte)?;
        device.read_back(handle, &mut self.first)?;
        device.read_back(handle, &mut self.second)?;
        Ok(compare_readbacks(&self.first, &self.second))
    }
}
