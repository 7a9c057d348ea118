//! Error types for VRAM probing and locking.
//!
//! Allocation exhaustion and integrity mismatches are not errors here: both
//! are ordinary outcomes handled by the lock controller. Everything in this
//! module is fatal and ends the process.

use thiserror::Error;

/// Unified error type for vramlock operations.
#[derive(Error, Debug)]
pub enum VramLockError {
    /// Configuration error (bad slice size, unusable options).
    #[error("Configuration error: {0}")]
    Config(String),

    /// GPU driver or transfer failure.
    #[error("GPU error: {0}")]
    Gpu(#[from] GpuError),

    /// Slice bookkeeping was driven out of protocol.
    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),
}

impl VramLockError {
    /// Process exit code for this error.
    ///
    /// `2` for usage and configuration problems, `1` for everything that
    /// means the tool itself malfunctioned.
    pub fn exit_code(&self) -> i32 {
        match self {
            VramLockError::Config(_) => 2,
            VramLockError::Gpu(GpuError::AdapterNotFound { .. })
            | VramLockError::Gpu(GpuError::SliceTooLarge { .. }) => 2,
            VramLockError::Gpu(_) | VramLockError::Registry(_) => 1,
        }
    }
}

/// GPU-specific errors.
#[derive(Error, Debug)]
pub enum GpuError {
    /// No GPU adapter found.
    #[error("No GPU adapter found")]
    NoAdapter,

    /// Specified GPU adapter not found.
    #[error("Invalid gpu_index {index} (available: {available:?})")]
    AdapterNotFound {
        index: usize,
        available: Vec<String>,
    },

    /// Failed to request GPU device.
    #[error("Failed to request GPU device: {0}")]
    DeviceRequest(String),

    /// Requested slice exceeds what a single device buffer may hold.
    #[error("Slice of {requested} bytes exceeds the device buffer limit of {limit} bytes")]
    SliceTooLarge { requested: u64, limit: u64 },

    /// Slice size the transfer path cannot handle.
    #[error("Invalid slice size: {0} bytes")]
    InvalidSize(u64),

    /// The driver rejected an operation for a reason other than memory exhaustion.
    #[error("{operation} failed: {message}")]
    Driver {
        operation: &'static str,
        message: String,
    },

    /// Buffer mapping failed.
    #[error("Buffer mapping failed: {0}")]
    BufferMapping(String),

    /// GPU operation timed out.
    #[error("GPU operation timed out after {0} seconds")]
    Timeout(u64),

    /// A handle that this device does not own was released.
    #[error("Release of unknown slice handle {0}")]
    UnknownHandle(String),
}

/// Misuse of the slice registry. Always a bug in the caller.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("slice index {index} out of range (registry holds {len})")]
    OutOfRange { index: usize, len: usize },

    #[error("slice #{index} is already classified as {state}")]
    AlreadyClassified { index: usize, state: &'static str },

    #[error("slice #{pending} is still being verified")]
    VerificationPending { pending: usize },

    #[error("registry already finalized")]
    Finalized,
}
