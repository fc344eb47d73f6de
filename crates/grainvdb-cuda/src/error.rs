//! Error types for compute backend operations.
//!
//! Every fallible backend call returns [`CudaResult`]. Errors never panic
//! across the binding boundary; device failures are surfaced to the caller
//! as values.

use thiserror::Error;

/// Result type alias for backend operations.
pub type CudaResult<T> = Result<T, CudaError>;

/// Errors raised by a compute backend.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CudaError {
    // ========== Device Errors ==========
    /// No compute device is available (or the `cuda` feature is disabled).
    #[error("No CUDA-capable device available")]
    NoDevice,

    /// Driver initialization or context creation failed.
    #[error("Device initialization failed: {0}")]
    DeviceInitError(String),

    /// The device stopped responding or reported an unrecoverable fault.
    #[error("Device lost: {0}")]
    DeviceLost(String),

    // ========== Module Errors ==========
    /// The kernel module could not be loaded from its location.
    #[error("Failed to load kernel module from {location}: {reason}")]
    ModuleLoad { location: String, reason: String },

    /// The loaded module does not export a required entry point.
    #[error("Kernel module {module} has no entry point '{entry_point}'")]
    MissingEntryPoint { module: String, entry_point: String },

    // ========== Memory Errors ==========
    /// Device memory could not be allocated.
    #[error("Out of device memory: requested {requested} bytes, {available} bytes available")]
    OutOfMemory { requested: usize, available: usize },

    /// Host/device transfer failed.
    #[error("Memory transfer failed: {0}")]
    TransferError(String),

    /// A buffer created by a different backend was passed in.
    #[error("Buffer belongs to a different backend: expected {expected}, got {actual}")]
    ForeignBuffer {
        expected: &'static str,
        actual: &'static str,
    },

    // ========== Dispatch Errors ==========
    /// Kernel launch or synchronization failed.
    #[error("Kernel execution failed: {0}")]
    KernelError(String),

    /// Operand lengths disagree.
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Invalid launch or backend configuration.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl CudaError {
    /// Whether this error reports memory exhaustion.
    ///
    /// Exhaustion is recoverable: the caller's state is rolled back and the
    /// backend stays usable. Every other error is a backend failure.
    #[inline]
    pub fn is_out_of_memory(&self) -> bool {
        matches!(self, CudaError::OutOfMemory { .. })
    }
}
