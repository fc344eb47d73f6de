//! Error types for manifold engine operations.
//!
//! Every public engine operation returns [`EngineResult`]. Errors fall into
//! four classes (see [`ErrorClass`]) that tell the caller what state the
//! context is left in.

use grainvdb_cuda::CudaError;
use thiserror::Error;

/// Result type alias for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Broad failure class of an [`EngineError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Caller input was rejected before any state changed.
    Precondition,
    /// Memory was exhausted; the operation was rolled back and the context
    /// stays usable.
    ResourceExhaustion,
    /// The compute backend failed; the context may be unusable.
    Backend,
    /// An id did not refer to a stored vector; no partial result.
    Reference,
}

/// Errors raised by the manifold engine.
#[derive(Error, Debug)]
pub enum EngineError {
    // ========== Precondition Errors ==========
    /// Rank must be at least 1.
    #[error("Invalid rank {0}: rank must be greater than 0")]
    InvalidRank(usize),

    /// Zero vectors, zero ids, or `top == 0`.
    #[error("Empty input: {0}")]
    EmptyInput(&'static str),

    /// Probe length differs from the context rank.
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Caller buffer shorter than the declared element count.
    #[error("Buffer too short: need {required} elements, got {actual}")]
    BufferTooShort { required: usize, actual: usize },

    /// NaN or infinity in caller data (or produced by a fold).
    #[error("Non-finite value at element {index}")]
    NonFiniteValue { index: usize },

    /// Configuration could not be loaded or failed validation.
    #[error("Configuration error: {0}")]
    Config(String),

    // ========== Resource Errors ==========
    /// Device or host memory exhausted; the manifold is unchanged.
    #[error("Allocation failed: {0}")]
    AllocationFailure(String),

    // ========== Backend Errors ==========
    /// The kernel module could not be loaded.
    #[error("Failed to load kernel module from {location}: {reason}")]
    ModuleLoadFailure { location: String, reason: String },

    /// A kernel dispatch or transfer failed.
    #[error("Dispatch of {operation} failed: {reason}")]
    DispatchFailure {
        operation: &'static str,
        reason: String,
    },

    /// A previous backend failure left the context unusable.
    #[error("Context is unusable after a backend failure")]
    ContextUnusable,

    // ========== Reference Errors ==========
    /// Id outside `[0, size)`.
    #[error("Invalid reference: id {id} not in manifold of size {size}")]
    InvalidReference { id: u64, size: u64 },
}

impl EngineError {
    /// Failure class of this error.
    pub fn class(&self) -> ErrorClass {
        match self {
            EngineError::InvalidRank(_)
            | EngineError::EmptyInput(_)
            | EngineError::DimensionMismatch { .. }
            | EngineError::BufferTooShort { .. }
            | EngineError::NonFiniteValue { .. }
            | EngineError::Config(_) => ErrorClass::Precondition,
            EngineError::AllocationFailure(_) => ErrorClass::ResourceExhaustion,
            EngineError::ModuleLoadFailure { .. }
            | EngineError::DispatchFailure { .. }
            | EngineError::ContextUnusable => ErrorClass::Backend,
            EngineError::InvalidReference { .. } => ErrorClass::Reference,
        }
    }

    /// Map a backend error raised while running `operation`.
    ///
    /// Out-of-memory becomes [`EngineError::AllocationFailure`]; everything
    /// else is a [`EngineError::DispatchFailure`].
    pub fn from_backend(operation: &'static str, err: CudaError) -> Self {
        if err.is_out_of_memory() {
            EngineError::AllocationFailure(err.to_string())
        } else {
            EngineError::DispatchFailure {
                operation,
                reason: err.to_string(),
            }
        }
    }

    /// Whether this error leaves the context unusable.
    #[inline]
    pub fn poisons_context(&self) -> bool {
        matches!(self, EngineError::DispatchFailure { .. })
    }
}

impl From<config::ConfigError> for EngineError {
    fn from(err: config::ConfigError) -> Self {
        EngineError::Config(err.to_string())
    }
}

impl From<toml::de::Error> for EngineError {
    fn from(err: toml::de::Error) -> Self {
        EngineError::Config(err.to_string())
    }
}

static_assertions::assert_impl_all!(EngineError: Send, Sync, std::error::Error);
