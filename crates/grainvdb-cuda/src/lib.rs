#![deny(deprecated)]

//! Compute backend binding for GrainVDB.
//!
//! This crate owns everything that touches the compute device:
//! - Kernel modules and their named entry points
//! - Device buffers, allocation, and host/device transfer
//! - The three GrainVDB kernels: similarity scoring, partial top-K
//!   selection, and the neighborhood density audit
//!
//! Engine code depends only on the [`ComputeBackend`] trait. Two
//! implementations ship here:
//!
//! | Backend        | Availability          | Kernel module            |
//! |----------------|-----------------------|--------------------------|
//! | [`CpuBackend`] | always                | built-in (`builtin:cpu`) |
//! | `CudaBackend`  | feature `cuda`        | PTX/cubin loaded at runtime |
//!
//! # Example
//!
//! ```
//! use grainvdb_cuda::{open_backend, BackendOptions};
//!
//! let backend = open_backend(&BackendOptions::default()).unwrap();
//! assert!(backend.module().has(grainvdb_cuda::EntryPoint::PartialTopK));
//! ```

pub mod backend;
pub mod buffer;
pub mod cpu;
pub mod error;
pub mod ffi;
pub mod kernel;
pub mod select;

#[cfg(feature = "cuda")]
pub mod cuda;
#[cfg(feature = "cuda")]
pub mod safe;

pub use backend::{open_backend, BackendKind, BackendOptions, ComputeBackend, ManifoldView, Timed};
pub use buffer::{DeviceBuffer, MemoryLedger, MemoryStats};
pub use cpu::CpuBackend;
#[cfg(feature = "cuda")]
pub use cuda::CudaBackend;
pub use error::{CudaError, CudaResult};
pub use kernel::{EntryPoint, KernelModule};
pub use select::{ScoredId, SENTINEL_ID};
