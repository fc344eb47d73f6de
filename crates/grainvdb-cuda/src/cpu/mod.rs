//! Rayon-parallel reference backend.
//!
//! Implements the three GrainVDB kernels on the host. It is the backend used
//! when no CUDA device is present, and the reference the CUDA kernels are
//! checked against.

mod backend;
pub mod kernels;

pub use backend::CpuBackend;
