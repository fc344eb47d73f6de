//! Safe RAII wrappers for CUDA driver resources.
//!
//! Everything here releases its driver handle on drop and never panics.

pub mod device;

pub use device::{DeviceInfo, GpuDevice};
