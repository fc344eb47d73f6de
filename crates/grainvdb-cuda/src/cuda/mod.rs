//! CUDA driver backend.
//!
//! Loads a compiled GrainVDB kernel module (PTX or cubin) at runtime and
//! dispatches it through the driver API. Dispatches are serialized per
//! device and block until the device has finished.

mod backend;
mod memory;

pub use backend::CudaBackend;
pub(crate) use memory::DeviceAllocation;
