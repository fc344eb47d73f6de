//! RAII wrapper for a CUDA device and its context.
//!
//! # Thread Safety
//!
//! `GpuDevice` is `Send` but not `Sync`. The context is bound to whichever
//! thread last called [`GpuDevice::make_current`], so shared use must go
//! through a lock that also re-binds the context.

use std::ffi::CStr;
use std::ptr;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Once;

use crate::error::{CudaError, CudaResult};
use crate::ffi::cuda_driver::{
    cuCtxCreate_v2, cuCtxDestroy_v2, cuCtxSetCurrent, cuCtxSynchronize, cuDeviceGet,
    cuDeviceGetAttribute, cuDeviceGetName, cuInit, cuMemGetInfo_v2, CUcontext, CUdevice,
    CUDA_ERROR_INVALID_DEVICE, CUDA_ERROR_NO_DEVICE, CUDA_SUCCESS,
    CU_DEVICE_ATTRIBUTE_COMPUTE_CAPABILITY_MAJOR, CU_DEVICE_ATTRIBUTE_COMPUTE_CAPABILITY_MINOR,
    CU_DEVICE_ATTRIBUTE_MAX_THREADS_PER_BLOCK,
};
use crate::ffi::cuda_result_to_string;

/// Global once-guard for driver initialization.
static CUDA_INIT: Once = Once::new();

/// Result of `cuInit`, kept for error reporting on later calls.
static CUDA_INIT_RESULT: AtomicI32 = AtomicI32::new(CUDA_SUCCESS);

/// Static properties of an opened device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub ordinal: i32,
    pub name: String,
    pub compute_capability: (u32, u32),
    pub max_threads_per_block: u32,
}

/// CUDA device with an owned context, destroyed on drop.
///
/// # Example
///
/// ```no_run
/// use grainvdb_cuda::safe::GpuDevice;
///
/// fn main() -> Result<(), grainvdb_cuda::CudaError> {
///     let device = GpuDevice::new(0)?;
///     let info = device.info();
///     println!("{} (sm_{}{})", info.name, info.compute_capability.0, info.compute_capability.1);
///     let (free, total) = device.memory_info()?;
///     println!("{} free / {} total", free, total);
///     Ok(())
/// }
/// ```
#[derive(Debug)]
pub struct GpuDevice {
    device: CUdevice,
    context: CUcontext,
    ordinal: i32,
}

impl GpuDevice {
    /// Initialize the driver (once per process) and create a context on `ordinal`.
    ///
    /// # Errors
    ///
    /// - `NoDevice` if the driver sees no device
    /// - `DeviceInitError` if init, device lookup, or context creation fails
    pub fn new(ordinal: i32) -> CudaResult<Self> {
        CUDA_INIT.call_once(|| {
            // SAFETY: cuInit(0) is thread-safe and idempotent
            let result = unsafe { cuInit(0) };
            CUDA_INIT_RESULT.store(result, Ordering::Release);
        });

        let init_result = CUDA_INIT_RESULT.load(Ordering::Acquire);
        if init_result != CUDA_SUCCESS {
            return match init_result {
                CUDA_ERROR_NO_DEVICE => Err(CudaError::NoDevice),
                code => Err(CudaError::DeviceInitError(format!(
                    "cuInit failed: {}",
                    cuda_result_to_string(code)
                ))),
            };
        }

        let mut device: CUdevice = 0;
        // SAFETY: device is a valid out-pointer, cuInit succeeded
        let result = unsafe { cuDeviceGet(&mut device, ordinal) };
        match result {
            CUDA_SUCCESS => {}
            CUDA_ERROR_NO_DEVICE => return Err(CudaError::NoDevice),
            CUDA_ERROR_INVALID_DEVICE => {
                return Err(CudaError::DeviceInitError(format!(
                    "Invalid device ordinal {}: {}",
                    ordinal,
                    cuda_result_to_string(result)
                )))
            }
            code => {
                return Err(CudaError::DeviceInitError(format!(
                    "cuDeviceGet({}) failed: {}",
                    ordinal,
                    cuda_result_to_string(code)
                )))
            }
        }

        let mut context: CUcontext = ptr::null_mut();
        // SAFETY: device is valid, context is a valid out-pointer
        let result = unsafe { cuCtxCreate_v2(&mut context, 0, device) };
        if result != CUDA_SUCCESS {
            return Err(CudaError::DeviceInitError(format!(
                "cuCtxCreate_v2 failed for device {}: {}",
                ordinal,
                cuda_result_to_string(result)
            )));
        }

        tracing::debug!(ordinal, "CUDA context created");
        Ok(Self {
            device,
            context,
            ordinal,
        })
    }

    /// Bind this device's context to the calling thread.
    pub fn make_current(&self) -> CudaResult<()> {
        // SAFETY: context is valid for the lifetime of self
        let result = unsafe { cuCtxSetCurrent(self.context) };
        if result != CUDA_SUCCESS {
            return Err(CudaError::DeviceLost(format!(
                "cuCtxSetCurrent failed: {}",
                cuda_result_to_string(result)
            )));
        }
        Ok(())
    }

    /// Block until all queued work has completed.
    ///
    /// Asynchronous kernel faults surface here.
    pub fn synchronize(&self) -> CudaResult<()> {
        // SAFETY: caller has made the context current
        let result = unsafe { cuCtxSynchronize() };
        if result != CUDA_SUCCESS {
            return Err(CudaError::KernelError(format!(
                "cuCtxSynchronize failed: {}",
                cuda_result_to_string(result)
            )));
        }
        Ok(())
    }

    fn attribute(&self, attribute: i32) -> u32 {
        let mut value: i32 = 0;
        // SAFETY: device is valid, value is a valid out-pointer
        unsafe {
            cuDeviceGetAttribute(&mut value, attribute, self.device);
        }
        value.max(0) as u32
    }

    /// Device name, e.g. "NVIDIA GeForce RTX 4090".
    #[must_use]
    pub fn name(&self) -> String {
        let mut name_buf = [0 as std::os::raw::c_char; 256];
        // SAFETY: buffer is valid and its length is passed
        let result =
            unsafe { cuDeviceGetName(name_buf.as_mut_ptr(), name_buf.len() as i32, self.device) };
        if result != CUDA_SUCCESS {
            return format!("GPU {} (name query failed)", self.ordinal);
        }
        // SAFETY: cuDeviceGetName null-terminates on success
        let c_str = unsafe { CStr::from_ptr(name_buf.as_ptr()) };
        c_str.to_string_lossy().into_owned()
    }

    /// Name, compute capability and launch limits.
    #[must_use]
    pub fn info(&self) -> DeviceInfo {
        DeviceInfo {
            ordinal: self.ordinal,
            name: self.name(),
            compute_capability: (
                self.attribute(CU_DEVICE_ATTRIBUTE_COMPUTE_CAPABILITY_MAJOR),
                self.attribute(CU_DEVICE_ATTRIBUTE_COMPUTE_CAPABILITY_MINOR),
            ),
            max_threads_per_block: self.attribute(CU_DEVICE_ATTRIBUTE_MAX_THREADS_PER_BLOCK),
        }
    }

    /// `(free_bytes, total_bytes)`; free memory is approximate.
    pub fn memory_info(&self) -> CudaResult<(usize, usize)> {
        self.make_current()?;
        let mut free: usize = 0;
        let mut total: usize = 0;
        // SAFETY: context is current, pointers are valid
        let result = unsafe { cuMemGetInfo_v2(&mut free, &mut total) };
        if result != CUDA_SUCCESS {
            return Err(CudaError::DeviceLost(format!(
                "cuMemGetInfo_v2 failed: {}",
                cuda_result_to_string(result)
            )));
        }
        Ok((free, total))
    }

    #[inline]
    #[must_use]
    pub fn ordinal(&self) -> i32 {
        self.ordinal
    }
}

impl Drop for GpuDevice {
    fn drop(&mut self) {
        if self.context.is_null() {
            return;
        }
        // SAFETY: context was created in new() and is destroyed exactly once
        let result = unsafe { cuCtxDestroy_v2(self.context) };
        if result != CUDA_SUCCESS {
            tracing::warn!(
                ordinal = self.ordinal,
                error = %cuda_result_to_string(result),
                "cuCtxDestroy_v2 failed"
            );
        }
    }
}

// SAFETY: the context handle is owned and may be bound from any thread.
unsafe impl Send for GpuDevice {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[ignore = "requires a CUDA device"]
    fn test_gpu_device_creation() {
        let device = GpuDevice::new(0).expect("GPU device creation failed");
        let info = device.info();
        assert!(!info.name.is_empty());
        assert!(info.max_threads_per_block >= 256);

        let (free, total) = device.memory_info().expect("memory_info failed");
        assert!(total > 0);
        assert!(free <= total);
    }

    #[test]
    #[ignore = "requires a CUDA device"]
    fn test_gpu_device_invalid_ordinal() {
        match GpuDevice::new(999) {
            Err(CudaError::DeviceInitError(msg)) => assert!(msg.contains("999")),
            Err(CudaError::NoDevice) => {}
            other => panic!("expected DeviceInitError or NoDevice, got {:?}", other),
        }
    }
}
