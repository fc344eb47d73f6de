//! Device allocations tied to a shared context.

use std::ffi::c_void;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::error::{CudaError, CudaResult};
use crate::ffi::cuda_driver::{
    cuMemAlloc_v2, cuMemFree_v2, cuMemcpyDtoH_v2, cuMemcpyHtoD_v2, cuMemsetD32_v2, CUdeviceptr,
    CUDA_ERROR_OUT_OF_MEMORY, CUDA_SUCCESS,
};
use crate::ffi::cuda_result_to_string;
use crate::safe::GpuDevice;

/// A device plus the lock that serializes dispatch on it.
///
/// The context outlives every allocation and module because each holds an
/// `Arc` to this.
pub(crate) struct DeviceShared {
    pub(crate) device: GpuDevice,
    dispatch: Mutex<()>,
}

// SAFETY: driver calls are thread-safe once the context is current on the
// calling thread; every entry point re-binds it, and kernel dispatch is
// serialized through `dispatch`.
unsafe impl Sync for DeviceShared {}

impl DeviceShared {
    pub(crate) fn new(device: GpuDevice) -> Arc<Self> {
        Arc::new(Self {
            device,
            dispatch: Mutex::new(()),
        })
    }

    /// Take the dispatch lock and bind the context to this thread.
    pub(crate) fn lock(&self) -> CudaResult<MutexGuard<'_, ()>> {
        let guard = self
            .dispatch
            .lock()
            .map_err(|_| CudaError::DeviceLost("dispatch lock poisoned".to_string()))?;
        self.device.make_current()?;
        Ok(guard)
    }

    /// Allocate `bytes` of device memory. Caller holds the dispatch lock.
    pub(crate) fn alloc(self: &Arc<Self>, bytes: usize) -> CudaResult<DeviceAllocation> {
        let mut ptr: CUdeviceptr = 0;
        // Zero-byte allocations are rejected by the driver.
        let request = bytes.max(std::mem::size_of::<u32>());
        // SAFETY: context is current, ptr is a valid out-pointer
        let result = unsafe { cuMemAlloc_v2(&mut ptr, request) };
        match result {
            CUDA_SUCCESS => {}
            CUDA_ERROR_OUT_OF_MEMORY => {
                let available = self.device.memory_info().map(|(free, _)| free).unwrap_or(0);
                return Err(CudaError::OutOfMemory {
                    requested: request,
                    available,
                });
            }
            code => {
                return Err(CudaError::TransferError(format!(
                    "cuMemAlloc_v2({}) failed: {}",
                    request,
                    cuda_result_to_string(code)
                )))
            }
        }

        let allocation = DeviceAllocation {
            ptr,
            bytes: request,
            shared: Arc::clone(self),
        };
        // SAFETY: ptr covers `request` bytes, a multiple of 4
        let result = unsafe { cuMemsetD32_v2(ptr, 0, request / std::mem::size_of::<u32>()) };
        check(result, "cuMemsetD32_v2")?;
        Ok(allocation)
    }
}

impl fmt::Debug for DeviceShared {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceShared")
            .field("ordinal", &self.device.ordinal())
            .finish()
    }
}

pub(crate) fn check(result: i32, call: &str) -> CudaResult<()> {
    if result == CUDA_SUCCESS {
        Ok(())
    } else {
        Err(CudaError::TransferError(format!(
            "{} failed: {}",
            call,
            cuda_result_to_string(result)
        )))
    }
}

/// Owned device memory; freed on drop.
pub(crate) struct DeviceAllocation {
    ptr: CUdeviceptr,
    bytes: usize,
    shared: Arc<DeviceShared>,
}

impl DeviceAllocation {
    #[inline]
    pub(crate) fn ptr(&self) -> CUdeviceptr {
        self.ptr
    }

    fn check_span(&self, offset_bytes: usize, len_bytes: usize) -> CudaResult<()> {
        match offset_bytes.checked_add(len_bytes) {
            Some(end) if end <= self.bytes => Ok(()),
            _ => Err(CudaError::DimensionMismatch {
                expected: offset_bytes.saturating_add(len_bytes),
                actual: self.bytes,
            }),
        }
    }

    /// Copy `src` to `offset_bytes`. Caller holds the dispatch lock.
    pub(crate) fn write<T: Copy>(&self, offset_bytes: usize, src: &[T]) -> CudaResult<()> {
        let len = std::mem::size_of_val(src);
        if len == 0 {
            return Ok(());
        }
        self.check_span(offset_bytes, len)?;
        // SAFETY: span checked, src is a valid host slice
        let result = unsafe {
            cuMemcpyHtoD_v2(
                self.ptr + offset_bytes as u64,
                src.as_ptr() as *const c_void,
                len,
            )
        };
        check(result, "cuMemcpyHtoD_v2")
    }

    /// Copy from `offset_bytes` into `dst`. Caller holds the dispatch lock.
    pub(crate) fn read<T: Copy>(&self, offset_bytes: usize, dst: &mut [T]) -> CudaResult<()> {
        let len = std::mem::size_of_val(dst);
        if len == 0 {
            return Ok(());
        }
        self.check_span(offset_bytes, len)?;
        // SAFETY: span checked, dst is a valid host slice of plain data
        let result = unsafe {
            cuMemcpyDtoH_v2(
                dst.as_mut_ptr() as *mut c_void,
                self.ptr + offset_bytes as u64,
                len,
            )
        };
        check(result, "cuMemcpyDtoH_v2")
    }

    #[inline]
    pub(crate) fn bytes(&self) -> usize {
        self.bytes
    }
}

impl Drop for DeviceAllocation {
    fn drop(&mut self) {
        if let Err(e) = self.shared.device.make_current() {
            tracing::warn!(error = %e, "leaking device allocation: context unavailable");
            return;
        }
        // SAFETY: ptr was returned by cuMemAlloc_v2 and is freed exactly once
        let result = unsafe { cuMemFree_v2(self.ptr) };
        if result != CUDA_SUCCESS {
            tracing::warn!(
                bytes = self.bytes,
                error = %cuda_result_to_string(result),
                "cuMemFree_v2 failed"
            );
        }
    }
}

impl fmt::Debug for DeviceAllocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceAllocation")
            .field("ptr", &format_args!("{:#x}", self.ptr))
            .field("bytes", &self.bytes)
            .finish()
    }
}
