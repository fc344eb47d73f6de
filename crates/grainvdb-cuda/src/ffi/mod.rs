//! CUDA driver API bindings.
//!
//! All `extern "C"` declarations for libcuda live in [`cuda_driver`]. Without
//! the `cuda` feature only the result-code constants are available, so error
//! mapping code compiles on every target.
//!
//! # Safety
//!
//! Every binding is unsafe FFI. Callers must ensure:
//! - `cuInit` has been called (see [`crate::safe::GpuDevice::new`])
//! - the owning context is current on the calling thread
//! - device pointers were allocated in that context and are large enough

#[cfg(feature = "cuda")]
pub mod cuda_driver;

#[cfg(not(feature = "cuda"))]
mod cuda_driver_stub {
    pub type CUresult = i32;
    pub const CUDA_SUCCESS: CUresult = 0;
    pub const CUDA_ERROR_OUT_OF_MEMORY: CUresult = 2;
    pub const CUDA_ERROR_NOT_INITIALIZED: CUresult = 3;
    pub const CUDA_ERROR_NO_DEVICE: CUresult = 100;
    pub const CUDA_ERROR_INVALID_DEVICE: CUresult = 101;
    pub const CUDA_ERROR_INVALID_IMAGE: CUresult = 200;
    pub const CUDA_ERROR_FILE_NOT_FOUND: CUresult = 301;
    pub const CUDA_ERROR_NOT_FOUND: CUresult = 500;
}

#[cfg(feature = "cuda")]
pub use cuda_driver::*;
#[cfg(not(feature = "cuda"))]
pub use cuda_driver_stub::*;

/// Human-readable name for a driver result code.
///
/// # Example
///
/// ```
/// use grainvdb_cuda::ffi::{cuda_result_to_string, CUDA_ERROR_NO_DEVICE};
/// assert!(cuda_result_to_string(CUDA_ERROR_NO_DEVICE).contains("100"));
/// ```
#[must_use]
pub fn cuda_result_to_string(result: CUresult) -> String {
    let name = match result {
        CUDA_SUCCESS => "CUDA_SUCCESS",
        CUDA_ERROR_OUT_OF_MEMORY => "CUDA_ERROR_OUT_OF_MEMORY",
        CUDA_ERROR_NOT_INITIALIZED => "CUDA_ERROR_NOT_INITIALIZED",
        CUDA_ERROR_NO_DEVICE => "CUDA_ERROR_NO_DEVICE",
        CUDA_ERROR_INVALID_DEVICE => "CUDA_ERROR_INVALID_DEVICE",
        CUDA_ERROR_INVALID_IMAGE => "CUDA_ERROR_INVALID_IMAGE",
        CUDA_ERROR_FILE_NOT_FOUND => "CUDA_ERROR_FILE_NOT_FOUND",
        CUDA_ERROR_NOT_FOUND => "CUDA_ERROR_NOT_FOUND",
        _ => "CUDA_ERROR_UNKNOWN",
    };
    format!("{} ({})", name, result)
}

/// Whether a driver result code indicates success.
#[inline]
#[must_use]
pub const fn is_cuda_success(result: CUresult) -> bool {
    result == CUDA_SUCCESS
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_result_names() {
        assert_eq!(cuda_result_to_string(CUDA_SUCCESS), "CUDA_SUCCESS (0)");
        assert!(cuda_result_to_string(CUDA_ERROR_OUT_OF_MEMORY).contains("OUT_OF_MEMORY"));
        assert!(cuda_result_to_string(CUDA_ERROR_NOT_FOUND).contains("500"));
        assert!(cuda_result_to_string(9999).contains("UNKNOWN"));
    }

    #[test]
    fn test_is_cuda_success() {
        assert!(is_cuda_success(CUDA_SUCCESS));
        assert!(!is_cuda_success(CUDA_ERROR_INVALID_IMAGE));
    }

    #[test]
    fn test_constants_match_cuda_header() {
        // Values from cuda.h.
        assert_eq!(CUDA_ERROR_OUT_OF_MEMORY, 2);
        assert_eq!(CUDA_ERROR_NO_DEVICE, 100);
        assert_eq!(CUDA_ERROR_INVALID_IMAGE, 200);
        assert_eq!(CUDA_ERROR_FILE_NOT_FOUND, 301);
        assert_eq!(CUDA_ERROR_NOT_FOUND, 500);
    }
}
