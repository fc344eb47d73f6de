//! Raw libcuda declarations.
//!
//! Only the driver entry points GrainVDB needs: device and context setup,
//! module loading, linear memory, and kernel launch. The driver API loads
//! PTX/cubin at runtime, so kernel modules are not linked into the binary.

#![allow(non_camel_case_types)]

use std::ffi::c_void;
use std::os::raw::{c_char, c_int, c_uint};

// =============================================================================
// TYPE ALIASES
// =============================================================================

/// CUDA result code. 0 = success.
pub type CUresult = c_int;

/// Device handle (ordinal-based).
pub type CUdevice = c_int;

/// Device attribute enumeration.
pub type CUdevice_attribute = c_int;

/// Context handle.
pub type CUcontext = *mut c_void;

/// Loaded module handle.
pub type CUmodule = *mut c_void;

/// Kernel function handle.
pub type CUfunction = *mut c_void;

/// Stream handle; null is the legacy default stream.
pub type CUstream = *mut c_void;

/// Device pointer.
pub type CUdeviceptr = u64;

// =============================================================================
// RESULT CODES
// =============================================================================

pub const CUDA_SUCCESS: CUresult = 0;
pub const CUDA_ERROR_OUT_OF_MEMORY: CUresult = 2;
pub const CUDA_ERROR_NOT_INITIALIZED: CUresult = 3;
pub const CUDA_ERROR_NO_DEVICE: CUresult = 100;
pub const CUDA_ERROR_INVALID_DEVICE: CUresult = 101;
pub const CUDA_ERROR_INVALID_IMAGE: CUresult = 200;
pub const CUDA_ERROR_FILE_NOT_FOUND: CUresult = 301;
/// Returned by `cuModuleGetFunction` when the symbol is absent.
pub const CUDA_ERROR_NOT_FOUND: CUresult = 500;

// =============================================================================
// DEVICE ATTRIBUTE CONSTANTS
// =============================================================================

pub const CU_DEVICE_ATTRIBUTE_MAX_THREADS_PER_BLOCK: CUdevice_attribute = 1;
pub const CU_DEVICE_ATTRIBUTE_COMPUTE_CAPABILITY_MAJOR: CUdevice_attribute = 75;
pub const CU_DEVICE_ATTRIBUTE_COMPUTE_CAPABILITY_MINOR: CUdevice_attribute = 76;

// =============================================================================
// FFI DECLARATIONS
// =============================================================================

#[link(name = "cuda")]
extern "C" {
    // ----- Initialization and devices -----

    /// Initialize the driver. Must precede every other call; `flags` must be 0.
    pub fn cuInit(flags: c_uint) -> CUresult;

    /// Device handle for `ordinal`.
    pub fn cuDeviceGet(device: *mut CUdevice, ordinal: c_int) -> CUresult;

    /// Number of visible devices.
    pub fn cuDeviceGetCount(count: *mut c_int) -> CUresult;

    pub fn cuDeviceGetAttribute(
        pi: *mut c_int,
        attrib: CUdevice_attribute,
        dev: CUdevice,
    ) -> CUresult;

    /// Null-terminated device name; `len` includes the terminator.
    pub fn cuDeviceGetName(name: *mut c_char, len: c_int, dev: CUdevice) -> CUresult;

    // ----- Contexts -----

    pub fn cuCtxCreate_v2(pctx: *mut CUcontext, flags: c_uint, dev: CUdevice) -> CUresult;

    pub fn cuCtxDestroy_v2(ctx: CUcontext) -> CUresult;

    /// Bind `ctx` to the calling thread.
    pub fn cuCtxSetCurrent(ctx: CUcontext) -> CUresult;

    /// Block until all work in the current context has finished.
    pub fn cuCtxSynchronize() -> CUresult;

    /// Free and total bytes in the current context.
    pub fn cuMemGetInfo_v2(free: *mut usize, total: *mut usize) -> CUresult;

    // ----- Modules -----

    /// Load a PTX, cubin or fatbin file into the current context.
    pub fn cuModuleLoad(module: *mut CUmodule, fname: *const c_char) -> CUresult;

    pub fn cuModuleUnload(hmod: CUmodule) -> CUresult;

    /// Resolve a kernel by symbol; `CUDA_ERROR_NOT_FOUND` if absent.
    pub fn cuModuleGetFunction(
        hfunc: *mut CUfunction,
        hmod: CUmodule,
        name: *const c_char,
    ) -> CUresult;

    // ----- Memory -----

    pub fn cuMemAlloc_v2(dptr: *mut CUdeviceptr, bytesize: usize) -> CUresult;

    pub fn cuMemFree_v2(dptr: CUdeviceptr) -> CUresult;

    pub fn cuMemsetD32_v2(dst: CUdeviceptr, ui: c_uint, n: usize) -> CUresult;

    pub fn cuMemcpyHtoD_v2(dst: CUdeviceptr, src: *const c_void, bytes: usize) -> CUresult;

    pub fn cuMemcpyDtoH_v2(dst: *mut c_void, src: CUdeviceptr, bytes: usize) -> CUresult;

    pub fn cuMemcpyDtoD_v2(dst: CUdeviceptr, src: CUdeviceptr, bytes: usize) -> CUresult;

    // ----- Execution -----

    /// Launch `f` on a `grid` of `block`-sized blocks.
    ///
    /// `kernel_params` points to an array of pointers, one per kernel argument.
    #[allow(clippy::too_many_arguments)]
    pub fn cuLaunchKernel(
        f: CUfunction,
        grid_dim_x: c_uint,
        grid_dim_y: c_uint,
        grid_dim_z: c_uint,
        block_dim_x: c_uint,
        block_dim_y: c_uint,
        block_dim_z: c_uint,
        shared_mem_bytes: c_uint,
        h_stream: CUstream,
        kernel_params: *mut *mut c_void,
        extra: *mut *mut c_void,
    ) -> CUresult;
}
