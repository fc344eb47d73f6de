//! [`CudaBackend`]: driver-API implementation of [`ComputeBackend`].

use std::collections::BTreeMap;
use std::ffi::{c_void, CString};
use std::fmt;
use std::path::Path;
use std::ptr;
use std::sync::Arc;
use std::time::Instant;

use crate::backend::{ComputeBackend, ManifoldView, Timed};
use crate::buffer::DeviceBuffer;
use crate::error::{CudaError, CudaResult};
use crate::ffi::cuda_driver::{
    cuLaunchKernel, cuMemcpyDtoD_v2, cuModuleGetFunction, cuModuleLoad, cuModuleUnload,
    CUfunction, CUmodule, CUDA_ERROR_NOT_FOUND, CUDA_SUCCESS,
};
use crate::ffi::cuda_result_to_string;
use crate::kernel::{EntryPoint, KernelModule, BLOCK_SIZE, MAX_SELECT_BLOCKS};
use crate::safe::GpuDevice;
use crate::select::{merge_candidates, ScoredId};

use super::memory::{check, DeviceShared};

const F32: usize = std::mem::size_of::<f32>();
const U64: usize = std::mem::size_of::<u64>();

/// Loaded module plus its resolved functions. Unloaded on drop.
struct LoadedModule {
    handle: CUmodule,
    functions: BTreeMap<EntryPoint, CUfunction>,
    shared: Arc<DeviceShared>,
}

// SAFETY: module and function handles are context-scoped identifiers; every
// use re-binds the context under the dispatch lock.
unsafe impl Send for LoadedModule {}
unsafe impl Sync for LoadedModule {}

impl Drop for LoadedModule {
    fn drop(&mut self) {
        if self.shared.device.make_current().is_err() {
            return;
        }
        // SAFETY: handle came from cuModuleLoad and is unloaded exactly once
        let result = unsafe { cuModuleUnload(self.handle) };
        if result != CUDA_SUCCESS {
            tracing::warn!(error = %cuda_result_to_string(result), "cuModuleUnload failed");
        }
    }
}

/// Compute backend driving one CUDA device.
///
/// The kernel module is loaded from a file at construction. Missing entry
/// points do not fail the load; dispatching one fails with
/// [`CudaError::MissingEntryPoint`].
pub struct CudaBackend {
    name: String,
    module: KernelModule,
    loaded: LoadedModule,
    shared: Arc<DeviceShared>,
}

impl fmt::Debug for CudaBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CudaBackend")
            .field("name", &self.name)
            .field("module", &self.module)
            .finish()
    }
}

fn to_u32(value: usize, what: &str) -> CudaResult<u32> {
    u32::try_from(value)
        .map_err(|_| CudaError::InvalidConfig(format!("{} = {} exceeds u32 launch limit", what, value)))
}

fn grid_for(rows: usize) -> CudaResult<u32> {
    to_u32(rows.div_ceil(BLOCK_SIZE as usize).max(1), "grid")
}

impl CudaBackend {
    /// Open device `ordinal` and load the kernel module at `path`.
    ///
    /// # Errors
    ///
    /// - `NoDevice` / `DeviceInitError` if the device cannot be opened
    /// - `ModuleLoad` if the file is missing or not a valid module image
    pub fn load(ordinal: i32, path: &Path) -> CudaResult<Self> {
        let location = path.display().to_string();
        let module_err = |reason: String| CudaError::ModuleLoad {
            location: location.clone(),
            reason,
        };

        if !path.is_file() {
            return Err(module_err("file not found".to_string()));
        }
        let c_path = path
            .to_str()
            .and_then(|s| CString::new(s).ok())
            .ok_or_else(|| module_err("path is not valid UTF-8 without NUL bytes".to_string()))?;

        let device = GpuDevice::new(ordinal)?;
        let info = device.info();
        let shared = DeviceShared::new(device);
        let _guard = shared.lock()?;

        let mut handle: CUmodule = ptr::null_mut();
        // SAFETY: context is current, c_path is NUL-terminated
        let result = unsafe { cuModuleLoad(&mut handle, c_path.as_ptr()) };
        if result != CUDA_SUCCESS {
            return Err(module_err(cuda_result_to_string(result)));
        }
        let mut loaded = LoadedModule {
            handle,
            functions: BTreeMap::new(),
            shared: Arc::clone(&shared),
        };

        for entry in EntryPoint::all() {
            let symbol = CString::new(entry.symbol())
                .map_err(|_| module_err(format!("invalid symbol {}", entry)))?;
            let mut function: CUfunction = ptr::null_mut();
            // SAFETY: module handle is valid, symbol is NUL-terminated
            let result = unsafe { cuModuleGetFunction(&mut function, handle, symbol.as_ptr()) };
            match result {
                CUDA_SUCCESS => {
                    loaded.functions.insert(entry, function);
                }
                CUDA_ERROR_NOT_FOUND => {
                    tracing::warn!(module = %location, entry_point = %entry, "entry point not found");
                }
                code => return Err(module_err(cuda_result_to_string(code))),
            }
        }

        let module = KernelModule::from_entry_points(location, loaded.functions.keys().copied());
        drop(_guard);

        tracing::info!(
            device = %info.name,
            ordinal,
            compute_capability = ?info.compute_capability,
            module = %module.location(),
            entry_points = loaded.functions.len(),
            "CUDA backend ready"
        );

        Ok(Self {
            name: format!("CUDA {} (device {})", info.name, ordinal),
            module,
            loaded,
            shared,
        })
    }

    /// Launch `entry` and block until it completes. Caller holds the dispatch lock.
    fn launch(&self, entry: EntryPoint, grid: u32, params: &mut [*mut c_void]) -> CudaResult<f64> {
        self.module.require(entry)?;
        let function = self
            .loaded
            .functions
            .get(&entry)
            .copied()
            .ok_or_else(|| CudaError::KernelError(format!("{} not resolved", entry)))?;

        let start = Instant::now();
        // SAFETY: function belongs to the current context; params point to
        // live locals matching the kernel ABI for `entry`
        let result = unsafe {
            cuLaunchKernel(
                function,
                grid,
                1,
                1,
                BLOCK_SIZE,
                1,
                1,
                0,
                ptr::null_mut(),
                params.as_mut_ptr(),
                ptr::null_mut(),
            )
        };
        if result != CUDA_SUCCESS {
            return Err(CudaError::KernelError(format!(
                "cuLaunchKernel({}) failed: {}",
                entry,
                cuda_result_to_string(result)
            )));
        }
        self.shared.device.synchronize()?;
        Ok(start.elapsed().as_secs_f64() * 1000.0)
    }
}

macro_rules! param {
    ($value:expr) => {
        &mut $value as *mut _ as *mut c_void
    };
}

impl ComputeBackend for CudaBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn module(&self) -> &KernelModule {
        &self.module
    }

    fn allocate(&self, len: usize) -> CudaResult<DeviceBuffer> {
        let bytes = len.checked_mul(F32).ok_or(CudaError::OutOfMemory {
            requested: usize::MAX,
            available: 0,
        })?;
        let _guard = self.shared.lock()?;
        let allocation = self.shared.alloc(bytes)?;
        Ok(DeviceBuffer::cuda(len, allocation))
    }

    fn upload(&self, dst: &mut DeviceBuffer, offset: usize, src: &[f32]) -> CudaResult<()> {
        let allocation = dst.as_cuda()?;
        let _guard = self.shared.lock()?;
        allocation.write(offset * F32, src)
    }

    fn copy_prefix(&self, src: &DeviceBuffer, dst: &mut DeviceBuffer, len: usize) -> CudaResult<()> {
        let from = src.as_cuda()?;
        let to = dst.as_cuda()?;
        let bytes = len * F32;
        if bytes > from.bytes() || bytes > to.bytes() {
            return Err(CudaError::DimensionMismatch {
                expected: len,
                actual: src.len().min(dst.len()),
            });
        }
        if bytes == 0 {
            return Ok(());
        }
        let _guard = self.shared.lock()?;
        // SAFETY: both spans checked, allocations live in this context
        let result = unsafe { cuMemcpyDtoD_v2(to.ptr(), from.ptr(), bytes) };
        check(result, "cuMemcpyDtoD_v2")
    }

    fn download(&self, src: &DeviceBuffer, offset: usize, dst: &mut [f32]) -> CudaResult<()> {
        let allocation = src.as_cuda()?;
        let _guard = self.shared.lock()?;
        allocation.read(offset * F32, dst)
    }

    fn score(&self, manifold: ManifoldView<'_>, probe: &[f32]) -> CudaResult<Timed<DeviceBuffer>> {
        self.module.require(EntryPoint::SimilarityScore)?;
        if probe.len() != manifold.rank {
            return Err(CudaError::DimensionMismatch {
                expected: manifold.rank,
                actual: probe.len(),
            });
        }
        let rows_buffer = manifold.buffer.as_cuda()?;
        let mut rows = to_u32(manifold.rows, "rows")?;
        let mut rank = to_u32(manifold.rank, "rank")?;
        let grid = grid_for(manifold.rows)?;

        let _guard = self.shared.lock()?;
        let probe_buffer = self.shared.alloc(probe.len() * F32)?;
        probe_buffer.write(0, probe)?;
        let magnitudes = self.shared.alloc(manifold.rows * F32)?;

        let mut manifold_ptr = rows_buffer.ptr();
        let mut probe_ptr = probe_buffer.ptr();
        let mut out_ptr = magnitudes.ptr();
        let mut params = [
            param!(manifold_ptr),
            param!(probe_ptr),
            param!(out_ptr),
            param!(rows),
            param!(rank),
        ];
        let elapsed_ms = self.launch(EntryPoint::SimilarityScore, grid, &mut params)?;

        Ok(Timed {
            value: DeviceBuffer::cuda(manifold.rows, magnitudes),
            elapsed_ms,
        })
    }

    fn select_top_k(
        &self,
        magnitudes: &DeviceBuffer,
        rows: usize,
        k: usize,
    ) -> CudaResult<Timed<Vec<ScoredId>>> {
        self.module.require(EntryPoint::PartialTopK)?;
        if rows > magnitudes.len() {
            return Err(CudaError::DimensionMismatch {
                expected: rows,
                actual: magnitudes.len(),
            });
        }
        let k = k.min(rows);
        if k == 0 {
            return Ok(Timed {
                value: Vec::new(),
                elapsed_ms: 0.0,
            });
        }
        let source = magnitudes.as_cuda()?;

        // Each block emits k candidates; keep the candidate pool near `rows`.
        let blocks = rows
            .div_ceil(BLOCK_SIZE as usize)
            .min(MAX_SELECT_BLOCKS as usize)
            .min((rows / k).max(1));
        let slots = blocks * k;

        let _guard = self.shared.lock()?;
        let candidate_ids = self.shared.alloc(slots * U64)?;
        let candidate_mags = self.shared.alloc(slots * F32)?;

        let mut in_ptr = source.ptr();
        let mut rows_u32 = to_u32(rows, "rows")?;
        let mut k_u32 = to_u32(k, "k")?;
        let mut ids_ptr = candidate_ids.ptr();
        let mut mags_ptr = candidate_mags.ptr();
        let mut params = [
            param!(in_ptr),
            param!(rows_u32),
            param!(k_u32),
            param!(ids_ptr),
            param!(mags_ptr),
        ];
        let elapsed_ms = self.launch(EntryPoint::PartialTopK, to_u32(blocks, "blocks")?, &mut params)?;

        let mut ids = vec![0u64; slots];
        let mut mags = vec![0f32; slots];
        candidate_ids.read(0, &mut ids)?;
        candidate_mags.read(0, &mut mags)?;

        let value = merge_candidates(
            ids.into_iter()
                .zip(mags)
                .map(|(id, magnitude)| ScoredId::new(id, magnitude)),
            k,
        );
        Ok(Timed { value, elapsed_ms })
    }

    fn density_audit(
        &self,
        manifold: ManifoldView<'_>,
        anchor: u64,
        members: &[u64],
    ) -> CudaResult<Timed<Vec<u64>>> {
        self.module.require(EntryPoint::DensityAudit)?;
        let rows = manifold.rows as u64;
        if let Some(&bad) = std::iter::once(&anchor).chain(members).find(|&&id| id >= rows) {
            return Err(CudaError::InvalidConfig(format!(
                "row id {} out of range for {} rows",
                bad, rows
            )));
        }
        if members.is_empty() {
            return Ok(Timed {
                value: Vec::new(),
                elapsed_ms: 0.0,
            });
        }
        let rows_buffer = manifold.buffer.as_cuda()?;
        let grid = grid_for(manifold.rows)?;

        let _guard = self.shared.lock()?;
        let member_buffer = self.shared.alloc(members.len() * U64)?;
        member_buffer.write(0, members)?;
        let counts = self.shared.alloc(members.len() * U64)?;

        let mut manifold_ptr = rows_buffer.ptr();
        let mut rows_u32 = to_u32(manifold.rows, "rows")?;
        let mut rank_u32 = to_u32(manifold.rank, "rank")?;
        let mut anchor_id = anchor;
        let mut members_ptr = member_buffer.ptr();
        let mut n_members = to_u32(members.len(), "members")?;
        let mut counts_ptr = counts.ptr();
        let mut params = [
            param!(manifold_ptr),
            param!(rows_u32),
            param!(rank_u32),
            param!(anchor_id),
            param!(members_ptr),
            param!(n_members),
            param!(counts_ptr),
        ];
        let elapsed_ms = self.launch(EntryPoint::DensityAudit, grid, &mut params)?;

        let mut value = vec![0u64; members.len()];
        counts.read(0, &mut value)?;
        Ok(Timed { value, elapsed_ms })
    }
}
