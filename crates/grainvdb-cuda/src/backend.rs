//! The compute backend capability interface.
//!
//! Engine code is written against [`ComputeBackend`] only. A backend owns a
//! loaded [`KernelModule`], allocates [`DeviceBuffer`]s, and runs the three
//! GrainVDB kernels. Every dispatch blocks until the device has finished and
//! reports the elapsed time of launch plus synchronization.
//!
//! ```text
//! grainvdb-engine (store, query, audit)
//!   │
//!   ├── ComputeBackend::score()          ← gv_similarity_score
//!   ├── ComputeBackend::select_top_k()   ← gv_partial_top_k
//!   └── ComputeBackend::density_audit()  ← gv_density_audit
//!         │
//!         ├── CpuBackend    (rayon, always available)
//!         └── CudaBackend   (driver API, feature = "cuda")
//! ```

use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use crate::buffer::DeviceBuffer;
use crate::cpu::CpuBackend;
use crate::error::{CudaError, CudaResult};
use crate::kernel::KernelModule;
use crate::select::ScoredId;

/// A dispatch result paired with its elapsed device time.
#[derive(Debug, Clone, PartialEq)]
pub struct Timed<T> {
    /// Kernel output.
    pub value: T,
    /// Launch plus synchronization, in milliseconds.
    pub elapsed_ms: f64,
}

impl<T> Timed<T> {
    /// Run `f` and measure it.
    pub fn measure(f: impl FnOnce() -> CudaResult<T>) -> CudaResult<Self> {
        let start = Instant::now();
        let value = f()?;
        Ok(Self {
            value,
            elapsed_ms: start.elapsed().as_secs_f64() * 1000.0,
        })
    }

    /// Transform the value, keeping the timing.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Timed<U> {
        Timed {
            value: f(self.value),
            elapsed_ms: self.elapsed_ms,
        }
    }
}

/// Borrowed view of the manifold rows that are currently valid.
///
/// `buffer` may be larger than `rows * rank`; trailing capacity is ignored.
#[derive(Debug, Clone, Copy)]
pub struct ManifoldView<'a> {
    pub buffer: &'a DeviceBuffer,
    pub rows: usize,
    pub rank: usize,
}

impl<'a> ManifoldView<'a> {
    /// View over the first `rows` rows of `buffer`.
    ///
    /// # Errors
    ///
    /// `DimensionMismatch` if the buffer cannot hold `rows * rank` elements.
    pub fn new(buffer: &'a DeviceBuffer, rows: usize, rank: usize) -> CudaResult<Self> {
        let required = rows.checked_mul(rank).ok_or_else(|| {
            CudaError::InvalidConfig(format!("{} rows of rank {} overflow usize", rows, rank))
        })?;
        if buffer.len() < required {
            return Err(CudaError::DimensionMismatch {
                expected: required,
                actual: buffer.len(),
            });
        }
        Ok(Self { buffer, rows, rank })
    }

    /// Number of valid elements.
    #[inline]
    pub fn element_count(&self) -> usize {
        self.rows * self.rank
    }
}

/// Capability interface every compute backend implements.
///
/// Implementations must be `Send + Sync` so one backend can be shared by
/// several engine contexts behind an `Arc`. Dispatches are synchronous.
pub trait ComputeBackend: Send + Sync + fmt::Debug {
    /// Human-readable backend/device name.
    fn name(&self) -> &str;

    /// The loaded kernel module.
    fn module(&self) -> &KernelModule;

    /// Allocate a zero-initialised buffer of `len` `f32`s.
    fn allocate(&self, len: usize) -> CudaResult<DeviceBuffer>;

    /// Copy `src` into `dst` starting at element `offset`, blocking until done.
    fn upload(&self, dst: &mut DeviceBuffer, offset: usize, src: &[f32]) -> CudaResult<()>;

    /// Copy the first `len` elements of `src` into `dst`.
    fn copy_prefix(&self, src: &DeviceBuffer, dst: &mut DeviceBuffer, len: usize) -> CudaResult<()>;

    /// Copy `dst.len()` elements starting at `offset` back to the host.
    fn download(&self, src: &DeviceBuffer, offset: usize, dst: &mut [f32]) -> CudaResult<()>;

    /// Run `gv_similarity_score`: one magnitude per manifold row.
    fn score(&self, manifold: ManifoldView<'_>, probe: &[f32]) -> CudaResult<Timed<DeviceBuffer>>;

    /// Run `gv_partial_top_k` over the first `rows` magnitudes.
    ///
    /// Returns at most `k` entries, best first, ties broken by lower id.
    fn select_top_k(
        &self,
        magnitudes: &DeviceBuffer,
        rows: usize,
        k: usize,
    ) -> CudaResult<Timed<Vec<ScoredId>>>;

    /// Run `gv_density_audit`.
    ///
    /// For each member, counts manifold rows other than `anchor` whose
    /// magnitude against the anchor row is strictly greater than the member's.
    fn density_audit(
        &self,
        manifold: ManifoldView<'_>,
        anchor: u64,
        members: &[u64],
    ) -> CudaResult<Timed<Vec<u64>>>;
}

/// Which backend implementation to open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackendKind {
    /// Rayon-parallel reference backend.
    #[default]
    Cpu,
    /// CUDA driver backend (requires feature `cuda`).
    Cuda,
}

/// Parameters for [`open_backend`].
#[derive(Debug, Clone, Default)]
pub struct BackendOptions<'a> {
    pub kind: BackendKind,
    /// Compiled kernel module (PTX or cubin). Required for CUDA.
    pub module_path: Option<&'a Path>,
    /// Device ordinal for CUDA.
    pub device_ordinal: i32,
    /// Optional allocation budget in bytes (CPU backend only).
    pub memory_budget_bytes: Option<usize>,
}

/// Open a shareable backend handle.
///
/// # Errors
///
/// - `ModuleLoad` if the kernel module cannot be read or is missing
/// - `NoDevice` if CUDA is requested but unavailable or not compiled in
pub fn open_backend(options: &BackendOptions<'_>) -> CudaResult<Arc<dyn ComputeBackend>> {
    match options.kind {
        BackendKind::Cpu => {
            if let Some(path) = options.module_path {
                tracing::warn!(
                    module = %path.display(),
                    "CPU backend uses its built-in kernels; module path ignored"
                );
            }
            let backend = match options.memory_budget_bytes {
                Some(budget) => CpuBackend::with_memory_budget(budget),
                None => CpuBackend::new(),
            };
            Ok(Arc::new(backend))
        }
        BackendKind::Cuda => open_cuda(options),
    }
}

#[cfg(feature = "cuda")]
fn open_cuda(options: &BackendOptions<'_>) -> CudaResult<Arc<dyn ComputeBackend>> {
    let path = options.module_path.ok_or_else(|| CudaError::ModuleLoad {
        location: "<unset>".to_string(),
        reason: "CUDA backend requires a kernel module path".to_string(),
    })?;
    let backend = crate::cuda::CudaBackend::load(options.device_ordinal, path)?;
    Ok(Arc::new(backend))
}

#[cfg(not(feature = "cuda"))]
fn open_cuda(_options: &BackendOptions<'_>) -> CudaResult<Arc<dyn ComputeBackend>> {
    tracing::error!("CUDA backend requested but the `cuda` feature is not enabled");
    Err(CudaError::NoDevice)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timed_measure_and_map() {
        let timed = Timed::measure(|| Ok(21)).unwrap().map(|v| v * 2);
        assert_eq!(timed.value, 42);
        assert!(timed.elapsed_ms >= 0.0);
    }

    #[test]
    fn test_timed_measure_propagates_error() {
        let result: CudaResult<Timed<()>> = Timed::measure(|| Err(CudaError::NoDevice));
        assert_eq!(result.unwrap_err(), CudaError::NoDevice);
    }

    #[test]
    fn test_manifold_view_rejects_short_buffer() {
        let backend = CpuBackend::new();
        let buffer = backend.allocate(6).unwrap();
        assert!(ManifoldView::new(&buffer, 2, 3).is_ok());
        let err = ManifoldView::new(&buffer, 3, 3).unwrap_err();
        assert_eq!(
            err,
            CudaError::DimensionMismatch {
                expected: 9,
                actual: 6
            }
        );
    }

    #[test]
    fn test_open_cpu_backend() {
        let backend = open_backend(&BackendOptions::default()).unwrap();
        assert!(backend.name().contains("CPU"));
        assert_eq!(backend.module().location(), KernelModule::BUILTIN_LOCATION);
    }

    #[cfg(not(feature = "cuda"))]
    #[test]
    fn test_open_cuda_without_feature_fails() {
        let options = BackendOptions {
            kind: BackendKind::Cuda,
            ..BackendOptions::default()
        };
        assert_eq!(open_backend(&options).unwrap_err(), CudaError::NoDevice);
    }
}
