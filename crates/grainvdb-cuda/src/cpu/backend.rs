//! [`CpuBackend`]: the host implementation of [`ComputeBackend`].

use crate::backend::{ComputeBackend, ManifoldView, Timed};
use crate::buffer::{DeviceBuffer, MemoryLedger, MemoryStats};
use crate::error::{CudaError, CudaResult};
use crate::kernel::{EntryPoint, KernelModule};
use crate::select::ScoredId;

use super::kernels;

/// Rayon-parallel compute backend with an optional memory budget.
///
/// # Example
///
/// ```
/// use grainvdb_cuda::{ComputeBackend, CpuBackend, ManifoldView};
///
/// let backend = CpuBackend::new();
/// let mut manifold = backend.allocate(4).unwrap();
/// backend.upload(&mut manifold, 0, &[1.0, 0.0, 0.0, 1.0]).unwrap();
///
/// let view = ManifoldView::new(&manifold, 2, 2).unwrap();
/// let scores = backend.score(view, &[1.0, 0.0]).unwrap().value;
/// let top = backend.select_top_k(&scores, 2, 1).unwrap().value;
/// assert_eq!(top[0].id, 0);
/// ```
#[derive(Debug, Clone)]
pub struct CpuBackend {
    name: String,
    module: KernelModule,
    ledger: MemoryLedger,
}

impl CpuBackend {
    /// Backend with the built-in module and no memory budget.
    pub fn new() -> Self {
        Self {
            name: format!("CPU ({} threads)", rayon::current_num_threads()),
            module: KernelModule::builtin(),
            ledger: MemoryLedger::unbounded(),
        }
    }

    /// Backend that refuses allocations beyond `bytes` in total.
    pub fn with_memory_budget(bytes: usize) -> Self {
        Self {
            ledger: MemoryLedger::with_budget(bytes),
            ..Self::new()
        }
    }

    /// Replace the kernel module, e.g. one missing some entry points.
    pub fn with_module(mut self, module: KernelModule) -> Self {
        self.module = module;
        self
    }

    /// Current allocation accounting.
    pub fn memory_stats(&self) -> MemoryStats {
        self.ledger.stats()
    }
}

impl Default for CpuBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn check_range(offset: usize, len: usize, capacity: usize) -> CudaResult<()> {
    let end = offset
        .checked_add(len)
        .ok_or_else(|| CudaError::TransferError(format!("offset {} + {} overflows", offset, len)))?;
    if end > capacity {
        return Err(CudaError::DimensionMismatch {
            expected: end,
            actual: capacity,
        });
    }
    Ok(())
}

fn check_id(id: u64, rows: usize) -> CudaResult<usize> {
    usize::try_from(id)
        .ok()
        .filter(|&idx| idx < rows)
        .ok_or_else(|| CudaError::InvalidConfig(format!("row id {} out of range for {} rows", id, rows)))
}

impl ComputeBackend for CpuBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn module(&self) -> &KernelModule {
        &self.module
    }

    fn allocate(&self, len: usize) -> CudaResult<DeviceBuffer> {
        let bytes = len
            .checked_mul(std::mem::size_of::<f32>())
            .ok_or_else(|| {
                let stats = self.ledger.stats();
                CudaError::OutOfMemory {
                    requested: usize::MAX,
                    available: stats.budget.saturating_sub(stats.allocated),
                }
            })?;
        let lease = self.ledger.reserve(bytes)?;

        let mut data = Vec::new();
        data.try_reserve_exact(len).map_err(|_| CudaError::OutOfMemory {
            requested: bytes,
            available: 0,
        })?;
        data.resize(len, 0.0);

        tracing::trace!(len, bytes, "cpu allocate");
        Ok(DeviceBuffer::host(data, Some(lease)))
    }

    fn upload(&self, dst: &mut DeviceBuffer, offset: usize, src: &[f32]) -> CudaResult<()> {
        let data = dst.as_host_mut()?;
        check_range(offset, src.len(), data.len())?;
        data[offset..offset + src.len()].copy_from_slice(src);
        Ok(())
    }

    fn copy_prefix(&self, src: &DeviceBuffer, dst: &mut DeviceBuffer, len: usize) -> CudaResult<()> {
        let from = src.as_host()?;
        check_range(0, len, from.len())?;
        let to = dst.as_host_mut()?;
        check_range(0, len, to.len())?;
        to[..len].copy_from_slice(&from[..len]);
        Ok(())
    }

    fn download(&self, src: &DeviceBuffer, offset: usize, dst: &mut [f32]) -> CudaResult<()> {
        let data = src.as_host()?;
        check_range(offset, dst.len(), data.len())?;
        dst.copy_from_slice(&data[offset..offset + dst.len()]);
        Ok(())
    }

    fn score(&self, manifold: ManifoldView<'_>, probe: &[f32]) -> CudaResult<Timed<DeviceBuffer>> {
        self.module.require(EntryPoint::SimilarityScore)?;
        if probe.len() != manifold.rank {
            return Err(CudaError::DimensionMismatch {
                expected: manifold.rank,
                actual: probe.len(),
            });
        }
        let rows = manifold.buffer.as_host()?;
        let mut magnitudes = self.allocate(manifold.rows)?;

        Timed::measure(|| {
            let out = magnitudes.as_host_mut()?;
            kernels::score_rows(&rows[..manifold.element_count()], manifold.rank, probe, out);
            Ok(())
        })
        .map(|timed| timed.map(|()| magnitudes))
    }

    fn select_top_k(
        &self,
        magnitudes: &DeviceBuffer,
        rows: usize,
        k: usize,
    ) -> CudaResult<Timed<Vec<ScoredId>>> {
        self.module.require(EntryPoint::PartialTopK)?;
        let data = magnitudes.as_host()?;
        check_range(0, rows, data.len())?;

        Timed::measure(|| Ok(kernels::partial_top_k(&data[..rows], k.min(rows))))
    }

    fn density_audit(
        &self,
        manifold: ManifoldView<'_>,
        anchor: u64,
        members: &[u64],
    ) -> CudaResult<Timed<Vec<u64>>> {
        self.module.require(EntryPoint::DensityAudit)?;
        let anchor = check_id(anchor, manifold.rows)?;
        let members = members
            .iter()
            .map(|&id| check_id(id, manifold.rows))
            .collect::<CudaResult<Vec<usize>>>()?;
        let data = manifold.buffer.as_host()?;

        Timed::measure(|| {
            Ok(kernels::density_counts(
                data,
                manifold.rows,
                manifold.rank,
                anchor,
                &members,
            ))
        })
    }
}
