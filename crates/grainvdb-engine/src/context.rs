//! The engine context: one manifold bound to one compute backend.
//!
//! A [`Context`] is `Send + Sync`. Ingest takes the manifold write lock;
//! query, audit, and reads take the read lock, so every operation observes a
//! whole number of ingested batches. After a backend dispatch failure the
//! context is flagged unusable and every later operation returns
//! [`EngineError::ContextUnusable`]; dropping it is always safe.

use std::ops::Range;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use grainvdb_cuda::{open_backend, BackendOptions, ComputeBackend, CudaError, KernelModule};

use crate::audit::{AuditReport, TopologyAuditor};
use crate::config::{AuditConfig, EngineConfig, StoreConfig};
use crate::error::{EngineError, EngineResult};
use crate::fold::{self, FoldTransform, IdentityFold};
use crate::query::{QueryEngine, QueryOutcome};
use crate::store::ManifoldStore;

/// Construction options beyond rank and backend.
#[derive(Debug, Clone)]
pub struct ContextOptions {
    pub store: StoreConfig,
    pub audit: AuditConfig,
    /// Transform applied to batches ingested with `fold = true`.
    pub fold: Arc<dyn FoldTransform>,
}

impl Default for ContextOptions {
    fn default() -> Self {
        Self {
            store: StoreConfig::default(),
            audit: AuditConfig::default(),
            fold: Arc::new(IdentityFold),
        }
    }
}

/// Snapshot of a context's manifold and backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifoldStats {
    pub rank: usize,
    pub size: u64,
    /// Rows reserved on the device.
    pub capacity: usize,
    pub backend: String,
    /// Location of the loaded kernel module.
    pub module: String,
}

/// A GrainVDB engine context.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use grainvdb_cuda::CpuBackend;
/// use grainvdb_engine::Context;
///
/// let ctx = Context::new(4, Arc::new(CpuBackend::new())).unwrap();
/// let ids = ctx
///     .ingest(&[1.0, 0.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.9, 0.1, 0.0, 0.0], 3, false)
///     .unwrap();
/// assert_eq!(ids, 0..3);
///
/// let outcome = ctx.query(&[1.0, 0.0, 0.0, 0.0], 2).unwrap();
/// assert_eq!(outcome.result.ids(), vec![0, 2]);
///
/// let report = ctx.audit(&outcome.result.ids()).unwrap();
/// assert_eq!(report.score, 1.0);
/// ctx.destroy();
/// ```
#[derive(Debug)]
pub struct Context {
    rank: usize,
    backend: Arc<dyn ComputeBackend>,
    store: RwLock<ManifoldStore>,
    fold: Arc<dyn FoldTransform>,
    auditor: TopologyAuditor,
    poisoned: AtomicBool,
}

static_assertions::assert_impl_all!(Context: Send, Sync);

impl Context {
    /// Context of fixed `rank` on `backend` with default options.
    ///
    /// # Errors
    ///
    /// `InvalidRank` if `rank == 0`.
    pub fn new(rank: usize, backend: Arc<dyn ComputeBackend>) -> EngineResult<Self> {
        Self::with_options(rank, backend, ContextOptions::default())
    }

    /// Context with explicit store, audit, and fold options.
    pub fn with_options(
        rank: usize,
        backend: Arc<dyn ComputeBackend>,
        options: ContextOptions,
    ) -> EngineResult<Self> {
        let store = ManifoldStore::new(rank, Arc::clone(&backend), options.store)?;
        tracing::info!(
            rank,
            backend = backend.name(),
            module = backend.module().location(),
            fold = options.fold.name(),
            "context created"
        );
        Ok(Self {
            rank,
            backend,
            store: RwLock::new(store),
            fold: options.fold,
            auditor: TopologyAuditor::new(options.audit),
            poisoned: AtomicBool::new(false),
        })
    }

    /// Open the configured backend and build a context from `config`.
    ///
    /// # Errors
    ///
    /// - `Config` if the configuration is invalid
    /// - `InvalidRank` if `config.rank == 0`
    /// - `ModuleLoadFailure` if the backend or its kernel module cannot be opened
    pub fn from_config(config: &EngineConfig) -> EngineResult<Self> {
        config.validate()?;
        let backend = open_backend(&BackendOptions {
            kind: config.backend.kind.into(),
            module_path: config.backend.module_path.as_deref(),
            device_ordinal: config.backend.device_ordinal,
            memory_budget_bytes: config.backend.memory_budget_bytes,
        })
        .map_err(|e| module_load_failure(config, e))?;

        Self::with_options(
            config.rank,
            backend,
            ContextOptions {
                store: config.store.clone(),
                audit: config.audit.clone(),
                fold: fold::from_kind(config.fold),
            },
        )
    }

    #[inline]
    pub fn rank(&self) -> usize {
        self.rank
    }

    pub fn backend(&self) -> &Arc<dyn ComputeBackend> {
        &self.backend
    }

    /// Whether a backend failure has made this context unusable.
    pub fn is_usable(&self) -> bool {
        !self.poisoned.load(Ordering::Acquire)
    }

    fn read(&self) -> EngineResult<RwLockReadGuard<'_, ManifoldStore>> {
        if !self.is_usable() {
            return Err(EngineError::ContextUnusable);
        }
        self.store.read().map_err(|_| EngineError::ContextUnusable)
    }

    fn write(&self) -> EngineResult<RwLockWriteGuard<'_, ManifoldStore>> {
        if !self.is_usable() {
            return Err(EngineError::ContextUnusable);
        }
        self.store.write().map_err(|_| EngineError::ContextUnusable)
    }

    /// Flag the context unusable if `result` is a backend failure.
    fn track<T>(&self, result: EngineResult<T>) -> EngineResult<T> {
        if let Err(err) = &result {
            if err.poisons_context() && !self.poisoned.swap(true, Ordering::AcqRel) {
                tracing::error!(error = %err, "backend failure; context is now unusable");
            }
        }
        result
    }

    /// Append `count` vectors from `data` (row-major).
    ///
    /// With `fold`, the context's fold transform is applied to this batch.
    /// Returns the assigned id range.
    ///
    /// # Errors
    ///
    /// Precondition errors, `AllocationFailure` (nothing stored, context still
    /// usable), or `DispatchFailure`.
    pub fn ingest(&self, data: &[f32], count: usize, fold: bool) -> EngineResult<Range<u64>> {
        let mut store = self.write()?;
        let transform = if fold { Some(self.fold.as_ref()) } else { None };
        let result = store.ingest(data, count, transform);
        self.track(result)
    }

    /// The `top` stored vectors most similar to `probe`, best first.
    pub fn query(&self, probe: &[f32], top: usize) -> EngineResult<QueryOutcome> {
        let store = self.read()?;
        let result = QueryEngine::resolve(&store, probe, top);
        self.track(result)
    }

    /// Query into caller buffers; returns the latency in milliseconds.
    ///
    /// Both buffers must hold at least `top` elements. Unused slots receive
    /// `id = u64::MAX` and `magnitude = 0.0`. On any error the buffers are
    /// left untouched.
    pub fn query_into(
        &self,
        probe: &[f32],
        top: usize,
        ids: &mut [u64],
        magnitudes: &mut [f32],
    ) -> EngineResult<f64> {
        let shortest = ids.len().min(magnitudes.len());
        if shortest < top {
            return Err(EngineError::BufferTooShort {
                required: top,
                actual: shortest,
            });
        }
        let outcome = self.query(probe, top)?;
        outcome.result.write_into(top, ids, magnitudes)?;
        Ok(outcome.latency_ms)
    }

    /// Audit the claimed neighborhood `ids` against the current manifold.
    pub fn audit(&self, ids: &[u64]) -> EngineResult<AuditReport> {
        let store = self.read()?;
        let result = self.auditor.audit(&store, ids);
        self.track(result)
    }

    /// Gluing energy between two stored neighborhoods.
    pub fn gluing_energy(&self, first: &[u64], second: &[u64]) -> EngineResult<f64> {
        let store = self.read()?;
        let result = self.auditor.gluing_energy(&store, first, second);
        self.track(result)
    }

    /// Copy of the stored vector `id`.
    pub fn vector(&self, id: u64) -> EngineResult<Vec<f32>> {
        let store = self.read()?;
        let result = store.vector(id);
        self.track(result)
    }

    /// Number of stored vectors.
    pub fn size(&self) -> EngineResult<u64> {
        Ok(self.read()?.size())
    }

    pub fn stats(&self) -> EngineResult<ManifoldStats> {
        let store = self.read()?;
        Ok(ManifoldStats {
            rank: self.rank,
            size: store.size(),
            capacity: store.capacity(),
            backend: self.backend.name().to_string(),
            module: self.backend.module().location().to_string(),
        })
    }

    /// Release the manifold and this context's backend handle.
    pub fn destroy(self) {
        let size = self.store.read().map(|s| s.size()).unwrap_or_default();
        tracing::info!(rank = self.rank, size, "context destroyed");
    }
}

fn module_load_failure(config: &EngineConfig, err: CudaError) -> EngineError {
    match err {
        CudaError::ModuleLoad { location, reason } => {
            EngineError::ModuleLoadFailure { location, reason }
        }
        other => EngineError::ModuleLoadFailure {
            location: config
                .backend
                .module_path
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| KernelModule::BUILTIN_LOCATION.to_string()),
            reason: other.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use grainvdb_cuda::CpuBackend;

    use super::*;
    use crate::config::BackendKindConfig;

    fn context(rank: usize) -> Context {
        Context::new(rank, Arc::new(CpuBackend::new())).expect("valid rank")
    }

    // ========== Construction Tests ==========

    #[test]
    fn test_zero_rank_rejected() {
        let err = Context::new(0, Arc::new(CpuBackend::new())).unwrap_err();
        assert!(matches!(err, EngineError::InvalidRank(0)));
    }

    #[test]
    fn test_new_context_stats() {
        let ctx = context(3);
        let stats = ctx.stats().unwrap();
        assert_eq!(stats.rank, 3);
        assert_eq!(stats.size, 0);
        assert_eq!(stats.capacity, 0);
        assert!(stats.backend.contains("CPU"));
        assert!(ctx.is_usable());
    }

    #[test]
    fn test_from_config_rejects_invalid_config() {
        let mut config = EngineConfig::default();
        config.store.growth_factor = 1.0;
        assert!(matches!(
            Context::from_config(&config).unwrap_err(),
            EngineError::Config(_)
        ));
    }

    // ========== Failure Tracking Tests ==========

    #[test]
    fn test_precondition_errors_do_not_poison() {
        let ctx = context(2);
        assert!(ctx.ingest(&[1.0], 1, false).is_err());
        assert!(ctx.query(&[1.0, 0.0], 0).is_err());
        assert!(ctx.audit(&[]).is_err());
        assert!(ctx.is_usable());
    }

    #[test]
    fn test_track_poisons_on_dispatch_failure() {
        let ctx = context(2);
        let failed: EngineResult<()> = Err(EngineError::DispatchFailure {
            operation: "query",
            reason: "launch failed".into(),
        });
        assert!(ctx.track(failed).is_err());
        assert!(!ctx.is_usable());
        assert!(matches!(ctx.vector(0).unwrap_err(), EngineError::ContextUnusable));
        assert!(matches!(ctx.stats().unwrap_err(), EngineError::ContextUnusable));
    }

    #[test]
    fn test_track_ignores_allocation_failure() {
        let ctx = context(2);
        let failed: EngineResult<()> = Err(EngineError::AllocationFailure("oom".into()));
        assert!(ctx.track(failed).is_err());
        assert!(ctx.is_usable());
    }

    // ========== Module Load Mapping Tests ==========

    #[test]
    fn test_module_load_error_passes_through() {
        let config = EngineConfig::default();
        let err = module_load_failure(
            &config,
            CudaError::ModuleLoad {
                location: "/opt/gv/kernels.ptx".into(),
                reason: "file not found".into(),
            },
        );
        match err {
            EngineError::ModuleLoadFailure { location, reason } => {
                assert_eq!(location, "/opt/gv/kernels.ptx");
                assert_eq!(reason, "file not found");
            }
            other => panic!("expected ModuleLoadFailure, got {:?}", other),
        }
    }

    #[test]
    fn test_device_error_reports_configured_module() {
        let mut config = EngineConfig::default();
        config.backend.kind = BackendKindConfig::Cuda;
        config.backend.module_path = Some("kernels.cubin".into());
        match module_load_failure(&config, CudaError::NoDevice) {
            EngineError::ModuleLoadFailure { location, reason } => {
                assert_eq!(location, "kernels.cubin");
                assert!(reason.contains("No CUDA-capable device"));
            }
            other => panic!("expected ModuleLoadFailure, got {:?}", other),
        }
    }
}
