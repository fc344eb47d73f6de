use grainvdb_cuda::ComputeBackend;

use crate::error::{EngineError, EngineResult};
use crate::store::ManifoldStore;

use super::types::{Neighbor, NeighborResult, QueryOutcome};

/// Resolves top-K similarity queries against a [`ManifoldStore`].
#[derive(Debug, Clone, Copy, Default)]
pub struct QueryEngine;

impl QueryEngine {
    /// Return the `top` stored vectors most similar to `probe`.
    ///
    /// An empty manifold yields an empty result with zero latency and no
    /// dispatch.
    ///
    /// # Errors
    ///
    /// - `EmptyInput` if `top == 0`
    /// - `DimensionMismatch` if `probe.len() != rank`
    /// - `NonFiniteValue` if the probe holds NaN or infinity
    /// - `DispatchFailure` if scoring or selection fails on the backend
    pub fn resolve(store: &ManifoldStore, probe: &[f32], top: usize) -> EngineResult<QueryOutcome> {
        if top == 0 {
            return Err(EngineError::EmptyInput("top must be greater than 0"));
        }
        if probe.len() != store.rank() {
            return Err(EngineError::DimensionMismatch {
                expected: store.rank(),
                actual: probe.len(),
            });
        }
        if let Some(index) = probe.iter().position(|v| !v.is_finite()) {
            return Err(EngineError::NonFiniteValue { index });
        }

        let Some(view) = store.view()? else {
            return Ok(QueryOutcome {
                result: NeighborResult::default(),
                latency_ms: 0.0,
            });
        };

        let backend: &dyn ComputeBackend = store.backend().as_ref();
        let k = top.min(view.rows);

        let scored = backend
            .score(view, probe)
            .map_err(|e| EngineError::from_backend("query", e))?;
        let selected = backend
            .select_top_k(&scored.value, view.rows, k)
            .map_err(|e| EngineError::from_backend("query", e))?;

        let latency_ms = scored.elapsed_ms + selected.elapsed_ms;
        let neighbors: Vec<Neighbor> = selected.value.into_iter().map(Neighbor::from).collect();

        tracing::debug!(
            rows = view.rows,
            top,
            returned = neighbors.len(),
            latency_ms,
            "query resolved"
        );
        Ok(QueryOutcome {
            result: NeighborResult::new(neighbors),
            latency_ms,
        })
    }
}
