use std::collections::HashSet;

use grainvdb_cuda::cpu::kernels::cosine;

use crate::config::AuditConfig;
use crate::error::{EngineError, EngineResult};
use crate::store::ManifoldStore;

use super::spectral::algebraic_connectivity;
use super::types::AuditReport;

/// Runs topology audits and neighborhood comparisons against a store.
#[derive(Debug, Clone, Default)]
pub struct TopologyAuditor {
    config: AuditConfig,
}

/// Collapse duplicates, keeping first occurrences in order.
fn distinct(ids: &[u64]) -> Vec<u64> {
    let mut seen = HashSet::with_capacity(ids.len());
    ids.iter().copied().filter(|id| seen.insert(*id)).collect()
}

fn check_ids(store: &ManifoldStore, ids: &[u64]) -> EngineResult<()> {
    ids.iter().try_for_each(|&id| store.check_id(id).map(|_| ()))
}

impl TopologyAuditor {
    pub fn new(config: AuditConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &AuditConfig {
        &self.config
    }

    /// Audit the neighborhood formed by `ids` against the current manifold.
    ///
    /// Every distinct id is tried as the center of the set; the score is the
    /// best center's consistency, so it does not depend on the order of
    /// `ids`. The report's `anchor` is that center (earliest given on ties).
    ///
    /// # Errors
    ///
    /// - `EmptyInput` if `ids` is empty
    /// - `InvalidReference` for the first id outside `[0, size)`; nothing is computed
    /// - `DispatchFailure` if the density kernel fails
    pub fn audit(&self, store: &ManifoldStore, ids: &[u64]) -> EngineResult<AuditReport> {
        if ids.is_empty() {
            return Err(EngineError::EmptyInput("audit requires at least one id"));
        }
        check_ids(store, ids)?;

        let set = distinct(ids);
        let neighbors = set.len() - 1;
        if neighbors == 0 {
            return Ok(AuditReport {
                score: 1.0,
                cohesion: 1.0,
                latency_ms: 0.0,
                connectivity: 1.0,
                anchor: set[0],
                neighbors,
            });
        }

        let view = store.view()?.ok_or(EngineError::InvalidReference {
            id: set[0],
            size: store.size(),
        })?;
        let m = neighbors.min(store.rows().saturating_sub(1)) as f64;

        // Id order keeps every per-center sum independent of caller order.
        let mut sorted = set.clone();
        sorted.sort_unstable();

        let mut latency_ms = 0.0;
        let mut per_center = Vec::with_capacity(sorted.len());
        let mut members = Vec::with_capacity(neighbors);
        for &center in &sorted {
            members.clear();
            members.extend(sorted.iter().copied().filter(|&id| id != center));
            let counts = store
                .backend()
                .density_audit(view, center, &members)
                .map_err(|e| EngineError::from_backend("audit", e))?;
            latency_ms += counts.elapsed_ms;

            let total: f64 = counts
                .value
                .iter()
                .map(|&closer| (m / (closer as f64 + 1.0)).min(1.0))
                .sum();
            per_center.push((center, total / neighbors as f64));
        }

        let cohesion = per_center.iter().map(|(_, c)| c).sum::<f64>() / per_center.len() as f64;
        let mut anchor = set[0];
        let mut score = f64::NEG_INFINITY;
        for &id in &set {
            let consistency = per_center
                .iter()
                .find(|(center, _)| *center == id)
                .map_or(0.0, |(_, c)| *c);
            if consistency > score {
                anchor = id;
                score = consistency;
            }
        }

        let vectors = store.vectors(&sorted)?;
        let connectivity = algebraic_connectivity(&vectors, self.config.connectivity_threshold);

        tracing::debug!(
            anchor,
            neighbors,
            score,
            cohesion,
            connectivity,
            latency_ms,
            "topology audit"
        );
        Ok(AuditReport {
            score,
            cohesion,
            latency_ms,
            connectivity,
            anchor,
            neighbors,
        })
    }

    /// Gluing energy between two neighborhoods.
    ///
    /// `1 - mean over u in first of max over w in second of cos(u, w)`. Near
    /// zero when every vector of `first` has a close counterpart in `second`;
    /// large values signal that the two contexts do not glue together.
    ///
    /// # Errors
    ///
    /// `EmptyInput` if either set is empty, `InvalidReference` for unknown ids.
    pub fn gluing_energy(
        &self,
        store: &ManifoldStore,
        first: &[u64],
        second: &[u64],
    ) -> EngineResult<f64> {
        if first.is_empty() || second.is_empty() {
            return Err(EngineError::EmptyInput("gluing energy requires two non-empty sets"));
        }
        check_ids(store, first)?;
        check_ids(store, second)?;

        let left = store.vectors(first)?;
        let right = store.vectors(second)?;
        let agreement: f64 = left
            .iter()
            .map(|u| {
                right
                    .iter()
                    .map(|w| cosine(u, w))
                    .fold(f32::NEG_INFINITY, f32::max) as f64
            })
            .sum::<f64>()
            / left.len() as f64;

        Ok(1.0 - agreement)
    }
}
