//! Query result types.

use grainvdb_cuda::{ScoredId, SENTINEL_ID};

use crate::error::{EngineError, EngineResult};

/// One resolved neighbor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    pub id: u64,
    /// Similarity in `[0, 1]`; higher is closer.
    pub magnitude: f32,
}

impl From<ScoredId> for Neighbor {
    fn from(scored: ScoredId) -> Self {
        Self {
            id: scored.id,
            magnitude: scored.magnitude,
        }
    }
}

/// Neighbors ordered best first. Never longer than the requested `top` or
/// the manifold size; ids are unique.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NeighborResult {
    neighbors: Vec<Neighbor>,
}

impl NeighborResult {
    pub(crate) fn new(neighbors: Vec<Neighbor>) -> Self {
        Self { neighbors }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.neighbors.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.neighbors.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Neighbor> {
        self.neighbors.iter()
    }

    pub fn as_slice(&self) -> &[Neighbor] {
        &self.neighbors
    }

    pub fn ids(&self) -> Vec<u64> {
        self.neighbors.iter().map(|n| n.id).collect()
    }

    pub fn magnitudes(&self) -> Vec<f32> {
        self.neighbors.iter().map(|n| n.magnitude).collect()
    }

    /// The best neighbor, if any.
    pub fn first(&self) -> Option<&Neighbor> {
        self.neighbors.first()
    }

    /// Write into caller buffers of length at least `top`.
    ///
    /// Slots past the result are filled with `id = u64::MAX`,
    /// `magnitude = 0.0`. The buffers are untouched if either is too short.
    pub fn write_into(&self, top: usize, ids: &mut [u64], magnitudes: &mut [f32]) -> EngineResult<()> {
        let shortest = ids.len().min(magnitudes.len());
        if shortest < top {
            return Err(EngineError::BufferTooShort {
                required: top,
                actual: shortest,
            });
        }
        for slot in 0..top {
            let (id, magnitude) = match self.neighbors.get(slot) {
                Some(n) => (n.id, n.magnitude),
                None => (SENTINEL_ID, 0.0),
            };
            ids[slot] = id;
            magnitudes[slot] = magnitude;
        }
        Ok(())
    }
}

impl IntoIterator for NeighborResult {
    type Item = Neighbor;
    type IntoIter = std::vec::IntoIter<Neighbor>;

    fn into_iter(self) -> Self::IntoIter {
        self.neighbors.into_iter()
    }
}

/// A query's neighbors plus the measured dispatch latency.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryOutcome {
    pub result: NeighborResult,
    /// Scoring plus selection, including device synchronization.
    pub latency_ms: f64,
}
