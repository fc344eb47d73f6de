//! Partial top-K selection.
//!
//! Selection never sorts the full magnitude array. Each stripe keeps a
//! bounded heap of its `k` best candidates; stripes are then merged with the
//! same bounded heap. Only the final `k` survivors are sorted.
//!
//! # Ranking
//!
//! Higher magnitude ranks first. Equal magnitudes rank the lower id first,
//! which keeps results deterministic regardless of how stripes are split.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

/// Id reserved for unused candidate slots.
pub const SENTINEL_ID: u64 = u64::MAX;

/// A manifold id paired with its similarity magnitude.
#[derive(Debug, Clone, Copy)]
pub struct ScoredId {
    /// Manifold row id.
    pub id: u64,
    /// Similarity magnitude (higher = more similar).
    pub magnitude: f32,
}

impl ScoredId {
    #[inline]
    pub fn new(id: u64, magnitude: f32) -> Self {
        Self { id, magnitude }
    }

    /// Whether this is an unused slot.
    #[inline]
    pub fn is_sentinel(&self) -> bool {
        self.id == SENTINEL_ID
    }
}

// `Greater` means "ranks later": lower magnitude, or same magnitude and higher id.
// Sorting ascending therefore yields best-first, and a max-heap keeps the
// worst retained candidate on top.
impl Ord for ScoredId {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .magnitude
            .total_cmp(&self.magnitude)
            .then_with(|| self.id.cmp(&other.id))
    }
}

impl PartialOrd for ScoredId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for ScoredId {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for ScoredId {}

/// Bounded collector of the `k` best candidates.
#[derive(Debug)]
pub struct TopK {
    k: usize,
    heap: BinaryHeap<ScoredId>,
}

impl TopK {
    /// Collector retaining at most `k` candidates.
    pub fn new(k: usize) -> Self {
        Self {
            k,
            heap: BinaryHeap::with_capacity(k.saturating_add(1).min(4096)),
        }
    }

    /// Offer a candidate; it is kept only if it beats the current worst.
    #[inline]
    pub fn push(&mut self, candidate: ScoredId) {
        if self.k == 0 || candidate.is_sentinel() {
            return;
        }
        if self.heap.len() < self.k {
            self.heap.push(candidate);
            return;
        }
        if let Some(worst) = self.heap.peek() {
            if candidate < *worst {
                self.heap.pop();
                self.heap.push(candidate);
            }
        }
    }

    /// Absorb every candidate retained by `other`.
    pub fn merge(&mut self, other: TopK) {
        for candidate in other.heap {
            self.push(candidate);
        }
    }

    /// Number of retained candidates.
    #[inline]
    pub fn len(&self) -> usize {
        self.heap.len()
    }

    /// Whether nothing has been retained.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Retained candidates, best first.
    pub fn into_sorted_vec(self) -> Vec<ScoredId> {
        // BinaryHeap::into_sorted_vec is ascending under our ordering: best first.
        self.heap.into_sorted_vec()
    }
}

/// Select the `k` best entries of a magnitude stripe starting at `base_id`.
pub fn select_stripe(magnitudes: &[f32], base_id: u64, k: usize) -> TopK {
    let mut top = TopK::new(k);
    for (offset, &magnitude) in magnitudes.iter().enumerate() {
        top.push(ScoredId::new(base_id + offset as u64, magnitude));
    }
    top
}

/// Merge per-stripe candidate lists (sentinels ignored) into the final top `k`.
pub fn merge_candidates(candidates: impl IntoIterator<Item = ScoredId>, k: usize) -> Vec<ScoredId> {
    let mut top = TopK::new(k);
    for candidate in candidates {
        top.push(candidate);
    }
    top.into_sorted_vec()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(result: &[ScoredId]) -> Vec<u64> {
        result.iter().map(|s| s.id).collect()
    }

    #[test]
    fn test_ordering_prefers_magnitude_then_lower_id() {
        let high = ScoredId::new(9, 0.9);
        let low = ScoredId::new(1, 0.1);
        assert!(high < low, "higher magnitude must rank first");

        let a = ScoredId::new(3, 0.5);
        let b = ScoredId::new(7, 0.5);
        assert!(a < b, "equal magnitude must rank lower id first");
    }

    #[test]
    fn test_stripe_selection_returns_best_first() {
        let magnitudes = [0.2, 0.9, 0.5, 0.7, 0.1];
        let result = select_stripe(&magnitudes, 0, 3).into_sorted_vec();
        assert_eq!(ids(&result), vec![1, 3, 2]);
    }

    #[test]
    fn test_stripe_selection_ties_break_by_id() {
        let magnitudes = [0.5, 0.5, 0.5, 0.5];
        let result = select_stripe(&magnitudes, 10, 2).into_sorted_vec();
        assert_eq!(ids(&result), vec![10, 11]);
    }

    #[test]
    fn test_k_larger_than_input_keeps_everything() {
        let magnitudes = [0.3, 0.1, 0.2];
        let result = select_stripe(&magnitudes, 0, 10).into_sorted_vec();
        assert_eq!(ids(&result), vec![0, 2, 1]);
    }

    #[test]
    fn test_merge_matches_single_pass() {
        let magnitudes: Vec<f32> = (0..100).map(|i| ((i * 37) % 101) as f32 / 101.0).collect();
        let single = select_stripe(&magnitudes, 0, 7).into_sorted_vec();

        let mut merged = TopK::new(7);
        for (chunk_idx, chunk) in magnitudes.chunks(13).enumerate() {
            merged.merge(select_stripe(chunk, (chunk_idx * 13) as u64, 7));
        }
        assert_eq!(ids(&merged.into_sorted_vec()), ids(&single));
    }

    #[test]
    fn test_merge_candidates_ignores_sentinels() {
        let candidates = vec![
            ScoredId::new(SENTINEL_ID, 0.0),
            ScoredId::new(4, 0.8),
            ScoredId::new(SENTINEL_ID, 0.0),
            ScoredId::new(2, 0.9),
        ];
        let result = merge_candidates(candidates, 5);
        assert_eq!(ids(&result), vec![2, 4]);
    }

    #[test]
    fn test_zero_k_retains_nothing() {
        let result = select_stripe(&[0.4, 0.6], 0, 0);
        assert!(result.is_empty());
    }
}
