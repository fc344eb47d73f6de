//! Host implementations of the GrainVDB kernels.
//!
//! # Magnitude
//!
//! ```text
//! cos(a, b)  = dot(a, b) / (|a| * |b|)      accumulated in f64
//! magnitude  = (1 + clamp(cos, -1, 1)) / 2
//! ```
//!
//! Accumulating in `f64` keeps every finite `f32` input in range: squared
//! components neither overflow nor underflow, so magnitudes stay in `[0, 1]`
//! and remain monotonic in the angle at any scale. A zero vector, or any
//! non-finite intermediate, scores the neutral `0.5`.

use rayon::prelude::*;

use crate::kernel::{BLOCK_SIZE, MAX_SELECT_BLOCKS};
use crate::select::{ScoredId, TopK};

/// Cosine similarity clamped to `[-1, 1]`; `0.0` when either vector is zero.
#[inline]
pub fn cosine(a: &[f32], b: &[f32]) -> f32 {
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (&x, &y) in a.iter().zip(b.iter()) {
        let (x, y) = (f64::from(x), f64::from(y));
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom == 0.0 {
        return 0.0;
    }
    let cos = dot / denom;
    if cos.is_finite() {
        cos.clamp(-1.0, 1.0) as f32
    } else {
        0.0
    }
}

/// Similarity magnitude in `[0, 1]`; higher is more similar.
///
/// # Example
///
/// ```
/// use grainvdb_cuda::cpu::kernels::magnitude;
///
/// assert!((magnitude(&[1.0, 0.0], &[2.0, 0.0]) - 1.0).abs() < 1e-6);
/// assert!(magnitude(&[1.0, 0.0], &[-1.0, 0.0]).abs() < 1e-6);
/// assert!((magnitude(&[0.0, 0.0], &[1.0, 0.0]) - 0.5).abs() < 1e-6);
/// ```
#[inline]
pub fn magnitude(a: &[f32], b: &[f32]) -> f32 {
    (1.0 + cosine(a, b)) * 0.5
}

/// Score every row of a row-major manifold against `probe`.
///
/// `out.len()` rows are scored; `manifold` must hold at least that many.
pub fn score_rows(manifold: &[f32], rank: usize, probe: &[f32], out: &mut [f32]) {
    if rank == 0 {
        out.fill(0.5);
        return;
    }
    out.par_iter_mut()
        .zip(manifold.par_chunks_exact(rank))
        .for_each(|(slot, row)| *slot = magnitude(row, probe));
}

/// Stripe length for `rows` magnitudes, mirroring the device launch shape.
#[inline]
pub fn stripe_len(rows: usize) -> usize {
    rows.div_ceil(MAX_SELECT_BLOCKS as usize)
        .max(BLOCK_SIZE as usize)
}

/// Partial top-K over `magnitudes`, best first.
///
/// Each stripe keeps its own bounded heap; heaps are merged pairwise.
pub fn partial_top_k(magnitudes: &[f32], k: usize) -> Vec<ScoredId> {
    if k == 0 || magnitudes.is_empty() {
        return Vec::new();
    }
    let stripe = stripe_len(magnitudes.len());
    magnitudes
        .par_chunks(stripe)
        .enumerate()
        .map(|(block, chunk)| crate::select::select_stripe(chunk, (block * stripe) as u64, k))
        .reduce(
            || TopK::new(k),
            |mut left, right| {
                left.merge(right);
                left
            },
        )
        .into_sorted_vec()
}

/// Closer-neighbor counts for the density audit.
///
/// For each member, the number of rows other than `anchor` whose magnitude
/// against the anchor row is strictly greater than the member's own.
/// `anchor` and every member must be `< rows`. One parallel pass over the
/// manifold; nothing is sorted.
pub fn density_counts(
    manifold: &[f32],
    rows: usize,
    rank: usize,
    anchor: usize,
    members: &[usize],
) -> Vec<u64> {
    let anchor_row = &manifold[anchor * rank..(anchor + 1) * rank];
    let thresholds: Vec<f32> = members
        .iter()
        .map(|&m| magnitude(&manifold[m * rank..(m + 1) * rank], anchor_row))
        .collect();

    manifold[..rows * rank]
        .par_chunks_exact(rank)
        .enumerate()
        .filter(|(row, _)| *row != anchor)
        .fold(
            || vec![0u64; thresholds.len()],
            |mut counts, (_, row)| {
                let score = magnitude(row, anchor_row);
                for (count, threshold) in counts.iter_mut().zip(&thresholds) {
                    if score.total_cmp(threshold).is_gt() {
                        *count += 1;
                    }
                }
                counts
            },
        )
        .reduce(
            || vec![0u64; thresholds.len()],
            |mut left, right| {
                for (l, r) in left.iter_mut().zip(right) {
                    *l += r;
                }
                left
            },
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_magnitude_bounds() {
        let a = [0.3, -0.7, 0.2];
        let b = [-0.3, 0.7, -0.2];
        assert!((magnitude(&a, &a) - 1.0).abs() < 1e-5);
        assert!(magnitude(&a, &b).abs() < 1e-5);
    }

    #[test]
    fn test_magnitude_zero_vector_is_neutral() {
        let zero = [0.0; 4];
        assert!((magnitude(&zero, &zero) - 0.5).abs() < 1e-6);
        assert!((magnitude(&zero, &[1.0, 2.0, 3.0, 4.0]) - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_magnitude_bounded_for_huge_components() {
        let target = [1e20f32, 0.0];
        let same = magnitude(&[1e20, 0.0], &target);
        let orthogonal = magnitude(&[0.0, 1.0], &target);
        let opposite = magnitude(&[-3e38, 0.0], &target);
        assert!((same - 1.0).abs() < 1e-6, "same = {}", same);
        assert!((orthogonal - 0.5).abs() < 1e-6);
        assert!(opposite.abs() < 1e-6);
        assert!(magnitude(&[f32::MAX, f32::MAX], &[f32::MAX, f32::MAX]).is_finite());
    }

    #[test]
    fn test_magnitude_monotonic_for_tiny_components() {
        let target = [1e-20f32, 0.0];
        let same = magnitude(&[1e-20, 0.0], &target);
        let tilted = magnitude(&[1e-20, 1e-20], &target);
        let orthogonal = magnitude(&[0.0, 1e-20], &target);
        assert!((same - 1.0).abs() < 1e-6, "same = {}", same);
        assert!(same > tilted && tilted > orthogonal);
        assert!((orthogonal - 0.5).abs() < 1e-6);

        let subnormal = f32::from_bits(1);
        assert!((magnitude(&[subnormal, 0.0], &[subnormal, 0.0]) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_score_rows_matches_scalar() {
        let manifold = [1.0, 0.0, 0.0, 1.0, -1.0, 0.0];
        let probe = [1.0, 0.0];
        let mut out = [0.0f32; 3];
        score_rows(&manifold, 2, &probe, &mut out);
        assert!((out[0] - 1.0).abs() < 1e-6);
        assert!((out[1] - 0.5).abs() < 1e-6);
        assert!(out[2].abs() < 1e-6);
    }

    #[test]
    fn test_partial_top_k_spans_stripes() {
        // Longer than one stripe so the reduce path is exercised.
        let rows = BLOCK_SIZE as usize * 5 + 17;
        let magnitudes: Vec<f32> = (0..rows).map(|i| (i % 97) as f32 / 97.0).collect();
        let top = partial_top_k(&magnitudes, 4);

        let mut expected: Vec<(u64, f32)> =
            magnitudes.iter().enumerate().map(|(i, &m)| (i as u64, m)).collect();
        expected.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));

        let got: Vec<u64> = top.iter().map(|s| s.id).collect();
        let want: Vec<u64> = expected.iter().take(4).map(|e| e.0).collect();
        assert_eq!(got, want);
    }

    #[test]
    fn test_density_counts_excludes_anchor_and_ties() {
        // anchor 0 = [1,0]; row 1 identical, row 2 orthogonal, row 3 opposite.
        let manifold = [1.0, 0.0, 1.0, 0.0, 0.0, 1.0, -1.0, 0.0];
        let counts = density_counts(&manifold, 4, 2, 0, &[1, 2, 3]);
        assert_eq!(counts, vec![0, 1, 2]);
    }

    #[test]
    fn test_density_counts_matches_brute_force() {
        let (rows, rank) = (700, 3);
        let manifold: Vec<f32> = (0..rows * rank)
            .map(|i| ((i * 7919) % 1013) as f32 / 1013.0 - 0.5)
            .collect();
        let anchor = 17;
        let members = [0, 5, 123, 699];
        let counts = density_counts(&manifold, rows, rank, anchor, &members);

        let row = |r: usize| &manifold[r * rank..(r + 1) * rank];
        for (member, count) in members.iter().zip(&counts) {
            let threshold = magnitude(row(*member), row(anchor));
            let expected = (0..rows)
                .filter(|&r| r != anchor && magnitude(row(r), row(anchor)) > threshold)
                .count() as u64;
            assert_eq!(*count, expected, "member {}", member);
        }
    }
}
