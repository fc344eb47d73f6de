//! Fold transforms applied to vectors at ingestion.
//!
//! A fold maps one rank-length vector to another of the same rank before it
//! is stored. It is selected per batch by the fold flag and never applied
//! retroactively. Folds must be deterministic.

use std::fmt;
use std::sync::Arc;

use crate::config::FoldKind;

/// A per-vector transform applied during ingestion.
pub trait FoldTransform: Send + Sync + fmt::Debug {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Write the folded form of `input` into `out` (same length).
    fn fold(&self, input: &[f32], out: &mut [f32]);
}

/// Stores vectors unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityFold;

impl FoldTransform for IdentityFold {
    fn name(&self) -> &'static str {
        "identity"
    }

    fn fold(&self, input: &[f32], out: &mut [f32]) {
        out.copy_from_slice(input);
    }
}

/// Normalizes to unit length and folds the sign ambiguity.
///
/// `v` and `-v` fold to the same stored vector: after normalization the
/// vector is reflected so its first non-zero component is positive. Zero
/// vectors stay zero. Idempotent.
///
/// ```
/// use grainvdb_engine::fold::{FoldTransform, PhaseFold};
///
/// let mut out = [0.0; 2];
/// PhaseFold.fold(&[-3.0, 4.0], &mut out);
/// assert!((out[0] - 0.6).abs() < 1e-6);
/// assert!((out[1] + 0.8).abs() < 1e-6);
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct PhaseFold;

impl FoldTransform for PhaseFold {
    fn name(&self) -> &'static str {
        "phase"
    }

    fn fold(&self, input: &[f32], out: &mut [f32]) {
        let norm = input.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm == 0.0 || !norm.is_finite() {
            out.copy_from_slice(input);
            return;
        }
        let sign = match input.iter().find(|x| **x != 0.0) {
            Some(first) if *first < 0.0 => -1.0,
            _ => 1.0,
        };
        let scale = sign / norm;
        for (o, x) in out.iter_mut().zip(input) {
            *o = x * scale;
        }
    }
}

/// Shared transform for a configured fold kind.
pub fn from_kind(kind: FoldKind) -> Arc<dyn FoldTransform> {
    match kind {
        FoldKind::Identity => Arc::new(IdentityFold),
        FoldKind::Phase => Arc::new(PhaseFold),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn folded(fold: &dyn FoldTransform, input: &[f32]) -> Vec<f32> {
        let mut out = vec![0.0; input.len()];
        fold.fold(input, &mut out);
        out
    }

    #[test]
    fn test_identity_copies() {
        assert_eq!(folded(&IdentityFold, &[1.0, -2.0, 3.5]), vec![1.0, -2.0, 3.5]);
    }

    #[test]
    fn test_phase_fold_merges_antipodes() {
        let a = folded(&PhaseFold, &[0.0, 2.0, -1.0]);
        let b = folded(&PhaseFold, &[0.0, -2.0, 1.0]);
        for (x, y) in a.iter().zip(&b) {
            assert!((x - y).abs() < 1e-6);
        }
        assert!(a[1] > 0.0);
    }

    #[test]
    fn test_phase_fold_is_idempotent_and_unit() {
        let once = folded(&PhaseFold, &[-3.0, 4.0, 0.0, 0.0]);
        let twice = folded(&PhaseFold, &once);
        for (x, y) in once.iter().zip(&twice) {
            assert!((x - y).abs() < 1e-6);
        }
        let norm: f32 = once.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_phase_fold_keeps_zero_vector() {
        assert_eq!(folded(&PhaseFold, &[0.0, 0.0]), vec![0.0, 0.0]);
    }

    #[test]
    fn test_from_kind_names() {
        assert_eq!(from_kind(FoldKind::Identity).name(), "identity");
        assert_eq!(from_kind(FoldKind::Phase).name(), "phase");
    }
}
