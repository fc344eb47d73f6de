//! Kernel module handles and named entry points.
//!
//! A kernel module is loaded once from a caller-identified location and
//! exposes a fixed set of named entry points. Resolution is lenient: a module
//! missing an entry point still loads, and the failure surfaces when that
//! entry point is dispatched.
//!
//! # Kernel ABI
//!
//! Device-side kernels compiled into a module must match these signatures
//! (all pointers are device pointers, row-major `f32` manifold):
//!
//! ```text
//! gv_similarity_score(const float* manifold, const float* probe, float* magnitudes,
//!                     uint32_t rows, uint32_t rank)
//!     one thread per row; magnitude = (1 + cos(probe, row)) / 2
//!     dot and squared norms must accumulate in double; a zero norm or a
//!     non-finite cosine yields magnitude 0.5
//!
//! gv_partial_top_k(const float* magnitudes, uint32_t rows, uint32_t k,
//!                  uint64_t* candidate_ids, float* candidate_magnitudes)
//!     one block per stripe; each block writes its k best (id, magnitude)
//!     pairs at offset blockIdx.x * k, padding with id = UINT64_MAX
//!
//! gv_density_audit(const float* manifold, uint32_t rows, uint32_t rank,
//!                  uint64_t anchor, const uint64_t* members, uint32_t n_members,
//!                  unsigned long long* closer_counts)
//!     one thread per row; for every member, atomically counts rows
//!     (excluding the anchor) strictly more similar to the anchor, using
//!     the same magnitude as gv_similarity_score
//! ```

use std::collections::BTreeSet;
use std::fmt;

use crate::error::{CudaError, CudaResult};

/// Threads per block used by every GrainVDB kernel launch.
pub const BLOCK_SIZE: u32 = 256;

/// Maximum number of blocks launched for the partial top-K kernel.
pub const MAX_SELECT_BLOCKS: u32 = 128;

/// Named entry points a GrainVDB kernel module exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EntryPoint {
    /// Per-row similarity magnitude against a probe.
    SimilarityScore,
    /// Partial top-K selection over a magnitude buffer.
    PartialTopK,
    /// Neighborhood density counts for the topology audit.
    DensityAudit,
}

impl EntryPoint {
    /// Symbol name inside the compiled module.
    pub const fn symbol(&self) -> &'static str {
        match self {
            EntryPoint::SimilarityScore => "gv_similarity_score",
            EntryPoint::PartialTopK => "gv_partial_top_k",
            EntryPoint::DensityAudit => "gv_density_audit",
        }
    }

    /// All entry points in dispatch order.
    pub const fn all() -> [EntryPoint; 3] {
        [
            EntryPoint::SimilarityScore,
            EntryPoint::PartialTopK,
            EntryPoint::DensityAudit,
        ]
    }
}

impl fmt::Display for EntryPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

/// A loaded kernel module: where it came from and which entry points resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KernelModule {
    location: String,
    entry_points: BTreeSet<EntryPoint>,
}

impl KernelModule {
    /// Location string used by the built-in CPU module.
    pub const BUILTIN_LOCATION: &'static str = "builtin:cpu";

    /// Module with every entry point resolved.
    pub fn builtin() -> Self {
        Self::from_entry_points(Self::BUILTIN_LOCATION, EntryPoint::all())
    }

    /// Module exposing exactly the given entry points.
    ///
    /// # Example
    ///
    /// ```
    /// use grainvdb_cuda::{EntryPoint, KernelModule};
    ///
    /// let module = KernelModule::from_entry_points("partial.ptx", [EntryPoint::SimilarityScore]);
    /// assert!(module.has(EntryPoint::SimilarityScore));
    /// assert!(module.require(EntryPoint::PartialTopK).is_err());
    /// ```
    pub fn from_entry_points(
        location: impl Into<String>,
        entry_points: impl IntoIterator<Item = EntryPoint>,
    ) -> Self {
        Self {
            location: location.into(),
            entry_points: entry_points.into_iter().collect(),
        }
    }

    /// Where the module was loaded from.
    #[inline]
    pub fn location(&self) -> &str {
        &self.location
    }

    /// Whether `entry_point` resolved at load time.
    #[inline]
    pub fn has(&self, entry_point: EntryPoint) -> bool {
        self.entry_points.contains(&entry_point)
    }

    /// Resolved entry points, in dispatch order.
    pub fn entry_points(&self) -> impl Iterator<Item = EntryPoint> + '_ {
        self.entry_points.iter().copied()
    }

    /// Fail with [`CudaError::MissingEntryPoint`] unless `entry_point` resolved.
    pub fn require(&self, entry_point: EntryPoint) -> CudaResult<()> {
        if self.has(entry_point) {
            Ok(())
        } else {
            Err(CudaError::MissingEntryPoint {
                module: self.location.clone(),
                entry_point: entry_point.symbol().to_string(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_symbols_are_stable() {
        assert_eq!(EntryPoint::SimilarityScore.symbol(), "gv_similarity_score");
        assert_eq!(EntryPoint::PartialTopK.symbol(), "gv_partial_top_k");
        assert_eq!(EntryPoint::DensityAudit.symbol(), "gv_density_audit");
    }

    #[test]
    fn test_builtin_resolves_everything() {
        let module = KernelModule::builtin();
        assert_eq!(module.location(), KernelModule::BUILTIN_LOCATION);
        for entry in EntryPoint::all() {
            assert!(module.require(entry).is_ok(), "{} should resolve", entry);
        }
    }

    #[test]
    fn test_missing_entry_point_names_module_and_symbol() {
        let module = KernelModule::from_entry_points("kernels.ptx", [EntryPoint::SimilarityScore]);
        match module.require(EntryPoint::DensityAudit) {
            Err(CudaError::MissingEntryPoint { module, entry_point }) => {
                assert_eq!(module, "kernels.ptx");
                assert_eq!(entry_point, "gv_density_audit");
            }
            other => panic!("expected MissingEntryPoint, got {:?}", other),
        }
    }
}
