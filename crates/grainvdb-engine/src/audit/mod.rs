//! Topology audit: is a claimed neighbor set coherent with the manifold?
//!
//! The audited ids form a claimed neighborhood of `M + 1` distinct vectors.
//! Each id `i` is tried as its center: for every other id `j` the density
//! kernel counts `closer_ij`, the rows (other than `i`) strictly more
//! similar to `i` than `j` is.
//!
//! ```text
//! c_ij     = min(1, M / (closer_ij + 1))
//! s_i      = mean over j != i of c_ij
//! score    = max over i of s_i          in [0, 1], 1 = fully consistent
//! cohesion = mean over i of s_i
//! ```
//!
//! Neither value depends on the order of the ids. A vector together with its
//! own true top-M neighbors always scores 1.0. Each report also carries the
//! algebraic connectivity of the set.

mod auditor;
pub mod spectral;
mod types;

#[cfg(test)]
mod tests;

pub use auditor::TopologyAuditor;
pub use types::AuditReport;
