//! Top-K similarity resolution.
//!
//! A query scores every stored row against a probe on the backend, then
//! selects the best `min(top, size)` rows with a partial selection. Results
//! are ordered by magnitude descending with ties broken by lower id.

mod engine;
mod types;


pub use engine::QueryEngine;
pub use types::{Neighbor, NeighborResult, QueryOutcome};
