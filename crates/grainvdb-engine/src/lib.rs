//! GrainVDB: a GPU-resident nearest-neighbor manifold engine.
//!
//! A [`Context`] holds one append-only manifold of fixed-rank `f32` vectors
//! on a compute backend from `grainvdb-cuda`. It supports:
//!
//! - **ingest**: append a batch, optionally folded, and receive dense ids
//! - **query**: top-K most similar stored vectors for a probe
//! - **audit**: score how coherent a claimed neighbor set is with the
//!   manifold's own similarity structure
//!
//! # Architecture
//!
//! - **config**: layered TOML plus environment configuration
//! - **error**: [`EngineError`] and its failure classes
//! - **fold**: per-batch ingestion transforms
//! - **store**: device-resident vector storage with rollback on failure
//! - **query**: similarity scoring plus partial top-K selection
//! - **audit**: density-based topology audit and spectral connectivity
//! - **telemetry**: `tracing` subscriber setup
//!
//! # Example
//!
//! ```
//! use grainvdb_engine::{Context, EngineConfig};
//!
//! let config = EngineConfig::from_toml_str("rank = 2").unwrap();
//! let ctx = Context::from_config(&config).unwrap();
//! ctx.ingest(&[1.0, 0.0, 0.0, 1.0], 2, false).unwrap();
//!
//! let outcome = ctx.query(&[0.9, 0.1], 1).unwrap();
//! assert_eq!(outcome.result.ids(), vec![0]);
//! ```

pub mod audit;
pub mod config;
pub mod context;
pub mod error;
pub mod fold;
pub mod query;
pub mod store;
pub mod telemetry;

pub use audit::{AuditReport, TopologyAuditor};
pub use config::EngineConfig;
pub use context::{Context, ContextOptions, ManifoldStats};
pub use error::{EngineError, EngineResult, ErrorClass};
pub use fold::{FoldTransform, IdentityFold, PhaseFold};
pub use query::{Neighbor, NeighborResult, QueryEngine, QueryOutcome};
pub use store::ManifoldStore;
pub use telemetry::init_tracing;
