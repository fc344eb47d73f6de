//! Sub-configuration structures for the engine components.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Which compute backend a context binds to.
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BackendKindConfig {
    /// Rayon-parallel host backend with built-in kernels
    #[default]
    Cpu,
    /// CUDA driver backend loading `module_path`
    Cuda,
}

impl From<BackendKindConfig> for grainvdb_cuda::BackendKind {
    fn from(kind: BackendKindConfig) -> Self {
        match kind {
            BackendKindConfig::Cpu => grainvdb_cuda::BackendKind::Cpu,
            BackendKindConfig::Cuda => grainvdb_cuda::BackendKind::Cuda,
        }
    }
}

/// Compute backend configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct BackendConfig {
    #[serde(default)]
    pub kind: BackendKindConfig,
    /// Compiled kernel module (PTX/cubin). Required when `kind = "cuda"`.
    #[serde(default)]
    pub module_path: Option<PathBuf>,
    #[serde(default)]
    pub device_ordinal: i32,
    /// Allocation budget for the CPU backend; unlimited when unset.
    #[serde(default)]
    pub memory_budget_bytes: Option<usize>,
}

/// Manifold store growth policy.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct StoreConfig {
    /// Rows reserved on first ingest (at least the batch size).
    #[serde(default = "default_initial_capacity")]
    pub initial_capacity: usize,
    /// Capacity multiplier applied on growth; must be > 1.
    #[serde(default = "default_growth_factor")]
    pub growth_factor: f64,
}

fn default_initial_capacity() -> usize {
    1024
}

fn default_growth_factor() -> f64 {
    2.0
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            initial_capacity: default_initial_capacity(),
            growth_factor: default_growth_factor(),
        }
    }
}

/// Topology audit settings.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct AuditConfig {
    /// Cosine above which two audited vectors are considered connected.
    #[serde(default = "default_connectivity_threshold")]
    pub connectivity_threshold: f32,
}

fn default_connectivity_threshold() -> f32 {
    0.8
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            connectivity_threshold: default_connectivity_threshold(),
        }
    }
}

/// Fold transform applied to batches ingested with the fold flag.
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FoldKind {
    #[default]
    Identity,
    Phase,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    /// One of "pretty", "compact", "full".
    pub format: String,
    pub include_location: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            include_location: false,
        }
    }
}
