//! Configuration management for the GrainVDB engine.

mod sub_configs;


use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};

pub use sub_configs::{
    AuditConfig, BackendConfig, BackendKindConfig, FoldKind, LoggingConfig, StoreConfig,
};

/// Environment variable selecting the environment-specific config file.
pub const ENV_SELECTOR: &str = "GRAINVDB_ENV";

/// Prefix for environment variable overrides, e.g. `GRAINVDB__STORE__GROWTH_FACTOR`.
pub const ENV_PREFIX: &str = "GRAINVDB";

/// Main engine configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct EngineConfig {
    /// Vector dimensionality of every context built from this config.
    #[serde(default = "default_rank")]
    pub rank: usize,
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub audit: AuditConfig,
    #[serde(default)]
    pub fold: FoldKind,
    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_rank() -> usize {
    128
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            rank: default_rank(),
            backend: BackendConfig::default(),
            store: StoreConfig::default(),
            audit: AuditConfig::default(),
            fold: FoldKind::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from files and environment.
    ///
    /// Sources are layered in order:
    /// 1. `config/default.toml`
    /// 2. `config/{GRAINVDB_ENV}.toml` (default `development`)
    /// 3. Environment variables `GRAINVDB__<SECTION>__<KEY>`
    pub fn load() -> EngineResult<Self> {
        let env = std::env::var(ENV_SELECTOR).unwrap_or_else(|_| "development".to_string());
        Self::load_from_dir(Path::new("config"), &env)
    }

    /// [`EngineConfig::load`] with an explicit config directory and environment name.
    pub fn load_from_dir(dir: &Path, env: &str) -> EngineResult<Self> {
        let builder = config::Config::builder()
            .add_source(config::File::from(dir.join("default")).required(false))
            .add_source(config::File::from(dir.join(env)).required(false))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            );

        let config: EngineConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a single TOML file.
    pub fn from_file(path: &Path) -> EngineResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            EngineError::Config(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate a TOML document.
    pub fn from_toml_str(content: &str) -> EngineResult<Self> {
        let config: EngineConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values.
    pub fn validate(&self) -> EngineResult<()> {
        if self.rank == 0 {
            return Err(EngineError::Config("rank must be greater than 0".into()));
        }

        if !(self.store.growth_factor > 1.0 && self.store.growth_factor.is_finite()) {
            return Err(EngineError::Config(format!(
                "store.growth_factor must be a finite value greater than 1.0, got {}",
                self.store.growth_factor
            )));
        }

        let threshold = self.audit.connectivity_threshold;
        if !(-1.0..=1.0).contains(&threshold) {
            return Err(EngineError::Config(format!(
                "audit.connectivity_threshold must be within [-1, 1], got {}",
                threshold
            )));
        }

        if self.backend.kind == BackendKindConfig::Cuda && self.backend.module_path.is_none() {
            return Err(EngineError::Config(
                "backend.module_path is required when backend.kind = \"cuda\"".into(),
            ));
        }

        if self.backend.kind == BackendKindConfig::Cuda && self.backend.memory_budget_bytes.is_some() {
            tracing::warn!("backend.memory_budget_bytes only applies to the cpu backend; ignoring");
        }

        Ok(())
    }
}
