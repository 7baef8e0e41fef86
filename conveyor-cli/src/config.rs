//! Configuration module
//!
//! Global CLI settings and how they combine with the engine's environment
//! configuration.

use anyhow::{Context, Result};
use conveyor_core::domain::definition::DefinitionModel;
use conveyor_runner::{BackendKind, EngineConfig};
use std::path::PathBuf;

/// CLI configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Pipeline definition file
    pub file: PathBuf,

    /// Backend chosen on the command line, overriding `CONVEYOR_BACKEND`
    pub backend: Option<BackendKind>,
}

impl Config {
    /// Loads and validates the definition file
    ///
    /// Definition errors are kept as the root cause so the caller can tell
    /// them apart from other failures.
    pub fn load_definition(&self) -> Result<DefinitionModel> {
        let model = conveyor_definition::load_definition(&self.file)?;
        tracing::debug!(
            "Loaded {} (version {}): {} jobs, {} workflows",
            self.file.display(),
            model.version(),
            model.jobs().len(),
            model.workflows().len()
        );
        Ok(model)
    }

    /// Engine configuration from the environment, with CLI overrides applied
    pub fn engine_config(&self) -> Result<EngineConfig> {
        let mut config = EngineConfig::from_env().context("Invalid engine configuration")?;
        if let Some(backend) = self.backend {
            config = config.with_backend(backend);
        }
        config.validate()?;
        Ok(config)
    }
}
