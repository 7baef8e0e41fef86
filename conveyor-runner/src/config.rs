//! Engine configuration
//!
//! Defines all tunable parameters of the engine: step timeouts, capacity per
//! resource class, where local workspaces live and which environment backend
//! provisions job runs.

use anyhow::Context;
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Which environment backend provisions job runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackendKind {
    /// Scratch directory on the host, commands run through `/bin/sh`
    #[default]
    Local,

    /// One podman container per job run
    Podman,
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "local" => Ok(BackendKind::Local),
            "podman" => Ok(BackendKind::Podman),
            other => Err(format!(
                "unknown backend '{}', expected 'local' or 'podman'",
                other
            )),
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::Local => write!(f, "local"),
            BackendKind::Podman => write!(f, "podman"),
        }
    }
}

/// Engine configuration
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Timeout applied to steps that do not declare one
    pub default_step_timeout: Duration,

    /// Explicit capacity per resource class
    pub capacity: HashMap<String, usize>,

    /// Capacity of any resource class not listed in `capacity`
    pub default_capacity: usize,

    /// Base directory for local backend workspaces
    pub workspace_base: PathBuf,

    pub backend: BackendKind,

    /// Maximum number of output lines kept per step
    pub max_output_lines: usize,
}

impl EngineConfig {
    /// Creates a new configuration with defaults
    pub fn new() -> Self {
        Self {
            default_step_timeout: Duration::from_secs(600),
            capacity: HashMap::new(),
            default_capacity: 2,
            workspace_base: std::env::temp_dir().join("conveyor"),
            backend: BackendKind::Local,
            max_output_lines: 10_000,
        }
    }

    /// Creates configuration from environment variables
    ///
    /// Every variable is optional and falls back to the default:
    /// - CONVEYOR_STEP_TIMEOUT (seconds, default: 600)
    /// - CONVEYOR_CAPACITY (`class=n,class=n`)
    /// - CONVEYOR_DEFAULT_CAPACITY (default: 2)
    /// - CONVEYOR_WORKSPACE (default: system temp dir + `/conveyor`)
    /// - CONVEYOR_BACKEND (`local` or `podman`, default: local)
    /// - CONVEYOR_MAX_OUTPUT_LINES (default: 10000)
    pub fn from_env() -> anyhow::Result<Self> {
        let mut config = Self::new();

        if let Some(value) = env_var("CONVEYOR_STEP_TIMEOUT") {
            let seconds = value
                .parse::<u64>()
                .with_context(|| format!("CONVEYOR_STEP_TIMEOUT is not a number: '{}'", value))?;
            config.default_step_timeout = Duration::from_secs(seconds);
        }

        if let Some(value) = env_var("CONVEYOR_CAPACITY") {
            config.capacity = parse_capacity(&value).context("Invalid CONVEYOR_CAPACITY")?;
        }

        if let Some(value) = env_var("CONVEYOR_DEFAULT_CAPACITY") {
            config.default_capacity = value.parse::<usize>().with_context(|| {
                format!("CONVEYOR_DEFAULT_CAPACITY is not a number: '{}'", value)
            })?;
        }

        if let Some(value) = env_var("CONVEYOR_WORKSPACE") {
            config.workspace_base = PathBuf::from(value);
        }

        if let Some(value) = env_var("CONVEYOR_BACKEND") {
            config.backend = value.parse().map_err(anyhow::Error::msg)?;
        }

        if let Some(value) = env_var("CONVEYOR_MAX_OUTPUT_LINES") {
            config.max_output_lines = value.parse::<usize>().with_context(|| {
                format!("CONVEYOR_MAX_OUTPUT_LINES is not a number: '{}'", value)
            })?;
        }

        Ok(config)
    }

    /// Sets the capacity of one resource class
    pub fn with_capacity(mut self, resource_class: impl Into<String>, capacity: usize) -> Self {
        self.capacity.insert(resource_class.into(), capacity);
        self
    }

    pub fn with_backend(mut self, backend: BackendKind) -> Self {
        self.backend = backend;
        self
    }

    pub fn with_workspace_base(mut self, workspace_base: impl Into<PathBuf>) -> Self {
        self.workspace_base = workspace_base.into();
        self
    }

    /// Capacity of `resource_class`
    pub fn capacity_for(&self, resource_class: &str) -> usize {
        self.capacity
            .get(resource_class)
            .copied()
            .unwrap_or(self.default_capacity)
    }

    /// Validates the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.default_step_timeout.is_zero() {
            anyhow::bail!("default_step_timeout must be greater than 0");
        }

        if self.default_capacity == 0 {
            anyhow::bail!("default_capacity must be greater than 0");
        }

        if let Some((class, _)) = self.capacity.iter().find(|(_, n)| **n == 0) {
            anyhow::bail!("capacity of resource class '{}' must be greater than 0", class);
        }

        if self.workspace_base.as_os_str().is_empty() {
            anyhow::bail!("workspace_base cannot be empty");
        }

        if self.max_output_lines == 0 {
            anyhow::bail!("max_output_lines must be greater than 0");
        }

        Ok(())
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::new()
    }
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

/// Parses `class=n,class=n`
fn parse_capacity(value: &str) -> anyhow::Result<HashMap<String, usize>> {
    let mut capacity = HashMap::new();

    for entry in value.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        let (class, count) = entry
            .split_once('=')
            .with_context(|| format!("expected 'class=n', got '{}'", entry))?;

        let class = class.trim();
        if class.is_empty() {
            anyhow::bail!("empty resource class in '{}'", entry);
        }

        let count = count
            .trim()
            .parse::<usize>()
            .with_context(|| format!("capacity of '{}' is not a number", class))?;

        capacity.insert(class.to_string(), count);
    }

    Ok(capacity)
}
