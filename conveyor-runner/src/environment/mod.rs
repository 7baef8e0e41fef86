//! Environment provisioning
//!
//! An [`EnvironmentBackend`] creates one isolated execution environment per
//! job run, executes commands inside it and tears it down again. Callers never
//! hold a raw handle: [`EnvironmentLease`] owns it and guarantees the backend's
//! `release` is called exactly once, either explicitly or when the lease is
//! dropped.

mod local;
mod podman;
mod process;

#[cfg(test)]
pub(crate) mod mock;

use async_trait::async_trait;
use conveyor_core::domain::definition::EnvironmentSpec;
use conveyor_core::domain::job::JobRunId;
use conveyor_core::domain::log::OutputLine;
use conveyor_core::error::EnvironmentError;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::config::{BackendKind, EngineConfig};

pub use local::LocalBackend;
pub use podman::{PodmanBackend, check_podman_available};
pub use process::spawn_streaming;

/// A provisioned environment
///
/// Identifies exactly one job run's environment; never shared between runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvironmentHandle {
    /// Backend identifier (container name or workspace directory)
    pub id: String,

    pub run_id: JobRunId,
    pub image: String,

    /// Directory commands start in, as seen from inside the environment
    pub working_directory: PathBuf,

    /// Variables exported to every command
    pub variables: BTreeMap<String, String>,
}

/// A command executing inside an environment
///
/// Output lines arrive on `output` while the command runs. `exit` resolves
/// with the exit code after all output has been delivered.
pub struct RunningCommand {
    pub output: mpsc::Receiver<OutputLine>,
    pub exit: oneshot::Receiver<Result<i32, EnvironmentError>>,
    kill: Option<oneshot::Sender<()>>,
}

impl RunningCommand {
    pub fn new(
        output: mpsc::Receiver<OutputLine>,
        exit: oneshot::Receiver<Result<i32, EnvironmentError>>,
        kill: oneshot::Sender<()>,
    ) -> Self {
        Self {
            output,
            exit,
            kill: Some(kill),
        }
    }

    /// Asks the backend to terminate the command
    pub fn kill(&mut self) {
        if let Some(kill) = self.kill.take() {
            let _ = kill.send(());
        }
    }
}

/// Backend able to provision environments and run commands in them
#[async_trait]
pub trait EnvironmentBackend: Send + Sync {
    /// Short backend name for logs
    fn name(&self) -> &'static str;

    /// Provisions a fresh environment for `run_id`
    async fn acquire(
        &self,
        run_id: JobRunId,
        spec: &EnvironmentSpec,
    ) -> Result<EnvironmentHandle, EnvironmentError>;

    /// Starts `command` through the environment's shell
    async fn exec(
        &self,
        handle: &EnvironmentHandle,
        command: &str,
    ) -> Result<RunningCommand, EnvironmentError>;

    /// Tears the environment down; releasing twice is not an error
    async fn release(&self, handle: &EnvironmentHandle) -> Result<(), EnvironmentError>;
}

/// Builds the backend selected in the configuration
pub fn create_backend(config: &EngineConfig) -> anyhow::Result<Arc<dyn EnvironmentBackend>> {
    let backend: Arc<dyn EnvironmentBackend> = match config.backend {
        BackendKind::Local => Arc::new(LocalBackend::new(config.workspace_base.clone())),
        BackendKind::Podman => {
            check_podman_available()?;
            Arc::new(PodmanBackend::new())
        }
    };
    Ok(backend)
}

/// Exclusive ownership of one provisioned environment
pub struct EnvironmentLease {
    backend: Arc<dyn EnvironmentBackend>,
    handle: Option<EnvironmentHandle>,
}

impl EnvironmentLease {
    /// Provisions an environment and wraps it in a lease
    pub async fn acquire(
        backend: Arc<dyn EnvironmentBackend>,
        run_id: JobRunId,
        spec: &EnvironmentSpec,
    ) -> Result<Self, EnvironmentError> {
        let handle = backend.acquire(run_id, spec).await?;
        debug!(
            "Acquired {} environment {} for run {}",
            backend.name(),
            handle.id,
            run_id
        );

        Ok(Self {
            backend,
            handle: Some(handle),
        })
    }

    pub fn handle(&self) -> Option<&EnvironmentHandle> {
        self.handle.as_ref()
    }

    /// Starts a command inside the leased environment
    pub async fn exec(&self, command: &str) -> Result<RunningCommand, EnvironmentError> {
        let handle = self
            .handle
            .as_ref()
            .ok_or_else(|| EnvironmentError::Released("lease".to_string()))?;
        self.backend.exec(handle, command).await
    }

    /// Releases the environment now
    pub async fn release(mut self) {
        if let Some(handle) = self.handle.take() {
            if let Err(e) = self.backend.release(&handle).await {
                warn!("Failed to release environment {}: {}", handle.id, e);
            } else {
                debug!("Released environment {}", handle.id);
            }
        }
    }
}

impl Drop for EnvironmentLease {
    fn drop(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };

        warn!(
            "Environment {} dropped without release, releasing in background",
            handle.id
        );

        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                let backend = Arc::clone(&self.backend);
                runtime.spawn(async move {
                    if let Err(e) = backend.release(&handle).await {
                        warn!("Failed to release environment {}: {}", handle.id, e);
                    }
                });
            }
            Err(_) => warn!(
                "No runtime available, environment {} was not released",
                handle.id
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::mock::ScriptedBackend;
    use super::*;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_lease_release_once() {
        let backend = Arc::new(ScriptedBackend::new());
        let run_id = Uuid::new_v4();

        let lease = EnvironmentLease::acquire(backend.clone(), run_id, &EnvironmentSpec::new("alpine"))
            .await
            .unwrap();
        assert!(lease.handle().is_some());

        lease.release().await;
        assert_eq!(backend.releases(run_id), 1);
    }

    #[tokio::test]
    async fn test_lease_released_on_drop() {
        let backend = Arc::new(ScriptedBackend::new());
        let run_id = Uuid::new_v4();

        {
            let _lease =
                EnvironmentLease::acquire(backend.clone(), run_id, &EnvironmentSpec::new("alpine"))
                    .await
                    .unwrap();
        }

        for _ in 0..100 {
            if backend.releases(run_id) > 0 {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(backend.releases(run_id), 1);
    }

    #[tokio::test]
    async fn test_acquire_failure() {
        let backend = Arc::new(ScriptedBackend::new().failing_acquire("image pull denied"));

        let result =
            EnvironmentLease::acquire(backend.clone(), Uuid::new_v4(), &EnvironmentSpec::new("alpine"))
                .await;
        assert!(matches!(result, Err(EnvironmentError::Provision { .. })));
    }
}
