//! Local environment backend
//!
//! Every job run gets a fresh scratch directory under the workspace base and
//! its commands run through `/bin/sh -c` on the host. The image is recorded
//! on the handle but not enforced. Each command runs in its own process
//! group, which is killed once the command exits or times out.

use async_trait::async_trait;
use conveyor_core::domain::definition::EnvironmentSpec;
use conveyor_core::domain::job::JobRunId;
use conveyor_core::error::EnvironmentError;
use std::path::{Component, Path, PathBuf};
use tokio::process::Command;
use tracing::{debug, info};

use super::{EnvironmentBackend, EnvironmentHandle, RunningCommand, process::spawn_streaming};

pub struct LocalBackend {
    workspace_base: PathBuf,
}

impl LocalBackend {
    /// Creates a backend that places run directories under `workspace_base`
    pub fn new(workspace_base: impl Into<PathBuf>) -> Self {
        Self {
            workspace_base: workspace_base.into(),
        }
    }

    fn run_directory(&self, run_id: JobRunId) -> PathBuf {
        self.workspace_base.join(run_id.to_string())
    }
}

/// Keeps only the normal components so the directory stays inside the run
fn relative_directory(working_directory: &str) -> PathBuf {
    Path::new(working_directory)
        .components()
        .filter_map(|component| match component {
            Component::Normal(part) => Some(part),
            _ => None,
        })
        .collect()
}

#[async_trait]
impl EnvironmentBackend for LocalBackend {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn acquire(
        &self,
        run_id: JobRunId,
        spec: &EnvironmentSpec,
    ) -> Result<EnvironmentHandle, EnvironmentError> {
        let run_directory = self.run_directory(run_id);
        let working_directory = run_directory.join(relative_directory(&spec.working_directory));

        info!(
            "Creating workspace {} for run {}",
            working_directory.display(),
            run_id
        );

        tokio::fs::create_dir_all(&working_directory)
            .await
            .map_err(|e| EnvironmentError::Provision {
                image: spec.image.clone(),
                reason: format!(
                    "failed to create workspace {}: {}",
                    working_directory.display(),
                    e
                ),
            })?;

        Ok(EnvironmentHandle {
            id: run_directory.to_string_lossy().to_string(),
            run_id,
            image: spec.image.clone(),
            working_directory,
            variables: spec.variables.clone(),
        })
    }

    async fn exec(
        &self,
        handle: &EnvironmentHandle,
        command: &str,
    ) -> Result<RunningCommand, EnvironmentError> {
        debug!("Executing in {}: {}", handle.working_directory.display(), command);

        let mut process = Command::new("/bin/sh");
        process
            .arg("-c")
            .arg(command)
            .current_dir(&handle.working_directory)
            .envs(&handle.variables);

        spawn_streaming(process).map_err(|e| EnvironmentError::Exec {
            environment: handle.id.clone(),
            reason: e.to_string(),
        })
    }

    async fn release(&self, handle: &EnvironmentHandle) -> Result<(), EnvironmentError> {
        let run_directory = self.run_directory(handle.run_id);

        match tokio::fs::remove_dir_all(&run_directory).await {
            Ok(()) => {
                debug!("Removed workspace {}", run_directory.display());
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
