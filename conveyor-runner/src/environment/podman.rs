//! Podman environment backend
//!
//! Handles container lifecycle for job runs:
//! - Checking podman availability
//! - Starting one long-lived container per job run
//! - Executing step commands in it with `podman exec`
//! - Force-removing the container on release

use anyhow::Context;
use async_trait::async_trait;
use conveyor_core::domain::definition::EnvironmentSpec;
use conveyor_core::domain::job::JobRunId;
use conveyor_core::error::EnvironmentError;
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::{debug, error, info, warn};

use super::{EnvironmentBackend, EnvironmentHandle, RunningCommand, process::spawn_streaming};

/// Root of relative working directories inside the container
const CONTAINER_WORKSPACE: &str = "/workspace";

/// Checks if podman is installed and available
pub fn check_podman_available() -> anyhow::Result<()> {
    let output = std::process::Command::new("podman")
        .arg("--version")
        .output()
        .context("Failed to execute 'podman --version'. Is podman installed?")?;

    if !output.status.success() {
        anyhow::bail!("Podman is not working correctly");
    }

    let version = String::from_utf8_lossy(&output.stdout);
    info!("Podman is available: {}", version.trim());

    Ok(())
}

#[derive(Debug, Default)]
pub struct PodmanBackend {}

impl PodmanBackend {
    pub fn new() -> Self {
        Self {}
    }

    fn container_name(run_id: JobRunId) -> String {
        format!("conveyor-{}", run_id)
    }
}

/// Resolves the working directory inside the container
fn container_directory(working_directory: &str) -> PathBuf {
    let path = Path::new(working_directory);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        Path::new(CONTAINER_WORKSPACE).join(path)
    }
}

/// Arguments of the `podman run` that starts a job run's container
fn run_arguments(name: &str, working_directory: &Path, spec: &EnvironmentSpec) -> Vec<String> {
    let mut args = vec![
        "run".to_string(),
        "-d".to_string(),
        "--name".to_string(),
        name.to_string(),
        // Override any image entrypoint
        "--entrypoint".to_string(),
        "/bin/sh".to_string(),
        "-w".to_string(),
        working_directory.to_string_lossy().to_string(),
    ];

    for (key, value) in &spec.variables {
        args.push("-e".to_string());
        args.push(format!("{}={}", key, value));
    }

    args.push(spec.image.clone());
    args.push("-c".to_string());
    args.push("sleep infinity".to_string());
    args
}

#[async_trait]
impl EnvironmentBackend for PodmanBackend {
    fn name(&self) -> &'static str {
        "podman"
    }

    async fn acquire(
        &self,
        run_id: JobRunId,
        spec: &EnvironmentSpec,
    ) -> Result<EnvironmentHandle, EnvironmentError> {
        let name = Self::container_name(run_id);
        let working_directory = container_directory(&spec.working_directory);

        info!("Creating container {} for image {}", name, spec.image);

        // podman run blocks until the container is running
        let output = Command::new("podman")
            .args(run_arguments(&name, &working_directory, spec))
            .output()
            .await
            .map_err(|e| EnvironmentError::Unavailable(format!("failed to run podman: {}", e)))?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);

        if !stderr.trim().is_empty() {
            debug!("podman run stderr: {}", stderr.trim());
        }

        if !output.status.success() {
            let reason = format!(
                "exit_code={}, stderr='{}'",
                output.status.code().unwrap_or(-1),
                stderr.trim()
            );
            error!("Failed to start container {}: {}", name, reason);

            // podman may leave a created container behind
            let _ = Command::new("podman")
                .args(["rm", "-f", "--ignore", name.as_str()])
                .output()
                .await;

            return Err(EnvironmentError::Provision {
                image: spec.image.clone(),
                reason,
            });
        }

        info!(
            "Container {} started successfully with ID: {}",
            name,
            stdout.trim()
        );

        Ok(EnvironmentHandle {
            id: name,
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
        debug!("Executing in container {}: {}", handle.id, command);

        let mut process = Command::new("podman");
        process
            .arg("exec")
            .arg("-w")
            .arg(&handle.working_directory)
            .arg(&handle.id)
            .args(["/bin/sh", "-c", command]);

        spawn_streaming(process).map_err(|e| EnvironmentError::Exec {
            environment: handle.id.clone(),
            reason: e.to_string(),
        })
    }

    async fn release(&self, handle: &EnvironmentHandle) -> Result<(), EnvironmentError> {
        debug!("Removing container {}", handle.id);

        let output = Command::new("podman")
            .args(["rm", "-f", "--ignore", handle.id.as_str()])
            .output()
            .await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!("Failed to remove container {}: {}", handle.id, stderr.trim());
            return Err(EnvironmentError::Exec {
                environment: handle.id.clone(),
                reason: stderr.trim().to_string(),
            });
        }

        debug!("Container {} removed", handle.id);
        Ok(())
    }
}
