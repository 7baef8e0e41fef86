//! Error types for Conveyor
//!
//! - [`DefinitionError`]: the definition document is invalid; nothing runs
//! - [`EnvironmentError`]: provisioning or command execution failed
//! - [`RunFailure`]: why a job run ended unsuccessfully, recorded on the run
//! - [`TransitionError`]: an illegal job run state transition was attempted

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

use crate::domain::job::{JobRunId, JobRunStatus};
use crate::schedule::ScheduleError;

/// Errors raised while loading or validating a definition
#[derive(Debug, Error)]
pub enum DefinitionError {
    /// The definition file could not be read
    #[error("failed to read definition file {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The document is not well-formed
    #[error("invalid definition document: {0}")]
    Syntax(String),

    #[error("definition document has no version tag")]
    MissingVersion,

    #[error("duplicate job name '{0}'")]
    DuplicateJob(String),

    #[error("duplicate workflow name '{0}'")]
    DuplicateWorkflow(String),

    #[error("workflow '{workflow}' references unknown job '{job}'")]
    UnknownJob { workflow: String, job: String },

    #[error("workflow '{workflow}' references job '{job}' more than once")]
    DuplicateJobReference { workflow: String, job: String },

    #[error("workflow '{0}' does not reference any job")]
    EmptyWorkflow(String),

    #[error("job '{0}' has no steps")]
    EmptySteps(String),

    #[error("workflow '{workflow}' has a malformed trigger: {reason}")]
    MalformedTrigger { workflow: String, reason: String },

    #[error("schedule trigger of workflow '{0}' is missing a recurrence expression")]
    MissingRecurrence(String),

    #[error("schedule trigger of workflow '{workflow}' is invalid: {source}")]
    InvalidSchedule {
        workflow: String,
        #[source]
        source: ScheduleError,
    },

    #[error("{owner}: invalid {field}: {reason}")]
    InvalidField {
        owner: String,
        field: &'static str,
        reason: String,
    },
}

impl DefinitionError {
    pub fn invalid_field(
        owner: impl Into<String>,
        field: &'static str,
        reason: impl Into<String>,
    ) -> Self {
        Self::InvalidField {
            owner: owner.into(),
            field,
            reason: reason.into(),
        }
    }

    pub fn malformed_trigger(workflow: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MalformedTrigger {
            workflow: workflow.into(),
            reason: reason.into(),
        }
    }
}

/// Errors raised by an environment backend
///
/// Never retried: an environment error fails the owning job run.
#[derive(Debug, Error)]
pub enum EnvironmentError {
    /// The backend's tooling is missing or not working
    #[error("environment backend unavailable: {0}")]
    Unavailable(String),

    #[error("failed to provision environment from image {image}: {reason}")]
    Provision { image: String, reason: String },

    #[error("failed to execute command in environment {environment}: {reason}")]
    Exec { environment: String, reason: String },

    #[error("environment {0} has already been released")]
    Released(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Reason a job run did not succeed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RunFailure {
    #[error("environment error: {message}")]
    Environment { message: String },

    #[error("step '{step}' exited with status {exit_code}")]
    StepFailure { step: String, exit_code: i32 },

    #[error("step '{step}' produced no output for {timeout_ms}ms")]
    StepTimeout { step: String, timeout_ms: u64 },
}

impl From<&EnvironmentError> for RunFailure {
    fn from(err: &EnvironmentError) -> Self {
        RunFailure::Environment {
            message: err.to_string(),
        }
    }
}

/// An illegal job run state transition
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("job run {run_id}: illegal transition from {from} to {to}")]
pub struct TransitionError {
    pub run_id: JobRunId,
    pub from: JobRunStatus,
    pub to: JobRunStatus,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_failure_serialization() {
        let failure = RunFailure::StepFailure {
            step: "test".to_string(),
            exit_code: 2,
        };

        let json = serde_json::to_value(&failure).unwrap();
        assert_eq!(json["kind"], "step_failure");
        assert_eq!(json["exit_code"], 2);

        let back: RunFailure = serde_json::from_value(json).unwrap();
        assert_eq!(back, failure);
        assert_eq!(back.to_string(), "step 'test' exited with status 2");
    }

    #[test]
    fn test_environment_failure_message() {
        let err = EnvironmentError::Provision {
            image: "alpine".to_string(),
            reason: "pull denied".to_string(),
        };

        let failure = RunFailure::from(&err);
        assert!(failure.to_string().contains("pull denied"));
    }
}
