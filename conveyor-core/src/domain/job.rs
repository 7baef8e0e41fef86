//! Job run domain types
//!
//! A [`JobRun`] is the concrete execution of one job definition. Its status
//! only moves along the edges allowed by [`JobRunStatus::can_transition_to`];
//! once terminal, a run never changes again.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::definition::JobDefinition;
use crate::domain::log::OutputLine;
use crate::error::{RunFailure, TransitionError};

pub type JobRunId = Uuid;
pub type WorkflowRunId = Uuid;

/// Job run execution status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobRunStatus {
    /// Waiting for capacity in its resource class
    Queued,

    /// Admitted; the environment is being acquired
    Provisioning,

    /// Steps are executing
    Running,

    Succeeded,
    Failed,
    TimedOut,
}

impl JobRunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobRunStatus::Succeeded | JobRunStatus::Failed | JobRunStatus::TimedOut
        )
    }

    /// Whether the state machine allows moving from `self` to `next`
    pub fn can_transition_to(&self, next: JobRunStatus) -> bool {
        use JobRunStatus::*;

        matches!(
            (self, next),
            (Queued, Provisioning)
                | (Provisioning, Running)
                | (Provisioning, Failed)
                | (Running, Succeeded)
                | (Running, Failed)
                | (Running, TimedOut)
        )
    }
}

impl std::fmt::Display for JobRunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobRunStatus::Queued => write!(f, "Queued"),
            JobRunStatus::Provisioning => write!(f, "Provisioning"),
            JobRunStatus::Running => write!(f, "Running"),
            JobRunStatus::Succeeded => write!(f, "Succeeded"),
            JobRunStatus::Failed => write!(f, "Failed"),
            JobRunStatus::TimedOut => write!(f, "TimedOut"),
        }
    }
}

/// Outcome of a single step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StepStatus {
    NotRun,
    Succeeded,
    Failed,
    TimedOut,
}

impl std::fmt::Display for StepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StepStatus::NotRun => write!(f, "NotRun"),
            StepStatus::Succeeded => write!(f, "Succeeded"),
            StepStatus::Failed => write!(f, "Failed"),
            StepStatus::TimedOut => write!(f, "TimedOut"),
        }
    }
}

/// Recorded result of one step of a job run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepResult {
    pub name: String,
    pub status: StepStatus,
    pub exit_code: Option<i32>,

    /// The step failed but was marked `allow_failure`
    pub allowed_failure: bool,

    pub output: Vec<OutputLine>,
    pub duration_ms: Option<u64>,
}

impl StepResult {
    pub fn not_run(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: StepStatus::NotRun,
            exit_code: None,
            allowed_failure: false,
            output: Vec::new(),
            duration_ms: None,
        }
    }

    /// Whether this step stops the job from continuing
    pub fn is_fatal(&self) -> bool {
        match self.status {
            StepStatus::TimedOut => true,
            StepStatus::Failed => !self.allowed_failure,
            StepStatus::NotRun | StepStatus::Succeeded => false,
        }
    }
}

/// Terminal result produced by the step executor for one job run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobOutcome {
    pub status: JobRunStatus,
    pub steps: Vec<StepResult>,
    pub failure: Option<RunFailure>,
}

/// Job execution record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRun {
    pub id: JobRunId,
    pub workflow_run_id: WorkflowRunId,
    pub workflow: String,
    pub job: String,
    pub resource_class: String,
    pub status: JobRunStatus,

    /// One entry per step of the job, in definition order
    pub steps: Vec<StepResult>,

    pub failure: Option<RunFailure>,
    pub queued_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl JobRun {
    /// Creates a queued run with every step NotRun
    pub fn queued(workflow_run_id: WorkflowRunId, workflow: &str, job: &JobDefinition) -> Self {
        Self {
            id: Uuid::new_v4(),
            workflow_run_id,
            workflow: workflow.to_string(),
            job: job.name.clone(),
            resource_class: job.environment.resource_class.clone(),
            status: JobRunStatus::Queued,
            steps: job
                .steps
                .iter()
                .map(|step| StepResult::not_run(&step.name))
                .collect(),
            failure: None,
            queued_at: Utc::now(),
            started_at: None,
            finished_at: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Moves the run to `next`, stamping start and finish times
    pub fn transition(&mut self, next: JobRunStatus) -> Result<(), TransitionError> {
        if !self.status.can_transition_to(next) {
            return Err(TransitionError {
                run_id: self.id,
                from: self.status,
                to: next,
            });
        }

        let now = Utc::now();
        if next == JobRunStatus::Provisioning {
            self.started_at = Some(now);
        }
        if next.is_terminal() {
            self.finished_at = Some(now);
        }
        self.status = next;

        Ok(())
    }

    /// Records the executor's outcome and moves to its terminal status
    pub fn complete(&mut self, outcome: JobOutcome) -> Result<(), TransitionError> {
        self.transition(outcome.status)?;
        self.steps = outcome.steps;
        self.failure = outcome.failure;
        Ok(())
    }

    /// Wall-clock time between admission and completion
    pub fn duration(&self) -> Option<chrono::Duration> {
        Some(self.finished_at? - self.started_at?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::definition::{EnvironmentSpec, StepDefinition};

    fn unit_job() -> JobDefinition {
        JobDefinition {
            name: "unit".to_string(),
            environment: EnvironmentSpec::new("alpine").with_resource_class("small"),
            steps: vec![
                StepDefinition::new("install", "true"),
                StepDefinition::new("test", "true"),
            ],
        }
    }

    #[test]
    fn test_queued_run() {
        let run = JobRun::queued(Uuid::new_v4(), "commit", &unit_job());

        assert_eq!(run.status, JobRunStatus::Queued);
        assert_eq!(run.resource_class, "small");
        assert_eq!(run.steps.len(), 2);
        assert!(run.steps.iter().all(|s| s.status == StepStatus::NotRun));
        assert!(run.started_at.is_none());
    }

    #[test]
    fn test_happy_path_transitions() {
        let mut run = JobRun::queued(Uuid::new_v4(), "commit", &unit_job());

        run.transition(JobRunStatus::Provisioning).unwrap();
        assert!(run.started_at.is_some());
        run.transition(JobRunStatus::Running).unwrap();
        run.transition(JobRunStatus::Succeeded).unwrap();
        assert!(run.finished_at.is_some());
        assert!(run.duration().is_some());
    }

    #[test]
    fn test_terminal_states_are_final() {
        let mut run = JobRun::queued(Uuid::new_v4(), "commit", &unit_job());
        run.transition(JobRunStatus::Provisioning).unwrap();
        run.transition(JobRunStatus::Failed).unwrap();

        for next in [
            JobRunStatus::Queued,
            JobRunStatus::Provisioning,
            JobRunStatus::Running,
            JobRunStatus::Succeeded,
            JobRunStatus::TimedOut,
        ] {
            let err = run.transition(next).unwrap_err();
            assert_eq!(err.from, JobRunStatus::Failed);
            assert_eq!(err.to, next);
        }
        assert_eq!(run.status, JobRunStatus::Failed);
    }

    #[test]
    fn test_cannot_skip_provisioning() {
        let mut run = JobRun::queued(Uuid::new_v4(), "commit", &unit_job());
        assert!(run.transition(JobRunStatus::Running).is_err());
        assert!(run.transition(JobRunStatus::Succeeded).is_err());
        assert_eq!(run.status, JobRunStatus::Queued);
    }

    #[test]
    fn test_fatal_steps() {
        let mut step = StepResult::not_run("lint");
        assert!(!step.is_fatal());

        step.status = StepStatus::Failed;
        assert!(step.is_fatal());

        step.allowed_failure = true;
        assert!(!step.is_fatal());

        step.status = StepStatus::TimedOut;
        assert!(step.is_fatal());
    }
}
