//! Workflow run domain types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::job::{JobRunId, JobRunStatus, WorkflowRunId};
use crate::domain::trigger::TriggerEvent;

/// Aggregate status of a workflow run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkflowStatus {
    /// At least one job run has not reached a terminal state
    Running,

    /// Every job run succeeded
    Succeeded,

    /// Every job run is terminal and at least one did not succeed
    Failed,
}

impl WorkflowStatus {
    /// Aggregates the statuses of a workflow's job runs
    ///
    /// The result is only final once every status is terminal.
    pub fn aggregate<I>(statuses: I) -> Self
    where
        I: IntoIterator<Item = JobRunStatus>,
    {
        let mut all_succeeded = true;
        for status in statuses {
            if !status.is_terminal() {
                return WorkflowStatus::Running;
            }
            all_succeeded &= status == JobRunStatus::Succeeded;
        }

        if all_succeeded {
            WorkflowStatus::Succeeded
        } else {
            WorkflowStatus::Failed
        }
    }

    pub fn is_final(&self) -> bool {
        !matches!(self, WorkflowStatus::Running)
    }
}

impl std::fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkflowStatus::Running => write!(f, "Running"),
            WorkflowStatus::Succeeded => write!(f, "Succeeded"),
            WorkflowStatus::Failed => write!(f, "Failed"),
        }
    }
}

/// Aggregation of the job runs one trigger event activated for a workflow
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowRun {
    pub id: WorkflowRunId,
    pub workflow: String,
    pub event: TriggerEvent,
    pub job_runs: Vec<JobRunId>,
    pub status: WorkflowStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl WorkflowRun {
    pub fn new(workflow: impl Into<String>, event: TriggerEvent) -> Self {
        Self {
            id: Uuid::new_v4(),
            workflow: workflow.into(),
            event,
            job_runs: Vec::new(),
            status: WorkflowStatus::Running,
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    /// Recomputes the aggregate status from the current job run statuses
    ///
    /// Returns `true` when this call made the status final. A final status is
    /// never recomputed.
    pub fn refresh<I>(&mut self, statuses: I) -> bool
    where
        I: IntoIterator<Item = JobRunStatus>,
    {
        if self.status.is_final() {
            return false;
        }

        self.status = WorkflowStatus::aggregate(statuses);
        if self.status.is_final() {
            self.finished_at = Some(Utc::now());
            return true;
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use JobRunStatus::*;

    #[test]
    fn test_aggregate() {
        assert_eq!(
            WorkflowStatus::aggregate([Succeeded, Succeeded]),
            WorkflowStatus::Succeeded
        );
        assert_eq!(
            WorkflowStatus::aggregate([Succeeded, TimedOut]),
            WorkflowStatus::Failed
        );
        assert_eq!(
            WorkflowStatus::aggregate([Failed, Running]),
            WorkflowStatus::Running
        );
        assert_eq!(
            WorkflowStatus::aggregate([Queued]),
            WorkflowStatus::Running
        );
    }

    #[test]
    fn test_refresh_finalizes_once() {
        let mut run = WorkflowRun::new("commit", TriggerEvent::push("dev"));

        assert!(!run.refresh([Succeeded, Running]));
        assert_eq!(run.status, WorkflowStatus::Running);

        assert!(run.refresh([Succeeded, Failed]));
        assert_eq!(run.status, WorkflowStatus::Failed);
        assert!(run.finished_at.is_some());

        assert!(!run.refresh([Succeeded, Succeeded]));
        assert_eq!(run.status, WorkflowStatus::Failed);
    }
}
