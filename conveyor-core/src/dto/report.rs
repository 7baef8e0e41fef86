//! Workflow run report DTOs

use serde::{Deserialize, Serialize};

use crate::domain::job::{JobRun, JobRunStatus};
use crate::domain::workflow::{WorkflowRun, WorkflowStatus};

/// A finished workflow run together with its job runs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowRunReport {
    pub workflow_run: WorkflowRun,
    pub job_runs: Vec<JobRun>,
}

impl WorkflowRunReport {
    pub fn succeeded(&self) -> bool {
        self.workflow_run.status == WorkflowStatus::Succeeded
    }

    /// Job runs that did not succeed
    pub fn failed_jobs(&self) -> impl Iterator<Item = &JobRun> {
        self.job_runs
            .iter()
            .filter(|run| run.status != JobRunStatus::Succeeded)
    }
}

/// Whether every report in `reports` succeeded
///
/// An empty set of reports (an event that activated nothing) counts as success.
pub fn all_succeeded(reports: &[WorkflowRunReport]) -> bool {
    reports.iter().all(WorkflowRunReport::succeeded)
}
