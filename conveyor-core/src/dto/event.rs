//! Run event DTOs

use serde::{Deserialize, Serialize};

use crate::domain::job::{JobRunId, JobRunStatus, WorkflowRunId};

/// Job run status change, broadcast by the scheduler
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunEvent {
    pub run_id: JobRunId,
    pub workflow_run_id: WorkflowRunId,
    pub job: String,
    pub status: JobRunStatus,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}
