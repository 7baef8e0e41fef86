//! Run registry
//!
//! In-memory record of every workflow run and job run the scheduler has
//! created. All state changes go through here so that a workflow's aggregate
//! status is recomputed whenever one of its job runs reaches a terminal state.

use anyhow::Context;
use conveyor_core::domain::job::{
    JobOutcome, JobRun, JobRunId, JobRunStatus, StepResult, WorkflowRunId,
};
use conveyor_core::domain::workflow::{WorkflowRun, WorkflowStatus};
use conveyor_core::dto::event::RunEvent;
use conveyor_core::dto::report::WorkflowRunReport;
use conveyor_core::error::RunFailure;
use std::collections::HashMap;
use tokio::sync::watch;
use tracing::info;

struct WorkflowEntry {
    run: WorkflowRun,
    status: watch::Sender<WorkflowStatus>,
}

#[derive(Default)]
pub struct RunRegistry {
    job_runs: HashMap<JobRunId, JobRun>,
    workflow_runs: HashMap<WorkflowRunId, WorkflowEntry>,
}

/// Status change notification for a job run
fn event_for(run: &JobRun) -> RunEvent {
    RunEvent {
        run_id: run.id,
        workflow_run_id: run.workflow_run_id,
        job: run.job.clone(),
        status: run.status,
        timestamp: chrono::Utc::now(),
    }
}

impl RunRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a workflow run together with all of its job runs
    ///
    /// Returns one `Queued` event per job run.
    pub fn insert(&mut self, workflow_run: WorkflowRun, job_runs: Vec<JobRun>) -> Vec<RunEvent> {
        let (status, _) = watch::channel(workflow_run.status);
        let events = job_runs.iter().map(event_for).collect();

        for run in job_runs {
            self.job_runs.insert(run.id, run);
        }
        self.workflow_runs.insert(
            workflow_run.id,
            WorkflowEntry {
                run: workflow_run,
                status,
            },
        );

        events
    }

    pub fn job_run(&self, id: JobRunId) -> Option<&JobRun> {
        self.job_runs.get(&id)
    }

    pub fn workflow_run(&self, id: WorkflowRunId) -> Option<&WorkflowRun> {
        self.workflow_runs.get(&id).map(|entry| &entry.run)
    }

    /// Job runs of a workflow run, in the order they were created
    pub fn job_runs_for(&self, id: WorkflowRunId) -> Vec<JobRun> {
        self.workflow_run(id)
            .map(|workflow_run| {
                workflow_run
                    .job_runs
                    .iter()
                    .filter_map(|run_id| self.job_runs.get(run_id).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Watches the aggregate status of a workflow run
    pub fn watch_workflow(&self, id: WorkflowRunId) -> Option<watch::Receiver<WorkflowStatus>> {
        self.workflow_runs
            .get(&id)
            .map(|entry| entry.status.subscribe())
    }

    pub fn report(&self, id: WorkflowRunId) -> Option<WorkflowRunReport> {
        Some(WorkflowRunReport {
            workflow_run: self.workflow_run(id)?.clone(),
            job_runs: self.job_runs_for(id),
        })
    }

    /// Moves a job run to a non-terminal status
    pub fn transition(&mut self, id: JobRunId, next: JobRunStatus) -> anyhow::Result<RunEvent> {
        let run = self
            .job_runs
            .get_mut(&id)
            .with_context(|| format!("Unknown job run {}", id))?;

        run.transition(next)?;
        let event = event_for(run);
        self.after_change(id);
        Ok(event)
    }

    /// Records the terminal outcome of a job run
    pub fn complete(&mut self, id: JobRunId, outcome: JobOutcome) -> anyhow::Result<RunEvent> {
        let run = self
            .job_runs
            .get_mut(&id)
            .with_context(|| format!("Unknown job run {}", id))?;

        run.complete(outcome)?;
        let event = event_for(run);
        self.after_change(id);
        Ok(event)
    }

    /// Fails a run that stopped without an outcome
    ///
    /// Returns no events if the run already reached a terminal status.
    pub fn fail(&mut self, id: JobRunId, failure: RunFailure) -> anyhow::Result<Vec<RunEvent>> {
        let run = self
            .job_runs
            .get(&id)
            .with_context(|| format!("Unknown job run {}", id))?;

        if run.is_terminal() {
            return Ok(Vec::new());
        }

        let mut events = Vec::new();
        if run.status == JobRunStatus::Queued {
            events.push(self.transition(id, JobRunStatus::Provisioning)?);
        }

        let steps: Vec<StepResult> = self.job_runs[&id].steps.clone();
        events.push(self.complete(
            id,
            JobOutcome {
                status: JobRunStatus::Failed,
                steps,
                failure: Some(failure),
            },
        )?);
        Ok(events)
    }

    /// Recomputes the aggregate status of the run's workflow run
    fn after_change(&mut self, id: JobRunId) {
        let Some(workflow_run_id) = self.job_runs.get(&id).map(|run| run.workflow_run_id) else {
            return;
        };
        let Some(entry) = self.workflow_runs.get_mut(&workflow_run_id) else {
            return;
        };

        let job_runs = &self.job_runs;
        let statuses: Vec<JobRunStatus> = entry
            .run
            .job_runs
            .iter()
            .filter_map(|run_id| job_runs.get(run_id).map(|run| run.status))
            .collect();

        if entry.run.refresh(statuses) {
            info!(
                "Workflow '{}' (run {}) finished: {}",
                entry.run.workflow, entry.run.id, entry.run.status
            );
            entry.status.send_replace(entry.run.status);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conveyor_core::domain::definition::{EnvironmentSpec, JobDefinition, StepDefinition};
    use conveyor_core::domain::job::StepStatus;
    use conveyor_core::domain::trigger::TriggerEvent;

    fn job(name: &str) -> JobDefinition {
        JobDefinition {
            name: name.to_string(),
            environment: EnvironmentSpec::new("alpine"),
            steps: vec![StepDefinition::new("test", "true")],
        }
    }

    fn setup(jobs: &[&str]) -> (RunRegistry, WorkflowRunId, Vec<JobRunId>) {
        let mut registry = RunRegistry::new();
        let mut workflow_run = WorkflowRun::new("commit", TriggerEvent::push("dev"));
        let runs: Vec<JobRun> = jobs
            .iter()
            .map(|name| JobRun::queued(workflow_run.id, "commit", &job(name)))
            .collect();
        let ids: Vec<JobRunId> = runs.iter().map(|run| run.id).collect();
        workflow_run.job_runs = ids.clone();
        let workflow_run_id = workflow_run.id;

        let events = registry.insert(workflow_run, runs);
        assert!(events.iter().all(|e| e.status == JobRunStatus::Queued));

        (registry, workflow_run_id, ids)
    }

    fn outcome(status: JobRunStatus, step: StepStatus) -> JobOutcome {
        let mut result = StepResult::not_run("test");
        result.status = step;
        JobOutcome {
            status,
            steps: vec![result],
            failure: None,
        }
    }

    fn finish(registry: &mut RunRegistry, id: JobRunId, status: JobRunStatus, step: StepStatus) {
        registry.transition(id, JobRunStatus::Provisioning).unwrap();
        registry.transition(id, JobRunStatus::Running).unwrap();
        registry.complete(id, outcome(status, step)).unwrap();
    }

    #[test]
    fn test_workflow_final_only_when_all_terminal() {
        let (mut registry, wf, ids) = setup(&["unit", "examples"]);
        let watch = registry.watch_workflow(wf).unwrap();

        finish(&mut registry, ids[0], JobRunStatus::Failed, StepStatus::Failed);
        assert_eq!(registry.workflow_run(wf).unwrap().status, WorkflowStatus::Running);
        assert_eq!(*watch.borrow(), WorkflowStatus::Running);

        finish(&mut registry, ids[1], JobRunStatus::Succeeded, StepStatus::Succeeded);
        assert_eq!(registry.workflow_run(wf).unwrap().status, WorkflowStatus::Failed);
        assert_eq!(*watch.borrow(), WorkflowStatus::Failed);
        assert!(registry.workflow_run(wf).unwrap().finished_at.is_some());
    }

    #[test]
    fn test_terminal_is_final() {
        let (mut registry, _, ids) = setup(&["unit"]);
        finish(&mut registry, ids[0], JobRunStatus::Succeeded, StepStatus::Succeeded);

        assert!(registry.transition(ids[0], JobRunStatus::Running).is_err());
        assert!(registry
            .complete(ids[0], outcome(JobRunStatus::Failed, StepStatus::Failed))
            .is_err());
        assert_eq!(registry.job_run(ids[0]).unwrap().status, JobRunStatus::Succeeded);
        let events = registry
            .fail(ids[0], RunFailure::Environment { message: "x".into() })
            .unwrap();
        assert!(events.is_empty());
    }

    #[test]
    fn test_fail_from_queued() {
        let (mut registry, wf, ids) = setup(&["unit"]);

        let events = registry
            .fail(
                ids[0],
                RunFailure::Environment {
                    message: "admission queue closed".into(),
                },
            )
            .unwrap();

        let statuses: Vec<JobRunStatus> = events.iter().map(|e| e.status).collect();
        assert_eq!(statuses, [JobRunStatus::Provisioning, JobRunStatus::Failed]);
        let run = registry.job_run(ids[0]).unwrap();
        assert_eq!(run.steps[0].status, StepStatus::NotRun);
        assert!(matches!(run.failure, Some(RunFailure::Environment { .. })));
        assert_eq!(registry.workflow_run(wf).unwrap().status, WorkflowStatus::Failed);
    }

    #[test]
    fn test_report_preserves_order() {
        let (mut registry, wf, ids) = setup(&["unit", "examples", "lint"]);

        let report = registry.report(wf).unwrap();
        let report_ids: Vec<JobRunId> = report.job_runs.iter().map(|r| r.id).collect();
        assert_eq!(report_ids, ids);
        assert!(registry.transition(uuid::Uuid::new_v4(), JobRunStatus::Running).is_err());
    }
}
