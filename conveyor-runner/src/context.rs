//! Execution context for job runs
//!
//! Contains everything the step executor needs to run one job run:
//! - Identity of the run and the event that triggered it
//! - The job definition
//! - Timeout and capture limits from the engine configuration
//! - The output sink steps stream into

use conveyor_core::domain::definition::{EnvironmentSpec, JobDefinition};
use conveyor_core::domain::job::{JobRunId, WorkflowRunId};
use conveyor_core::domain::trigger::{EventKind, TriggerEvent};
use std::sync::Arc;
use std::time::Duration;

use crate::config::EngineConfig;
use crate::service::{OutputSink, OutputSource};

/// Execution context of one job run
pub struct RunContext {
    pub run_id: JobRunId,
    pub workflow_run_id: WorkflowRunId,
    pub workflow: String,
    pub job: Arc<JobDefinition>,
    pub event: TriggerEvent,

    /// Timeout for steps that do not declare one
    pub default_step_timeout: Duration,

    /// Lines kept per step; later lines are streamed but not recorded
    pub max_output_lines: usize,

    pub sink: Arc<dyn OutputSink>,
}

impl RunContext {
    pub fn new(
        run_id: JobRunId,
        workflow_run_id: WorkflowRunId,
        workflow: impl Into<String>,
        job: Arc<JobDefinition>,
        event: TriggerEvent,
        config: &EngineConfig,
        sink: Arc<dyn OutputSink>,
    ) -> Self {
        Self {
            run_id,
            workflow_run_id,
            workflow: workflow.into(),
            job,
            event,
            default_step_timeout: config.default_step_timeout,
            max_output_lines: config.max_output_lines,
            sink,
        }
    }

    /// The job's environment with the run's built-in variables added
    ///
    /// Built-in `CONVEYOR_*` variables take precedence over declared ones.
    pub fn environment_spec(&self) -> EnvironmentSpec {
        let event = match self.event.kind {
            EventKind::Push => "push",
            EventKind::ScheduledTick => "schedule",
        };

        self.job
            .environment
            .clone()
            .with_variable("CI", "true")
            .with_variable("CONVEYOR", "true")
            .with_variable("CONVEYOR_WORKFLOW", self.workflow.as_str())
            .with_variable("CONVEYOR_JOB", self.job.name.as_str())
            .with_variable("CONVEYOR_RUN_ID", self.run_id.to_string())
            .with_variable("CONVEYOR_BRANCH", self.event.branch.as_str())
            .with_variable("CONVEYOR_EVENT", event)
    }

    /// Output source for one of this run's steps
    pub fn source<'a>(&'a self, step: &'a str) -> OutputSource<'a> {
        OutputSource {
            run_id: self.run_id,
            workflow: &self.workflow,
            job: &self.job.name,
            step,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::TracingSink;
    use conveyor_core::domain::definition::StepDefinition;
    use uuid::Uuid;

    #[test]
    fn test_environment_spec_variables() {
        let job = JobDefinition {
            name: "unit".to_string(),
            environment: EnvironmentSpec::new("alpine")
                .with_variable("MODE", "fast")
                .with_variable("CONVEYOR_JOB", "spoofed"),
            steps: vec![StepDefinition::new("test", "true")],
        };
        let run_id = Uuid::new_v4();

        let context = RunContext::new(
            run_id,
            Uuid::new_v4(),
            "commit",
            Arc::new(job),
            TriggerEvent::push("dev"),
            &EngineConfig::default(),
            Arc::new(TracingSink),
        );

        let spec = context.environment_spec();
        assert_eq!(spec.variables["MODE"], "fast");
        assert_eq!(spec.variables["CONVEYOR_JOB"], "unit");
        assert_eq!(spec.variables["CONVEYOR_WORKFLOW"], "commit");
        assert_eq!(spec.variables["CONVEYOR_BRANCH"], "dev");
        assert_eq!(spec.variables["CONVEYOR_EVENT"], "push");
        assert_eq!(spec.variables["CONVEYOR_RUN_ID"], run_id.to_string());
        assert_eq!(context.default_step_timeout, Duration::from_secs(600));
    }
}
