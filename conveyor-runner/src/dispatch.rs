//! Trigger dispatch
//!
//! Maps a trigger event onto the workflows whose trigger rule accepts it and
//! expands each into one job run request per referenced job, in definition
//! order. A workflow that does not match simply contributes nothing.

use conveyor_core::domain::definition::{
    DefinitionModel, JobDefinition, TriggerRule, WorkflowDefinition,
};
use conveyor_core::domain::trigger::{EventKind, TriggerEvent};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Request to run one job of one workflow for an event
#[derive(Debug, Clone)]
pub struct JobRunRequest {
    pub workflow: Arc<WorkflowDefinition>,
    pub job: Arc<JobDefinition>,
    pub event: TriggerEvent,
}

/// Whether `rule` accepts `event`
///
/// Push rules only see push events and schedule rules only see ticks; both
/// also require the branch filter to accept the event's branch.
pub fn trigger_matches(rule: &TriggerRule, event: &TriggerEvent) -> bool {
    let kind_matches = match (rule, event.kind) {
        (TriggerRule::OnPush { .. }, EventKind::Push) => true,
        (TriggerRule::OnSchedule { schedule, .. }, EventKind::ScheduledTick) => {
            schedule.matches(&event.timestamp)
        }
        _ => false,
    };

    kind_matches && rule.accepts_branch(&event.branch)
}

/// Evaluates events against the workflows of a definition model
#[derive(Debug, Clone)]
pub struct TriggerDispatcher {
    model: Arc<DefinitionModel>,
}

impl TriggerDispatcher {
    pub fn new(model: Arc<DefinitionModel>) -> Self {
        Self { model }
    }

    /// Produces the job run requests `event` activates
    pub fn dispatch(&self, event: &TriggerEvent) -> Vec<JobRunRequest> {
        let mut requests = Vec::new();

        for workflow in self.model.workflows() {
            if !trigger_matches(&workflow.trigger, event) {
                debug!(
                    "Workflow '{}' ({}) not triggered by {} on '{}'",
                    workflow.name, workflow.trigger, event.kind, event.branch
                );
                continue;
            }

            info!(
                "Workflow '{}' triggered by {} on '{}'",
                workflow.name, event.kind, event.branch
            );

            for job_name in &workflow.jobs {
                match self.model.job(job_name) {
                    Some(job) => requests.push(JobRunRequest {
                        workflow: Arc::clone(workflow),
                        job: Arc::clone(job),
                        event: event.clone(),
                    }),
                    // The model validates references at construction
                    None => warn!(
                        "Workflow '{}' references unknown job '{}'",
                        workflow.name, job_name
                    ),
                }
            }
        }

        requests
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use conveyor_core::domain::definition::{EnvironmentSpec, StepDefinition};
    use conveyor_core::schedule::Schedule;

    fn job(name: &str) -> JobDefinition {
        JobDefinition {
            name: name.to_string(),
            environment: EnvironmentSpec::new("docker.io/library/python:3.11"),
            steps: vec![StepDefinition::new("test", "python -m unittest")],
        }
    }

    fn workflow(name: &str, trigger: TriggerRule, jobs: &[&str]) -> WorkflowDefinition {
        WorkflowDefinition {
            name: name.to_string(),
            trigger,
            jobs: jobs.iter().map(|j| j.to_string()).collect(),
        }
    }

    fn nightly() -> TriggerRule {
        TriggerRule::OnSchedule {
            schedule: Schedule::parse("0 0 * * *").unwrap(),
            branch: Some("master".to_string()),
        }
    }

    fn dispatcher() -> TriggerDispatcher {
        let model = DefinitionModel::new(
            "2.1".to_string(),
            vec![job("unit"), job("examples")],
            vec![
                workflow("commit", TriggerRule::OnPush { branch: None }, &["unit"]),
                workflow(
                    "release",
                    TriggerRule::OnPush {
                        branch: Some("main".to_string()),
                    },
                    &["unit", "examples"],
                ),
                workflow("nightly", nightly(), &["unit", "examples"]),
            ],
        )
        .unwrap();

        TriggerDispatcher::new(Arc::new(model))
    }

    fn summary(requests: &[JobRunRequest]) -> Vec<(String, String)> {
        requests
            .iter()
            .map(|r| (r.workflow.name.clone(), r.job.name.clone()))
            .collect()
    }

    #[test]
    fn test_unfiltered_push_matches_any_branch() {
        let requests = dispatcher().dispatch(&TriggerEvent::push("dev"));
        assert_eq!(summary(&requests), [("commit".to_string(), "unit".to_string())]);
    }

    #[test]
    fn test_filtered_push_matches_only_its_branch() {
        let requests = dispatcher().dispatch(&TriggerEvent::push("main"));
        assert_eq!(
            summary(&requests),
            [
                ("commit".to_string(), "unit".to_string()),
                ("release".to_string(), "unit".to_string()),
                ("release".to_string(), "examples".to_string()),
            ]
        );
        assert!(requests.iter().all(|r| r.event.branch == "main"));
    }

    #[test]
    fn test_scheduled_tick() {
        let dispatcher = dispatcher();
        let midnight = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
        let noon = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();

        let requests = dispatcher.dispatch(&TriggerEvent::scheduled_tick("master", midnight));
        assert_eq!(
            summary(&requests),
            [
                ("nightly".to_string(), "unit".to_string()),
                ("nightly".to_string(), "examples".to_string()),
            ]
        );

        assert!(dispatcher
            .dispatch(&TriggerEvent::scheduled_tick("master", noon))
            .is_empty());
        assert!(dispatcher
            .dispatch(&TriggerEvent::scheduled_tick("feature-x", midnight))
            .is_empty());
    }

    #[test]
    fn test_event_kinds_do_not_cross() {
        let midnight = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();

        let push_on_master = TriggerEvent {
            kind: EventKind::Push,
            branch: "master".to_string(),
            timestamp: midnight,
        };
        assert!(!trigger_matches(&nightly(), &push_on_master));

        let tick = TriggerEvent::scheduled_tick("main", midnight);
        assert!(!trigger_matches(&TriggerRule::OnPush { branch: None }, &tick));
    }

    #[test]
    fn test_schedule_without_branch_filter() {
        let rule = TriggerRule::OnSchedule {
            schedule: Schedule::parse("@hourly").unwrap(),
            branch: None,
        };
        let on_the_hour = Utc.with_ymd_and_hms(2024, 3, 1, 7, 0, 0).unwrap();

        assert!(trigger_matches(&rule, &TriggerEvent::scheduled_tick("any", on_the_hour)));
    }
}
