//! Engine facade
//!
//! Wires the dispatcher and the scheduler together: an event goes in, the
//! finished workflow runs it activated come out.

use conveyor_core::domain::definition::DefinitionModel;
use conveyor_core::domain::trigger::TriggerEvent;
use conveyor_core::dto::report::WorkflowRunReport;
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::EngineConfig;
use crate::dispatch::TriggerDispatcher;
use crate::environment::EnvironmentBackend;
use crate::scheduler::RunScheduler;
use crate::service::{OutputSink, StandardExecutionService};

pub struct Engine {
    dispatcher: TriggerDispatcher,
    scheduler: RunScheduler,
}

impl Engine {
    pub fn new(
        model: Arc<DefinitionModel>,
        config: EngineConfig,
        backend: Arc<dyn EnvironmentBackend>,
    ) -> Self {
        Self {
            dispatcher: TriggerDispatcher::new(model),
            scheduler: RunScheduler::new(config, backend, Arc::new(StandardExecutionService::new())),
        }
    }

    pub fn dispatcher(&self) -> &TriggerDispatcher {
        &self.dispatcher
    }

    pub fn scheduler(&self) -> &RunScheduler {
        &self.scheduler
    }

    /// Runs everything `event` activates and waits for it to finish
    ///
    /// Returns one report per activated workflow run, in definition order.
    /// An event that activates nothing returns an empty list.
    pub async fn handle_event(
        &self,
        event: TriggerEvent,
        sink: Arc<dyn OutputSink>,
    ) -> Vec<WorkflowRunReport> {
        let requests = self.dispatcher.dispatch(&event);
        if requests.is_empty() {
            info!("No workflow triggered by {} on '{}'", event.kind, event.branch);
            return Vec::new();
        }

        let submission = self.scheduler.submit(requests, sink).await;

        let mut reports = Vec::with_capacity(submission.workflow_runs.len());
        for workflow_run in submission.workflow_runs {
            match self.scheduler.wait_for_workflow(workflow_run).await {
                Some(report) => reports.push(report),
                None => warn!("Workflow run {} disappeared", workflow_run),
            }
        }

        reports
    }
}
