//! Run scheduler
//!
//! Turns job run requests into workflow runs and job runs, admits them
//! against per-resource-class capacity and drives each job run through its
//! lifecycle:
//!
//! Queued -> Provisioning -> Running -> Succeeded | Failed | TimedOut
//!
//! with `Provisioning -> Failed` when no environment can be acquired. A job
//! run's capacity permit is held until its environment is released and its
//! terminal status is recorded.

mod capacity;
mod queue;
mod registry;

use conveyor_core::domain::definition::{JobDefinition, WorkflowDefinition};
use conveyor_core::domain::job::{
    JobOutcome, JobRun, JobRunId, JobRunStatus, StepResult, WorkflowRunId,
};
use conveyor_core::domain::trigger::TriggerEvent;
use conveyor_core::domain::workflow::WorkflowRun;
use conveyor_core::dto::event::RunEvent;
use conveyor_core::dto::report::WorkflowRunReport;
use conveyor_core::error::RunFailure;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{OwnedSemaphorePermit, RwLock, broadcast, mpsc};
use tracing::{debug, error, info, warn};

use crate::config::EngineConfig;
use crate::context::RunContext;
use crate::dispatch::JobRunRequest;
use crate::environment::{EnvironmentBackend, EnvironmentLease};
use crate::service::{ExecutionService, OutputSink};

pub use capacity::CapacityPool;
pub use queue::spawn_admission_queue;
pub use registry::RunRegistry;

const EVENT_CHANNEL_SIZE: usize = 1024;

/// Ids created by one submission
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Submission {
    /// One workflow run per distinct workflow, in request order
    pub workflow_runs: Vec<WorkflowRunId>,

    /// One job run per request, in request order
    pub job_runs: Vec<JobRunId>,
}

/// Schedules and executes job runs
#[derive(Clone)]
pub struct RunScheduler {
    inner: Arc<Inner>,
}

struct Inner {
    config: EngineConfig,
    backend: Arc<dyn EnvironmentBackend>,
    executor: Arc<dyn ExecutionService>,
    capacity: CapacityPool,
    queues: Mutex<HashMap<String, mpsc::UnboundedSender<RunContext>>>,
    registry: RwLock<RunRegistry>,
    events: broadcast::Sender<RunEvent>,
}

impl RunScheduler {
    pub fn new(
        config: EngineConfig,
        backend: Arc<dyn EnvironmentBackend>,
        executor: Arc<dyn ExecutionService>,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_SIZE);

        Self {
            inner: Arc::new(Inner {
                capacity: CapacityPool::from_config(&config),
                config,
                backend,
                executor,
                queues: Mutex::new(HashMap::new()),
                registry: RwLock::new(RunRegistry::new()),
                events,
            }),
        }
    }

    /// Creates runs for `requests` and queues them for execution
    ///
    /// Requests of the same workflow share one workflow run. All runs are
    /// registered before any of them is admitted.
    pub async fn submit(
        &self,
        requests: Vec<JobRunRequest>,
        sink: Arc<dyn OutputSink>,
    ) -> Submission {
        let mut groups: Vec<(Arc<WorkflowDefinition>, TriggerEvent, Vec<Arc<JobDefinition>>)> =
            Vec::new();

        for request in requests {
            match groups
                .iter_mut()
                .find(|(workflow, _, _)| workflow.name == request.workflow.name)
            {
                Some((_, _, jobs)) => jobs.push(request.job),
                None => groups.push((request.workflow, request.event, vec![request.job])),
            }
        }

        let mut submission = Submission::default();
        let mut queued = Vec::new();
        let mut events = Vec::new();

        {
            let mut registry = self.inner.registry.write().await;

            for (workflow, event, jobs) in groups {
                let mut workflow_run = WorkflowRun::new(&workflow.name, event.clone());
                let job_runs: Vec<JobRun> = jobs
                    .iter()
                    .map(|job| JobRun::queued(workflow_run.id, &workflow.name, job))
                    .collect();
                workflow_run.job_runs = job_runs.iter().map(|run| run.id).collect();

                info!(
                    "Created run {} of workflow '{}' with {} job(s)",
                    workflow_run.id,
                    workflow.name,
                    job_runs.len()
                );

                for (run, job) in job_runs.iter().zip(jobs) {
                    queued.push(RunContext::new(
                        run.id,
                        workflow_run.id,
                        workflow.name.as_str(),
                        job,
                        event.clone(),
                        &self.inner.config,
                        Arc::clone(&sink),
                    ));
                    submission.job_runs.push(run.id);
                }

                submission.workflow_runs.push(workflow_run.id);
                events.extend(registry.insert(workflow_run, job_runs));
            }
        }

        for event in events {
            self.inner.publish(event);
        }

        for context in queued {
            self.enqueue(context).await;
        }

        submission
    }

    /// Hands a run to the admission queue of its resource class
    async fn enqueue(&self, context: RunContext) {
        let resource_class = context.job.environment.resource_class.clone();

        let rejected = {
            let mut queues = match self.inner.queues.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };

            let sender = queues
                .entry(resource_class.clone())
                .or_insert_with(|| self.start_queue(&resource_class));

            debug!(
                "Queued run {} (job '{}') in resource class '{}'",
                context.run_id, context.job.name, resource_class
            );
            sender.send(context).err()
        };

        if let Some(mpsc::error::SendError(context)) = rejected {
            error!(
                "Admission queue of '{}' is closed, failing run {}",
                resource_class, context.run_id
            );
            self.inner
                .fail(
                    context.run_id,
                    RunFailure::Environment {
                        message: format!("admission queue of '{}' is closed", resource_class),
                    },
                )
                .await;
        }
    }

    fn start_queue(&self, resource_class: &str) -> mpsc::UnboundedSender<RunContext> {
        let (sender, receiver) = mpsc::unbounded_channel();
        let semaphore = self.inner.capacity.semaphore(resource_class);
        let inner = Arc::downgrade(&self.inner);

        spawn_admission_queue(
            resource_class.to_string(),
            semaphore,
            receiver,
            move |context: RunContext, permit| match inner.upgrade() {
                Some(inner) => {
                    tokio::spawn(inner.run_job(context, permit));
                }
                None => warn!("Scheduler dropped, run {} not started", context.run_id),
            },
        );

        sender
    }

    pub async fn job_run(&self, id: JobRunId) -> Option<JobRun> {
        self.inner.registry.read().await.job_run(id).cloned()
    }

    pub async fn workflow_run(&self, id: WorkflowRunId) -> Option<WorkflowRun> {
        self.inner.registry.read().await.workflow_run(id).cloned()
    }

    /// Job runs of a workflow run, in creation order
    pub async fn job_runs_for(&self, id: WorkflowRunId) -> Vec<JobRun> {
        self.inner.registry.read().await.job_runs_for(id)
    }

    /// Waits until every job run of the workflow run is terminal
    ///
    /// Returns `None` for an unknown workflow run.
    pub async fn wait_for_workflow(&self, id: WorkflowRunId) -> Option<WorkflowRunReport> {
        let mut status = self.inner.registry.read().await.watch_workflow(id)?;

        if status.wait_for(|status| status.is_final()).await.is_err() {
            warn!("Status of workflow run {} is no longer tracked", id);
        }

        self.inner.registry.read().await.report(id)
    }

    /// Receives every job run status change from now on
    pub fn subscribe(&self) -> broadcast::Receiver<RunEvent> {
        self.inner.events.subscribe()
    }

    /// Job runs of `resource_class` currently holding capacity
    pub fn in_use(&self, resource_class: &str) -> usize {
        self.inner.capacity.in_use(resource_class)
    }
}

impl Inner {
    fn publish(&self, event: RunEvent) {
        debug!("Run {} ({}) is now {}", event.run_id, event.job, event.status);
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    async fn transition(&self, id: JobRunId, next: JobRunStatus) {
        let result = self.registry.write().await.transition(id, next);
        match result {
            Ok(event) => self.publish(event),
            Err(e) => error!("{:#}", e),
        }
    }

    async fn complete(&self, id: JobRunId, outcome: JobOutcome) {
        let result = self.registry.write().await.complete(id, outcome);
        match result {
            Ok(event) => self.publish(event),
            Err(e) => error!("{:#}", e),
        }
    }

    async fn fail(&self, id: JobRunId, failure: RunFailure) {
        let result = self.registry.write().await.fail(id, failure);
        match result {
            Ok(events) => events.into_iter().for_each(|event| self.publish(event)),
            Err(e) => error!("{:#}", e),
        }
    }

    /// Runs an admitted job run to completion, then gives back its permit
    async fn run_job(self: Arc<Self>, context: RunContext, permit: OwnedSemaphorePermit) {
        let run_id = context.run_id;
        let inner = Arc::clone(&self);

        let task = tokio::spawn(async move { inner.execute(&context).await });

        if let Err(e) = task.await {
            error!("Job run {} task failed: {}", run_id, e);
            self.fail(
                run_id,
                RunFailure::Environment {
                    message: format!("job run task failed: {}", e),
                },
            )
            .await;
        }

        drop(permit);
    }

    async fn execute(&self, context: &RunContext) {
        let run_id = context.run_id;
        self.transition(run_id, JobRunStatus::Provisioning).await;

        info!(
            "Provisioning {} environment ({}) for run {} of job '{}'",
            self.backend.name(),
            context.job.environment.image,
            run_id,
            context.job.name
        );

        let lease = match EnvironmentLease::acquire(
            Arc::clone(&self.backend),
            run_id,
            &context.environment_spec(),
        )
        .await
        {
            Ok(lease) => lease,
            Err(e) => {
                error!("Failed to provision environment for run {}: {}", run_id, e);
                let outcome = JobOutcome {
                    status: JobRunStatus::Failed,
                    steps: context
                        .job
                        .steps
                        .iter()
                        .map(|step| StepResult::not_run(&step.name))
                        .collect(),
                    failure: Some(RunFailure::from(&e)),
                };
                self.complete(run_id, outcome).await;
                return;
            }
        };

        self.transition(run_id, JobRunStatus::Running).await;

        let outcome = self.executor.execute_job(context, &lease).await;

        lease.release().await;
        self.complete(run_id, outcome).await;
    }
}
