//! Execution service
//!
//! Runs the steps of one job run, strictly in order, inside the environment
//! leased for that run:
//! - Streaming each step's output to the sink and recording it
//! - Enforcing the no-output timeout of each step
//! - Stopping at the first fatal step and leaving the rest NotRun
//!
//! This service contains the core business logic for running jobs.

use async_trait::async_trait;
use conveyor_core::domain::definition::StepDefinition;
use conveyor_core::domain::job::{JobOutcome, JobRunStatus, StepResult, StepStatus};
use conveyor_core::error::{EnvironmentError, RunFailure};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::context::RunContext;
use crate::environment::EnvironmentLease;

/// Service trait for executing job runs
#[async_trait]
pub trait ExecutionService: Send + Sync {
    /// Executes every step of the context's job in the leased environment
    ///
    /// # Returns
    /// The terminal outcome: status, one result per step and the failure
    async fn execute_job(&self, context: &RunContext, lease: &EnvironmentLease) -> JobOutcome;
}

/// Standard implementation of ExecutionService
#[derive(Debug, Default)]
pub struct StandardExecutionService {}

/// Stand-in deadline for timeouts too large to represent
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// How a single step ended
enum StepEnd {
    Exited(i32),
    TimedOut,
    Error(EnvironmentError),
}

impl StandardExecutionService {
    /// Creates a new standard execution service
    pub fn new() -> Self {
        Self {}
    }

    /// Executes a single step, returning its result and the failure it caused
    async fn execute_step(
        &self,
        context: &RunContext,
        lease: &EnvironmentLease,
        step: &StepDefinition,
    ) -> (StepResult, Option<RunFailure>) {
        let source = context.source(&step.name);
        let timeout = step.effective_timeout(context.default_step_timeout);
        let started = Instant::now();

        debug!("Executing step: {}", step.name);
        context.sink.step_started(&source);

        let mut result = StepResult::not_run(&step.name);
        let mut dropped_lines = 0usize;

        let end = match lease.exec(&step.command).await {
            Err(e) => StepEnd::Error(e),
            Ok(mut running) => {
                let deadline = tokio::time::sleep(timeout);
                tokio::pin!(deadline);
                let mut output_open = true;

                loop {
                    tokio::select! {
                        line = running.output.recv(), if output_open => match line {
                            Some(line) => {
                                deadline.as_mut().reset(deadline_after(timeout));
                                context.sink.write(&source, &line);
                                if result.output.len() < context.max_output_lines {
                                    result.output.push(line);
                                } else {
                                    dropped_lines += 1;
                                }
                            }
                            None => output_open = false,
                        },
                        exit = &mut running.exit => {
                            // All output is queued before the exit code is sent
                            while let Ok(line) = running.output.try_recv() {
                                context.sink.write(&source, &line);
                                if result.output.len() < context.max_output_lines {
                                    result.output.push(line);
                                } else {
                                    dropped_lines += 1;
                                }
                            }

                            break match exit {
                                Ok(Ok(code)) => StepEnd::Exited(code),
                                Ok(Err(e)) => StepEnd::Error(e),
                                Err(_) => StepEnd::Error(EnvironmentError::Exec {
                                    environment: context.run_id.to_string(),
                                    reason: "command ended without an exit status".to_string(),
                                }),
                            };
                        }
                        _ = &mut deadline => {
                            running.kill();
                            break StepEnd::TimedOut;
                        }
                    }
                }
            }
        };

        if dropped_lines > 0 {
            warn!(
                "Step '{}' of job '{}': {} output line(s) beyond the capture limit were not recorded",
                step.name, context.job.name, dropped_lines
            );
        }

        result.duration_ms = Some(started.elapsed().as_millis() as u64);

        let failure = match end {
            StepEnd::Exited(0) => {
                result.status = StepStatus::Succeeded;
                result.exit_code = Some(0);
                None
            }
            StepEnd::Exited(code) => {
                result.status = StepStatus::Failed;
                result.exit_code = Some(code);
                if step.allow_failure {
                    result.allowed_failure = true;
                    info!(
                        "Step '{}' exited with status {} (failure allowed)",
                        step.name, code
                    );
                    None
                } else {
                    Some(RunFailure::StepFailure {
                        step: step.name.clone(),
                        exit_code: code,
                    })
                }
            }
            StepEnd::TimedOut => {
                result.status = StepStatus::TimedOut;
                Some(RunFailure::StepTimeout {
                    step: step.name.clone(),
                    timeout_ms: timeout.as_millis() as u64,
                })
            }
            StepEnd::Error(e) => {
                warn!("Step '{}' could not be executed: {}", step.name, e);
                result.status = StepStatus::Failed;
                Some(RunFailure::from(&e))
            }
        };

        context.sink.step_finished(&source, &result);
        (result, failure)
    }
}

/// The instant `timeout` from now, saturating for oversized timeouts
fn deadline_after(timeout: Duration) -> tokio::time::Instant {
    let now = tokio::time::Instant::now();
    now.checked_add(timeout).unwrap_or_else(|| now + FAR_FUTURE)
}

#[async_trait]
impl ExecutionService for StandardExecutionService {
    async fn execute_job(&self, context: &RunContext, lease: &EnvironmentLease) -> JobOutcome {
        let job = &context.job;
        info!(
            "Starting execution of run {} - job '{}' ({} step(s))",
            context.run_id,
            job.name,
            job.steps.len()
        );

        let mut steps: Vec<StepResult> = job
            .steps
            .iter()
            .map(|step| StepResult::not_run(&step.name))
            .collect();
        let mut failure = None;

        for (idx, step) in job.steps.iter().enumerate() {
            let (result, step_failure) = self.execute_step(context, lease, step).await;
            steps[idx] = result;

            if step_failure.is_some() {
                failure = step_failure;
                break;
            }
        }

        let status = match &failure {
            None => JobRunStatus::Succeeded,
            Some(RunFailure::StepTimeout { .. }) => JobRunStatus::TimedOut,
            Some(_) => JobRunStatus::Failed,
        };

        match &failure {
            None => info!("Job '{}' (run {}) succeeded", job.name, context.run_id),
            Some(failure) => info!(
                "Job '{}' (run {}) ended {}: {}",
                job.name, context.run_id, status, failure
            ),
        }

        JobOutcome {
            status,
            steps,
            failure,
        }
    }
}
