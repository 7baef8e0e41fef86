//! Definition document parser
//!
//! Turns the YAML definition document into a validated
//! [`DefinitionModel`]. Parsing happens in two passes: serde reads the raw
//! [`Document`], then every entry is converted into its typed counterpart and
//! the model checks cross references. Either pass fails with a
//! [`DefinitionError`]; nothing is executed.

use conveyor_core::domain::definition::{
    DEFAULT_RESOURCE_CLASS, DEFAULT_WORKING_DIRECTORY, DefinitionModel, EnvironmentSpec,
    JobDefinition, StepDefinition, TriggerRule, WorkflowDefinition,
};
use conveyor_core::error::DefinitionError;
use conveyor_core::schedule::Schedule;
use std::path::Path;
use std::time::Duration;
use tracing::debug;

use crate::document::{
    Document, JobDocument, StepDocument, TimeoutDocument, TriggerDocument, TriggerTable,
    WorkflowDocument,
};
use crate::duration::parse_duration;

/// Reads and parses a definition file
///
/// # Errors
/// Returns [`DefinitionError::Io`] if the file cannot be read, otherwise the
/// same errors as [`parse_definition`].
pub fn load_definition(path: impl AsRef<Path>) -> Result<DefinitionModel, DefinitionError> {
    let path = path.as_ref();
    let source = std::fs::read_to_string(path).map_err(|source| DefinitionError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    debug!("Parsing definition file {}", path.display());
    parse_definition(&source)
}

/// Parses a definition document
///
/// # Example
/// ```
/// use conveyor_definition::parse_definition;
///
/// let source = r#"
/// version: 2.1
/// jobs:
///   unit:
///     environment:
///       image: docker.io/library/python:3.11
///     steps:
///       - name: test
///         command: python -m unittest
/// workflows:
///   commit:
///     trigger: push
///     jobs: [unit]
/// "#;
///
/// let model = parse_definition(source)?;
/// assert_eq!(model.version(), "2.1");
/// assert_eq!(model.jobs()[0].steps.len(), 1);
/// # Ok::<(), conveyor_core::error::DefinitionError>(())
/// ```
pub fn parse_definition(source: &str) -> Result<DefinitionModel, DefinitionError> {
    let document: Document =
        serde_yaml::from_str(source).map_err(|e| DefinitionError::Syntax(e.to_string()))?;

    let version = parse_version(document.version)?;

    let jobs = document
        .jobs
        .0
        .into_iter()
        .map(|(name, job)| parse_job(name, job))
        .collect::<Result<Vec<_>, _>>()?;

    let workflows = document
        .workflows
        .0
        .into_iter()
        .map(|(name, workflow)| parse_workflow(name, workflow))
        .collect::<Result<Vec<_>, _>>()?;

    let model = DefinitionModel::new(version, jobs, workflows)?;
    debug!(
        "Loaded definition version {}: {} job(s), {} workflow(s)",
        model.version(),
        model.jobs().len(),
        model.workflows().len()
    );

    Ok(model)
}

/// Extract the version tag as text
///
/// An unquoted number is read by YAML as a float and rendered back, so
/// `2.10` becomes `"2.1"`; quote the tag to keep it verbatim.
fn parse_version(version: Option<serde_yaml::Value>) -> Result<String, DefinitionError> {
    match version {
        None | Some(serde_yaml::Value::Null) => Err(DefinitionError::MissingVersion),
        Some(serde_yaml::Value::String(version)) => Ok(version),
        Some(serde_yaml::Value::Number(version)) => Ok(version.to_string()),
        Some(_) => Err(DefinitionError::Syntax(
            "field 'version' must be a string or a number".to_string(),
        )),
    }
}

/// Convert a job entry
fn parse_job(name: String, job: JobDocument) -> Result<JobDefinition, DefinitionError> {
    let environment = EnvironmentSpec {
        image: job.environment.image,
        resource_class: job
            .environment
            .resource_class
            .unwrap_or_else(|| DEFAULT_RESOURCE_CLASS.to_string()),
        working_directory: job
            .environment
            .working_directory
            .unwrap_or_else(|| DEFAULT_WORKING_DIRECTORY.to_string()),
        variables: job
            .environment
            .variables
            .into_iter()
            .map(|(key, value)| (key, value.to_string()))
            .collect(),
    };

    let steps = job
        .steps
        .into_iter()
        .enumerate()
        .map(|(idx, step)| parse_step(&name, idx, step))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(JobDefinition {
        name,
        environment,
        steps,
    })
}

/// Convert a step entry
fn parse_step(job: &str, idx: usize, step: StepDocument) -> Result<StepDefinition, DefinitionError> {
    let name = step
        .name
        .unwrap_or_else(|| step.command.lines().next().unwrap_or_default().trim().to_string());

    let timeout = step
        .timeout
        .map(parse_timeout)
        .transpose()
        .map_err(|reason| {
            DefinitionError::invalid_field(format!("job '{}' step {}", job, idx + 1), "timeout", reason)
        })?;

    Ok(StepDefinition {
        name,
        command: step.command,
        timeout,
        allow_failure: step.allow_failure,
    })
}

fn parse_timeout(timeout: TimeoutDocument) -> Result<Duration, String> {
    match timeout {
        TimeoutDocument::Seconds(seconds) => Ok(Duration::from_secs(seconds)),
        TimeoutDocument::Text(text) => parse_duration(&text),
    }
}

/// Convert a workflow entry
fn parse_workflow(
    name: String,
    workflow: WorkflowDocument,
) -> Result<WorkflowDefinition, DefinitionError> {
    let trigger = parse_trigger(&name, workflow.trigger)?;

    Ok(WorkflowDefinition {
        name,
        trigger,
        jobs: workflow.jobs,
    })
}

/// Convert a trigger in either of its forms
fn parse_trigger(workflow: &str, trigger: TriggerDocument) -> Result<TriggerRule, DefinitionError> {
    match trigger {
        TriggerDocument::Named(name) => match name.as_str() {
            "push" => Ok(TriggerRule::OnPush { branch: None }),
            "schedule" => Err(DefinitionError::MissingRecurrence(workflow.to_string())),
            other => Err(DefinitionError::malformed_trigger(
                workflow,
                format!("unknown trigger '{}', expected 'push' or 'schedule'", other),
            )),
        },
        TriggerDocument::Table(table) => parse_trigger_table(workflow, table),
    }
}

fn parse_trigger_table(workflow: &str, table: TriggerTable) -> Result<TriggerRule, DefinitionError> {
    match (table.push, table.schedule) {
        (Some(push), None) => {
            let push = push.unwrap_or_default();
            Ok(TriggerRule::OnPush {
                branch: non_empty_branch(workflow, push.branch)?,
            })
        }
        (None, Some(schedule)) => {
            let schedule = schedule.unwrap_or_default();
            let expression = schedule
                .cron
                .filter(|cron| !cron.trim().is_empty())
                .ok_or_else(|| DefinitionError::MissingRecurrence(workflow.to_string()))?;

            let parsed =
                Schedule::parse(&expression).map_err(|source| DefinitionError::InvalidSchedule {
                    workflow: workflow.to_string(),
                    source,
                })?;

            Ok(TriggerRule::OnSchedule {
                schedule: parsed,
                branch: non_empty_branch(workflow, schedule.branch)?,
            })
        }
        (Some(_), Some(_)) => Err(DefinitionError::malformed_trigger(
            workflow,
            "a trigger must be either 'push' or 'schedule', not both",
        )),
        (None, None) => Err(DefinitionError::malformed_trigger(
            workflow,
            "a trigger must declare 'push' or 'schedule'",
        )),
    }
}

fn non_empty_branch(workflow: &str, branch: Option<String>) -> Result<Option<String>, DefinitionError> {
    match branch {
        Some(branch) if branch.trim().is_empty() => Err(DefinitionError::malformed_trigger(
            workflow,
            "branch filter must not be empty",
        )),
        other => Ok(other),
    }
}
