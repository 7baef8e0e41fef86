//! Definition domain types
//!
//! Typed, immutable representation of a pipeline definition: jobs made of
//! ordered steps, and workflows gated by a trigger rule. A [`DefinitionModel`]
//! can only be obtained through [`DefinitionModel::new`], which validates
//! every cross reference once, so the rest of the engine never has to.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use crate::error::DefinitionError;
use crate::schedule::Schedule;

/// Resource class used when a job does not name one
pub const DEFAULT_RESOURCE_CLASS: &str = "default";

/// Working directory used when a job does not name one
pub const DEFAULT_WORKING_DIRECTORY: &str = ".";

/// Execution environment requested by a job
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvironmentSpec {
    /// Image identifier (e.g., docker.io/library/python:3.11)
    pub image: String,

    /// Capacity category the job is admitted under
    pub resource_class: String,

    /// Directory steps run in, relative to the environment root
    pub working_directory: String,

    /// Variables exported to every step of the job
    pub variables: BTreeMap<String, String>,
}

impl EnvironmentSpec {
    /// Creates a spec for `image` with default class and working directory
    pub fn new(image: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            resource_class: DEFAULT_RESOURCE_CLASS.to_string(),
            working_directory: DEFAULT_WORKING_DIRECTORY.to_string(),
            variables: BTreeMap::new(),
        }
    }

    pub fn with_resource_class(mut self, resource_class: impl Into<String>) -> Self {
        self.resource_class = resource_class.into();
        self
    }

    pub fn with_working_directory(mut self, working_directory: impl Into<String>) -> Self {
        self.working_directory = working_directory.into();
        self
    }

    pub fn with_variable(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.variables.insert(key.into(), value.into());
        self
    }
}

/// A single command of a job
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepDefinition {
    pub name: String,
    pub command: String,

    /// No-output timeout override; the engine default applies when unset
    pub timeout: Option<Duration>,

    /// A non-zero exit is recorded but does not abort the job
    pub allow_failure: bool,
}

impl StepDefinition {
    pub fn new(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            timeout: None,
            allow_failure: false,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn allowing_failure(mut self) -> Self {
        self.allow_failure = true;
        self
    }

    /// Timeout that applies to this step given the engine default
    pub fn effective_timeout(&self, default: Duration) -> Duration {
        self.timeout.unwrap_or(default)
    }
}

/// A named, ordered sequence of steps run in one environment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobDefinition {
    pub name: String,
    pub environment: EnvironmentSpec,
    pub steps: Vec<StepDefinition>,
}

/// Rule deciding when a workflow activates
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerRule {
    /// Any push, optionally restricted to one branch
    OnPush { branch: Option<String> },

    /// A recurring schedule, optionally restricted to one branch
    OnSchedule {
        schedule: Schedule,
        branch: Option<String>,
    },
}

impl TriggerRule {
    /// Branch the rule is restricted to, if any
    pub fn branch_filter(&self) -> Option<&str> {
        match self {
            TriggerRule::OnPush { branch } | TriggerRule::OnSchedule { branch, .. } => {
                branch.as_deref()
            }
        }
    }

    /// Whether `branch` passes the rule's branch filter
    pub fn accepts_branch(&self, branch: &str) -> bool {
        self.branch_filter().is_none_or(|filter| filter == branch)
    }
}

impl std::fmt::Display for TriggerRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TriggerRule::OnPush { branch: None } => write!(f, "push"),
            TriggerRule::OnPush {
                branch: Some(branch),
            } => write!(f, "push on {}", branch),
            TriggerRule::OnSchedule {
                schedule,
                branch: None,
            } => write!(f, "schedule '{}'", schedule),
            TriggerRule::OnSchedule {
                schedule,
                branch: Some(branch),
            } => write!(f, "schedule '{}' on {}", schedule, branch),
        }
    }
}

/// A named set of jobs gated by one trigger rule
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkflowDefinition {
    pub name: String,
    pub trigger: TriggerRule,

    /// Referenced job names, in definition order
    pub jobs: Vec<String>,
}

/// Validated, immutable pipeline definition
#[derive(Debug, Clone)]
pub struct DefinitionModel {
    version: String,
    jobs: Vec<Arc<JobDefinition>>,
    workflows: Vec<Arc<WorkflowDefinition>>,
}

impl DefinitionModel {
    /// Builds a model, validating names, steps and job references
    ///
    /// # Errors
    /// Returns the first [`DefinitionError`] found, checking jobs before
    /// workflows and each in definition order.
    pub fn new(
        version: impl Into<String>,
        jobs: Vec<JobDefinition>,
        workflows: Vec<WorkflowDefinition>,
    ) -> Result<Self, DefinitionError> {
        let version = version.into();
        if version.trim().is_empty() {
            return Err(DefinitionError::MissingVersion);
        }

        let mut job_names = HashSet::new();
        for job in &jobs {
            if !job_names.insert(job.name.as_str()) {
                return Err(DefinitionError::DuplicateJob(job.name.clone()));
            }
            validate_job(job)?;
        }

        let mut workflow_names = HashSet::new();
        for workflow in &workflows {
            if !workflow_names.insert(workflow.name.as_str()) {
                return Err(DefinitionError::DuplicateWorkflow(workflow.name.clone()));
            }
            validate_workflow(workflow, &job_names)?;
        }

        Ok(Self {
            version,
            jobs: jobs.into_iter().map(Arc::new).collect(),
            workflows: workflows.into_iter().map(Arc::new).collect(),
        })
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    /// Jobs in definition order
    pub fn jobs(&self) -> &[Arc<JobDefinition>] {
        &self.jobs
    }

    /// Workflows in definition order
    pub fn workflows(&self) -> &[Arc<WorkflowDefinition>] {
        &self.workflows
    }

    pub fn job(&self, name: &str) -> Option<&Arc<JobDefinition>> {
        self.jobs.iter().find(|job| job.name == name)
    }

    pub fn workflow(&self, name: &str) -> Option<&Arc<WorkflowDefinition>> {
        self.workflows.iter().find(|workflow| workflow.name == name)
    }
}

fn validate_job(job: &JobDefinition) -> Result<(), DefinitionError> {
    let owner = format!("job '{}'", job.name);

    if job.name.trim().is_empty() {
        return Err(DefinitionError::invalid_field(owner, "name", "must not be empty"));
    }
    if job.environment.image.trim().is_empty() {
        return Err(DefinitionError::invalid_field(owner, "image", "must not be empty"));
    }
    if job.environment.resource_class.trim().is_empty() {
        return Err(DefinitionError::invalid_field(
            owner,
            "resource_class",
            "must not be empty",
        ));
    }
    if job.steps.is_empty() {
        return Err(DefinitionError::EmptySteps(job.name.clone()));
    }

    for (idx, step) in job.steps.iter().enumerate() {
        let owner = format!("job '{}' step {}", job.name, idx + 1);
        if step.name.trim().is_empty() {
            return Err(DefinitionError::invalid_field(owner, "name", "must not be empty"));
        }
        if step.command.trim().is_empty() {
            return Err(DefinitionError::invalid_field(
                owner,
                "command",
                "must not be empty",
            ));
        }
        if step.timeout.is_some_and(|timeout| timeout.is_zero()) {
            return Err(DefinitionError::invalid_field(
                owner,
                "timeout",
                "must be greater than zero",
            ));
        }
    }

    Ok(())
}

fn validate_workflow(
    workflow: &WorkflowDefinition,
    job_names: &HashSet<&str>,
) -> Result<(), DefinitionError> {
    if workflow.jobs.is_empty() {
        return Err(DefinitionError::EmptyWorkflow(workflow.name.clone()));
    }

    let mut seen = HashSet::new();
    for job in &workflow.jobs {
        if !job_names.contains(job.as_str()) {
            return Err(DefinitionError::UnknownJob {
                workflow: workflow.name.clone(),
                job: job.clone(),
            });
        }
        if !seen.insert(job.as_str()) {
            return Err(DefinitionError::DuplicateJobReference {
                workflow: workflow.name.clone(),
                job: job.clone(),
            });
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(name: &str) -> JobDefinition {
        JobDefinition {
            name: name.to_string(),
            environment: EnvironmentSpec::new("docker.io/library/alpine:3"),
            steps: vec![StepDefinition::new("test", "true")],
        }
    }

    fn push_workflow(name: &str, jobs: &[&str]) -> WorkflowDefinition {
        WorkflowDefinition {
            name: name.to_string(),
            trigger: TriggerRule::OnPush { branch: None },
            jobs: jobs.iter().map(|job| job.to_string()).collect(),
        }
    }

    #[test]
    fn test_valid_model() {
        let model = DefinitionModel::new(
            "2.1",
            vec![job("unit"), job("lint")],
            vec![push_workflow("commit", &["unit", "lint"])],
        )
        .unwrap();

        assert_eq!(model.version(), "2.1");
        assert_eq!(model.jobs().len(), 2);
        assert_eq!(model.jobs()[0].name, "unit");
        assert!(model.job("lint").is_some());
        assert!(model.workflow("commit").is_some());
        assert!(model.workflow("nightly").is_none());
    }

    #[test]
    fn test_rejects_unknown_job_reference() {
        let err = DefinitionModel::new(
            "2.1",
            vec![job("unit")],
            vec![push_workflow("commit", &["unit", "integration"])],
        )
        .unwrap_err();

        assert!(matches!(
            err,
            DefinitionError::UnknownJob { ref workflow, ref job }
                if workflow == "commit" && job == "integration"
        ));
    }

    #[test]
    fn test_rejects_duplicates() {
        let err = DefinitionModel::new("2.1", vec![job("unit"), job("unit")], vec![]).unwrap_err();
        assert!(matches!(err, DefinitionError::DuplicateJob(ref name) if name == "unit"));

        let err = DefinitionModel::new(
            "2.1",
            vec![job("unit")],
            vec![
                push_workflow("commit", &["unit"]),
                push_workflow("commit", &["unit"]),
            ],
        )
        .unwrap_err();
        assert!(matches!(err, DefinitionError::DuplicateWorkflow(ref name) if name == "commit"));

        let err = DefinitionModel::new(
            "2.1",
            vec![job("unit")],
            vec![push_workflow("commit", &["unit", "unit"])],
        )
        .unwrap_err();
        assert!(matches!(err, DefinitionError::DuplicateJobReference { .. }));
    }

    #[test]
    fn test_rejects_empty_steps_and_workflows() {
        let mut empty = job("unit");
        empty.steps.clear();
        let err = DefinitionModel::new("2.1", vec![empty], vec![]).unwrap_err();
        assert!(matches!(err, DefinitionError::EmptySteps(ref name) if name == "unit"));

        let err = DefinitionModel::new("2.1", vec![job("unit")], vec![push_workflow("commit", &[])])
            .unwrap_err();
        assert!(matches!(err, DefinitionError::EmptyWorkflow(_)));
    }

    #[test]
    fn test_rejects_invalid_fields() {
        let mut blank_command = job("unit");
        blank_command.steps.push(StepDefinition::new("second", "  "));
        let err = DefinitionModel::new("2.1", vec![blank_command], vec![]).unwrap_err();
        assert!(matches!(err, DefinitionError::InvalidField { field: "command", .. }));

        let mut zero_timeout = job("unit");
        zero_timeout.steps[0].timeout = Some(Duration::ZERO);
        let err = DefinitionModel::new("2.1", vec![zero_timeout], vec![]).unwrap_err();
        assert!(matches!(err, DefinitionError::InvalidField { field: "timeout", .. }));

        let err = DefinitionModel::new(" ", vec![job("unit")], vec![]).unwrap_err();
        assert!(matches!(err, DefinitionError::MissingVersion));
    }

    #[test]
    fn test_branch_filter() {
        let any = TriggerRule::OnPush { branch: None };
        assert!(any.accepts_branch("dev"));
        assert!(any.accepts_branch("main"));

        let main_only = TriggerRule::OnPush {
            branch: Some("main".to_string()),
        };
        assert!(main_only.accepts_branch("main"));
        assert!(!main_only.accepts_branch("dev"));
        assert_eq!(main_only.to_string(), "push on main");
    }

    #[test]
    fn test_effective_timeout() {
        let default = Duration::from_secs(600);
        let step = StepDefinition::new("test", "make test");
        assert_eq!(step.effective_timeout(default), default);

        let step = step.with_timeout(Duration::from_secs(30));
        assert_eq!(step.effective_timeout(default), Duration::from_secs(30));
    }
}
