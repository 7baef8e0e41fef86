//! Definition listing

use anyhow::Result;
use colored::*;
use conveyor_core::domain::definition::{
    DEFAULT_WORKING_DIRECTORY, DefinitionModel, JobDefinition, WorkflowDefinition,
};
use std::process::ExitCode;

use crate::config::Config;

pub fn handle_show(config: &Config) -> Result<ExitCode> {
    let model = config.load_definition()?;
    print_definition(&model);
    Ok(ExitCode::SUCCESS)
}

fn print_definition(model: &DefinitionModel) {
    println!("{} {}", "Version:".bold(), model.version());

    println!("\n{}", "Jobs:".bold());
    println!("{}", "─".repeat(80).dimmed());
    for job in model.jobs() {
        print_job(job);
    }

    println!("\n{}", "Workflows:".bold());
    println!("{}", "─".repeat(80).dimmed());
    for workflow in model.workflows() {
        print_workflow(workflow);
    }
}

fn print_job(job: &JobDefinition) {
    let environment = &job.environment;
    println!(
        "  {} {} {}",
        "▸".cyan(),
        job.name.bold(),
        format!("[{}]", environment.resource_class).dimmed()
    );
    println!("    Image:    {}", environment.image.cyan());
    if environment.working_directory != DEFAULT_WORKING_DIRECTORY {
        println!("    Workdir:  {}", environment.working_directory);
    }
    for (key, value) in &environment.variables {
        println!("    {} = {}", key.cyan(), value);
    }

    for (index, step) in job.steps.iter().enumerate() {
        let mut notes = Vec::new();
        if let Some(timeout) = step.timeout {
            notes.push(format!("timeout {:?}", timeout));
        }
        if step.allow_failure {
            notes.push("may fail".to_string());
        }

        let notes = if notes.is_empty() {
            String::new()
        } else {
            format!("({})", notes.join(", "))
        };
        println!("    {}. {} {}", index + 1, step.name, notes.dimmed());
    }
    println!();
}

fn print_workflow(workflow: &WorkflowDefinition) {
    println!("  {} {}", "▸".cyan(), workflow.name.bold());
    println!("    Trigger:  {}", workflow.trigger.to_string().yellow());
    println!("    Jobs:     {}", workflow.jobs.join(", "));
    println!();
}
