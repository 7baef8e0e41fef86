//! Console output
//!
//! Streams step output while jobs run and prints the colored summary once
//! they finish.

use colored::*;
use conveyor_core::domain::job::{JobRun, JobRunStatus, StepResult, StepStatus};
use conveyor_core::domain::log::{OutputLine, OutputStream};
use conveyor_core::domain::workflow::WorkflowStatus;
use conveyor_core::dto::report::WorkflowRunReport;
use conveyor_runner::{OutputSink, OutputSource};
use std::io::Write;

/// Prints streamed step output, prefixed with the job and step it came from
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ConsoleSink {
    to_stderr: bool,
}

impl ConsoleSink {
    /// Streams to stdout
    pub fn stdout() -> Self {
        Self { to_stderr: false }
    }

    /// Streams to stderr, leaving stdout to machine-readable output
    pub fn stderr() -> Self {
        Self { to_stderr: true }
    }

    fn emit(&self, text: &str) {
        if self.to_stderr {
            let _ = writeln!(std::io::stderr().lock(), "{}", text);
        } else {
            let _ = writeln!(std::io::stdout().lock(), "{}", text);
        }
    }
}

impl OutputSink for ConsoleSink {
    fn step_started(&self, source: &OutputSource<'_>) {
        self.emit(&format!(
            "{} {}",
            "▸".cyan(),
            format!("{} / {}", source.job, source.step).bold()
        ));
    }

    fn write(&self, source: &OutputSource<'_>, line: &OutputLine) {
        self.emit(&format_line(source, line));
    }

    fn step_finished(&self, source: &OutputSource<'_>, result: &StepResult) {
        self.emit(&format!(
            "  {} {} {}",
            step_marker(result),
            source.step,
            format_duration(result.duration_ms).dimmed()
        ));
    }
}

/// One streamed line: `[job/step] text`, stderr in yellow
pub fn format_line(source: &OutputSource<'_>, line: &OutputLine) -> String {
    let prefix = format!("[{}/{}]", source.job, source.step).dimmed();
    match line.stream {
        OutputStream::Stdout => format!("  {} {}", prefix, line.text),
        OutputStream::Stderr => format!("  {} {}", prefix, line.text.yellow()),
    }
}

/// Print the summary of every finished workflow run
pub fn print_reports(reports: &[WorkflowRunReport]) {
    if reports.is_empty() {
        println!("{}", "No workflow was triggered.".yellow());
        return;
    }

    println!("\n{}", "─".repeat(80).dimmed());
    for report in reports {
        print_report(report);
    }
    println!("{}", "─".repeat(80).dimmed());

    let failed = reports.iter().filter(|report| !report.succeeded()).count();
    if failed == 0 {
        println!("{}", format!("✓ {} workflow(s) succeeded", reports.len()).green().bold());
    } else {
        println!(
            "{}",
            format!("✗ {} of {} workflow(s) failed", failed, reports.len())
                .red()
                .bold()
        );
    }
}

fn print_report(report: &WorkflowRunReport) {
    let run = &report.workflow_run;
    println!(
        "{} {} {}",
        "Workflow".bold(),
        run.workflow.cyan().bold(),
        colorize_workflow_status(&run.status)
    );
    println!("  Run:     {}", run.id.to_string().dimmed());
    println!("  Event:   {} on {}", run.event.kind, run.event.branch.cyan());

    for job_run in &report.job_runs {
        print_job_run(job_run);
    }
    println!();
}

fn print_job_run(run: &JobRun) {
    println!(
        "  {} {} {} {}",
        "▸".cyan(),
        run.job.bold(),
        colorize_status(&run.status),
        format!("[{}]", run.resource_class).dimmed()
    );

    for step in &run.steps {
        let exit = step
            .exit_code
            .map(|code| format!("exit {}", code))
            .unwrap_or_default();
        println!(
            "      {} {:<24} {} {}",
            step_marker(step),
            step.name,
            exit.dimmed(),
            format_duration(step.duration_ms).dimmed()
        );
    }

    if let Some(failure) = &run.failure {
        println!("      {}", failure.to_string().red());
    }
}

/// Print a fatal error and its causes to stderr
pub fn print_error(err: &anyhow::Error) {
    eprintln!("{} {}", "Error:".red().bold(), err);
    for cause in err.chain().skip(1) {
        eprintln!("  {} {}", "caused by:".dimmed(), cause);
    }
}

fn step_marker(step: &StepResult) -> ColoredString {
    match step.status {
        StepStatus::Succeeded => "✓".green(),
        StepStatus::Failed if step.allowed_failure => "!".yellow(),
        StepStatus::Failed => "✗".red(),
        StepStatus::TimedOut => "⏱".red(),
        StepStatus::NotRun => "·".dimmed(),
    }
}

fn format_duration(duration_ms: Option<u64>) -> String {
    match duration_ms {
        Some(ms) if ms >= 1000 => format!("{:.1}s", ms as f64 / 1000.0),
        Some(ms) => format!("{}ms", ms),
        None => String::new(),
    }
}

/// Colorize job run status for display
fn colorize_status(status: &JobRunStatus) -> ColoredString {
    let status_str = status.to_string();
    match status {
        JobRunStatus::Queued | JobRunStatus::Provisioning => status_str.yellow(),
        JobRunStatus::Running => status_str.cyan(),
        JobRunStatus::Succeeded => status_str.green(),
        JobRunStatus::Failed | JobRunStatus::TimedOut => status_str.red(),
    }
}

fn colorize_workflow_status(status: &WorkflowStatus) -> ColoredString {
    let status_str = format!("{:?}", status);
    match status {
        WorkflowStatus::Running => status_str.cyan(),
        WorkflowStatus::Succeeded => status_str.green(),
        WorkflowStatus::Failed => status_str.red(),
    }
}
