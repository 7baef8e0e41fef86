//! Commands module
//!
//! Defines all CLI commands and their handlers.

mod run;
mod show;
mod validate;

use anyhow::Result;
use chrono::{DateTime, Utc};
use clap::Subcommand;
use conveyor_core::domain::trigger::TriggerEvent;
use std::process::ExitCode;

use crate::config::Config;

/// Top-level CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Check the definition file without running anything
    Validate,
    /// List the jobs and workflows of the definition
    Show,
    /// Simulate a push to a branch and run the triggered workflows
    Push {
        /// Branch that was pushed
        #[arg(short, long)]
        branch: String,

        /// Print the reports as JSON instead of the summary
        #[arg(long)]
        json: bool,
    },
    /// Fire a schedule tick and run the workflows due at that time
    Tick {
        /// Branch the tick applies to
        #[arg(short, long)]
        branch: String,

        /// Tick time (RFC 3339), defaults to now
        #[arg(long)]
        at: Option<DateTime<Utc>>,

        /// Print the reports as JSON instead of the summary
        #[arg(long)]
        json: bool,
    },
}

/// Handle a CLI command
///
/// Routes the command to the appropriate handler module and returns the
/// process exit code.
pub async fn handle_command(command: Commands, config: &Config) -> Result<ExitCode> {
    match command {
        Commands::Validate => validate::handle_validate(config),
        Commands::Show => show::handle_show(config),
        Commands::Push { branch, json } => {
            run::handle_run(config, TriggerEvent::push(branch), json).await
        }
        Commands::Tick { branch, at, json } => {
            let event = TriggerEvent::scheduled_tick(branch, at.unwrap_or_else(Utc::now));
            run::handle_run(config, event, json).await
        }
    }
}
