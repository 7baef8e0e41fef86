//! Conveyor CLI
//!
//! Loads a pipeline definition, feeds it a push or schedule event and runs
//! every activated workflow to completion.
//!
//! Exit status: 0 when every activated workflow succeeded (or nothing was
//! activated), 1 when a run failed, 2 when the definition is invalid.

mod commands;
mod config;
mod console;

use clap::Parser;
use commands::{Commands, handle_command};
use config::Config;
use conveyor_core::error::DefinitionError;
use conveyor_runner::BackendKind;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "conveyor")]
#[command(about = "Conveyor CI pipeline engine", long_about = None)]
struct Cli {
    /// Path to the pipeline definition
    #[arg(
        short,
        long,
        global = true,
        env = "CONVEYOR_FILE",
        default_value = "conveyor.yml"
    )]
    file: PathBuf,

    /// Environment backend (local or podman)
    #[arg(long, global = true, env = "CONVEYOR_BACKEND")]
    backend: Option<BackendKind>,

    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "conveyor=info,conveyor_runner=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    let config = Config {
        file: cli.file,
        backend: cli.backend,
    };

    match handle_command(cli.command, &config).await {
        Ok(code) => code,
        Err(err) => {
            console::print_error(&err);
            ExitCode::from(exit_status_for(&err))
        }
    }
}

/// Invalid definitions exit with 2, everything else with 1
fn exit_status_for(err: &anyhow::Error) -> u8 {
    if err.downcast_ref::<DefinitionError>().is_some() {
        2
    } else {
        1
    }
}
