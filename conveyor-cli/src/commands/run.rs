//! Event handling commands
//!
//! `push` and `tick` both load the definition, build an engine for the
//! configured backend and feed it a single event.

use anyhow::{Context, Result};
use conveyor_core::domain::trigger::TriggerEvent;
use conveyor_core::dto::report::{WorkflowRunReport, all_succeeded};
use conveyor_runner::{Engine, OutputSink, create_backend};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::info;

use crate::config::Config;
use crate::console::{self, ConsoleSink};

pub async fn handle_run(config: &Config, event: TriggerEvent, json: bool) -> Result<ExitCode> {
    let model = config.load_definition()?;
    let engine_config = config.engine_config()?;

    info!(
        "Handling {} on '{}' with the {} backend",
        event.kind, event.branch, engine_config.backend
    );

    let backend = create_backend(&engine_config)?;
    let engine = Engine::new(Arc::new(model), engine_config, backend);

    // JSON output owns stdout
    let sink: Arc<dyn OutputSink> = Arc::new(console_sink(json));

    let reports = engine.handle_event(event, sink).await;

    if json {
        print_json(&reports)?;
    } else {
        console::print_reports(&reports);
    }

    Ok(exit_code(&reports))
}

fn console_sink(json: bool) -> ConsoleSink {
    if json {
        ConsoleSink::stderr()
    } else {
        ConsoleSink::stdout()
    }
}

fn print_json(reports: &[WorkflowRunReport]) -> Result<()> {
    let json = serde_json::to_string_pretty(reports).context("Failed to serialize reports")?;
    println!("{}", json);
    Ok(())
}

fn exit_code(reports: &[WorkflowRunReport]) -> ExitCode {
    if all_succeeded(reports) {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_streams_to_stderr() {
        assert_eq!(console_sink(true), ConsoleSink::stderr());
        assert_eq!(console_sink(false), ConsoleSink::stdout());
        assert_ne!(ConsoleSink::stdout(), ConsoleSink::stderr());
    }
}
