use anyhow::Result;
use colored::*;
use std::process::ExitCode;

use crate::config::Config;

/// Load the definition and report whether it is valid
pub fn handle_validate(config: &Config) -> Result<ExitCode> {
    let model = config.load_definition()?;

    println!(
        "{} {} is valid ({} jobs, {} workflows)",
        "✓".green(),
        config.file.display().to_string().cyan(),
        model.jobs().len(),
        model.workflows().len()
    );

    Ok(ExitCode::SUCCESS)
}
