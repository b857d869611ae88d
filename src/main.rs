//! Scanman - network reconnaissance pipeline
//!
//! Main entry point. Parses the CLI, loads configuration, initializes
//! logging and runs the pipeline.

use anyhow::{anyhow, Result};
use clap::Parser;
use scanman::{cli::Cli, config::AppConfig, core::Application, logging};
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    cli.validate().map_err(|message| anyhow!(message))?;

    let mut config = AppConfig::load(&cli.config).await?;
    cli.apply_overrides(&mut config);

    logging::init_logging_with_config(&config.logging)?;

    info!("Starting scanman pipeline");

    let app = Application::new(config).await?;
    let summary = app.run(&cli).await?;

    info!(
        completed = summary.completed,
        skipped = summary.skipped,
        failed = summary.failed,
        findings = summary.findings,
        "Scanman completed successfully"
    );
    Ok(())
}
