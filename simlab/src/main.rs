//! Main entry point for the SimLab CLI.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use simlab::{
    cli,
    container::DockerCli,
    information_need::InformationNeed,
    orchestrator::Orchestrator,
    registry::ComponentRegistry,
    run_configuration::RunConfiguration,
    server,
    settings::Settings,
    storage::{RunStatus, Storage},
    task::Task,
    telemetry,
};
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let args = cli::Cli::parse();

    let settings = Settings::load()?;
    telemetry::init(&settings.logging)?;

    match args.command {
        cli::Commands::Serve { role, addr } => server::serve(addr, role).await,
        cli::Commands::Run { config } => {
            let storage = Storage::open(&settings.storage.db_path)?;
            let registry = ComponentRegistry::with_defaults();
            let configuration = RunConfiguration::load(&config, &registry, &storage)
                .with_context(|| format!("Failed to load run configuration {}", config.display()))?;

            let runtime = Arc::new(DockerCli::new(&settings.docker));
            let orchestrator = Orchestrator::new(settings.simulation.clone(), storage, runtime);
            let report = orchestrator.run(&configuration).await?;

            if report.record.status == RunStatus::Failed {
                bail!(
                    "Run '{}' failed: {}",
                    report.record.name,
                    report.record.error.unwrap_or_default()
                );
            }
            info!(
                summaries = report.summaries.len(),
                output_dir = %report.output_dir.display(),
                "Run '{}' completed",
                report.record.name
            );
            Ok(())
        }
        cli::Commands::ImportBatch { file } => {
            let contents = std::fs::read_to_string(&file)
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let raw: Vec<serde_json::Value> = serde_json::from_str(&contents)
                .with_context(|| format!("{} must hold a JSON array of information needs", file.display()))?;
            let needs = raw
                .iter()
                .map(InformationNeed::from_dict)
                .collect::<simlab::Result<Vec<_>>>()?;

            let storage = Storage::open(&settings.storage.db_path)?;
            let batch_id = Task::save_information_need_batch(&storage, needs)?;
            println!("{batch_id}");
            Ok(())
        }
    }
}
