// Scheduler binary entry point
//
// Evaluates a JSON batch of blockouts and schedule requests against the
// in-memory engine and prints the resulting report.

mod batch;

use anyhow::{Context, Result};
use batch::Batch;
use common::bootstrap::init_in_memory_runtime;
use common::config::Settings;
use common::telemetry;
use std::path::PathBuf;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    let settings = Settings::load().context("Failed to load configuration")?;

    telemetry::init_logging(&settings.observability.log_level)?;
    if let Some(port) = settings.observability.metrics_port {
        telemetry::init_metrics(port)?;
    }

    info!(
        default_timezone = %settings.scheduler.default_timezone,
        lookahead_days = settings.scheduler.blockout_lookahead_days,
        "Configuration loaded"
    );

    let batch_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .context("Usage: scheduler <batch.json>")?;
    let batch = Batch::load(&batch_path)?;
    let session = batch.session.clone();

    let (repository, pdi_content) = batch.seed();
    let runtime = init_in_memory_runtime(&settings, repository, pdi_content)?;

    let report = batch::run(&runtime, batch).await.map_err(|e| {
        error!(error = %e, "Batch evaluation failed");
        e
    })?;

    println!("{}", serde_json::to_string_pretty(&report)?);

    match runtime.orchestrator.shutdown(&session).await {
        Ok(status) => info!(status = %status, "Scheduler stopped"),
        Err(e) => error!(error = %e, "Error during scheduler shutdown"),
    }

    Ok(())
}
