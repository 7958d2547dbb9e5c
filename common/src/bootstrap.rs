// Bootstrap utilities for wiring the orchestrator from settings
// Shared by the scheduler binary and the end-to-end tests

use crate::auth::RoleBasedPolicy;
use crate::config::Settings;
use crate::orchestrator::{Capabilities, JobOrchestrator};
use crate::repository::{DefaultOutputPathResolver, InMemoryRepository, StaticPdiContentProvider};
use crate::scheduler::{BlockoutEvaluator, InMemoryScheduler, LookaheadConfig};
use crate::trigger_builder::TriggerBuilder;
use anyhow::{anyhow, Context, Result};
use std::sync::Arc;
use tracing::info;

/// Orchestrator plus handles on the in-memory capabilities behind it
pub struct InMemoryRuntime {
    pub orchestrator: JobOrchestrator,
    pub scheduler: Arc<InMemoryScheduler>,
    pub blockouts: Arc<BlockoutEvaluator>,
    pub repository: Arc<InMemoryRepository>,
}

/// Lookahead bounds derived from the scheduler settings
pub fn lookahead_config(settings: &Settings) -> LookaheadConfig {
    LookaheadConfig {
        horizon: settings.scheduler.lookahead(),
        max_occurrences: settings.scheduler.max_occurrences,
    }
}

/// Validate settings and wire an orchestrator over in-memory capabilities
///
/// # Errors
/// Returns error if the settings fail validation
#[tracing::instrument(skip_all)]
pub fn init_in_memory_runtime(
    settings: &Settings,
    repository: InMemoryRepository,
    pdi_content: StaticPdiContentProvider,
) -> Result<InMemoryRuntime> {
    settings
        .validate()
        .map_err(|e| anyhow!(e))
        .context("Invalid configuration")?;

    let default_timezone = settings
        .scheduler
        .timezone()
        .map_err(|e| anyhow!(e))?;

    let scheduler = Arc::new(InMemoryScheduler::new());
    let blockouts = Arc::new(BlockoutEvaluator::new(
        scheduler.clone(),
        lookahead_config(settings),
    ));
    let repository = Arc::new(repository);

    let capabilities = Capabilities {
        scheduler: scheduler.clone(),
        blockouts: blockouts.clone(),
        repository: repository.clone(),
        pdi_content: Arc::new(pdi_content),
        output_paths: Arc::new(DefaultOutputPathResolver::new(
            settings.output.default_folder.clone(),
        )),
        policy: Arc::new(RoleBasedPolicy::from_config(&settings.policy)),
    };

    let orchestrator = JobOrchestrator::new(capabilities, TriggerBuilder::new(default_timezone));

    info!(
        default_timezone = %default_timezone,
        lookahead_days = settings.scheduler.blockout_lookahead_days,
        roles = settings.policy.roles.len(),
        "Orchestrator initialized over in-memory capabilities"
    );

    Ok(InMemoryRuntime {
        orchestrator,
        scheduler,
        blockouts,
        repository,
    })
}
