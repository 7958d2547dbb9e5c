// Batch of schedule requests evaluated by the scheduler binary

use anyhow::{Context, Result};
use common::bootstrap::InMemoryRuntime;
use common::errors::ApiError;
use common::models::{BlockStatus, Job, ScheduleRequest, Session};
use common::repository::{InMemoryRepository, StaticPdiContentProvider};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use tracing::{info, warn};

/// File seeded into the in-memory repository
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeedFile {
    pub path: String,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    /// Declared user parameters, for transformation and job files
    #[serde(default)]
    pub parameters: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Batch {
    pub session: Session,
    #[serde(default)]
    pub files: Vec<SeedFile>,
    #[serde(default)]
    pub blockouts: Vec<ScheduleRequest>,
    #[serde(default)]
    pub jobs: Vec<ScheduleRequest>,
}

impl Batch {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read batch file {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse batch file {}", path.display()))
    }

    /// Repository and transformation metadata seeded from the batch files
    pub fn seed(&self) -> (InMemoryRepository, StaticPdiContentProvider) {
        let mut repository = InMemoryRepository::new();
        let mut pdi_content = StaticPdiContentProvider::new();
        for file in &self.files {
            repository = repository.with_file(&file.path, file.metadata.clone());
            if !file.parameters.is_empty() {
                pdi_content = pdi_content.with_parameters(&file.path, file.parameters.clone());
            }
        }
        (repository, pdi_content)
    }
}

/// Result of scheduling one request of the batch
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Outcome {
    pub job_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub block_status: Option<BlockStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job: Option<Job>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ApiError>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Report {
    pub scheduler_status: String,
    pub blockouts: Vec<Outcome>,
    pub jobs: Vec<Outcome>,
    /// Jobs visible to the batch session, grouped by state
    pub jobs_by_state: BTreeMap<String, usize>,
}

/// Create the blockouts, then evaluate and create every job request
pub async fn run(runtime: &InMemoryRuntime, batch: Batch) -> Result<Report> {
    let orchestrator = &runtime.orchestrator;
    let session = &batch.session;

    let mut blockouts = Vec::with_capacity(batch.blockouts.len());
    for request in batch.blockouts {
        let job_name = request.job_name.clone();
        let outcome = match orchestrator.add_blockout(session, request).await {
            Ok(job) => Outcome {
                job_name: job.job_name.clone(),
                block_status: None,
                job: Some(job),
                error: None,
            },
            Err(e) => {
                warn!(error = %e, "Blockout rejected");
                Outcome {
                    job_name,
                    block_status: None,
                    job: None,
                    error: Some(e.into()),
                }
            }
        };
        blockouts.push(outcome);
    }

    let mut jobs = Vec::with_capacity(batch.jobs.len());
    for request in batch.jobs {
        let job_name = request.job_name.clone();
        let block_status = match orchestrator.get_block_status(&request).await {
            Ok(status) => Some(status),
            Err(e) => {
                warn!(error = %e, job_name = %job_name, "Could not evaluate block status");
                None
            }
        };

        let outcome = match orchestrator.create_job(session, request).await {
            Ok(job) => Outcome {
                job_name: job.job_name.clone(),
                block_status,
                job: Some(job),
                error: None,
            },
            Err(e) => {
                warn!(error = %e, job_name = %job_name, "Job rejected");
                Outcome {
                    job_name,
                    block_status,
                    job: None,
                    error: Some(e.into()),
                }
            }
        };
        jobs.push(outcome);
    }

    let mut jobs_by_state = BTreeMap::new();
    for job in orchestrator.get_jobs(session).await? {
        *jobs_by_state.entry(job.state.to_string()).or_insert(0) += 1;
    }

    let scheduler_status = orchestrator.get_state().await?.to_string();
    info!(
        blockouts = blockouts.len(),
        jobs = jobs.len(),
        status = %scheduler_status,
        "Batch evaluated"
    );

    Ok(Report {
        scheduler_status,
        blockouts,
        jobs,
        jobs_by_state,
    })
}
