// Scheduling engine capability and an in-process engine implementation

use crate::errors::EngineError;
use crate::models::{Job, JobDefinition, JobFilter, JobState, SchedulerStatus};
use crate::schedule::FireTimes;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::BTreeMap;
use tokio::sync::RwLock;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// Scheduler trait for the engine that owns job persistence and firing
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Scheduler: Send + Sync {
    async fn create_job(&self, definition: &JobDefinition) -> Result<Job, EngineError>;

    /// Look up a job; `None` when the engine does not know the id
    async fn get_job(&self, job_id: &str) -> Result<Option<Job>, EngineError>;

    async fn get_jobs(&self, filter: &JobFilter) -> Result<Vec<Job>, EngineError>;

    async fn pause_job(&self, job_id: &str) -> Result<(), EngineError>;

    async fn resume_job(&self, job_id: &str) -> Result<(), EngineError>;

    async fn remove_job(&self, job_id: &str) -> Result<(), EngineError>;

    /// Fire the job once, outside its trigger
    async fn trigger_now(&self, job_id: &str) -> Result<(), EngineError>;

    async fn start(&self) -> Result<(), EngineError>;

    async fn pause(&self) -> Result<(), EngineError>;

    async fn shutdown(&self) -> Result<(), EngineError>;

    async fn get_status(&self) -> Result<SchedulerStatus, EngineError>;
}

/// Engine keeping every job in memory
///
/// Jobs are ordered by id so listings are stable. Nothing is executed; firing
/// only records the run time and advances the next fire time.
pub struct InMemoryScheduler {
    jobs: RwLock<BTreeMap<String, Job>>,
    status: RwLock<SchedulerStatus>,
}

impl InMemoryScheduler {
    pub fn new() -> Self {
        Self {
            jobs: RwLock::new(BTreeMap::new()),
            status: RwLock::new(SchedulerStatus::Running),
        }
    }

    async fn ensure_accepting(&self) -> Result<(), EngineError> {
        if *self.status.read().await == SchedulerStatus::Stopped {
            return Err(EngineError::Failed("scheduler has been shut down".to_string()));
        }
        Ok(())
    }

    async fn update_state(&self, job_id: &str, state: JobState) -> Result<(), EngineError> {
        let mut jobs = self.jobs.write().await;
        let job = jobs
            .get_mut(job_id)
            .ok_or_else(|| EngineError::JobNotFound(job_id.to_string()))?;
        job.state = state;
        Ok(())
    }
}

impl Default for InMemoryScheduler {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Scheduler for InMemoryScheduler {
    #[instrument(skip(self, definition), fields(job_name = %definition.job_name, owner = %definition.owner))]
    async fn create_job(&self, definition: &JobDefinition) -> Result<Job, EngineError> {
        self.ensure_accepting().await?;

        let next_run = definition
            .trigger
            .next_fire_time(definition.created_at)
            .map_err(|e| EngineError::Failed(e.to_string()))?;

        let job = Job {
            job_id: format!("{}\t{}\t{}", definition.owner, definition.job_name, Uuid::new_v4()),
            job_name: definition.job_name.clone(),
            action: definition.action.name().to_string(),
            user_name: definition.owner.clone(),
            state: if next_run.is_some() {
                JobState::Normal
            } else {
                JobState::Complete
            },
            job_params: definition.params.clone(),
            trigger: definition.trigger.clone(),
            next_run,
            last_run: None,
        };

        self.jobs
            .write()
            .await
            .insert(job.job_id.clone(), job.clone());

        info!(job_id = %job.job_id, next_run = ?job.next_run, "Job stored");
        Ok(job)
    }

    async fn get_job(&self, job_id: &str) -> Result<Option<Job>, EngineError> {
        Ok(self.jobs.read().await.get(job_id).cloned())
    }

    async fn get_jobs(&self, filter: &JobFilter) -> Result<Vec<Job>, EngineError> {
        let jobs = self.jobs.read().await;
        Ok(jobs.values().filter(|job| filter.accept(job)).cloned().collect())
    }

    #[instrument(skip(self))]
    async fn pause_job(&self, job_id: &str) -> Result<(), EngineError> {
        self.update_state(job_id, JobState::Paused).await?;
        debug!("Job paused");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn resume_job(&self, job_id: &str) -> Result<(), EngineError> {
        self.update_state(job_id, JobState::Normal).await?;
        debug!("Job resumed");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn remove_job(&self, job_id: &str) -> Result<(), EngineError> {
        match self.jobs.write().await.remove(job_id) {
            Some(_) => {
                info!("Job removed");
                Ok(())
            }
            None => Err(EngineError::JobNotFound(job_id.to_string())),
        }
    }

    #[instrument(skip(self))]
    async fn trigger_now(&self, job_id: &str) -> Result<(), EngineError> {
        self.ensure_accepting().await?;

        let now = Utc::now();
        let mut jobs = self.jobs.write().await;
        let job = jobs
            .get_mut(job_id)
            .ok_or_else(|| EngineError::JobNotFound(job_id.to_string()))?;

        job.last_run = Some(now);
        match job.trigger.next_fire_time(now) {
            Ok(next) => job.next_run = next,
            Err(e) => warn!(error = %e, "Could not compute next fire time"),
        }

        info!(job_name = %job.job_name, "Job fired on demand");
        Ok(())
    }

    async fn start(&self) -> Result<(), EngineError> {
        *self.status.write().await = SchedulerStatus::Running;
        info!("Scheduler started");
        Ok(())
    }

    async fn pause(&self) -> Result<(), EngineError> {
        self.ensure_accepting().await?;
        *self.status.write().await = SchedulerStatus::Paused;
        info!("Scheduler paused");
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), EngineError> {
        *self.status.write().await = SchedulerStatus::Stopped;
        info!("Scheduler shut down");
        Ok(())
    }

    async fn get_status(&self) -> Result<SchedulerStatus, EngineError> {
        Ok(*self.status.read().await)
    }
}
