// Job orchestrator: the scheduling façade composed over injected capabilities

use crate::auth::{AuthorizationGate, AuthorizationPolicy, ADMINISTER_ACTION, SCHEDULE_ACTION};
use crate::errors::{EngineError, ServiceError};
use crate::models::{
    param_keys, BlockStatus, Job, JobDefinition, JobFilter, JobRequest, JobScheduleParam,
    JobState, ParamValue, RepositoryFile, ScheduleRequest, SchedulerStatus, Session, Trigger,
    BLOCKOUT_ACTION, CONTENT_CLEANER_ACTION,
};
use crate::repository::{
    metadata_permits_scheduling, OutputPathResolver, PdiContentProvider, Repository,
};
use crate::resolver::JobParameterResolver;
use crate::scheduler::{BlockoutManager, Scheduler};
use crate::telemetry;
use crate::trigger_builder::TriggerBuilder;
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

/// Capabilities the orchestrator is composed over
#[derive(Clone)]
pub struct Capabilities {
    pub scheduler: Arc<dyn Scheduler>,
    pub blockouts: Arc<dyn BlockoutManager>,
    pub repository: Arc<dyn Repository>,
    pub pdi_content: Arc<dyn PdiContentProvider>,
    pub output_paths: Arc<dyn OutputPathResolver>,
    pub policy: Arc<dyn AuthorizationPolicy>,
}

/// A fully resolved job that has not been submitted yet
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedJob {
    /// The request after job-name normalization
    pub request: ScheduleRequest,
    pub definition: JobDefinition,
}

/// Outcome of replacing a blockout by removal and recreation
#[derive(Debug)]
pub enum BlockoutUpdate {
    Updated(Job),
    /// The old blockout is gone and the new one could not be created
    RemovedButRecreateFailed {
        removed_job_id: String,
        cause: ServiceError,
    },
}

impl BlockoutUpdate {
    pub fn into_result(self) -> Result<Job, ServiceError> {
        match self {
            BlockoutUpdate::Updated(job) => Ok(job),
            BlockoutUpdate::RemovedButRecreateFailed { cause, .. } => Err(cause),
        }
    }
}

/// Scheduling façade
///
/// Stateless between calls: every operation receives the caller's session
/// and talks to the injected capabilities directly. Capability failures are
/// never retried.
pub struct JobOrchestrator {
    scheduler: Arc<dyn Scheduler>,
    blockouts: Arc<dyn BlockoutManager>,
    repository: Arc<dyn Repository>,
    output_paths: Arc<dyn OutputPathResolver>,
    gate: AuthorizationGate,
    resolver: JobParameterResolver,
    triggers: TriggerBuilder,
}

impl JobOrchestrator {
    pub fn new(capabilities: Capabilities, triggers: TriggerBuilder) -> Self {
        let resolver = JobParameterResolver::new(
            capabilities.repository.clone(),
            capabilities.pdi_content,
            capabilities.output_paths.clone(),
        );

        Self {
            scheduler: capabilities.scheduler,
            blockouts: capabilities.blockouts,
            repository: capabilities.repository,
            output_paths: capabilities.output_paths,
            gate: AuthorizationGate::new(capabilities.policy),
            resolver,
            triggers,
        }
    }

    // ------------------------------------------------------------------
    // Job creation
    // ------------------------------------------------------------------

    /// Resolve a request into an engine-ready definition without submitting it
    #[instrument(skip(self, session, request), fields(principal = %session.name, job_name = %request.job_name))]
    pub async fn prepare_job(
        &self,
        session: &Session,
        request: ScheduleRequest,
    ) -> Result<PreparedJob, ServiceError> {
        self.gate
            .authorize(session, SCHEDULE_ACTION)
            .into_result("create job")?;

        let file = self.resolver.load_input_file(&request).await?;
        if let Some(file) = &file {
            self.resolver.ensure_schedulable(file).await?;
        }

        let resolved = self.resolver.resolve(session, request, file.as_ref()).await?;

        let now = Utc::now();
        let trigger = self.triggers.build(&resolved.request, now)?;

        let definition = JobDefinition {
            job_name: resolved.request.job_name.clone(),
            action: resolved.action,
            params: resolved.params,
            trigger,
            owner: session.name.clone(),
            created_at: now,
            stream_provider: resolved.stream_provider,
        };

        Ok(PreparedJob {
            request: resolved.request,
            definition,
        })
    }

    #[instrument(skip(self, session, request), fields(principal = %session.name))]
    pub async fn create_job(
        &self,
        session: &Session,
        request: ScheduleRequest,
    ) -> Result<Job, ServiceError> {
        let prepared = self.prepare_job(session, request).await?;

        let job = self
            .scheduler
            .create_job(&prepared.definition)
            .await
            .map_err(|e| {
                error!(error = %e, job_name = %prepared.definition.job_name, "Scheduler rejected job");
                e
            })?;

        telemetry::record_job_created(&job.action);
        info!(
            job_id = %job.job_id,
            job_name = %job.job_name,
            action = %job.action,
            "Job created"
        );

        Ok(job)
    }

    // ------------------------------------------------------------------
    // Job lifecycle
    // ------------------------------------------------------------------

    /// Fire a job once; owners may always do so, others need schedule permission
    #[instrument(skip(self, session), fields(principal = %session.name))]
    pub async fn trigger_now(&self, session: &Session, job_id: &str) -> Result<Job, ServiceError> {
        let job = self.require_job(job_id).await?;
        if !job.is_owned_by(&session.name) {
            self.gate
                .authorize(session, SCHEDULE_ACTION)
                .into_result("trigger job")?;
        }

        self.scheduler.trigger_now(job_id).await?;
        info!("Job triggered");
        self.require_job(job_id).await
    }

    #[instrument(skip(self, session), fields(principal = %session.name))]
    pub async fn pause_job(&self, session: &Session, job_id: &str) -> Result<JobState, ServiceError> {
        let job = self.require_job(job_id).await?;
        self.authorize_job_control(session, &job, "pause job")?;

        self.scheduler.pause_job(job_id).await?;
        Ok(self.require_job(job_id).await?.state)
    }

    #[instrument(skip(self, session), fields(principal = %session.name))]
    pub async fn resume_job(
        &self,
        session: &Session,
        job_id: &str,
    ) -> Result<JobState, ServiceError> {
        let job = self.require_job(job_id).await?;
        self.authorize_job_control(session, &job, "resume job")?;

        self.scheduler.resume_job(job_id).await?;
        Ok(self.require_job(job_id).await?.state)
    }

    /// Remove a job; `false` when the engine does not know it
    #[instrument(skip(self, session), fields(principal = %session.name))]
    pub async fn remove_job(&self, session: &Session, job_id: &str) -> Result<bool, ServiceError> {
        let Some(job) = self.scheduler.get_job(job_id).await? else {
            debug!("Nothing to remove");
            return Ok(false);
        };
        self.authorize_job_control(session, &job, "remove job")?;

        self.scheduler.remove_job(job_id).await?;
        info!("Job removed");
        Ok(true)
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    pub async fn get_job(&self, job_id: &str) -> Result<Option<Job>, ServiceError> {
        Ok(self.scheduler.get_job(job_id).await?)
    }

    #[instrument(skip(self, session, request), fields(principal = %session.name, job_id = %request.job_id))]
    pub async fn get_job_state(
        &self,
        session: &Session,
        request: &JobRequest,
    ) -> Result<JobState, ServiceError> {
        let job = self.require_job(&request.job_id).await?;
        self.ensure_visible(session, &job)?;
        Ok(job.state)
    }

    /// Job details with list-valued parameters reduced to their first element
    #[instrument(skip(self, session), fields(principal = %session.name))]
    pub async fn get_job_info(&self, session: &Session, job_id: &str) -> Result<Job, ServiceError> {
        let mut job = self.require_job(job_id).await?;
        self.ensure_visible(session, &job)?;

        for value in job.job_params.values_mut() {
            if let ParamValue::List(items) = value {
                let first = items.first().cloned().unwrap_or_default();
                *value = ParamValue::Text(first);
            }
        }
        Ok(job)
    }

    #[instrument(skip(self, session), fields(principal = %session.name))]
    pub async fn get_content_cleaner_job(
        &self,
        session: &Session,
    ) -> Result<Option<Job>, ServiceError> {
        self.gate
            .authorize(session, ADMINISTER_ACTION)
            .into_result("look up content cleaner")?;

        let filter = JobFilter::default().with_action(CONTENT_CLEANER_ACTION);
        Ok(self.scheduler.get_jobs(&filter).await?.into_iter().next())
    }

    /// Administrators see every job; everyone else sees only their own
    #[instrument(skip(self, session), fields(principal = %session.name))]
    pub async fn get_jobs(&self, session: &Session) -> Result<Vec<Job>, ServiceError> {
        let mut filter = JobFilter::default().without_blockouts();
        if !self.gate.can_administer(session) {
            filter = filter.owned_by(session.name.clone());
        }
        Ok(self.scheduler.get_jobs(&filter).await?)
    }

    /// Output files in the caller's folder stamped with the schedule's lineage id
    #[instrument(skip(self, session), fields(principal = %session.name))]
    pub async fn get_generated_content_for_schedule(
        &self,
        session: &Session,
        lineage_id: &str,
    ) -> Result<Vec<RepositoryFile>, ServiceError> {
        let folder = self.output_paths.user_folder(session).await?;
        let files = self
            .repository
            .search_generated_content(&folder, lineage_id, param_keys::LINEAGE_ID)
            .await?;
        debug!(folder = %folder, hits = files.len(), "Generated content found");
        Ok(files)
    }

    pub fn can_schedule(&self, session: &Session) -> bool {
        self.gate.can_schedule(session)
    }

    /// Schedule permission combined with the file's schedulable metadata
    #[instrument(skip(self, session), fields(principal = %session.name))]
    pub async fn is_schedule_allowed_for_path(
        &self,
        session: &Session,
        path: &str,
    ) -> Result<bool, ServiceError> {
        if !self.gate.can_schedule(session) {
            return Ok(false);
        }
        let metadata = self.repository.get_file_metadata(path).await?;
        Ok(metadata_permits_scheduling(&metadata))
    }

    // ------------------------------------------------------------------
    // Engine control
    // ------------------------------------------------------------------

    pub async fn get_state(&self) -> Result<SchedulerStatus, ServiceError> {
        Ok(self.scheduler.get_status().await?)
    }

    /// Start the engine when permitted; always reports the current status
    #[instrument(skip(self, session), fields(principal = %session.name))]
    pub async fn start(&self, session: &Session) -> Result<SchedulerStatus, ServiceError> {
        if self.gate.can_schedule(session) {
            self.scheduler.start().await?;
        } else {
            warn!("Caller may not start the scheduler, leaving it unchanged");
        }
        self.get_state().await
    }

    #[instrument(skip(self, session), fields(principal = %session.name))]
    pub async fn pause(&self, session: &Session) -> Result<SchedulerStatus, ServiceError> {
        if self.gate.can_schedule(session) {
            self.scheduler.pause().await?;
        } else {
            warn!("Caller may not pause the scheduler, leaving it unchanged");
        }
        self.get_state().await
    }

    #[instrument(skip(self, session), fields(principal = %session.name))]
    pub async fn shutdown(&self, session: &Session) -> Result<SchedulerStatus, ServiceError> {
        if self.gate.can_schedule(session) {
            self.scheduler.shutdown().await?;
        } else {
            warn!("Caller may not shut down the scheduler, leaving it unchanged");
        }
        self.get_state().await
    }

    // ------------------------------------------------------------------
    // Blockouts
    // ------------------------------------------------------------------

    pub async fn get_block_out_jobs(&self) -> Result<Vec<Job>, ServiceError> {
        Ok(self.blockouts.get_block_out_jobs().await?)
    }

    pub async fn has_blockouts(&self) -> Result<bool, ServiceError> {
        Ok(!self.get_block_out_jobs().await?.is_empty())
    }

    pub async fn will_fire(&self, trigger: &Trigger) -> Result<bool, ServiceError> {
        Ok(self.blockouts.will_fire(trigger).await?)
    }

    pub async fn should_fire_now(&self) -> Result<bool, ServiceError> {
        Ok(self.blockouts.should_fire_now().await?)
    }

    /// Create a blockout window from a request carrying a positive duration
    #[instrument(skip(self, session, request), fields(principal = %session.name))]
    pub async fn add_blockout(
        &self,
        session: &Session,
        mut request: ScheduleRequest,
    ) -> Result<Job, ServiceError> {
        self.gate
            .authorize(session, ADMINISTER_ACTION)
            .into_result("add blockout")?;

        let duration = request.duration.filter(|secs| *secs > 0).ok_or_else(|| {
            ServiceError::InvalidRequest("blockout duration must be a positive number of seconds".to_string())
        })?;
        let timezone = self.triggers.resolve_timezone(request.time_zone.as_deref())?;

        request.action_class = BLOCKOUT_ACTION.to_string();
        request.input_file.clear();
        request
            .job_parameters
            .push(JobScheduleParam::new(param_keys::DURATION, duration));
        request
            .job_parameters
            .push(JobScheduleParam::new(param_keys::TIME_ZONE, timezone.name()));

        self.create_job(session, request).await
    }

    /// Replace a blockout by removing it and creating a new one
    ///
    /// Not transactional: when recreation fails the old blockout stays removed
    /// and the failure is reported as `RemovedButRecreateFailed`.
    #[instrument(skip(self, session, request), fields(principal = %session.name))]
    pub async fn update_blockout(
        &self,
        session: &Session,
        job_id: &str,
        request: ScheduleRequest,
    ) -> Result<BlockoutUpdate, ServiceError> {
        self.gate
            .authorize(session, ADMINISTER_ACTION)
            .into_result("update blockout")?;

        if !self.remove_job(session, job_id).await? {
            warn!("Blockout to update does not exist");
            return Err(ServiceError::AccessDenied(format!(
                "blockout {job_id} could not be removed"
            )));
        }

        match self.add_blockout(session, request).await {
            Ok(job) => Ok(BlockoutUpdate::Updated(job)),
            Err(cause) => {
                error!(error = %cause, "Blockout removed but could not be recreated");
                Ok(BlockoutUpdate::RemovedButRecreateFailed {
                    removed_job_id: job_id.to_string(),
                    cause,
                })
            }
        }
    }

    /// Evaluate a candidate schedule against the block calendar
    #[instrument(skip(self, request), fields(job_name = %request.job_name))]
    pub async fn get_block_status(
        &self,
        request: &ScheduleRequest,
    ) -> Result<BlockStatus, ServiceError> {
        let trigger = self.triggers.build(request, Utc::now())?;

        let partially_blocked = self.blockouts.is_partially_blocked(&trigger).await?;
        let totally_blocked = if partially_blocked {
            !self.blockouts.will_fire(&trigger).await?
        } else {
            false
        };

        let status = BlockStatus {
            totally_blocked,
            partially_blocked,
        };
        telemetry::record_blockout_evaluation(status.verdict());
        debug!(verdict = ?status.verdict(), "Block status computed");
        Ok(status)
    }

    // ------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------

    async fn require_job(&self, job_id: &str) -> Result<Job, ServiceError> {
        self.scheduler
            .get_job(job_id)
            .await?
            .ok_or_else(|| EngineError::JobNotFound(job_id.to_string()).into())
    }

    /// Job control: schedule permission, ownership or administration
    fn authorize_job_control(
        &self,
        session: &Session,
        job: &Job,
        operation: &str,
    ) -> Result<(), ServiceError> {
        if self.gate.can_schedule(session) {
            return Ok(());
        }
        self.gate
            .authorize_owner_or_admin(session, job)
            .into_result(operation)
    }

    /// Read access: schedule permission, ownership or administration
    fn ensure_visible(&self, session: &Session, job: &Job) -> Result<(), ServiceError> {
        if self.gate.can_schedule(session) || self.gate.is_owner_or_admin(session, job) {
            return Ok(());
        }
        Err(ServiceError::UnauthorizedOperation(format!(
            "{} may not read job {}",
            session.name, job.job_id
        )))
    }
}
