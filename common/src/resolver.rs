// Job parameter resolution
//
// Turns a loosely-typed schedule request plus its optional input file into the
// action reference, merged parameter map and stream provider of a job.

use crate::errors::ServiceError;
use crate::models::{
    param_keys, ActionReference, JobParams, ParamValue, RepositoryFile, ScheduleRequest,
    Session, StreamProvider,
};
use crate::repository::{
    metadata_permits_scheduling, OutputPathResolver, PdiContentProvider, Repository,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

/// File extensions handled by the transformation engine
const PDI_EXTENSIONS: [&str; 2] = ["ktr", "kjb"];

/// Outcome of resolving a request
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedJob {
    /// The request with its job name filled in
    pub request: ScheduleRequest,
    pub action: ActionReference,
    pub params: JobParams,
    pub stream_provider: Option<StreamProvider>,
}

/// Resolver for job names, actions and parameters
#[derive(Clone)]
pub struct JobParameterResolver {
    repository: Arc<dyn Repository>,
    pdi_content: Arc<dyn PdiContentProvider>,
    output_paths: Arc<dyn OutputPathResolver>,
}

impl JobParameterResolver {
    pub fn new(
        repository: Arc<dyn Repository>,
        pdi_content: Arc<dyn PdiContentProvider>,
        output_paths: Arc<dyn OutputPathResolver>,
    ) -> Self {
        Self {
            repository,
            pdi_content,
            output_paths,
        }
    }

    /// Look up the request's input file, failing when it names a missing one
    #[instrument(skip(self, request), fields(input_file = %request.input_file))]
    pub async fn load_input_file(
        &self,
        request: &ScheduleRequest,
    ) -> Result<Option<RepositoryFile>, ServiceError> {
        if !request.has_input_file() {
            return Ok(None);
        }

        let path = request.input_file.trim();
        match self.repository.get_file(path).await? {
            Some(file) => Ok(Some(file)),
            None => {
                warn!("Input file not found in repository");
                Err(ServiceError::InputFileNotFound(path.to_string()))
            }
        }
    }

    /// Reject files whose metadata forbids scheduling
    pub async fn ensure_schedulable(&self, file: &RepositoryFile) -> Result<(), ServiceError> {
        let metadata = self.repository.get_file_metadata(&file.path).await?;
        if metadata_permits_scheduling(&metadata) {
            Ok(())
        } else {
            warn!(path = %file.path, "File metadata forbids scheduling");
            Err(ServiceError::NotSchedulable(file.path.clone()))
        }
    }

    #[instrument(skip_all, fields(principal = %session.name))]
    pub async fn resolve(
        &self,
        session: &Session,
        mut request: ScheduleRequest,
        file: Option<&RepositoryFile>,
    ) -> Result<ResolvedJob, ServiceError> {
        normalize_job_name(&mut request, file);
        if request.job_name.trim().is_empty() {
            return Err(ServiceError::InvalidRequest(
                "job name cannot be derived from an empty request".to_string(),
            ));
        }

        let mut params: JobParams = request
            .job_parameters
            .iter()
            .map(|p| (p.name.clone(), p.value.clone()))
            .collect();

        let (action, stream_provider) = match file {
            Some(file) => {
                if is_pdi_file(&file.name) {
                    params = self.convert_pdi_parameters(&request, file, params).await?;
                }

                let output_path =
                    if request.auto_create_unique_filename || request.output_file.trim().is_empty()
                    {
                        self.output_paths
                            .resolve_output_file_path(session, &request)
                            .await?
                    } else {
                        request.output_file.clone()
                    };

                params.insert(param_keys::INPUT_FILE.to_string(), file.path.clone().into());
                params.insert(param_keys::OUTPUT_FILE.to_string(), output_path.clone().into());
                params.insert(
                    param_keys::AUTO_CREATE_UNIQUE_FILENAME.to_string(),
                    request.auto_create_unique_filename.into(),
                );

                let action = action_for_file(file)?;
                let stream = StreamProvider {
                    input_file: file.path.clone(),
                    output_path,
                    auto_create_unique_filename: request.auto_create_unique_filename,
                };
                (action, Some(stream))
            }
            None => {
                let class = request.action_class.trim();
                if class.is_empty() {
                    return Err(ServiceError::InvalidRequest(
                        "request names neither an input file nor an action class".to_string(),
                    ));
                }
                (ActionReference::Class(class.to_string()), None)
            }
        };

        params
            .entry(param_keys::LINEAGE_ID.to_string())
            .or_insert_with(|| Uuid::new_v4().to_string().into());
        params.insert(param_keys::ACTION_USER.to_string(), session.name.clone().into());

        debug!(
            job_name = %request.job_name,
            action = %action.name(),
            param_count = params.len(),
            "Job parameters resolved"
        );

        Ok(ResolvedJob {
            request,
            action,
            params,
            stream_provider,
        })
    }

    /// Move declared parameters into the nested parameter map and add the run flags
    async fn convert_pdi_parameters(
        &self,
        request: &ScheduleRequest,
        file: &RepositoryFile,
        params: JobParams,
    ) -> Result<JobParams, ServiceError> {
        let declared = self.pdi_content.get_user_parameters(&file.path).await?;

        let mut nested: BTreeMap<String, String> = request.pdi_parameters.clone();
        let mut converted = JobParams::new();
        for (name, value) in params {
            if declared.contains(&name) {
                nested.entry(name).or_insert_with(|| value.to_param_string());
            } else {
                converted.insert(name, value);
            }
        }

        converted.insert(param_keys::PDI_PARAMETERS.to_string(), ParamValue::Map(nested));
        converted.insert(param_keys::RUN_SAFE_MODE.to_string(), request.run_safe_mode.into());
        converted.insert(
            param_keys::GATHERING_METRICS.to_string(),
            request.gathering_metrics.into(),
        );
        if let Some(level) = &request.log_level {
            converted.insert(param_keys::LOG_LEVEL.to_string(), level.clone().into());
        }

        Ok(converted)
    }
}

/// Fill in a blank job name from the input file or the action class
pub fn normalize_job_name(request: &mut ScheduleRequest, file: Option<&RepositoryFile>) {
    if !request.job_name.trim().is_empty() {
        return;
    }

    let derived = if request.has_input_file() {
        let name = file.map_or(request.input_file.as_str(), |f| f.name.as_str());
        base_name_without_extension(name)
    } else {
        request
            .action_class
            .trim()
            .rsplit('.')
            .next()
            .unwrap_or_default()
            .to_string()
    };
    request.job_name = derived;
}

/// Last path segment with its extension removed
pub fn base_name_without_extension(path: &str) -> String {
    let name = path.trim().rsplit('/').next().unwrap_or_default();
    match name.rfind('.') {
        Some(dot) if dot > 0 => name[..dot].to_string(),
        _ => name.to_string(),
    }
}

fn extension(name: &str) -> Option<&str> {
    match name.rfind('.') {
        Some(dot) if dot > 0 && dot + 1 < name.len() => Some(&name[dot + 1..]),
        _ => None,
    }
}

pub fn is_pdi_file(name: &str) -> bool {
    extension(name).is_some_and(|ext| {
        PDI_EXTENSIONS
            .iter()
            .any(|pdi| ext.eq_ignore_ascii_case(pdi))
    })
}

fn action_for_file(file: &RepositoryFile) -> Result<ActionReference, ServiceError> {
    extension(&file.name)
        .map(|ext| ActionReference::ActionId(ext.to_ascii_lowercase()))
        .ok_or_else(|| {
            ServiceError::InvalidRequest(format!("no action is registered for {}", file.path))
        })
}
