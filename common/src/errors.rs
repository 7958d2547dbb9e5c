// Error handling framework for the scheduling façade

use thiserror::Error;

/// Trigger construction errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TriggerError {
    #[error("No trigger specification supplied")]
    MissingSpecification,

    #[error("Ambiguous trigger specification, found: {}", .0.join(", "))]
    AmbiguousSpecification(Vec<String>),

    #[error("Invalid cron expression '{expression}': {reason}")]
    InvalidCronExpression { expression: String, reason: String },

    #[error("Invalid timezone: {0}")]
    InvalidTimezone(String),

    #[error("Start time {start} does not exist in timezone {timezone}")]
    NonexistentLocalTime { start: String, timezone: String },

    #[error("Invalid repeat interval: {0} seconds")]
    InvalidInterval(i64),

    #[error("Invalid recurrence: {0}")]
    InvalidRecurrence(String),

    #[error("End time precedes start time")]
    EndBeforeStart,
}

/// Failures reported by the scheduling engine, carried through unchanged
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Scheduler engine failure: {0}")]
    Failed(String),
}

/// Content repository errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RepositoryError {
    #[error("Repository unavailable: {0}")]
    Unavailable(String),

    #[error("Repository lookup failed for {path}: {reason}")]
    LookupFailed { path: String, reason: String },
}

/// Errors surfaced by the job orchestrator
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Access denied: {0}")]
    AccessDenied(String),

    #[error("File is not schedulable: {0}")]
    NotSchedulable(String),

    #[error("Invalid trigger: {0}")]
    InvalidTrigger(#[from] TriggerError),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("Unauthorized operation: {0}")]
    UnauthorizedOperation(String),

    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error("Cannot find input source file: {0}")]
    InputFileNotFound(String),

    #[error("Invalid schedule request: {0}")]
    InvalidRequest(String),
}

impl ServiceError {
    /// Stable machine-readable code for the error kind
    pub fn code(&self) -> &'static str {
        match self {
            ServiceError::AccessDenied(_) => "ACCESS_DENIED",
            ServiceError::NotSchedulable(_) => "NOT_SCHEDULABLE",
            ServiceError::InvalidTrigger(_) => "INVALID_TRIGGER",
            ServiceError::Engine(_) => "ENGINE_ERROR",
            ServiceError::UnauthorizedOperation(_) => "UNAUTHORIZED_OPERATION",
            ServiceError::Repository(_) => "REPOSITORY_ERROR",
            ServiceError::InputFileNotFound(_) => "INPUT_FILE_NOT_FOUND",
            ServiceError::InvalidRequest(_) => "INVALID_REQUEST",
        }
    }
}

/// Serializable error payload handed to whatever transport sits on top
#[derive(Debug, serde::Serialize)]
pub struct ApiError {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ApiError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}

impl From<ServiceError> for ApiError {
    fn from(err: ServiceError) -> Self {
        ApiError::new(err.code(), err.to_string())
    }
}

impl From<TriggerError> for ApiError {
    fn from(err: TriggerError) -> Self {
        ServiceError::from(err).into()
    }
}

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        ServiceError::from(err).into()
    }
}
