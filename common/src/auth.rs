// Authorization policy and the gate wrapped around every sensitive operation

use crate::config::PolicyConfig;
use crate::errors::ServiceError;
use crate::models::{Job, Session};
use crate::telemetry;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, instrument, warn};

/// Policy action guarding scheduling-class operations
pub const SCHEDULE_ACTION: &str = "scheduler:manage";

/// Policy action guarding administrative operations
pub const ADMINISTER_ACTION: &str = "security:administer";

/// Grants a role holding this action every policy action
pub const WILDCARD_ACTION: &str = "*";

/// Policy state consulted for every authorization decision
#[cfg_attr(test, mockall::automock)]
pub trait AuthorizationPolicy: Send + Sync {
    fn is_allowed(&self, session: &Session, action: &str) -> bool;
}

/// Role-based policy: a caller may perform an action when any of its roles
/// grants it. Role names compare case-insensitively.
#[derive(Debug, Clone, Default)]
pub struct RoleBasedPolicy {
    grants: HashMap<String, HashSet<String>>,
}

impl RoleBasedPolicy {
    pub fn new<I, A>(grants: I) -> Self
    where
        I: IntoIterator<Item = (String, A)>,
        A: IntoIterator<Item = String>,
    {
        Self {
            grants: grants
                .into_iter()
                .map(|(role, actions)| (role.to_lowercase(), actions.into_iter().collect()))
                .collect(),
        }
    }

    pub fn from_config(config: &PolicyConfig) -> Self {
        Self::new(
            config
                .roles
                .iter()
                .map(|(role, actions)| (role.clone(), actions.clone())),
        )
    }
}

impl AuthorizationPolicy for RoleBasedPolicy {
    fn is_allowed(&self, session: &Session, action: &str) -> bool {
        session.roles.iter().any(|role| {
            self.grants
                .get(&role.to_lowercase())
                .is_some_and(|actions| actions.contains(action) || actions.contains(WILDCARD_ACTION))
        })
    }
}

/// Outcome of a single authorization check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthorizationDecision {
    Allowed,
    DeniedPolicy { action: String },
    DeniedOwnership { job_id: String, owner: String },
}

impl AuthorizationDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, AuthorizationDecision::Allowed)
    }

    /// Turn a denial into an access-denied error
    pub fn into_result(self, operation: &str) -> Result<(), ServiceError> {
        match self {
            AuthorizationDecision::Allowed => Ok(()),
            AuthorizationDecision::DeniedPolicy { action } => Err(ServiceError::AccessDenied(
                format!("{operation} requires permission {action}"),
            )),
            AuthorizationDecision::DeniedOwnership { job_id, owner } => {
                Err(ServiceError::AccessDenied(format!(
                    "{operation} on job {job_id} is restricted to its owner {owner} or an administrator"
                )))
            }
        }
    }
}

/// Wraps the injected policy with the policy and ownership checks
#[derive(Clone)]
pub struct AuthorizationGate {
    policy: Arc<dyn AuthorizationPolicy>,
}

impl AuthorizationGate {
    pub fn new(policy: Arc<dyn AuthorizationPolicy>) -> Self {
        Self { policy }
    }

    /// Check a policy action for the caller
    #[instrument(skip(self, session), fields(principal = %session.name))]
    pub fn authorize(&self, session: &Session, action: &str) -> AuthorizationDecision {
        if self.policy.is_allowed(session, action) {
            debug!(action = %action, "Permission check passed");
            AuthorizationDecision::Allowed
        } else {
            warn!(action = %action, "Insufficient permissions");
            telemetry::record_authorization_denied(action);
            AuthorizationDecision::DeniedPolicy {
                action: action.to_string(),
            }
        }
    }

    pub fn can_schedule(&self, session: &Session) -> bool {
        self.policy.is_allowed(session, SCHEDULE_ACTION)
    }

    pub fn can_administer(&self, session: &Session) -> bool {
        self.policy.is_allowed(session, ADMINISTER_ACTION)
    }

    /// Ownership check without logging or counting a denial
    pub fn is_owner_or_admin(&self, session: &Session, job: &Job) -> bool {
        job.is_owned_by(&session.name) || self.can_administer(session)
    }

    /// Allowed when the caller owns the job or holds the administer action
    #[instrument(skip(self, session, job), fields(principal = %session.name, job_id = %job.job_id))]
    pub fn authorize_owner_or_admin(&self, session: &Session, job: &Job) -> AuthorizationDecision {
        if self.is_owner_or_admin(session, job) {
            return AuthorizationDecision::Allowed;
        }

        warn!(owner = %job.user_name, "Caller is neither job owner nor administrator");
        telemetry::record_authorization_denied("ownership");
        AuthorizationDecision::DeniedOwnership {
            job_id: job.job_id.clone(),
            owner: job.user_name.clone(),
        }
    }
}
