use chrono::{DateTime, Duration, NaiveDateTime, Utc, Weekday};
use chrono_tz::Tz;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

// Helper functions for Tz serialization
fn serialize_tz<S>(tz: &Tz, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(&tz.to_string())
}

fn deserialize_tz<'de, D>(deserializer: D) -> Result<Tz, D::Error>
where
    D: Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    Tz::from_str(&s).map_err(serde::de::Error::custom)
}

/// Action marking a job as a blockout window
pub const BLOCKOUT_ACTION: &str = "scheduler.blockout.BlockoutAction";

/// Action of the generated-content cleaner job
pub const CONTENT_CLEANER_ACTION: &str = "scheduler.admin.GeneratedContentCleaner";

/// Repository metadata key that can veto scheduling of a file
pub const SCHEDULABLE_KEY: &str = "_PERM_SCHEDULABLE";

/// Well-known job parameter names
pub mod param_keys {
    pub const DURATION: &str = "duration";
    pub const TIME_ZONE: &str = "timeZone";
    pub const INPUT_FILE: &str = "inputFile";
    pub const OUTPUT_FILE: &str = "outputFile";
    pub const AUTO_CREATE_UNIQUE_FILENAME: &str = "autoCreateUniqueFilename";
    pub const LINEAGE_ID: &str = "lineage-id";
    pub const ACTION_USER: &str = "actionUser";
    pub const RUN_SAFE_MODE: &str = "runSafeMode";
    pub const GATHERING_METRICS: &str = "gatheringMetrics";
    pub const LOG_LEVEL: &str = "logLevel";
    pub const PDI_PARAMETERS: &str = "parameters";
}

// ============================================================================
// Parameters
// ============================================================================

/// Value of a single job parameter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Flag(bool),
    Number(i64),
    Text(String),
    List(Vec<String>),
    Map(BTreeMap<String, String>),
}

impl ParamValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            ParamValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<i64> {
        match self {
            ParamValue::Number(n) => Some(*n),
            ParamValue::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Flatten the value into the string form handed to transformation engines
    pub fn to_param_string(&self) -> String {
        match self {
            ParamValue::Flag(b) => b.to_string(),
            ParamValue::Number(n) => n.to_string(),
            ParamValue::Text(s) => s.clone(),
            ParamValue::List(items) => items.join(","),
            ParamValue::Map(map) => serde_json::to_string(map).unwrap_or_default(),
        }
    }
}

impl From<&str> for ParamValue {
    fn from(value: &str) -> Self {
        ParamValue::Text(value.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(value: String) -> Self {
        ParamValue::Text(value)
    }
}

impl From<i64> for ParamValue {
    fn from(value: i64) -> Self {
        ParamValue::Number(value)
    }
}

impl From<bool> for ParamValue {
    fn from(value: bool) -> Self {
        ParamValue::Flag(value)
    }
}

impl From<Vec<String>> for ParamValue {
    fn from(value: Vec<String>) -> Self {
        ParamValue::List(value)
    }
}

/// Merged parameter map handed to the engine
pub type JobParams = BTreeMap<String, ParamValue>;

/// A named parameter supplied with a schedule request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobScheduleParam {
    pub name: String,
    pub value: ParamValue,
}

impl JobScheduleParam {
    pub fn new(name: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

// ============================================================================
// Schedule requests
// ============================================================================

/// Repeat-every-N-seconds trigger as supplied by the caller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimpleTriggerSpec {
    /// Wall-clock start, interpreted in the request's time zone
    pub start_time: NaiveDateTime,
    #[serde(default)]
    pub end_time: Option<NaiveDateTime>,
    /// Number of repeats after the first firing; -1 repeats forever
    #[serde(default = "default_repeat_count")]
    pub repeat_count: i32,
    pub repeat_interval_seconds: i64,
}

fn default_repeat_count() -> i32 {
    -1
}

/// Cron expression trigger as supplied by the caller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CronTriggerSpec {
    pub cron_string: String,
    #[serde(default)]
    pub start_time: Option<NaiveDateTime>,
    #[serde(default)]
    pub end_time: Option<NaiveDateTime>,
}

/// Calendar recurrence trigger; either a raw cron string or recurrence lists
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ComplexTriggerSpec {
    pub cron_string: Option<String>,
    pub minutes: Vec<u32>,
    pub hours: Vec<u32>,
    pub days_of_month: Vec<u32>,
    pub months: Vec<u32>,
    pub days_of_week: Vec<Weekday>,
    pub years: Vec<i32>,
    pub start_time: Option<NaiveDateTime>,
    pub end_time: Option<NaiveDateTime>,
}

/// Loosely-typed schedule request as received from a client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ScheduleRequest {
    pub job_name: String,
    pub action_class: String,
    pub input_file: String,
    pub output_file: String,
    pub auto_create_unique_filename: bool,
    pub run_safe_mode: bool,
    pub gathering_metrics: bool,
    pub log_level: Option<String>,
    pub time_zone: Option<String>,
    pub job_parameters: Vec<JobScheduleParam>,
    pub pdi_parameters: BTreeMap<String, String>,
    /// Blockout window length in seconds
    pub duration: Option<i64>,
    pub simple_job_trigger: Option<SimpleTriggerSpec>,
    pub cron_job_trigger: Option<CronTriggerSpec>,
    pub complex_job_trigger: Option<ComplexTriggerSpec>,
}

impl Default for ScheduleRequest {
    fn default() -> Self {
        Self {
            job_name: String::new(),
            action_class: String::new(),
            input_file: String::new(),
            output_file: String::new(),
            auto_create_unique_filename: true,
            run_safe_mode: false,
            gathering_metrics: false,
            log_level: None,
            time_zone: None,
            job_parameters: Vec::new(),
            pdi_parameters: BTreeMap::new(),
            duration: None,
            simple_job_trigger: None,
            cron_job_trigger: None,
            complex_job_trigger: None,
        }
    }
}

impl ScheduleRequest {
    pub fn has_input_file(&self) -> bool {
        !self.input_file.trim().is_empty()
    }

    /// Names of the trigger forms populated on this request
    pub fn trigger_forms(&self) -> Vec<&'static str> {
        let mut forms = Vec::new();
        if self.simple_job_trigger.is_some() {
            forms.push("simple");
        }
        if self.cron_job_trigger.is_some() {
            forms.push("cron");
        }
        if self.complex_job_trigger.is_some() {
            forms.push("complex");
        }
        forms
    }
}

/// Reference to an existing job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRequest {
    pub job_id: String,
}

impl JobRequest {
    pub fn new(job_id: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
        }
    }
}

// ============================================================================
// Triggers
// ============================================================================

/// Canonical, engine-ready trigger
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Trigger {
    Simple {
        start_time: DateTime<Utc>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        end_time: Option<DateTime<Utc>>,
        repeat_count: i32,
        repeat_interval_seconds: i64,
        #[serde(serialize_with = "serialize_tz", deserialize_with = "deserialize_tz")]
        timezone: Tz,
    },
    Cron {
        expression: String,
        start_time: DateTime<Utc>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        end_time: Option<DateTime<Utc>>,
        #[serde(serialize_with = "serialize_tz", deserialize_with = "deserialize_tz")]
        timezone: Tz,
    },
}

impl Trigger {
    pub fn start_time(&self) -> DateTime<Utc> {
        match self {
            Trigger::Simple { start_time, .. } | Trigger::Cron { start_time, .. } => *start_time,
        }
    }

    pub fn end_time(&self) -> Option<DateTime<Utc>> {
        match self {
            Trigger::Simple { end_time, .. } | Trigger::Cron { end_time, .. } => *end_time,
        }
    }

    pub fn timezone(&self) -> Tz {
        match self {
            Trigger::Simple { timezone, .. } | Trigger::Cron { timezone, .. } => *timezone,
        }
    }

    /// Start time expressed in the trigger's own zone
    pub fn local_start(&self) -> DateTime<Tz> {
        self.start_time().with_timezone(&self.timezone())
    }
}

// ============================================================================
// Jobs
// ============================================================================

/// Engine-side state of a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    Normal,
    Paused,
    Blocked,
    Complete,
    Error,
    Unknown,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Complete | JobState::Error)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobState::Normal => "NORMAL",
            JobState::Paused => "PAUSED",
            JobState::Blocked => "BLOCKED",
            JobState::Complete => "COMPLETE",
            JobState::Error => "ERROR",
            JobState::Unknown => "UNKNOWN",
        };
        f.write_str(s)
    }
}

/// Engine status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SchedulerStatus {
    Running,
    Paused,
    Stopped,
}

impl fmt::Display for SchedulerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SchedulerStatus::Running => "RUNNING",
            SchedulerStatus::Paused => "PAUSED",
            SchedulerStatus::Stopped => "STOPPED",
        };
        f.write_str(s)
    }
}

/// What a job executes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum ActionReference {
    /// Named action class
    Class(String),
    /// Action id resolved from the input file type
    ActionId(String),
}

impl ActionReference {
    pub fn name(&self) -> &str {
        match self {
            ActionReference::Class(name) | ActionReference::ActionId(name) => name,
        }
    }
}

/// Where a file-backed job reads its input and writes its output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamProvider {
    pub input_file: String,
    pub output_path: String,
    pub auto_create_unique_filename: bool,
}

/// Engine-ready job definition, immutable once submitted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobDefinition {
    pub job_name: String,
    pub action: ActionReference,
    pub params: JobParams,
    pub trigger: Trigger,
    pub owner: String,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream_provider: Option<StreamProvider>,
}

/// A job as known to the scheduling engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub job_id: String,
    pub job_name: String,
    pub action: String,
    pub user_name: String,
    pub state: JobState,
    pub job_params: JobParams,
    pub trigger: Trigger,
    #[serde(default)]
    pub next_run: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_run: Option<DateTime<Utc>>,
}

impl Job {
    pub fn is_owned_by(&self, principal: &str) -> bool {
        self.user_name == principal
    }

    pub fn is_blockout(&self) -> bool {
        self.action == BLOCKOUT_ACTION
    }

    /// Length of each blocked interval, when this job is a usable blockout
    pub fn blockout_duration(&self) -> Option<Duration> {
        if !self.is_blockout() {
            return None;
        }
        self.job_params
            .get(param_keys::DURATION)
            .and_then(ParamValue::as_number)
            .filter(|secs| *secs > 0)
            .map(Duration::seconds)
    }
}

/// Predicate used when listing jobs from the engine
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobFilter {
    pub owner: Option<String>,
    pub action: Option<String>,
    pub exclude_blockouts: bool,
}

impl JobFilter {
    pub fn blockouts() -> Self {
        Self {
            action: Some(BLOCKOUT_ACTION.to_string()),
            ..Self::default()
        }
    }

    pub fn owned_by(mut self, owner: impl Into<String>) -> Self {
        self.owner = Some(owner.into());
        self
    }

    pub fn with_action(mut self, action: impl Into<String>) -> Self {
        self.action = Some(action.into());
        self
    }

    pub fn without_blockouts(mut self) -> Self {
        self.exclude_blockouts = true;
        self
    }

    pub fn accept(&self, job: &Job) -> bool {
        if let Some(owner) = &self.owner {
            if !job.is_owned_by(owner) {
                return false;
            }
        }
        if let Some(action) = &self.action {
            if &job.action != action {
                return false;
            }
        }
        !(self.exclude_blockouts && job.is_blockout())
    }
}

// ============================================================================
// Repository, sessions and block status
// ============================================================================

/// File stored in the content repository
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryFile {
    pub id: String,
    pub name: String,
    pub path: String,
    #[serde(default)]
    pub folder: bool,
}

/// Caller identity passed into every orchestrator call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub name: String,
    #[serde(default)]
    pub roles: Vec<String>,
}

impl Session {
    pub fn new(name: impl Into<String>, roles: &[&str]) -> Self {
        Self {
            name: name.into(),
            roles: roles.iter().map(|r| r.to_string()).collect(),
        }
    }
}

/// Three-way outcome of evaluating a trigger against the block calendar
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BlockVerdict {
    NotBlocked,
    PartiallyBlocked,
    FullyBlocked,
}

/// Block status reported for a candidate schedule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockStatus {
    pub totally_blocked: bool,
    pub partially_blocked: bool,
}

impl BlockStatus {
    pub fn verdict(&self) -> BlockVerdict {
        if self.totally_blocked {
            BlockVerdict::FullyBlocked
        } else if self.partially_blocked {
            BlockVerdict::PartiallyBlocked
        } else {
            BlockVerdict::NotBlocked
        }
    }
}
