// Configuration management with layered configuration (file, env)

use crate::auth::{ADMINISTER_ACTION, SCHEDULE_ACTION, WILDCARD_ACTION};
use chrono::Duration;
use chrono_tz::Tz;
use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;

/// Main settings structure containing all configuration options
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub scheduler: SchedulerConfig,
    pub policy: PolicyConfig,
    pub output: OutputConfig,
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Zone applied to requests that do not name one
    pub default_timezone: String,
    /// How far ahead candidate fire times are checked against blockouts
    pub blockout_lookahead_days: u32,
    /// Upper bound on fire times enumerated per trigger
    pub max_occurrences: usize,
}

impl SchedulerConfig {
    pub fn timezone(&self) -> Result<Tz, String> {
        Tz::from_str(&self.default_timezone)
            .map_err(|_| format!("Unknown default timezone: {}", self.default_timezone))
    }

    pub fn lookahead(&self) -> Duration {
        Duration::days(i64::from(self.blockout_lookahead_days))
    }
}

/// Role to policy action grants
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyConfig {
    #[serde(default)]
    pub roles: HashMap<String, Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Folder used for generated output; `{user}` expands to the caller name
    pub default_folder: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    pub log_level: String,
    pub metrics_port: Option<u16>,
}

impl Settings {
    /// Load configuration with layered precedence: defaults → file → env
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_path("config")
    }

    /// Load configuration from a specific path
    pub fn load_from_path<P: AsRef<Path>>(config_dir: P) -> Result<Self, ConfigError> {
        let config_dir = config_dir.as_ref();

        let builder = Config::builder()
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            // Add local configuration (not committed to git)
            .add_source(File::from(config_dir.join("local.toml")).required(false))
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            );

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Validate configuration settings
    pub fn validate(&self) -> Result<(), String> {
        self.scheduler.timezone()?;
        if self.scheduler.blockout_lookahead_days == 0 {
            return Err("Scheduler blockout_lookahead_days must be greater than 0".to_string());
        }
        if self.scheduler.max_occurrences == 0 {
            return Err("Scheduler max_occurrences must be greater than 0".to_string());
        }

        for (role, actions) in &self.policy.roles {
            if role.trim().is_empty() {
                return Err("Policy role names cannot be empty".to_string());
            }
            if actions.iter().any(|action| action.trim().is_empty()) {
                return Err(format!("Policy role '{}' grants an empty action", role));
            }
        }

        if self.output.default_folder.trim().is_empty() {
            return Err("Output default_folder cannot be empty".to_string());
        }

        if self.observability.metrics_port == Some(0) {
            return Err("Metrics port must be greater than 0".to_string());
        }

        Ok(())
    }
}

impl Default for Settings {
    fn default() -> Self {
        let roles = HashMap::from([
            ("Administrator".to_string(), vec![WILDCARD_ACTION.to_string()]),
            (
                "Power User".to_string(),
                vec![SCHEDULE_ACTION.to_string()],
            ),
            (
                "Security Officer".to_string(),
                vec![ADMINISTER_ACTION.to_string()],
            ),
        ]);

        Self {
            scheduler: SchedulerConfig {
                default_timezone: "Asia/Ho_Chi_Minh".to_string(),
                blockout_lookahead_days: 7,
                max_occurrences: 1000,
            },
            policy: PolicyConfig { roles },
            output: OutputConfig {
                default_folder: "/home/{user}".to_string(),
            },
            observability: ObservabilityConfig {
                log_level: "info".to_string(),
                metrics_port: None,
            },
        }
    }
}
