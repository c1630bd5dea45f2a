//! Runner configuration
//!
//! Loaded from a TOML file with a default for every tunable. Four
//! environment keys override the file (`MAX_CONCURRENCY`, `MAX_RETRIES`,
//! `RETRY_BASE_DELAY`, `MAX_RETRY`); `ATS_URL` fills in the queue endpoint
//! when the file leaves it out. Secrets are never stored in the file: the
//! config names the environment variable holding them.

use crate::population::{SubmitterConfig, DEFAULT_PAGE_SIZE};
use crate::queue::AtsClientConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Environment variable not found: {0}")]
    EnvVarNotFound(String),
    #[error("Invalid value for {key}: {value:?}")]
    InvalidEnv { key: String, value: String },
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Top-level runner configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RunnerConfig {
    #[serde(default)]
    pub queue: QueueSection,
    #[serde(default)]
    pub population: PopulationSection,
    #[serde(default)]
    pub processing: ProcessingSection,
    #[serde(default)]
    pub source: EndpointSection,
    #[serde(default)]
    pub processor: EndpointSection,
    #[serde(default)]
    pub environment: EnvironmentSection,
    #[serde(default)]
    pub notification: NotificationSection,
    #[serde(default)]
    pub finalize: EndpointSection,
}

/// Automation Server work queue
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct QueueSection {
    /// API base URL; falls back to `ATS_URL`
    pub url: Option<String>,
    /// Environment variable containing the bearer token
    pub token_env: String,
    pub workqueue_id: u64,
    pub workqueue_name: String,
    pub timeout_secs: u64,
}

impl Default for QueueSection {
    fn default() -> Self {
        Self {
            url: None,
            token_env: "ATS_TOKEN".to_string(),
            workqueue_id: 0,
            workqueue_name: "default".to_string(),
            timeout_secs: 60,
        }
    }
}

/// Bounded submitter tunables
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PopulationSection {
    pub max_concurrency: usize,
    pub max_retries: u32,
    /// Base backoff delay in seconds (fractional allowed)
    pub retry_base_delay_secs: f64,
    pub page_size: u32,
}

impl Default for PopulationSection {
    fn default() -> Self {
        Self {
            max_concurrency: 5,
            max_retries: 3,
            retry_base_delay_secs: 0.5,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

/// Processing loop tunables
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ProcessingSection {
    /// Process-health ceiling
    pub max_retry: u32,
    /// Per-item timeout; unset means no timeout
    pub item_timeout_secs: Option<u64>,
    pub notify_on_process_fault: bool,
}

impl Default for ProcessingSection {
    fn default() -> Self {
        Self {
            max_retry: 3,
            item_timeout_secs: None,
            notify_on_process_fault: true,
        }
    }
}

/// An HTTP collaborator; without a URL the collaborator is a no-op
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EndpointSection {
    pub url: Option<String>,
    pub timeout_secs: u64,
}

impl Default for EndpointSection {
    fn default() -> Self {
        Self {
            url: None,
            timeout_secs: 60,
        }
    }
}

impl EndpointSection {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Shell commands driving the processed resource; missing commands are no-ops
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EnvironmentSection {
    pub startup_command: Option<String>,
    pub soft_shutdown_command: Option<String>,
    pub hard_shutdown_command: Option<String>,
}

/// Operator notification over SMTP
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct NotificationSection {
    /// Process name used in notification subjects
    pub process_name: String,
    /// Without an SMTP host notifications are only logged
    pub smtp_host: Option<String>,
    pub smtp_port: u16,
    pub starttls: bool,
    pub sender: String,
    pub recipients: Vec<String>,
    pub username_env: Option<String>,
    pub password_env: Option<String>,
    /// Command writing a PNG screenshot to stdout
    pub screenshot_command: Option<String>,
}

impl Default for NotificationSection {
    fn default() -> Self {
        Self {
            process_name: "workqueue-runner".to_string(),
            smtp_host: None,
            smtp_port: 587,
            starttls: true,
            sender: "robot@localhost".to_string(),
            recipients: Vec::new(),
            username_env: None,
            password_env: None,
            screenshot_command: None,
        }
    }
}

impl RunnerConfig {
    /// Load configuration from a TOML file, apply environment overrides and validate
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let mut config: RunnerConfig = toml::from_str(&content)?;
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults plus environment overrides, for runs without a config file
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = RunnerConfig::default();
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        self.apply_env_overrides_from(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary lookup (the process environment in production)
    pub fn apply_env_overrides_from<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup("MAX_CONCURRENCY") {
            self.population.max_concurrency = parse_env("MAX_CONCURRENCY", &value)?;
        }
        if let Some(value) = lookup("MAX_RETRIES") {
            self.population.max_retries = parse_env("MAX_RETRIES", &value)?;
        }
        if let Some(value) = lookup("RETRY_BASE_DELAY") {
            self.population.retry_base_delay_secs = parse_env("RETRY_BASE_DELAY", &value)?;
        }
        if let Some(value) = lookup("MAX_RETRY") {
            self.processing.max_retry = parse_env("MAX_RETRY", &value)?;
        }
        if self.queue.url.is_none() {
            self.queue.url = lookup("ATS_URL").filter(|url| !url.trim().is_empty());
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.population.max_concurrency == 0 {
            return Err(ConfigError::InvalidConfig(
                "population.max_concurrency must be at least 1".to_string(),
            ));
        }
        if self.population.max_retries == 0 {
            return Err(ConfigError::InvalidConfig(
                "population.max_retries must be at least 1".to_string(),
            ));
        }
        if self.population.page_size == 0 {
            return Err(ConfigError::InvalidConfig(
                "population.page_size must be at least 1".to_string(),
            ));
        }
        if self.processing.max_retry == 0 {
            return Err(ConfigError::InvalidConfig(
                "processing.max_retry must be at least 1".to_string(),
            ));
        }
        self.retry_base_delay()?;
        if self.processing.item_timeout_secs == Some(0) {
            return Err(ConfigError::InvalidConfig(
                "processing.item_timeout_secs must be positive when set".to_string(),
            ));
        }
        Ok(())
    }

    pub fn retry_base_delay(&self) -> Result<Duration, ConfigError> {
        Duration::try_from_secs_f64(self.population.retry_base_delay_secs).map_err(|_| {
            ConfigError::InvalidConfig(format!(
                "population.retry_base_delay_secs must be a non-negative number, got {}",
                self.population.retry_base_delay_secs
            ))
        })
    }

    pub fn submitter(&self) -> Result<SubmitterConfig, ConfigError> {
        Ok(SubmitterConfig {
            concurrency_limit: self.population.max_concurrency,
            max_retries: self.population.max_retries,
            base_delay: self.retry_base_delay()?,
        })
    }

    pub fn item_timeout(&self) -> Option<Duration> {
        self.processing.item_timeout_secs.map(Duration::from_secs)
    }

    /// Get the queue bearer token from the environment variable named by `token_env`
    pub fn get_queue_token(&self) -> Result<String, ConfigError> {
        get_env_var_required(&self.queue.token_env)
    }

    /// Connection settings for the Automation Server queue
    pub fn ats_client(&self) -> Result<AtsClientConfig, ConfigError> {
        let base_url = self.queue.url.clone().ok_or_else(|| {
            ConfigError::InvalidConfig("queue.url is not set and ATS_URL is missing".to_string())
        })?;

        Ok(AtsClientConfig {
            base_url,
            token: self.get_queue_token()?,
            workqueue_id: self.queue.workqueue_id,
            workqueue_name: self.queue.workqueue_name.clone(),
            timeout: Duration::from_secs(self.queue.timeout_secs),
        })
    }

    /// SMTP username from the configured environment variable
    pub fn get_smtp_username(&self) -> Option<String> {
        get_env_var_optional(self.notification.username_env.as_deref())
    }

    /// SMTP password from the configured environment variable
    pub fn get_smtp_password(&self) -> Option<String> {
        get_env_var_optional(self.notification.password_env.as_deref())
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidEnv {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn get_env_var_optional(name: Option<&str>) -> Option<String> {
    name.and_then(|name| std::env::var(name).ok())
}

fn get_env_var_required(name: &str) -> Result<String, ConfigError> {
    std::env::var(name).map_err(|_| ConfigError::EnvVarNotFound(name.to_string()))
}
