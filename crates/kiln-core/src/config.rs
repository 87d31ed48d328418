//! Worker configuration.
//!
//! Configuration precedence:
//! 1. CLI arguments (applied by the binary)
//! 2. Environment variables
//! 3. Config file (`--config`, or `./kiln.toml` when present)
//! 4. Defaults

use kiln_training::DEFAULT_VALIDATION_SPLIT;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_CONFIG_FILE: &str = "kiln.toml";

/// When a delivery is acknowledged to the broker.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AckMode {
    /// The broker considers a message consumed on delivery. A crash
    /// mid-job loses the message.
    #[default]
    Auto,
    /// Ack explicitly once the job's terminal reply has been sent.
    AfterReply,
}

impl FromStr for AckMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "after_reply" | "after-reply" => Ok(Self::AfterReply),
            other => Err(ConfigError::InvalidValue(format!("ack_mode `{other}` (expected auto or after_reply)"))),
        }
    }
}

/// Errors that can occur during configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Configuration file not found.
    #[error("Configuration file not found: {0}")]
    NotFound(String),

    /// Failed to read configuration file.
    #[error("Failed to read configuration file: {0}")]
    ReadError(String),

    /// Failed to parse configuration file.
    #[error("Failed to parse configuration file: {0}")]
    ParseError(String),

    /// A required setting has no value.
    #[error("Missing configuration value: {0}")]
    Missing(&'static str),

    /// Invalid configuration value.
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

/// Result type for configuration operations.
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Broker host, optionally with credentials and port (`user:pass@host:5672`),
    /// or a full `amqp://` URI.
    #[serde(default = "default_amqp_host")]
    pub amqp_host: String,

    /// Broker virtual host.
    #[serde(default = "default_vhost")]
    pub vhost: String,

    /// Queue the worker consumes from.
    #[serde(default = "default_queue")]
    pub queue: String,

    /// Model conversion service host (`CONVERT_SERVER`). A bare host gets `http://`.
    #[serde(default)]
    pub convert_url: String,

    /// Status API host (`API_SERVER`). A bare host gets `https://`.
    #[serde(default)]
    pub api_url: String,

    /// Root for job-scoped scratch directories.
    #[serde(default = "default_work_dir")]
    pub work_dir: PathBuf,

    /// Per-request HTTP timeout.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    #[serde(default)]
    pub ack_mode: AckMode,

    /// Fraction of tabular training rows held out for validation.
    #[serde(default = "default_validation_split")]
    pub validation_split: f64,
}

fn default_amqp_host() -> String {
    "localhost".to_string()
}

fn default_vhost() -> String {
    "/".to_string()
}

fn default_queue() -> String {
    "train".to_string()
}

fn default_work_dir() -> PathBuf {
    PathBuf::from("work")
}

fn default_request_timeout_secs() -> u64 {
    300
}

fn default_validation_split() -> f64 {
    DEFAULT_VALIDATION_SPLIT
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            amqp_host: default_amqp_host(),
            vhost: default_vhost(),
            queue: default_queue(),
            convert_url: String::new(),
            api_url: String::new(),
            work_dir: default_work_dir(),
            request_timeout_secs: default_request_timeout_secs(),
            ack_mode: AckMode::Auto,
            validation_split: default_validation_split(),
        }
    }
}

impl WorkerConfig {
    /// Load configuration from a TOML file.
    pub fn load_from_file(path: &Path) -> ConfigResult<Self> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.display().to_string()));
        }

        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadError(format!("{}: {}", path.display(), e)))?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError(format!("{}: {}", path.display(), e)))
    }

    /// Load file + process environment. An explicit `path` must exist; without
    /// one, `./kiln.toml` is used when present.
    pub fn load(path: Option<&Path>) -> ConfigResult<Self> {
        let mut config = match path {
            Some(path) => Self::load_from_file(path)?,
            None => {
                let default_path = Path::new(DEFAULT_CONFIG_FILE);
                if default_path.exists() { Self::load_from_file(default_path)? } else { Self::default() }
            }
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Override fields from environment variables, read through `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F) -> ConfigResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("CONVERT_SERVER") {
            self.convert_url = v;
        }
        if let Some(v) = get("API_SERVER") {
            self.api_url = v;
        }
        if let Some(v) = get("VHOST") {
            self.vhost = v;
        }
        if let Some(v) = get("KILN_AMQP_HOST") {
            self.amqp_host = v;
        }
        if let Some(v) = get("KILN_QUEUE") {
            self.queue = v;
        }
        if let Some(v) = get("KILN_WORK_DIR") {
            self.work_dir = PathBuf::from(v);
        }
        if let Some(v) = get("KILN_ACK_MODE") {
            self.ack_mode = v.parse()?;
        }
        if let Some(v) = get("KILN_REQUEST_TIMEOUT_SECS") {
            self.request_timeout_secs =
                v.parse().map_err(|_| ConfigError::InvalidValue(format!("KILN_REQUEST_TIMEOUT_SECS `{v}`")))?;
        }
        Ok(())
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.convert_url.trim().is_empty() {
            return Err(ConfigError::Missing("convert_url (CONVERT_SERVER)"));
        }
        if self.api_url.trim().is_empty() {
            return Err(ConfigError::Missing("api_url (API_SERVER)"));
        }
        if self.amqp_host.trim().is_empty() {
            return Err(ConfigError::Missing("amqp_host"));
        }
        if self.queue.trim().is_empty() {
            return Err(ConfigError::Missing("queue"));
        }
        if self.request_timeout_secs == 0 {
            return Err(ConfigError::InvalidValue("request_timeout_secs must be >= 1".to_string()));
        }
        if !(self.validation_split > 0.0 && self.validation_split < 1.0) {
            return Err(ConfigError::InvalidValue(format!(
                "validation_split must be in (0, 1), got {}",
                self.validation_split
            )));
        }
        Ok(())
    }

    #[must_use]
    pub fn convert_base_url(&self) -> String {
        with_scheme(&self.convert_url, "http")
    }

    #[must_use]
    pub fn api_base_url(&self) -> String {
        with_scheme(&self.api_url, "https")
    }

    /// AMQP URI including the percent-encoded virtual host.
    #[must_use]
    pub fn amqp_uri(&self) -> String {
        let host = self.amqp_host.trim().trim_end_matches('/');
        let base = if host.starts_with("amqp://") || host.starts_with("amqps://") {
            host.to_string()
        } else {
            format!("amqp://{host}")
        };
        format!("{base}/{}", urlencoding::encode(&self.vhost))
    }

    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// HTTP client shared by every outbound call.
    pub fn http_client(&self) -> reqwest::Result<reqwest::Client> {
        reqwest::Client::builder().timeout(self.request_timeout()).build()
    }
}

fn with_scheme(host: &str, scheme: &str) -> String {
    let host = host.trim().trim_end_matches('/');
    if host.contains("://") { host.to_string() } else { format!("{scheme}://{host}") }
}
