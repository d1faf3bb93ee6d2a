//! Configuration management for resource-scanner
//!
//! This module handles loading, parsing, and validating scanner configuration
//! from YAML files and environment variables.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::time::Duration;

use crate::dispatch::Pagination;

/// Main scanner configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Config {
    /// Upstream API client configuration
    #[serde(default)]
    pub client: ClientConfig,

    /// Client-side sliding-window rate limit
    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    /// Retry configuration
    #[serde(default)]
    pub retry: RetryConfig,

    /// Scan configuration
    #[serde(default)]
    pub scan: ScanConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::FileRead(format!("Failed to read config file: {}", e)))?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from a YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let expanded = expand_env_vars(yaml);
        serde_yaml::from_str(&expanded)
            .map_err(|e| ConfigError::Parse(format!("Failed to parse YAML: {}", e)))
    }

    /// Load configuration from environment variables with prefix RESOURCE_SCANNER_
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Config::default();

        if let Ok(base_url) = std::env::var("RESOURCE_SCANNER_BASE_URL") {
            config.client.base_url = base_url;
        }
        if let Ok(api_key) = std::env::var("RESOURCE_SCANNER_API_KEY") {
            config.client.api_key = Some(api_key);
        }
        if let Ok(timeout) = std::env::var("RESOURCE_SCANNER_REQUEST_TIMEOUT_MS") {
            config.client.request_timeout_ms = parse_env("REQUEST_TIMEOUT_MS", &timeout)?;
        }

        if let Ok(quota) = std::env::var("RESOURCE_SCANNER_QUOTA") {
            config.rate_limit.quota = parse_env("QUOTA", &quota)?;
        }
        if let Ok(window) = std::env::var("RESOURCE_SCANNER_WINDOW_MS") {
            config.rate_limit.window_ms = parse_env("WINDOW_MS", &window)?;
        }

        if let Ok(attempts) = std::env::var("RESOURCE_SCANNER_MAX_ATTEMPTS") {
            config.retry.max_attempts = parse_env("MAX_ATTEMPTS", &attempts)?;
        }
        if let Ok(base) = std::env::var("RESOURCE_SCANNER_BASE_DELAY_MS") {
            config.retry.base_delay_ms = parse_env("BASE_DELAY_MS", &base)?;
        }
        if let Ok(max) = std::env::var("RESOURCE_SCANNER_MAX_DELAY_MS") {
            config.retry.max_delay_ms = parse_env("MAX_DELAY_MS", &max)?;
        }
        if let Ok(total) = std::env::var("RESOURCE_SCANNER_MAX_TOTAL_DELAY_MS") {
            config.retry.max_total_delay_ms = Some(parse_env("MAX_TOTAL_DELAY_MS", &total)?);
        }
        if let Ok(hint) = std::env::var("RESOURCE_SCANNER_MAX_RETRY_AFTER_MS") {
            config.retry.max_retry_after_ms = parse_env("MAX_RETRY_AFTER_MS", &hint)?;
        }
        if let Ok(jitter) = std::env::var("RESOURCE_SCANNER_JITTER") {
            config.retry.jitter = parse_env("JITTER", &jitter)?;
        }

        if let Ok(fan_out) = std::env::var("RESOURCE_SCANNER_FAN_OUT") {
            config.scan.fan_out = parse_env("FAN_OUT", &fan_out)?;
        }
        if let Ok(page_size) = std::env::var("RESOURCE_SCANNER_PAGE_SIZE") {
            config.scan.page_size = parse_env("PAGE_SIZE", &page_size)?;
        }

        if let Ok(level) = std::env::var("RESOURCE_SCANNER_LOG_LEVEL") {
            config.logging.level = level;
        }

        Ok(config)
    }

    /// Check every option that would otherwise fail at first use
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.client.base_url.trim().is_empty() {
            return Err(ConfigError::MissingRequired("client.base_url".to_string()));
        }
        if self.client.request_timeout_ms == 0 {
            return Err(ConfigError::InvalidValue(
                "client.request_timeout_ms must be greater than 0".to_string(),
            ));
        }

        self.rate_limit.validate()?;
        self.retry.validate()?;

        if self.scan.fan_out == 0 {
            return Err(ConfigError::InvalidValue(
                "scan.fan_out must be greater than 0".to_string(),
            ));
        }
        if self.scan.page_size == 0 {
            return Err(ConfigError::InvalidValue(
                "scan.page_size must be greater than 0".to_string(),
            ));
        }

        let mut names = HashSet::new();
        for descriptor in &self.scan.descriptors {
            if descriptor.name.trim().is_empty() {
                return Err(ConfigError::MissingRequired(
                    "scan.descriptors[].name".to_string(),
                ));
            }
            if !names.insert(descriptor.name.as_str()) {
                return Err(ConfigError::InvalidValue(format!(
                    "duplicate descriptor name: {}",
                    descriptor.name
                )));
            }
            descriptor.pagination.validate().map_err(|e| match e {
                ConfigError::InvalidValue(msg) => ConfigError::InvalidValue(format!(
                    "scan.descriptors[{}].pagination: {}",
                    descriptor.name, msg
                )),
                other => other,
            })?;
        }

        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(name: &str, value: &str) -> Result<T, ConfigError> {
    value
        .parse()
        .map_err(|_| ConfigError::Parse(format!("Invalid value for RESOURCE_SCANNER_{}", name)))
}

/// Upstream API client configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClientConfig {
    /// Base URL of the resource API
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Value sent in the `api-key` header
    #[serde(default)]
    pub api_key: Option<String>,

    /// Per-exchange timeout in milliseconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_ms: u64,
}

impl ClientConfig {
    /// Per-exchange timeout
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key: None,
            request_timeout_ms: default_request_timeout(),
        }
    }
}

fn default_base_url() -> String {
    "http://localhost:8000".to_string()
}

fn default_request_timeout() -> u64 {
    10_000
}

/// Sliding-window rate limit configuration
///
/// At most `quota` requests are admitted in any trailing `window_ms`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RateLimitConfig {
    /// Maximum requests per window
    #[serde(default = "default_quota")]
    pub quota: u32,

    /// Window length in milliseconds
    #[serde(default = "default_window")]
    pub window_ms: u64,
}

impl RateLimitConfig {
    /// Window length
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }

    /// Reject a quota or window of zero
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.quota == 0 {
            return Err(ConfigError::InvalidValue(
                "rate_limit.quota must be greater than 0".to_string(),
            ));
        }
        if self.window_ms == 0 {
            return Err(ConfigError::InvalidValue(
                "rate_limit.window_ms must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            quota: default_quota(),
            window_ms: default_window(),
        }
    }
}

fn default_quota() -> u32 {
    10
}

fn default_window() -> u64 {
    60_000
}

/// Retry configuration for upstream calls
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first one
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Backoff for the first retry in milliseconds
    #[serde(default = "default_base_delay")]
    pub base_delay_ms: u64,

    /// Backoff cap in milliseconds
    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,

    /// Upper bound on the cumulative backoff of one call
    #[serde(default)]
    pub max_total_delay_ms: Option<u64>,

    /// Longest server Retry-After hint that is waited out; a longer hint ends the call
    #[serde(default = "default_max_retry_after")]
    pub max_retry_after_ms: u64,

    /// Whether to add jitter to backoff
    #[serde(default)]
    pub jitter: bool,
}

impl RetryConfig {
    /// Reject settings that would make the policy meaningless
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_attempts == 0 {
            return Err(ConfigError::InvalidValue(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.base_delay_ms > self.max_delay_ms {
            return Err(ConfigError::InvalidValue(format!(
                "retry.base_delay_ms ({}) exceeds retry.max_delay_ms ({})",
                self.base_delay_ms, self.max_delay_ms
            )));
        }
        Ok(())
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay(),
            max_delay_ms: default_max_delay(),
            max_total_delay_ms: None,
            max_retry_after_ms: default_max_retry_after(),
            jitter: false,
        }
    }
}

fn default_max_attempts() -> u32 {
    5
}

fn default_base_delay() -> u64 {
    2_000
}

fn default_max_delay() -> u64 {
    10_000
}

fn default_max_retry_after() -> u64 {
    60_000
}

/// Scan configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScanConfig {
    /// Maximum number of descriptors scanned concurrently
    #[serde(default = "default_fan_out")]
    pub fan_out: usize,

    /// Page size requested from the API
    #[serde(default = "default_page_size")]
    pub page_size: u32,

    /// Resource collections to scan; empty means the default `/resources` collection
    #[serde(default)]
    pub descriptors: Vec<DescriptorConfig>,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            fan_out: default_fan_out(),
            page_size: default_page_size(),
            descriptors: Vec::new(),
        }
    }
}

fn default_fan_out() -> usize {
    3
}

fn default_page_size() -> u32 {
    10
}

/// One resource collection to scan
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DescriptorConfig {
    /// Unique descriptor name
    pub name: String,

    /// Collection path, e.g. `/resources`
    pub path: String,

    /// Extra query parameters sent with every page request
    #[serde(default)]
    pub query: BTreeMap<String, String>,

    /// Pagination scheme of the collection
    #[serde(default)]
    pub pagination: Pagination,

    /// Item field holding the resource identifier
    #[serde(default = "default_id_field")]
    pub id_field: String,
}

fn default_id_field() -> String {
    "id".to_string()
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format (`json` or `pretty`)
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

/// Configuration error types
#[derive(Debug, thiserror::Error, Clone, PartialEq)]
pub enum ConfigError {
    /// Error reading configuration file
    #[error("Failed to read configuration file: {0}")]
    FileRead(String),

    /// Error parsing configuration
    #[error("Failed to parse configuration: {0}")]
    Parse(String),

    /// Invalid configuration value
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),

    /// Missing required configuration
    #[error("Missing required configuration: {0}")]
    MissingRequired(String),
}

/// Expand environment variables in a string
///
/// Supports `${VAR_NAME}` syntax
fn expand_env_vars(input: &str) -> String {
    let re = regex_lite::Regex::new(r"\$\{([^}]+)\}")
        .expect("Invalid regex pattern for environment variable expansion");

    re.replace_all(input, |caps: &regex_lite::Captures| {
        let var_name = &caps[1];
        std::env::var(var_name).unwrap_or_else(|_| caps[0].to_string())
    })
    .into_owned()
}
