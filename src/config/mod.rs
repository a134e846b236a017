//! Configuration management for legis-sync
//!
//! This module handles loading, parsing, and validating application configuration
//! from YAML files and environment variables.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::models::{ResourceType, SyncStrategy};

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Config {
    /// Upstream Congress.gov API configuration
    #[serde(default)]
    pub upstream: UpstreamConfig,

    /// Outbound rate limiting and throttle thresholds
    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    /// Retry configuration for upstream calls
    #[serde(default)]
    pub retry: RetryConfig,

    /// Bounded parallel executor configuration
    #[serde(default)]
    pub executor: ExecutorConfig,

    /// Per-strategy page sizes and windows
    #[serde(default)]
    pub strategies: StrategyConfig,

    /// Job ledger defaults
    #[serde(default)]
    pub queue: QueueConfig,

    /// Error alerting thresholds
    #[serde(default)]
    pub alerts: AlertConfig,

    /// Interval scheduler configuration
    #[serde(default)]
    pub scheduler: SchedulerSettings,

    /// Database configuration
    #[serde(default)]
    pub database: DatabaseConfig,

    /// OpenTelemetry configuration
    #[serde(default)]
    pub otel: OtelConfig,

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
        let config: Config = serde_yaml::from_str(&expanded)
            .map_err(|e| ConfigError::Parse(format!("Failed to parse YAML: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from environment variables with prefix LEGIS_SYNC_
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Config::default();

        if let Ok(url) = std::env::var("LEGIS_SYNC_UPSTREAM_BASE_URL") {
            config.upstream.base_url = url;
        }
        if let Ok(key) = std::env::var("LEGIS_SYNC_API_KEY") {
            config.upstream.api_key = Some(key);
        }
        if let Ok(path) = std::env::var("LEGIS_SYNC_DATABASE_PATH") {
            config.database.path = path;
        }
        if let Ok(level) = std::env::var("LEGIS_SYNC_LOG_LEVEL") {
            config.logging.level = level;
        }
        if let Ok(concurrency) = std::env::var("LEGIS_SYNC_EXECUTOR_CONCURRENCY") {
            config.executor.concurrency = concurrency
                .parse()
                .map_err(|_| ConfigError::Parse("Invalid executor concurrency".to_string()))?;
        }
        if let Ok(enabled) = std::env::var("LEGIS_SYNC_OTEL_ENABLED") {
            config.otel.enabled = enabled.parse().unwrap_or(false);
        }
        if let Ok(endpoint) = std::env::var("LEGIS_SYNC_OTEL_ENDPOINT") {
            config.otel.endpoint = Some(endpoint);
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject values the engine cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::InvalidValue(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.retry.backoff_multiplier < 1.0 {
            return Err(ConfigError::InvalidValue(
                "retry.backoff_multiplier must be >= 1.0".to_string(),
            ));
        }
        if self.executor.concurrency == 0 {
            return Err(ConfigError::InvalidValue(
                "executor.concurrency must be at least 1".to_string(),
            ));
        }
        if self.rate_limit.max_concurrent == 0 {
            return Err(ConfigError::InvalidValue(
                "rate_limit.max_concurrent must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Upstream API configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UpstreamConfig {
    /// Base URL of the Congress.gov API
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// API key attached to every request
    pub api_key: Option<String>,

    /// Response format requested from the API
    #[serde(default = "default_format")]
    pub format: String,

    /// Per-request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Published hourly request ceiling, used when no quota headers are seen
    #[serde(default = "default_hourly_ceiling")]
    pub hourly_request_ceiling: u32,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key: None,
            format: default_format(),
            request_timeout_secs: default_request_timeout(),
            hourly_request_ceiling: default_hourly_ceiling(),
        }
    }
}

fn default_base_url() -> String {
    "https://api.congress.gov/v3".to_string()
}

fn default_format() -> String {
    "json".to_string()
}

fn default_request_timeout() -> u64 {
    30
}

fn default_hourly_ceiling() -> u32 {
    5000
}

/// Retry configuration for upstream calls
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetryConfig {
    /// Total attempts, including the first one
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before the second attempt in milliseconds
    #[serde(default = "default_initial_delay")]
    pub initial_delay_ms: u64,

    /// Upper bound of the exponential component in milliseconds
    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,

    /// Backoff multiplier
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Upper bound of the random jitter added to each delay in milliseconds
    #[serde(default = "default_jitter")]
    pub jitter_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay(),
            max_delay_ms: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter_ms: default_jitter(),
        }
    }
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_delay() -> u64 {
    1000
}

fn default_max_delay() -> u64 {
    60_000
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_jitter() -> u64 {
    1000
}

/// Rate limiting configuration for the upstream client
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RateLimitConfig {
    /// Minimum interval between requests in milliseconds
    #[serde(default = "default_min_interval")]
    pub min_interval_ms: u64,

    /// Maximum number of concurrent requests
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,

    /// Wait time when rate limited without a Retry-After header (in seconds)
    #[serde(default = "default_rate_limit_wait")]
    pub rate_limit_wait_secs: u64,

    /// Throttle wait at critical usage (milliseconds)
    #[serde(default = "default_critical_wait")]
    pub critical_wait_ms: u64,

    /// Throttle wait at warning usage (milliseconds)
    #[serde(default = "default_warning_wait")]
    pub warning_wait_ms: u64,

    /// Longest single wait recommended while a hard limit is in force (seconds)
    #[serde(default = "default_max_throttle_wait")]
    pub max_throttle_wait_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            min_interval_ms: default_min_interval(),
            max_concurrent: default_max_concurrent(),
            rate_limit_wait_secs: default_rate_limit_wait(),
            critical_wait_ms: default_critical_wait(),
            warning_wait_ms: default_warning_wait(),
            max_throttle_wait_secs: default_max_throttle_wait(),
        }
    }
}

fn default_min_interval() -> u64 {
    100
}

fn default_max_concurrent() -> usize {
    2
}

fn default_rate_limit_wait() -> u64 {
    60
}

fn default_critical_wait() -> u64 {
    5000
}

fn default_warning_wait() -> u64 {
    2000
}

fn default_max_throttle_wait() -> u64 {
    60
}

/// Bounded parallel executor configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExecutorConfig {
    /// Maximum operations in flight
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Minimum gap between two operation starts (milliseconds)
    #[serde(default)]
    pub start_delay_ms: u64,

    /// Queue-level retries per operation (0 = no retry)
    #[serde(default)]
    pub max_retries: u32,

    /// Fixed delay between queue-level retries (milliseconds)
    #[serde(default = "default_retry_delay")]
    pub retry_delay_ms: u64,

    /// Items per chunk for the chunked variant
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Pause between chunks (milliseconds)
    #[serde(default = "default_chunk_pause")]
    pub chunk_pause_ms: u64,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            start_delay_ms: 0,
            max_retries: 0,
            retry_delay_ms: default_retry_delay(),
            chunk_size: default_chunk_size(),
            chunk_pause_ms: default_chunk_pause(),
        }
    }
}

fn default_concurrency() -> usize {
    5
}

fn default_retry_delay() -> u64 {
    1000
}

fn default_chunk_size() -> usize {
    50
}

fn default_chunk_pause() -> u64 {
    500
}

/// Page sizes and time windows used by each sync strategy
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StrategyConfig {
    /// Page size for incremental runs
    #[serde(default = "default_incremental_page_size")]
    pub incremental_page_size: u32,

    /// How far back incremental runs look (hours)
    #[serde(default = "default_incremental_lookback")]
    pub incremental_lookback_hours: i64,

    /// Page size for stale catch-up runs
    #[serde(default = "default_stale_page_size")]
    pub stale_page_size: u32,

    /// Freshness window for stale detection (hours)
    #[serde(default = "default_stale_window")]
    pub stale_window_hours: i64,

    /// Page size for priority runs
    #[serde(default = "default_large_page_size")]
    pub priority_page_size: u32,

    /// Page size for full runs
    #[serde(default = "default_large_page_size")]
    pub full_page_size: u32,

    /// Page cap for full runs
    #[serde(default = "default_full_max_pages")]
    pub full_max_pages: u32,

    /// Congress used when a full run does not name one
    #[serde(default = "default_congress")]
    pub default_congress: u32,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            incremental_page_size: default_incremental_page_size(),
            incremental_lookback_hours: default_incremental_lookback(),
            stale_page_size: default_stale_page_size(),
            stale_window_hours: default_stale_window(),
            priority_page_size: default_large_page_size(),
            full_page_size: default_large_page_size(),
            full_max_pages: default_full_max_pages(),
            default_congress: default_congress(),
        }
    }
}

fn default_incremental_page_size() -> u32 {
    20
}

fn default_incremental_lookback() -> i64 {
    24
}

fn default_stale_page_size() -> u32 {
    100
}

fn default_stale_window() -> i64 {
    48
}

fn default_large_page_size() -> u32 {
    250
}

fn default_full_max_pages() -> u32 {
    40
}

fn default_congress() -> u32 {
    118
}

/// Job ledger defaults
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueueConfig {
    /// Attempts allowed per job when the caller does not say
    #[serde(default = "default_max_attempts")]
    pub default_max_attempts: u32,

    /// Priority assigned when the caller does not say
    #[serde(default)]
    pub default_priority: i32,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            default_max_attempts: default_max_attempts(),
            default_priority: 0,
        }
    }
}

/// Error alerting configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AlertConfig {
    /// Errors per trailing hour above which an alert is raised
    #[serde(default = "default_error_threshold")]
    pub error_threshold_per_hour: usize,

    /// Number of classified errors kept in memory
    #[serde(default = "default_recent_capacity")]
    pub recent_error_capacity: usize,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            error_threshold_per_hour: default_error_threshold(),
            recent_error_capacity: default_recent_capacity(),
        }
    }
}

fn default_error_threshold() -> usize {
    10
}

fn default_recent_capacity() -> usize {
    200
}

/// One recurring scheduler entry
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScheduledSync {
    /// Strategy to run
    pub strategy: SyncStrategy,

    /// Resources to include (empty = all)
    #[serde(default)]
    pub resources: Vec<ResourceType>,

    /// Interval between runs in seconds
    pub interval_secs: u64,

    /// Enqueue instead of running inline
    #[serde(default)]
    pub async_mode: bool,
}

/// Interval scheduler configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SchedulerSettings {
    /// Whether the scheduler runs in `serve` mode
    #[serde(default = "default_scheduler_enabled")]
    pub enabled: bool,

    /// Initial delay before first sync (seconds)
    #[serde(default = "default_initial_delay_secs")]
    pub initial_delay_secs: u64,

    /// Jitter range (seconds)
    #[serde(default = "default_jitter_secs")]
    pub jitter_secs: u64,

    /// Runs longer than this log an overrun warning (seconds)
    #[serde(default = "default_sync_timeout")]
    pub sync_timeout_secs: u64,

    /// Recurring sync entries
    #[serde(default = "default_scheduled_syncs")]
    pub jobs: Vec<ScheduledSync>,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            enabled: default_scheduler_enabled(),
            initial_delay_secs: default_initial_delay_secs(),
            jitter_secs: default_jitter_secs(),
            sync_timeout_secs: default_sync_timeout(),
            jobs: default_scheduled_syncs(),
        }
    }
}

fn default_scheduler_enabled() -> bool {
    true
}

fn default_initial_delay_secs() -> u64 {
    5
}

fn default_jitter_secs() -> u64 {
    30
}

fn default_sync_timeout() -> u64 {
    900
}

fn default_scheduled_syncs() -> Vec<ScheduledSync> {
    vec![
        ScheduledSync {
            strategy: SyncStrategy::Incremental,
            resources: Vec::new(),
            interval_secs: 900,
            async_mode: false,
        },
        ScheduledSync {
            strategy: SyncStrategy::Stale,
            resources: Vec::new(),
            interval_secs: 6 * 3600,
            async_mode: false,
        },
    ]
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DatabaseConfig {
    /// Path to SQLite database file
    #[serde(default = "default_database_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
        }
    }
}

fn default_database_path() -> String {
    "data/legis-sync.db".to_string()
}

/// OpenTelemetry configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OtelConfig {
    /// Whether OpenTelemetry is enabled
    #[serde(default)]
    pub enabled: bool,

    /// OTLP endpoint URL
    pub endpoint: Option<String>,

    /// Service name for tracing
    #[serde(default = "default_service_name")]
    pub service_name: String,
}

impl Default for OtelConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: None,
            service_name: default_service_name(),
        }
    }
}

fn default_service_name() -> String {
    "legis-sync".to_string()
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
