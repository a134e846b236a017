//! Synchronization infrastructure
//!
//! Leaf components shared by the resource sync services and the orchestrator:
//!
//! - [`rate_monitor`]: sliding request window and remote quota tracking
//! - [`http_client`]: rate-limited HTTP client for upstream calls
//! - [`executor`]: bounded parallel executor
//! - [`classifier`]: error classification decision table
//! - [`retry`]: classified retry executor with metrics and alerting
//! - [`scheduler`]: interval scheduler that triggers strategy runs
//!
//! # Example
//!
//! ```ignore
//! use legis_sync::sync::{ErrorHandler, HttpClientWithRateLimit};
//! use legis_sync::config::{AlertConfig, RateLimitConfig, RetryConfig};
//!
//! let handler = ErrorHandler::new(RetryConfig::default(), AlertConfig::default());
//! let client = HttpClientWithRateLimit::new(RateLimitConfig::default(), Duration::from_secs(30))?;
//!
//! let body = handler
//!     .with_retry("bill list", || client.get("https://api.congress.gov/v3/bill"))
//!     .await?;
//! ```

pub mod classifier;
pub mod executor;
pub mod http_client;
pub mod rate_monitor;
pub mod retry;
pub mod scheduler;

pub use classifier::{classify, Classification};
pub use executor::{ExecutionFailure, ExecutionReport, ParallelExecutor};
pub use http_client::{HttpClientWithRateLimit, HttpResponse};
pub use rate_monitor::{QuotaSnapshot, RateLimitMonitor, RateLimitStats, ThrottleDecision, WarningLevel};
pub use retry::{ErrorHandler, ErrorMetrics, ErrorStats};
pub use scheduler::{
    ManualTriggerHandle, ScheduledTask, SchedulerConfig, StrategyTask, SyncScheduler, TaskStatus,
    TriggerOutcome,
};
