//! Error classification models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Retry taxonomy assigned by the classifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ErrorType {
    /// Upstream overload, retry with backoff
    Retryable,
    /// Network-level hiccup, retry quickly
    Transient,
    /// Bad input or permanent rejection
    Fatal,
    /// Credential or permission failure
    Configuration,
    /// Nothing matched
    Unknown,
}

impl std::fmt::Display for ErrorType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorType::Retryable => write!(f, "RETRYABLE"),
            ErrorType::Transient => write!(f, "TRANSIENT"),
            ErrorType::Fatal => write!(f, "FATAL"),
            ErrorType::Configuration => write!(f, "CONFIGURATION"),
            ErrorType::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

impl std::str::FromStr for ErrorType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "RETRYABLE" => Ok(ErrorType::Retryable),
            "TRANSIENT" => Ok(ErrorType::Transient),
            "FATAL" => Ok(ErrorType::Fatal),
            "CONFIGURATION" => Ok(ErrorType::Configuration),
            "UNKNOWN" => Ok(ErrorType::Unknown),
            _ => Err(format!("Invalid error type: {}", s)),
        }
    }
}

/// Severity level of a classified error
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl std::fmt::Display for ErrorSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorSeverity::Low => write!(f, "low"),
            ErrorSeverity::Medium => write!(f, "medium"),
            ErrorSeverity::High => write!(f, "high"),
            ErrorSeverity::Critical => write!(f, "critical"),
        }
    }
}

impl std::str::FromStr for ErrorSeverity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "low" => Ok(ErrorSeverity::Low),
            "medium" => Ok(ErrorSeverity::Medium),
            "high" => Ok(ErrorSeverity::High),
            "critical" => Ok(ErrorSeverity::Critical),
            _ => Err(format!("Invalid error severity: {}", s)),
        }
    }
}

/// A caught error with its retry policy attached
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifiedError {
    pub error_type: ErrorType,

    pub severity: ErrorSeverity,

    /// Operator-facing description of the class
    pub message: String,

    pub should_retry: bool,

    /// Suggested minimum delay before the next attempt
    pub retry_after_ms: Option<u64>,

    /// Rendered originating error
    pub original: String,

    pub context: BTreeMap<String, String>,

    pub occurred_at: DateTime<Utc>,
}

impl ClassifiedError {
    /// Attach a context entry
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }
}

/// Durable error log row, written for critical classifications
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorLogEntry {
    pub id: Option<i64>,
    pub error_type: ErrorType,
    pub severity: ErrorSeverity,
    pub message: String,
    pub original: String,
    pub context: BTreeMap<String, String>,
    pub occurred_at: DateTime<Utc>,
}

impl From<&ClassifiedError> for ErrorLogEntry {
    fn from(err: &ClassifiedError) -> Self {
        Self {
            id: None,
            error_type: err.error_type,
            severity: err.severity,
            message: err.message.clone(),
            original: err.original.clone(),
            context: err.context.clone(),
            occurred_at: err.occurred_at,
        }
    }
}
