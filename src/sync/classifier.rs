//! Error classification decision table
//!
//! Maps a caught error to a retry taxonomy, severity and suggested delay.
//! Typed errors report their [`ErrorSignal`] directly; anything else is matched
//! against the message table, top to bottom, first match wins.

use chrono::Utc;
use std::collections::BTreeMap;
use std::time::Duration;

use crate::error::{Classifiable, ErrorSignal};
use crate::models::{ClassifiedError, ErrorSeverity, ErrorType};

/// One row of the decision table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    pub error_type: ErrorType,
    pub severity: ErrorSeverity,
    pub should_retry: bool,
    pub retry_after: Option<Duration>,
    pub description: &'static str,
}

/// Decision-table row for a signal; `None` is the no-match row
pub fn classification_for(signal: Option<ErrorSignal>) -> Classification {
    let row = |error_type, severity, retry_after: Option<u64>, description| Classification {
        error_type,
        severity,
        should_retry: retry_after.is_some(),
        retry_after: retry_after.map(Duration::from_secs),
        description,
    };

    match signal {
        Some(ErrorSignal::RateLimit) => row(
            ErrorType::Retryable,
            ErrorSeverity::Medium,
            Some(60),
            "Upstream rate limit exceeded",
        ),
        Some(ErrorSignal::Network) => row(
            ErrorType::Transient,
            ErrorSeverity::Medium,
            Some(5),
            "Network failure talking to upstream",
        ),
        Some(ErrorSignal::BadRequest) => row(
            ErrorType::Fatal,
            ErrorSeverity::Low,
            None,
            "Upstream rejected the request",
        ),
        Some(ErrorSignal::NotFound) => row(
            ErrorType::Fatal,
            ErrorSeverity::Low,
            None,
            "Resource not found",
        ),
        Some(ErrorSignal::Unauthorized) => row(
            ErrorType::Configuration,
            ErrorSeverity::Critical,
            None,
            "API credentials rejected",
        ),
        Some(ErrorSignal::ServerError) => row(
            ErrorType::Retryable,
            ErrorSeverity::High,
            Some(30),
            "Upstream server error",
        ),
        Some(ErrorSignal::Storage) => row(
            ErrorType::Fatal,
            ErrorSeverity::High,
            None,
            "Storage layer failure",
        ),
        Some(ErrorSignal::Validation) => row(
            ErrorType::Fatal,
            ErrorSeverity::Low,
            None,
            "Invalid data",
        ),
        None => row(
            ErrorType::Unknown,
            ErrorSeverity::Medium,
            None,
            "Unclassified error",
        ),
    }
}

/// Resolve the signal for an error, preferring its typed mapping
pub fn signal_of<E: Classifiable + ?Sized>(err: &E) -> Option<ErrorSignal> {
    err.signal()
        .or_else(|| ErrorSignal::from_message(&err.to_string()))
}

/// Classify an error with optional free-form context
pub fn classify<E: Classifiable + ?Sized>(err: &E, context: &[(&str, &str)]) -> ClassifiedError {
    let row = classification_for(signal_of(err));

    ClassifiedError {
        error_type: row.error_type,
        severity: row.severity,
        message: row.description.to_string(),
        should_retry: row.should_retry,
        retry_after_ms: row.retry_after.map(|d| d.as_millis() as u64),
        original: err.to_string(),
        context: context
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect::<BTreeMap<_, _>>(),
        occurred_at: Utc::now(),
    }
}
