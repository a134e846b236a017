//! Application error types for legis-sync
//!
//! This module defines common error types used throughout the application.
//! All error types use `thiserror` for ergonomic error handling.

use thiserror::Error;

use crate::config::ConfigError;

/// Database-related errors
#[derive(Debug, Error)]
pub enum DbError {
    /// SQLite error
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Record not found
    #[error("Record not found")]
    NotFound,

    /// Constraint violation
    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    /// Migration error
    #[error("Migration error: {0}")]
    Migration(String),

    /// A stored JSON column could not be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Lifecycle transition refused (e.g. completing a terminal SyncRun)
    #[error("Invalid state transition: {0}")]
    InvalidTransition(String),
}

impl From<serde_json::Error> for DbError {
    fn from(err: serde_json::Error) -> Self {
        DbError::Serialization(err.to_string())
    }
}

impl From<tokio_rusqlite::Error> for DbError {
    fn from(err: tokio_rusqlite::Error) -> Self {
        match err {
            tokio_rusqlite::Error::Rusqlite(e) => DbError::Sqlite(e),
            tokio_rusqlite::Error::Close((_, e)) => DbError::Sqlite(e),
            other => DbError::Sqlite(rusqlite::Error::SqliteFailure(
                rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_MISUSE),
                Some(other.to_string()),
            )),
        }
    }
}

/// Errors raised while talking to the upstream Congress.gov API
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SyncError {
    /// Network timeout
    #[error("Network timeout")]
    NetworkTimeout,

    /// Connection refused
    #[error("Connection refused")]
    ConnectionRefused,

    /// Rate limited by upstream
    #[error("Rate limited (HTTP 429), retry after {0} seconds")]
    RateLimited(u64),

    /// Upstream rejected the request parameters
    #[error("Bad request (HTTP 400): {0}")]
    BadRequest(String),

    /// Server error
    #[error("Server error: HTTP {0}")]
    ServerError(u16),

    /// Invalid data received
    #[error("Invalid data: {0}")]
    InvalidData(String),

    /// Resource not found
    #[error("Resource not found (HTTP 404)")]
    NotFound,

    /// API key missing, revoked or lacking permission
    #[error("Unauthorized (HTTP 401/403)")]
    Unauthorized,

    /// Generic network error
    #[error("Network error: {0}")]
    Network(String),
}

/// Application-level error type
///
/// This is the main error type used throughout the engine.
/// It aggregates all domain-specific error types.
#[derive(Debug, Error)]
pub enum AppError {
    /// Upstream sync error
    #[error("Sync error: {0}")]
    Sync(#[from] SyncError),

    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] DbError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Upstream record failed validation during normalisation
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Failure signal used as the row key of the classification table.
///
/// Variants are declared in table order; message matching walks them
/// top to bottom and the first hit wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorSignal {
    /// Upstream quota exhausted (429)
    RateLimit,
    /// Connection refused, timeout, DNS or other network-level failure
    Network,
    /// 400
    BadRequest,
    /// 404
    NotFound,
    /// 401 / 403
    Unauthorized,
    /// 500 / 502 / 503
    ServerError,
    /// Storage layer or constraint violation
    Storage,
    /// Invalid upstream data
    Validation,
}

impl ErrorSignal {
    /// All signals in decision-table order
    pub const TABLE_ORDER: [ErrorSignal; 8] = [
        ErrorSignal::RateLimit,
        ErrorSignal::Network,
        ErrorSignal::BadRequest,
        ErrorSignal::NotFound,
        ErrorSignal::Unauthorized,
        ErrorSignal::ServerError,
        ErrorSignal::Storage,
        ErrorSignal::Validation,
    ];

    /// Lowercase substrings that identify this signal in an error message
    pub fn patterns(&self) -> &'static [&'static str] {
        match self {
            ErrorSignal::RateLimit => &["429", "rate limit", "too many requests"],
            ErrorSignal::Network => &[
                "econnrefused",
                "connection refused",
                "econnreset",
                "connection reset",
                "etimedout",
                "timed out",
                "timeout",
                "enotfound",
                "dns",
                "network",
            ],
            ErrorSignal::BadRequest => &["400", "bad request"],
            ErrorSignal::NotFound => &["404", "not found"],
            ErrorSignal::Unauthorized => &["401", "403", "unauthorized", "forbidden"],
            ErrorSignal::ServerError => &[
                "500",
                "502",
                "503",
                "internal server error",
                "bad gateway",
                "service unavailable",
            ],
            ErrorSignal::Storage => &[
                "database",
                "sqlite",
                "constraint",
                "unique violation",
                "foreign key",
            ],
            ErrorSignal::Validation => &["validation", "invalid"],
        }
    }

    /// Match an error message against the table, first hit wins
    pub fn from_message(message: &str) -> Option<ErrorSignal> {
        let lower = message.to_lowercase();
        Self::TABLE_ORDER
            .into_iter()
            .find(|signal| signal.patterns().iter().any(|p| lower.contains(p)))
    }
}

/// Trait for errors that can be fed to the classifier
///
/// Typed errors report their signal directly. Returning `None` makes the
/// classifier fall back to matching the rendered message.
pub trait Classifiable: std::fmt::Display {
    /// Signal derived from the error's structure, if it has one
    fn signal(&self) -> Option<ErrorSignal> {
        None
    }
}

impl Classifiable for SyncError {
    fn signal(&self) -> Option<ErrorSignal> {
        match self {
            SyncError::RateLimited(_) => Some(ErrorSignal::RateLimit),
            SyncError::NetworkTimeout | SyncError::ConnectionRefused => {
                Some(ErrorSignal::Network)
            }
            SyncError::BadRequest(_) => Some(ErrorSignal::BadRequest),
            SyncError::NotFound => Some(ErrorSignal::NotFound),
            SyncError::Unauthorized => Some(ErrorSignal::Unauthorized),
            SyncError::ServerError(429) => Some(ErrorSignal::RateLimit),
            SyncError::ServerError(400) => Some(ErrorSignal::BadRequest),
            SyncError::ServerError(401) | SyncError::ServerError(403) => {
                Some(ErrorSignal::Unauthorized)
            }
            SyncError::ServerError(404) => Some(ErrorSignal::NotFound),
            SyncError::ServerError(500..=503) => Some(ErrorSignal::ServerError),
            SyncError::ServerError(504) => Some(ErrorSignal::Network),
            SyncError::ServerError(_) => None,
            SyncError::InvalidData(_) => Some(ErrorSignal::Validation),
            SyncError::Network(_) => None,
        }
    }
}

impl Classifiable for DbError {
    fn signal(&self) -> Option<ErrorSignal> {
        match self {
            DbError::NotFound => Some(ErrorSignal::NotFound),
            DbError::Serialization(_) => Some(ErrorSignal::Validation),
            _ => Some(ErrorSignal::Storage),
        }
    }
}

impl Classifiable for AppError {
    fn signal(&self) -> Option<ErrorSignal> {
        match self {
            AppError::Sync(err) => err.signal(),
            AppError::Database(err) => err.signal(),
            AppError::Validation(_) => Some(ErrorSignal::Validation),
            AppError::Config(_) | AppError::Internal(_) => None,
        }
    }
}

impl Classifiable for String {}

impl Classifiable for str {}

impl Classifiable for &str {}
