//! Error taxonomy for the dispatch pipeline.
//!
//! Only `ExecutionError` and `PersistenceError` affect job state; everything
//! else is absorbed and logged at its origin.

use std::time::Duration;
use thiserror::Error;

/// Why an advisory request could not be trusted. Never propagates past the
/// advisory client; every variant collapses into the fallback tuple.
#[derive(Error, Debug)]
pub enum AdvisoryUnavailable {
    #[error("advisory request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("advisory endpoint returned status {0}")]
    Status(u16),

    #[error("advisory response was malformed: {0}")]
    Malformed(String),

    #[error("advisory response out of range: {0}")]
    OutOfRange(String),
}

/// A scan attempt failed. Recoverable: the job retries with backoff.
#[derive(Error, Debug)]
pub enum ExecutionError {
    #[error("scan execution failed: {0}")]
    Failed(String),

    #[error("scan execution exceeded the {0:?} deadline")]
    DeadlineExceeded(Duration),
}

/// A result-store write failed. Recoverable, but the already-computed report
/// must be surfaced (error-logged in full) before any retry.
#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("target {0} does not exist")]
    TargetMissing(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("report serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Delivery of a completion notice failed. Logged, never fails the job.
#[derive(Error, Debug)]
pub enum NotificationError {
    #[error("notification transport failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("notification rejected with status {0}")]
    Rejected(u16),
}

/// The recoverable failure of one pipeline attempt.
#[derive(Error, Debug)]
pub enum AttemptError {
    #[error(transparent)]
    Execution(#[from] ExecutionError),

    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}
