//! Error taxonomy for the analytics pipeline

use std::time::Duration;
use thiserror::Error;

/// Failure of a single job execution.
///
/// The variant decides what the worker does with the lease:
/// transient failures and timeouts are retried with backoff, everything
/// else is dead-lettered on the spot.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum JobError {
    #[error("transient failure: {0}")]
    Transient(String),

    #[error("invalid job parameters: {0}")]
    Validation(String),

    #[error("computation failed: {0}")]
    Computation(String),

    #[error("job exceeded {0:?} timeout")]
    Timeout(Duration),
}

impl JobError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, JobError::Transient(_) | JobError::Timeout(_))
    }

    /// Short label used for metrics and dead-letter annotations
    pub fn kind(&self) -> &'static str {
        match self {
            JobError::Transient(_) => "transient",
            JobError::Validation(_) => "validation",
            JobError::Computation(_) => "computation",
            JobError::Timeout(_) => "timeout",
        }
    }
}

/// Errors raised by the listing source and result store backends
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Postgres(#[from] tokio_postgres::Error),

    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("unexpected row shape: {0}")]
    RowShape(String),

    #[error("connection pool closed")]
    PoolClosed,

    #[error("backend unavailable: {0}")]
    Unavailable(String),
}

impl From<StoreError> for JobError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Serialization(_) | StoreError::RowShape(_) => {
                JobError::Computation(err.to_string())
            }
            _ => JobError::Transient(err.to_string()),
        }
    }
}

/// Errors raised by queue backends
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("lease for job {0} was lost (visibility timeout expired)")]
    LeaseLost(String),

    #[error("queue unavailable: {0}")]
    Unavailable(String),
}

impl From<QueueError> for JobError {
    fn from(err: QueueError) -> Self {
        match err {
            QueueError::Serialization(_) => JobError::Computation(err.to_string()),
            _ => JobError::Transient(err.to_string()),
        }
    }
}

/// Invalid configuration values read from the environment
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{name} has an invalid value '{value}': {reason}")]
    InvalidValue {
        name: &'static str,
        value: String,
        reason: String,
    },

    #[error("invalid cron expression '{expr}': {reason}")]
    InvalidSchedule { expr: String, reason: String },
}
