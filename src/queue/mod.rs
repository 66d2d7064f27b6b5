//! Durable job lanes with leases, retries and a dead-letter lane

pub mod memory;
pub mod redis;
pub mod retry;

pub use memory::MemoryQueue;
pub use self::redis::RedisQueue;
pub use retry::RetryPolicy;

use crate::error::QueueError;
use crate::jobs::types::{AnalysisJob, JobKind};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Result of an enqueue
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Enqueued {
    New(String),
    /// A job with the same idempotency key is already queued or leased
    Duplicate(String),
}

impl Enqueued {
    pub fn job_id(&self) -> &str {
        match self {
            Enqueued::New(id) | Enqueued::Duplicate(id) => id,
        }
    }
}

/// Exclusive claim on a job until `deadline`
///
/// After the deadline the job becomes deliverable again and operations on
/// this lease fail with [`QueueError::LeaseLost`] once it is redelivered.
#[derive(Debug, Clone, PartialEq)]
pub struct Lease {
    pub job: AnalysisJob,
    pub deadline: DateTime<Utc>,
}

impl Lease {
    pub fn lane(&self) -> JobKind {
        self.job.kind()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetter {
    pub job: AnalysisJob,
    pub lane: JobKind,
    pub reason: String,
    pub failed_at: DateTime<Utc>,
}

#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Add a job to its lane, collapsing onto a pending job with the same
    /// idempotency key
    async fn enqueue(&self, job: AnalysisJob) -> Result<Enqueued, QueueError>;

    /// Claim the next visible job of the lane, highest priority first.
    ///
    /// A job redelivered after its lease expired counts that lease as a
    /// failed attempt.
    async fn lease(&self, lane: JobKind, visibility: Duration) -> Result<Option<Lease>, QueueError>;

    async fn ack(&self, lease: &Lease) -> Result<(), QueueError>;

    /// Return the job to its lane with one more recorded attempt, visible
    /// again after `delay`
    async fn nack(&self, lease: &Lease, delay: Duration, reason: &str) -> Result<(), QueueError>;

    /// Move the job to the dead-letter lane; it is never delivered again
    async fn dead_letter(&self, lease: &Lease, reason: &str) -> Result<(), QueueError>;

    async fn dead_letters(&self, lane: JobKind) -> Result<Vec<DeadLetter>, QueueError>;

    /// Jobs of the lane not yet acked or dead-lettered
    async fn depth(&self, lane: JobKind) -> Result<usize, QueueError>;
}

/// Recorded as the last error of a job whose lease ran out
pub const LEASE_EXPIRED: &str = "lease expired before the job was settled";

pub(crate) fn to_chrono(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or(chrono::Duration::MAX)
}

pub(crate) fn failed_attempt(job: &AnalysisJob, reason: &str) -> AnalysisJob {
    let mut job = job.clone();
    job.attempt_count += 1;
    job.last_error = Some(reason.to_string());
    job
}
