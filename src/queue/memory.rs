//! In-process queue with the same lease semantics as the Redis lanes
//!
//! Not durable; used by tests and single-process runs.

use super::{failed_attempt, to_chrono, DeadLetter, Enqueued, JobQueue, Lease, LEASE_EXPIRED};
use crate::core::clock::Clock;
use crate::error::QueueError;
use crate::jobs::types::{AnalysisJob, IdempotencyKey, JobKind};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

#[derive(Debug, Clone, Copy)]
enum EntryState {
    Ready { visible_at: DateTime<Utc> },
    Leased { deadline: DateTime<Utc> },
}

#[derive(Debug)]
struct Entry {
    job: AnalysisJob,
    seq: u64,
    state: EntryState,
}

impl Entry {
    fn deliverable_at(&self) -> DateTime<Utc> {
        match self.state {
            EntryState::Ready { visible_at } => visible_at,
            EntryState::Leased { deadline } => deadline,
        }
    }

    fn holds(&self, lease: &Lease) -> bool {
        matches!(self.state, EntryState::Leased { deadline } if deadline == lease.deadline)
    }
}

#[derive(Debug, Default)]
struct LaneState {
    entries: HashMap<String, Entry>,
    keys: HashMap<IdempotencyKey, String>,
    dead: Vec<DeadLetter>,
    next_seq: u64,
}

impl LaneState {
    fn release_key(&mut self, job: &AnalysisJob) {
        let key = job.idempotency_key();
        if self.keys.get(&key) == Some(&job.job_id) {
            self.keys.remove(&key);
        }
    }
}

pub struct MemoryQueue {
    clock: Arc<dyn Clock>,
    lanes: Mutex<HashMap<JobKind, LaneState>>,
}

impl MemoryQueue {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            lanes: Mutex::new(HashMap::new()),
        }
    }

    fn lost(lease: &Lease) -> QueueError {
        QueueError::LeaseLost(lease.job.job_id.clone())
    }
}

#[async_trait]
impl JobQueue for MemoryQueue {
    async fn enqueue(&self, job: AnalysisJob) -> Result<Enqueued, QueueError> {
        let now = self.clock.now();
        let mut lanes = self.lanes.lock().await;
        let lane = lanes.entry(job.kind()).or_default();

        let key = job.idempotency_key();
        if let Some(existing) = lane.keys.get(&key) {
            return Ok(Enqueued::Duplicate(existing.clone()));
        }

        let job_id = job.job_id.clone();
        let seq = lane.next_seq;
        lane.next_seq += 1;
        lane.keys.insert(key, job_id.clone());
        lane.entries.insert(
            job_id.clone(),
            Entry {
                job,
                seq,
                state: EntryState::Ready { visible_at: now },
            },
        );
        Ok(Enqueued::New(job_id))
    }

    async fn lease(&self, lane: JobKind, visibility: Duration) -> Result<Option<Lease>, QueueError> {
        let now = self.clock.now();
        let mut lanes = self.lanes.lock().await;
        let Some(state) = lanes.get_mut(&lane) else {
            return Ok(None);
        };

        let next = state
            .entries
            .values_mut()
            .filter(|e| e.deliverable_at() <= now)
            .min_by_key(|e| (e.job.priority.rank(), e.seq));

        Ok(next.map(|entry| {
            if let EntryState::Leased { .. } = entry.state {
                entry.job = failed_attempt(&entry.job, LEASE_EXPIRED);
            }
            let deadline = now + to_chrono(visibility);
            entry.state = EntryState::Leased { deadline };
            Lease {
                job: entry.job.clone(),
                deadline,
            }
        }))
    }

    async fn ack(&self, lease: &Lease) -> Result<(), QueueError> {
        let mut lanes = self.lanes.lock().await;
        let state = lanes.get_mut(&lease.lane()).ok_or_else(|| Self::lost(lease))?;
        match state.entries.get(&lease.job.job_id) {
            Some(entry) if entry.holds(lease) => {
                state.entries.remove(&lease.job.job_id);
                state.release_key(&lease.job);
                Ok(())
            }
            _ => Err(Self::lost(lease)),
        }
    }

    async fn nack(&self, lease: &Lease, delay: Duration, reason: &str) -> Result<(), QueueError> {
        let now = self.clock.now();
        let mut lanes = self.lanes.lock().await;
        let state = lanes.get_mut(&lease.lane()).ok_or_else(|| Self::lost(lease))?;
        match state.entries.get_mut(&lease.job.job_id) {
            Some(entry) if entry.holds(lease) => {
                entry.job = failed_attempt(&entry.job, reason);
                entry.state = EntryState::Ready {
                    visible_at: now + to_chrono(delay),
                };
                Ok(())
            }
            _ => Err(Self::lost(lease)),
        }
    }

    async fn dead_letter(&self, lease: &Lease, reason: &str) -> Result<(), QueueError> {
        let now = self.clock.now();
        let mut lanes = self.lanes.lock().await;
        let state = lanes.get_mut(&lease.lane()).ok_or_else(|| Self::lost(lease))?;
        match state.entries.get(&lease.job.job_id) {
            Some(entry) if entry.holds(lease) => {
                let entry = state
                    .entries
                    .remove(&lease.job.job_id)
                    .ok_or_else(|| Self::lost(lease))?;
                state.release_key(&entry.job);
                state.dead.push(DeadLetter {
                    job: failed_attempt(&entry.job, reason),
                    lane: lease.lane(),
                    reason: reason.to_string(),
                    failed_at: now,
                });
                Ok(())
            }
            _ => Err(Self::lost(lease)),
        }
    }

    async fn dead_letters(&self, lane: JobKind) -> Result<Vec<DeadLetter>, QueueError> {
        let lanes = self.lanes.lock().await;
        Ok(lanes.get(&lane).map(|s| s.dead.clone()).unwrap_or_default())
    }

    async fn depth(&self, lane: JobKind) -> Result<usize, QueueError> {
        let lanes = self.lanes.lock().await;
        Ok(lanes.get(&lane).map(|s| s.entries.len()).unwrap_or(0))
    }
}
