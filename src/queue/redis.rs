//! Redis-backed lanes
//!
//! Per lane the following keys live under `{namespace}:{lane}`:
//! - `ready`   sorted set of visible job ids, scored by priority then enqueue time
//! - `delayed` sorted set of job ids waiting for their backoff, scored by visible-at millis
//! - `leased`  sorted set of leased job ids, scored by lease deadline millis
//! - `jobs`    hash job id -> job JSON
//! - `rank`    hash job id -> ready score
//! - `keys`    hash idempotency key -> job id of the pending job
//! - `dead`    list of dead-letter JSON records
//!
//! Every transition runs as a single Lua script so a crashed worker never
//! leaves a job half-moved.

use super::{failed_attempt, to_chrono, DeadLetter, Enqueued, JobQueue, Lease, LEASE_EXPIRED};
use crate::core::clock::Clock;
use crate::error::QueueError;
use crate::jobs::types::{AnalysisJob, JobKind};
use ::redis::aio::ConnectionManager;
use ::redis::{AsyncCommands, Script};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Spacing between priority bands in the ready score, larger than any epoch millis
const PRIORITY_BAND: f64 = 1e13;

const ENQUEUE_SCRIPT: &str = r#"
local existing = redis.call('HGET', KEYS[1], ARGV[1])
if existing then
  return {0, existing}
end
redis.call('HSET', KEYS[1], ARGV[1], ARGV[2])
redis.call('HSET', KEYS[2], ARGV[2], ARGV[3])
redis.call('HSET', KEYS[4], ARGV[2], ARGV[4])
redis.call('ZADD', KEYS[3], ARGV[4], ARGV[2])
return {1, ARGV[2]}
"#;

const LEASE_SCRIPT: &str = r#"
local expired = redis.call('ZRANGEBYSCORE', KEYS[3], '-inf', ARGV[1])
for _, id in ipairs(expired) do
  redis.call('ZREM', KEYS[3], id)
  local raw = redis.call('HGET', KEYS[4], id)
  if raw then
    local job = cjson.decode(raw)
    job['attempt_count'] = (tonumber(job['attempt_count']) or 0) + 1
    job['last_error'] = ARGV[3]
    redis.call('HSET', KEYS[4], id, cjson.encode(job))
  end
  redis.call('ZADD', KEYS[1], redis.call('HGET', KEYS[5], id) or 0, id)
end
local due = redis.call('ZRANGEBYSCORE', KEYS[2], '-inf', ARGV[1])
for _, id in ipairs(due) do
  redis.call('ZREM', KEYS[2], id)
  redis.call('ZADD', KEYS[1], redis.call('HGET', KEYS[5], id) or 0, id)
end
local head = redis.call('ZRANGE', KEYS[1], 0, 0)
if #head == 0 then
  return false
end
local id = head[1]
redis.call('ZREM', KEYS[1], id)
redis.call('ZADD', KEYS[3], ARGV[2], id)
return redis.call('HGET', KEYS[4], id)
"#;

const ACK_SCRIPT: &str = r#"
local score = redis.call('ZSCORE', KEYS[1], ARGV[1])
if not score or tonumber(score) ~= tonumber(ARGV[2]) then
  return 0
end
redis.call('ZREM', KEYS[1], ARGV[1])
redis.call('HDEL', KEYS[2], ARGV[1])
redis.call('HDEL', KEYS[4], ARGV[1])
if redis.call('HGET', KEYS[3], ARGV[3]) == ARGV[1] then
  redis.call('HDEL', KEYS[3], ARGV[3])
end
return 1
"#;

const NACK_SCRIPT: &str = r#"
local score = redis.call('ZSCORE', KEYS[1], ARGV[1])
if not score or tonumber(score) ~= tonumber(ARGV[2]) then
  return 0
end
redis.call('ZREM', KEYS[1], ARGV[1])
redis.call('HSET', KEYS[2], ARGV[1], ARGV[3])
redis.call('ZADD', KEYS[3], ARGV[4], ARGV[1])
return 1
"#;

const DEAD_LETTER_SCRIPT: &str = r#"
local score = redis.call('ZSCORE', KEYS[1], ARGV[1])
if not score or tonumber(score) ~= tonumber(ARGV[2]) then
  return 0
end
redis.call('ZREM', KEYS[1], ARGV[1])
redis.call('HDEL', KEYS[2], ARGV[1])
redis.call('HDEL', KEYS[4], ARGV[1])
if redis.call('HGET', KEYS[3], ARGV[3]) == ARGV[1] then
  redis.call('HDEL', KEYS[3], ARGV[3])
end
redis.call('RPUSH', KEYS[5], ARGV[4])
return 1
"#;

struct LaneKeys {
    ready: String,
    delayed: String,
    leased: String,
    jobs: String,
    rank: String,
    keys: String,
    dead: String,
}

impl LaneKeys {
    fn new(namespace: &str, lane: JobKind) -> Self {
        let base = format!("{}:{}", namespace, lane.lane());
        Self {
            ready: format!("{}:ready", base),
            delayed: format!("{}:delayed", base),
            leased: format!("{}:leased", base),
            jobs: format!("{}:jobs", base),
            rank: format!("{}:rank", base),
            keys: format!("{}:keys", base),
            dead: format!("{}:dead", base),
        }
    }
}

pub struct RedisQueue {
    conn: ConnectionManager,
    namespace: String,
    clock: Arc<dyn Clock>,
}

impl RedisQueue {
    pub fn new(conn: ConnectionManager, namespace: impl Into<String>, clock: Arc<dyn Clock>) -> Self {
        Self {
            conn,
            namespace: namespace.into(),
            clock,
        }
    }

    pub async fn connect(
        redis_url: &str,
        namespace: impl Into<String>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, QueueError> {
        let client = ::redis::Client::open(redis_url)?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self::new(conn, namespace, clock))
    }

    fn keys(&self, lane: JobKind) -> LaneKeys {
        LaneKeys::new(&self.namespace, lane)
    }

    fn ready_score(job: &AnalysisJob) -> f64 {
        job.priority.rank() as f64 * PRIORITY_BAND + job.created_at.timestamp_millis() as f64
    }

    fn millis(at: DateTime<Utc>) -> i64 {
        at.timestamp_millis()
    }

    fn check_held(held: i64, lease: &Lease) -> Result<(), QueueError> {
        if held == 1 {
            Ok(())
        } else {
            Err(QueueError::LeaseLost(lease.job.job_id.clone()))
        }
    }
}

#[async_trait]
impl JobQueue for RedisQueue {
    async fn enqueue(&self, job: AnalysisJob) -> Result<Enqueued, QueueError> {
        let keys = self.keys(job.kind());
        let payload = serde_json::to_string(&job)?;
        let mut conn = self.conn.clone();

        let (created, job_id): (i64, String) = Script::new(ENQUEUE_SCRIPT)
            .key(&keys.keys)
            .key(&keys.jobs)
            .key(&keys.ready)
            .key(&keys.rank)
            .arg(job.idempotency_key().as_str())
            .arg(&job.job_id)
            .arg(payload)
            .arg(Self::ready_score(&job))
            .invoke_async(&mut conn)
            .await?;

        if created == 1 {
            debug!(job_id = %job_id, lane = %job.kind(), "RedisQueue: enqueued job");
            Ok(Enqueued::New(job_id))
        } else {
            Ok(Enqueued::Duplicate(job_id))
        }
    }

    async fn lease(&self, lane: JobKind, visibility: Duration) -> Result<Option<Lease>, QueueError> {
        let keys = self.keys(lane);
        let now = self.clock.now();
        let deadline = now + to_chrono(visibility);
        let mut conn = self.conn.clone();

        let payload: Option<String> = Script::new(LEASE_SCRIPT)
            .key(&keys.ready)
            .key(&keys.delayed)
            .key(&keys.leased)
            .key(&keys.jobs)
            .key(&keys.rank)
            .arg(Self::millis(now))
            .arg(Self::millis(deadline))
            .arg(LEASE_EXPIRED)
            .invoke_async(&mut conn)
            .await?;

        match payload {
            Some(raw) => {
                let job: AnalysisJob = serde_json::from_str(&raw)?;
                // Scores are stored in millis; keep the lease comparable with them.
                let deadline = DateTime::<Utc>::from_timestamp_millis(Self::millis(deadline))
                    .unwrap_or(deadline);
                Ok(Some(Lease { job, deadline }))
            }
            None => Ok(None),
        }
    }

    async fn ack(&self, lease: &Lease) -> Result<(), QueueError> {
        let keys = self.keys(lease.lane());
        let mut conn = self.conn.clone();

        let held: i64 = Script::new(ACK_SCRIPT)
            .key(&keys.leased)
            .key(&keys.jobs)
            .key(&keys.keys)
            .key(&keys.rank)
            .arg(&lease.job.job_id)
            .arg(Self::millis(lease.deadline))
            .arg(lease.job.idempotency_key().as_str())
            .invoke_async(&mut conn)
            .await?;
        Self::check_held(held, lease)
    }

    async fn nack(&self, lease: &Lease, delay: Duration, reason: &str) -> Result<(), QueueError> {
        let keys = self.keys(lease.lane());
        let retried = failed_attempt(&lease.job, reason);
        let visible_at = self.clock.now() + to_chrono(delay);
        let mut conn = self.conn.clone();

        let held: i64 = Script::new(NACK_SCRIPT)
            .key(&keys.leased)
            .key(&keys.jobs)
            .key(&keys.delayed)
            .arg(&lease.job.job_id)
            .arg(Self::millis(lease.deadline))
            .arg(serde_json::to_string(&retried)?)
            .arg(Self::millis(visible_at))
            .invoke_async(&mut conn)
            .await?;
        Self::check_held(held, lease)
    }

    async fn dead_letter(&self, lease: &Lease, reason: &str) -> Result<(), QueueError> {
        let keys = self.keys(lease.lane());
        let record = DeadLetter {
            job: failed_attempt(&lease.job, reason),
            lane: lease.lane(),
            reason: reason.to_string(),
            failed_at: self.clock.now(),
        };
        let mut conn = self.conn.clone();

        let held: i64 = Script::new(DEAD_LETTER_SCRIPT)
            .key(&keys.leased)
            .key(&keys.jobs)
            .key(&keys.keys)
            .key(&keys.rank)
            .key(&keys.dead)
            .arg(&lease.job.job_id)
            .arg(Self::millis(lease.deadline))
            .arg(lease.job.idempotency_key().as_str())
            .arg(serde_json::to_string(&record)?)
            .invoke_async(&mut conn)
            .await?;
        Self::check_held(held, lease)
    }

    async fn dead_letters(&self, lane: JobKind) -> Result<Vec<DeadLetter>, QueueError> {
        let keys = self.keys(lane);
        let mut conn = self.conn.clone();
        let raw: Vec<String> = conn.lrange(&keys.dead, 0, -1).await?;
        raw.iter()
            .map(|r| serde_json::from_str(r).map_err(QueueError::from))
            .collect()
    }

    async fn depth(&self, lane: JobKind) -> Result<usize, QueueError> {
        let keys = self.keys(lane);
        let mut conn = self.conn.clone();
        let depth: usize = conn.hlen(&keys.jobs).await?;
        Ok(depth)
    }
}
