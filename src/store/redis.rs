//! Redis result store
//!
//! Each result lives in a hash at `{prefix}:{idempotency key}` holding the
//! `entry` JSON and its `calculated_at` millis. The key expires with the
//! entry's retention; `{prefix}:expiry` indexes keys by expiry for purges.

use super::ResultStore;
use crate::error::StoreError;
use crate::models::CacheEntry;
use ::redis::aio::ConnectionManager;
use ::redis::{AsyncCommands, Script};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::debug;

const UPSERT_SCRIPT: &str = r#"
local existing = redis.call('HGET', KEYS[1], 'calculated_at')
if existing and tonumber(existing) > tonumber(ARGV[1]) then
  return 0
end
redis.call('HSET', KEYS[1], 'calculated_at', ARGV[1], 'entry', ARGV[2])
redis.call('PEXPIREAT', KEYS[1], ARGV[3])
redis.call('ZADD', KEYS[2], ARGV[3], KEYS[1])
return 1
"#;

const PURGE_EXPIRED_SCRIPT: &str = r#"
local expired = redis.call('ZRANGEBYSCORE', KEYS[1], '-inf', ARGV[1])
for _, key in ipairs(expired) do
  redis.call('DEL', key)
  redis.call('ZREM', KEYS[1], key)
end
return #expired
"#;

pub struct RedisResultStore {
    conn: ConnectionManager,
    prefix: String,
}

impl RedisResultStore {
    pub fn new(conn: ConnectionManager, prefix: impl Into<String>) -> Self {
        Self {
            conn,
            prefix: prefix.into(),
        }
    }

    pub async fn connect(redis_url: &str, prefix: impl Into<String>) -> Result<Self, StoreError> {
        let client = ::redis::Client::open(redis_url)?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self::new(conn, prefix))
    }

    fn entry_key(&self, key: &str) -> String {
        format!("{}:{}", self.prefix, key)
    }

    fn expiry_index(&self) -> String {
        format!("{}:expiry", self.prefix)
    }
}

#[async_trait]
impl ResultStore for RedisResultStore {
    async fn get(&self, key: &str) -> Result<Option<CacheEntry>, StoreError> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn.hget(self.entry_key(key), "entry").await?;
        match raw {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    async fn upsert(&self, entry: CacheEntry) -> Result<bool, StoreError> {
        let mut conn = self.conn.clone();
        let payload = serde_json::to_string(&entry)?;

        let written: i64 = Script::new(UPSERT_SCRIPT)
            .key(self.entry_key(&entry.key))
            .key(self.expiry_index())
            .arg(entry.calculated_at.timestamp_millis())
            .arg(payload)
            .arg(entry.expires_at.timestamp_millis())
            .invoke_async(&mut conn)
            .await?;

        if written == 0 {
            debug!(key = %entry.key, "RedisResultStore: newer entry present, write ignored");
        }
        Ok(written == 1)
    }

    async fn purge(&self, key: &str) -> Result<bool, StoreError> {
        let mut conn = self.conn.clone();
        let full_key = self.entry_key(key);
        let removed: i64 = conn.del(&full_key).await?;
        let _: i64 = conn.zrem(self.expiry_index(), &full_key).await?;
        Ok(removed > 0)
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize, StoreError> {
        let mut conn = self.conn.clone();
        let removed: usize = Script::new(PURGE_EXPIRED_SCRIPT)
            .key(self.expiry_index())
            .arg(now.timestamp_millis())
            .invoke_async(&mut conn)
            .await?;
        Ok(removed)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let _: String = ::redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }
}
