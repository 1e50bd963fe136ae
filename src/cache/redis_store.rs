//! Redis-backed idempotency store.
//!
//! Claims use `SET NX EX`, so concurrent replicas agree on a single owner per key.
//! A sorted-set index scored by last access keeps the record count bounded; reads
//! and replays bump the score, so trimming drops the least recently used records.
//! Claims still in flight are only trimmed when nothing else is left to drop.

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, warn};

use super::error::{CacheError, CacheResult};
use super::idempotency::{IdempotencyConfig, IdempotencyStatus, IdempotencyStore};
use super::keys::idempotency::IndexKey;
use super::RedisPool;

const IN_FLIGHT_MARKER: &str = "__in_flight__";

/// Index members inspected per trim round trip
const TRIM_SCAN: isize = 64;

pub struct RedisIdempotencyStore {
    pool: RedisPool,
    config: IdempotencyConfig,
    index: String,
}

impl RedisIdempotencyStore {
    pub fn new(pool: RedisPool, config: IdempotencyConfig) -> Self {
        Self::with_index(pool, config, IndexKey.to_string())
    }

    /// Store whose size bound is tracked under `index` instead of the shared one
    pub fn with_index(pool: RedisPool, config: IdempotencyConfig, index: impl Into<String>) -> Self {
        Self {
            pool,
            config,
            index: index.into(),
        }
    }

    async fn raw_get(&self, key: &str) -> CacheResult<Option<String>> {
        let mut conn = self.pool.get().await?;
        let value: Option<String> = redis::cmd("GET").arg(key).query_async(&mut *conn).await?;
        Ok(value)
    }

    /// Mark `key` as just used
    async fn touch(&self, key: &str) -> CacheResult<()> {
        let mut conn = self.pool.get().await?;
        let _: i64 = redis::cmd("ZADD")
            .arg(&self.index)
            .arg(chrono::Utc::now().timestamp_millis())
            .arg(key)
            .query_async(&mut *conn)
            .await?;
        Ok(())
    }

    /// Record `key` as just used, then trim the index back to `max_entries`
    async fn touch_and_trim(&self, key: &str) -> CacheResult<()> {
        {
            let mut conn = self.pool.get().await?;
            let horizon =
                chrono::Utc::now().timestamp_millis() - self.config.ttl.as_millis() as i64;
            let _: i64 = redis::cmd("ZREMRANGEBYSCORE")
                .arg(&self.index)
                .arg("-inf")
                .arg(horizon)
                .query_async(&mut *conn)
                .await?;
        }
        self.touch(key).await?;

        let count: i64 = {
            let mut conn = self.pool.get().await?;
            redis::cmd("ZCARD").arg(&self.index).query_async(&mut *conn).await?
        };
        let excess = count - self.config.max_entries as i64;
        if excess > 0 {
            self.trim(key, excess as usize).await?;
        }
        Ok(())
    }

    /// Drop `excess` records, least recently used first. Members whose record already
    /// expired count towards the excess; claims in flight are passed over.
    async fn trim(&self, current: &str, excess: usize) -> CacheResult<()> {
        let mut conn = self.pool.get().await?;
        let mut dropped = 0usize;
        let mut in_flight: Vec<String> = Vec::new();
        let mut start: isize = 0;

        while dropped < excess {
            let members: Vec<String> = redis::cmd("ZRANGE")
                .arg(&self.index)
                .arg(start)
                .arg(start + TRIM_SCAN - 1)
                .query_async(&mut *conn)
                .await?;
            if members.is_empty() {
                break;
            }

            let mut kept = 0isize;
            for member in members {
                if dropped == excess {
                    break;
                }
                if member == current {
                    kept += 1;
                    continue;
                }

                let value: Option<String> =
                    redis::cmd("GET").arg(&member).query_async(&mut *conn).await?;
                match value.as_deref() {
                    Some(IN_FLIGHT_MARKER) => {
                        kept += 1;
                        in_flight.push(member);
                    }
                    Some(_) => {
                        let _: i64 = redis::cmd("DEL").arg(&member).query_async(&mut *conn).await?;
                        let _: i64 = redis::cmd("ZREM")
                            .arg(&self.index)
                            .arg(&member)
                            .query_async(&mut *conn)
                            .await?;
                        dropped += 1;
                    }
                    None => {
                        let _: i64 = redis::cmd("ZREM")
                            .arg(&self.index)
                            .arg(&member)
                            .query_async(&mut *conn)
                            .await?;
                        dropped += 1;
                    }
                }
            }
            start += kept;
        }

        // Only claims in flight are left; the bound still holds
        for member in in_flight.into_iter().take(excess - dropped) {
            warn!(key = %member, "Evicting in-flight idempotency claim to honour the size bound");
            let _: i64 = redis::cmd("DEL").arg(&member).query_async(&mut *conn).await?;
            let _: i64 = redis::cmd("ZREM")
                .arg(&self.index)
                .arg(&member)
                .query_async(&mut *conn)
                .await?;
            dropped += 1;
        }

        debug!(evicted = dropped, "Trimmed idempotency records");
        Ok(())
    }
}

fn decode(raw: &str) -> CacheResult<Value> {
    serde_json::from_str(raw).map_err(CacheError::from)
}

#[async_trait]
impl IdempotencyStore for RedisIdempotencyStore {
    async fn begin(&self, key: &str) -> CacheResult<IdempotencyStatus> {
        // A record can expire between SET NX and GET; one retry covers that window.
        for _ in 0..2 {
            let claimed: Option<String> = {
                let mut conn = self.pool.get().await?;
                redis::cmd("SET")
                    .arg(key)
                    .arg(IN_FLIGHT_MARKER)
                    .arg("NX")
                    .arg("EX")
                    .arg(self.config.in_flight_ttl.as_secs().max(1))
                    .query_async(&mut *conn)
                    .await?
            };

            if claimed.is_some() {
                self.touch_and_trim(key).await?;
                return Ok(IdempotencyStatus::New);
            }

            match self.raw_get(key).await? {
                Some(raw) if raw == IN_FLIGHT_MARKER => return Ok(IdempotencyStatus::InFlight),
                Some(raw) => {
                    let value = decode(&raw)?;
                    self.touch(key).await?;
                    return Ok(IdempotencyStatus::Completed(value));
                }
                None => continue,
            }
        }

        warn!(key = %key, "Idempotency key churned during claim");
        Ok(IdempotencyStatus::InFlight)
    }

    async fn release(&self, key: &str) -> CacheResult<()> {
        if self.raw_get(key).await?.as_deref() == Some(IN_FLIGHT_MARKER) {
            let mut conn = self.pool.get().await?;
            let _: i64 = redis::cmd("DEL").arg(key).query_async(&mut *conn).await?;
            let _: i64 = redis::cmd("ZREM")
                .arg(&self.index)
                .arg(key)
                .query_async(&mut *conn)
                .await?;
        }
        Ok(())
    }

    async fn get(&self, key: &str) -> CacheResult<Option<Value>> {
        match self.raw_get(key).await? {
            Some(raw) if raw != IN_FLIGHT_MARKER => {
                let value = decode(&raw)?;
                self.touch(key).await?;
                Ok(Some(value))
            }
            _ => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: Value) -> CacheResult<()> {
        let payload = serde_json::to_string(&value)?;
        {
            let mut conn = self.pool.get().await?;
            let _: String = redis::cmd("SET")
                .arg(key)
                .arg(payload)
                .arg("EX")
                .arg(self.config.ttl.as_secs().max(1))
                .query_async(&mut *conn)
                .await?;
        }
        self.touch_and_trim(key).await
    }

    async fn len(&self) -> CacheResult<usize> {
        let mut conn = self.pool.get().await?;
        let count: i64 = redis::cmd("ZCARD")
            .arg(&self.index)
            .query_async(&mut *conn)
            .await?;
        Ok(count.max(0) as usize)
    }

    fn backend(&self) -> &'static str {
        "redis"
    }
}
