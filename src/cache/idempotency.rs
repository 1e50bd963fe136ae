//! Idempotency records for retried payment submissions.
//!
//! A key moves through three states: absent, in flight (the first request is still
//! running) and completed (the stored result is replayed to later callers). In-flight
//! markers carry a shorter TTL so a crashed request cannot lock a key for the full
//! record lifetime.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

use super::error::CacheResult;
use crate::config::CacheConfig;

/// Outcome of claiming a key
#[derive(Debug, Clone, PartialEq)]
pub enum IdempotencyStatus {
    /// The caller owns the key and must either `set` a result or `release` it
    New,
    /// Another request holding this key has not finished
    InFlight,
    /// A result was stored for this key
    Completed(Value),
}

#[derive(Debug, Clone)]
pub struct IdempotencyConfig {
    pub ttl: Duration,
    pub in_flight_ttl: Duration,
    pub max_entries: usize,
}

impl Default for IdempotencyConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(3600),
            in_flight_ttl: Duration::from_secs(300),
            max_entries: 10_000,
        }
    }
}

impl From<&CacheConfig> for IdempotencyConfig {
    fn from(config: &CacheConfig) -> Self {
        Self {
            ttl: Duration::from_secs(config.idempotency_ttl),
            in_flight_ttl: Duration::from_secs(config.idempotency_in_flight_ttl),
            max_entries: config.idempotency_max_entries,
        }
    }
}

#[async_trait]
pub trait IdempotencyStore: Send + Sync {
    /// Atomically claim `key` unless it is in flight or completed
    async fn begin(&self, key: &str) -> CacheResult<IdempotencyStatus>;

    /// Drop an in-flight claim so the key can be retried. Completed records are kept.
    async fn release(&self, key: &str) -> CacheResult<()>;

    /// Stored result, if the key completed and has not expired
    async fn get(&self, key: &str) -> CacheResult<Option<Value>>;

    /// Store the result for `key` for the configured TTL
    async fn set(&self, key: &str, value: Value) -> CacheResult<()>;

    /// Whether a completed result is stored for `key`
    async fn exists(&self, key: &str) -> CacheResult<bool> {
        Ok(self.get(key).await?.is_some())
    }

    /// Number of live records (in flight or completed)
    async fn len(&self) -> CacheResult<usize>;

    fn backend(&self) -> &'static str;
}

#[derive(Debug, Clone)]
enum EntryState {
    InFlight,
    Completed(Value),
}

#[derive(Debug)]
struct Entry {
    state: EntryState,
    expires_at: Instant,
    tick: u64,
}

#[derive(Debug, Default)]
struct Inner {
    entries: HashMap<String, Entry>,
    /// Recency index: lowest tick is least recently used
    recency: BTreeMap<u64, String>,
    next_tick: u64,
}

impl Inner {
    fn next_tick(&mut self) -> u64 {
        self.next_tick += 1;
        self.next_tick
    }

    fn remove(&mut self, key: &str) -> Option<Entry> {
        let entry = self.entries.remove(key)?;
        self.recency.remove(&entry.tick);
        Some(entry)
    }

    /// Drop `key` if it has expired; returns the live entry otherwise
    fn live(&mut self, key: &str, now: Instant) -> Option<&mut Entry> {
        let expired = self.entries.get(key).map(|e| e.expires_at <= now)?;
        if expired {
            self.remove(key);
            return None;
        }
        self.entries.get_mut(key)
    }

    fn touch(&mut self, key: &str) {
        let tick = self.next_tick();
        if let Some(entry) = self.entries.get_mut(key) {
            self.recency.remove(&entry.tick);
            entry.tick = tick;
            self.recency.insert(tick, key.to_string());
        }
    }

    /// Least recently used completed record, or the oldest claim when only claims remain
    fn least_recent_victim(&self) -> Option<String> {
        self.recency
            .values()
            .find(|key| {
                matches!(
                    self.entries.get(*key).map(|e| &e.state),
                    Some(EntryState::Completed(_))
                )
            })
            .or_else(|| self.recency.values().next())
            .cloned()
    }

    fn purge_expired(&mut self, now: Instant) {
        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, e)| e.expires_at <= now)
            .map(|(k, _)| k.clone())
            .collect();
        for key in expired {
            self.remove(&key);
        }
    }

    fn insert(&mut self, key: &str, state: EntryState, ttl: Duration, max_entries: usize, now: Instant) {
        self.remove(key);

        if self.entries.len() >= max_entries {
            self.purge_expired(now);
        }
        while self.entries.len() >= max_entries {
            match self.least_recent_victim() {
                Some(victim) => {
                    self.remove(&victim);
                }
                None => break,
            }
        }

        let tick = self.next_tick();
        self.entries.insert(
            key.to_string(),
            Entry {
                state,
                expires_at: now + ttl,
                tick,
            },
        );
        self.recency.insert(tick, key.to_string());
    }
}

/// Process-local store. One mutex guards both the map and the recency index,
/// which is what makes `begin` atomic.
pub struct InMemoryIdempotencyStore {
    config: IdempotencyConfig,
    inner: Mutex<Inner>,
}

impl InMemoryIdempotencyStore {
    pub fn new(config: IdempotencyConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(Inner::default()),
        }
    }
}

impl Default for InMemoryIdempotencyStore {
    fn default() -> Self {
        Self::new(IdempotencyConfig::default())
    }
}

#[async_trait]
impl IdempotencyStore for InMemoryIdempotencyStore {
    async fn begin(&self, key: &str) -> CacheResult<IdempotencyStatus> {
        let now = Instant::now();
        let mut inner = self.inner.lock().await;

        let existing = inner.live(key, now).map(|entry| entry.state.clone());
        match existing {
            Some(EntryState::Completed(value)) => {
                inner.touch(key);
                Ok(IdempotencyStatus::Completed(value))
            }
            Some(EntryState::InFlight) => Ok(IdempotencyStatus::InFlight),
            None => {
                inner.insert(
                    key,
                    EntryState::InFlight,
                    self.config.in_flight_ttl,
                    self.config.max_entries,
                    now,
                );
                Ok(IdempotencyStatus::New)
            }
        }
    }

    async fn release(&self, key: &str) -> CacheResult<()> {
        let mut inner = self.inner.lock().await;
        if matches!(
            inner.entries.get(key).map(|e| &e.state),
            Some(EntryState::InFlight)
        ) {
            inner.remove(key);
        }
        Ok(())
    }

    async fn get(&self, key: &str) -> CacheResult<Option<Value>> {
        let now = Instant::now();
        let mut inner = self.inner.lock().await;

        let value = match inner.live(key, now).map(|entry| &entry.state) {
            Some(EntryState::Completed(value)) => Some(value.clone()),
            _ => None,
        };
        if value.is_some() {
            inner.touch(key);
        }
        Ok(value)
    }

    async fn set(&self, key: &str, value: Value) -> CacheResult<()> {
        let now = Instant::now();
        let mut inner = self.inner.lock().await;
        inner.insert(
            key,
            EntryState::Completed(value),
            self.config.ttl,
            self.config.max_entries,
            now,
        );
        Ok(())
    }

    async fn len(&self) -> CacheResult<usize> {
        let mut inner = self.inner.lock().await;
        inner.purge_expired(Instant::now());
        Ok(inner.entries.len())
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}
