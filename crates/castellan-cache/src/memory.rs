//! In-memory implementation of [`AttributeStore`].
//!
//! Backed by `DashMap`s. Expiry is checked lazily on read using
//! `tokio::time::Instant`, so paused-clock tests can advance past a TTL.
//!
//! The store can be switched unavailable or given artificial latency to
//! exercise the client's degraded paths.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::broadcast;
use tokio::time::Instant;

use crate::error::{CacheError, Result};
use crate::store::AttributeStore;

const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

#[derive(Debug)]
struct Entry {
    value: String,
    expires_at: Instant,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at > now
    }
}

/// Process-local attribute store.
#[derive(Debug)]
pub struct InMemoryStore {
    entries: DashMap<String, Entry>,
    channels: DashMap<String, broadcast::Sender<String>>,
    available: AtomicBool,
    latency_ms: AtomicU64,
    channel_capacity: usize,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::with_channel_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Creates a store whose pub/sub channels buffer `capacity` messages per
    /// subscriber before lagging.
    pub fn with_channel_capacity(capacity: usize) -> Self {
        Self {
            entries: DashMap::new(),
            channels: DashMap::new(),
            available: AtomicBool::new(true),
            latency_ms: AtomicU64::new(0),
            channel_capacity: capacity.max(1),
        }
    }

    /// Simulates an outage: while unavailable every operation fails.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Adds artificial latency to every operation.
    pub fn set_latency(&self, latency: Duration) {
        let ms = u64::try_from(latency.as_millis()).unwrap_or(u64::MAX);
        self.latency_ms.store(ms, Ordering::SeqCst);
    }

    /// Number of live (unexpired) entries.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries.iter().filter(|e| e.is_live(now)).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    async fn guard(&self) -> Result<()> {
        let latency = self.latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(CacheError::Unavailable(
                "in-memory store is marked unavailable".to_string(),
            ))
        }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AttributeStore for InMemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.guard().await?;
        let now = Instant::now();

        // The shard guard must be released before remove_if touches the same shard.
        let lookup = self
            .entries
            .get(key)
            .map(|e| e.is_live(now).then(|| e.value.clone()));

        match lookup {
            Some(Some(value)) => Ok(Some(value)),
            Some(None) => {
                self.entries.remove_if(key, |_, e| !e.is_live(now));
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set_ex(&self, key: &str, value: String, ttl: Duration) -> Result<()> {
        self.guard().await?;
        self.entries.insert(
            key.to_string(),
            Entry {
                value,
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        self.guard().await?;
        let now = Instant::now();
        Ok(self.entries.remove(key).is_some_and(|(_, e)| e.is_live(now)))
    }

    async fn delete_many(&self, keys: &[String]) -> Result<usize> {
        self.guard().await?;
        let now = Instant::now();
        Ok(keys
            .iter()
            .filter(|key| self.entries.remove(*key).is_some_and(|(_, e)| e.is_live(now)))
            .count())
    }

    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        self.guard().await?;
        let now = Instant::now();
        Ok(self
            .entries
            .iter()
            .filter(|e| e.key().starts_with(prefix) && e.is_live(now))
            .map(|e| e.key().clone())
            .collect())
    }

    async fn publish(&self, channel: &str, payload: String) -> Result<usize> {
        self.guard().await?;
        Ok(self
            .channels
            .get(channel)
            .map_or(0, |tx| tx.send(payload).unwrap_or_default()))
    }

    async fn subscribe(&self, channel: &str) -> Result<broadcast::Receiver<String>> {
        self.guard().await?;
        let capacity = self.channel_capacity;
        Ok(self
            .channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(capacity).0)
            .subscribe())
    }

    async fn ping(&self) -> Result<()> {
        self.guard().await
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
