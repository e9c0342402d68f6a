//! Attribute cache store abstraction.
//!
//! A key-value store with per-key expiration and a publish/subscribe
//! channel. The store is the only state shared between service processes.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::error::Result;

/// Backend for the distributed attribute cache.
#[async_trait]
pub trait AttributeStore: Send + Sync {
    /// Reads a value. Expired entries are reported as absent.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Writes a value that expires after `ttl`.
    async fn set_ex(&self, key: &str, value: String, ttl: Duration) -> Result<()>;

    /// Deletes one key. Returns whether it existed.
    async fn delete(&self, key: &str) -> Result<bool>;

    /// Deletes many keys in one operation. Returns how many existed.
    async fn delete_many(&self, keys: &[String]) -> Result<usize>;

    /// Lists live keys starting with `prefix`.
    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>>;

    /// Publishes a message on `channel`. Returns the number of receivers.
    async fn publish(&self, channel: &str, payload: String) -> Result<usize>;

    /// Subscribes to messages published on `channel` from now on.
    async fn subscribe(&self, channel: &str) -> Result<broadcast::Receiver<String>>;

    /// Liveness probe.
    async fn ping(&self) -> Result<()>;

    fn backend_name(&self) -> &'static str;
}
