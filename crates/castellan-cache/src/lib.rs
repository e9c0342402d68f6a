//! # castellan-cache: Distributed attribute cache
//!
//! Attribute sets are cached per (subject, service) in a shared key-value
//! store with long TTLs. The cache is never authoritative: any miss can be
//! resolved by recomputing from the source of record through an
//! [`AttributeLoader`].
//!
//! - [`AttributeStore`]: backend trait (get/set with expiry, delete, pub/sub)
//! - [`InMemoryStore`]: process-local backend for single-node deployments and tests
//! - [`AttributeCacheClient`]: typed client with read timeouts, auto-refresh
//!   and batched invalidation
//! - [`InvalidationEvent`]: notification published on every invalidation

pub mod client;
pub mod error;
pub mod event;
pub mod keys;
pub mod memory;
pub mod metrics;
pub mod store;

pub use client::{AttributeCacheClient, AttributeLoader, CacheSettings, DEFAULT_TIMEOUT, DEFAULT_TTL};
pub use error::{CacheError, LoadError, Result};
pub use event::{InvalidationEvent, InvalidationSubscription, InvalidationTarget};
pub use keys::CacheKeys;
pub use memory::InMemoryStore;
pub use metrics::CACHE_METRICS;
pub use store::AttributeStore;
