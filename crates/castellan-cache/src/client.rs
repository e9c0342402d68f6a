//! Attribute cache client.
//!
//! Wraps an [`AttributeStore`] with typed reads and writes, read timeouts,
//! auto-refresh on miss and invalidation broadcasting.
//!
//! A cached set is never served past the earliest expiry of the assignments
//! it was computed from: writes cap the TTL at that instant and reads treat
//! an entry past it as a miss.
//!
//! Reads never block past the configured timeout. A slow or unreachable store
//! is treated like a miss when auto-refresh is on, so a lookup degrades to a
//! recomputation and, failing that, to "not found".

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use castellan_types::{AttributeSet, ServiceName, SubjectId};
use chrono::Utc;
use tracing::{debug, info, warn};

use crate::error::{CacheError, LoadError, Result};
use crate::event::{InvalidationEvent, InvalidationSubscription, InvalidationTarget};
use crate::keys::CacheKeys;
use crate::metrics::{CACHE_METRICS, CacheMetrics};
use crate::store::AttributeStore;

/// Default time-to-live of a cached attribute set (one day).
pub const DEFAULT_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Default timeout applied to every store operation.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(250);

/// Recomputes attribute sets from the source of record.
#[async_trait]
pub trait AttributeLoader: Send + Sync {
    async fn load(
        &self,
        subject_id: SubjectId,
        service: &ServiceName,
    ) -> std::result::Result<AttributeSet, LoadError>;
}

/// Cache client settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheSettings {
    /// TTL used when `set` is called without an explicit one.
    pub ttl: Duration,
    /// Applied to every store round trip.
    pub timeout: Duration,
    pub key_prefix: String,
    pub invalidation_channel: String,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            ttl: DEFAULT_TTL,
            timeout: DEFAULT_TIMEOUT,
            key_prefix: "authz".to_string(),
            invalidation_channel: "authz:invalidations".to_string(),
        }
    }
}

/// Typed client over the distributed attribute cache.
///
/// Cheap to clone; clones share the store and loader.
#[derive(Clone)]
pub struct AttributeCacheClient {
    store: Arc<dyn AttributeStore>,
    loader: Arc<dyn AttributeLoader>,
    keys: CacheKeys,
    settings: CacheSettings,
}

impl fmt::Debug for AttributeCacheClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AttributeCacheClient")
            .field("backend", &self.store.backend_name())
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl AttributeCacheClient {
    pub fn new(
        store: Arc<dyn AttributeStore>,
        loader: Arc<dyn AttributeLoader>,
        settings: CacheSettings,
    ) -> Self {
        Self {
            store,
            loader,
            keys: CacheKeys::new(settings.key_prefix.clone()),
            settings,
        }
    }

    pub fn settings(&self) -> &CacheSettings {
        &self.settings
    }

    pub fn backend_name(&self) -> &'static str {
        self.store.backend_name()
    }

    /// Reads the attribute set of `subject_id` in `service`.
    ///
    /// With `auto_refresh`, a miss, an undecodable entry or a store failure
    /// triggers a synchronous recomputation whose result is written back. If
    /// the recomputation fails the lookup returns `Ok(None)`.
    ///
    /// Without `auto_refresh`, misses return `Ok(None)` and store failures are
    /// returned as errors.
    pub async fn get(
        &self,
        subject_id: SubjectId,
        service: &ServiceName,
        auto_refresh: bool,
    ) -> Result<Option<AttributeSet>> {
        let key = self.keys.attribute_set(subject_id, service);

        match self.timed(self.store.get(&key)).await {
            Ok(Some(raw)) => match decode_entry(&raw, subject_id, service) {
                Some(attrs) if attrs.is_stale_at(Utc::now()) => {
                    CacheMetrics::incr(&CACHE_METRICS.misses_total);
                    debug!(%subject_id, %service, expires_at = ?attrs.expires_at, "cached attribute set outlived an assignment");
                }
                Some(attrs) => {
                    CacheMetrics::incr(&CACHE_METRICS.hits_total);
                    debug!(%subject_id, %service, "attribute cache hit");
                    return Ok(Some(attrs));
                }
                None => CacheMetrics::incr(&CACHE_METRICS.misses_total),
            },
            Ok(None) => {
                CacheMetrics::incr(&CACHE_METRICS.misses_total);
                debug!(%subject_id, %service, "attribute cache miss");
            }
            Err(e) if auto_refresh => {
                warn!(%subject_id, %service, error = %e, "attribute cache read failed, recomputing");
            }
            Err(e) => return Err(e),
        }

        if !auto_refresh {
            return Ok(None);
        }

        match self.refresh(subject_id, service).await {
            Ok(attrs) => Ok(Some(attrs)),
            Err(e) => {
                warn!(%subject_id, %service, error = %e, "attribute refresh failed, treating as not found");
                Ok(None)
            }
        }
    }

    /// Writes an attribute set with `ttl`, or the configured default TTL.
    ///
    /// The TTL never extends past the set's expiry bound. A set that is
    /// already stale is not written.
    pub async fn set(&self, attrs: &AttributeSet, ttl: Option<Duration>) -> Result<()> {
        let mut ttl = ttl.unwrap_or(self.settings.ttl);
        if let Some(expires_at) = attrs.expires_at {
            match (expires_at - Utc::now()).to_std() {
                Ok(remaining) if !remaining.is_zero() => ttl = ttl.min(remaining),
                _ => {
                    debug!(subject_id = %attrs.subject_id, service = %attrs.service, "attribute set already expired, not cached");
                    return Ok(());
                }
            }
        }

        let key = self.keys.attribute_set(attrs.subject_id, &attrs.service);
        let payload = serde_json::to_string(attrs)?;
        self.timed(self.store.set_ex(&key, payload, ttl)).await
    }

    /// Recomputes the attribute set from the source of record and writes it
    /// through the cache.
    ///
    /// A failed write is logged and the computed set is still returned.
    /// Concurrent refreshes of the same key are harmless; the last write wins.
    pub async fn refresh(&self, subject_id: SubjectId, service: &ServiceName) -> Result<AttributeSet> {
        let attrs = match self.loader.load(subject_id, service).await {
            Ok(attrs) => attrs,
            Err(e) => {
                CacheMetrics::incr(&CACHE_METRICS.refresh_failures_total);
                return Err(e.into());
            }
        };
        CacheMetrics::incr(&CACHE_METRICS.refreshes_total);

        if let Err(e) = self.set(&attrs, None).await {
            warn!(%subject_id, %service, error = %e, "failed to write refreshed attribute set");
        } else {
            debug!(%subject_id, %service, roles = attrs.roles.len(), "attribute set refreshed");
        }
        Ok(attrs)
    }

    /// Deletes the entry of `subject_id` in `service`, or every service entry
    /// of the subject when `service` is `None`.
    pub async fn invalidate(
        &self,
        subject_id: SubjectId,
        service: Option<&ServiceName>,
    ) -> Result<usize> {
        self.invalidate_many(&[InvalidationTarget {
            subject_id,
            service: service.cloned(),
        }])
        .await
    }

    /// Deletes all targeted entries in a single store operation and publishes
    /// one [`InvalidationEvent`] for the batch.
    ///
    /// Returns the number of entries that existed.
    pub async fn invalidate_many(&self, targets: &[InvalidationTarget]) -> Result<usize> {
        if targets.is_empty() {
            return Ok(0);
        }

        let mut keys = Vec::with_capacity(targets.len());
        for target in targets {
            match &target.service {
                Some(service) => keys.push(self.keys.attribute_set(target.subject_id, service)),
                None => {
                    let prefix = self.keys.subject_prefix(target.subject_id);
                    keys.extend(self.timed(self.store.keys_with_prefix(&prefix)).await?);
                }
            }
        }
        keys.sort_unstable();
        keys.dedup();

        let removed = if keys.is_empty() {
            0
        } else {
            self.timed(self.store.delete_many(&keys)).await?
        };
        CacheMetrics::add(&CACHE_METRICS.invalidations_total, removed as u64);
        info!(targets = targets.len(), removed, "invalidated attribute cache entries");

        let event = InvalidationEvent {
            targets: targets.to_vec(),
        };
        if let Err(e) = self.publish(&event).await {
            warn!(error = %e, "failed to publish invalidation event");
        }
        Ok(removed)
    }

    /// Subscribes to invalidation events from every client sharing the store.
    pub async fn subscribe_invalidations(&self) -> Result<InvalidationSubscription> {
        let rx = self
            .timed(self.store.subscribe(&self.settings.invalidation_channel))
            .await?;
        Ok(InvalidationSubscription::new(rx))
    }

    /// Liveness probe against the store.
    pub async fn health_check(&self) -> Result<()> {
        self.timed(self.store.ping()).await
    }

    async fn publish(&self, event: &InvalidationEvent) -> Result<usize> {
        let payload = serde_json::to_string(event)?;
        self.timed(
            self.store
                .publish(&self.settings.invalidation_channel, payload),
        )
        .await
    }

    async fn timed<T>(&self, op: impl Future<Output = Result<T>>) -> Result<T> {
        let outcome = match tokio::time::timeout(self.settings.timeout, op).await {
            Ok(result) => result,
            Err(_) => Err(CacheError::Timeout(self.settings.timeout)),
        };
        if outcome.as_ref().is_err_and(CacheError::is_store_failure) {
            CacheMetrics::incr(&CACHE_METRICS.store_failures_total);
        }
        outcome
    }
}

/// Decodes a stored entry, rejecting entries that do not belong to the key.
fn decode_entry(raw: &str, subject_id: SubjectId, service: &ServiceName) -> Option<AttributeSet> {
    match serde_json::from_str::<AttributeSet>(raw) {
        Ok(attrs) if attrs.subject_id == subject_id && &attrs.service == service => Some(attrs),
        Ok(_) => {
            warn!(%subject_id, %service, "discarding cache entry stored under the wrong key");
            None
        }
        Err(e) => {
            warn!(%subject_id, %service, error = %e, "discarding undecodable cache entry");
            None
        }
    }
}
