//! Change propagation.
//!
//! Mutating operations call [`ChangePropagator`] explicitly after writing to
//! the source of record. The propagator invalidates the affected cache
//! entries and, when eager refresh is on, repopulates them.
//!
//! Propagation never fails the mutation that triggered it: the write is
//! already committed, so cache errors are logged and reported in the
//! returned [`Propagation`].

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use castellan_cache::{AttributeCacheClient, InvalidationSubscription, InvalidationTarget};
use castellan_types::{ServiceName, SubjectId};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::error::SourceError;
use crate::source::SourceOfRecord;

/// What a propagation did to the cache.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Propagation {
    /// Cache entries removed.
    pub invalidated: usize,
    /// Entries eagerly recomputed.
    pub refreshed: usize,
    /// True when invalidation could not be performed; affected entries stay
    /// stale until they expire.
    pub failed: bool,
}

/// Invalidates cache entries affected by source-of-record mutations.
#[derive(Clone)]
pub struct ChangePropagator {
    cache: AttributeCacheClient,
    source: Arc<dyn SourceOfRecord>,
    eager_refresh: bool,
}

impl std::fmt::Debug for ChangePropagator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangePropagator")
            .field("eager_refresh", &self.eager_refresh)
            .finish_non_exhaustive()
    }
}

impl ChangePropagator {
    pub fn new(cache: AttributeCacheClient, source: Arc<dyn SourceOfRecord>) -> Self {
        Self {
            cache,
            source,
            eager_refresh: false,
        }
    }

    pub fn with_eager_refresh(mut self, eager_refresh: bool) -> Self {
        self.eager_refresh = eager_refresh;
        self
    }

    pub fn cache(&self) -> &AttributeCacheClient {
        &self.cache
    }

    /// A role assignment or attribute value of `subject_id` changed.
    ///
    /// `service` is `None` for changes that affect every service of the
    /// subject (global attributes).
    pub async fn subject_changed(
        &self,
        subject_id: SubjectId,
        service: Option<&ServiceName>,
    ) -> Propagation {
        self.invalidate(
            vec![InvalidationTarget {
                subject_id,
                service: service.cloned(),
            }],
            self.eager_refresh,
        )
        .await
    }

    /// A service was activated or deactivated.
    ///
    /// Every subject holding a role in the service is invalidated in one
    /// batched store operation. No eager refresh: entries repopulate on their
    /// next read.
    pub async fn service_changed(&self, service: &ServiceName) -> Propagation {
        let subjects = match self.source.subjects_in_service(service).await {
            Ok(subjects) => subjects,
            Err(e) => {
                error!(%service, error = %e, "cannot list subjects for service invalidation");
                return Propagation {
                    failed: true,
                    ..Propagation::default()
                };
            }
        };
        let targets = subjects
            .into_iter()
            .map(|subject_id| InvalidationTarget {
                subject_id,
                service: Some(service.clone()),
            })
            .collect();
        self.invalidate(targets, false).await
    }

    /// Invalidates a batch of targets in one store operation.
    pub async fn invalidate(&self, targets: Vec<InvalidationTarget>, eager: bool) -> Propagation {
        if targets.is_empty() {
            return Propagation::default();
        }

        let mut outcome = match self.cache.invalidate_many(&targets).await {
            Ok(invalidated) => Propagation {
                invalidated,
                ..Propagation::default()
            },
            Err(e) => {
                error!(targets = targets.len(), error = %e, "cache invalidation failed");
                return Propagation {
                    failed: true,
                    ..Propagation::default()
                };
            }
        };

        if eager {
            for target in &targets {
                let Some(service) = &target.service else {
                    continue;
                };
                match self.cache.refresh(target.subject_id, service).await {
                    Ok(_) => outcome.refreshed += 1,
                    Err(e) => {
                        warn!(subject_id = %target.subject_id, %service, error = %e, "eager refresh failed");
                    }
                }
            }
        }
        outcome
    }
}

/// Repopulates this service's entries whenever another process invalidates
/// them. Returns when the subscription closes.
pub async fn refresh_on_invalidation(
    cache: AttributeCacheClient,
    service: ServiceName,
    mut subscription: InvalidationSubscription,
) {
    info!(%service, "eager refresh listener started");
    while let Some(event) = subscription.next().await {
        for subject_id in event.subjects_for(&service) {
            if let Err(e) = cache.refresh(subject_id, &service).await {
                debug!(%subject_id, %service, error = %e, "eager refresh after invalidation failed");
            }
        }
    }
    info!(%service, "eager refresh listener stopped");
}

/// Periodically invalidates entries whose assignments expired since the
/// previous sweep.
///
/// Expiry is always evaluated at read time; the sweep only shortens how
/// long an expired role lingers in an unexpired cache entry.
#[derive(Clone)]
pub struct ExpirySweeper {
    source: Arc<dyn SourceOfRecord>,
    propagator: ChangePropagator,
    interval: Duration,
}

impl std::fmt::Debug for ExpirySweeper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExpirySweeper")
            .field("interval", &self.interval)
            .finish_non_exhaustive()
    }
}

impl ExpirySweeper {
    pub fn new(
        source: Arc<dyn SourceOfRecord>,
        propagator: ChangePropagator,
        interval: Duration,
    ) -> Self {
        Self {
            source,
            propagator,
            interval,
        }
    }

    /// Invalidates entries of assignments expiring in `(after, up_to]`.
    /// Returns the number of (subject, service) pairs invalidated.
    pub async fn sweep(
        &self,
        after: DateTime<Utc>,
        up_to: DateTime<Utc>,
    ) -> Result<usize, SourceError> {
        let mut pairs = BTreeSet::new();
        for assignment in self.source.assignments_expiring(after, up_to).await? {
            if let Some(role) = self.source.get_role(assignment.role_id).await? {
                pairs.insert((assignment.subject_id, role.service));
            }
        }

        let count = pairs.len();
        let targets = pairs
            .into_iter()
            .map(|(subject_id, service)| InvalidationTarget {
                subject_id,
                service: Some(service),
            })
            .collect();
        self.propagator.invalidate(targets, false).await;
        Ok(count)
    }

    /// Runs the sweep every interval until the task is aborted.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut last = Utc::now();
            loop {
                ticker.tick().await;
                let now = Utc::now();
                match self.sweep(last, now).await {
                    Ok(count) => {
                        if count > 0 {
                            info!(count, "expired assignments invalidated");
                        }
                        last = now;
                    }
                    // Keep the window open so the next sweep covers it.
                    Err(e) => warn!(error = %e, "expiry sweep failed"),
                }
            }
        })
    }
}
