//! Invalidation notifications published on the store's notify channel.

use castellan_types::{ServiceName, SubjectId};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::warn;

/// One invalidated cache scope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvalidationTarget {
    pub subject_id: SubjectId,
    /// `None` means every service entry of the subject.
    pub service: Option<ServiceName>,
}

/// A batch of invalidations performed as one store operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvalidationEvent {
    pub targets: Vec<InvalidationTarget>,
}

impl InvalidationEvent {
    /// Returns whether this event touches the entry of `subject_id` in `service`.
    pub fn affects(&self, subject_id: SubjectId, service: &ServiceName) -> bool {
        self.targets.iter().any(|t| {
            t.subject_id == subject_id && t.service.as_ref().is_none_or(|s| s == service)
        })
    }

    /// Subjects whose entry in `service` was invalidated, deduplicated.
    pub fn subjects_for(&self, service: &ServiceName) -> Vec<SubjectId> {
        let mut subjects: Vec<SubjectId> = self
            .targets
            .iter()
            .filter(|t| t.service.as_ref().is_none_or(|s| s == service))
            .map(|t| t.subject_id)
            .collect();
        subjects.sort_unstable();
        subjects.dedup();
        subjects
    }
}

/// Decoded stream of invalidation events.
#[derive(Debug)]
pub struct InvalidationSubscription {
    rx: broadcast::Receiver<String>,
}

impl InvalidationSubscription {
    pub(crate) fn new(rx: broadcast::Receiver<String>) -> Self {
        Self { rx }
    }

    /// Waits for the next event.
    ///
    /// Malformed payloads are skipped. Lagging past the channel buffer drops
    /// the missed events; affected entries still expire by TTL. Returns `None`
    /// once the channel is closed.
    pub async fn next(&mut self) -> Option<InvalidationEvent> {
        loop {
            match self.rx.recv().await {
                Ok(payload) => match serde_json::from_str(&payload) {
                    Ok(event) => return Some(event),
                    Err(e) => warn!(error = %e, "ignoring malformed invalidation event"),
                },
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!(missed, "invalidation subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}
