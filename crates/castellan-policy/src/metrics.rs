//! Decision metrics.
//!
//! Policy denials and policy failures resolve to the same caller-visible deny.
//! The counters here keep them apart for operators.

use std::sync::atomic::{AtomicU64, Ordering};

/// Global decision metrics instance.
pub static METRICS: DecisionMetrics = DecisionMetrics::new();

/// Counters for evaluator outcomes.
#[derive(Debug)]
pub struct DecisionMetrics {
    allowed_total: AtomicU64,
    denied_total: AtomicU64,
    /// Action has no policy mapping for the entity type.
    unmapped_total: AtomicU64,
    /// Mapped policy name is not registered.
    unknown_policy_total: AtomicU64,
    /// No attribute set was available for the subject.
    no_attributes_total: AtomicU64,
    /// Policy returned an error or panicked.
    policy_errors_total: AtomicU64,
}

impl DecisionMetrics {
    pub const fn new() -> Self {
        Self {
            allowed_total: AtomicU64::new(0),
            denied_total: AtomicU64::new(0),
            unmapped_total: AtomicU64::new(0),
            unknown_policy_total: AtomicU64::new(0),
            no_attributes_total: AtomicU64::new(0),
            policy_errors_total: AtomicU64::new(0),
        }
    }

    pub(crate) fn record(&self, outcome: crate::evaluator::Outcome) {
        use crate::evaluator::Outcome;

        let counter = match outcome {
            Outcome::Allowed => &self.allowed_total,
            Outcome::Denied => &self.denied_total,
            Outcome::Unmapped => &self.unmapped_total,
            Outcome::UnknownPolicy => &self.unknown_policy_total,
            Outcome::NoAttributes => &self.no_attributes_total,
            Outcome::PolicyFailed => &self.policy_errors_total,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Exports all counters in Prometheus exposition format.
    pub fn export_prometheus(&self) -> String {
        use std::fmt::Write;

        let mut output = String::new();
        let _ = write!(
            output,
            "# HELP castellan_decisions_total Authorization decisions by outcome\n\
             # TYPE castellan_decisions_total counter\n"
        );
        for (outcome, counter) in [
            ("allowed", &self.allowed_total),
            ("denied", &self.denied_total),
            ("unmapped", &self.unmapped_total),
            ("unknown_policy", &self.unknown_policy_total),
            ("no_attributes", &self.no_attributes_total),
        ] {
            let _ = writeln!(
                output,
                "castellan_decisions_total{{outcome=\"{outcome}\"}} {}",
                counter.load(Ordering::Relaxed)
            );
        }

        let _ = write!(
            output,
            "# HELP castellan_policy_errors_total Policy evaluations that failed and resolved to deny\n\
             # TYPE castellan_policy_errors_total counter\n\
             castellan_policy_errors_total {}\n",
            self.policy_errors_total.load(Ordering::Relaxed)
        );

        output
    }

    /// Returns a snapshot of all counters.
    pub fn snapshot(&self) -> DecisionMetricsSnapshot {
        DecisionMetricsSnapshot {
            allowed_total: self.allowed_total.load(Ordering::Relaxed),
            denied_total: self.denied_total.load(Ordering::Relaxed),
            unmapped_total: self.unmapped_total.load(Ordering::Relaxed),
            unknown_policy_total: self.unknown_policy_total.load(Ordering::Relaxed),
            no_attributes_total: self.no_attributes_total.load(Ordering::Relaxed),
            policy_errors_total: self.policy_errors_total.load(Ordering::Relaxed),
        }
    }
}

impl Default for DecisionMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time copy of [`DecisionMetrics`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecisionMetricsSnapshot {
    pub allowed_total: u64,
    pub denied_total: u64,
    pub unmapped_total: u64,
    pub unknown_policy_total: u64,
    pub no_attributes_total: u64,
    pub policy_errors_total: u64,
}
