//! # castellan-policy: Policy registry and decision evaluator
//!
//! Policies are pure functions of `(attribute set, resource, action)`. They
//! are registered once at startup, frozen, and looked up by name through a
//! per-entity-type [`PolicyTable`].
//!
//! ```text
//! ┌──────────────┐   action    ┌─────────────┐   name    ┌────────────────┐
//! │ Protectable  │ ──────────► │ PolicyTable │ ────────► │ PolicyRegistry │
//! │  resource    │             └─────────────┘           └───────┬────────┘
//! └──────────────┘                                               │ Policy
//!        │                                                       ▼
//!        │            ┌───────────────────┐  evaluate  ┌──────────────────┐
//!        └──────────► │ DecisionEvaluator │ ─────────► │ allow / deny     │
//!   AttributeSet ───► │ (deny by default) │            │ + StoragePredicate│
//!                     └───────────────────┘            └──────────────────┘
//! ```
//!
//! Unmapped actions, unknown policy names, missing attribute sets and policy
//! failures all resolve to deny. Policy failures are logged and counted in
//! [`metrics::METRICS`] so they stay distinguishable from ordinary denials.

pub mod evaluator;
pub mod metrics;
pub mod predicate;
pub mod registry;
pub mod standard;

pub use evaluator::{DecisionEvaluator, ListScope, Outcome, PolicyTable, Protectable};
pub use predicate::{FilterOperator, PredicateError, RowFilter, StoragePredicate};
pub use registry::{Policy, PolicyError, PolicyFn, PolicyRegistry, PolicyRegistryBuilder, RegistryError};
pub use standard::StandardPolicies;
