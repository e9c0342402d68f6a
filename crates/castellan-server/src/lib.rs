//! # castellan-server: HTTP surface of the authorization core
//!
//! ```text
//!  request ──► TraceLayer ──► attach_identity ──► handler
//!                                  │                 │
//!                    verify JWT, cache.get(...)      ├─► Admin (grant, revoke, manifests)
//!                                  │                 └─► DecisionEvaluator (/v1/check)
//!                                  ▼
//!                           IdentityContext
//! ```
//!
//! Identity lookups never fail a request: a broken cache or source of record
//! leaves the caller with no attributes, and checks requiring attributes deny.

pub mod api;
pub mod app;
pub mod catalog;
pub mod error;
pub mod identity;

pub use app::{ADMIN_ACTIONS, AppState, build_router};
pub use catalog::{ADMIN_POLICY, BUILTIN_POLICIES, EntityCatalog, build_registry, policy_from_spec};
pub use error::{ApiError, ErrorBody, ServerError, ServerResult};
pub use identity::{Claims, IdentityContext, IdentityResolver, JwtConfig, attach_identity};
