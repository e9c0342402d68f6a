//! HTTP application wiring: shared state, router and background tasks.

use std::sync::Arc;

use axum::Router;
use axum::middleware;
use axum::routing::{get, post, put};
use castellan_cache::{AttributeCacheClient, AttributeStore, CacheSettings};
use castellan_config::CastellanConfig;
use castellan_policy::{DecisionEvaluator, PolicyTable};
use castellan_registry::{
    Admin, AttributeRefresher, ChangePropagator, ExpirySweeper, SourceOfRecord,
    refresh_on_invalidation,
};
use castellan_types::ServiceName;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::api;
use crate::catalog::{ADMIN_POLICY, EntityCatalog, build_registry};
use crate::error::ServerResult;
use crate::identity::{IdentityResolver, JwtConfig, attach_identity};

/// Actions of the administrative entity type.
pub const ADMIN_ACTIONS: [&str; 7] = [
    "register_manifest",
    "refresh",
    "grant",
    "revoke",
    "set_attribute",
    "set_service_active",
    "inspect",
];

#[derive(Clone)]
pub struct AppState {
    pub service: ServiceName,
    pub admin: Admin,
    pub cache: AttributeCacheClient,
    pub evaluator: Arc<DecisionEvaluator>,
    pub entities: Arc<EntityCatalog>,
    pub identity: Arc<IdentityResolver>,
    /// `None` leaves administrative endpoints ungated.
    pub admin_table: Option<Arc<PolicyTable>>,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("service", &self.service)
            .field("admin_gated", &self.admin_table.is_some())
            .finish_non_exhaustive()
    }
}

impl AppState {
    /// Assembles every component from configuration over the given backends.
    pub fn from_config(
        config: &CastellanConfig,
        source: Arc<dyn SourceOfRecord>,
        store: Arc<dyn AttributeStore>,
    ) -> ServerResult<Self> {
        config.validate_for_serve()?;
        let service = ServiceName::new(config.service.name.clone())?;

        let refresher = AttributeRefresher::new(source.clone())
            .with_timeout(config.source.timeout())
            .with_max_attempts(config.source.attempts());
        let cache = AttributeCacheClient::new(
            store,
            Arc::new(refresher),
            CacheSettings {
                ttl: config.cache.ttl(),
                timeout: config.cache.read_timeout(),
                key_prefix: config.cache.key_prefix.clone(),
                invalidation_channel: config.cache.invalidation_channel.clone(),
            },
        );
        let propagator = ChangePropagator::new(cache.clone(), source.clone())
            .with_eager_refresh(config.propagation.eager_refresh);
        let admin = Admin::new(source, propagator);

        let registry = build_registry(config)?;
        let entities = EntityCatalog::from_config(config, &registry);

        let admin_table = if config.auth.admin_role.is_some() {
            let table = ADMIN_ACTIONS
                .iter()
                .fold(PolicyTable::new("castellan"), |table, action| {
                    table.action(*action, ADMIN_POLICY)
                });
            Some(Arc::new(table))
        } else {
            warn!("auth.admin_role is unset; administrative endpoints are ungated");
            None
        };

        let identity = IdentityResolver::new(
            JwtConfig::from_config(&config.auth)?,
            cache.clone(),
            service.clone(),
        );

        Ok(Self {
            service,
            admin,
            cache,
            evaluator: Arc::new(DecisionEvaluator::new(registry)),
            entities: Arc::new(entities),
            identity: Arc::new(identity),
            admin_table,
        })
    }

    /// Starts the eager-refresh listener and expiry sweep when configured.
    pub async fn spawn_background(&self, config: &CastellanConfig) -> Vec<JoinHandle<()>> {
        let mut tasks = Vec::new();

        if config.propagation.eager_refresh {
            match self.cache.subscribe_invalidations().await {
                Ok(subscription) => tasks.push(tokio::spawn(refresh_on_invalidation(
                    self.cache.clone(),
                    self.service.clone(),
                    subscription,
                ))),
                Err(e) => warn!(error = %e, "could not subscribe to invalidations"),
            }
        }

        if let Some(interval) = config.propagation.sweep_interval() {
            info!(?interval, "expiry sweep enabled");
            let sweeper = ExpirySweeper::new(
                self.admin.source().clone(),
                self.admin.propagator().clone(),
                interval,
            );
            tasks.push(sweeper.spawn());
        }

        tasks
    }
}

/// Builds the HTTP router.
///
/// System endpoints sit outside the identity layer so probes carrying a
/// stale `Authorization` header still get an answer.
pub fn build_router(state: AppState) -> Router {
    let identity = state.identity.clone();

    let system = Router::new()
        .route("/health", get(api::system::health))
        .route("/ready", get(api::system::ready))
        .route("/metrics", get(api::system::metrics));

    let v1 = Router::new()
        .route("/v1/manifests", post(api::registry::register_manifest))
        .route("/v1/refresh", post(api::registry::refresh))
        .route("/v1/assignments/grant", post(api::assignments::grant))
        .route("/v1/assignments/revoke", post(api::assignments::revoke))
        .route("/v1/attributes", put(api::assignments::set_attribute))
        .route(
            "/v1/subjects/{subject_id}/assignments",
            get(api::assignments::list_assignments),
        )
        .route(
            "/v1/services/{name}/activate",
            post(api::services::activate),
        )
        .route(
            "/v1/services/{name}/deactivate",
            post(api::services::deactivate),
        )
        .route("/v1/services/{name}/roles", get(api::services::list_roles))
        .route("/v1/policies", get(api::decisions::list_policies))
        .route("/v1/whoami", get(api::decisions::whoami))
        .route("/v1/check", post(api::decisions::check))
        .layer(middleware::from_fn_with_state(identity, attach_identity));

    system
        .merge(v1)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
