//! Identity context propagation.
//!
//! Every inbound request passes through [`attach_identity`]. A bearer token is
//! verified (signature, expiry, issuer, audience), its numeric `sub` claim is
//! taken as the subject id and the subject's attribute set for this service
//! is looked up through the cache. Only the subject id is trusted; other
//! claims never feed authorization decisions.
//!
//! - No token: the request proceeds as anonymous, no lookup is attempted.
//! - Invalid token: 401.
//! - Lookup failure: logged, the request proceeds with no attributes.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{FromRequestParts, Request, State};
use axum::http::HeaderMap;
use axum::http::request::Parts;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use castellan_cache::AttributeCacheClient;
use castellan_config::{AuthConfig, ConfigError};
use castellan_types::{AttributeSet, ServiceName, SubjectId};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{ServerError, ServerResult, api_unauthorized};

/// HS256 token verification settings.
#[derive(Clone)]
pub struct JwtConfig {
    secret: String,
    pub issuer: String,
    pub audience: Vec<String>,
    /// Clock skew tolerated on `exp`, in seconds.
    pub leeway_secs: u64,
    /// Lifetime of tokens minted by [`create_token`](Self::create_token).
    pub expiration: Duration,
}

impl fmt::Debug for JwtConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JwtConfig")
            .field("issuer", &self.issuer)
            .field("audience", &self.audience)
            .field("leeway_secs", &self.leeway_secs)
            .finish_non_exhaustive()
    }
}

impl JwtConfig {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
            issuer: "castellan".to_string(),
            audience: vec!["castellan".to_string()],
            leeway_secs: 30,
            expiration: Duration::from_secs(3600),
        }
    }

    /// Builds the verifier from the `[auth]` section. The secret is required.
    pub fn from_config(auth: &AuthConfig) -> ServerResult<Self> {
        let secret = auth
            .jwt_secret
            .clone()
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| {
                ConfigError::ValidationError("auth.jwt_secret is required to serve".to_string())
            })?;
        Ok(Self {
            issuer: auth.issuer.clone(),
            audience: auth.audience.clone(),
            leeway_secs: auth.leeway_secs,
            ..Self::new(secret)
        })
    }

    /// Mints a token for `subject_id`. Used by tooling and tests.
    pub fn create_token(&self, subject_id: SubjectId) -> Result<String, jsonwebtoken::errors::Error> {
        let now = jsonwebtoken::get_current_timestamp();
        self.sign(&Claims {
            sub: subject_id.to_string(),
            iat: now,
            exp: now + self.expiration.as_secs(),
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
        })
    }

    pub fn sign(&self, claims: &Claims) -> Result<String, jsonwebtoken::errors::Error> {
        encode(
            &Header::new(Algorithm::HS256),
            claims,
            &EncodingKey::from_secret(self.secret.as_bytes()),
        )
    }

    /// Verifies `token` and returns its subject id.
    pub fn verify(&self, token: &str) -> ServerResult<SubjectId> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[&self.issuer]);
        validation.set_audience(&self.audience);
        validation.leeway = self.leeway_secs;

        let data = decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.secret.as_bytes()),
            &validation,
        )
        .map_err(|e| ServerError::Unauthorized(format!("invalid JWT: {e}")))?;

        data.claims
            .sub
            .parse::<u64>()
            .map(SubjectId::new)
            .map_err(|_| ServerError::Unauthorized("subject is not a numeric id".to_string()))
    }
}

/// JWT claims. `sub` carries the numeric subject id as a string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub iat: u64,
    pub exp: u64,
    pub iss: String,
    pub aud: Vec<String>,
}

/// The caller's identity as attached to the request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IdentityContext {
    /// `None` for anonymous requests.
    pub subject_id: Option<SubjectId>,
    /// `None` when anonymous or when the lookup failed or found nothing.
    pub attributes: Option<AttributeSet>,
}

impl IdentityContext {
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn is_anonymous(&self) -> bool {
        self.subject_id.is_none()
    }

    pub fn attributes(&self) -> Option<&AttributeSet> {
        self.attributes.as_ref()
    }
}

impl<S: Send + Sync> FromRequestParts<S> for IdentityContext {
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(parts
            .extensions
            .get::<IdentityContext>()
            .cloned()
            .unwrap_or_default())
    }
}

/// Resolves bearer tokens into [`IdentityContext`]s for one host service.
pub struct IdentityResolver {
    jwt: JwtConfig,
    cache: AttributeCacheClient,
    service: ServiceName,
}

impl fmt::Debug for IdentityResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdentityResolver")
            .field("service", &self.service)
            .field("jwt", &self.jwt)
            .finish_non_exhaustive()
    }
}

impl IdentityResolver {
    pub fn new(jwt: JwtConfig, cache: AttributeCacheClient, service: ServiceName) -> Self {
        Self {
            jwt,
            cache,
            service,
        }
    }

    pub fn service(&self) -> &ServiceName {
        &self.service
    }

    /// Returns `Err` only for a present but invalid token.
    pub async fn resolve(&self, headers: &HeaderMap) -> ServerResult<IdentityContext> {
        let Some(token) = bearer_token(headers) else {
            return Ok(IdentityContext::anonymous());
        };
        let subject_id = self.jwt.verify(token)?;

        let attributes = match self.cache.get(subject_id, &self.service, true).await {
            Ok(found) => {
                if found.is_none() {
                    debug!(%subject_id, service = %self.service, "no attributes for subject");
                }
                found
            }
            Err(e) => {
                warn!(%subject_id, service = %self.service, error = %e, "attribute lookup failed");
                None
            }
        };

        Ok(IdentityContext {
            subject_id: Some(subject_id),
            attributes,
        })
    }
}

/// Middleware attaching an [`IdentityContext`] to every request.
pub async fn attach_identity(
    State(resolver): State<Arc<IdentityResolver>>,
    mut request: Request,
    next: Next,
) -> Response {
    let identity = match resolver.resolve(request.headers()).await {
        Ok(identity) => identity,
        Err(e) => {
            debug!(error = %e, "rejected identity token");
            return api_unauthorized("invalid identity token").into_response();
        }
    };
    request.extensions_mut().insert(identity);
    next.run(request).await
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(axum::http::header::AUTHORIZATION)?;
    let value = value.to_str().ok()?;
    value.strip_prefix("Bearer ").map(str::trim)
}
