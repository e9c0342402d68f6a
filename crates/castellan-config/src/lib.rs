//! Configuration management for Castellan
//!
//! Provides hierarchical configuration loading from multiple sources:
//! 1. CLI arguments (highest precedence, applied by the binary)
//! 2. Environment variables (`CASTELLAN_<SECTION>__<KEY>`)
//! 3. castellan.local.toml (not checked in, local overrides)
//! 4. castellan.toml (project config)
//! 5. ~/.config/castellan/config.toml (user defaults)
//! 6. Built-in defaults (lowest precedence)

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

mod error;
mod loader;
mod paths;

pub use error::ConfigError;
pub use loader::ConfigLoader;
pub use paths::Paths;

/// Main Castellan configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CastellanConfig {
    pub service: ServiceConfig,
    pub server: ServerConfig,
    pub cache: CacheConfig,
    pub source: SourceConfig,
    pub propagation: PropagationConfig,
    pub auth: AuthConfig,
    pub logging: LoggingConfig,
    /// Declarative policies, by name.
    pub policies: BTreeMap<String, PolicySpec>,
    /// Policy tables of runtime entity types: entity type -> action -> policy name.
    pub entities: BTreeMap<String, BTreeMap<String, String>>,
}

/// Identity of the host service; identity lookups are keyed by this name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub name: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: "castellan".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_address: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1:8420".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub ttl_secs: u64,
    /// Must stay below one second.
    pub read_timeout_ms: u64,
    pub key_prefix: String,
    pub invalidation_channel: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 24 * 60 * 60,
            read_timeout_ms: 250,
            key_prefix: "authz".to_string(),
            invalidation_channel: "authz:invalidations".to_string(),
        }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }
}

/// Source-of-record call budget during refresh.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    pub timeout_ms: u64,
    pub max_attempts: u32,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 1000,
            max_attempts: 2,
        }
    }
}

impl SourceConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Attempts clamped to `1..=2`.
    pub fn attempts(&self) -> u32 {
        self.max_attempts.clamp(1, 2)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PropagationConfig {
    /// Recompute invalidated entries right away instead of on the next read.
    pub eager_refresh: bool,
    /// Period of the expiry sweep. Unset disables the sweep.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sweep_interval_secs: Option<u64>,
}

impl PropagationConfig {
    pub fn sweep_interval(&self) -> Option<Duration> {
        self.sweep_interval_secs
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }
}

/// Identity token verification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// HMAC secret for HS256 tokens.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jwt_secret: Option<String>,
    pub issuer: String,
    pub audience: Vec<String>,
    pub leeway_secs: u64,
    /// Role in `service.name` required by administrative endpoints. Unset
    /// leaves them ungated.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub admin_role: Option<String>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: None,
            issuer: "castellan".to_string(),
            audience: vec!["castellan".to_string()],
            leeway_secs: 30,
            admin_role: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `tracing-subscriber` filter directive; `RUST_LOG` takes precedence.
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
        }
    }
}

/// A policy assembled from the standard building blocks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PolicySpec {
    AllowAll,
    DenyAll,
    RequireRole { role: String },
    /// The role held globally or granted on the checked resource.
    RequireRoleOnResource { role: String },
    RequireAnyRole { roles: Vec<String> },
    Owner { field: String },
    AttributeMatch { subject: String, resource: String },
}

impl CastellanConfig {
    /// Load configuration from default locations
    pub fn load() -> Result<Self> {
        ConfigLoader::new().load()
    }

    /// Load configuration from specific project directory
    pub fn load_from_dir(project_dir: impl AsRef<Path>) -> Result<Self> {
        ConfigLoader::new().with_project_dir(project_dir).load()
    }

    /// Checks the settings every component relies on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.service.name.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "service.name must not be empty".to_string(),
            ));
        }
        if self.cache.ttl_secs == 0 {
            return Err(ConfigError::ValidationError(
                "cache.ttl_secs must be greater than zero".to_string(),
            ));
        }
        if self.cache.read_timeout_ms == 0 || self.cache.read_timeout_ms >= 1000 {
            return Err(ConfigError::ValidationError(format!(
                "cache.read_timeout_ms must be between 1 and 999, got {}",
                self.cache.read_timeout_ms
            )));
        }
        if let Some((entity, _)) = self.entities.iter().find(|(_, actions)| actions.is_empty()) {
            return Err(ConfigError::ValidationError(format!(
                "entities.{entity} maps no actions"
            )));
        }
        if self.source.timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "source.timeout_ms must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// [`validate`](Self::validate) plus the settings only the server needs.
    pub fn validate_for_serve(&self) -> Result<(), ConfigError> {
        self.validate()?;
        if self
            .auth
            .jwt_secret
            .as_deref()
            .is_none_or(|secret| secret.trim().is_empty())
        {
            return Err(ConfigError::ValidationError(
                "auth.jwt_secret is required to serve".to_string(),
            ));
        }
        Ok(())
    }

    /// Renders the resolved configuration with the JWT secret masked.
    pub fn to_redacted_toml(&self) -> Result<String, ConfigError> {
        let mut shown = self.clone();
        if shown.auth.jwt_secret.is_some() {
            shown.auth.jwt_secret = Some("<redacted>".to_string());
        }
        Ok(toml::to_string_pretty(&shown)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    fn with_secret() -> CastellanConfig {
        let mut config = CastellanConfig::default();
        config.auth.jwt_secret = Some("s3cret".to_string());
        config
    }

    #[test]
    fn test_default_config() {
        let config = CastellanConfig::default();
        assert_eq!(config.service.name, "castellan");
        assert_eq!(config.server.bind_address, "127.0.0.1:8420");
        assert_eq!(config.cache.ttl(), Duration::from_secs(86_400));
        assert_eq!(config.cache.read_timeout(), Duration::from_millis(250));
        assert_eq!(config.cache.invalidation_channel, "authz:invalidations");
        assert_eq!(config.source.attempts(), 2);
        assert!(!config.propagation.eager_refresh);
        assert_eq!(config.propagation.sweep_interval(), None);
        assert_eq!(config.auth.audience, vec!["castellan".to_string()]);
        assert!(config.validate().is_ok());
    }

    #[test_case(0, 1 ; "zero clamps up")]
    #[test_case(1, 1 ; "one")]
    #[test_case(2, 2 ; "two")]
    #[test_case(9, 2 ; "large clamps down")]
    fn test_attempts_are_clamped(configured: u32, expected: u32) {
        let source = SourceConfig {
            max_attempts: configured,
            ..SourceConfig::default()
        };
        assert_eq!(source.attempts(), expected);
    }

    #[test_case(|c: &mut CastellanConfig| c.cache.read_timeout_ms = 1000 ; "read timeout of one second")]
    #[test_case(|c: &mut CastellanConfig| c.cache.read_timeout_ms = 0 ; "zero read timeout")]
    #[test_case(|c: &mut CastellanConfig| c.cache.ttl_secs = 0 ; "zero ttl")]
    #[test_case(|c: &mut CastellanConfig| c.service.name = "  ".to_string() ; "blank service name")]
    #[test_case(|c: &mut CastellanConfig| c.source.timeout_ms = 0 ; "zero source timeout")]
    fn test_invalid_settings_are_rejected(mutate: fn(&mut CastellanConfig)) {
        let mut config = with_secret();
        mutate(&mut config);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ValidationError(_))
        ));
    }

    #[test]
    fn test_serve_requires_secret() {
        let config = CastellanConfig::default();
        assert!(config.validate().is_ok());
        assert!(matches!(
            config.validate_for_serve(),
            Err(ConfigError::ValidationError(msg)) if msg.contains("jwt_secret")
        ));
        assert!(with_secret().validate_for_serve().is_ok());
    }

    #[test]
    fn test_policy_specs_parse_from_toml() {
        let config: CastellanConfig = toml::from_str(
            r#"
[policies.billing_admin]
kind = "require_role"
role = "billing_admin"

[policies.invoice_editor]
kind = "require_role_on_resource"
role = "invoice_editor"

[policies.own_invoice]
kind = "attribute_match"
subject = "customer_ids"
resource = "customerId"

[entities.invoice]
read = "own_invoice"
delete = "billing_admin"
"#,
        )
        .unwrap();

        assert_eq!(
            config.policies["billing_admin"],
            PolicySpec::RequireRole {
                role: "billing_admin".to_string()
            }
        );
        assert_eq!(
            config.policies["invoice_editor"],
            PolicySpec::RequireRoleOnResource {
                role: "invoice_editor".to_string()
            }
        );
        assert_eq!(config.entities["invoice"]["read"], "own_invoice");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_entity_without_actions_is_rejected() {
        let mut config = CastellanConfig::default();
        config.entities.insert("invoice".to_string(), BTreeMap::new());
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ValidationError(msg)) if msg.contains("invoice")
        ));
    }

    #[test]
    fn test_zero_sweep_interval_disables_sweep() {
        let propagation = PropagationConfig {
            eager_refresh: false,
            sweep_interval_secs: Some(0),
        };
        assert_eq!(propagation.sweep_interval(), None);
    }

    #[test]
    fn test_redacted_toml_hides_secret() {
        let rendered = with_secret().to_redacted_toml().unwrap();
        assert!(!rendered.contains("s3cret"));
        assert!(rendered.contains("<redacted>"));

        let parsed: CastellanConfig = toml::from_str(&rendered).unwrap();
        assert_eq!(parsed.cache, CacheConfig::default());
    }
}
