//! Configuration management.

use serde::Deserialize;

use crate::error::{Result, TaskgateError};
use crate::rbac::catalog::PermissionCatalog;

/// Main application configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Database configuration
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Authentication configuration
    #[serde(default)]
    pub auth: AuthConfig,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,

    /// Permission catalog and role specs
    #[serde(default)]
    pub rbac: RbacConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// HTTP server host
    #[serde(default = "default_host")]
    pub host: String,

    /// HTTP server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Audit the client address from `X-Forwarded-For` / `X-Real-IP`
    #[serde(default)]
    pub trust_proxy_headers: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            trust_proxy_headers: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL. Without one the in-memory store is used.
    pub url: Option<String>,

    /// Maximum number of connections
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Minimum number of connections
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,

    /// Seconds to wait for a pooled connection
    #[serde(default = "default_acquire_timeout_secs")]
    pub acquire_timeout_secs: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: default_max_connections(),
            min_connections: default_min_connections(),
            acquire_timeout_secs: default_acquire_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    /// HS256 signing secret; required to verify or issue tokens
    #[serde(default)]
    pub jwt_secret: Option<String>,

    /// Lifetime of tokens issued by the CLI
    #[serde(default = "default_token_ttl_secs")]
    pub token_ttl_secs: i64,

    /// Clock skew tolerated when validating `exp`
    #[serde(default = "default_leeway_secs")]
    pub leeway_secs: u64,

    /// Cookie consulted when no `Authorization` header is present
    #[serde(default = "default_cookie_name")]
    pub cookie_name: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: None,
            token_ttl_secs: default_token_ttl_secs(),
            leeway_secs: default_leeway_secs(),
            cookie_name: default_cookie_name(),
        }
    }
}

impl AuthConfig {
    pub fn token_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.token_ttl_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ObservabilityConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable JSON logging
    #[serde(default = "default_json_logging")]
    pub json_logging: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json_logging: default_json_logging(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RbacConfig {
    /// Replaces the built-in catalog when present
    pub catalog: Option<PermissionCatalog>,
}

impl RbacConfig {
    pub fn catalog(&self) -> PermissionCatalog {
        self.catalog.clone().unwrap_or_else(PermissionCatalog::builtin)
    }
}

// Default value functions
fn default_host() -> String { "0.0.0.0".to_string() }
fn default_port() -> u16 { 5000 }
fn default_max_connections() -> u32 { 20 }
fn default_min_connections() -> u32 { 2 }
fn default_acquire_timeout_secs() -> u64 { 5 }
fn default_token_ttl_secs() -> i64 { 30 * 24 * 60 * 60 }
fn default_leeway_secs() -> u64 { 30 }
fn default_cookie_name() -> String { "token".to_string() }
fn default_log_level() -> String { "info".to_string() }
fn default_json_logging() -> bool { false }

impl Config {
    /// Load configuration from the environment, optionally layered over a file.
    pub fn load(path: Option<&str>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path));
        }

        let cfg: Config = builder
            .add_source(config::Environment::with_prefix("TASKGATE").separator("__"))
            .build()?
            .try_deserialize()?;

        cfg.validate()?;
        Ok(cfg)
    }

    /// Reject catalogs that would seed an inconsistent graph and blank
    /// signing secrets.
    pub fn validate(&self) -> Result<()> {
        if matches!(&self.auth.jwt_secret, Some(secret) if secret.trim().is_empty()) {
            return Err(TaskgateError::configuration("auth.jwt_secret cannot be blank"));
        }
        if let Some(catalog) = &self.rbac.catalog {
            catalog.validate().map_err(|e| {
                TaskgateError::configuration(format!("Invalid permission catalog: {}", e))
            })?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use crate::rbac::catalog::RoleSpec;
    use crate::rbac::models::PermissionName;

    #[test]
    fn test_defaults() {
        let cfg = Config::default();
        assert_eq!(cfg.server.port, 5000);
        assert!(!cfg.server.trust_proxy_headers);
        assert!(cfg.database.url.is_none());
        assert_eq!(cfg.auth.cookie_name, "token");
        assert_eq!(cfg.rbac.catalog(), PermissionCatalog::builtin());
    }

    #[test]
    fn test_invalid_catalog_rejected() {
        let mut cfg = Config::default();
        cfg.rbac.catalog = Some(PermissionCatalog::new(
            vec![PermissionName::from("GET_TASKS")],
            vec![RoleSpec::new("USER", "User").with_permissions(["FLY_TASK"])],
        ));

        let err = cfg.validate().unwrap_err();
        assert_eq!(err.code(), ErrorCode::ConfigurationError);
    }

    #[test]
    fn test_blank_secret_rejected() {
        let mut cfg = Config::default();
        assert!(cfg.auth.jwt_secret.is_none());
        cfg.validate().unwrap();

        cfg.auth.jwt_secret = Some("  ".to_string());
        let err = cfg.validate().unwrap_err();
        assert_eq!(err.code(), ErrorCode::ConfigurationError);
    }

    #[test]
    fn test_token_ttl() {
        let auth = AuthConfig {
            token_ttl_secs: 60,
            ..AuthConfig::default()
        };
        assert_eq!(auth.token_ttl(), chrono::Duration::seconds(60));
    }
}
