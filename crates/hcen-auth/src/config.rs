//! Broker configuration.
//!
//! # Example (TOML)
//!
//! ```toml
//! [auth.idp]
//! issuer = "https://auth-testing.iduruguay.gub.uy/oidc/v1"
//! authorization_endpoint = "https://auth-testing.iduruguay.gub.uy/oidc/v1/authorize"
//! token_endpoint = "https://auth-testing.iduruguay.gub.uy/oidc/v1/token"
//! jwks_uri = "https://auth-testing.iduruguay.gub.uy/oidc/v1/jwks"
//! client_id = "hcen"
//! request_timeout = "10s"
//!
//! [auth.state]
//! ttl = "10m"
//!
//! [auth.session]
//! ttl = "1h"
//! jwt_secret = "change-me-change-me-change-me-32b"
//!
//! [auth.rate_limit]
//! window = "1m"
//! max_requests = 20
//! ```

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

/// Minimum accepted length for the session JWT secret, in bytes.
pub const MIN_JWT_SECRET_LEN: usize = 32;

/// Root broker configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct BrokerConfig {
    /// External identity provider.
    pub idp: IdpConfig,
    /// OAuth state records.
    pub state: StateConfig,
    /// Server-side sessions.
    pub session: SessionConfig,
    /// Per-IP, per-endpoint admission control.
    pub rate_limit: RateLimitConfig,
    /// Cache pool entries owned by downstream services.
    pub cache: CacheConfig,
}

/// External OIDC identity provider settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct IdpConfig {
    /// Expected `iss` of the provider.
    pub issuer: String,

    /// Authorization endpoint the user agent is redirected to.
    pub authorization_endpoint: String,

    /// Token endpoint for the code exchange.
    pub token_endpoint: String,

    /// Optional userinfo endpoint, used when the ID token lacks a subject.
    pub userinfo_endpoint: Option<String>,

    /// JWKS endpoint for ID token signing keys.
    ///
    /// Required unless the provider signs ID tokens with the client secret.
    pub jwks_uri: Option<String>,

    /// Client identifier registered with the provider.
    pub client_id: String,

    /// Client secret for confidential (WEB) exchanges.
    #[serde(skip_serializing)]
    pub client_secret: Option<String>,

    /// Requested scopes.
    pub scopes: Vec<String>,

    /// Optional `acr_values` (assurance level) sent on authorization.
    pub acr_values: Option<String>,

    /// Bound on each call to the provider. Timeouts are never retried.
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,

    /// Clock skew tolerated on ID token `exp` and `iat`.
    #[serde(with = "humantime_serde")]
    pub clock_skew: Duration,

    /// How long fetched signing keys are reused before refetching.
    #[serde(with = "humantime_serde")]
    pub jwks_cache_ttl: Duration,
}

impl Default for IdpConfig {
    fn default() -> Self {
        Self {
            issuer: String::new(),
            authorization_endpoint: String::new(),
            token_endpoint: String::new(),
            userinfo_endpoint: None,
            jwks_uri: None,
            client_id: String::new(),
            client_secret: None,
            scopes: vec![
                "openid".to_string(),
                "personal_info".to_string(),
                "document".to_string(),
            ],
            acr_values: None,
            request_timeout: Duration::from_secs(10),
            clock_skew: Duration::from_secs(60),
            jwks_cache_ttl: Duration::from_secs(3600), // 1 hour
        }
    }
}

/// OAuth state record settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StateConfig {
    /// Lifetime of an unconsumed state record.
    #[serde(with = "humantime_serde")]
    pub ttl: Duration,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(600), // 10 minutes
        }
    }
}

/// Session settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Session lifetime from issuance (or from the last refresh).
    #[serde(with = "humantime_serde")]
    pub ttl: Duration,

    /// Allow `refresh` to extend a live session.
    pub sliding: bool,

    /// HS256 secret for the session JWT.
    #[serde(skip_serializing)]
    pub jwt_secret: String,

    /// `iss` claim of issued session JWTs.
    pub jwt_issuer: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(3600), // 1 hour
            sliding: false,
            jwt_secret: String::new(),
            jwt_issuer: "hcen".to_string(),
        }
    }
}

/// Fixed-window rate limiting.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Enable admission control.
    pub enabled: bool,

    /// Window length; also the counter TTL.
    #[serde(with = "humantime_serde")]
    pub window: Duration,

    /// Requests allowed per (ip, endpoint) in one window.
    pub max_requests: u32,

    /// Per-endpoint thresholds overriding `max_requests`.
    pub overrides: HashMap<String, u32>,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            window: Duration::from_secs(60),
            max_requests: 20,
            overrides: HashMap::new(),
        }
    }
}

impl RateLimitConfig {
    /// Threshold for `endpoint`.
    #[must_use]
    pub fn limit_for(&self, endpoint: &str) -> u32 {
        self.overrides
            .get(endpoint)
            .copied()
            .unwrap_or(self.max_requests)
    }
}

/// Cache pool settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CacheConfig {
    /// TTL downstream services use for `user:profile:*` entries.
    #[serde(with = "humantime_serde")]
    pub profile_ttl: Duration,

    /// Invalidate `user:profile:{ci}` after each successful login.
    pub invalidate_profile_on_login: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            profile_ttl: Duration::from_secs(1800), // 30 minutes
            invalidate_profile_on_login: true,
        }
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// An invalid configuration value was provided.
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),

    /// A required configuration value is missing.
    #[error("Missing required configuration: {0}")]
    Missing(String),
}

impl BrokerConfig {
    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if:
    /// - An IdP endpoint or the client id is missing or not an http(s) URL
    /// - Neither a JWKS endpoint nor a client secret is available to verify
    ///   ID tokens
    /// - The session JWT secret is shorter than 32 bytes
    /// - Any TTL, window or threshold is zero
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.idp.client_id.is_empty() {
            return Err(ConfigError::Missing("idp.client_id".to_string()));
        }
        if self.idp.issuer.is_empty() {
            return Err(ConfigError::Missing("idp.issuer".to_string()));
        }
        validate_endpoint("idp.authorization_endpoint", &self.idp.authorization_endpoint)?;
        validate_endpoint("idp.token_endpoint", &self.idp.token_endpoint)?;
        if let Some(userinfo) = &self.idp.userinfo_endpoint {
            validate_endpoint("idp.userinfo_endpoint", userinfo)?;
        }
        match &self.idp.jwks_uri {
            Some(jwks_uri) => validate_endpoint("idp.jwks_uri", jwks_uri)?,
            None if self.idp.client_secret.is_none() => {
                return Err(ConfigError::Missing("idp.jwks_uri".to_string()));
            }
            None => {}
        }
        if !self.idp.scopes.iter().any(|s| s == "openid") {
            return Err(ConfigError::InvalidValue(
                "idp.scopes must include 'openid'".to_string(),
            ));
        }
        if self.idp.request_timeout.is_zero() {
            return Err(ConfigError::InvalidValue(
                "idp.request_timeout must be > 0".to_string(),
            ));
        }

        if self.state.ttl.is_zero() {
            return Err(ConfigError::InvalidValue(
                "state.ttl must be > 0".to_string(),
            ));
        }

        if self.session.ttl.is_zero() {
            return Err(ConfigError::InvalidValue(
                "session.ttl must be > 0".to_string(),
            ));
        }
        if self.session.jwt_secret.is_empty() {
            return Err(ConfigError::Missing("session.jwt_secret".to_string()));
        }
        if self.session.jwt_secret.len() < MIN_JWT_SECRET_LEN {
            return Err(ConfigError::InvalidValue(format!(
                "session.jwt_secret must be at least {MIN_JWT_SECRET_LEN} bytes"
            )));
        }

        if self.rate_limit.enabled {
            if self.rate_limit.window.is_zero() {
                return Err(ConfigError::InvalidValue(
                    "rate_limit.window must be > 0".to_string(),
                ));
            }
            if self.rate_limit.max_requests == 0
                || self.rate_limit.overrides.values().any(|v| *v == 0)
            {
                return Err(ConfigError::InvalidValue(
                    "rate_limit thresholds must be > 0".to_string(),
                ));
            }
        }

        Ok(())
    }
}

fn validate_endpoint(name: &str, value: &str) -> Result<(), ConfigError> {
    if value.is_empty() {
        return Err(ConfigError::Missing(name.to_string()));
    }
    let url = Url::parse(value)
        .map_err(|e| ConfigError::InvalidValue(format!("{name}: {e}")))?;
    match url.scheme() {
        "https" | "http" => Ok(()),
        other => Err(ConfigError::InvalidValue(format!(
            "{name}: unsupported scheme '{other}'"
        ))),
    }
}
