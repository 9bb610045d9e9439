//! Provider signing keys.
//!
//! Keys are fetched from the configured JWKS endpoint and reused until the
//! cache TTL elapses. A `kid` that is not in the cached set forces one
//! refetch, which picks up provider key rotation.

use std::time::Duration;

use jsonwebtoken::jwk::{Jwk, JwkSet, KeyAlgorithm, PublicKeyUse};
use jsonwebtoken::{Algorithm, DecodingKey};
use tokio::sync::RwLock;
use tokio::time::Instant;
use url::Url;

use super::claims::invalid_id_token;
use super::transport_error;
use crate::AuthResult;
use crate::error::AuthError;

struct CachedJwks {
    jwks: JwkSet,
    expires_at: Instant,
}

/// JWKS cache for a single provider.
pub struct JwksCache {
    jwks_uri: Url,
    ttl: Duration,
    http_client: reqwest::Client,
    cached: RwLock<Option<CachedJwks>>,
}

impl JwksCache {
    /// Creates an empty cache; nothing is fetched until the first lookup.
    #[must_use]
    pub fn new(jwks_uri: Url, ttl: Duration, http_client: reqwest::Client) -> Self {
        Self {
            jwks_uri,
            ttl,
            http_client,
            cached: RwLock::new(None),
        }
    }

    /// Returns the decoding key for `kid` and the algorithm the key declares.
    ///
    /// # Errors
    ///
    /// - `Network`/`Timeout` if the JWKS endpoint cannot be reached
    /// - upstream `invalid_jwks` if the response is not a key set
    /// - upstream `invalid_id_token` if no signing key has that `kid`
    pub async fn get_key(&self, kid: &str) -> AuthResult<(DecodingKey, Option<Algorithm>)> {
        if let Some(found) = self.cached_key(kid).await {
            tracing::trace!(kid = %kid, "JWKS cache hit");
            return Ok(found);
        }

        tracing::debug!(kid = %kid, jwks_uri = %self.jwks_uri, "JWKS cache miss");
        self.refresh().await?;

        self.cached_key(kid)
            .await
            .ok_or_else(|| invalid_id_token(format!("unknown signing key '{kid}'")))
    }

    async fn cached_key(&self, kid: &str) -> Option<(DecodingKey, Option<Algorithm>)> {
        let cached = self.cached.read().await;
        let cached = cached.as_ref()?;
        if Instant::now() >= cached.expires_at {
            return None;
        }

        cached
            .jwks
            .keys
            .iter()
            .filter(|jwk| !matches!(jwk.common.public_key_use, Some(PublicKeyUse::Encryption)))
            .find(|jwk| jwk.common.key_id.as_deref() == Some(kid))
            .and_then(|jwk| {
                DecodingKey::from_jwk(jwk)
                    .ok()
                    .map(|key| (key, jwk_algorithm(jwk)))
            })
    }

    /// Fetches the key set and replaces the cached copy.
    ///
    /// # Errors
    ///
    /// See [`JwksCache::get_key`].
    pub async fn refresh(&self) -> AuthResult<()> {
        let response = self
            .http_client
            .get(self.jwks_uri.as_str())
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(transport_error)?;

        if !response.status().is_success() {
            let status = response.status();
            tracing::warn!(status = status.as_u16(), "JWKS endpoint returned an error");
            return Err(AuthError::oauth_upstream(
                "server_error",
                Some(format!("JWKS endpoint returned HTTP {status}")),
            ));
        }

        let jwks: JwkSet = response.json().await.map_err(|e| {
            AuthError::oauth_upstream("invalid_jwks", Some(format!("failed to parse JWKS: {e}")))
        })?;

        tracing::debug!(
            jwks_uri = %self.jwks_uri,
            keys = jwks.keys.len(),
            "Cached provider signing keys"
        );

        *self.cached.write().await = Some(CachedJwks {
            jwks,
            expires_at: Instant::now() + self.ttl,
        });
        Ok(())
    }
}

fn jwk_algorithm(jwk: &Jwk) -> Option<Algorithm> {
    jwk.common.key_algorithm.and_then(|alg| match alg {
        KeyAlgorithm::RS256 => Some(Algorithm::RS256),
        KeyAlgorithm::RS384 => Some(Algorithm::RS384),
        KeyAlgorithm::RS512 => Some(Algorithm::RS512),
        KeyAlgorithm::PS256 => Some(Algorithm::PS256),
        KeyAlgorithm::PS384 => Some(Algorithm::PS384),
        KeyAlgorithm::PS512 => Some(Algorithm::PS512),
        KeyAlgorithm::ES256 => Some(Algorithm::ES256),
        KeyAlgorithm::ES384 => Some(Algorithm::ES384),
        KeyAlgorithm::EdDSA => Some(Algorithm::EdDSA),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::exchange::id_token::test_support::{KID, jwks};

    fn cache_for(server: &MockServer, ttl: Duration) -> JwksCache {
        let uri = Url::parse(&format!("{}/oidc/v1/jwks", server.uri())).unwrap();
        JwksCache::new(uri, ttl, reqwest::Client::new())
    }

    #[tokio::test]
    async fn test_key_is_fetched_once() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/oidc/v1/jwks"))
            .respond_with(ResponseTemplate::new(200).set_body_json(jwks()))
            .expect(1)
            .mount(&server)
            .await;

        let cache = cache_for(&server, Duration::from_secs(3600));
        let (_, alg) = cache.get_key(KID).await.unwrap();
        assert_eq!(alg, Some(Algorithm::EdDSA));
        assert!(cache.get_key(KID).await.is_ok());
    }

    #[tokio::test]
    async fn test_unknown_kid_refetches_then_fails() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/oidc/v1/jwks"))
            .respond_with(ResponseTemplate::new(200).set_body_json(jwks()))
            .expect(2)
            .mount(&server)
            .await;

        let cache = cache_for(&server, Duration::from_secs(3600));
        cache.get_key(KID).await.unwrap();

        let err = cache.get_key("rotated-away").await.unwrap_err();
        assert_eq!(err.oauth_details().map(|d| d.0), Some("invalid_id_token"));
    }

    #[tokio::test]
    async fn test_encryption_keys_are_ignored() {
        let server = MockServer::start().await;
        let mut body = jwks();
        body["keys"][0]["use"] = json!("enc");
        Mock::given(method("GET"))
            .and(path("/oidc/v1/jwks"))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .mount(&server)
            .await;

        let cache = cache_for(&server, Duration::from_secs(3600));
        assert!(cache.get_key(KID).await.is_err());
    }

    #[tokio::test]
    async fn test_endpoint_failure_is_upstream_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/oidc/v1/jwks"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let cache = cache_for(&server, Duration::from_secs(3600));
        let err = cache.get_key(KID).await.unwrap_err();
        assert!(err.is_server_error());
        assert_eq!(err.oauth_details().map(|d| d.0), Some("server_error"));
    }
}
