//! ID token verification.
//!
//! Tokens signed with an HMAC algorithm are checked against the client
//! secret (OIDC Core 10.1). Any other algorithm needs a key from the
//! provider's JWKS, selected by `kid`. Issuer, audience and expiry are
//! enforced by `jsonwebtoken`; `iat` and the nonce are checked here.

use std::time::Duration;

use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, AlgorithmFamily, DecodingKey, Header, Validation, decode, decode_header};
use time::OffsetDateTime;
use url::Url;

use super::claims::{IdTokenClaims, invalid_id_token, verify_nonce};
use super::jwks::JwksCache;
use crate::AuthResult;
use crate::config::IdpConfig;
use crate::error::AuthError;

/// Verifies ID tokens returned by the token endpoint.
pub struct IdTokenVerifier {
    issuer: String,
    client_id: String,
    client_secret: Option<String>,
    leeway: Duration,
    jwks: Option<JwksCache>,
}

impl IdTokenVerifier {
    /// Creates a verifier for the configured provider.
    ///
    /// # Errors
    ///
    /// Returns `Configuration` if `jwks_uri` is set but is not a URL.
    pub fn new(config: &IdpConfig, http_client: reqwest::Client) -> AuthResult<Self> {
        let jwks = match config.jwks_uri.as_deref() {
            Some(uri) => {
                let url = Url::parse(uri)
                    .map_err(|e| AuthError::configuration(format!("invalid JWKS endpoint: {e}")))?;
                Some(JwksCache::new(url, config.jwks_cache_ttl, http_client))
            }
            None => None,
        };

        Ok(Self {
            issuer: config.issuer.trim_end_matches('/').to_string(),
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            leeway: config.clock_skew,
            jwks,
        })
    }

    /// Verifies signature, issuer, audience, `exp`, `iat` and nonce.
    ///
    /// # Errors
    ///
    /// - upstream `invalid_id_token` for a bad signature, foreign issuer or
    ///   audience, an expired or future-dated token, or an unknown key
    /// - local `invalid_nonce` when the nonce is missing or does not match
    /// - `Network`/`Timeout` if the signing keys cannot be fetched
    pub async fn verify(&self, id_token: &str, expected_nonce: &str) -> AuthResult<IdTokenClaims> {
        let header =
            decode_header(id_token).map_err(|_| invalid_id_token("malformed ID token"))?;
        let (key, algorithm) = self.signing_key(&header).await?;

        let claims = decode::<IdTokenClaims>(id_token, &key, &self.validation(algorithm))
            .map(|data| data.claims)
            .map_err(|err| {
                tracing::warn!(error = %err, "ID token rejected");
                match err.kind() {
                    ErrorKind::ExpiredSignature => invalid_id_token("ID token has expired"),
                    ErrorKind::InvalidIssuer => invalid_id_token("issuer mismatch"),
                    ErrorKind::InvalidAudience => invalid_id_token("audience mismatch"),
                    ErrorKind::InvalidSignature => invalid_id_token("invalid signature"),
                    ErrorKind::InvalidAlgorithm => invalid_id_token("unexpected signing algorithm"),
                    ErrorKind::MissingRequiredClaim(claim) => {
                        invalid_id_token(format!("missing '{claim}' claim"))
                    }
                    _ => invalid_id_token("malformed ID token"),
                }
            })?;

        self.check_issued_at(&claims)?;
        verify_nonce(&claims, expected_nonce)?;
        Ok(claims)
    }

    async fn signing_key(&self, header: &Header) -> AuthResult<(DecodingKey, Algorithm)> {
        if header.alg.family() == AlgorithmFamily::Hmac {
            let secret = self.client_secret.as_deref().ok_or_else(|| {
                invalid_id_token("HMAC-signed ID token but no client secret is configured")
            })?;
            return Ok((DecodingKey::from_secret(secret.as_bytes()), header.alg));
        }

        let jwks = self
            .jwks
            .as_ref()
            .ok_or_else(|| invalid_id_token("no JWKS endpoint configured"))?;
        let kid = header
            .kid
            .as_deref()
            .ok_or_else(|| invalid_id_token("ID token has no key id"))?;
        let (key, key_algorithm) = jwks.get_key(kid).await?;
        Ok((key, key_algorithm.unwrap_or(header.alg)))
    }

    fn validation(&self, algorithm: Algorithm) -> Validation {
        let mut validation = Validation::new(algorithm);
        validation.set_audience(&[self.client_id.as_str()]);
        validation.set_issuer(&[self.issuer.clone(), format!("{}/", self.issuer)]);
        validation.set_required_spec_claims(&["exp", "iss", "aud"]);
        validation.leeway = self.leeway.as_secs();
        validation
    }

    fn check_issued_at(&self, claims: &IdTokenClaims) -> AuthResult<()> {
        let leeway = i64::try_from(self.leeway.as_secs()).unwrap_or(i64::MAX);
        let latest = OffsetDateTime::now_utc().unix_timestamp().saturating_add(leeway);
        if claims.iat.is_some_and(|iat| iat > latest) {
            return Err(invalid_id_token("ID token issued in the future"));
        }
        Ok(())
    }
}
