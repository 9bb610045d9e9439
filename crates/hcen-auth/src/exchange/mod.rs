//! Authorization-code exchange with the external identity provider.
//!
//! # Overview
//!
//! Each authorization attempt moves through
//! `ISSUED -> CALLBACK_RECEIVED -> {EXCHANGED | FAILED}`:
//!
//! 1. **Pre-flight** - [`CallbackRequest::validate`]; no store or network I/O
//! 2. **State** - the record is consumed; client type and redirect URI must
//!    match what was issued
//! 3. **PKCE** - the verifier is checked against the stored challenge; a
//!    mismatch stops here, before the IdP is contacted
//! 4. **Token request** - one POST to the token endpoint, bounded by
//!    `request_timeout`, never retried
//! 5. **Token response** - the ID token signature and claims (issuer,
//!    audience, `exp`, `iat`, nonce) are verified and the subject is
//!    resolved, with a userinfo fallback
//!
//! The state is consumed before the network call. A dropped future or a
//! timeout therefore leaves the attempt definitively FAILED: replaying the
//! same `state` finds nothing.

pub mod callback;
pub mod claims;
pub mod id_token;
pub mod jwks;

use std::fmt;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::AuthResult;
use crate::config::IdpConfig;
use crate::crypto::pkce::{PkceChallengeMethod, validate_code_challenge};
use crate::error::{AuthError, OAuthErrorKind};
use crate::state::{AuthorizationState, ClientType, StateTracker};

pub use callback::CallbackRequest;
pub use claims::{IdTokenClaims, UserInfo};
pub use id_token::IdTokenVerifier;

/// Token endpoint success response.
#[derive(Clone, Serialize, Deserialize)]
pub struct TokenResponse {
    /// The access token.
    pub access_token: String,

    /// The token type (usually "Bearer").
    #[serde(default)]
    pub token_type: Option<String>,

    /// Token expiration in seconds.
    #[serde(default)]
    pub expires_in: Option<u64>,

    /// Optional refresh token.
    #[serde(default)]
    pub refresh_token: Option<String>,

    /// The ID token (JWT).
    #[serde(default)]
    pub id_token: Option<String>,

    /// Granted scopes.
    #[serde(default)]
    pub scope: Option<String>,
}

impl fmt::Debug for TokenResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenResponse")
            .field("access_token", &"[REDACTED]")
            .field("token_type", &self.token_type)
            .field("expires_in", &self.expires_in)
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "[REDACTED]"))
            .field("id_token", &self.id_token.as_ref().map(|_| "[REDACTED]"))
            .field("scope", &self.scope)
            .finish()
    }
}

/// OAuth error response from the IdP.
#[derive(Debug, Deserialize)]
struct OAuthErrorResponse {
    error: String,
    error_description: Option<String>,
}

/// Result of a successful exchange.
#[derive(Debug, Clone)]
pub struct ExchangeOutcome {
    /// The consumed authorization state.
    pub state: AuthorizationState,
    /// Resolved subject (citizen ID when available).
    pub subject: String,
    /// Display name from the ID token or userinfo.
    pub display_name: Option<String>,
    /// Email from the ID token or userinfo.
    pub email: Option<String>,
    /// Verified ID token claims.
    pub claims: IdTokenClaims,
    /// Raw tokens from the IdP.
    pub tokens: TokenResponse,
}

/// Exchange step a failure occurred in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExchangeStep {
    /// Local validation of the callback parameters.
    Preflight,
    /// State consumption and binding checks.
    StateValidation,
    /// PKCE verifier check.
    PkceVerification,
    /// The token endpoint call.
    TokenRequest,
    /// Validation of the token endpoint response.
    TokenResponse,
}

impl ExchangeStep {
    /// Step name for logs and audit details.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Preflight => "preflight",
            Self::StateValidation => "state_validation",
            Self::PkceVerification => "pkce_verification",
            Self::TokenRequest => "token_request",
            Self::TokenResponse => "token_response",
        }
    }

    /// Returns `true` if the IdP had been contacted when the step failed.
    #[must_use]
    pub fn reached_network(&self) -> bool {
        matches!(self, Self::TokenRequest | Self::TokenResponse)
    }
}

impl fmt::Display for ExchangeStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failed exchange, tagged with the step that failed.
#[derive(Debug, thiserror::Error)]
#[error("Code exchange failed at {step}: {error}")]
pub struct ExchangeError {
    /// Failing step.
    pub step: ExchangeStep,
    /// Underlying error.
    pub error: AuthError,
    /// The consumed state, when the failure happened after consumption.
    pub state: Option<AuthorizationState>,
}

impl ExchangeError {
    fn new(step: ExchangeStep, error: AuthError) -> Self {
        Self {
            step,
            error,
            state: None,
        }
    }

    fn after_consume(step: ExchangeStep, error: AuthError, state: &AuthorizationState) -> Self {
        Self {
            step,
            error,
            state: Some(state.clone()),
        }
    }
}

impl From<ExchangeError> for AuthError {
    fn from(err: ExchangeError) -> Self {
        err.error
    }
}

/// Drives the authorization-code exchange.
pub struct TokenExchangeClient {
    config: IdpConfig,
    states: StateTracker,
    http_client: reqwest::Client,
    id_tokens: IdTokenVerifier,
}

impl TokenExchangeClient {
    /// Creates a client.
    ///
    /// # Errors
    ///
    /// Returns `Configuration` if an endpoint (including `jwks_uri`) is not a
    /// valid URL or the HTTP client cannot be built.
    pub fn new(config: IdpConfig, states: StateTracker) -> AuthResult<Self> {
        Url::parse(&config.authorization_endpoint).map_err(|e| {
            AuthError::configuration(format!("invalid authorization endpoint: {e}"))
        })?;
        Url::parse(&config.token_endpoint)
            .map_err(|e| AuthError::configuration(format!("invalid token endpoint: {e}")))?;

        let http_client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| AuthError::configuration(format!("failed to build HTTP client: {e}")))?;
        let id_tokens = IdTokenVerifier::new(&config, http_client.clone())?;

        Ok(Self {
            config,
            states,
            http_client,
            id_tokens,
        })
    }

    /// The state tracker this client consumes from.
    #[must_use]
    pub fn states(&self) -> &StateTracker {
        &self.states
    }

    /// Builds the IdP authorization URL for an issued state record.
    ///
    /// # Errors
    ///
    /// Returns `Configuration` if the authorization endpoint is not a URL.
    pub fn authorization_url(&self, state: &AuthorizationState) -> AuthResult<Url> {
        let mut url = Url::parse(&self.config.authorization_endpoint).map_err(|e| {
            AuthError::configuration(format!("invalid authorization endpoint: {e}"))
        })?;
        {
            let mut params = url.query_pairs_mut();
            params.append_pair("response_type", "code");
            params.append_pair("client_id", &self.config.client_id);
            params.append_pair("redirect_uri", &state.redirect_uri);
            params.append_pair("scope", &self.config.scopes.join(" "));
            params.append_pair("state", &state.state_token);
            params.append_pair("nonce", &state.nonce);

            if let Some(challenge) = &state.code_challenge {
                params.append_pair("code_challenge", challenge);
                params.append_pair("code_challenge_method", PkceChallengeMethod::S256.as_str());
            }

            if let Some(acr_values) = &self.config.acr_values {
                params.append_pair("acr_values", acr_values);
            }
        }

        tracing::debug!(
            endpoint = %self.config.authorization_endpoint,
            client_type = %state.client_type,
            "Built authorization URL"
        );

        Ok(url)
    }

    /// Exchanges the callback's code for tokens.
    ///
    /// # Errors
    ///
    /// Returns an [`ExchangeError`] naming the failing step; see the module
    /// docs for the order of checks.
    pub async fn exchange(
        &self,
        request: &CallbackRequest,
    ) -> Result<ExchangeOutcome, ExchangeError> {
        request
            .validate()
            .map_err(|e| ExchangeError::new(ExchangeStep::Preflight, e))?;

        let state = self
            .states
            .consume(&request.state)
            .await
            .map_err(|e| ExchangeError::new(ExchangeStep::StateValidation, e))?;

        state
            .verify_binding(request.client_type, &request.redirect_uri)
            .map_err(|e| ExchangeError::after_consume(ExchangeStep::StateValidation, e, &state))?;

        if state.client_type.requires_pkce() || state.code_challenge.is_some() {
            let verified = validate_code_challenge(
                request.code_verifier.as_deref(),
                state.code_challenge.as_deref(),
            );
            if !verified {
                tracing::warn!(
                    state = %state.token_prefix(),
                    client_type = %state.client_type,
                    "PKCE verification failed"
                );
                return Err(ExchangeError::after_consume(
                    ExchangeStep::PkceVerification,
                    AuthError::pkce_mismatch(),
                    &state,
                ));
            }
        }

        let tokens = self
            .request_tokens(request)
            .await
            .map_err(|e| ExchangeError::after_consume(ExchangeStep::TokenRequest, e, &state))?;

        self.resolve_identity(state.clone(), tokens)
            .await
            .map_err(|e| ExchangeError::after_consume(ExchangeStep::TokenResponse, e, &state))
    }

    async fn request_tokens(&self, request: &CallbackRequest) -> AuthResult<TokenResponse> {
        let mut params = vec![
            ("grant_type", "authorization_code"),
            ("code", request.code.as_str()),
            ("redirect_uri", request.redirect_uri.as_str()),
            ("client_id", self.config.client_id.as_str()),
        ];

        match request.client_type {
            ClientType::Mobile => {
                if let Some(verifier) = request.code_verifier.as_deref() {
                    params.push(("code_verifier", verifier));
                }
            }
            ClientType::Web => {
                if let Some(secret) = self.config.client_secret.as_deref() {
                    params.push(("client_secret", secret));
                }
                if let Some(verifier) = request.code_verifier.as_deref() {
                    params.push(("code_verifier", verifier));
                }
            }
        }

        tracing::debug!(
            endpoint = %self.config.token_endpoint,
            client_type = %request.client_type,
            "Exchanging authorization code"
        );

        let response = self
            .http_client
            .post(&self.config.token_endpoint)
            .header(reqwest::header::ACCEPT, "application/json")
            .form(&params)
            .send()
            .await
            .map_err(transport_error)?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();

            if let Ok(oauth_error) = serde_json::from_str::<OAuthErrorResponse>(&body) {
                tracing::warn!(
                    status = status.as_u16(),
                    error = %oauth_error.error,
                    "Token endpoint rejected the code exchange"
                );
                return Err(AuthError::oauth_upstream(
                    oauth_error.error,
                    oauth_error.error_description,
                ));
            }

            tracing::warn!(status = status.as_u16(), "Token endpoint returned an error");
            return Err(AuthError::oauth_upstream(
                "server_error",
                Some(format!("token endpoint returned HTTP {status}")),
            ));
        }

        response.json::<TokenResponse>().await.map_err(|e| {
            if e.is_timeout() {
                transport_error(e)
            } else {
                AuthError::oauth_upstream(
                    "invalid_token_response",
                    Some(format!("failed to parse token response: {e}")),
                )
            }
        })
    }

    async fn resolve_identity(
        &self,
        state: AuthorizationState,
        tokens: TokenResponse,
    ) -> AuthResult<ExchangeOutcome> {
        let id_token = tokens.id_token.as_deref().ok_or_else(|| {
            AuthError::oauth_upstream(
                "invalid_token_response",
                Some("token response has no id_token".to_string()),
            )
        })?;

        let claims = self.id_tokens.verify(id_token, &state.nonce).await?;

        let mut display_name = claims.nombre_completo.clone();
        let mut email = claims.email.clone();

        let subject = match claims.subject() {
            Some(subject) => subject.to_string(),
            None => {
                let userinfo = self.fetch_userinfo(&tokens.access_token).await?;
                display_name = display_name.or_else(|| userinfo.nombre_completo.clone());
                email = email.or_else(|| userinfo.email.clone());
                userinfo.subject().map(str::to_string).ok_or_else(|| {
                    AuthError::oauth_upstream(
                        "invalid_token_response",
                        Some("no subject in ID token or userinfo".to_string()),
                    )
                })?
            }
        };

        tracing::info!(
            client_type = %state.client_type,
            "Authorization code exchanged"
        );

        Ok(ExchangeOutcome {
            state,
            subject,
            display_name,
            email,
            claims,
            tokens,
        })
    }

    async fn fetch_userinfo(&self, access_token: &str) -> AuthResult<UserInfo> {
        let Some(endpoint) = self.config.userinfo_endpoint.as_deref() else {
            return Err(AuthError::oauth_upstream(
                "invalid_token_response",
                Some("ID token has no subject and no userinfo endpoint is configured".to_string()),
            ));
        };

        let response = self
            .http_client
            .get(endpoint)
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(transport_error)?;

        if !response.status().is_success() {
            let status = response.status();
            tracing::warn!(status = status.as_u16(), "Userinfo endpoint returned an error");
            return Err(AuthError::oauth_upstream(
                "server_error",
                Some(format!("userinfo endpoint returned HTTP {status}")),
            ));
        }

        response.json::<UserInfo>().await.map_err(|e| {
            AuthError::oauth_upstream(
                "invalid_userinfo_response",
                Some(format!("failed to parse userinfo: {e}")),
            )
        })
    }
}

fn transport_error(err: reqwest::Error) -> AuthError {
    let kind = if err.is_timeout() {
        OAuthErrorKind::Timeout
    } else {
        OAuthErrorKind::Network
    };
    tracing::warn!(error = %err, kind = %kind, "Identity provider request failed");
    AuthError::oauth_transport(kind, err)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use serde_json::json;
    use wiremock::matchers::{body_string_contains, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::id_token::test_support::id_token;
    use super::*;
    use crate::config::test_support::config_for;
    use crate::crypto::pkce::{generate_code_challenge, generate_code_verifier};
    use crate::store::MemoryStore;

    const REDIRECT: &str = "https://app/cb";

    fn client_for(server: &MockServer) -> TokenExchangeClient {
        let config = config_for(&server.uri());
        let states = StateTracker::new(Arc::new(MemoryStore::new()), Duration::from_secs(600));
        TokenExchangeClient::new(config.idp, states).unwrap()
    }

    fn token_body(server: &MockServer, nonce: &str) -> serde_json::Value {
        json!({
            "access_token": "at-1",
            "token_type": "Bearer",
            "expires_in": 300,
            "id_token": id_token(&json!({
                "iss": server.uri(),
                "sub": "5859",
                "aud": "hcen-test",
                "nonce": nonce,
                "numero_documento": "12345678",
                "nombre_completo": "Ana Pérez"
            }))
        })
    }

    async fn mount_token(server: &MockServer, body: serde_json::Value, expected: u64) {
        Mock::given(method("POST"))
            .and(path("/oidc/v1/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .expect(expected)
            .mount(server)
            .await;
    }

    async fn mount_no_calls(server: &MockServer) {
        Mock::given(method("POST"))
            .and(path("/oidc/v1/token"))
            .respond_with(ResponseTemplate::new(500))
            .expect(0)
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_authorization_url_web() {
        let server = MockServer::start().await;
        let client = client_for(&server);
        let state = client
            .states()
            .issue(ClientType::Web, REDIRECT, None)
            .await
            .unwrap();

        let url = client.authorization_url(&state).unwrap();
        let pairs: std::collections::HashMap<_, _> = url.query_pairs().into_owned().collect();

        assert_eq!(pairs["response_type"], "code");
        assert_eq!(pairs["client_id"], "hcen-test");
        assert_eq!(pairs["redirect_uri"], REDIRECT);
        assert_eq!(pairs["scope"], "openid personal_info document");
        assert_eq!(pairs["state"], state.state_token);
        assert_eq!(pairs["nonce"], state.nonce);
        assert!(!pairs.contains_key("code_challenge"));
    }

    #[tokio::test]
    async fn test_authorization_url_mobile_carries_challenge() {
        let server = MockServer::start().await;
        let client = client_for(&server);
        let challenge = generate_code_challenge(&generate_code_verifier());
        let state = client
            .states()
            .issue(ClientType::Mobile, REDIRECT, Some(&challenge))
            .await
            .unwrap();

        let url = client.authorization_url(&state).unwrap();
        let pairs: std::collections::HashMap<_, _> = url.query_pairs().into_owned().collect();
        assert_eq!(pairs["code_challenge"], challenge);
        assert_eq!(pairs["code_challenge_method"], "S256");
    }

    #[tokio::test]
    async fn test_web_exchange_succeeds() {
        let server = MockServer::start().await;
        let client = client_for(&server);
        let state = client
            .states()
            .issue(ClientType::Web, REDIRECT, None)
            .await
            .unwrap();

        Mock::given(method("POST"))
            .and(path("/oidc/v1/token"))
            .and(body_string_contains("grant_type=authorization_code"))
            .and(body_string_contains("code=abc"))
            .and(body_string_contains("client_secret=s3cret"))
            .respond_with(ResponseTemplate::new(200).set_body_json(token_body(&server, &state.nonce)))
            .expect(1)
            .mount(&server)
            .await;

        let outcome = client
            .exchange(&CallbackRequest::web("abc", &state.state_token, REDIRECT))
            .await
            .unwrap();

        assert_eq!(outcome.subject, "12345678");
        assert_eq!(outcome.display_name.as_deref(), Some("Ana Pérez"));
        assert_eq!(outcome.state.state_token, state.state_token);
        assert_eq!(outcome.tokens.access_token, "at-1");
    }

    #[tokio::test]
    async fn test_replayed_state_fails_without_second_call() {
        let server = MockServer::start().await;
        let client = client_for(&server);
        let state = client
            .states()
            .issue(ClientType::Web, REDIRECT, None)
            .await
            .unwrap();
        mount_token(&server, token_body(&server, &state.nonce), 1).await;

        let request = CallbackRequest::web("abc", &state.state_token, REDIRECT);
        client.exchange(&request).await.unwrap();

        let err = client.exchange(&request).await.unwrap_err();
        assert_eq!(err.step, ExchangeStep::StateValidation);
        assert!(matches!(err.error, AuthError::InvalidState { .. }));
    }

    #[tokio::test]
    async fn test_mobile_missing_verifier_makes_no_calls() {
        let server = MockServer::start().await;
        mount_no_calls(&server).await;
        let client = client_for(&server);
        let challenge = generate_code_challenge(&generate_code_verifier());
        let state = client
            .states()
            .issue(ClientType::Mobile, REDIRECT, Some(&challenge))
            .await
            .unwrap();

        let err = client
            .exchange(&CallbackRequest::mobile("abc", &state.state_token, REDIRECT, None))
            .await
            .unwrap_err();
        assert_eq!(err.step, ExchangeStep::Preflight);
        assert!(matches!(
            err.error,
            AuthError::OAuth {
                kind: OAuthErrorKind::LocalValidation,
                ..
            }
        ));

        // The state survives a pre-flight failure.
        assert!(client.states().consume(&state.state_token).await.is_ok());
    }

    #[tokio::test]
    async fn test_pkce_mismatch_makes_no_calls() {
        let server = MockServer::start().await;
        mount_no_calls(&server).await;
        let client = client_for(&server);

        let verifier = generate_code_verifier();
        let challenge = generate_code_challenge(&verifier);
        let state = client
            .states()
            .issue(ClientType::Mobile, REDIRECT, Some(&challenge))
            .await
            .unwrap();

        let other_verifier = generate_code_verifier();
        assert_ne!(verifier, other_verifier);

        let err = client
            .exchange(&CallbackRequest::mobile(
                "abc",
                &state.state_token,
                REDIRECT,
                Some(other_verifier),
            ))
            .await
            .unwrap_err();
        assert_eq!(err.step, ExchangeStep::PkceVerification);
        assert_eq!(err.error.code(), "pkce_verification_failed");
        assert!(err.state.is_some());
    }

    #[tokio::test]
    async fn test_mobile_exchange_sends_verifier() {
        let server = MockServer::start().await;
        let client = client_for(&server);
        let verifier = generate_code_verifier();
        let challenge = generate_code_challenge(&verifier);
        let state = client
            .states()
            .issue(ClientType::Mobile, REDIRECT, Some(&challenge))
            .await
            .unwrap();

        Mock::given(method("POST"))
            .and(path("/oidc/v1/token"))
            .and(body_string_contains(format!("code_verifier={verifier}")))
            .respond_with(ResponseTemplate::new(200).set_body_json(token_body(&server, &state.nonce)))
            .expect(1)
            .mount(&server)
            .await;

        let outcome = client
            .exchange(&CallbackRequest::mobile(
                "abc",
                &state.state_token,
                REDIRECT,
                Some(verifier),
            ))
            .await
            .unwrap();
        assert_eq!(outcome.state.client_type, ClientType::Mobile);
    }

    #[tokio::test]
    async fn test_binding_mismatch_is_invalid_state() {
        let server = MockServer::start().await;
        mount_no_calls(&server).await;
        let client = client_for(&server);
        let state = client
            .states()
            .issue(ClientType::Web, REDIRECT, None)
            .await
            .unwrap();

        let err = client
            .exchange(&CallbackRequest::web("abc", &state.state_token, "https://evil/cb"))
            .await
            .unwrap_err();
        assert_eq!(err.step, ExchangeStep::StateValidation);
        assert!(matches!(err.error, AuthError::InvalidState { .. }));

        // Tampering burns the state.
        assert!(client.states().consume(&state.state_token).await.is_err());
    }

    #[tokio::test]
    async fn test_upstream_oauth_error_is_carried() {
        let server = MockServer::start().await;
        let client = client_for(&server);
        let state = client
            .states()
            .issue(ClientType::Web, REDIRECT, None)
            .await
            .unwrap();

        Mock::given(method("POST"))
            .and(path("/oidc/v1/token"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "error": "invalid_grant",
                "error_description": "code already used"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let err = client
            .exchange(&CallbackRequest::web("abc", &state.state_token, REDIRECT))
            .await
            .unwrap_err();
        assert_eq!(err.step, ExchangeStep::TokenRequest);
        assert_eq!(
            err.error.oauth_details(),
            Some(("invalid_grant", Some("code already used")))
        );
        assert!(err.error.is_server_error());
    }

    #[tokio::test]
    async fn test_non_oauth_error_body() {
        let server = MockServer::start().await;
        let client = client_for(&server);
        let state = client
            .states()
            .issue(ClientType::Web, REDIRECT, None)
            .await
            .unwrap();

        Mock::given(method("POST"))
            .and(path("/oidc/v1/token"))
            .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
            .expect(1)
            .mount(&server)
            .await;

        let err = client
            .exchange(&CallbackRequest::web("abc", &state.state_token, REDIRECT))
            .await
            .unwrap_err();
        assert_eq!(err.error.oauth_details().map(|d| d.0), Some("server_error"));
    }

    #[tokio::test]
    async fn test_timeout_is_not_retried() {
        let server = MockServer::start().await;
        let mut config = config_for(&server.uri());
        config.idp.request_timeout = Duration::from_millis(200);
        let states = StateTracker::new(Arc::new(MemoryStore::new()), Duration::from_secs(600));
        let client = TokenExchangeClient::new(config.idp, states).unwrap();

        let state = client
            .states()
            .issue(ClientType::Web, REDIRECT, None)
            .await
            .unwrap();

        Mock::given(method("POST"))
            .and(path("/oidc/v1/token"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(token_body(&server, &state.nonce))
                    .set_delay(Duration::from_secs(2)),
            )
            .mount(&server)
            .await;

        let err = client
            .exchange(&CallbackRequest::web("abc", &state.state_token, REDIRECT))
            .await
            .unwrap_err();
        assert!(matches!(
            err.error,
            AuthError::OAuth {
                kind: OAuthErrorKind::Timeout,
                ..
            }
        ));

        // The attempt is terminal: the state is gone.
        assert!(client.states().consume(&state.state_token).await.is_err());
    }

    #[tokio::test]
    async fn test_unreachable_idp_is_network_error() {
        let server = MockServer::start().await;
        let uri = server.uri();
        let client = client_for(&server);
        let state = client
            .states()
            .issue(ClientType::Web, REDIRECT, None)
            .await
            .unwrap();
        drop(server);

        let err = client
            .exchange(&CallbackRequest::web("abc", &state.state_token, REDIRECT))
            .await
            .unwrap_err();
        assert!(
            matches!(
                err.error,
                AuthError::OAuth {
                    kind: OAuthErrorKind::Network | OAuthErrorKind::Timeout,
                    ..
                }
            ),
            "{uri}: {:?}",
            err.error
        );
        assert_eq!(err.error.client_message(), "Identity provider is unavailable");
    }

    #[tokio::test]
    async fn test_nonce_mismatch_is_rejected() {
        let server = MockServer::start().await;
        let client = client_for(&server);
        let state = client
            .states()
            .issue(ClientType::Web, REDIRECT, None)
            .await
            .unwrap();
        mount_token(&server, token_body(&server, "someone-elses-nonce"), 1).await;

        let err = client
            .exchange(&CallbackRequest::web("abc", &state.state_token, REDIRECT))
            .await
            .unwrap_err();
        assert_eq!(err.step, ExchangeStep::TokenResponse);
        assert_eq!(err.error.oauth_details().map(|d| d.0), Some("invalid_nonce"));
    }

    #[tokio::test]
    async fn test_expired_id_token_is_rejected() {
        let server = MockServer::start().await;
        let client = client_for(&server);
        let state = client
            .states()
            .issue(ClientType::Web, REDIRECT, None)
            .await
            .unwrap();

        let body = json!({
            "access_token": "at-1",
            "id_token": id_token(&json!({
                "iss": server.uri(),
                "sub": "5859",
                "aud": "hcen-test",
                "nonce": state.nonce,
                "iat": 999_999_000,
                "exp": 1_000_000_000,
            }))
        });
        mount_token(&server, body, 1).await;

        let err = client
            .exchange(&CallbackRequest::web("abc", &state.state_token, REDIRECT))
            .await
            .unwrap_err();
        assert_eq!(err.step, ExchangeStep::TokenResponse);
        assert_eq!(err.error.oauth_details().map(|d| d.0), Some("invalid_id_token"));
    }

    #[tokio::test]
    async fn test_subject_from_userinfo() {
        let server = MockServer::start().await;
        let mut config = config_for(&server.uri());
        config.idp.userinfo_endpoint = Some(format!("{}/oidc/v1/userinfo", server.uri()));
        let states = StateTracker::new(Arc::new(MemoryStore::new()), Duration::from_secs(600));
        let client = TokenExchangeClient::new(config.idp, states).unwrap();

        let state = client
            .states()
            .issue(ClientType::Web, REDIRECT, None)
            .await
            .unwrap();

        let body = json!({
            "access_token": "at-1",
            "id_token": id_token(&json!({
                "iss": server.uri(),
                "aud": "hcen-test",
                "nonce": state.nonce,
            }))
        });
        mount_token(&server, body, 1).await;

        Mock::given(method("GET"))
            .and(path("/oidc/v1/userinfo"))
            .and(header("authorization", "Bearer at-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "sub": "5859",
                "numero_documento": "87654321",
                "email": "ana@example.uy"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let outcome = client
            .exchange(&CallbackRequest::web("abc", &state.state_token, REDIRECT))
            .await
            .unwrap();
        assert_eq!(outcome.subject, "87654321");
        assert_eq!(outcome.email.as_deref(), Some("ana@example.uy"));
    }

    #[tokio::test]
    async fn test_missing_id_token_is_rejected() {
        let server = MockServer::start().await;
        let client = client_for(&server);
        let state = client
            .states()
            .issue(ClientType::Web, REDIRECT, None)
            .await
            .unwrap();
        mount_token(&server, json!({ "access_token": "at-1" }), 1).await;

        let err = client
            .exchange(&CallbackRequest::web("abc", &state.state_token, REDIRECT))
            .await
            .unwrap_err();
        assert_eq!(
            err.error.oauth_details().map(|d| d.0),
            Some("invalid_token_response")
        );
    }

    #[test]
    fn test_token_response_debug_redacts() {
        let tokens = TokenResponse {
            access_token: "secret-at".to_string(),
            token_type: Some("Bearer".to_string()),
            expires_in: Some(300),
            refresh_token: Some("secret-rt".to_string()),
            id_token: Some("secret-id".to_string()),
            scope: None,
        };
        let debug = format!("{tokens:?}");
        assert!(!debug.contains("secret"));
    }
}
