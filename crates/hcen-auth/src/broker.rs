//! The authentication broker facade.
//!
//! [`AuthBroker`] wires the state tracker, exchange client, session manager,
//! token codec and rate limiter over explicitly passed store handles, and
//! records an audit event after every state transition.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use hcen_auth::prelude::*;
//!
//! let broker = AuthBroker::new(
//!     config,
//!     StoreHandles::in_memory(),
//!     Arc::new(InMemoryIdentityDirectory::new()),
//!     Arc::new(TracingAuditSink),
//! )?;
//!
//! let request = broker.begin_authorization(ClientType::Web, "https://app/cb", None).await?;
//! // redirect to request.authorization_url ...
//! let login = broker
//!     .complete_authorization(CallbackRequest::web(code, state, "https://app/cb"))
//!     .await?;
//! let session = broker.authenticate(&login.grant.token).await?;
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;
use time::OffsetDateTime;
use url::Url;

use crate::AuthResult;
use crate::audit::{AuditEvent, AuditEventKind, AuditSink};
use crate::config::BrokerConfig;
use crate::error::AuthError;
use crate::exchange::{CallbackRequest, ExchangeError, ExchangeOutcome, TokenExchangeClient};
use crate::identity::IdentityDirectory;
use crate::rate_limit::{RateLimitDecision, RateLimiter};
use crate::session::{Session, SessionManager, SessionTokenCodec};
use crate::state::{ClientType, StateTracker};
use crate::store::{KeyValueStore, StoreHandles, StorePool, keys};

/// An authorization redirect, ready to hand to the client.
#[derive(Debug, Clone)]
pub struct AuthorizationRequest {
    /// IdP authorization URL.
    pub authorization_url: Url,
    /// Issued `state`.
    pub state: String,
    /// Client type the attempt was started for.
    pub client_type: ClientType,
    /// When the state record lapses.
    pub expires_at: OffsetDateTime,
}

/// A session and the token bound to it.
#[derive(Debug, Clone)]
pub struct SessionGrant {
    /// The stored session.
    pub session: Session,
    /// HS256 JWT carrying the session id.
    pub token: String,
}

/// Result of a completed authorization.
#[derive(Debug, Clone)]
pub struct LoginOutcome {
    /// The new session.
    pub grant: SessionGrant,
    /// Redirect URI the attempt was started with.
    pub redirect_uri: String,
}

/// Reachability of one store pool.
#[derive(Debug, Clone, Serialize)]
pub struct PoolStatus {
    pub pool: &'static str,
    pub healthy: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Broker health.
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub pools: Vec<PoolStatus>,
}

impl HealthReport {
    pub fn is_healthy(&self) -> bool {
        self.pools.iter().all(|p| p.healthy)
    }
}

/// Authentication broker.
pub struct AuthBroker {
    config: BrokerConfig,
    stores: StoreHandles,
    exchange: TokenExchangeClient,
    sessions: SessionManager,
    tokens: SessionTokenCodec,
    limiter: RateLimiter,
    identities: Arc<dyn IdentityDirectory>,
    audit: Arc<dyn AuditSink>,
}

impl AuthBroker {
    /// Builds a broker.
    ///
    /// # Errors
    ///
    /// Returns `Configuration` if the configuration does not validate.
    pub fn new(
        config: BrokerConfig,
        stores: StoreHandles,
        identities: Arc<dyn IdentityDirectory>,
        audit: Arc<dyn AuditSink>,
    ) -> AuthResult<Self> {
        config
            .validate()
            .map_err(|e| AuthError::configuration(e.to_string()))?;

        let states = StateTracker::new(stores.state.clone(), config.state.ttl);
        let exchange = TokenExchangeClient::new(config.idp.clone(), states)?;
        let sessions = SessionManager::new(
            stores.session.clone(),
            config.session.ttl,
            config.session.sliding,
        );
        let tokens = SessionTokenCodec::new(
            config.session.jwt_secret.as_bytes(),
            config.session.jwt_issuer.clone(),
        );
        let limiter = RateLimiter::new(stores.state.clone(), config.rate_limit.clone());

        Ok(Self {
            config,
            stores,
            exchange,
            sessions,
            tokens,
            limiter,
            identities,
            audit,
        })
    }

    /// Broker configuration.
    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    /// Session manager.
    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    /// Session token codec.
    pub fn tokens(&self) -> &SessionTokenCodec {
        &self.tokens
    }

    /// Starts an authorization attempt and returns the IdP redirect.
    ///
    /// # Errors
    ///
    /// - `InvalidRequest` for a bad redirect URI or a missing/malformed
    ///   MOBILE challenge
    /// - `Storage` if the State pool write fails
    pub async fn begin_authorization(
        &self,
        client_type: ClientType,
        redirect_uri: &str,
        code_challenge: Option<&str>,
    ) -> AuthResult<AuthorizationRequest> {
        let state = self
            .exchange
            .states()
            .issue(client_type, redirect_uri, code_challenge)
            .await?;
        let authorization_url = self.exchange.authorization_url(&state)?;

        self.audit
            .record(
                AuditEvent::new(AuditEventKind::AuthorizationIssued)
                    .client_type(client_type)
                    .detail("redirect_uri", redirect_uri),
            )
            .await;

        Ok(AuthorizationRequest {
            authorization_url,
            expires_at: state.created_at + self.exchange.states().ttl(),
            state: state.state_token,
            client_type,
        })
    }

    /// Completes an authorization attempt: exchange, identity lookup,
    /// session creation and token issuance.
    ///
    /// # Errors
    ///
    /// Any exchange failure (see [`TokenExchangeClient::exchange`]), plus
    /// identity lookup, session creation and signing errors. Every failure
    /// is audited as `ExchangeFailed`.
    pub async fn complete_authorization(
        &self,
        request: CallbackRequest,
    ) -> AuthResult<LoginOutcome> {
        let outcome = match self.exchange.exchange(&request).await {
            Ok(outcome) => outcome,
            Err(err) => {
                self.audit_exchange_failure(&request, &err).await;
                return Err(err.into());
            }
        };

        self.audit
            .record(AuditEvent::new(AuditEventKind::StateConsumed).client_type(request.client_type))
            .await;

        let grant = match self.establish_session(&outcome).await {
            Ok(grant) => grant,
            Err(err) => {
                self.audit
                    .record(
                        AuditEvent::new(AuditEventKind::ExchangeFailed)
                            .subject(&outcome.subject)
                            .client_type(request.client_type)
                            .detail("step", "session")
                            .detail("code", err.code()),
                    )
                    .await;
                tracing::error!(error = %err, "Session could not be established after exchange");
                return Err(err);
            }
        };
        let session = &grant.session;

        self.audit
            .record(
                AuditEvent::new(AuditEventKind::ExchangeSucceeded)
                    .subject(&outcome.subject)
                    .client_type(request.client_type),
            )
            .await;
        self.audit
            .record(
                AuditEvent::new(AuditEventKind::SessionCreated)
                    .subject(&session.subject_id)
                    .client_type(session.client_type)
                    .detail("expires_at", session.expires_at.to_string()),
            )
            .await;

        if self.config.cache.invalidate_profile_on_login {
            if let Err(e) = self.invalidate_profile(&session.subject_id).await {
                tracing::warn!(error = %e, "Failed to invalidate cached profile");
            }
        }

        tracing::info!(
            client_type = %session.client_type,
            "Login completed"
        );

        Ok(LoginOutcome {
            grant,
            redirect_uri: outcome.state.redirect_uri,
        })
    }

    /// Handles an IdP error redirect (`error=...` instead of `code`).
    ///
    /// The state is still consumed so the attempt cannot be resumed.
    /// Returns the error to surface: `InvalidState` if the state is not
    /// live, otherwise an upstream `OAuth` error carrying the IdP's code and
    /// description.
    pub async fn reject_authorization(
        &self,
        state_token: &str,
        error: &str,
        description: Option<String>,
    ) -> AuthError {
        let state = match self.exchange.states().consume(state_token).await {
            Ok(state) => state,
            Err(err) => {
                self.audit
                    .record(AuditEvent::new(AuditEventKind::StateRejected).detail("reason", err.code()))
                    .await;
                return err;
            }
        };

        self.audit
            .record(AuditEvent::new(AuditEventKind::StateConsumed).client_type(state.client_type))
            .await;
        self.audit
            .record(
                AuditEvent::new(AuditEventKind::ExchangeFailed)
                    .client_type(state.client_type)
                    .detail("step", "authorization")
                    .detail("error", error),
            )
            .await;

        AuthError::oauth_upstream(error, description)
    }

    /// Verifies a session token and loads its session.
    ///
    /// # Errors
    ///
    /// - `InvalidToken` if the JWT fails verification or does not match the
    ///   stored session
    /// - `TokenExpired` if the JWT or the session has lapsed
    pub async fn authenticate(&self, token: &str) -> AuthResult<Session> {
        let claims = self.tokens.verify(token)?;
        let session = self.sessions.get(&claims.jti).await?;
        if session.subject_id != claims.sub {
            return Err(AuthError::invalid_token("token does not match session"));
        }
        Ok(session)
    }

    /// Extends the session behind `token` and issues a fresh token for the
    /// same session id.
    ///
    /// # Errors
    ///
    /// The errors of [`authenticate`](Self::authenticate) and
    /// [`SessionManager::refresh`].
    pub async fn refresh(&self, token: &str) -> AuthResult<SessionGrant> {
        let current = self.authenticate(token).await?;
        let session = self.sessions.refresh(&current.session_id).await?;
        let token = self.tokens.issue(&session)?;

        self.audit
            .record(
                AuditEvent::new(AuditEventKind::SessionRefreshed)
                    .subject(&session.subject_id)
                    .client_type(session.client_type),
            )
            .await;

        Ok(SessionGrant { session, token })
    }

    /// Ends the session behind `token`. Idempotent.
    ///
    /// A token past its `exp` is still accepted: after a sliding refresh its
    /// session outlives it.
    ///
    /// # Errors
    ///
    /// - `InvalidToken` if the token is not one of ours
    /// - `Storage` if the Session pool is unreachable
    pub async fn logout(&self, token: &str) -> AuthResult<()> {
        let claims = self.tokens.verify_ignoring_expiry(token)?;

        let removed = self.sessions.invalidate(&claims.jti).await?;
        self.audit
            .record(
                AuditEvent::new(AuditEventKind::SessionInvalidated)
                    .subject(&claims.sub)
                    .client_type(claims.client_type)
                    .detail("removed", removed.to_string()),
            )
            .await;
        Ok(())
    }

    /// Admission check for `endpoint` from `client_ip`.
    pub async fn check_rate_limit(&self, client_ip: &str, endpoint: &str) -> RateLimitDecision {
        let decision = self.limiter.check(client_ip, endpoint).await;
        if decision == RateLimitDecision::Limited {
            self.audit
                .record(
                    AuditEvent::new(AuditEventKind::RateLimited)
                        .detail("endpoint", endpoint)
                        .detail("client_ip", client_ip),
                )
                .await;
        }
        decision
    }

    /// Drops `user:profile:{ci}` from the Cache pool.
    ///
    /// # Errors
    ///
    /// Returns `Storage` if the Cache pool is unreachable.
    pub async fn invalidate_profile(&self, ci: &str) -> AuthResult<bool> {
        Ok(self.stores.cache.delete(&keys::user_profile(ci)).await?)
    }

    /// Drops `policy:cache:{ci}:{specialty}:{docType}` from the Cache pool.
    ///
    /// # Errors
    ///
    /// Returns `Storage` if the Cache pool is unreachable.
    pub async fn invalidate_policy(
        &self,
        ci: &str,
        specialty: &str,
        doc_type: &str,
    ) -> AuthResult<bool> {
        Ok(self
            .stores
            .cache
            .delete(&keys::policy_cache(ci, specialty, doc_type))
            .await?)
    }

    /// Pings every pool.
    pub async fn health(&self) -> HealthReport {
        let mut pools = Vec::with_capacity(StorePool::ALL.len());
        for pool in StorePool::ALL {
            let status = match self.stores.pool(pool).ping().await {
                Ok(()) => PoolStatus {
                    pool: pool.as_str(),
                    healthy: true,
                    error: None,
                },
                Err(e) => PoolStatus {
                    pool: pool.as_str(),
                    healthy: false,
                    error: Some(e.to_string()),
                },
            };
            pools.push(status);
        }
        HealthReport { pools }
    }

    async fn establish_session(&self, outcome: &ExchangeOutcome) -> AuthResult<SessionGrant> {
        let attributes = self.session_attributes(outcome).await?;
        let session = self
            .sessions
            .create(&outcome.subject, outcome.state.client_type, attributes)
            .await?;

        match self.tokens.issue(&session) {
            Ok(token) => Ok(SessionGrant { session, token }),
            Err(err) => {
                if let Err(e) = self.sessions.invalidate(&session.session_id).await {
                    tracing::warn!(error = %e, "Failed to drop unsigned session");
                }
                Err(err)
            }
        }
    }

    async fn session_attributes(
        &self,
        outcome: &ExchangeOutcome,
    ) -> AuthResult<BTreeMap<String, String>> {
        let mut attributes = BTreeMap::new();
        if let Some(name) = &outcome.display_name {
            attributes.insert("name".to_string(), name.clone());
        }
        if let Some(email) = &outcome.email {
            attributes.insert("email".to_string(), email.clone());
        }

        match self.identities.find_by_ci(&outcome.subject).await? {
            Some(identity) => {
                attributes.extend(identity.session_attributes());
                attributes.insert("registered".to_string(), "true".to_string());
            }
            None => {
                attributes.insert("registered".to_string(), "false".to_string());
            }
        }

        Ok(attributes)
    }

    async fn audit_exchange_failure(&self, request: &CallbackRequest, err: &ExchangeError) {
        let client_type = request.client_type;

        if err.step == crate::exchange::ExchangeStep::StateValidation {
            self.audit
                .record(
                    AuditEvent::new(AuditEventKind::StateRejected)
                        .client_type(client_type)
                        .detail("reason", err.error.to_string()),
                )
                .await;
            return;
        }

        if err.state.is_some() {
            self.audit
                .record(AuditEvent::new(AuditEventKind::StateConsumed).client_type(client_type))
                .await;
        }

        let mut event = AuditEvent::new(AuditEventKind::ExchangeFailed)
            .client_type(client_type)
            .detail("step", err.step.as_str())
            .detail("code", err.error.code());
        if let Some((error, _)) = err.error.oauth_details() {
            event = event.detail("error", error);
        }
        self.audit.record(event).await;

        if err.error.is_server_error() {
            tracing::error!(step = %err.step, error = %err.error, "Code exchange failed");
        } else {
            tracing::warn!(step = %err.step, error = %err.error, "Code exchange rejected");
        }
    }
}
