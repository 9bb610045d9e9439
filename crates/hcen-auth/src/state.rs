//! OAuth state and OIDC nonce tracking.
//!
//! Every authorization attempt gets an [`AuthorizationState`] record in the
//! State pool under `oauth:state:{stateToken}`. The record is consumed exactly
//! once with an atomic take; a forged, replayed or expired `state` finds
//! nothing and fails with [`AuthError::InvalidState`].
//!
//! # Lifecycle
//!
//! 1. [`StateTracker::issue`] stores the record with a bounded TTL
//! 2. The IdP echoes `state` back on the callback
//! 3. [`StateTracker::consume`] takes the record; concurrent callbacks with
//!    the same token see at most one winner
//! 4. Unconsumed records lapse after the TTL

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use url::Url;

use crate::AuthResult;
use crate::crypto::pkce::is_valid_code_challenge;
use crate::crypto::random::{STATE_BYTES, generate_nonce, generate_state, is_token_shaped};
use crate::error::AuthError;
use crate::store::{KeyValueStore, keys, set_json, take_json};

/// Kind of client driving the flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ClientType {
    /// Browser client; confidential exchange with the client secret.
    #[serde(alias = "web")]
    Web,
    /// Native app; public client, PKCE mandatory.
    #[serde(alias = "mobile")]
    Mobile,
}

impl ClientType {
    /// Wire name (`WEB` / `MOBILE`).
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Web => "WEB",
            Self::Mobile => "MOBILE",
        }
    }

    /// Returns `true` if PKCE is required for this client type.
    #[must_use]
    pub fn requires_pkce(&self) -> bool {
        matches!(self, Self::Mobile)
    }
}

impl fmt::Display for ClientType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pending authorization attempt, stored in the State pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorizationState {
    /// The `state` parameter; also the store key suffix.
    pub state_token: String,

    /// OIDC nonce expected in the ID token.
    pub nonce: String,

    /// Client type the attempt was started for.
    pub client_type: ClientType,

    /// PKCE challenge (S256). Always present for MOBILE.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code_challenge: Option<String>,

    /// Redirect URI sent to the IdP; the callback must present the same one.
    pub redirect_uri: String,

    /// Issuance time.
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl AuthorizationState {
    /// Checks the callback's client type and redirect URI against the record.
    ///
    /// # Errors
    ///
    /// A mismatch is treated as tampering and returns `InvalidState`.
    pub fn verify_binding(&self, client_type: ClientType, redirect_uri: &str) -> AuthResult<()> {
        if self.client_type != client_type {
            return Err(AuthError::invalid_state("client type does not match"));
        }
        if self.redirect_uri != redirect_uri {
            return Err(AuthError::invalid_state("redirect URI does not match"));
        }
        Ok(())
    }

    /// First characters of the token, for logs.
    #[must_use]
    pub fn token_prefix(&self) -> &str {
        token_prefix(&self.state_token)
    }
}

/// Issues and single-use-validates authorization state records.
#[derive(Clone)]
pub struct StateTracker {
    store: Arc<dyn KeyValueStore>,
    ttl: Duration,
}

impl StateTracker {
    /// Creates a tracker over the State pool.
    #[must_use]
    pub fn new(store: Arc<dyn KeyValueStore>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    /// Record lifetime.
    #[must_use]
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Generates `state` and `nonce` and persists a new record.
    ///
    /// # Errors
    ///
    /// - `InvalidRequest` if `redirect_uri` is not an absolute http(s) URL, or
    ///   if a MOBILE attempt has no well-formed S256 challenge
    /// - `Storage` if the State pool write fails
    pub async fn issue(
        &self,
        client_type: ClientType,
        redirect_uri: &str,
        code_challenge: Option<&str>,
    ) -> AuthResult<AuthorizationState> {
        validate_redirect_uri(redirect_uri)?;

        match code_challenge {
            Some(challenge) if !is_valid_code_challenge(challenge) => {
                return Err(AuthError::invalid_request(
                    "code_challenge must be 43 base64url characters (S256)",
                ));
            }
            None if client_type.requires_pkce() => {
                return Err(AuthError::invalid_request(
                    "code_challenge is required for MOBILE clients",
                ));
            }
            _ => {}
        }

        let record = AuthorizationState {
            state_token: generate_state(),
            nonce: generate_nonce(),
            client_type,
            code_challenge: code_challenge.map(str::to_string),
            redirect_uri: redirect_uri.to_string(),
            created_at: OffsetDateTime::now_utc(),
        };

        set_json(
            self.store.as_ref(),
            &keys::oauth_state(&record.state_token),
            &record,
            self.ttl,
        )
        .await?;

        tracing::debug!(
            state = %record.token_prefix(),
            client_type = %client_type,
            ttl_secs = self.ttl.as_secs(),
            "Issued authorization state"
        );

        Ok(record)
    }

    /// Atomically reads and deletes the record for `state_token`.
    ///
    /// # Errors
    ///
    /// - `InvalidState` if the token is malformed, was never issued, was
    ///   already consumed, or has expired
    /// - `Storage` if the State pool is unreachable
    pub async fn consume(&self, state_token: &str) -> AuthResult<AuthorizationState> {
        if !is_token_shaped(state_token, STATE_BYTES) {
            return Err(AuthError::invalid_state("malformed state"));
        }

        let record: Option<AuthorizationState> =
            take_json(self.store.as_ref(), &keys::oauth_state(state_token)).await?;

        match record {
            Some(record) => {
                tracing::debug!(
                    state = %record.token_prefix(),
                    client_type = %record.client_type,
                    "Consumed authorization state"
                );
                Ok(record)
            }
            None => {
                tracing::debug!(
                    state = %token_prefix(state_token),
                    "Authorization state not found"
                );
                Err(AuthError::invalid_state(
                    "state is unknown, already used, or expired",
                ))
            }
        }
    }
}

/// Rejects anything but an absolute http(s) URL.
pub(crate) fn validate_redirect_uri(redirect_uri: &str) -> AuthResult<()> {
    if redirect_uri.is_empty() {
        return Err(AuthError::invalid_request("redirect_uri is required"));
    }
    let url = Url::parse(redirect_uri)
        .map_err(|_| AuthError::invalid_request("redirect_uri must be an absolute URL"))?;
    match url.scheme() {
        "https" | "http" => Ok(()),
        _ => Err(AuthError::invalid_request(
            "redirect_uri must use http or https",
        )),
    }
}

pub(crate) fn token_prefix(token: &str) -> &str {
    token.get(..6).unwrap_or(token)
}
