//! Server-side sessions.
//!
//! A [`Session`] lives in the Session pool under `session:{sessionId}` with a
//! TTL equal to the configured session lifetime. The identifier is 32 bytes
//! from the OS CSPRNG and is unrelated to the subject.
//!
//! Lookups never distinguish "never existed" from "expired" to the caller
//! beyond the error kind: a malformed identifier is rejected as
//! `InvalidToken` without touching the store, and any well-formed identifier
//! the store does not know is `TokenExpired`.

pub mod token;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::AuthResult;
use crate::crypto::random::{SESSION_ID_BYTES, generate_session_id, is_token_shaped};
use crate::error::AuthError;
use crate::state::ClientType;
use crate::store::{KeyValueStore, get_json, keys, set_json};

pub use token::{SessionClaims, SessionTokenCodec};

/// Session record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    /// Opaque identifier.
    pub session_id: String,

    /// Authenticated subject (citizen ID).
    pub subject_id: String,

    /// Client type the session was created for.
    pub client_type: ClientType,

    /// Creation time.
    #[serde(with = "time::serde::rfc3339")]
    pub issued_at: OffsetDateTime,

    /// Expiry; moved forward by `refresh`.
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,

    /// Free-form attributes (display name, roles, ...).
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

impl Session {
    /// Returns `true` once `expires_at` has passed.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        OffsetDateTime::now_utc() >= self.expires_at
    }

    /// Time left before expiry.
    #[must_use]
    pub fn remaining(&self) -> Duration {
        let left = self.expires_at - OffsetDateTime::now_utc();
        Duration::try_from(left).unwrap_or(Duration::ZERO)
    }
}

/// Creates, loads, refreshes and invalidates sessions.
#[derive(Clone)]
pub struct SessionManager {
    store: Arc<dyn KeyValueStore>,
    ttl: Duration,
    sliding: bool,
}

impl SessionManager {
    /// Creates a manager over the Session pool.
    #[must_use]
    pub fn new(store: Arc<dyn KeyValueStore>, ttl: Duration, sliding: bool) -> Self {
        Self {
            store,
            ttl,
            sliding,
        }
    }

    /// Session lifetime.
    #[must_use]
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Creates and stores a new session.
    ///
    /// # Errors
    ///
    /// - `InvalidRequest` if `subject_id` is empty
    /// - `Storage` if the Session pool write fails
    pub async fn create(
        &self,
        subject_id: &str,
        client_type: ClientType,
        attributes: BTreeMap<String, String>,
    ) -> AuthResult<Session> {
        if subject_id.is_empty() {
            return Err(AuthError::invalid_request("subject is required"));
        }

        let issued_at = OffsetDateTime::now_utc();
        let session = Session {
            session_id: generate_session_id(),
            subject_id: subject_id.to_string(),
            client_type,
            issued_at,
            expires_at: issued_at + self.ttl,
            attributes,
        };

        set_json(
            self.store.as_ref(),
            &keys::session(&session.session_id),
            &session,
            self.ttl,
        )
        .await?;

        tracing::debug!(
            client_type = %client_type,
            ttl_secs = self.ttl.as_secs(),
            "Created session"
        );

        Ok(session)
    }

    /// Loads a live session.
    ///
    /// # Errors
    ///
    /// - `InvalidToken` if `session_id` is malformed (no store call is made)
    /// - `TokenExpired` if the store no longer holds the session
    /// - `Storage` if the Session pool is unreachable
    pub async fn get(&self, session_id: &str) -> AuthResult<Session> {
        check_session_id(session_id)?;

        let session: Option<Session> =
            get_json(self.store.as_ref(), &keys::session(session_id)).await?;

        match session {
            Some(session) if !session.is_expired() => Ok(session),
            _ => Err(AuthError::TokenExpired),
        }
    }

    /// Deletes a session. Deleting an absent or malformed id is not an error.
    ///
    /// Returns `true` if a live session was removed.
    ///
    /// # Errors
    ///
    /// Returns `Storage` if the Session pool is unreachable.
    pub async fn invalidate(&self, session_id: &str) -> AuthResult<bool> {
        if check_session_id(session_id).is_err() {
            return Ok(false);
        }
        let removed = self.store.delete(&keys::session(session_id)).await?;
        tracing::debug!(removed, "Invalidated session");
        Ok(removed)
    }

    /// Extends a live session by one TTL without rotating its identifier.
    ///
    /// The write only lands if the session still exists, so a concurrent
    /// logout is never undone.
    ///
    /// # Errors
    ///
    /// - `InvalidRequest` if sliding sessions are disabled
    /// - the errors of [`get`](Self::get)
    pub async fn refresh(&self, session_id: &str) -> AuthResult<Session> {
        if !self.sliding {
            return Err(AuthError::invalid_request("session refresh is disabled"));
        }

        let mut session = self.get(session_id).await?;
        session.expires_at = OffsetDateTime::now_utc() + self.ttl;

        let raw = serde_json::to_string(&session)
            .map_err(|e| AuthError::internal(format!("failed to serialize session: {e}")))?;
        let written = self
            .store
            .set_if_exists(&keys::session(session_id), &raw, self.ttl)
            .await?;

        if !written {
            return Err(AuthError::TokenExpired);
        }

        tracing::debug!(ttl_secs = self.ttl.as_secs(), "Refreshed session");
        Ok(session)
    }
}

fn check_session_id(session_id: &str) -> AuthResult<()> {
    if is_token_shaped(session_id, SESSION_ID_BYTES) {
        Ok(())
    } else {
        Err(AuthError::invalid_token("malformed session identifier"))
    }
}
