//! Callback request shape shared by the WEB and MOBILE callbacks.

use std::fmt;

use serde::Deserialize;

use crate::AuthResult;
use crate::crypto::pkce::is_valid_code_verifier;
use crate::error::AuthError;
use crate::state::ClientType;

/// Parameters delivered by the IdP redirect (WEB) or the app (MOBILE).
#[derive(Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallbackRequest {
    /// Authorization code.
    pub code: String,
    /// Echoed `state`.
    pub state: String,
    /// Client type the callback arrived through.
    pub client_type: ClientType,
    /// Redirect URI used at initiation.
    pub redirect_uri: String,
    /// PKCE verifier; mandatory for MOBILE.
    #[serde(default)]
    pub code_verifier: Option<String>,
}

impl CallbackRequest {
    /// WEB callback.
    #[must_use]
    pub fn web(
        code: impl Into<String>,
        state: impl Into<String>,
        redirect_uri: impl Into<String>,
    ) -> Self {
        Self {
            code: code.into(),
            state: state.into(),
            client_type: ClientType::Web,
            redirect_uri: redirect_uri.into(),
            code_verifier: None,
        }
    }

    /// MOBILE callback.
    #[must_use]
    pub fn mobile(
        code: impl Into<String>,
        state: impl Into<String>,
        redirect_uri: impl Into<String>,
        code_verifier: Option<String>,
    ) -> Self {
        Self {
            code: code.into(),
            state: state.into(),
            client_type: ClientType::Mobile,
            redirect_uri: redirect_uri.into(),
            code_verifier,
        }
    }

    /// Pre-flight checks. Runs before the state is consumed and before any
    /// network call.
    ///
    /// # Errors
    ///
    /// Returns a local-validation `OAuth` error (`invalid_request`) when a
    /// required field is empty, a MOBILE callback has no verifier, or the
    /// verifier is not RFC 7636 shaped.
    pub fn validate(&self) -> AuthResult<()> {
        if self.code.is_empty() {
            return Err(AuthError::oauth_local("invalid_request", "code is required"));
        }
        if self.state.is_empty() {
            return Err(AuthError::oauth_local("invalid_request", "state is required"));
        }
        if self.redirect_uri.is_empty() {
            return Err(AuthError::oauth_local(
                "invalid_request",
                "redirect_uri is required",
            ));
        }

        match self.code_verifier.as_deref() {
            None | Some("") if self.client_type.requires_pkce() => Err(AuthError::oauth_local(
                "invalid_request",
                "code_verifier is required for MOBILE clients",
            )),
            Some(verifier) if !verifier.is_empty() && !is_valid_code_verifier(verifier) => {
                Err(AuthError::oauth_local(
                    "invalid_request",
                    "code_verifier must be 43-128 unreserved characters",
                ))
            }
            _ => Ok(()),
        }
    }
}

impl fmt::Debug for CallbackRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackRequest")
            .field("code", &"[REDACTED]")
            .field("state", &crate::state::token_prefix(&self.state))
            .field("client_type", &self.client_type)
            .field("redirect_uri", &self.redirect_uri)
            .field(
                "code_verifier",
                &self.code_verifier.as_ref().map(|_| "[REDACTED]"),
            )
            .finish()
    }
}
