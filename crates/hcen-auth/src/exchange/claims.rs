//! ID token and userinfo claims.

use std::collections::HashMap;

use serde::{Deserialize, Deserializer, Serialize};
use subtle::ConstantTimeEq;

use crate::AuthResult;
use crate::error::AuthError;

/// ID token claims, including the gub.uy citizen claims.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdTokenClaims {
    /// Issuer identifier.
    pub iss: String,

    /// Subject identifier.
    #[serde(default)]
    pub sub: Option<String>,

    /// Audience (string or array).
    #[serde(default, deserialize_with = "deserialize_audience")]
    pub aud: Vec<String>,

    /// Expiration time (Unix timestamp).
    #[serde(default)]
    pub exp: Option<i64>,

    /// Issued at time (Unix timestamp).
    #[serde(default)]
    pub iat: Option<i64>,

    /// Nonce echoed from the authorization request.
    #[serde(default)]
    pub nonce: Option<String>,

    /// Citizen identity document number (CI).
    #[serde(default)]
    pub numero_documento: Option<String>,

    /// Full name.
    #[serde(default)]
    pub nombre_completo: Option<String>,

    /// Email address.
    #[serde(default)]
    pub email: Option<String>,

    /// Everything else.
    #[serde(flatten)]
    pub additional: HashMap<String, serde_json::Value>,
}

impl IdTokenClaims {
    /// The citizen ID if present, else `sub`.
    #[must_use]
    pub fn subject(&self) -> Option<&str> {
        non_empty(self.numero_documento.as_deref()).or_else(|| non_empty(self.sub.as_deref()))
    }
}

/// Userinfo endpoint response.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserInfo {
    /// Subject identifier.
    #[serde(default)]
    pub sub: Option<String>,

    /// Citizen identity document number (CI).
    #[serde(default)]
    pub numero_documento: Option<String>,

    /// Full name.
    #[serde(default)]
    pub nombre_completo: Option<String>,

    /// Email address.
    #[serde(default)]
    pub email: Option<String>,
}

impl UserInfo {
    /// The citizen ID if present, else `sub`.
    #[must_use]
    pub fn subject(&self) -> Option<&str> {
        non_empty(self.numero_documento.as_deref()).or_else(|| non_empty(self.sub.as_deref()))
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.is_empty())
}

/// Constant-time nonce comparison.
///
/// # Errors
///
/// Returns a local `invalid_nonce` error when the nonce is missing or does
/// not match.
pub(crate) fn verify_nonce(claims: &IdTokenClaims, expected_nonce: &str) -> AuthResult<()> {
    let nonce_matches = claims
        .nonce
        .as_deref()
        .is_some_and(|nonce| bool::from(nonce.as_bytes().ct_eq(expected_nonce.as_bytes())));
    if !nonce_matches {
        return Err(AuthError::oauth_local(
            "invalid_nonce",
            "ID token nonce does not match the authorization request",
        ));
    }
    Ok(())
}

pub(crate) fn invalid_id_token(description: impl Into<String>) -> AuthError {
    AuthError::oauth_upstream("invalid_id_token", Some(description.into()))
}

fn deserialize_audience<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Audience {
        One(String),
        Many(Vec<String>),
    }

    Ok(match Audience::deserialize(deserializer)? {
        Audience::One(aud) => vec![aud],
        Audience::Many(aud) => aud,
    })
}
