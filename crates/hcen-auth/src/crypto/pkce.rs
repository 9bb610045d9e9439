//! PKCE (Proof Key for Code Exchange) primitives.
//!
//! Implements RFC 7636 with the S256 method only. Mobile clients generate
//! the verifier and keep it; the broker only ever stores and compares the
//! challenge.
//!
//! # Example
//!
//! ```
//! use hcen_auth::crypto::pkce;
//!
//! let verifier = pkce::generate_code_verifier();
//! let challenge = pkce::generate_code_challenge(&verifier);
//!
//! assert!(pkce::is_valid_code_verifier(&verifier));
//! assert!(pkce::validate_code_challenge(Some(&verifier), Some(&challenge)));
//! ```

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use super::random::random_token;
use crate::error::AuthError;

/// Minimum verifier length (RFC 7636 §4.1).
pub const VERIFIER_MIN_LEN: usize = 43;

/// Maximum verifier length (RFC 7636 §4.1).
pub const VERIFIER_MAX_LEN: usize = 128;

/// Length of an S256 challenge: 32 hash bytes, base64url without padding.
pub const CHALLENGE_LEN: usize = 43;

/// Number of random bytes behind a generated verifier.
const VERIFIER_BYTES: usize = 32;

/// PKCE challenge method.
///
/// Only S256 is supported; `plain` is rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PkceChallengeMethod {
    /// SHA-256 hash.
    #[default]
    S256,
}

impl PkceChallengeMethod {
    /// Parse a challenge method from its wire form.
    ///
    /// # Errors
    ///
    /// Returns `InvalidRequest` for anything other than `S256`.
    pub fn parse(method: &str) -> Result<Self, AuthError> {
        match method {
            "S256" => Ok(Self::S256),
            "plain" => Err(AuthError::invalid_request(
                "code_challenge_method 'plain' is not allowed",
            )),
            other => Err(AuthError::invalid_request(format!(
                "unsupported code_challenge_method '{other}'"
            ))),
        }
    }

    /// Get the method as a string.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::S256 => "S256",
        }
    }
}

impl std::fmt::Display for PkceChallengeMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Generates a code verifier from 32 CSPRNG bytes (43 characters).
#[must_use]
pub fn generate_code_verifier() -> String {
    random_token(VERIFIER_BYTES)
}

/// Computes `BASE64URL(SHA256(ASCII(verifier)))`.
#[must_use]
pub fn generate_code_challenge(verifier: &str) -> String {
    let hash = Sha256::digest(verifier.as_bytes());
    URL_SAFE_NO_PAD.encode(hash)
}

/// Checks that `verifier` produces `challenge`.
///
/// Never fails: an absent or malformed input is simply `false`. The final
/// comparison is constant-time.
#[must_use]
pub fn validate_code_challenge(verifier: Option<&str>, challenge: Option<&str>) -> bool {
    let (Some(verifier), Some(challenge)) = (verifier, challenge) else {
        return false;
    };
    if !is_valid_code_verifier(verifier) || challenge.is_empty() {
        return false;
    }

    let expected = generate_code_challenge(verifier);
    expected.as_bytes().ct_eq(challenge.as_bytes()).into()
}

/// Format check: length in `[43, 128]` and charset `[A-Za-z0-9-._~]`.
#[must_use]
pub fn is_valid_code_verifier(verifier: &str) -> bool {
    (VERIFIER_MIN_LEN..=VERIFIER_MAX_LEN).contains(&verifier.len())
        && verifier
            .bytes()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, b'-' | b'.' | b'_' | b'~'))
}

/// Format check for an S256 challenge received from a client.
#[must_use]
pub fn is_valid_code_challenge(challenge: &str) -> bool {
    challenge.len() == CHALLENGE_LEN && URL_SAFE_NO_PAD.decode(challenge).is_ok()
}

/// Verifies SHA-256 against the RFC 7636 Appendix B vector.
///
/// Meant to run once at startup so a broken runtime fails fast instead of
/// on a login request.
///
/// # Errors
///
/// Returns `CryptoUnavailable` if the computed challenge does not match.
pub fn self_test() -> Result<(), AuthError> {
    const VERIFIER: &str = "dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk";
    const CHALLENGE: &str = "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM";

    if generate_code_challenge(VERIFIER) == CHALLENGE {
        Ok(())
    } else {
        Err(AuthError::crypto_unavailable(
            "SHA-256 does not reproduce the RFC 7636 test vector",
        ))
    }
}
