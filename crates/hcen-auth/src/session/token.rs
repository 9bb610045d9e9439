//! Session token binding.
//!
//! The session identifier is handed to callers inside an HS256 JWT. The JWT
//! only carries the identifier and a few display claims; the session record
//! in the Session pool stays authoritative, so deleting it revokes the token.

use std::fmt;

use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};

use super::Session;
use crate::AuthResult;
use crate::error::AuthError;
use crate::state::ClientType;

/// Claims of a session JWT.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionClaims {
    /// Session identifier.
    pub jti: String,
    /// Subject (citizen ID).
    pub sub: String,
    /// Issuer.
    pub iss: String,
    /// Issued at (Unix timestamp).
    pub iat: i64,
    /// Expiration (Unix timestamp); matches the session's `expiresAt`.
    pub exp: i64,
    /// Client type the session was created for.
    pub client_type: ClientType,
}

/// Signs and verifies session JWTs.
#[derive(Clone)]
pub struct SessionTokenCodec {
    issuer: String,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    validation_ignoring_expiry: Validation,
}

impl SessionTokenCodec {
    /// Creates a codec with an HS256 secret.
    #[must_use]
    pub fn new(secret: &[u8], issuer: impl Into<String>) -> Self {
        let issuer = issuer.into();

        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[issuer.as_str()]);
        validation.set_required_spec_claims(&["exp", "iss", "sub"]);
        validation.leeway = 0;

        let mut validation_ignoring_expiry = validation.clone();
        validation_ignoring_expiry.validate_exp = false;

        Self {
            issuer,
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            validation,
            validation_ignoring_expiry,
        }
    }

    /// Issuer placed in (and required of) every token.
    #[must_use]
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    /// Issues a token bound to `session`.
    ///
    /// # Errors
    ///
    /// Returns `Internal` if signing fails.
    pub fn issue(&self, session: &Session) -> AuthResult<String> {
        let claims = SessionClaims {
            jti: session.session_id.clone(),
            sub: session.subject_id.clone(),
            iss: self.issuer.clone(),
            iat: session.issued_at.unix_timestamp(),
            exp: session.expires_at.unix_timestamp(),
            client_type: session.client_type,
        };
        self.encode(&claims)
    }

    /// Signs arbitrary session claims.
    ///
    /// # Errors
    ///
    /// Returns `Internal` if signing fails.
    pub fn encode(&self, claims: &SessionClaims) -> AuthResult<String> {
        encode(&Header::new(Algorithm::HS256), claims, &self.encoding_key)
            .map_err(|e| AuthError::internal(format!("failed to sign session token: {e}")))
    }

    /// Verifies signature, issuer and expiry.
    ///
    /// # Errors
    ///
    /// - `TokenExpired` if `exp` has passed
    /// - `InvalidToken` for any other verification failure
    pub fn verify(&self, token: &str) -> AuthResult<SessionClaims> {
        self.decode(token, &self.validation)
    }

    /// Verifies signature and issuer, accepting a token whose `exp` has
    /// passed. Used where a lapsed token still identifies its session.
    ///
    /// # Errors
    ///
    /// Returns `InvalidToken` if the signature or issuer do not verify.
    pub fn verify_ignoring_expiry(&self, token: &str) -> AuthResult<SessionClaims> {
        self.decode(token, &self.validation_ignoring_expiry)
    }

    fn decode(&self, token: &str, validation: &Validation) -> AuthResult<SessionClaims> {
        decode::<SessionClaims>(token, &self.decoding_key, validation)
            .map(|data| data.claims)
            .map_err(|err| match err.kind() {
                ErrorKind::ExpiredSignature => AuthError::TokenExpired,
                ErrorKind::InvalidSignature => AuthError::invalid_token("invalid signature"),
                ErrorKind::InvalidIssuer => AuthError::invalid_token("invalid issuer"),
                _ => AuthError::invalid_token("malformed session token"),
            })
    }
}

impl fmt::Debug for SessionTokenCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionTokenCodec")
            .field("issuer", &self.issuer)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use time::{Duration, OffsetDateTime};

    use super::*;
    use crate::crypto::random::generate_session_id;

    const SECRET: &[u8] = b"0123456789abcdef0123456789abcdef";

    fn session(expires_in: Duration) -> Session {
        let now = OffsetDateTime::now_utc();
        Session {
            session_id: generate_session_id(),
            subject_id: "12345678".to_string(),
            client_type: ClientType::Web,
            issued_at: now,
            expires_at: now + expires_in,
            attributes: BTreeMap::new(),
        }
    }

    #[test]
    fn test_issue_and_verify() {
        let codec = SessionTokenCodec::new(SECRET, "hcen");
        let session = session(Duration::hours(1));
        let token = codec.issue(&session).unwrap();

        let claims = codec.verify(&token).unwrap();
        assert_eq!(claims.jti, session.session_id);
        assert_eq!(claims.sub, "12345678");
        assert_eq!(claims.iss, "hcen");
        assert_eq!(claims.client_type, ClientType::Web);
        assert_eq!(claims.exp - claims.iat, 3600);
    }

    #[test]
    fn test_expired_token() {
        let codec = SessionTokenCodec::new(SECRET, "hcen");
        let token = codec.issue(&session(Duration::seconds(-10))).unwrap();
        assert!(matches!(codec.verify(&token), Err(AuthError::TokenExpired)));
    }

    #[test]
    fn test_verify_ignoring_expiry() {
        let codec = SessionTokenCodec::new(SECRET, "hcen");
        let session = session(Duration::seconds(-10));
        let token = codec.issue(&session).unwrap();

        let claims = codec.verify_ignoring_expiry(&token).unwrap();
        assert_eq!(claims.jti, session.session_id);

        let other = SessionTokenCodec::new(b"another-secret-another-secret-xx", "hcen");
        assert!(other.verify_ignoring_expiry(&token).unwrap_err().is_invalid_token());
    }

    #[test]
    fn test_wrong_secret() {
        let codec = SessionTokenCodec::new(SECRET, "hcen");
        let other = SessionTokenCodec::new(b"another-secret-another-secret-xx", "hcen");
        let token = other.issue(&session(Duration::hours(1))).unwrap();
        let err = codec.verify(&token).unwrap_err();
        assert!(matches!(err, AuthError::InvalidToken { .. }));
    }

    #[test]
    fn test_wrong_issuer() {
        let codec = SessionTokenCodec::new(SECRET, "hcen");
        let other = SessionTokenCodec::new(SECRET, "someone-else");
        let token = other.issue(&session(Duration::hours(1))).unwrap();
        assert!(codec.verify(&token).unwrap_err().is_invalid_token());
    }

    #[test]
    fn test_garbage() {
        let codec = SessionTokenCodec::new(SECRET, "hcen");
        for token in ["", "abc", "a.b.c"] {
            assert!(matches!(
                codec.verify(token),
                Err(AuthError::InvalidToken { .. })
            ));
        }
    }

    #[test]
    fn test_debug_hides_keys() {
        let codec = SessionTokenCodec::new(SECRET, "hcen");
        assert!(!format!("{codec:?}").contains("0123456789"));
    }
}
