//! Authentication error taxonomy.
//!
//! Every failure the broker surfaces to its callers is an [`AuthError`]. The
//! variants are matched explicitly at the HTTP boundary; there is no subtype
//! dispatch. `TokenExpired` is the lapsed-TTL specialization of
//! `InvalidToken` and reports `true` from [`AuthError::is_invalid_token`].
//!
//! None of these errors are retried inside the broker. A failure is terminal
//! for the current authorization attempt and the client must restart the
//! flow from redirect initiation.

use std::fmt;

/// Boxed underlying cause. Logged, never serialized to clients.
pub type BoxedCause = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Where an OAuth failure originated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OAuthErrorKind {
    /// The request failed a local pre-flight check before any network call.
    LocalValidation,
    /// The PKCE verifier did not match the stored challenge.
    Pkce,
    /// The identity provider answered with an OAuth error or an unusable response.
    Upstream,
    /// The identity provider could not be reached.
    Network,
    /// The identity provider did not answer within the configured timeout.
    Timeout,
}

impl OAuthErrorKind {
    /// Returns `true` if the fault lies with the request rather than the IdP.
    #[must_use]
    pub fn is_local(&self) -> bool {
        matches!(self, Self::LocalValidation | Self::Pkce)
    }
}

impl fmt::Display for OAuthErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LocalValidation => write!(f, "local_validation"),
            Self::Pkce => write!(f, "pkce"),
            Self::Upstream => write!(f, "upstream"),
            Self::Network => write!(f, "network"),
            Self::Timeout => write!(f, "timeout"),
        }
    }
}

/// Errors raised by the authentication broker.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// The OAuth `state` is unknown, already consumed, expired, or was
    /// presented with parameters that do not match the issued record.
    #[error("Invalid state: {message}")]
    InvalidState {
        /// Description of why the state was rejected.
        message: String,
    },

    /// The session token or identifier is malformed or unknown.
    #[error("Invalid token: {message}")]
    InvalidToken {
        /// Description of why the token is invalid.
        message: String,
    },

    /// The session behind a well-formed token has lapsed.
    #[error("Token expired")]
    TokenExpired,

    /// The code exchange with the identity provider failed.
    #[error(
        "OAuth error ({kind}): {error}: {}",
        .description.as_deref().unwrap_or("no description")
    )]
    OAuth {
        /// Origin of the failure.
        kind: OAuthErrorKind,
        /// OAuth error code, upstream when the IdP supplied one.
        error: String,
        /// Optional human-readable description.
        description: Option<String>,
        /// Wrapped cause for network and protocol failures.
        #[source]
        source: Option<BoxedCause>,
    },

    /// The request is missing or carries malformed parameters.
    #[error("Invalid request: {message}")]
    InvalidRequest {
        /// Description of why the request is invalid.
        message: String,
    },

    /// Catch-all authentication failure.
    #[error("Authentication failed: {message}")]
    Authentication {
        /// Description of the failure.
        message: String,
        /// Optional underlying cause.
        #[source]
        source: Option<BoxedCause>,
    },

    /// A required cryptographic primitive is not usable in this runtime.
    #[error("Cryptographic primitive unavailable: {message}")]
    CryptoUnavailable {
        /// Description of the failed primitive.
        message: String,
    },

    /// A key-value store operation failed.
    #[error("Storage error: {message}")]
    Storage {
        /// Description of the storage error.
        message: String,
    },

    /// The broker configuration is invalid.
    #[error("Configuration error: {message}")]
    Configuration {
        /// Description of the configuration error.
        message: String,
    },

    /// An unexpected internal error occurred.
    #[error("Internal error: {message}")]
    Internal {
        /// Description of the internal error.
        message: String,
    },
}

impl AuthError {
    /// Creates a new `InvalidState` error.
    #[must_use]
    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState {
            message: message.into(),
        }
    }

    /// Creates a new `InvalidToken` error.
    #[must_use]
    pub fn invalid_token(message: impl Into<String>) -> Self {
        Self::InvalidToken {
            message: message.into(),
        }
    }

    /// Creates an `OAuth` error for a failed local pre-flight check.
    #[must_use]
    pub fn oauth_local(error: impl Into<String>, description: impl Into<String>) -> Self {
        Self::OAuth {
            kind: OAuthErrorKind::LocalValidation,
            error: error.into(),
            description: Some(description.into()),
            source: None,
        }
    }

    /// Creates the `OAuth` error raised when the PKCE verifier does not match.
    #[must_use]
    pub fn pkce_mismatch() -> Self {
        Self::OAuth {
            kind: OAuthErrorKind::Pkce,
            error: "invalid_grant".to_string(),
            description: Some("PKCE verification failed".to_string()),
            source: None,
        }
    }

    /// Creates an `OAuth` error carrying the IdP's `error`/`error_description`.
    #[must_use]
    pub fn oauth_upstream(error: impl Into<String>, description: Option<String>) -> Self {
        Self::OAuth {
            kind: OAuthErrorKind::Upstream,
            error: error.into(),
            description,
            source: None,
        }
    }

    /// Creates an `OAuth` error wrapping a transport failure.
    #[must_use]
    pub fn oauth_transport(kind: OAuthErrorKind, cause: impl Into<BoxedCause>) -> Self {
        let description = match kind {
            OAuthErrorKind::Timeout => "identity provider did not respond in time",
            _ => "identity provider unreachable",
        };
        Self::OAuth {
            kind,
            error: "temporarily_unavailable".to_string(),
            description: Some(description.to_string()),
            source: Some(cause.into()),
        }
    }

    /// Creates a new `InvalidRequest` error.
    #[must_use]
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest {
            message: message.into(),
        }
    }

    /// Creates a new `Authentication` error.
    #[must_use]
    pub fn authentication(message: impl Into<String>) -> Self {
        Self::Authentication {
            message: message.into(),
            source: None,
        }
    }

    /// Creates a new `CryptoUnavailable` error.
    #[must_use]
    pub fn crypto_unavailable(message: impl Into<String>) -> Self {
        Self::CryptoUnavailable {
            message: message.into(),
        }
    }

    /// Creates a new `Storage` error.
    #[must_use]
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    /// Creates a new `Configuration` error.
    #[must_use]
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Creates a new `Internal` error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns `true` for `InvalidToken` and its `TokenExpired` specialization.
    #[must_use]
    pub fn is_invalid_token(&self) -> bool {
        matches!(self, Self::InvalidToken { .. } | Self::TokenExpired)
    }

    /// Returns `true` if this error is caused by the caller (4xx category).
    #[must_use]
    pub fn is_client_error(&self) -> bool {
        match self {
            Self::InvalidState { .. }
            | Self::InvalidToken { .. }
            | Self::TokenExpired
            | Self::InvalidRequest { .. }
            | Self::Authentication { .. } => true,
            Self::OAuth { kind, .. } => kind.is_local(),
            _ => false,
        }
    }

    /// Returns `true` if this error is caused by the broker or its dependencies.
    #[must_use]
    pub fn is_server_error(&self) -> bool {
        !self.is_client_error()
    }

    /// Returns the upstream OAuth error code and description, when present.
    #[must_use]
    pub fn oauth_details(&self) -> Option<(&str, Option<&str>)> {
        match self {
            Self::OAuth {
                error, description, ..
            } => Some((error.as_str(), description.as_deref())),
            _ => None,
        }
    }

    /// Returns the stable machine-readable error code.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidState { .. } => "invalid_state",
            Self::InvalidToken { .. } => "invalid_token",
            Self::TokenExpired => "token_expired",
            Self::OAuth {
                kind: OAuthErrorKind::Pkce,
                ..
            } => "pkce_verification_failed",
            Self::OAuth { .. } => "oauth_error",
            Self::InvalidRequest { .. } => "invalid_request",
            Self::Authentication { .. } => "authentication_failed",
            Self::CryptoUnavailable { .. } => "crypto_unavailable",
            Self::Storage { .. } | Self::Configuration { .. } | Self::Internal { .. } => {
                "internal_error"
            }
        }
    }

    /// Returns a message that is safe to return to an external caller.
    ///
    /// Server-side failures collapse to a generic message; their details
    /// belong in the logs.
    #[must_use]
    pub fn client_message(&self) -> String {
        match self {
            Self::InvalidState { .. } => {
                "Authorization state is invalid or expired; restart the login flow".to_string()
            }
            Self::InvalidToken { .. } => "Session token is invalid".to_string(),
            Self::TokenExpired => "Session has expired".to_string(),
            Self::OAuth {
                kind: OAuthErrorKind::Network | OAuthErrorKind::Timeout,
                ..
            } => "Identity provider is unavailable".to_string(),
            Self::OAuth {
                error, description, ..
            } => match description {
                Some(description) => format!("{error}: {description}"),
                None => error.clone(),
            },
            Self::InvalidRequest { message } => message.clone(),
            Self::Authentication { .. } => "Authentication failed".to_string(),
            Self::CryptoUnavailable { .. }
            | Self::Storage { .. }
            | Self::Configuration { .. }
            | Self::Internal { .. } => "Internal server error".to_string(),
        }
    }

    /// Returns the error category for logging/monitoring purposes.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::InvalidState { .. } => ErrorCategory::Csrf,
            Self::InvalidToken { .. } | Self::TokenExpired => ErrorCategory::Token,
            Self::OAuth { .. } => ErrorCategory::Federation,
            Self::InvalidRequest { .. } => ErrorCategory::Validation,
            Self::Authentication { .. } => ErrorCategory::Authentication,
            Self::Storage { .. } => ErrorCategory::Infrastructure,
            Self::CryptoUnavailable { .. } | Self::Configuration { .. } => {
                ErrorCategory::Configuration
            }
            Self::Internal { .. } => ErrorCategory::Internal,
        }
    }
}

/// Categories of authentication errors for logging and monitoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// State/CSRF validation errors.
    Csrf,
    /// Session token lifecycle errors.
    Token,
    /// Identity provider federation errors.
    Federation,
    /// Request validation errors.
    Validation,
    /// Generic authentication failures.
    Authentication,
    /// Key-value store errors.
    Infrastructure,
    /// Configuration and runtime capability errors.
    Configuration,
    /// Internal server errors.
    Internal,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Csrf => write!(f, "csrf"),
            Self::Token => write!(f, "token"),
            Self::Federation => write!(f, "federation"),
            Self::Validation => write!(f, "validation"),
            Self::Authentication => write!(f, "authentication"),
            Self::Infrastructure => write!(f, "infrastructure"),
            Self::Configuration => write!(f, "configuration"),
            Self::Internal => write!(f, "internal"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = AuthError::invalid_state("state not found");
        assert_eq!(err.to_string(), "Invalid state: state not found");

        let err = AuthError::TokenExpired;
        assert_eq!(err.to_string(), "Token expired");

        let err = AuthError::oauth_upstream("invalid_grant", Some("code used".to_string()));
        assert_eq!(
            err.to_string(),
            "OAuth error (upstream): invalid_grant: code used"
        );

        let err = AuthError::oauth_upstream("server_error", None);
        assert_eq!(
            err.to_string(),
            "OAuth error (upstream): server_error: no description"
        );
    }

    #[test]
    fn test_token_expired_is_invalid_token() {
        assert!(AuthError::TokenExpired.is_invalid_token());
        assert!(AuthError::invalid_token("bad").is_invalid_token());
        assert!(!AuthError::invalid_state("bad").is_invalid_token());
    }

    #[test]
    fn test_error_predicates() {
        assert!(AuthError::invalid_state("x").is_client_error());
        assert!(AuthError::pkce_mismatch().is_client_error());
        assert!(AuthError::oauth_local("invalid_request", "x").is_client_error());
        assert!(AuthError::oauth_upstream("invalid_grant", None).is_server_error());
        assert!(AuthError::storage("redis down").is_server_error());
        assert!(!AuthError::storage("redis down").is_client_error());
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(AuthError::invalid_state("x").code(), "invalid_state");
        assert_eq!(AuthError::invalid_token("x").code(), "invalid_token");
        assert_eq!(AuthError::TokenExpired.code(), "token_expired");
        assert_eq!(AuthError::pkce_mismatch().code(), "pkce_verification_failed");
        assert_eq!(
            AuthError::oauth_upstream("access_denied", None).code(),
            "oauth_error"
        );
        assert_eq!(AuthError::storage("x").code(), "internal_error");
    }

    #[test]
    fn test_client_message_hides_internal_causes() {
        let err = AuthError::storage("connection refused to 10.0.0.4:6379");
        assert_eq!(err.client_message(), "Internal server error");

        let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        let err = AuthError::oauth_transport(OAuthErrorKind::Network, io);
        assert_eq!(err.client_message(), "Identity provider is unavailable");
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_oauth_details() {
        let err = AuthError::oauth_upstream("invalid_grant", Some("expired".to_string()));
        assert_eq!(err.oauth_details(), Some(("invalid_grant", Some("expired"))));
        assert_eq!(AuthError::TokenExpired.oauth_details(), None);
    }

    #[test]
    fn test_error_category() {
        assert_eq!(AuthError::invalid_state("x").category(), ErrorCategory::Csrf);
        assert_eq!(AuthError::TokenExpired.category(), ErrorCategory::Token);
        assert_eq!(
            AuthError::pkce_mismatch().category(),
            ErrorCategory::Federation
        );
        assert_eq!(ErrorCategory::Infrastructure.to_string(), "infrastructure");
    }
}
