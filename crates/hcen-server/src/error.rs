//! HTTP error responses.

use std::time::Duration;

use axum::{
    Json,
    extract::rejection::JsonRejection,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use hcen_auth::{AuthError, OAuthErrorKind};
use serde_json::json;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

/// Errors returned by the HTTP handlers.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Auth(#[from] AuthError),

    /// Admission refused by the rate limiter.
    #[error("Too many requests to {endpoint}")]
    RateLimited {
        endpoint: String,
        retry_after: Duration,
    },
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::Auth(AuthError::invalid_request(rejection.body_text()))
    }
}

/// HTTP status for a broker error.
pub fn status_for(err: &AuthError) -> StatusCode {
    match err {
        AuthError::InvalidState { .. }
        | AuthError::InvalidToken { .. }
        | AuthError::TokenExpired
        | AuthError::Authentication { .. } => StatusCode::UNAUTHORIZED,
        AuthError::InvalidRequest { .. } => StatusCode::BAD_REQUEST,
        AuthError::OAuth { kind, .. } if kind.is_local() => StatusCode::BAD_REQUEST,
        AuthError::OAuth {
            kind: OAuthErrorKind::Upstream | OAuthErrorKind::Network | OAuthErrorKind::Timeout,
            ..
        } => StatusCode::BAD_GATEWAY,
        AuthError::OAuth { .. }
        | AuthError::CryptoUnavailable { .. }
        | AuthError::Storage { .. }
        | AuthError::Configuration { .. }
        | AuthError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn now_rfc3339() -> String {
    OffsetDateTime::now_utc().format(&Rfc3339).unwrap_or_default()
}

fn body(code: &str, message: &str) -> Json<serde_json::Value> {
    Json(json!({
        "error": code,
        "message": message,
        "timestamp": now_rfc3339(),
    }))
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            Self::Auth(err) => {
                let status = status_for(&err);
                if status.is_server_error() {
                    tracing::error!(
                        error = %err,
                        category = ?err.category(),
                        status = status.as_u16(),
                        "Request failed"
                    );
                } else {
                    tracing::debug!(
                        error = %err,
                        category = ?err.category(),
                        status = status.as_u16(),
                        "Request rejected"
                    );
                }

                let mut response = (status, body(err.code(), &err.client_message())).into_response();
                if status == StatusCode::UNAUTHORIZED {
                    let challenge = format!(r#"Bearer realm="hcen", error="{}""#, err.code());
                    if let Ok(value) = HeaderValue::from_str(&challenge) {
                        response
                            .headers_mut()
                            .insert(header::WWW_AUTHENTICATE, value);
                    }
                }
                response
            }
            Self::RateLimited {
                endpoint,
                retry_after,
            } => {
                let message = format!("Too many requests to {endpoint}; retry later");
                let mut response =
                    (StatusCode::TOO_MANY_REQUESTS, body("rate_limited", &message)).into_response();
                response.headers_mut().insert(
                    header::RETRY_AFTER,
                    HeaderValue::from(retry_after.as_secs().max(1)),
                );
                response
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    async fn json_body(response: Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            status_for(&AuthError::invalid_state("x")),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(status_for(&AuthError::TokenExpired), StatusCode::UNAUTHORIZED);
        assert_eq!(
            status_for(&AuthError::invalid_request("x")),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(status_for(&AuthError::pkce_mismatch()), StatusCode::BAD_REQUEST);
        assert_eq!(
            status_for(&AuthError::oauth_local("invalid_request", "x")),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_for(&AuthError::oauth_upstream("invalid_grant", None)),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            status_for(&AuthError::storage("down")),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            status_for(&AuthError::crypto_unavailable("sha256")),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[tokio::test]
    async fn test_unauthorized_response() {
        let response = ApiError::from(AuthError::TokenExpired).into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            response.headers()[header::WWW_AUTHENTICATE],
            r#"Bearer realm="hcen", error="token_expired""#
        );

        let json = json_body(response).await;
        assert_eq!(json["error"], "token_expired");
        assert!(json["timestamp"].as_str().is_some());
    }

    #[tokio::test]
    async fn test_storage_error_hides_details() {
        let response =
            ApiError::from(AuthError::storage("redis://secret-host refused")).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let json = json_body(response).await;
        assert_eq!(json["error"], "internal_error");
        assert_eq!(json["message"], "Internal server error");
    }

    #[tokio::test]
    async fn test_json_rejection_is_invalid_request() {
        let rejection = JsonRejection::from(axum::extract::rejection::MissingJsonContentType::default());
        let response = ApiError::from(rejection).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let json = json_body(response).await;
        assert_eq!(json["error"], "invalid_request");
        assert!(json["message"].as_str().is_some());
        assert!(json["timestamp"].as_str().is_some());
    }

    #[tokio::test]
    async fn test_rate_limited_response() {
        let response = ApiError::RateLimited {
            endpoint: "callback".into(),
            retry_after: Duration::from_secs(60),
        }
        .into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()[header::RETRY_AFTER], "60");
        assert_eq!(json_body(response).await["error"], "rate_limited");
    }
}
