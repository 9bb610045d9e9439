//! Request middleware.

use std::net::SocketAddr;

use axum::{
    extract::{ConnectInfo, MatchedPath, Request, State},
    http::HeaderMap,
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::error::ApiError;
use crate::server::AppState;

/// Rate-limit key for a route: `/auth/mobile/login` becomes `mobile_login`.
pub fn endpoint_name(path: &str) -> String {
    path.trim_start_matches("/auth/").replace('/', "_")
}

/// Client IP: first `X-Forwarded-For` hop when trusted, else the socket peer.
pub fn client_ip(
    headers: &HeaderMap,
    peer: Option<SocketAddr>,
    trust_forwarded_for: bool,
) -> String {
    if trust_forwarded_for {
        let forwarded = headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.split(',').next())
            .map(str::trim)
            .filter(|s| !s.is_empty());
        if let Some(ip) = forwarded {
            return ip.to_string();
        }
    }

    peer.map(|addr| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Fixed-window admission per (client IP, endpoint).
///
/// Must be installed with `route_layer` so the matched path is available.
pub async fn rate_limit(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let path = request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| request.uri().path().to_string());
    let endpoint = endpoint_name(&path);

    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let ip = client_ip(
        request.headers(),
        peer,
        state.server.trust_forwarded_for,
    );

    let decision = state.broker.check_rate_limit(&ip, &endpoint).await;
    if !decision.is_allowed() {
        tracing::warn!(endpoint = %endpoint, "Rate limit exceeded");
        return ApiError::RateLimited {
            endpoint,
            retry_after: state.broker.config().rate_limit.window,
        }
        .into_response();
    }

    next.run(request).await
}
