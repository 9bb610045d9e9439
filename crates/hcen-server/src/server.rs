use std::sync::Arc;

use axum::{
    Router, middleware as axum_middleware,
    routing::{get, post},
};
use hcen_auth::AuthBroker;
use tower_http::trace::TraceLayer;

use crate::config::ServerConfig;
use crate::handlers;
use crate::middleware::rate_limit;

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub broker: Arc<AuthBroker>,
    pub server: Arc<ServerConfig>,
}

impl AppState {
    pub fn new(broker: AuthBroker, server: ServerConfig) -> Self {
        Self {
            broker: Arc::new(broker),
            server: Arc::new(server),
        }
    }
}

/// Builds the application router.
///
/// - `/auth/*` routes are rate limited per (client IP, endpoint)
/// - `/health` is not rate limited
pub fn build_router(state: AppState) -> Router {
    let auth = Router::new()
        .route("/auth/login", get(handlers::web_login))
        .route("/auth/mobile/login", post(handlers::mobile_login))
        .route("/auth/callback", get(handlers::web_callback))
        .route("/auth/mobile/callback", post(handlers::mobile_callback))
        .route("/auth/session", get(handlers::session_info))
        .route("/auth/session/refresh", post(handlers::refresh_session))
        .route("/auth/logout", post(handlers::logout))
        .route_layer(axum_middleware::from_fn_with_state(
            state.clone(),
            rate_limit,
        ));

    Router::new()
        .merge(auth)
        .route("/health", get(handlers::health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
