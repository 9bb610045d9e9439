//! HTTP boundary for the HCEN authentication broker.
//!
//! Exposes WEB and MOBILE login flows, session introspection, refresh,
//! logout and a store health check over [`hcen_auth::AuthBroker`].

pub mod config;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod observability;
pub mod server;

pub use config::{AppConfig, LoggingConfig, ServerConfig};
pub use error::ApiError;
pub use observability::init_tracing;
pub use server::{AppState, build_router};
