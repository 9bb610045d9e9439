//! # hcen-auth
//!
//! Authentication broker core for the HCEN national health-record exchange.
//!
//! This crate provides:
//! - OAuth 2.0 / OIDC authorization-code flow against an external IdP
//!   (gub.uy-style), with mandatory PKCE for mobile clients
//! - Single-use, TTL-bounded `state` handling as the CSRF defense
//! - Server-side sessions bound into HS256 session tokens
//! - Fixed-window rate limiting per client IP and endpoint
//! - Audit events for every authentication state transition
//!
//! ## Stores
//!
//! All cross-request state lives in three key-value pools (Session, Cache,
//! State) passed in as [`StoreHandles`]. The broker keeps no shared mutable
//! state of its own, so instances scale horizontally over shared stores.
//!
//! ## Modules
//!
//! - [`crypto`] - PKCE and random token primitives
//! - [`store`] - Key-value store trait, key conventions, in-memory store
//! - [`state`] - OAuth state / OIDC nonce tracking
//! - [`exchange`] - Authorization-code exchange with the IdP
//! - [`session`] - Session manager and session token codec
//! - [`rate_limit`] - Fixed-window admission control
//! - [`audit`] - Audit events and sinks
//! - [`identity`] - User lookup by citizen ID
//! - [`broker`] - The [`AuthBroker`] facade
//! - [`config`] - Broker configuration
//! - [`error`] - Error taxonomy

pub mod audit;
pub mod broker;
pub mod config;
pub mod crypto;
pub mod error;
pub mod exchange;
pub mod identity;
pub mod rate_limit;
pub mod session;
pub mod state;
pub mod store;

pub use broker::{AuthBroker, AuthorizationRequest, HealthReport, LoginOutcome, SessionGrant};
pub use config::{BrokerConfig, ConfigError};
pub use error::{AuthError, ErrorCategory, OAuthErrorKind};
pub use store::{KeyValueStore, StoreError, StoreHandles, StorePool};

/// Type alias for broker results.
pub type AuthResult<T> = Result<T, AuthError>;

/// Prelude module for convenient imports.
///
/// ```ignore
/// use hcen_auth::prelude::*;
/// ```
pub mod prelude {
    pub use crate::AuthResult;
    pub use crate::audit::{
        AuditEvent, AuditEventKind, AuditSink, MemoryAuditSink, TracingAuditSink,
    };
    pub use crate::broker::{
        AuthBroker, AuthorizationRequest, HealthReport, LoginOutcome, PoolStatus, SessionGrant,
    };
    pub use crate::config::{
        BrokerConfig, CacheConfig, ConfigError, IdpConfig, RateLimitConfig, SessionConfig,
        StateConfig,
    };
    pub use crate::error::{AuthError, ErrorCategory, OAuthErrorKind};
    pub use crate::exchange::CallbackRequest;
    pub use crate::identity::{IdentityDirectory, InMemoryIdentityDirectory, UserIdentity};
    pub use crate::rate_limit::RateLimitDecision;
    pub use crate::session::{Session, SessionClaims};
    pub use crate::state::ClientType;
    pub use crate::store::{KeyValueStore, MemoryStore, StoreError, StoreHandles, StorePool};
}
