//! Store key conventions.
//!
//! These layouts are shared with existing deployments and must not change.

use super::StorePool;

/// `session:{sessionId}` in the Session pool.
#[must_use]
pub fn session(session_id: &str) -> String {
    format!("session:{session_id}")
}

/// `user:profile:{ci}` in the Cache pool.
#[must_use]
pub fn user_profile(ci: &str) -> String {
    format!("user:profile:{ci}")
}

/// `policy:cache:{ci}:{specialty}:{docType}` in the Cache pool.
#[must_use]
pub fn policy_cache(ci: &str, specialty: &str, doc_type: &str) -> String {
    format!("policy:cache:{ci}:{specialty}:{doc_type}")
}

/// `oauth:state:{stateToken}` in the State pool.
#[must_use]
pub fn oauth_state(state_token: &str) -> String {
    format!("oauth:state:{state_token}")
}

/// `ratelimit:{ip}:{endpoint}` in the State pool.
#[must_use]
pub fn rate_limit(ip: &str, endpoint: &str) -> String {
    format!("ratelimit:{ip}:{endpoint}")
}

/// Returns the pool a key belongs to, judged by its prefix.
#[must_use]
pub fn pool_for(key: &str) -> Option<StorePool> {
    if key.starts_with("session:") {
        Some(StorePool::Session)
    } else if key.starts_with("user:profile:") || key.starts_with("policy:cache:") {
        Some(StorePool::Cache)
    } else if key.starts_with("oauth:state:") || key.starts_with("ratelimit:") {
        Some(StorePool::State)
    } else {
        None
    }
}
