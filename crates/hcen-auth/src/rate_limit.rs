//! Fixed-window rate limiting per (client IP, endpoint).
//!
//! Counters live in the State pool under `ratelimit:{ip}:{endpoint}`. The
//! first request of a window creates the counter with TTL = window length;
//! the increment and the TTL are a single atomic store operation.

use std::sync::Arc;

use crate::config::RateLimitConfig;
use crate::store::{KeyValueStore, keys};

/// Admission decision.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RateLimitDecision {
    /// Request admitted.
    Allowed,
    /// Threshold exceeded for the current window.
    Limited,
}

impl RateLimitDecision {
    /// Returns `true` for [`RateLimitDecision::Allowed`].
    #[must_use]
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed)
    }
}

/// Store-backed fixed-window limiter.
#[derive(Clone)]
pub struct RateLimiter {
    store: Arc<dyn KeyValueStore>,
    config: RateLimitConfig,
}

impl RateLimiter {
    /// Creates a limiter over the State pool.
    #[must_use]
    pub fn new(store: Arc<dyn KeyValueStore>, config: RateLimitConfig) -> Self {
        Self { store, config }
    }

    /// Limiter settings.
    #[must_use]
    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Counts one request and decides whether to admit it.
    ///
    /// Rate limiting is an admission decision, not an error: a store failure
    /// admits the request and is logged.
    pub async fn check(&self, client_ip: &str, endpoint: &str) -> RateLimitDecision {
        if !self.config.enabled {
            return RateLimitDecision::Allowed;
        }

        let key = keys::rate_limit(client_ip, endpoint);
        let count = match self.store.increment(&key, self.config.window).await {
            Ok(count) => count,
            Err(e) => {
                tracing::warn!(
                    endpoint = %endpoint,
                    error = %e,
                    "Rate limit counter unavailable, admitting request"
                );
                return RateLimitDecision::Allowed;
            }
        };

        let limit = u64::from(self.config.limit_for(endpoint));
        if count > limit {
            tracing::debug!(endpoint = %endpoint, count, limit, "Rate limit exceeded");
            RateLimitDecision::Limited
        } else {
            RateLimitDecision::Allowed
        }
    }
}
