//! Authentication audit events.
//!
//! The broker records an [`AuditEvent`] through an [`AuditSink`] after every
//! state transition: authorization issued, state consumed or rejected,
//! exchange succeeded or failed, session created, refreshed or invalidated,
//! and rate-limited admissions. The sink is passed in explicitly; persisting
//! events is the sink's concern.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::state::ClientType;

/// Log target used by [`TracingAuditSink`].
pub const AUDIT_TARGET: &str = "hcen::audit";

/// Kind of audited transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventKind {
    AuthorizationIssued,
    StateConsumed,
    StateRejected,
    ExchangeSucceeded,
    ExchangeFailed,
    SessionCreated,
    SessionRefreshed,
    SessionInvalidated,
    RateLimited,
}

impl AuditEventKind {
    /// Dotted event code, e.g. `auth.exchange_failed`.
    pub fn code(&self) -> &'static str {
        match self {
            Self::AuthorizationIssued => "auth.authorization_issued",
            Self::StateConsumed => "auth.state_consumed",
            Self::StateRejected => "auth.state_rejected",
            Self::ExchangeSucceeded => "auth.exchange_succeeded",
            Self::ExchangeFailed => "auth.exchange_failed",
            Self::SessionCreated => "session.created",
            Self::SessionRefreshed => "session.refreshed",
            Self::SessionInvalidated => "session.invalidated",
            Self::RateLimited => "ratelimit.limited",
        }
    }

    /// Whether this kind records a failure.
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            Self::StateRejected | Self::ExchangeFailed | Self::RateLimited
        )
    }
}

/// One audited transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEvent {
    pub id: Uuid,
    pub kind: AuditEventKind,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_type: Option<ClientType>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub details: BTreeMap<String, String>,
}

impl AuditEvent {
    pub fn new(kind: AuditEventKind) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            timestamp: OffsetDateTime::now_utc(),
            subject: None,
            client_type: None,
            details: BTreeMap::new(),
        }
    }

    pub fn subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    pub fn client_type(mut self, client_type: ClientType) -> Self {
        self.client_type = Some(client_type);
        self
    }

    pub fn detail(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }
}

/// Receives audit events.
///
/// Recording must not fail the request that produced the event; sinks
/// handle their own delivery errors.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, event: AuditEvent);
}

/// Emits events as `tracing` events on the `hcen::audit` target.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAuditSink;

#[async_trait]
impl AuditSink for TracingAuditSink {
    async fn record(&self, event: AuditEvent) {
        let details = serde_json::to_string(&event.details).unwrap_or_default();
        let subject = event.subject.as_deref().unwrap_or("-");
        let client_type = event.client_type.map(|c| c.as_str()).unwrap_or("-");

        if event.kind.is_failure() {
            tracing::warn!(
                target: AUDIT_TARGET,
                event_id = %event.id,
                event = event.kind.code(),
                subject,
                client_type,
                details = %details,
                "audit"
            );
        } else {
            tracing::info!(
                target: AUDIT_TARGET,
                event_id = %event.id,
                event = event.kind.code(),
                subject,
                client_type,
                details = %details,
                "audit"
            );
        }
    }
}

/// Keeps events in memory. For tests and local development.
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    events: Mutex<Vec<AuditEvent>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of recorded events, oldest first.
    pub async fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().await.clone()
    }

    /// Kinds of recorded events, oldest first.
    pub async fn kinds(&self) -> Vec<AuditEventKind> {
        self.events.lock().await.iter().map(|e| e.kind).collect()
    }
}

#[async_trait]
impl AuditSink for MemoryAuditSink {
    async fn record(&self, event: AuditEvent) {
        self.events.lock().await.push(event);
    }
}
