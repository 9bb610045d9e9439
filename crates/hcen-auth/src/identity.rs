//! Identity lookup by citizen ID.
//!
//! The user registry is owned by another service. The broker only asks it
//! whether a citizen ID (CI) is known and, if so, which roles and attributes
//! to carry into the session.

use std::collections::BTreeMap;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::AuthResult;

/// A registered user, as seen by the broker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserIdentity {
    /// Citizen ID.
    pub ci: String,
    /// Display name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    /// Platform roles (e.g. `PATIENT`, `HEALTH_PROFESSIONAL`).
    #[serde(default)]
    pub roles: Vec<String>,
    /// Extra attributes copied into the session.
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

impl UserIdentity {
    /// Creates an identity with no roles or attributes.
    #[must_use]
    pub fn new(ci: impl Into<String>) -> Self {
        Self {
            ci: ci.into(),
            display_name: None,
            roles: Vec::new(),
            attributes: BTreeMap::new(),
        }
    }

    /// Sets the display name.
    #[must_use]
    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    /// Adds a role.
    #[must_use]
    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.roles.push(role.into());
        self
    }

    /// Session attributes contributed by this identity.
    #[must_use]
    pub fn session_attributes(&self) -> BTreeMap<String, String> {
        let mut attributes = self.attributes.clone();
        if let Some(name) = &self.display_name {
            attributes.insert("name".to_string(), name.clone());
        }
        if !self.roles.is_empty() {
            attributes.insert("roles".to_string(), self.roles.join(","));
        }
        attributes
    }
}

/// Lookup contract against the user registry.
#[async_trait]
pub trait IdentityDirectory: Send + Sync {
    /// Finds a user by citizen ID.
    ///
    /// # Errors
    ///
    /// Returns an error only when the registry cannot be queried; an unknown
    /// CI is `Ok(None)`.
    async fn find_by_ci(&self, ci: &str) -> AuthResult<Option<UserIdentity>>;
}

/// Map-backed directory.
#[derive(Debug, Default)]
pub struct InMemoryIdentityDirectory {
    users: DashMap<String, UserIdentity>,
}

impl InMemoryIdentityDirectory {
    /// Creates an empty directory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces a user.
    pub fn insert(&self, identity: UserIdentity) {
        self.users.insert(identity.ci.clone(), identity);
    }
}

#[async_trait]
impl IdentityDirectory for InMemoryIdentityDirectory {
    async fn find_by_ci(&self, ci: &str) -> AuthResult<Option<UserIdentity>> {
        Ok(self.users.get(ci).map(|u| u.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_find_by_ci() {
        let directory = InMemoryIdentityDirectory::new();
        directory.insert(
            UserIdentity::new("12345678")
                .with_display_name("Ana Pérez")
                .with_role("PATIENT"),
        );

        let found = directory.find_by_ci("12345678").await.unwrap().unwrap();
        assert_eq!(found.roles, vec!["PATIENT".to_string()]);
        assert!(directory.find_by_ci("00000000").await.unwrap().is_none());
    }

    #[test]
    fn test_session_attributes() {
        let mut identity = UserIdentity::new("12345678")
            .with_display_name("Ana")
            .with_role("PATIENT")
            .with_role("HEALTH_PROFESSIONAL");
        identity
            .attributes
            .insert("clinic".to_string(), "c-1".to_string());

        let attributes = identity.session_attributes();
        assert_eq!(attributes["name"], "Ana");
        assert_eq!(attributes["roles"], "PATIENT,HEALTH_PROFESSIONAL");
        assert_eq!(attributes["clinic"], "c-1");
    }
}
