//! Wildcard read/write grants
//!
//! Grants are ordinary records in the reserved `grants` collection, keyed
//! `<permission>:<resource>:<identity>`. Write implies read: granting write
//! also grants read, and revoking read also revokes write. Deleting a data
//! collection leaves grants untouched.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use crate::collection::{with_fallback, CollectionClient};
use crate::document::to_document;
use crate::error::Result;
use crate::manager::ConnectionManager;
use crate::naming;
use crate::query::{self, Clause, Condition, Operator};

/// Logical collection holding grants
pub const GRANTS_COLLECTION: &str = "grants";

/// Resource meaning "everything"
pub const WILDCARD_RESOURCE: &str = "*";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Permission {
    Read,
    Write,
}

impl Permission {
    pub fn as_str(&self) -> &'static str {
        match self {
            Permission::Read => "read",
            Permission::Write => "write",
        }
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Persisted grant record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Grant {
    pub permission: Permission,
    pub resource: String,
    pub identity: String,
}

impl Grant {
    pub fn wildcard(permission: Permission, identity: impl Into<String>) -> Self {
        Self {
            permission,
            resource: WILDCARD_RESOURCE.to_string(),
            identity: identity.into(),
        }
    }

    /// Record key of this grant
    pub fn key(&self) -> String {
        format!("{}:{}:{}", self.permission, self.resource, self.identity)
    }
}

/// Grant storage on top of the connection manager
pub struct AccessControl {
    manager: Arc<ConnectionManager>,
    collection: String,
}

impl AccessControl {
    pub fn new(manager: Arc<ConnectionManager>, root_prefix: &str) -> Result<Self> {
        let collection = naming::prefixed(root_prefix, GRANTS_COLLECTION)?;
        Ok(Self {
            manager,
            collection,
        })
    }

    async fn grants(&self, for_write: bool) -> Result<Arc<CollectionClient>> {
        self.manager.open_database(&self.collection, for_write).await
    }

    /// Persist a wildcard grant. Granting twice is a no-op.
    pub async fn grant(&self, permission: Permission, identity: &str) -> Result<()> {
        let grant = Grant::wildcard(permission, identity);
        self.grants(true)
            .await?
            .update(&grant.key(), with_fallback(to_document(&grant)?))
            .await?;
        info!(identity = %identity, permission = %permission, "Access granted");
        Ok(())
    }

    /// Remove a wildcard grant. Removing a missing grant succeeds.
    pub async fn revoke(&self, permission: Permission, identity: &str) -> Result<()> {
        let grant = Grant::wildcard(permission, identity);
        self.grants(true).await?.delete(&grant.key()).await?;
        info!(identity = %identity, permission = %permission, "Access revoked");
        Ok(())
    }

    /// Whether the wildcard resource is among the identity's direct grants
    pub async fn has(&self, permission: Permission, identity: &str) -> Result<bool> {
        let mut query = query::parse::<&str>(&[], None, None)?;
        query.selector.push(Clause::Single(Condition::new(
            "identity",
            Operator::Eq,
            Value::String(identity.to_string()),
        )));
        query.selector.push(Clause::Single(Condition::new(
            "permission",
            Operator::Eq,
            Value::String(permission.to_string()),
        )));

        let grants = self.grants(false).await?.find(&query).await?;
        Ok(grants
            .iter()
            .any(|g| g.get("resource").and_then(Value::as_str) == Some(WILDCARD_RESOURCE)))
    }

    pub async fn grant_write_access(&self, identity: &str) -> Result<()> {
        self.grant(Permission::Write, identity).await?;
        self.grant(Permission::Read, identity).await
    }

    pub async fn grant_read_access(&self, identity: &str) -> Result<()> {
        self.grant(Permission::Read, identity).await
    }

    pub async fn has_write_access(&self, identity: &str) -> Result<bool> {
        self.has(Permission::Write, identity).await
    }

    pub async fn has_read_access(&self, identity: &str) -> Result<bool> {
        self.has(Permission::Read, identity).await
    }

    pub async fn revoke_write_access(&self, identity: &str) -> Result<()> {
        self.revoke(Permission::Write, identity).await
    }

    pub async fn revoke_read_access(&self, identity: &str) -> Result<()> {
        self.revoke(Permission::Read, identity).await?;
        self.revoke(Permission::Write, identity).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;

    fn acl() -> AccessControl {
        let memory = Arc::new(MemoryBackend::new());
        let manager = Arc::new(ConnectionManager::with_backend(memory, None, false, "readonly"));
        AccessControl::new(manager, "hub").unwrap()
    }

    #[test]
    fn test_grant_key() {
        let grant = Grant::wildcard(Permission::Write, "did:example:alice");
        assert_eq!(grant.key(), "write:*:did:example:alice");
    }

    #[tokio::test]
    async fn test_write_implies_read() {
        let acl = acl();
        acl.grant_write_access("alice").await.unwrap();
        assert!(acl.has_write_access("alice").await.unwrap());
        assert!(acl.has_read_access("alice").await.unwrap());
        assert!(!acl.has_read_access("bob").await.unwrap());
    }

    #[tokio::test]
    async fn test_revoke_read_drops_write() {
        let acl = acl();
        acl.grant_write_access("alice").await.unwrap();
        acl.revoke_read_access("alice").await.unwrap();
        assert!(!acl.has_write_access("alice").await.unwrap());
        assert!(!acl.has_read_access("alice").await.unwrap());
    }

    #[tokio::test]
    async fn test_revoke_write_keeps_read() {
        let acl = acl();
        acl.grant_write_access("alice").await.unwrap();
        acl.revoke_write_access("alice").await.unwrap();
        assert!(!acl.has_write_access("alice").await.unwrap());
        assert!(acl.has_read_access("alice").await.unwrap());
    }

    #[tokio::test]
    async fn test_numeric_looking_identity() {
        let acl = acl();
        acl.grant_read_access("12345").await.unwrap();
        assert!(acl.has_read_access("12345").await.unwrap());
        acl.grant_read_access("12345").await.unwrap();
    }
}
