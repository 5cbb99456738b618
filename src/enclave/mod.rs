//! Enclave facade
//!
//! The API the rest of the hub persists through. Every operation takes a
//! [`Scope`] naming the acting identity (or none); the scope is carried into
//! logs but is not an authorization check, callers that need one ask the
//! ACL methods. Logical collection names are prefixed with the root prefix
//! before they reach the [`ConnectionManager`].
//!
//! - `queue`: content-addressed queues
//! - `keyvalue`: typed key-value table
//! - `keys` / `crypto`: seed and DID key helpers

pub mod crypto;
pub mod keys;
pub mod keyvalue;
pub mod queue;

use std::fmt;
use std::sync::Arc;

use tracing::{debug, info};

pub use keys::{KeyLevel, SeedChain, DID_COLLECTION, KEYSSI_COLLECTION};
pub use keyvalue::{StoredValue, KEY_VALUE_COLLECTION};

use crate::acl::AccessControl;
use crate::collection::CollectionClient;
use crate::config::StoreConfig;
use crate::document::Document;
use crate::error::{EnclaveError, Result};
use crate::manager::{CollectionInfo, ConnectionManager};
use crate::naming;
use crate::query::SortSpec;

/// Operations allowed while the store is in read-only mode
pub const READ_ONLY_SAFE_OPERATIONS: &[&str] = &[
    "collection_exists",
    "list_collections",
    "get_record",
    "get_all_records",
    "get_one_record",
    "filter",
    "count",
    "list_queue",
    "get_object_from_queue",
    "read_key",
    "has_read_access",
    "has_write_access",
    "sign_for_key",
    "verify_for_key",
    "sign_for_did",
    "verify_for_did",
    "encrypt_for_did",
    "decrypt_for_did",
];

/// Whether an operation may run in read-only mode. Unknown operations are not.
pub fn is_read_only_safe(operation: &str) -> bool {
    READ_ONLY_SAFE_OPERATIONS.contains(&operation)
}

/// Identity a call is made on behalf of
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub enum Scope {
    #[default]
    Anonymous,
    Identity(String),
}

impl Scope {
    pub fn identity(identity: impl Into<String>) -> Self {
        Scope::Identity(identity.into())
    }
}

impl From<&str> for Scope {
    fn from(identity: &str) -> Self {
        Scope::identity(identity)
    }
}

impl From<Option<String>> for Scope {
    fn from(identity: Option<String>) -> Self {
        identity.map_or(Scope::Anonymous, Scope::Identity)
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scope::Anonymous => f.write_str("anonymous"),
            Scope::Identity(identity) => f.write_str(identity),
        }
    }
}

/// Permission-aware document-store facade for one storage root
pub struct Enclave {
    manager: Arc<ConnectionManager>,
    root_prefix: String,
    acl: AccessControl,
}

impl Enclave {
    /// Connect to the configured store and open the configured root
    pub async fn open(config: &StoreConfig) -> Result<Self> {
        let manager = Arc::new(ConnectionManager::connect(config).await?);
        Self::new(manager, &config.root_prefix)
    }

    /// Facade over an existing manager. Several roots may share one manager.
    pub fn new(manager: Arc<ConnectionManager>, root_prefix: &str) -> Result<Self> {
        let root_prefix = if root_prefix.is_empty() {
            String::new()
        } else {
            naming::resolve(root_prefix)?
        };
        let acl = AccessControl::new(manager.clone(), &root_prefix)?;
        Ok(Self {
            manager,
            root_prefix,
            acl,
        })
    }

    pub fn root_prefix(&self) -> &str {
        &self.root_prefix
    }

    pub fn manager(&self) -> &Arc<ConnectionManager> {
        &self.manager
    }

    /// Physical name of a logical collection under this root
    pub fn physical_name(&self, collection: &str) -> Result<String> {
        naming::prefixed(&self.root_prefix, collection)
    }

    fn guard(&self, operation: &str) -> Result<()> {
        if self.manager.is_read_only() && !is_read_only_safe(operation) {
            return Err(EnclaveError::ReadOnlyViolation(operation.to_string()));
        }
        Ok(())
    }

    async fn collection(&self, name: &str, for_write: bool) -> Result<Arc<CollectionClient>> {
        let physical = self.physical_name(name)?;
        self.manager.open_database(&physical, for_write).await
    }

    // ---- collections ----

    /// Create a collection, indexing `timestamp` and `indexes`. Idempotent.
    pub async fn create_collection(&self, scope: &Scope, name: &str, indexes: &[&str]) -> Result<()> {
        let physical = self.physical_name(name)?;
        self.guard("create_collection")?;
        self.manager.create_database(&physical, indexes).await?;
        info!(scope = %scope, collection = %name, "create_collection");
        Ok(())
    }

    /// Remove a collection with all its records. Grants are kept.
    pub async fn remove_collection(&self, scope: &Scope, name: &str) -> Result<()> {
        let physical = self.physical_name(name)?;
        self.guard("remove_collection")?;
        self.manager.delete_database(&physical).await?;
        info!(scope = %scope, collection = %name, "remove_collection");
        Ok(())
    }

    pub async fn collection_exists(&self, scope: &Scope, name: &str) -> Result<bool> {
        let physical = self.physical_name(name)?;
        debug!(scope = %scope, collection = %name, "collection_exists");
        self.manager.db_exists(&physical).await
    }

    /// Logical names of the collections under this root
    pub async fn list_collections(&self, scope: &Scope) -> Result<Vec<String>> {
        debug!(scope = %scope, "list_collections");
        self.manager.list_databases(&self.root_prefix).await
    }

    /// Collections under this root with their record counts
    pub async fn list_collections_verbose(&self, scope: &Scope) -> Result<Vec<CollectionInfo>> {
        self.guard("list_collections_verbose")?;
        debug!(scope = %scope, "list_collections_verbose");
        self.manager.list_databases_verbose(&self.root_prefix).await
    }

    /// Index more fields of a collection
    pub async fn add_index(&self, scope: &Scope, name: &str, fields: &[&str]) -> Result<()> {
        let physical = self.physical_name(name)?;
        self.guard("add_index")?;
        debug!(scope = %scope, collection = %name, "add_index");
        self.manager.add_index(&physical, fields).await
    }

    // ---- records ----

    pub async fn insert_record(&self, scope: &Scope, name: &str, pk: &str, doc: Document) -> Result<Document> {
        self.guard("insert_record")?;
        debug!(scope = %scope, collection = %name, pk = %pk, "insert_record");
        self.collection(name, true).await?.insert(pk, doc).await
    }

    pub async fn get_record(&self, scope: &Scope, name: &str, pk: &str) -> Result<Document> {
        self.guard("get_record")?;
        debug!(scope = %scope, collection = %name, pk = %pk, "get_record");
        self.collection(name, false).await?.read(pk).await
    }

    /// Merge `doc` onto a record. Set the fallback-insert flag (see
    /// [`crate::collection::with_fallback`]) to create the record when missing.
    pub async fn update_record(&self, scope: &Scope, name: &str, pk: &str, doc: Document) -> Result<Document> {
        self.guard("update_record")?;
        debug!(scope = %scope, collection = %name, pk = %pk, "update_record");
        self.collection(name, true).await?.update(pk, doc).await
    }

    /// Delete a record, returning its `pk`. Missing records are not an error.
    pub async fn delete_record(&self, scope: &Scope, name: &str, pk: &str) -> Result<String> {
        self.guard("delete_record")?;
        debug!(scope = %scope, collection = %name, pk = %pk, "delete_record");
        self.collection(name, false).await?.delete(pk).await
    }

    /// Records matching every condition
    pub async fn filter(
        &self,
        scope: &Scope,
        name: &str,
        conditions: &[&str],
        sort: Option<SortSpec>,
        limit: Option<f64>,
    ) -> Result<Vec<Document>> {
        self.filter_page(scope, name, conditions, sort, limit, 0).await
    }

    /// [`Enclave::filter`] skipping the first `skip` matches
    pub async fn filter_page(
        &self,
        scope: &Scope,
        name: &str,
        conditions: &[&str],
        sort: Option<SortSpec>,
        limit: Option<f64>,
        skip: usize,
    ) -> Result<Vec<Document>> {
        self.guard("filter")?;
        debug!(scope = %scope, collection = %name, conditions = ?conditions, "filter");
        self.collection(name, false)
            .await?
            .filter(conditions, sort, limit, skip)
            .await
    }

    /// Records in key order, at most `max`
    pub async fn get_all_records(&self, scope: &Scope, name: &str, max: Option<usize>) -> Result<Vec<Document>> {
        self.guard("get_all_records")?;
        debug!(scope = %scope, collection = %name, "get_all_records");
        self.collection(name, false).await?.list(max).await
    }

    /// First record in key order
    pub async fn get_one_record(&self, scope: &Scope, name: &str) -> Result<Document> {
        self.guard("get_one_record")?;
        debug!(scope = %scope, collection = %name, "get_one_record");
        self.collection(name, false).await?.first().await
    }

    pub async fn count(&self, scope: &Scope, name: &str) -> Result<u64> {
        self.guard("count")?;
        debug!(scope = %scope, collection = %name, "count");
        self.collection(name, false).await?.count().await
    }

    // ---- access control ----

    pub async fn grant_write_access(&self, identity: &str) -> Result<()> {
        self.guard("grant_write_access")?;
        self.acl.grant_write_access(identity).await
    }

    pub async fn grant_read_access(&self, identity: &str) -> Result<()> {
        self.guard("grant_read_access")?;
        self.acl.grant_read_access(identity).await
    }

    pub async fn has_write_access(&self, identity: &str) -> Result<bool> {
        self.guard("has_write_access")?;
        self.acl.has_write_access(identity).await
    }

    pub async fn has_read_access(&self, identity: &str) -> Result<bool> {
        self.guard("has_read_access")?;
        self.acl.has_read_access(identity).await
    }

    pub async fn revoke_write_access(&self, identity: &str) -> Result<()> {
        self.guard("revoke_write_access")?;
        self.acl.revoke_write_access(identity).await
    }

    /// Revoke read, and write with it
    pub async fn revoke_read_access(&self, identity: &str) -> Result<()> {
        self.guard("revoke_read_access")?;
        self.acl.revoke_read_access(identity).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{MemoryBackend, StorageBackend};
    use serde_json::json;

    fn enclave(read_only: bool) -> (Arc<MemoryBackend>, Enclave) {
        let memory = Arc::new(MemoryBackend::new());
        let manager = Arc::new(ConnectionManager::with_backend(
            memory.clone(),
            None,
            read_only,
            "readonly",
        ));
        (memory, Enclave::new(manager, "hub").unwrap())
    }

    fn doc(value: serde_json::Value) -> Document {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_allow_list() {
        assert!(is_read_only_safe("get_record"));
        assert!(is_read_only_safe("filter"));
        assert!(!is_read_only_safe("insert_record"));
        assert!(!is_read_only_safe("does_not_exist"));
    }

    #[test]
    fn test_scope_display() {
        assert_eq!(Scope::Anonymous.to_string(), "anonymous");
        assert_eq!(Scope::from("did:x").to_string(), "did:x");
        assert_eq!(Scope::from(None::<String>), Scope::Anonymous);
    }

    #[tokio::test]
    async fn test_scope_does_not_change_behavior() {
        let (_, enclave) = enclave(false);
        let alice = Scope::identity("did:example:alice");
        enclave
            .insert_record(&Scope::Anonymous, "cars", "a", doc(json!({"v": 1})))
            .await
            .unwrap();
        let as_anonymous = enclave.get_record(&Scope::Anonymous, "cars", "a").await.unwrap();
        let as_alice = enclave.get_record(&alice, "cars", "a").await.unwrap();
        assert_eq!(as_anonymous, as_alice);
    }

    #[tokio::test]
    async fn test_collections_are_prefixed() {
        let (memory, enclave) = enclave(false);
        enclave
            .create_collection(&Scope::Anonymous, "Cars", &[])
            .await
            .unwrap();
        assert!(memory.database_info("hub_cars").await.is_ok());
        assert_eq!(
            enclave.list_collections(&Scope::Anonymous).await.unwrap(),
            vec!["cars".to_string()]
        );
    }

    #[tokio::test]
    async fn test_read_only_rejects_writes_before_network() {
        let (memory, enclave) = enclave(true);
        let scope = Scope::Anonymous;
        assert!(matches!(
            enclave.insert_record(&scope, "cars", "a", Document::new()).await,
            Err(EnclaveError::ReadOnlyViolation(_))
        ));
        assert!(matches!(
            enclave.grant_write_access("alice").await,
            Err(EnclaveError::ReadOnlyViolation(_))
        ));
        assert!(matches!(
            enclave.write_key(&scope, "k", StoredValue::Null).await,
            Err(EnclaveError::ReadOnlyViolation(_))
        ));
        assert_eq!(memory.call_count(), 0);

        assert!(enclave.get_record(&scope, "cars", "a").await.unwrap_err().is_not_found());
        assert_eq!(enclave.count(&scope, "cars").await.unwrap(), 0);
    }
}
