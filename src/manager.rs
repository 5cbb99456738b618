//! Connection and collection lifecycle
//!
//! [`ConnectionManager`] owns the single backend handle (wrapped in
//! [`ReauthBackend`]), read-only mode and the collection client cache. Every
//! operation resolves the collection name first, so an invalid name never
//! produces a remote call.

use std::sync::Arc;

use dashmap::{DashMap, DashSet};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use crate::backend::{self, Credentials, SecurityObject, StorageBackend};
use crate::collection::CollectionClient;
use crate::config::StoreConfig;
use crate::document::{internal_field, Document, INTERNAL_TIMESTAMP_FIELD};
use crate::error::{EnclaveError, Result};
use crate::naming;
use crate::session::ReauthBackend;

/// Design document holding the write policy of every created collection
pub const READ_ONLY_POLICY_ID: &str = "_design/read_only_policy";

/// Rejects writes from anyone who is not a store admin
const READ_ONLY_VALIDATION: &str = "function(newDoc, oldDoc, userCtx) { \
if (userCtx.roles.indexOf('_admin') === -1) { \
throw({forbidden: 'This database is read-only for ' + userCtx.name}); } }";

/// Collection name with its record count
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionInfo {
    pub name: String,
    pub doc_count: u64,
}

/// Owner of the store connection
pub struct ConnectionManager {
    backend: Arc<dyn StorageBackend>,
    read_only: bool,
    read_only_identity: String,
    clients: DashMap<String, Arc<CollectionClient>>,
    ensured: DashSet<String>,
}

impl ConnectionManager {
    /// Connect to the configured store, logging in when credentials are set
    pub async fn connect(config: &StoreConfig) -> Result<Self> {
        config.validate()?;
        let raw = backend::connect(config)?;
        let credentials = config.credentials();

        let manager = Self::with_backend(
            raw,
            credentials.clone(),
            config.read_only,
            config.read_only_identity.clone(),
        );
        if let Some(credentials) = credentials {
            manager.backend.authenticate(&credentials).await?;
        }

        info!(
            store = %manager.backend.id(),
            read_only = manager.read_only,
            "Connection manager ready"
        );
        Ok(manager)
    }

    /// Build a manager around an existing backend. No login is attempted
    /// until the store answers 401.
    pub fn with_backend(
        raw: Arc<dyn StorageBackend>,
        credentials: Option<Credentials>,
        read_only: bool,
        read_only_identity: impl Into<String>,
    ) -> Self {
        Self {
            backend: Arc::new(ReauthBackend::new(raw, credentials)),
            read_only,
            read_only_identity: read_only_identity.into(),
            clients: DashMap::new(),
            ensured: DashSet::new(),
        }
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// Backend handle with re-authentication applied
    pub fn backend(&self) -> &Arc<dyn StorageBackend> {
        &self.backend
    }

    /// Whether a collection exists. In read-only mode this is answered `true`
    /// without asking the store.
    pub async fn db_exists(&self, name: &str) -> Result<bool> {
        let name = naming::resolve(name)?;
        if self.read_only {
            return Ok(true);
        }
        match self.backend.database_info(&name).await {
            Ok(_) => Ok(true),
            Err(EnclaveError::CollectionNotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Create a collection with its write policy, service membership and
    /// indexes on `timestamp` plus `indexes`. Creating twice succeeds.
    pub async fn create_database(&self, name: &str, indexes: &[&str]) -> Result<()> {
        let name = naming::resolve(name)?;
        self.ensure_writable("create_database")?;
        self.provision(&name, indexes).await?;
        self.ensured.insert(name);
        Ok(())
    }

    /// Delete a collection and all its records
    pub async fn delete_database(&self, name: &str) -> Result<()> {
        let name = naming::resolve(name)?;
        self.ensure_writable("delete_database")?;

        match self.backend.delete_database(&name).await {
            Ok(()) => info!(collection = %name, "Collection deleted"),
            Err(EnclaveError::CollectionNotFound(_)) => {
                debug!(collection = %name, "Collection already absent");
            }
            Err(e) => return Err(e),
        }
        self.clients.remove(&name);
        self.ensured.remove(&name);
        Ok(())
    }

    /// Collections under `prefix`, with the prefix stripped
    pub async fn list_databases(&self, prefix: &str) -> Result<Vec<String>> {
        let names = self.backend.list_databases().await?;
        Ok(names
            .iter()
            .filter(|name| !name.starts_with('_'))
            .filter_map(|name| naming::strip_prefix(prefix, name))
            .map(str::to_string)
            .collect())
    }

    /// Collections under `prefix` with their record counts
    pub async fn list_databases_verbose(&self, prefix: &str) -> Result<Vec<CollectionInfo>> {
        self.ensure_writable("list_databases_verbose")?;

        let mut infos = Vec::new();
        for name in self.backend.list_databases().await? {
            let Some(logical) = naming::strip_prefix(prefix, &name) else {
                continue;
            };
            if name.starts_with('_') {
                continue;
            }
            let info = self.backend.database_info(&name).await?;
            infos.push(CollectionInfo {
                name: logical.to_string(),
                doc_count: info.doc_count,
            });
        }
        Ok(infos)
    }

    /// Client for a collection. With `for_write` the collection is created on
    /// first use.
    pub async fn open_database(&self, name: &str, for_write: bool) -> Result<Arc<CollectionClient>> {
        let name = naming::resolve(name)?;

        if for_write && !self.read_only && !self.ensured.contains(&name) {
            self.provision(&name, &[]).await?;
            self.ensured.insert(name.clone());
        }

        let client = self
            .clients
            .entry(name.clone())
            .or_insert_with(|| Arc::new(CollectionClient::new(name, self.backend.clone())))
            .clone();
        Ok(client)
    }

    /// Add an index on external field names
    pub async fn add_index(&self, name: &str, fields: &[&str]) -> Result<()> {
        let name = naming::resolve(name)?;
        let fields: Vec<String> = fields
            .iter()
            .map(|field| internal_field(field).to_string())
            .collect();
        self.backend.create_index(&name, &fields).await
    }

    fn ensure_writable(&self, op: &str) -> Result<()> {
        if self.read_only {
            return Err(EnclaveError::ReadOnlyViolation(op.to_string()));
        }
        Ok(())
    }

    async fn provision(&self, name: &str, indexes: &[&str]) -> Result<()> {
        match self.backend.create_database(name).await {
            Ok(()) => info!(collection = %name, "Collection created"),
            Err(EnclaveError::AlreadyExists(_)) => {
                debug!(collection = %name, "Collection already exists");
            }
            Err(e) => return Err(e),
        }

        match self
            .backend
            .put_document(name, READ_ONLY_POLICY_ID, &read_only_policy())
            .await
        {
            Ok(_) | Err(EnclaveError::Conflict(_)) => {}
            Err(e) => return Err(e),
        }

        self.backend
            .put_security(
                name,
                &SecurityObject::members([self.read_only_identity.clone()]),
            )
            .await?;

        self.backend
            .create_index(name, &[INTERNAL_TIMESTAMP_FIELD.to_string()])
            .await?;
        for field in indexes {
            self.backend
                .create_index(name, &[internal_field(field).to_string()])
                .await?;
        }
        Ok(())
    }
}

fn read_only_policy() -> Document {
    let mut policy = Document::new();
    policy.insert(
        "validate_doc_update".to_string(),
        Value::String(READ_ONLY_VALIDATION.to_string()),
    );
    policy
}
