//! Core trait for backing document stores.
//!
//! [`StorageBackend`] is the raw, store-shaped interface: databases, documents
//! with revision tokens, find queries, indexes and security objects. It knows
//! nothing about `pk`/`timestamp` remapping, root prefixes or read-only mode;
//! those live above it.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::document::Document;
use crate::error::Result;
use crate::query::FindQuery;

/// Store login
#[derive(Clone, Serialize, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Database summary
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseInfo {
    #[serde(rename = "db_name")]
    pub name: String,
    pub doc_count: u64,
}

/// Names and roles of one side of a security object
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityGroup {
    #[serde(default)]
    pub names: Vec<String>,
    #[serde(default)]
    pub roles: Vec<String>,
}

/// Per-database access policy
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityObject {
    #[serde(default)]
    pub admins: SecurityGroup,
    #[serde(default)]
    pub members: SecurityGroup,
}

impl SecurityObject {
    /// Security object granting membership to the given identities
    pub fn members(names: impl IntoIterator<Item = String>) -> Self {
        Self {
            admins: SecurityGroup::default(),
            members: SecurityGroup {
                names: names.into_iter().collect(),
                roles: Vec::new(),
            },
        }
    }
}

/// Backing document store.
///
/// Implementations translate their native failures into
/// [`EnclaveError`](crate::error::EnclaveError) variants:
/// a missing database is `CollectionNotFound`, a missing document `NotFound`,
/// a revision clash `Conflict`, an existing database on create `AlreadyExists`,
/// an expired session `Unauthorized`, an unreachable store `ConnectionFatal`.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Backend identifier used in logs (e.g. the store URL).
    fn id(&self) -> &str;

    /// Establish a session with the store.
    async fn authenticate(&self, credentials: &Credentials) -> Result<()>;

    /// Database summary, design documents excluded from `doc_count`;
    /// `CollectionNotFound` when it does not exist.
    async fn database_info(&self, db: &str) -> Result<DatabaseInfo>;

    /// Create a database; `AlreadyExists` when it does.
    async fn create_database(&self, db: &str) -> Result<()>;

    /// Delete a database and every document in it.
    async fn delete_database(&self, db: &str) -> Result<()>;

    /// Every database name on the store.
    async fn list_databases(&self) -> Result<Vec<String>>;

    /// Fetch a stored document, revision token included.
    async fn get_document(&self, db: &str, id: &str) -> Result<Document>;

    /// Create or replace a document. Replacing requires the current `_rev`
    /// inside `doc`. Returns the new revision token.
    async fn put_document(&self, db: &str, id: &str, doc: &Document) -> Result<String>;

    /// Delete the given revision of a document.
    async fn delete_document(&self, db: &str, id: &str, rev: &str) -> Result<()>;

    /// Documents in ascending id order, design documents excluded.
    async fn all_documents(&self, db: &str, limit: Option<usize>) -> Result<Vec<Document>>;

    /// Run a translated query. Field names are already in store form.
    async fn find(&self, db: &str, query: &FindQuery) -> Result<Vec<Document>>;

    /// Create a JSON index over the given fields. Idempotent.
    async fn create_index(&self, db: &str, fields: &[String]) -> Result<()>;

    /// Replace the database security object.
    async fn put_security(&self, db: &str, security: &SecurityObject) -> Result<()>;
}
