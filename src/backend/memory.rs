//! In-memory backend.
//!
//! Behaves like the HTTP store (revision tokens, `_design/` documents hidden
//! from listings, collation-ordered find) and adds knobs for tests: a call
//! counter, scripted session expiry, refused connections and a strict mode in
//! which sorting on an unindexed field fails like the real store does.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;

use super::traits::{Credentials, DatabaseInfo, SecurityObject, StorageBackend};
use crate::document::{is_design_document, Document, ID_FIELD, REV_FIELD};
use crate::error::{EnclaveError, Result};
use crate::query::{compare_values, lookup, FindQuery, SortDirection};

#[derive(Debug, Default)]
struct MemoryDatabase {
    docs: BTreeMap<String, Document>,
    security: Option<SecurityObject>,
    indexes: Vec<Vec<String>>,
}

impl MemoryDatabase {
    fn has_index_on(&self, field: &str) -> bool {
        field == ID_FIELD || self.indexes.iter().any(|fields| fields.first().map(String::as_str) == Some(field))
    }
}

/// In-process document store
pub struct MemoryBackend {
    databases: RwLock<HashMap<String, MemoryDatabase>>,
    credentials: Option<Credentials>,
    calls: AtomicU32,
    auth_calls: AtomicU32,
    expired_calls: AtomicU32,
    rejected_logins: AtomicU32,
    refuse_connections: AtomicBool,
    strict_indexes: bool,
}

impl MemoryBackend {
    /// Create an empty store that accepts any login
    pub fn new() -> Self {
        Self {
            databases: RwLock::new(HashMap::new()),
            credentials: None,
            calls: AtomicU32::new(0),
            auth_calls: AtomicU32::new(0),
            expired_calls: AtomicU32::new(0),
            rejected_logins: AtomicU32::new(0),
            refuse_connections: AtomicBool::new(false),
            strict_indexes: false,
        }
    }

    /// Only accept these credentials on `authenticate`
    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    /// Fail `find` when the sort field has no index, as the HTTP store does
    pub fn with_strict_indexes(mut self) -> Self {
        self.strict_indexes = true;
        self
    }

    /// Answer the next `n` data calls with a 401
    pub fn expire_session(&self, n: u32) {
        self.expired_calls.store(n, Ordering::SeqCst);
    }

    /// Reject the next `n` logins even with correct credentials
    pub fn reject_logins(&self, n: u32) {
        self.rejected_logins.store(n, Ordering::SeqCst);
    }

    /// Simulate an unreachable store
    pub fn set_refuse_connections(&self, refuse: bool) {
        self.refuse_connections.store(refuse, Ordering::SeqCst);
    }

    /// Number of backend calls made, logins excluded
    pub fn call_count(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    /// Number of login attempts
    pub fn auth_count(&self) -> u32 {
        self.auth_calls.load(Ordering::SeqCst)
    }

    /// Reset both counters
    pub fn reset_counts(&self) {
        self.calls.store(0, Ordering::SeqCst);
        self.auth_calls.store(0, Ordering::SeqCst);
    }

    /// Security object stored for a database
    pub async fn security_of(&self, db: &str) -> Option<SecurityObject> {
        self.databases
            .read()
            .await
            .get(db)
            .and_then(|d| d.security.clone())
    }

    /// Index field lists of a database
    pub async fn indexes_of(&self, db: &str) -> Vec<Vec<String>> {
        self.databases
            .read()
            .await
            .get(db)
            .map(|d| d.indexes.clone())
            .unwrap_or_default()
    }

    /// Count a data call and apply scripted faults
    fn enter(&self) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if self.refuse_connections.load(Ordering::SeqCst) {
            return Err(EnclaveError::ConnectionFatal(
                "connection refused (memory backend)".to_string(),
            ));
        }

        let expired = self
            .expired_calls
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if expired {
            return Err(EnclaveError::Unauthorized(
                "You are not authorized to access this db.".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn next_revision(previous: Option<&str>, doc: &Document) -> String {
    use sha2::{Digest, Sha256};

    let generation = previous
        .and_then(|rev| rev.split('-').next())
        .and_then(|n| n.parse::<u64>().ok())
        .unwrap_or(0)
        + 1;
    let digest = Sha256::digest(Value::Object(doc.clone()).to_string().as_bytes());
    format!("{}-{}", generation, hex::encode(&digest[..16]))
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    fn id(&self) -> &str {
        "memory"
    }

    async fn authenticate(&self, credentials: &Credentials) -> Result<()> {
        self.auth_calls.fetch_add(1, Ordering::SeqCst);

        if self.refuse_connections.load(Ordering::SeqCst) {
            return Err(EnclaveError::ConnectionFatal(
                "connection refused (memory backend)".to_string(),
            ));
        }

        let rejected = self
            .rejected_logins
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        let matches = self.credentials.as_ref().map_or(true, |expected| {
            expected.username == credentials.username && expected.password == credentials.password
        });

        if rejected || !matches {
            return Err(EnclaveError::Unauthorized(
                "Name or password is incorrect.".to_string(),
            ));
        }
        Ok(())
    }

    async fn database_info(&self, db: &str) -> Result<DatabaseInfo> {
        self.enter()?;
        let databases = self.databases.read().await;
        let database = databases
            .get(db)
            .ok_or_else(|| EnclaveError::CollectionNotFound(db.to_string()))?;
        Ok(DatabaseInfo {
            name: db.to_string(),
            doc_count: database.docs.keys().filter(|id| !is_design_document(id)).count() as u64,
        })
    }

    async fn create_database(&self, db: &str) -> Result<()> {
        self.enter()?;
        let mut databases = self.databases.write().await;
        if databases.contains_key(db) {
            return Err(EnclaveError::AlreadyExists(db.to_string()));
        }
        databases.insert(db.to_string(), MemoryDatabase::default());
        Ok(())
    }

    async fn delete_database(&self, db: &str) -> Result<()> {
        self.enter()?;
        self.databases
            .write()
            .await
            .remove(db)
            .map(|_| ())
            .ok_or_else(|| EnclaveError::CollectionNotFound(db.to_string()))
    }

    async fn list_databases(&self) -> Result<Vec<String>> {
        self.enter()?;
        let mut names: Vec<String> = self.databases.read().await.keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    async fn get_document(&self, db: &str, id: &str) -> Result<Document> {
        self.enter()?;
        let databases = self.databases.read().await;
        let database = databases
            .get(db)
            .ok_or_else(|| EnclaveError::CollectionNotFound(db.to_string()))?;
        database
            .docs
            .get(id)
            .cloned()
            .ok_or_else(|| EnclaveError::not_found(db, id))
    }

    async fn put_document(&self, db: &str, id: &str, doc: &Document) -> Result<String> {
        self.enter()?;
        let mut databases = self.databases.write().await;
        let database = databases
            .get_mut(db)
            .ok_or_else(|| EnclaveError::CollectionNotFound(db.to_string()))?;

        let supplied = doc.get(REV_FIELD).and_then(Value::as_str);
        let current = database.docs.get(id).and_then(|d| d.get(REV_FIELD)).and_then(Value::as_str);
        if supplied != current {
            return Err(EnclaveError::Conflict(format!(
                "{}/{}: Document update conflict.",
                db, id
            )));
        }

        let mut stored = doc.clone();
        let rev = next_revision(current, &stored);
        stored.insert(ID_FIELD.to_string(), Value::String(id.to_string()));
        stored.insert(REV_FIELD.to_string(), Value::String(rev.clone()));
        database.docs.insert(id.to_string(), stored);
        Ok(rev)
    }

    async fn delete_document(&self, db: &str, id: &str, rev: &str) -> Result<()> {
        self.enter()?;
        let mut databases = self.databases.write().await;
        let database = databases
            .get_mut(db)
            .ok_or_else(|| EnclaveError::CollectionNotFound(db.to_string()))?;

        let current = database
            .docs
            .get(id)
            .ok_or_else(|| EnclaveError::not_found(db, id))?;
        if current.get(REV_FIELD).and_then(Value::as_str) != Some(rev) {
            return Err(EnclaveError::Conflict(format!(
                "{}/{}: Document update conflict.",
                db, id
            )));
        }
        database.docs.remove(id);
        Ok(())
    }

    async fn all_documents(&self, db: &str, limit: Option<usize>) -> Result<Vec<Document>> {
        self.enter()?;
        let databases = self.databases.read().await;
        let database = databases
            .get(db)
            .ok_or_else(|| EnclaveError::CollectionNotFound(db.to_string()))?;
        Ok(database
            .docs
            .iter()
            .filter(|(id, _)| !is_design_document(id))
            .map(|(_, doc)| doc.clone())
            .take(limit.unwrap_or(usize::MAX))
            .collect())
    }

    async fn find(&self, db: &str, query: &FindQuery) -> Result<Vec<Document>> {
        self.enter()?;
        let databases = self.databases.read().await;
        let database = databases
            .get(db)
            .ok_or_else(|| EnclaveError::CollectionNotFound(db.to_string()))?;

        if self.strict_indexes && !database.has_index_on(&query.sort.field) {
            return Err(EnclaveError::NoUsableIndex(format!(
                "No index exists for this sort, try indexing by the sort fields ({}).",
                query.sort.field
            )));
        }

        let matcher = query.selector.matcher();
        let mut matched: Vec<&Document> = database
            .docs
            .iter()
            .filter(|(id, _)| !is_design_document(id))
            .map(|(_, doc)| doc)
            .filter(|doc| matcher.matches(doc))
            .collect();

        let field = query.sort.field.as_str();
        matched.sort_by(|a, b| {
            let ordering = compare_values(
                lookup(a, field).unwrap_or(&Value::Null),
                lookup(b, field).unwrap_or(&Value::Null),
            );
            match query.sort.direction {
                SortDirection::Asc => ordering,
                SortDirection::Desc => ordering.reverse(),
            }
        });

        Ok(matched
            .into_iter()
            .skip(query.skip)
            .take(query.limit)
            .cloned()
            .collect())
    }

    async fn create_index(&self, db: &str, fields: &[String]) -> Result<()> {
        self.enter()?;
        let mut databases = self.databases.write().await;
        let database = databases
            .get_mut(db)
            .ok_or_else(|| EnclaveError::CollectionNotFound(db.to_string()))?;
        if !database.indexes.iter().any(|existing| existing.as_slice() == fields) {
            database.indexes.push(fields.to_vec());
        }
        Ok(())
    }

    async fn put_security(&self, db: &str, security: &SecurityObject) -> Result<()> {
        self.enter()?;
        let mut databases = self.databases.write().await;
        let database = databases
            .get_mut(db)
            .ok_or_else(|| EnclaveError::CollectionNotFound(db.to_string()))?;
        database.security = Some(security.clone());
        Ok(())
    }
}
