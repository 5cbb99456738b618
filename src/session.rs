//! Store session handling
//!
//! [`ReauthBackend`] wraps any [`StorageBackend`]. When a call comes back 401
//! it logs in once with the configured credentials and replays the call once.
//! A failed login, or a second 401 on the replay, surfaces as `AuthFailure`.
//! There is no other retry.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{error, info, warn};

use crate::backend::{Credentials, DatabaseInfo, SecurityObject, StorageBackend};
use crate::document::Document;
use crate::error::{EnclaveError, Result};
use crate::query::FindQuery;

/// Run a backend call; on 401 re-authenticate and run it exactly once more.
macro_rules! with_reauth {
    ($self:ident, $op:expr, $call:expr) => {{
        match $call.await {
            Err(EnclaveError::Unauthorized(reason)) => {
                $self.reauthenticate($op, &reason).await?;
                match $call.await {
                    Err(EnclaveError::Unauthorized(reason)) => Err(EnclaveError::AuthFailure(
                        format!("{} rejected after re-authentication: {}", $op, reason),
                    )),
                    other => $self.observe($op, other),
                }
            }
            other => $self.observe($op, other),
        }
    }};
}

/// Backend decorator adding transparent re-authentication
pub struct ReauthBackend {
    inner: Arc<dyn StorageBackend>,
    credentials: Option<Credentials>,
}

impl ReauthBackend {
    pub fn new(inner: Arc<dyn StorageBackend>, credentials: Option<Credentials>) -> Self {
        Self { inner, credentials }
    }

    /// The wrapped backend
    pub fn inner(&self) -> &Arc<dyn StorageBackend> {
        &self.inner
    }

    async fn reauthenticate(&self, op: &str, reason: &str) -> Result<()> {
        let Some(credentials) = self.credentials.as_ref() else {
            return Err(EnclaveError::AuthFailure(format!(
                "{} unauthorized and no store credentials are configured: {}",
                op, reason
            )));
        };

        warn!(store = %self.inner.id(), op = %op, "Store session rejected, re-authenticating");
        self.login(credentials).await?;
        info!(store = %self.inner.id(), op = %op, "Re-authenticated, replaying call");
        Ok(())
    }

    async fn login(&self, credentials: &Credentials) -> Result<()> {
        self.inner.authenticate(credentials).await.map_err(|e| {
            error!(store = %self.inner.id(), "Store authentication failed: {}", e);
            match e {
                EnclaveError::Unauthorized(reason) => EnclaveError::AuthFailure(reason),
                other => other,
            }
        })
    }

    fn observe<T>(&self, op: &str, result: Result<T>) -> Result<T> {
        if let Err(e) = &result {
            if e.is_fatal() {
                error!(store = %self.inner.id(), op = %op, "Backing store unreachable: {}", e);
            }
        }
        result
    }
}

#[async_trait]
impl StorageBackend for ReauthBackend {
    fn id(&self) -> &str {
        self.inner.id()
    }

    async fn authenticate(&self, credentials: &Credentials) -> Result<()> {
        self.login(credentials).await
    }

    async fn database_info(&self, db: &str) -> Result<DatabaseInfo> {
        with_reauth!(self, "database_info", self.inner.database_info(db))
    }

    async fn create_database(&self, db: &str) -> Result<()> {
        with_reauth!(self, "create_database", self.inner.create_database(db))
    }

    async fn delete_database(&self, db: &str) -> Result<()> {
        with_reauth!(self, "delete_database", self.inner.delete_database(db))
    }

    async fn list_databases(&self) -> Result<Vec<String>> {
        with_reauth!(self, "list_databases", self.inner.list_databases())
    }

    async fn get_document(&self, db: &str, id: &str) -> Result<Document> {
        with_reauth!(self, "get_document", self.inner.get_document(db, id))
    }

    async fn put_document(&self, db: &str, id: &str, doc: &Document) -> Result<String> {
        with_reauth!(self, "put_document", self.inner.put_document(db, id, doc))
    }

    async fn delete_document(&self, db: &str, id: &str, rev: &str) -> Result<()> {
        with_reauth!(self, "delete_document", self.inner.delete_document(db, id, rev))
    }

    async fn all_documents(&self, db: &str, limit: Option<usize>) -> Result<Vec<Document>> {
        with_reauth!(self, "all_documents", self.inner.all_documents(db, limit))
    }

    async fn find(&self, db: &str, query: &FindQuery) -> Result<Vec<Document>> {
        with_reauth!(self, "find", self.inner.find(db, query))
    }

    async fn create_index(&self, db: &str, fields: &[String]) -> Result<()> {
        with_reauth!(self, "create_index", self.inner.create_index(db, fields))
    }

    async fn put_security(&self, db: &str, security: &SecurityObject) -> Result<()> {
        with_reauth!(self, "put_security", self.inner.put_security(db, security))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;

    fn wrapped(memory: &Arc<MemoryBackend>, credentials: Option<Credentials>) -> ReauthBackend {
        ReauthBackend::new(memory.clone(), credentials)
    }

    #[tokio::test]
    async fn test_single_401_is_transparent() {
        let memory = Arc::new(MemoryBackend::new().with_credentials(Credentials::new("admin", "pw")));
        let backend = wrapped(&memory, Some(Credentials::new("admin", "pw")));

        memory.expire_session(1);
        let dbs = backend.list_databases().await.unwrap();
        assert!(dbs.is_empty());
        assert_eq!(memory.auth_count(), 1);
        assert_eq!(memory.call_count(), 2);
    }

    #[tokio::test]
    async fn test_second_401_surfaces_auth_failure() {
        let memory = Arc::new(MemoryBackend::new());
        let backend = wrapped(&memory, Some(Credentials::new("admin", "pw")));

        memory.expire_session(2);
        let err = backend.list_databases().await.unwrap_err();
        assert!(matches!(err, EnclaveError::AuthFailure(_)));
        assert_eq!(memory.auth_count(), 1);
        assert_eq!(memory.call_count(), 2);
    }

    #[tokio::test]
    async fn test_failed_login_is_not_replayed() {
        let memory = Arc::new(MemoryBackend::new());
        let backend = wrapped(&memory, Some(Credentials::new("admin", "pw")));

        memory.expire_session(1);
        memory.reject_logins(1);
        let err = backend.list_databases().await.unwrap_err();
        assert!(matches!(err, EnclaveError::AuthFailure(_)));
        assert_eq!(memory.call_count(), 1);
    }

    #[tokio::test]
    async fn test_no_credentials_means_no_retry() {
        let memory = Arc::new(MemoryBackend::new());
        let backend = wrapped(&memory, None);

        memory.expire_session(1);
        assert!(matches!(
            backend.list_databases().await,
            Err(EnclaveError::AuthFailure(_))
        ));
        assert_eq!(memory.auth_count(), 0);
    }

    #[tokio::test]
    async fn test_other_errors_pass_through() {
        let memory = Arc::new(MemoryBackend::new());
        let backend = wrapped(&memory, Some(Credentials::new("admin", "pw")));

        assert!(matches!(
            backend.get_document("missing", "x").await,
            Err(EnclaveError::CollectionNotFound(_))
        ));
        memory.set_refuse_connections(true);
        assert!(backend.list_databases().await.unwrap_err().is_fatal());
        assert_eq!(memory.auth_count(), 0);
    }
}
