//! Per-collection record operations
//!
//! A [`CollectionClient`] is bound to one resolved physical collection name.
//! It owns the document shape conversion: callers hand in and get back
//! documents keyed by `pk`/`timestamp`, the store sees `_id`/`sys_timestamp`
//! plus its revision token. Every call is a remote round-trip.

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, warn};

use crate::backend::StorageBackend;
use crate::document::{
    self, internal_field, now_millis, revision, strip_reserved, take_fallback_flag, to_external,
    to_internal, Document, INTERNAL_TIMESTAMP_FIELD,
};
use crate::error::{EnclaveError, Result};
use crate::query::{self, FindQuery, SortSpec};

/// Record operations on one collection
pub struct CollectionClient {
    name: String,
    backend: Arc<dyn StorageBackend>,
}

impl CollectionClient {
    pub(crate) fn new(name: String, backend: Arc<dyn StorageBackend>) -> Self {
        Self { name, backend }
    }

    /// Physical collection name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Insert a new record. Fails with `Conflict` when `pk` is taken.
    pub async fn insert(&self, pk: &str, doc: Document) -> Result<Document> {
        debug!(collection = %self.name, pk = %pk, "insert");
        let internal = to_internal(pk, doc, now_millis());

        match self.backend.put_document(&self.name, pk, &internal).await {
            Ok(_) => Ok(to_external(internal)),
            Err(EnclaveError::Conflict(_)) => Err(EnclaveError::Conflict(format!(
                "record {} already exists in {}",
                pk, self.name
            ))),
            Err(e) => Err(e),
        }
    }

    /// Read one record
    pub async fn read(&self, pk: &str) -> Result<Document> {
        debug!(collection = %self.name, pk = %pk, "read");
        self.fetch(pk).await.map(to_external)
    }

    /// Merge fields onto an existing record and refresh its timestamp.
    ///
    /// A missing record is `NotFound`, unless the payload carries the
    /// fallback-insert flag, in which case the record is inserted instead.
    pub async fn update(&self, pk: &str, mut doc: Document) -> Result<Document> {
        debug!(collection = %self.name, pk = %pk, "update");
        let fallback = take_fallback_flag(&mut doc);

        let mut stored = match self.fetch(pk).await {
            Ok(stored) => stored,
            Err(e) if e.is_not_found() && fallback => {
                debug!(collection = %self.name, pk = %pk, "update falling back to insert");
                return self.insert(pk, doc).await;
            }
            Err(e) => return Err(e),
        };

        strip_reserved(&mut doc);
        stored.extend(doc);
        stored.insert(
            INTERNAL_TIMESTAMP_FIELD.to_string(),
            Value::from(now_millis()),
        );

        self.backend.put_document(&self.name, pk, &stored).await?;
        Ok(to_external(stored))
    }

    /// Delete a record. Deleting a missing record succeeds; the requested
    /// `pk` is returned either way.
    pub async fn delete(&self, pk: &str) -> Result<String> {
        debug!(collection = %self.name, pk = %pk, "delete");
        let stored = match self.fetch(pk).await {
            Ok(stored) => stored,
            Err(e) if e.is_not_found() => return Ok(pk.to_string()),
            Err(e) => return Err(e),
        };

        let rev = revision(&stored).ok_or_else(|| {
            EnclaveError::Internal(format!("{}/{} has no revision", self.name, pk))
        })?;
        match self.backend.delete_document(&self.name, pk, rev).await {
            Ok(()) => Ok(pk.to_string()),
            Err(e) if e.is_not_found() => Ok(pk.to_string()),
            Err(e) => Err(e),
        }
    }

    /// Records in ascending key order, design documents excluded
    pub async fn list(&self, limit: Option<usize>) -> Result<Vec<Document>> {
        match self.backend.all_documents(&self.name, limit).await {
            Ok(docs) => Ok(docs.into_iter().map(to_external).collect()),
            Err(EnclaveError::CollectionNotFound(_)) => Ok(Vec::new()),
            Err(e) => Err(e),
        }
    }

    /// First record in key order
    pub async fn first(&self) -> Result<Document> {
        self.list(Some(1))
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| EnclaveError::not_found(&self.name, "*"))
    }

    /// Translate and run textual conditions
    pub async fn filter<S: AsRef<str>>(
        &self,
        conditions: &[S],
        sort: Option<SortSpec>,
        limit: Option<f64>,
        skip: usize,
    ) -> Result<Vec<Document>> {
        let query = query::parse(conditions, sort, limit)?.with_skip(skip);
        self.find(&query).await
    }

    /// Run an already translated query, expressed in external field names.
    ///
    /// When the store has no index for the sort field the index is created
    /// and the query re-run once.
    pub async fn find(&self, query: &FindQuery) -> Result<Vec<Document>> {
        let query = query.map_fields(|field| internal_field(field).to_string());

        let docs = match self.backend.find(&self.name, &query).await {
            Err(EnclaveError::NoUsableIndex(reason)) => {
                warn!(
                    collection = %self.name,
                    field = %query.sort.field,
                    "No usable index ({}), creating it and retrying",
                    reason
                );
                self.backend
                    .create_index(&self.name, std::slice::from_ref(&query.sort.field))
                    .await?;
                self.backend.find(&self.name, &query).await
            }
            other => other,
        };

        match docs {
            Ok(docs) => Ok(docs.into_iter().map(to_external).collect()),
            Err(EnclaveError::CollectionNotFound(_)) => Ok(Vec::new()),
            Err(e) => Err(e),
        }
    }

    /// Number of records; 0 when the collection does not exist yet
    pub async fn count(&self) -> Result<u64> {
        match self.backend.database_info(&self.name).await {
            Ok(info) => Ok(info.doc_count),
            Err(EnclaveError::CollectionNotFound(_)) => Ok(0),
            Err(e) => Err(e),
        }
    }

    /// Stored shape of a record, revision included
    async fn fetch(&self, pk: &str) -> Result<Document> {
        match self.backend.get_document(&self.name, pk).await {
            Err(EnclaveError::CollectionNotFound(_)) => {
                Err(EnclaveError::not_found(&self.name, pk))
            }
            other => other,
        }
    }
}

impl std::fmt::Debug for CollectionClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CollectionClient")
            .field("name", &self.name)
            .field("store", &self.backend.id())
            .finish()
    }
}

/// Payload with the fallback-insert flag set
pub fn with_fallback(mut doc: Document) -> Document {
    doc.insert(
        document::FALLBACK_INSERT_FLAG.to_string(),
        Value::Bool(true),
    );
    doc
}
