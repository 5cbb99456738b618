//! Content-addressed queues
//!
//! An entry's key is the SHA-256 of its payload. Equal payloads collide and
//! the second insert fails with `Conflict`, unless the caller asks for
//! uniqueness, in which case a timestamp and random token are appended.

use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::debug;

use super::crypto::generate_random_bytes;
use super::{Enclave, Scope};
use crate::document::{now_millis, strip_reserved, Document, PK_FIELD, TIMESTAMP_FIELD};
use crate::error::Result;
use crate::query::{SortSpec, DEFAULT_LIMIT};

/// Hex SHA-256 of a payload, system fields excluded
pub fn content_hash(payload: &Document) -> String {
    let mut payload = payload.clone();
    strip_reserved(&mut payload);
    let digest = Sha256::digest(Value::Object(payload).to_string().as_bytes());
    hex::encode(digest)
}

/// Queue key for a payload
pub fn queue_key(payload: &Document, ensure_uniqueness: bool) -> String {
    let hash = content_hash(payload);
    if !ensure_uniqueness {
        return hash;
    }
    let token: [u8; 4] = generate_random_bytes();
    format!("{}_{}{}", hash, now_millis(), hex::encode(token))
}

impl Enclave {
    /// Append a payload to a queue, returning its key
    pub async fn add_in_queue(
        &self,
        scope: &Scope,
        queue: &str,
        payload: Document,
        ensure_uniqueness: bool,
    ) -> Result<String> {
        self.guard("add_in_queue")?;
        let pk = queue_key(&payload, ensure_uniqueness);
        debug!(scope = %scope, queue = %queue, pk = %pk, "add_in_queue");

        self.collection(queue, true).await?.insert(&pk, payload).await?;
        Ok(pk)
    }

    /// Keys of every entry, oldest first unless `descending`
    pub async fn list_queue(&self, scope: &Scope, queue: &str, descending: bool) -> Result<Vec<String>> {
        self.guard("list_queue")?;
        debug!(scope = %scope, queue = %queue, descending, "list_queue");

        let sort = if descending {
            SortSpec::desc(TIMESTAMP_FIELD)
        } else {
            SortSpec::asc(TIMESTAMP_FIELD)
        };
        let client = self.collection(queue, false).await?;

        let mut pks = Vec::new();
        let mut skip = 0;
        loop {
            let page = client
                .filter::<&str>(&[], Some(sort.clone()), None, skip)
                .await?;
            let fetched = page.len();
            skip += fetched;
            pks.extend(
                page.iter()
                    .filter_map(|doc| doc.get(PK_FIELD).and_then(Value::as_str))
                    .map(str::to_string),
            );
            if fetched < DEFAULT_LIMIT {
                break;
            }
        }
        Ok(pks)
    }

    pub async fn get_object_from_queue(&self, scope: &Scope, queue: &str, pk: &str) -> Result<Document> {
        self.guard("get_object_from_queue")?;
        debug!(scope = %scope, queue = %queue, pk = %pk, "get_object_from_queue");
        self.collection(queue, false).await?.read(pk).await
    }

    pub async fn delete_object_from_queue(&self, scope: &Scope, queue: &str, pk: &str) -> Result<String> {
        self.guard("delete_object_from_queue")?;
        debug!(scope = %scope, queue = %queue, pk = %pk, "delete_object_from_queue");
        self.collection(queue, true).await?.delete(pk).await
    }
}
