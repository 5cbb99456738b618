//! HTTP backend for CouchDB-compatible document stores.
//!
//! Wire contract:
//! - `PUT|DELETE|GET /{db}`, `GET /_all_dbs`
//! - `GET|PUT /{db}/{id}`, `DELETE /{db}/{id}?rev=`
//! - `GET /{db}/_all_docs?include_docs=true`, split around the `_design/` key range
//! - `POST /{db}/_find`, `POST /{db}/_index`, `PUT /{db}/_security`
//! - `POST /_session` for cookie authentication
//!
//! Status codes are mapped onto [`EnclaveError`] here and nowhere else.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header, Client, Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use super::mango;
use super::traits::{Credentials, DatabaseInfo, SecurityObject, StorageBackend};
use crate::document::{is_design_document, Document, DESIGN_PREFIX};
use crate::error::{EnclaveError, Result};
use crate::query::FindQuery;

/// Cookie carrying the store session
const SESSION_COOKIE: &str = "AuthSession";

/// First id sorting after every `_design/` id
const DESIGN_RANGE_END: &str = "_design0";

/// Error body returned by the store
#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    error: String,
    #[serde(default)]
    reason: String,
}

#[derive(Debug, Deserialize)]
struct PutResponse {
    rev: String,
}

#[derive(Debug, Deserialize)]
struct FindResponse {
    docs: Vec<Document>,
    #[serde(default)]
    warning: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AllDocsRow {
    id: String,
    #[serde(default)]
    doc: Option<Document>,
}

#[derive(Debug, Deserialize)]
struct AllDocsResponse {
    rows: Vec<AllDocsRow>,
}

/// HTTP client for a CouchDB-compatible store
pub struct CouchBackend {
    base_url: String,
    client: Client,
    session_cookie: RwLock<Option<String>>,
}

impl CouchBackend {
    /// Create a backend for the store at `base_url`
    pub fn new(base_url: impl Into<String>, timeout_secs: u64) -> Result<Self> {
        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::ACCEPT,
            header::HeaderValue::from_static("application/json"),
        );

        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| EnclaveError::Config(format!("Failed to build HTTP client: {}", e)))?;

        let base_url = base_url.into().trim_end_matches('/').to_string();
        Ok(Self {
            base_url,
            client,
            session_cookie: RwLock::new(None),
        })
    }

    fn db_url(&self, db: &str) -> String {
        format!("{}/{}", self.base_url, urlencoding::encode(db))
    }

    fn doc_url(&self, db: &str, id: &str) -> String {
        match id.strip_prefix(DESIGN_PREFIX) {
            Some(name) => format!("{}/_design/{}", self.db_url(db), urlencoding::encode(name)),
            None => format!("{}/{}", self.db_url(db), urlencoding::encode(id)),
        }
    }

    async fn request(&self, method: Method, url: &str) -> RequestBuilder {
        let builder = self.client.request(method, url);
        match self.session_cookie.read().await.as_deref() {
            Some(cookie) => builder.header(header::COOKIE, cookie),
            None => builder,
        }
    }

    async fn send(&self, builder: RequestBuilder) -> Result<Response> {
        builder.send().await.map_err(|e| {
            if e.is_connect() {
                EnclaveError::ConnectionFatal(e.to_string())
            } else if e.is_timeout() {
                EnclaveError::Internal(format!("Request to store timed out: {}", e))
            } else {
                EnclaveError::Internal(format!("HTTP error: {}", e))
            }
        })
    }

    async fn handle_response<T: DeserializeOwned>(
        &self,
        response: Response,
        db: &str,
        id: Option<&str>,
    ) -> Result<T> {
        if !response.status().is_success() {
            return Err(error_from_response(response, db, id).await);
        }
        response
            .json()
            .await
            .map_err(|e| EnclaveError::Internal(format!("Invalid response from store: {}", e)))
    }

    /// Rows of `_all_docs` in a key range; an `endkey` is exclusive
    async fn all_docs_rows(
        &self,
        db: &str,
        range: &[(&str, &str)],
        include_docs: bool,
        limit: Option<usize>,
    ) -> Result<Vec<AllDocsRow>> {
        let url = format!("{}/_all_docs", self.db_url(db));
        let mut builder = self.request(Method::GET, &url).await;
        for (param, key) in range {
            builder = builder.query(&[(*param, json_key(key))]);
            if *param == "endkey" {
                builder = builder.query(&[("inclusive_end", "false")]);
            }
        }
        if include_docs {
            builder = builder.query(&[("include_docs", "true")]);
        }
        if let Some(limit) = limit {
            builder = builder.query(&[("limit", limit)]);
        }

        let response = self.send(builder).await?;
        let all: AllDocsResponse = self.handle_response(response, db, None).await?;
        Ok(all.rows)
    }

    async fn expect_success(&self, response: Response, db: &str, id: Option<&str>) -> Result<()> {
        if response.status().is_success() {
            Ok(())
        } else {
            Err(error_from_response(response, db, id).await)
        }
    }
}

/// Map a non-success response onto the error enumeration
async fn error_from_response(response: Response, db: &str, id: Option<&str>) -> EnclaveError {
    let status = response.status();
    let text = response.text().await.unwrap_or_default();
    let body: ErrorBody = serde_json::from_str(&text).unwrap_or_default();
    let message = if body.reason.is_empty() { text } else { body.reason.clone() };

    match status {
        StatusCode::UNAUTHORIZED => EnclaveError::Unauthorized(message),
        StatusCode::FORBIDDEN => EnclaveError::ReadOnlyViolation(message),
        StatusCode::NOT_FOUND => match id {
            Some(id) if body.reason != "Database does not exist." => {
                EnclaveError::not_found(db, id)
            }
            _ => EnclaveError::CollectionNotFound(db.to_string()),
        },
        StatusCode::CONFLICT => EnclaveError::Conflict(match id {
            Some(id) => format!("{}/{}: {}", db, id, message),
            None => format!("{}: {}", db, message),
        }),
        StatusCode::PRECONDITION_FAILED if body.error == "file_exists" => {
            EnclaveError::AlreadyExists(db.to_string())
        }
        StatusCode::BAD_REQUEST if body.error == "no_usable_index" => {
            EnclaveError::NoUsableIndex(message)
        }
        _ => EnclaveError::Backend {
            status: status.as_u16(),
            message,
        },
    }
}

/// `_all_docs` keys are JSON strings on the query line
fn json_key(key: &str) -> String {
    serde_json::Value::String(key.to_string()).to_string()
}

/// `AuthSession=...` pair from the session response, attributes dropped
fn session_cookie_from(response: &Response) -> Option<String> {
    response
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .filter_map(|v| v.split(';').next())
        .map(str::trim)
        .find(|pair| pair.starts_with(SESSION_COOKIE) && pair[SESSION_COOKIE.len()..].starts_with('='))
        .map(str::to_string)
}

#[async_trait]
impl StorageBackend for CouchBackend {
    fn id(&self) -> &str {
        &self.base_url
    }

    async fn authenticate(&self, credentials: &Credentials) -> Result<()> {
        let url = format!("{}/_session", self.base_url);
        let body = serde_json::json!({
            "name": credentials.username,
            "password": credentials.password,
        });

        let response = self
            .send(self.client.post(&url).json(&body))
            .await?;

        if !response.status().is_success() {
            return Err(error_from_response(response, "_session", None).await);
        }

        let cookie = session_cookie_from(&response).ok_or_else(|| {
            EnclaveError::Unauthorized("store did not return a session cookie".to_string())
        })?;
        *self.session_cookie.write().await = Some(cookie);

        info!(store = %self.base_url, user = %credentials.username, "Store session established");
        Ok(())
    }

    async fn database_info(&self, db: &str) -> Result<DatabaseInfo> {
        let url = self.db_url(db);
        let response = self.send(self.request(Method::GET, &url).await).await?;
        let mut info: DatabaseInfo = self.handle_response(response, db, None).await?;

        // The store counts design documents; callers only see records
        let design = self
            .all_docs_rows(
                db,
                &[("startkey", DESIGN_PREFIX), ("endkey", DESIGN_RANGE_END)],
                false,
                None,
            )
            .await?;
        info.doc_count = info.doc_count.saturating_sub(design.len() as u64);
        Ok(info)
    }

    async fn create_database(&self, db: &str) -> Result<()> {
        let url = self.db_url(db);
        let response = self.send(self.request(Method::PUT, &url).await).await?;
        self.expect_success(response, db, None).await
    }

    async fn delete_database(&self, db: &str) -> Result<()> {
        let url = self.db_url(db);
        let response = self.send(self.request(Method::DELETE, &url).await).await?;
        self.expect_success(response, db, None).await
    }

    async fn list_databases(&self) -> Result<Vec<String>> {
        let url = format!("{}/_all_dbs", self.base_url);
        let response = self.send(self.request(Method::GET, &url).await).await?;
        self.handle_response(response, "_all_dbs", None).await
    }

    async fn get_document(&self, db: &str, id: &str) -> Result<Document> {
        debug!(db = %db, id = %id, "GET document");
        let url = self.doc_url(db, id);
        let response = self.send(self.request(Method::GET, &url).await).await?;
        self.handle_response(response, db, Some(id)).await
    }

    async fn put_document(&self, db: &str, id: &str, doc: &Document) -> Result<String> {
        debug!(db = %db, id = %id, "PUT document");
        let url = self.doc_url(db, id);
        let builder = self.request(Method::PUT, &url).await.json(doc);
        let response = self.send(builder).await?;
        let put: PutResponse = self.handle_response(response, db, Some(id)).await?;
        Ok(put.rev)
    }

    async fn delete_document(&self, db: &str, id: &str, rev: &str) -> Result<()> {
        debug!(db = %db, id = %id, "DELETE document");
        let url = self.doc_url(db, id);
        let builder = self
            .request(Method::DELETE, &url)
            .await
            .query(&[("rev", rev)]);
        let response = self.send(builder).await?;
        self.expect_success(response, db, Some(id)).await
    }

    async fn all_documents(&self, db: &str, limit: Option<usize>) -> Result<Vec<Document>> {
        // Design documents sit between the two ranges, so a limit never counts them
        let mut rows = self
            .all_docs_rows(db, &[("endkey", DESIGN_PREFIX)], true, limit)
            .await?;
        let remaining = limit.map(|limit| limit.saturating_sub(rows.len()));
        if remaining != Some(0) {
            let above = self
                .all_docs_rows(db, &[("startkey", DESIGN_RANGE_END)], true, remaining)
                .await?;
            rows.extend(above);
        }

        Ok(rows
            .into_iter()
            .filter(|row| !is_design_document(&row.id))
            .filter_map(|row| row.doc)
            .collect())
    }

    async fn find(&self, db: &str, query: &FindQuery) -> Result<Vec<Document>> {
        let url = format!("{}/_find", self.db_url(db));
        let body = mango::find_body(query);
        debug!(db = %db, selector = %body["selector"], "POST _find");

        let builder = self.request(Method::POST, &url).await.json(&body);
        let response = self.send(builder).await?;
        let found: FindResponse = self.handle_response(response, db, None).await?;
        if let Some(warning) = found.warning {
            warn!(db = %db, "Store query warning: {}", warning);
        }
        Ok(found.docs)
    }

    async fn create_index(&self, db: &str, fields: &[String]) -> Result<()> {
        let url = format!("{}/_index", self.db_url(db));
        let builder = self
            .request(Method::POST, &url)
            .await
            .json(&mango::index_body(fields));
        let response = self.send(builder).await?;
        self.expect_success(response, db, None).await
    }

    async fn put_security(&self, db: &str, security: &SecurityObject) -> Result<()> {
        let url = format!("{}/_security", self.db_url(db));
        let builder = self.request(Method::PUT, &url).await.json(security);
        let response = self.send(builder).await?;
        self.expect_success(response, db, None).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_urls_are_encoded() {
        let backend = CouchBackend::new("http://localhost:5984/", 5).unwrap();
        assert_eq!(backend.id(), "http://localhost:5984");
        assert_eq!(backend.db_url("hub_a$b"), "http://localhost:5984/hub_a%24b");
        assert_eq!(
            backend.doc_url("hub_cars", "did:x/1"),
            "http://localhost:5984/hub_cars/did%3Ax%2F1"
        );
        assert_eq!(
            backend.doc_url("hub_cars", "_design/read_only_policy"),
            "http://localhost:5984/hub_cars/_design/read_only_policy"
        );
    }
}
