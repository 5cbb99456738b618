//! enclave-store - permission-aware document-store facade
//!
//! Turns named collections of JSON records in a CouchDB-compatible store
//! into a uniform record, queue, key-value and grant API.
//!
//! ## Layers
//!
//! - `query`: textual conditions to a store-agnostic selector
//! - `backend`: the [`StorageBackend`] trait with HTTP and in-memory stores
//! - `session`: single re-authenticate-and-replay on 401
//! - `manager`: collection lifecycle, read-only mode, client cache
//! - `collection`: per-collection record operations
//! - `enclave`: the facade, with queues, key-value table and key helpers
//! - `acl`: wildcard read/write grants
//!
//! ```no_run
//! use enclave_store::{Enclave, Scope, StoreConfig};
//!
//! # async fn run() -> enclave_store::Result<()> {
//! let enclave = Enclave::open(&StoreConfig::default()).await?;
//! let cars = enclave
//!     .filter(&Scope::Anonymous, "cars", &["rentalPrice >= 200"], None, None)
//!     .await?;
//! # let _ = cars;
//! # Ok(())
//! # }
//! ```

pub mod acl;
pub mod backend;
pub mod collection;
pub mod config;
pub mod document;
pub mod enclave;
pub mod error;
pub mod manager;
pub mod naming;
pub mod query;
pub mod session;

pub use acl::{AccessControl, Grant, Permission};
pub use backend::{BackendKind, CouchBackend, Credentials, MemoryBackend, StorageBackend};
pub use collection::{with_fallback, CollectionClient};
pub use config::StoreConfig;
pub use document::Document;
pub use enclave::{is_read_only_safe, Enclave, Scope, StoredValue, READ_ONLY_SAFE_OPERATIONS};
pub use error::{EnclaveError, ErrorKind, Result};
pub use manager::{CollectionInfo, ConnectionManager};
pub use query::{FindQuery, SortDirection, SortSpec};
pub use session::ReauthBackend;
