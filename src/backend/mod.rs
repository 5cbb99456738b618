//! Backing store abstraction layer.
//!
//! - `couch`: HTTP/JSON store (CouchDB-compatible), the production backend
//! - `memory`: in-process store for tests and local runs
//!
//! [`connect`] picks the implementation from configuration; adding a store
//! means adding a [`BackendKind`] variant and an arm there.

pub mod couch;
pub mod mango;
pub mod memory;
pub mod traits;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;

pub use couch::CouchBackend;
pub use memory::MemoryBackend;
pub use traits::{Credentials, DatabaseInfo, SecurityGroup, SecurityObject, StorageBackend};

use crate::config::StoreConfig;
use crate::error::{EnclaveError, Result};

/// Available backend implementations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[default]
    Couch,
    Memory,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::Couch => write!(f, "couch"),
            BackendKind::Memory => write!(f, "memory"),
        }
    }
}

impl FromStr for BackendKind {
    type Err = EnclaveError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "couch" | "couchdb" => Ok(BackendKind::Couch),
            "memory" => Ok(BackendKind::Memory),
            other => Err(EnclaveError::Config(format!("unknown backend '{}'", other))),
        }
    }
}

/// Build the raw backend selected by the configuration
pub fn connect(config: &StoreConfig) -> Result<Arc<dyn StorageBackend>> {
    let backend: Arc<dyn StorageBackend> = match config.backend {
        BackendKind::Couch => Arc::new(CouchBackend::new(
            config.url.clone(),
            config.request_timeout_secs,
        )?),
        BackendKind::Memory => Arc::new(MemoryBackend::new()),
    };
    info!(backend = %config.backend, store = %backend.id(), "Storage backend selected");
    Ok(backend)
}
