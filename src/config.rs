//! Configuration for enclave-store

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::backend::{BackendKind, Credentials};
use crate::error::{EnclaveError, Result};

/// Store connection and facade settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Which backend implementation to use
    #[serde(default)]
    pub backend: BackendKind,

    /// Base URL of the document store
    #[serde(default = "default_url")]
    pub url: String,

    /// Store login (used at connect time and on every 401)
    #[serde(default)]
    pub username: Option<String>,

    #[serde(default)]
    pub password: Option<String>,

    /// Global read-only mode
    #[serde(default)]
    pub read_only: bool,

    /// Service identity made member of every created database
    #[serde(default = "default_read_only_identity")]
    pub read_only_identity: String,

    /// Namespace prepended to every collection name
    #[serde(default = "default_root_prefix")]
    pub root_prefix: String,

    /// Per-request timeout towards the store
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_url() -> String {
    "http://localhost:5984".to_string()
}

fn default_read_only_identity() -> String {
    "readonly".to_string()
}

fn default_root_prefix() -> String {
    "enclave".to_string()
}

fn default_request_timeout_secs() -> u64 {
    30
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::default(),
            url: default_url(),
            username: None,
            password: None,
            read_only: false,
            read_only_identity: default_read_only_identity(),
            root_prefix: default_root_prefix(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl StoreConfig {
    /// Load config from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            EnclaveError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        toml::from_str(&content)
            .map_err(|e| EnclaveError::Config(format!("invalid {}: {}", path.display(), e)))
    }

    /// Credentials, when both halves are configured
    pub fn credentials(&self) -> Option<Credentials> {
        match (&self.username, &self.password) {
            (Some(username), Some(password)) => Some(Credentials::new(username, password)),
            _ => None,
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.username.is_some() != self.password.is_some() {
            return Err(EnclaveError::Config(
                "username and password must be configured together".to_string(),
            ));
        }
        if self.backend == BackendKind::Couch
            && !(self.url.starts_with("http://") || self.url.starts_with("https://"))
        {
            return Err(EnclaveError::Config(format!(
                "store url must be http(s), got '{}'",
                self.url
            )));
        }
        if !self.root_prefix.is_empty() {
            crate::naming::resolve(&self.root_prefix)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = StoreConfig::default();
        assert_eq!(config.backend, BackendKind::Couch);
        assert_eq!(config.url, "http://localhost:5984");
        assert_eq!(config.read_only_identity, "readonly");
        assert!(!config.read_only);
        assert!(config.credentials().is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: StoreConfig = toml::from_str(
            r#"
backend = "memory"
read_only = true
"#,
        )
        .unwrap();
        assert_eq!(config.backend, BackendKind::Memory);
        assert!(config.read_only);
        assert_eq!(config.root_prefix, "enclave");
        assert_eq!(config.request_timeout_secs, 30);
    }

    #[test]
    fn test_validation() {
        let half_login = StoreConfig {
            username: Some("admin".into()),
            ..Default::default()
        };
        assert!(half_login.validate().is_err());

        let bad_url = StoreConfig {
            url: "localhost:5984".into(),
            ..Default::default()
        };
        assert!(bad_url.validate().is_err());

        let bad_prefix = StoreConfig {
            root_prefix: "Not Valid".into(),
            ..Default::default()
        };
        assert!(bad_prefix.validate().is_err());
    }
}
