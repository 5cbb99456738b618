//! Config loading integration tests

use std::io::Write;

use enclave_store::{BackendKind, EnclaveError, StoreConfig};

fn write_config(contents: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().expect("temp file");
    file.write_all(contents.as_bytes()).expect("write config");
    file
}

#[test]
fn test_load_full_config() {
    let file = write_config(
        r#"
backend = "couch"
url = "https://store.example.org:6984"
username = "hub"
password = "s3cret"
read_only = true
read_only_identity = "hub-reader"
root_prefix = "tenant1"
request_timeout_secs = 5
"#,
    );

    let config = StoreConfig::load(file.path()).unwrap();
    assert_eq!(config.backend, BackendKind::Couch);
    assert_eq!(config.url, "https://store.example.org:6984");
    assert!(config.read_only);
    assert_eq!(config.read_only_identity, "hub-reader");
    assert_eq!(config.root_prefix, "tenant1");
    assert_eq!(config.request_timeout_secs, 5);

    let credentials = config.credentials().expect("credentials configured");
    assert_eq!(credentials.username, "hub");
    assert!(!format!("{:?}", credentials).contains("s3cret"));
    assert!(config.validate().is_ok());
}

#[test]
fn test_empty_file_uses_defaults() {
    let file = write_config("");
    let config = StoreConfig::load(file.path()).unwrap();
    assert_eq!(config.url, "http://localhost:5984");
    assert_eq!(config.root_prefix, "enclave");
    assert!(!config.read_only);
}

#[test]
fn test_invalid_toml_is_config_error() {
    let file = write_config("backend = [not toml");
    assert!(matches!(
        StoreConfig::load(file.path()),
        Err(EnclaveError::Config(_))
    ));

    let unknown_backend = write_config(r#"backend = "mongo""#);
    assert!(matches!(
        StoreConfig::load(unknown_backend.path()),
        Err(EnclaveError::Config(_))
    ));
}

#[test]
fn test_missing_file() {
    let dir = tempfile::tempdir().unwrap();
    let err = StoreConfig::load(dir.path().join("absent.toml")).unwrap_err();
    assert!(err.to_string().contains("absent.toml"));
}
