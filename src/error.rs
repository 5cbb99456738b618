//! Error types for enclave-store
//!
//! Every failure surfaced by the facade is an [`EnclaveError`]. Status codes
//! from the backing store are translated into these variants once, inside the
//! backend implementations; nothing above the backend looks at HTTP statuses.

use std::fmt;

use thiserror::Error;

/// Facade error
#[derive(Error, Debug)]
pub enum EnclaveError {
    /// Document not found
    #[error("Record not found: {collection}/{pk}")]
    NotFound { collection: String, pk: String },

    /// The collection itself does not exist
    #[error("Collection not found: {0}")]
    CollectionNotFound(String),

    /// Duplicate primary key, or revision mismatch on a concurrent write
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Collection or database already exists
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// Collection name fails the naming pattern
    #[error("Invalid collection name: {0}")]
    InvalidName(String),

    /// Malformed condition, unsupported operator, bad regex or limit
    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    /// Raw 401 from the store. Consumed by the re-authentication wrapper and
    /// only seen by callers of an unwrapped backend.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Re-authentication after a 401 failed, or the replay was rejected again
    #[error("Authentication failed: {0}")]
    AuthFailure(String),

    /// Mutating call attempted while read-only mode is active
    #[error("Read-only mode: {0} is not permitted")]
    ReadOnlyViolation(String),

    /// The backing store cannot be reached at all
    #[error("Backing store unreachable: {0}")]
    ConnectionFatal(String),

    /// Find query needs an index the store does not have
    #[error("No usable index: {0}")]
    NoUsableIndex(String),

    /// Any other non-success answer from the store
    #[error("Store error {status}: {message}")]
    Backend { status: u16, message: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Crypto error: {0}")]
    Crypto(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Closed classification of [`EnclaveError`] that callers map onto their own
/// boundary (HTTP status, exit code, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NotFound,
    Conflict,
    InvalidName,
    InvalidQuery,
    AuthFailure,
    ReadOnlyViolation,
    ConnectionFatal,
    Internal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::NotFound => "NOT_FOUND",
            ErrorKind::Conflict => "CONFLICT",
            ErrorKind::InvalidName => "INVALID_NAME",
            ErrorKind::InvalidQuery => "INVALID_QUERY",
            ErrorKind::AuthFailure => "AUTH_FAILURE",
            ErrorKind::ReadOnlyViolation => "READ_ONLY_VIOLATION",
            ErrorKind::ConnectionFatal => "CONNECTION_FATAL",
            ErrorKind::Internal => "INTERNAL",
        };
        f.write_str(name)
    }
}

impl EnclaveError {
    /// Shorthand for a missing document
    pub fn not_found(collection: impl Into<String>, pk: impl Into<String>) -> Self {
        EnclaveError::NotFound {
            collection: collection.into(),
            pk: pk.into(),
        }
    }

    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            EnclaveError::NotFound { .. } | EnclaveError::CollectionNotFound(_) => {
                ErrorKind::NotFound
            }
            EnclaveError::Conflict(_) | EnclaveError::AlreadyExists(_) => ErrorKind::Conflict,
            EnclaveError::InvalidName(_) => ErrorKind::InvalidName,
            EnclaveError::InvalidQuery(_) => ErrorKind::InvalidQuery,
            EnclaveError::Unauthorized(_) | EnclaveError::AuthFailure(_) => ErrorKind::AuthFailure,
            EnclaveError::ReadOnlyViolation(_) => ErrorKind::ReadOnlyViolation,
            EnclaveError::ConnectionFatal(_) => ErrorKind::ConnectionFatal,
            EnclaveError::NoUsableIndex(_)
            | EnclaveError::Backend { .. }
            | EnclaveError::Json(_)
            | EnclaveError::Crypto(_)
            | EnclaveError::Config(_)
            | EnclaveError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// True when the dependency itself is down and the call cannot be handled locally
    pub fn is_fatal(&self) -> bool {
        matches!(self, EnclaveError::ConnectionFatal(_))
    }

    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }
}

/// Result type for facade operations
pub type Result<T> = std::result::Result<T, EnclaveError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_mapping() {
        assert_eq!(EnclaveError::not_found("cars", "1").kind(), ErrorKind::NotFound);
        assert_eq!(
            EnclaveError::CollectionNotFound("cars".into()).kind(),
            ErrorKind::NotFound
        );
        assert_eq!(EnclaveError::Conflict("dup".into()).kind(), ErrorKind::Conflict);
        assert_eq!(
            EnclaveError::Unauthorized("401".into()).kind(),
            ErrorKind::AuthFailure
        );
        assert_eq!(
            EnclaveError::Backend {
                status: 500,
                message: "boom".into()
            }
            .kind(),
            ErrorKind::Internal
        );
    }

    #[test]
    fn test_only_connection_errors_are_fatal() {
        assert!(EnclaveError::ConnectionFatal("refused".into()).is_fatal());
        assert!(!EnclaveError::AuthFailure("nope".into()).is_fatal());
        assert!(!EnclaveError::not_found("a", "b").is_fatal());
    }

    #[test]
    fn test_display() {
        let err = EnclaveError::not_found("hub_cars", "X1");
        assert_eq!(err.to_string(), "Record not found: hub_cars/X1");
        assert_eq!(ErrorKind::ReadOnlyViolation.to_string(), "READ_ONLY_VIOLATION");
    }
}
