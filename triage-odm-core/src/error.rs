//! Error types and result types for datastore operations.
//!
//! Every fallible operation in this crate returns [`DatastoreResult<T>`]. The variants of
//! [`DatastoreError`] follow the propagation rules of the store:
//!
//! - validation and schema errors are returned to the immediate caller and never coerced,
//! - transient transport errors are retried internally and escalated as
//!   [`DatastoreError::SearchRetry`] once the retry budget is spent,
//! - data-integrity conflicts ([`DatastoreError::VersionConflict`]) and lifecycle faults
//!   ([`DatastoreError::Ilm`]) are always escalated without retry.

use std::{collections::BTreeSet, fmt, time::Duration};

use serde_json::Error as SerdeJsonError;
use thiserror::Error;

use crate::document::Document;

/// The class of a transient network failure reported by a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    /// The connection was reset by the peer.
    ConnectionReset,
    /// The connection dropped before a response was received.
    ConnectionDropped,
    /// The response stream was malformed or cut mid-way.
    Protocol,
}

impl fmt::Display for TransportErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportErrorKind::ConnectionReset => f.write_str("connection reset"),
            TransportErrorKind::ConnectionDropped => f.write_str("connection dropped"),
            TransportErrorKind::Protocol => f.write_str("protocol error"),
        }
    }
}

/// Partial failure of a multi-document fetch.
///
/// Carries both the keys that could not be resolved and the documents that were
/// retrieved, so callers can choose to proceed degraded or abort.
#[derive(Debug, Clone)]
pub struct MultiKeyError {
    /// Ids that were not found.
    pub keys: BTreeSet<String>,
    /// Documents that were found, in request order.
    pub partial_output: Vec<Document>,
}

impl fmt::Display for MultiKeyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let keys = self.keys.iter().map(String::as_str).collect::<Vec<_>>().join(", ");
        write!(f, "{} key(s) not found: {}", self.keys.len(), keys)
    }
}

/// Represents all possible errors that can occur when interacting with the datastore.
#[derive(Error, Debug)]
pub enum DatastoreError {
    /// A document or value failed validation against its schema.
    #[error("Validation error at '{path}': {message}")]
    Validation { path: String, message: String },
    /// A schema path was defined twice (directly or through a namespace extension).
    #[error("Schema conflict: {0}")]
    Conflict(String),
    /// The requested model is not registered.
    #[error("Model not found: {0}")]
    ModelNotFound(String),
    /// Optimistic-concurrency failure: the stored version differs from the expected one.
    #[error("Version conflict on {id} in {index}: expected version {expected}, found {actual:?}")]
    VersionConflict {
        id: String,
        index: String,
        expected: u64,
        actual: Option<u64>,
    },
    /// The requested page lies beyond the engine's pagination window.
    #[error("Search depth exceeded: offset {offset} + rows {rows} is beyond the window of {limit}")]
    SearchDepth { offset: usize, rows: usize, limit: usize },
    /// Transient failures persisted after every retry attempt was spent.
    #[error("Operation failed after {attempts} attempt(s): {source}")]
    SearchRetry {
        attempts: u32,
        #[source]
        source: Box<DatastoreError>,
    },
    /// The backing index rolled over or became read-only mid-operation.
    #[error("Index lifecycle error: {0}")]
    Ilm(String),
    /// Some of the requested ids could not be resolved.
    #[error("Multi-get failed: {0}")]
    MultiKey(MultiKeyError),
    /// A streaming scan failed part way through.
    #[error("Scan error: {source}")]
    Scan {
        #[source]
        source: Box<DatastoreError>,
    },
    /// The remote index mapping is incompatible with the model and needs a migration.
    #[error("Mapping error: {0}")]
    Mapping(String),
    /// A transient network failure.
    #[error("Transport error ({kind}): {message}")]
    Transport { kind: TransportErrorKind, message: String },
    /// The operation did not complete in time. Its outcome is unknown.
    #[error("Operation {operation} timed out after {after:?}; outcome unknown")]
    Timeout { operation: String, after: Duration },
    /// The backing index does not exist.
    #[error("Index not found: {0}")]
    IndexNotFound(String),
    /// A query string or filter could not be interpreted.
    #[error("Invalid query: {0}")]
    InvalidQuery(String),
    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),
    /// Error during store initialization or configuration loading.
    #[error("Initialization error: {0}")]
    Initialization(String),
    /// Any other error reported by the backend.
    #[error("Backend error: {0}")]
    Backend(String),
}

/// A specialized `Result` type for datastore operations.
pub type DatastoreResult<T> = Result<T, DatastoreError>;

impl DatastoreError {
    pub fn validation(path: impl Into<String>, message: impl Into<String>) -> Self {
        DatastoreError::Validation { path: path.into(), message: message.into() }
    }

    pub fn transport(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        DatastoreError::Transport { kind, message: message.into() }
    }

    /// Whether this error is a transient network failure worth retrying.
    pub fn is_transient(&self) -> bool {
        matches!(self, DatastoreError::Transport { .. })
    }
}

impl From<SerdeJsonError> for DatastoreError {
    fn from(err: SerdeJsonError) -> Self {
        DatastoreError::Serialization(err.to_string())
    }
}

impl From<MultiKeyError> for DatastoreError {
    fn from(err: MultiKeyError) -> Self {
        DatastoreError::MultiKey(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_transport_errors_are_transient() {
        assert!(DatastoreError::transport(TransportErrorKind::ConnectionReset, "reset").is_transient());
        assert!(!DatastoreError::Ilm("read-only".into()).is_transient());
        assert!(
            !DatastoreError::VersionConflict {
                id: "h1".into(),
                index: "hit".into(),
                expected: 1,
                actual: Some(2),
            }
            .is_transient()
        );
    }

    #[test]
    fn scan_error_keeps_its_cause() {
        let err = DatastoreError::Scan {
            source: Box::new(DatastoreError::transport(TransportErrorKind::Protocol, "eof")),
        };

        let cause = std::error::Error::source(&err).map(ToString::to_string);
        assert_eq!(cause.as_deref(), Some("Transport error (protocol error): eof"));
    }
}
