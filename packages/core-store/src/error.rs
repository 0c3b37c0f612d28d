//! Error types shared by every layer.

use crate::path::PathError;
use crate::type_tag::TypeTag;

/// Errors surfaced by stores, entries and drivers.
///
/// Nothing is retried internally; every failure reaches the caller as one of
/// these variants.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Malformed path text, or a path that cannot be resolved.
    #[error("path error: {0}")]
    Path(#[from] PathError),

    #[error("entry not found: '{path}'")]
    EntryNotFound { path: String },

    #[error("entry already exists at '{path}': {message}")]
    AlreadyExists { path: String, message: String },

    #[error("type mismatch at '{path}': expected {expected}, found {found}")]
    TypeMismatch {
        path: String,
        expected: TypeTag,
        found: String,
    },

    /// A mutation refused by the store's open mode.
    #[error("read-only violation at '{path}': {message}")]
    ReadOnlyViolation { path: String, message: String },

    /// The handle was used after the entry (or an ancestor) was deleted.
    #[error("entry handle for '{path}' was invalidated by a delete")]
    InvalidatedEntry { path: String },

    #[error("protocol '{protocol}' does not accept path '{uri}'")]
    UnsupportedPath { protocol: String, uri: String },

    #[error("unknown entry type: '{0}'")]
    UnknownType(String),

    #[error("unknown element data type: '{0}'")]
    UnknownDtype(String),

    #[error("unknown open mode: '{0}'")]
    UnknownMode(String),

    #[error("protocol not found: '{0}'")]
    UnknownProtocol(String),

    #[error("protocol name already used: '{0}'")]
    DuplicateProtocol(String),

    #[error("attribute '{key}' not found on '{path}'")]
    AttributeNotFound { path: String, key: String },

    /// A payload value that is internally inconsistent.
    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    #[error("operation not supported by {backend}: {operation}")]
    Unsupported { backend: String, operation: String },

    #[error("{tag} codec error: {message}")]
    Codec { tag: TypeTag, message: String },

    /// Persisted node metadata could not be read or does not match the layout.
    #[error("metadata error at '{location}': {message}")]
    Metadata { location: String, message: String },

    /// Physical storage failure, propagated unchanged.
    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn not_found(path: impl ToString) -> Self {
        Error::EntryNotFound {
            path: path.to_string(),
        }
    }

    pub fn already_exists(path: impl ToString, message: impl Into<String>) -> Self {
        Error::AlreadyExists {
            path: path.to_string(),
            message: message.into(),
        }
    }

    pub fn read_only(path: impl ToString, message: impl Into<String>) -> Self {
        Error::ReadOnlyViolation {
            path: path.to_string(),
            message: message.into(),
        }
    }

    pub fn codec(tag: TypeTag, message: impl Into<String>) -> Self {
        Error::Codec {
            tag,
            message: message.into(),
        }
    }

    pub fn metadata(location: impl ToString, message: impl Into<String>) -> Self {
        Error::Metadata {
            location: location.to_string(),
            message: message.into(),
        }
    }

    pub fn unsupported(backend: impl Into<String>, operation: impl Into<String>) -> Self {
        Error::Unsupported {
            backend: backend.into(),
            operation: operation.into(),
        }
    }

    /// True if this is an `EntryNotFound`.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::EntryNotFound { .. })
    }
}
