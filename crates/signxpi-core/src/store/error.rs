//! Error types for blob storage operations.

use thiserror::Error;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur while reading or writing blobs.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Object not found.
    #[error("object not found: {bucket}/{key}")]
    NotFound { bucket: String, key: String },

    /// Access denied to the storage backend.
    #[error("access denied to {bucket}/{key}: {message}")]
    AccessDenied {
        bucket: String,
        key: String,
        message: String,
    },

    /// Key is not a valid object path (empty segment, `.` or `..`).
    #[error("invalid object key {bucket}/{key}: {message}")]
    InvalidKey {
        bucket: String,
        key: String,
        message: String,
    },

    /// Invalid store specification.
    #[error("invalid store spec '{spec}': {reason}")]
    InvalidSpec { spec: String, reason: String },

    /// Backend could not be constructed for a bucket.
    #[error("store not configured for bucket {bucket}: {message}")]
    NotConfigured { bucket: String, message: String },

    /// Network or I/O error.
    #[error("I/O error on {bucket}/{key}: {message}")]
    Io {
        bucket: String,
        key: String,
        message: String,
    },
}

impl StoreError {
    /// Returns true if the object does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Create from an `object_store` error with context about the object.
    pub fn from_object_store(err: object_store::Error, bucket: &str, key: &str) -> Self {
        match &err {
            object_store::Error::NotFound { .. } => StoreError::NotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            },
            object_store::Error::PermissionDenied { .. }
            | object_store::Error::Unauthenticated { .. } => StoreError::AccessDenied {
                bucket: bucket.to_string(),
                key: key.to_string(),
                message: err.to_string(),
            },
            _ => StoreError::Io {
                bucket: bucket.to_string(),
                key: key.to_string(),
                message: err.to_string(),
            },
        }
    }
}
