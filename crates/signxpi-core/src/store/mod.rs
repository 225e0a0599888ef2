//! Blob storage for input archives and signed output.
//!
//! The pipeline only needs `get(bucket, key)` and `put(bucket, key, bytes)`.
//! Backends are selected by a store spec:
//!
//! ```text
//! s3                       # AWS S3, credentials from the environment
//! s3://?region=us-west-2   # same, with an explicit region
//! file:///var/lib/signxpi  # local directory, one sub-directory per bucket
//! memory://                # in-process (tests)
//! ```

pub mod error;
pub mod object_store_backend;

use std::path::PathBuf;

use async_trait::async_trait;
use bytes::Bytes;

pub use error::{StoreError, StoreResult};
pub use object_store_backend::ObjectStoreBlobStore;

/// Parsed store specification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreSpec {
    S3 { region: Option<String> },
    Local { root: PathBuf },
    Memory,
}

impl StoreSpec {
    /// Parse `s3`, `s3://?region=..`, `file:///path` or `memory://`.
    pub fn parse(spec: &str) -> StoreResult<Self> {
        let spec = spec.trim();
        if spec.eq_ignore_ascii_case("s3") {
            return Ok(Self::S3 { region: None });
        }
        if spec.eq_ignore_ascii_case("memory") {
            return Ok(Self::Memory);
        }

        let url = url::Url::parse(spec).map_err(|e| StoreError::InvalidSpec {
            spec: spec.to_string(),
            reason: e.to_string(),
        })?;

        match url.scheme() {
            "s3" => Ok(Self::S3 {
                region: url
                    .query_pairs()
                    .find(|(k, _)| k == "region")
                    .map(|(_, v)| v.to_string()),
            }),
            "file" => {
                let root = url.to_file_path().map_err(|()| StoreError::InvalidSpec {
                    spec: spec.to_string(),
                    reason: "file store must be an absolute path".to_string(),
                })?;
                Ok(Self::Local { root })
            }
            "memory" => Ok(Self::Memory),
            scheme => Err(StoreError::InvalidSpec {
                spec: spec.to_string(),
                reason: format!("unsupported scheme: {scheme}"),
            }),
        }
    }
}

impl Default for StoreSpec {
    fn default() -> Self {
        Self::S3 { region: None }
    }
}

/// Bucket + key blob access.
///
/// Implementations must be safe to share between concurrently running
/// pipeline records.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Read a whole object.
    async fn get(&self, bucket: &str, key: &str) -> StoreResult<Bytes>;

    /// Write a whole object, replacing any existing one.
    async fn put(&self, bucket: &str, key: &str, bytes: Bytes) -> StoreResult<()>;
}
