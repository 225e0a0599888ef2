//! `object_store` implementation of [`BlobStore`].
//!
//! One `ObjectStore` client is built per bucket on first use and cached.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use object_store::path::Path as ObjectPath;
use object_store::{GetOptions, ObjectStore, PutOptions, PutPayload};
use tracing::debug;

use super::{BlobStore, StoreError, StoreResult, StoreSpec};

/// Blob store backed by `object_store` (S3, local filesystem, in-memory).
pub struct ObjectStoreBlobStore {
    spec: StoreSpec,
    buckets: Mutex<HashMap<String, Arc<dyn ObjectStore>>>,
}

impl ObjectStoreBlobStore {
    pub fn new(spec: StoreSpec) -> Self {
        Self {
            spec,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    /// Create an in-memory store for testing.
    pub fn memory() -> Self {
        Self::new(StoreSpec::Memory)
    }

    fn bucket(&self, bucket: &str) -> StoreResult<Arc<dyn ObjectStore>> {
        let mut buckets = self.buckets.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(store) = buckets.get(bucket) {
            return Ok(Arc::clone(store));
        }

        let store = self.build(bucket)?;
        buckets.insert(bucket.to_string(), Arc::clone(&store));
        Ok(store)
    }

    fn build(&self, bucket: &str) -> StoreResult<Arc<dyn ObjectStore>> {
        let not_configured = |message: String| StoreError::NotConfigured {
            bucket: bucket.to_string(),
            message,
        };

        let store: Arc<dyn ObjectStore> = match &self.spec {
            StoreSpec::Memory => Arc::new(object_store::memory::InMemory::new()),
            StoreSpec::Local { root } => {
                let path = root.join(bucket);
                std::fs::create_dir_all(&path).map_err(|e| {
                    not_configured(format!("failed to create {}: {}", path.display(), e))
                })?;
                Arc::new(
                    object_store::local::LocalFileSystem::new_with_prefix(&path)
                        .map_err(|e| not_configured(e.to_string()))?,
                )
            }
            StoreSpec::S3 { region } => {
                let mut builder =
                    object_store::aws::AmazonS3Builder::from_env().with_bucket_name(bucket);
                if let Some(region) = region {
                    builder = builder.with_region(region);
                }
                Arc::new(
                    builder
                        .build()
                        .map_err(|e| not_configured(format!("failed to create S3 client: {e}")))?,
                )
            }
        };

        debug!(bucket, spec = ?self.spec, "created object store client");
        Ok(store)
    }
}

/// Keys are taken verbatim (no percent-encoding), so `{guid}/build.xpi`
/// addresses the object of that exact name.
fn object_path(bucket: &str, key: &str) -> StoreResult<ObjectPath> {
    ObjectPath::parse(key).map_err(|e| StoreError::InvalidKey {
        bucket: bucket.to_string(),
        key: key.to_string(),
        message: e.to_string(),
    })
}

#[async_trait]
impl BlobStore for ObjectStoreBlobStore {
    async fn get(&self, bucket: &str, key: &str) -> StoreResult<Bytes> {
        let store = self.bucket(bucket)?;
        let path = object_path(bucket, key)?;

        let result = store
            .get_opts(&path, GetOptions::default())
            .await
            .map_err(|e| StoreError::from_object_store(e, bucket, key))?;

        result
            .bytes()
            .await
            .map_err(|e| StoreError::from_object_store(e, bucket, key))
    }

    async fn put(&self, bucket: &str, key: &str, bytes: Bytes) -> StoreResult<()> {
        let store = self.bucket(bucket)?;
        let path = object_path(bucket, key)?;

        store
            .put_opts(&path, PutPayload::from_bytes(bytes), PutOptions::default())
            .await
            .map_err(|e| StoreError::from_object_store(e, bucket, key))?;
        Ok(())
    }
}
