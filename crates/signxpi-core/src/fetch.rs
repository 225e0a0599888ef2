//! Fetch an archive into a private temporary file and verify it.

use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, CONTENT_DISPOSITION, USER_AGENT};
use tempfile::NamedTempFile;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};
use url::Url;

use crate::digest::{verify_checksum, ExpectedChecksum};
use crate::error::{SignError, SignResult};
use crate::source::{content_disposition_filename, is_plain_filename, SourceDescriptor};
use crate::store::BlobStore;

const USER_AGENT_VALUE: &str = concat!("signxpi/", env!("CARGO_PKG_VERSION"));

/// Used when neither the source nor the server suggests a name.
pub const DEFAULT_FILENAME: &str = "extension.xpi";

/// An archive on local disk.
///
/// The temporary file is removed when this value is dropped.
#[derive(Debug)]
pub struct FetchedArchive {
    file: NamedTempFile,
    filename: String,
    source: SourceDescriptor,
}

impl FetchedArchive {
    pub fn path(&self) -> &Path {
        self.file.path()
    }

    /// Name the signed artifact is published under. Always a single path
    /// component.
    pub fn filename(&self) -> &str {
        &self.filename
    }

    /// Hash the file contents on the blocking pool and compare against
    /// `expected`.
    pub async fn verify(&self, expected: &ExpectedChecksum) -> SignResult<()> {
        let file = self.file.reopen()?;
        let source_ref = self.source.to_string();
        let wanted = expected.clone();

        tokio::task::spawn_blocking(move || {
            verify_checksum(BufReader::new(file), &wanted, &source_ref)
        })
        .await
        .map_err(|e| SignError::Io(std::io::Error::other(e)))??;

        debug!(source = %self.source, checksum = %expected, "checksum verified");
        Ok(())
    }
}

/// Retrieves archives from URLs or the blob store.
#[derive(Clone)]
pub struct ArchiveFetcher {
    http: reqwest::Client,
    store: Arc<dyn BlobStore>,
}

impl ArchiveFetcher {
    pub fn new(store: Arc<dyn BlobStore>, timeout_secs: u64) -> SignResult<Self> {
        let mut default_headers = HeaderMap::new();
        default_headers.insert(USER_AGENT, HeaderValue::from_static(USER_AGENT_VALUE));

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .default_headers(default_headers)
            .build()
            .map_err(|e| SignError::SourceUnavailable {
                source_ref: "http client".to_string(),
                reason: format!("failed to create HTTP client: {e}"),
            })?;

        Ok(Self { http, store })
    }

    /// Retrieve `source` into a fresh temporary file without verifying it.
    pub async fn download(&self, source: &SourceDescriptor) -> SignResult<FetchedArchive> {
        let file = tempfile::Builder::new()
            .prefix("signxpi-")
            .suffix(".xpi")
            .tempfile()?;
        let mut out = tokio::fs::File::from_std(file.reopen()?);

        let disposition_name = match source {
            SourceDescriptor::Url { url } => self.fetch_url(url, &mut out).await?,
            SourceDescriptor::ObjectStore { bucket, key } => {
                self.fetch_object(bucket, key, &mut out).await?;
                None
            }
        };

        out.flush().await?;
        let size = out.metadata().await?.len();

        let filename = disposition_name
            .or_else(|| source.filename_hint())
            .filter(|name| is_plain_filename(name))
            .unwrap_or_else(|| DEFAULT_FILENAME.to_string());

        info!(source = %source, filename = %filename, bytes = size, "fetched archive");

        Ok(FetchedArchive {
            file,
            filename,
            source: source.clone(),
        })
    }

    async fn fetch_url(&self, url: &Url, out: &mut tokio::fs::File) -> SignResult<Option<String>> {
        let unavailable = |reason: String| SignError::SourceUnavailable {
            source_ref: url.to_string(),
            reason,
        };

        debug!(url = %url, "downloading archive");
        let mut response = self
            .http
            .get(url.clone())
            .send()
            .await
            .map_err(|e| unavailable(format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(unavailable(format!("HTTP {status}")));
        }

        let disposition_name = response
            .headers()
            .get(CONTENT_DISPOSITION)
            .and_then(|value| value.to_str().ok())
            .and_then(content_disposition_filename);

        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| unavailable(format!("failed to read response body: {e}")))?
        {
            out.write_all(&chunk).await?;
        }

        Ok(disposition_name)
    }

    async fn fetch_object(
        &self,
        bucket: &str,
        key: &str,
        out: &mut tokio::fs::File,
    ) -> SignResult<()> {
        debug!(bucket, key, "reading archive from store");
        let bytes = self
            .store
            .get(bucket, key)
            .await
            .map_err(|e| SignError::SourceUnavailable {
                source_ref: format!("s3://{bucket}/{key}"),
                reason: e.to_string(),
            })?;
        out.write_all(&bytes).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::digest::sha256_hex_bytes;
    use crate::store::ObjectStoreBlobStore;
    use bytes::Bytes;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn fetcher() -> (ArchiveFetcher, Arc<ObjectStoreBlobStore>) {
        let store = Arc::new(ObjectStoreBlobStore::memory());
        let fetcher = ArchiveFetcher::new(store.clone(), 5).unwrap();
        (fetcher, store)
    }

    fn checksum_of(bytes: &[u8]) -> ExpectedChecksum {
        ExpectedChecksum::parse(&sha256_hex_bytes(bytes)).unwrap()
    }

    #[tokio::test]
    async fn test_fetch_url_with_matching_checksum() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/releases/addon-1.0.xpi"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"xpi bytes".to_vec()))
            .mount(&server)
            .await;

        let (fetcher, _) = fetcher();
        let url = Url::parse(&format!("{}/releases/addon-1.0.xpi", server.uri())).unwrap();
        let source = SourceDescriptor::url(url);
        let fetched = fetcher.download(&source).await.unwrap();
        fetched.verify(&checksum_of(b"xpi bytes")).await.unwrap();

        assert_eq!(fetched.filename(), "addon-1.0.xpi");
        assert_eq!(std::fs::read(fetched.path()).unwrap(), b"xpi bytes");
    }

    #[tokio::test]
    async fn test_fetch_url_uses_content_disposition() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/download"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-disposition", r#"attachment; filename="real-name.xpi""#)
                    .set_body_bytes(b"xpi".to_vec()),
            )
            .mount(&server)
            .await;

        let (fetcher, _) = fetcher();
        let url = Url::parse(&format!("{}/download?id=7", server.uri())).unwrap();
        let fetched = fetcher.download(&SourceDescriptor::url(url)).await.unwrap();
        assert_eq!(fetched.filename(), "real-name.xpi");
    }

    #[tokio::test]
    async fn test_fetch_url_ignores_inline_disposition() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/download"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-disposition", r#"inline; filename="real-name.xpi""#)
                    .set_body_bytes(b"xpi".to_vec()),
            )
            .mount(&server)
            .await;

        let (fetcher, _) = fetcher();
        let url = Url::parse(&format!("{}/download", server.uri())).unwrap();
        let fetched = fetcher.download(&SourceDescriptor::url(url)).await.unwrap();
        assert_eq!(fetched.filename(), "download");
    }

    #[tokio::test]
    async fn test_verify_reports_checksum_mismatch() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"tampered".to_vec()))
            .mount(&server)
            .await;

        let (fetcher, _) = fetcher();
        let url = Url::parse(&format!("{}/a.xpi", server.uri())).unwrap();
        let expected = checksum_of(b"original");
        let fetched = fetcher
            .download(&SourceDescriptor::url(url.clone()))
            .await
            .unwrap();
        let err = fetched.verify(&expected).await.unwrap_err();

        match err {
            SignError::ChecksumMismatch {
                source_ref,
                expected: reported,
                actual,
            } => {
                assert_eq!(source_ref, url.to_string());
                assert_eq!(reported, expected.as_str());
                assert_eq!(actual, sha256_hex_bytes(b"tampered"));
            }
            other => panic!("expected ChecksumMismatch, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_fetch_url_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let (fetcher, _) = fetcher();
        let url = Url::parse(&format!("{}/gone.xpi", server.uri())).unwrap();
        let err = fetcher
            .download(&SourceDescriptor::url(url))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "SourceUnavailable");
        assert!(err.to_string().contains("404"));
    }

    #[tokio::test]
    async fn test_fetch_object() {
        let (fetcher, store) = fetcher();
        store
            .put("input", "a@b.org/build-1.xpi", Bytes::from_static(b"zip"))
            .await
            .unwrap();

        let source = SourceDescriptor::object("input", "a@b.org/build-1.xpi");
        let fetched = fetcher.download(&source).await.unwrap();
        fetched.verify(&checksum_of(b"zip")).await.unwrap();
        assert_eq!(fetched.filename(), "build-1.xpi");
    }

    #[tokio::test]
    async fn test_path_like_key_name_falls_back_to_default_name() {
        let (fetcher, store) = fetcher();
        let key = r"a@b.org/..\evil.xpi";
        store
            .put("input", key, Bytes::from_static(b"zip"))
            .await
            .unwrap();

        let fetched = fetcher
            .download(&SourceDescriptor::object("input", key))
            .await
            .unwrap();
        assert_eq!(fetched.filename(), DEFAULT_FILENAME);
    }

    #[tokio::test]
    async fn test_fetch_missing_object() {
        let (fetcher, _) = fetcher();
        let err = fetcher
            .download(&SourceDescriptor::object("input", "nope.xpi"))
            .await
            .unwrap_err();
        match err {
            SignError::SourceUnavailable { source_ref, .. } => {
                assert_eq!(source_ref, "s3://input/nope.xpi");
            }
            other => panic!("expected SourceUnavailable, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_temp_file_removed_on_drop() {
        let (fetcher, store) = fetcher();
        store
            .put("input", "x.xpi", Bytes::from_static(b"zip"))
            .await
            .unwrap();

        let fetched = fetcher
            .download(&SourceDescriptor::object("input", "x.xpi"))
            .await
            .unwrap();
        let path = fetched.path().to_path_buf();
        assert!(path.exists());
        drop(fetched);
        assert!(!path.exists());
    }
}
