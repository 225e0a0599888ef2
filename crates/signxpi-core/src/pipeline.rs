//! Signing orchestration.
//!
//! Each record moves through
//! `Resolving -> Fetching -> Verifying -> ExtractingIdentity ->
//! ValidatingIdentity -> Signing -> Publishing -> Done`.
//! The first failing stage ends the record and nothing is published for it.
//! Records in a batch are independent of each other.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use bytes::Bytes;
use futures::StreamExt;
use serde::ser::SerializeStruct;
use serde::{Deserialize, Serialize, Serializer};
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::autograph::AutographClient;
use crate::config::SignerConfig;
use crate::error::{SignError, SignResult};
use crate::event::SignRecord;
use crate::fetch::{ArchiveFetcher, FetchedArchive};
use crate::identity::{verify_storage_path, ExtensionId};
use crate::manifest;
use crate::packager::{ArchivePackager, CommandPackager};
use crate::store::{BlobStore, ObjectStoreBlobStore};

/// Pipeline stage of a single record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStage {
    Resolving,
    Fetching,
    Verifying,
    ExtractingIdentity,
    ValidatingIdentity,
    Signing,
    Publishing,
    Done,
}

impl fmt::Display for RunStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Resolving => "resolving",
            Self::Fetching => "fetching",
            Self::Verifying => "verifying",
            Self::ExtractingIdentity => "extracting_identity",
            Self::ValidatingIdentity => "validating_identity",
            Self::Signing => "signing",
            Self::Publishing => "publishing",
            Self::Done => "done",
        };
        f.write_str(name)
    }
}

/// A signed archive written to the output bucket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishedArtifact {
    pub bucket: String,
    pub key: String,
}

/// Why and where a record stopped.
#[derive(Debug)]
pub struct RecordFailure {
    pub stage: RunStage,
    pub error: SignError,
}

impl Serialize for RecordFailure {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("RecordFailure", 3)?;
        state.serialize_field("stage", &self.stage)?;
        state.serialize_field("kind", self.error.kind())?;
        state.serialize_field("message", &self.error.to_string())?;
        state.end()
    }
}

/// Result of one record.
///
/// Serializes as `{"uploaded": {"bucket", "key"}}` or
/// `{"error": {"stage", "kind", "message"}}`.
#[derive(Debug, Serialize)]
pub enum RecordOutcome {
    #[serde(rename = "uploaded")]
    Published(PublishedArtifact),
    #[serde(rename = "error")]
    Failed(RecordFailure),
}

impl RecordOutcome {
    pub fn is_published(&self) -> bool {
        matches!(self, Self::Published(_))
    }

    pub fn published(&self) -> Option<&PublishedArtifact> {
        match self {
            Self::Published(artifact) => Some(artifact),
            Self::Failed(_) => None,
        }
    }

    pub fn failure(&self) -> Option<&RecordFailure> {
        match self {
            Self::Published(_) => None,
            Self::Failed(failure) => Some(failure),
        }
    }
}

/// Outcomes of a batch, in input order.
#[derive(Debug, Serialize)]
#[serde(transparent)]
pub struct BatchReport {
    pub outcomes: Vec<RecordOutcome>,
}

impl BatchReport {
    /// True when every record was published (and there was at least one).
    pub fn all_published(&self) -> bool {
        !self.outcomes.is_empty() && self.outcomes.iter().all(RecordOutcome::is_published)
    }

    pub fn failures(&self) -> impl Iterator<Item = &RecordFailure> {
        self.outcomes.iter().filter_map(RecordOutcome::failure)
    }

    pub fn published(&self) -> impl Iterator<Item = &PublishedArtifact> {
        self.outcomes.iter().filter_map(RecordOutcome::published)
    }

    /// Process exit code: 0 when all published, else that of the first failure.
    pub fn exit_code(&self) -> i32 {
        self.failures()
            .next()
            .map_or(0, |failure| failure.error.exit_code())
    }
}

/// Drives records through the pipeline.
pub struct Signer {
    fetcher: ArchiveFetcher,
    store: Arc<dyn BlobStore>,
    packager: Arc<dyn ArchivePackager>,
    autograph: AutographClient,
    output_bucket: String,
    concurrency: usize,
}

impl Signer {
    /// Build a signer with explicit collaborators.
    pub fn new(
        config: &SignerConfig,
        store: Arc<dyn BlobStore>,
        packager: Arc<dyn ArchivePackager>,
    ) -> SignResult<Self> {
        Ok(Self {
            fetcher: ArchiveFetcher::new(Arc::clone(&store), config.fetch_timeout_secs)?,
            autograph: AutographClient::new(&config.autograph)?,
            store,
            packager,
            output_bucket: config.output_bucket.clone(),
            concurrency: config.concurrency.max(1),
        })
    }

    /// Build a signer with the configured store and command packager.
    pub fn from_config(config: &SignerConfig) -> SignResult<Self> {
        let program = config.packager.clone().ok_or_else(|| SignError::Packaging {
            message: "no packager program configured (SIGNXPI_PACKAGER)".to_string(),
        })?;
        let store: Arc<dyn BlobStore> = Arc::new(ObjectStoreBlobStore::new(config.store.clone()));
        Self::new(config, store, Arc::new(CommandPackager::new(program)))
    }

    pub fn output_bucket(&self) -> &str {
        &self.output_bucket
    }

    /// Run every record, at most `concurrency` at a time.
    pub async fn run_batch(&self, records: Vec<SignRecord>) -> BatchReport {
        let total = records.len();
        let outcomes: Vec<RecordOutcome> = futures::stream::iter(records.into_iter().enumerate())
            .map(|(index, record)| {
                let span = info_span!(
                    "record",
                    index,
                    source = %record.source,
                    origin = %record.origin
                );
                async move { self.run_record(&record).await }.instrument(span)
            })
            .buffered(self.concurrency)
            .collect()
            .await;

        let report = BatchReport { outcomes };
        let published = report.published().count();
        info!(total, published, failed = total - published, "batch finished");
        report
    }

    /// Run one record to completion.
    pub async fn run_record(&self, record: &SignRecord) -> RecordOutcome {
        match self.sign_record(record).await {
            Ok(artifact) => RecordOutcome::Published(artifact),
            Err(failure) => {
                if failure.error.is_security_relevant() {
                    error!(
                        stage = %failure.stage,
                        kind = failure.error.kind(),
                        error = %failure.error,
                        "record rejected: integrity or identity check failed"
                    );
                } else {
                    warn!(
                        stage = %failure.stage,
                        kind = failure.error.kind(),
                        error = %failure.error,
                        "record failed"
                    );
                }
                RecordOutcome::Failed(failure)
            }
        }
    }

    /// Run one record, reporting the stage a failure happened in.
    pub async fn sign_record(&self, record: &SignRecord) -> Result<PublishedArtifact, RecordFailure> {
        let at = |stage: RunStage| move |error: SignError| RecordFailure { stage, error };

        debug!(stage = %RunStage::Resolving, hint = ?record.source.filename_hint(), "resolving source");

        let archive = self
            .fetcher
            .download(&record.source)
            .await
            .map_err(at(RunStage::Fetching))?;

        if let Some(expected) = &record.checksum {
            archive
                .verify(expected)
                .await
                .map_err(at(RunStage::Verifying))?;
        }

        let id = extract_identity(archive.path().to_path_buf())
            .await
            .map_err(at(RunStage::ExtractingIdentity))?;
        debug!(extension_id = %id, "extracted extension id");

        if record.requires_path_check() {
            let key = record.source.storage_key().ok_or_else(|| RecordFailure {
                stage: RunStage::ValidatingIdentity,
                error: SignError::IdentityNotPresentInPath {
                    key: record.source.to_string(),
                },
            })?;
            verify_storage_path(&id, key).map_err(at(RunStage::ValidatingIdentity))?;
        }

        let signed = self
            .sign_archive(&archive, &id)
            .await
            .map_err(at(RunStage::Signing))?;

        let artifact = self
            .publish(archive.filename(), signed)
            .await
            .map_err(at(RunStage::Publishing))?;

        info!(
            stage = %RunStage::Done,
            extension_id = %id,
            bucket = %artifact.bucket,
            key = %artifact.key,
            "published signed archive"
        );
        Ok(artifact)
    }

    async fn sign_archive(&self, archive: &FetchedArchive, id: &ExtensionId) -> SignResult<Bytes> {
        let payload = self.packager.signing_payload(archive.path()).await?;
        let signature = self.autograph.sign_data(&payload, id).await?;

        let scratch = tempfile::tempdir()?;
        let dest = scratch.path().join(archive.filename());
        self.packager
            .package(archive.path(), &payload, &signature, &dest)
            .await?;

        Ok(Bytes::from(tokio::fs::read(&dest).await?))
    }

    async fn publish(&self, filename: &str, signed: Bytes) -> SignResult<PublishedArtifact> {
        self.store
            .put(&self.output_bucket, filename, signed)
            .await
            .map_err(|e| SignError::Storage {
                bucket: self.output_bucket.clone(),
                key: filename.to_string(),
                message: e.to_string(),
            })?;

        Ok(PublishedArtifact {
            bucket: self.output_bucket.clone(),
            key: filename.to_string(),
        })
    }
}

async fn extract_identity(path: PathBuf) -> SignResult<ExtensionId> {
    tokio::task::spawn_blocking(move || manifest::extension_id_from_path(&path))
        .await
        .map_err(|e| SignError::Io(std::io::Error::other(e)))?
}
