//! Verification, identity resolution and signing for XPI extension archives.
//!
//! An archive is fetched from a URL or an object store, checked against an
//! out-of-band SHA-256 checksum, and its extension id is read from
//! `install.rdf` or `manifest.json`. For archives announced by a storage
//! notification the id must also match the first segment of the storage key.
//! The signing payload is then sent to Autograph and the signed archive is
//! written to the output bucket.
//!
//! # Quick Start
//!
//! ```no_run
//! use signxpi_core::{parse_invocation, Signer, SignerConfig};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = SignerConfig::from_env()?;
//! let signer = Signer::from_config(&config)?;
//!
//! let records = parse_invocation(r#"{"Records": [{"s3": {
//!     "bucket": {"name": "addon-input"},
//!     "object": {"key": "my-addon%40example.com/build-1.xpi"}}}]}"#)?;
//! let report = signer.run_batch(records).await;
//! println!("{}", serde_json::to_string(&report)?);
//! # Ok(())
//! # }
//! ```
//!
//! # Configuration
//!
//! See [`config`] for the environment variables read by
//! [`SignerConfig::from_env`].

pub mod autograph;
pub mod config;
pub mod digest;
pub mod error;
pub mod event;
pub mod fetch;
pub mod identity;
pub mod manifest;
pub mod packager;
pub mod pipeline;
pub mod source;
pub mod store;

// Re-export main types
pub use autograph::{AutographClient, HawkCredentials, SigningRequest};
pub use config::{AutographSettings, SignerConfig};
pub use digest::{sha256_hex_bytes, sha256_hex_reader, verify_checksum, ExpectedChecksum};
pub use error::{FieldProblem, SignError, SignResult, ValidationError};
pub use event::{parse_invocation, Invocation, RecordOrigin, SignEvent, SignRecord};
pub use fetch::{ArchiveFetcher, FetchedArchive};
pub use identity::{verify_storage_path, ExtensionId};
pub use packager::{ArchivePackager, CommandPackager};
pub use pipeline::{BatchReport, PublishedArtifact, RecordOutcome, RunStage, Signer};
pub use source::SourceDescriptor;
pub use store::{BlobStore, ObjectStoreBlobStore, StoreError, StoreSpec};
