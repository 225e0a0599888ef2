//! Error types for the signing pipeline.

use std::fmt;

/// Pipeline errors.
///
/// Every variant carries the identifiers needed to diagnose a failed run
/// without re-running it.
#[derive(Debug, thiserror::Error)]
pub enum SignError {
    /// The archive could not be retrieved (network or storage failure).
    #[error("source unavailable: {source_ref}: {reason}")]
    SourceUnavailable { source_ref: String, reason: String },

    /// The fetched bytes do not hash to the expected checksum.
    #[error("when fetching {source_ref}, expected checksum {expected} (got {actual})")]
    ChecksumMismatch {
        source_ref: String,
        expected: String,
        actual: String,
    },

    /// The fetched file is not a readable ZIP archive.
    #[error("invalid archive: {reason}")]
    ArchiveInvalid { reason: String },

    /// Neither `install.rdf` nor `manifest.json` is present.
    #[error("extension is missing a manifest (install.rdf or manifest.json)")]
    ManifestMissing,

    /// A manifest entry exists but could not be parsed.
    #[error("invalid {manifest}: {reason}")]
    ManifestInvalid { manifest: String, reason: String },

    /// The manifest does not declare an extension id.
    #[error("extension does not have an id in {manifest}")]
    IdentityMissing { manifest: String },

    /// The storage key is not prefixed with an extension id.
    #[error("storage key was not prefixed with an extension id (got {key})")]
    IdentityNotPresentInPath { key: String },

    /// The storage key prefix names a different extension.
    #[error("extension id was {computed} (storage key starts with {asserted})")]
    IdentityMismatch { computed: String, asserted: String },

    /// The signing authority rejected the request or answered garbage.
    #[error("signing service error{}: {message}", fmt_status(.status))]
    SigningService { status: Option<u16>, message: String },

    /// The repackaging primitive failed.
    #[error("packaging failed: {message}")]
    Packaging { message: String },

    /// Writing the signed artifact failed.
    #[error("failed to store {bucket}/{key}: {message}")]
    Storage {
        bucket: String,
        key: String,
        message: String,
    },

    /// Local I/O on the temporary archive.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

fn fmt_status(status: &Option<u16>) -> String {
    status.map(|s| format!(" (HTTP {s})")).unwrap_or_default()
}

impl SignError {
    /// Stable machine-readable name, used in result payloads.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::SourceUnavailable { .. } => "SourceUnavailable",
            Self::ChecksumMismatch { .. } => "ChecksumMismatch",
            Self::ArchiveInvalid { .. } => "ArchiveInvalid",
            Self::ManifestMissing => "ManifestMissing",
            Self::ManifestInvalid { .. } => "ManifestInvalid",
            Self::IdentityMissing { .. } => "IdentityMissing",
            Self::IdentityNotPresentInPath { .. } => "IdentityNotPresentInPath",
            Self::IdentityMismatch { .. } => "IdentityMismatch",
            Self::SigningService { .. } => "SigningServiceError",
            Self::Packaging { .. } => "PackagingError",
            Self::Storage { .. } => "StorageError",
            Self::Io(_) => "IoError",
        }
    }

    /// Exit code for CLI.
    pub fn exit_code(&self) -> i32 {
        match self {
            // Malformed archive
            Self::ArchiveInvalid { .. } => 1,
            Self::ManifestMissing => 1,
            Self::ManifestInvalid { .. } => 1,
            Self::IdentityMissing { .. } => 1,

            // Security issues
            Self::ChecksumMismatch { .. } => 4,
            Self::IdentityNotPresentInPath { .. } => 4,
            Self::IdentityMismatch { .. } => 4,

            // External dependencies
            Self::SourceUnavailable { .. } => 5,
            Self::SigningService { .. } => 5,
            Self::Storage { .. } => 5,

            // Other
            Self::Packaging { .. } => 6,
            Self::Io(_) => 6,
        }
    }

    /// Whether the failure is an integrity or identity violation.
    pub fn is_security_relevant(&self) -> bool {
        matches!(
            self,
            Self::ChecksumMismatch { .. }
                | Self::IdentityNotPresentInPath { .. }
                | Self::IdentityMismatch { .. }
        )
    }
}

/// Result type for pipeline operations.
pub type SignResult<T> = Result<T, SignError>;

/// One offending field in a configuration or invocation payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldProblem {
    /// Dotted path of the field (e.g. `source.url`, `Records[0].s3.object.key`).
    pub field: String,
    /// What is wrong with it.
    pub message: String,
}

impl FieldProblem {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for FieldProblem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Validation failure listing every offending field, not just the first.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid {what}: {}", join_problems(.problems))]
pub struct ValidationError {
    /// What was being validated (`configuration`, `sign event`, ...).
    pub what: &'static str,
    pub problems: Vec<FieldProblem>,
}

fn join_problems(problems: &[FieldProblem]) -> String {
    problems
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl ValidationError {
    /// Wrap collected problems, or `Ok(())` when there are none.
    pub fn check(what: &'static str, problems: Vec<FieldProblem>) -> Result<(), Self> {
        if problems.is_empty() {
            Ok(())
        } else {
            Err(Self { what, problems })
        }
    }

    /// Whether a given field was reported.
    pub fn mentions(&self, field: &str) -> bool {
        self.problems.iter().any(|p| p.field == field)
    }
}
