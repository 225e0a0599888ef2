//! Canonical extension identity and storage-key consistency.
//!
//! Input buckets are laid out as `<extension-id>/<filename>`. An archive
//! arriving through a storage event is only signed when the id computed from
//! its own manifest matches that first path segment.

use std::fmt;

use serde::Serialize;

use crate::digest::sha256_hex_bytes;
use crate::error::{SignError, SignResult};

/// Longest raw id that is used verbatim.
pub const MAX_RAW_ID_CHARS: usize = 64;

/// Canonical extension identity, derived from an archive's manifest.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct ExtensionId(String);

impl ExtensionId {
    /// Canonicalize a raw manifest id.
    ///
    /// Ids of up to 64 characters are kept as-is; longer ids are replaced by
    /// the hex SHA-256 digest of their UTF-8 bytes.
    pub fn from_raw(raw: &str) -> Self {
        if raw.chars().count() <= MAX_RAW_ID_CHARS {
            Self(raw.to_string())
        } else {
            Self(sha256_hex_bytes(raw.as_bytes()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for ExtensionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ExtensionId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Require `key` to be filed under `id`.
pub fn verify_storage_path(id: &ExtensionId, key: &str) -> SignResult<()> {
    let Some((asserted, _)) = key.split_once('/') else {
        return Err(SignError::IdentityNotPresentInPath {
            key: key.to_string(),
        });
    };

    if asserted != id.as_str() {
        return Err(SignError::IdentityMismatch {
            computed: id.to_string(),
            asserted: asserted.to_string(),
        });
    }

    Ok(())
}
