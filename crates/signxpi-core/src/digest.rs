//! SHA-256 checksums for fetched archives.

use std::fmt;
use std::io::Read;

use sha2::{Digest, Sha256};

use crate::error::{SignError, SignResult};

/// Length of a hex-encoded SHA-256 digest.
const DIGEST_HEX_LEN: usize = 64;

/// An expected archive checksum (hex-encoded SHA-256).
///
/// Parsing is lenient about case; the stored form is lowercase so it
/// compares directly against [`sha256_hex_reader`] output.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ExpectedChecksum(String);

impl ExpectedChecksum {
    /// Parse a hex digest, returning a description of the problem on failure.
    pub fn parse(value: &str) -> Result<Self, String> {
        let value = value.trim();
        if value.len() != DIGEST_HEX_LEN {
            return Err(format!(
                "expected {DIGEST_HEX_LEN} hex characters, got {}",
                value.len()
            ));
        }
        if let Some(bad) = value.chars().find(|c| !c.is_ascii_hexdigit()) {
            return Err(format!("non-hex character '{bad}'"));
        }
        Ok(Self(value.to_ascii_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ExpectedChecksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Hash a reader to a lowercase hex SHA-256 digest.
pub fn sha256_hex_reader<R: Read>(mut reader: R) -> std::io::Result<String> {
    let mut hasher = Sha256::new();
    let mut buf = [0_u8; 8192];

    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }

    Ok(hex::encode(hasher.finalize()))
}

/// Hash in-memory bytes to a lowercase hex SHA-256 digest.
pub fn sha256_hex_bytes(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Verify that `reader` hashes to `expected`.
///
/// `source_ref` names where the bytes came from (URL or `bucket/key`) and is
/// carried into the mismatch error.
pub fn verify_checksum<R: Read>(
    reader: R,
    expected: &ExpectedChecksum,
    source_ref: &str,
) -> SignResult<()> {
    let actual = sha256_hex_reader(reader)?;
    if actual != expected.as_str() {
        return Err(SignError::ChecksumMismatch {
            source_ref: source_ref.to_string(),
            expected: expected.to_string(),
            actual,
        });
    }
    Ok(())
}
