//! Archive repackaging seam.
//!
//! Producing the signing payload (the JAR manifest signature file) and
//! folding a detached signature back into the archive are done outside this
//! crate. [`CommandPackager`] drives an external program for both steps:
//!
//! ```text
//! <program> payload <archive>                                  # payload on stdout
//! <program> package <archive> <payload> <signature> <output>   # writes <output>
//! ```

use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use crate::error::{SignError, SignResult};

/// Repackaging primitive used by the pipeline.
#[async_trait]
pub trait ArchivePackager: Send + Sync {
    /// Bytes to send to the signing service for `archive`.
    async fn signing_payload(&self, archive: &Path) -> SignResult<Vec<u8>>;

    /// Write a signed copy of `archive` to `dest`.
    async fn package(
        &self,
        archive: &Path,
        payload: &[u8],
        signature: &[u8],
        dest: &Path,
    ) -> SignResult<()>;
}

/// Packager backed by an external program.
#[derive(Debug, Clone)]
pub struct CommandPackager {
    program: PathBuf,
}

impl CommandPackager {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    async fn run(&self, args: &[&OsStr]) -> SignResult<Vec<u8>> {
        debug!(program = %self.program.display(), ?args, "running packager");

        let output = Command::new(&self.program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| SignError::Packaging {
                message: format!("failed to run {}: {e}", self.program.display()),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(SignError::Packaging {
                message: format!(
                    "{} exited with {}: {}",
                    self.program.display(),
                    output.status,
                    stderr.trim()
                ),
            });
        }

        Ok(output.stdout)
    }
}

#[async_trait]
impl ArchivePackager for CommandPackager {
    async fn signing_payload(&self, archive: &Path) -> SignResult<Vec<u8>> {
        let payload = self
            .run(&[OsStr::new("payload"), archive.as_os_str()])
            .await?;
        if payload.is_empty() {
            return Err(SignError::Packaging {
                message: format!("{} produced an empty payload", self.program.display()),
            });
        }
        Ok(payload)
    }

    async fn package(
        &self,
        archive: &Path,
        payload: &[u8],
        signature: &[u8],
        dest: &Path,
    ) -> SignResult<()> {
        let scratch = tempfile::tempdir()?;
        let payload_path = scratch.path().join("payload");
        let signature_path = scratch.path().join("signature");
        tokio::fs::write(&payload_path, payload).await?;
        tokio::fs::write(&signature_path, signature).await?;

        self.run(&[
            OsStr::new("package"),
            archive.as_os_str(),
            payload_path.as_os_str(),
            signature_path.as_os_str(),
            dest.as_os_str(),
        ])
        .await?;

        if !tokio::fs::try_exists(dest).await? {
            return Err(SignError::Packaging {
                message: format!("{} did not write {}", self.program.display(), dest.display()),
            });
        }
        Ok(())
    }
}
