//! Extension identity extraction from XPI manifests.
//!
//! An XPI declares its id in one of two top-level entries:
//!
//! - `install.rdf`: legacy RDF/XML install manifest ([`rdf`])
//! - `manifest.json`: WebExtension manifest ([`json`])
//!
//! When both are present `install.rdf` wins. The raw id is canonicalized
//! with [`ExtensionId::from_raw`].

pub mod json;
pub mod rdf;

use std::io::{Read, Seek};
use std::path::Path;

use tracing::debug;
use zip::result::ZipError;
use zip::ZipArchive;

use crate::error::{SignError, SignResult};
use crate::identity::ExtensionId;

/// Legacy install manifest entry name.
pub const INSTALL_RDF: &str = "install.rdf";

/// WebExtension manifest entry name.
pub const MANIFEST_JSON: &str = "manifest.json";

/// Which manifest format an id was read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManifestKind {
    InstallRdf,
    ManifestJson,
}

impl ManifestKind {
    pub fn entry_name(self) -> &'static str {
        match self {
            Self::InstallRdf => INSTALL_RDF,
            Self::ManifestJson => MANIFEST_JSON,
        }
    }
}

/// Read the raw (uncanonicalized) id and the manifest it came from.
pub fn raw_extension_id<R: Read + Seek>(reader: R) -> SignResult<(String, ManifestKind)> {
    let mut archive = ZipArchive::new(reader).map_err(|e| SignError::ArchiveInvalid {
        reason: e.to_string(),
    })?;

    let kind = if has_entry(&archive, INSTALL_RDF) {
        ManifestKind::InstallRdf
    } else if has_entry(&archive, MANIFEST_JSON) {
        ManifestKind::ManifestJson
    } else {
        return Err(SignError::ManifestMissing);
    };

    let bytes = read_entry(&mut archive, kind.entry_name())?;
    let raw = match kind {
        ManifestKind::InstallRdf => rdf::extension_id(&bytes)?,
        ManifestKind::ManifestJson => json::extension_id(&bytes)?,
    };

    debug!(manifest = kind.entry_name(), raw_id = %raw, "read extension id");
    Ok((raw, kind))
}

/// Canonical extension id of an archive.
pub fn extension_id<R: Read + Seek>(reader: R) -> SignResult<ExtensionId> {
    let (raw, _) = raw_extension_id(reader)?;
    Ok(ExtensionId::from_raw(&raw))
}

/// Canonical extension id of an archive on disk.
pub fn extension_id_from_path(path: &Path) -> SignResult<ExtensionId> {
    let file = std::fs::File::open(path)?;
    extension_id(file)
}

fn has_entry<R: Read + Seek>(archive: &ZipArchive<R>, name: &str) -> bool {
    archive.file_names().any(|n| n == name)
}

fn read_entry<R: Read + Seek>(archive: &mut ZipArchive<R>, name: &str) -> SignResult<Vec<u8>> {
    let mut entry = archive.by_name(name).map_err(|e| match e {
        ZipError::FileNotFound => SignError::ManifestMissing,
        other => SignError::ArchiveInvalid {
            reason: format!("cannot open {name}: {other}"),
        },
    })?;

    let mut bytes = Vec::new();
    entry
        .read_to_end(&mut bytes)
        .map_err(|e| SignError::ArchiveInvalid {
            reason: format!("cannot read {name}: {e}"),
        })?;
    Ok(bytes)
}
