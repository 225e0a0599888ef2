//! `manifest.json` id lookup.
//!
//! The manifest is parsed as strict JSON; comments are not tolerated.

use serde_json::Value;

use crate::error::{SignError, SignResult};

use super::MANIFEST_JSON;

/// Read `applications.gecko.id`, falling back to a top-level `gecko.id`.
pub fn extension_id(bytes: &[u8]) -> SignResult<String> {
    let manifest: Value = serde_json::from_slice(bytes).map_err(|e| SignError::ManifestInvalid {
        manifest: MANIFEST_JSON.to_string(),
        reason: e.to_string(),
    })?;

    if !manifest.is_object() {
        return Err(SignError::ManifestInvalid {
            manifest: MANIFEST_JSON.to_string(),
            reason: "top-level value is not an object".to_string(),
        });
    }

    let id = manifest
        .pointer("/applications/gecko/id")
        .or_else(|| manifest.pointer("/gecko/id"))
        .and_then(Value::as_str)
        .filter(|id| !id.is_empty());

    match id {
        Some(id) => Ok(id.to_string()),
        None => Err(SignError::IdentityMissing {
            manifest: MANIFEST_JSON.to_string(),
        }),
    }
}
