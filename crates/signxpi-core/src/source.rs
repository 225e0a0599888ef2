//! Archive source descriptors and filename derivation.

use std::fmt;

use serde::Serialize;
use url::Url;

/// Where an archive is fetched from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum SourceDescriptor {
    /// Remote HTTP(S) location.
    Url { url: Url },
    /// Object-store location.
    ObjectStore { bucket: String, key: String },
}

impl SourceDescriptor {
    pub fn url(url: Url) -> Self {
        Self::Url { url }
    }

    pub fn object(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self::ObjectStore {
            bucket: bucket.into(),
            key: key.into(),
        }
    }

    /// Best-guess filename before any response headers are seen.
    ///
    /// Names that could escape a directory (`..`, separators) are dropped.
    pub fn filename_hint(&self) -> Option<String> {
        let name = match self {
            Self::Url { url } => url_filename(url),
            Self::ObjectStore { key, .. } => Some(key_filename(key).to_string()),
        };
        name.filter(|name| is_plain_filename(name))
    }

    /// Storage key, for object-store sources.
    pub fn storage_key(&self) -> Option<&str> {
        match self {
            Self::Url { .. } => None,
            Self::ObjectStore { key, .. } => Some(key),
        }
    }
}

impl fmt::Display for SourceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Url { url } => write!(f, "{url}"),
            Self::ObjectStore { bucket, key } => write!(f, "s3://{bucket}/{key}"),
        }
    }
}

/// Filename part of a storage key: everything after the last `/`.
pub fn key_filename(key: &str) -> &str {
    key.rsplit_once('/').map_or(key, |(_, name)| name)
}

/// Last non-empty path segment of a URL, or its host when the path is empty.
pub fn url_filename(url: &Url) -> Option<String> {
    url.path_segments()
        .and_then(|segments| segments.filter(|s| !s.is_empty()).last())
        .map(String::from)
        .or_else(|| url.host_str().map(String::from))
}

/// Filename advertised by a `Content-Disposition` header.
///
/// Only `attachment` dispositions with a double-quoted `filename` parameter
/// are honored. Anything else, including names that carry a path separator,
/// yields `None`.
pub fn content_disposition_filename(header: &str) -> Option<String> {
    let mut parameters = header.split(';');
    if parameters.next()?.trim() != "attachment" {
        return None;
    }

    for parameter in parameters {
        let (name, value) = parameter.trim().split_once('=')?;
        if name.trim() == "filename" {
            return unquote(value.trim()).filter(|f| is_plain_filename(f));
        }
    }

    None
}

fn unquote(value: &str) -> Option<String> {
    let inner = value.strip_prefix('"')?.strip_suffix('"')?;

    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => out.push(chars.next()?),
            '"' => return None,
            c => out.push(c),
        }
    }
    Some(out)
}

/// A single path component that stays inside the directory it is joined to.
pub fn is_plain_filename(name: &str) -> bool {
    !name.is_empty() && name != "." && name != ".." && !name.contains(['/', '\\'])
}
