//! Invocation payloads.
//!
//! Three shapes are accepted:
//!
//! - a direct sign event: `{"source": {"url": ..} | {"bucket": .., "key": ..}, "checksum": ..}`
//! - a storage notification: `{"Records": [{"s3": {"bucket": {"name": ..}, "object": {"key": ..}}}]}`
//! - a JSON array of direct sign events
//!
//! Payloads deserialize leniently into the structs below, then
//! [`Invocation::into_records`] validates them and reports every offending
//! field at once.

use std::fmt;

use percent_encoding::percent_decode_str;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::digest::ExpectedChecksum;
use crate::error::{FieldProblem, ValidationError};
use crate::source::SourceDescriptor;

/// Location part of a direct sign event.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bucket: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
}

/// An explicit request to sign one archive.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignEvent {
    #[serde(default)]
    pub source: Option<SourceInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
}

impl SignEvent {
    /// Event for an archive already uploaded to `bucket`/`key`.
    pub fn for_object(
        bucket: impl Into<String>,
        key: impl Into<String>,
        checksum: impl Into<String>,
    ) -> Self {
        Self {
            source: Some(SourceInfo {
                url: None,
                bucket: Some(bucket.into()),
                key: Some(key.into()),
            }),
            checksum: Some(checksum.into()),
        }
    }

    /// Event for an archive served over HTTP(S).
    pub fn for_url(url: impl Into<String>, checksum: impl Into<String>) -> Self {
        Self {
            source: Some(SourceInfo {
                url: Some(url.into()),
                bucket: None,
                key: None,
            }),
            checksum: Some(checksum.into()),
        }
    }

    fn validate(&self, prefix: &str, problems: &mut Vec<FieldProblem>) -> Option<SignRecord> {
        let field = |name: &str| format!("{prefix}{name}");

        let source = match &self.source {
            None => {
                problems.push(FieldProblem::new(field("source"), "required"));
                None
            }
            Some(info) => info.validate(&field("source"), problems),
        };

        let checksum = match non_empty(&self.checksum) {
            None => {
                problems.push(FieldProblem::new(
                    field("checksum"),
                    "required for direct sign events",
                ));
                None
            }
            Some(raw) => match ExpectedChecksum::parse(raw) {
                Ok(checksum) => Some(checksum),
                Err(message) => {
                    problems.push(FieldProblem::new(field("checksum"), message));
                    None
                }
            },
        };

        Some(SignRecord {
            source: source?,
            checksum: Some(checksum?),
            origin: RecordOrigin::Direct,
        })
    }
}

impl SourceInfo {
    fn validate(&self, prefix: &str, problems: &mut Vec<FieldProblem>) -> Option<SourceDescriptor> {
        if let Some(raw) = non_empty(&self.url) {
            return match parse_source_url(raw) {
                Ok(url) => Some(SourceDescriptor::url(url)),
                Err(message) => {
                    problems.push(FieldProblem::new(format!("{prefix}.url"), message));
                    None
                }
            };
        }

        match (non_empty(&self.bucket), non_empty(&self.key)) {
            (Some(bucket), Some(key)) => Some(SourceDescriptor::object(bucket, key)),
            (bucket, key) => {
                let message = "either a URL or an S3 location (bucket + key) must be provided";
                problems.push(FieldProblem::new(format!("{prefix}.url"), message));
                if bucket.is_none() {
                    problems.push(FieldProblem::new(format!("{prefix}.bucket"), message));
                }
                if key.is_none() {
                    problems.push(FieldProblem::new(format!("{prefix}.key"), message));
                }
                None
            }
        }
    }
}

/// Storage notification payload.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct S3Event {
    #[serde(rename = "Records", default)]
    pub records: Vec<EventRecord>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EventRecord {
    #[serde(default)]
    pub s3: Option<S3Entity>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct S3Entity {
    #[serde(default)]
    pub bucket: Option<S3Bucket>,
    #[serde(default)]
    pub object: Option<S3Object>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct S3Bucket {
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct S3Object {
    /// Percent-encoded as delivered by the notification.
    #[serde(default)]
    pub key: Option<String>,
}

impl EventRecord {
    fn validate(&self, prefix: &str, problems: &mut Vec<FieldProblem>) -> Option<SignRecord> {
        let entity = self.s3.as_ref();

        let bucket = entity
            .and_then(|s3| s3.bucket.as_ref())
            .and_then(|b| non_empty(&b.name));
        if bucket.is_none() {
            problems.push(FieldProblem::new(format!("{prefix}.s3.bucket.name"), "required"));
        }

        let key = match entity
            .and_then(|s3| s3.object.as_ref())
            .and_then(|o| non_empty(&o.key))
        {
            None => {
                problems.push(FieldProblem::new(format!("{prefix}.s3.object.key"), "required"));
                None
            }
            Some(raw) => match decode_storage_key(raw) {
                Ok(key) => Some(key),
                Err(message) => {
                    problems.push(FieldProblem::new(format!("{prefix}.s3.object.key"), message));
                    None
                }
            },
        };

        Some(SignRecord {
            source: SourceDescriptor::object(bucket?, key?),
            checksum: None,
            origin: RecordOrigin::StorageEvent,
        })
    }
}

/// How a record entered the system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordOrigin {
    /// Explicit sign event: checksum mandatory, no storage-key check.
    Direct,
    /// Storage notification: checksum absent, storage key must name the extension.
    StorageEvent,
}

impl fmt::Display for RecordOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Direct => f.write_str("direct"),
            Self::StorageEvent => f.write_str("storage_event"),
        }
    }
}

/// One validated unit of work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignRecord {
    pub source: SourceDescriptor,
    pub checksum: Option<ExpectedChecksum>,
    pub origin: RecordOrigin,
}

impl SignRecord {
    /// Whether the storage key must start with the extension id.
    pub fn requires_path_check(&self) -> bool {
        self.origin == RecordOrigin::StorageEvent
    }
}

/// A classified invocation payload.
#[derive(Debug, Clone)]
pub enum Invocation {
    Direct(SignEvent),
    Batch(Vec<SignEvent>),
    Storage(S3Event),
}

impl Invocation {
    /// Parse JSON text.
    pub fn from_json(text: &str) -> Result<Self, ValidationError> {
        let value: serde_json::Value = serde_json::from_str(text).map_err(|e| ValidationError {
            what: "event",
            problems: vec![FieldProblem::new("event", format!("not valid JSON: {e}"))],
        })?;
        Self::from_value(value)
    }

    /// Classify a JSON value by shape.
    pub fn from_value(value: serde_json::Value) -> Result<Self, ValidationError> {
        let shape_error = |field: &str, e: serde_json::Error| ValidationError {
            what: "event",
            problems: vec![FieldProblem::new(field, e.to_string())],
        };

        let is_storage = value
            .as_object()
            .is_some_and(|map| map.contains_key("Records"));

        match value {
            serde_json::Value::Object(_) if is_storage => serde_json::from_value(value)
                .map(Self::Storage)
                .map_err(|e| shape_error("Records", e)),
            serde_json::Value::Object(_) => serde_json::from_value(value)
                .map(Self::Direct)
                .map_err(|e| shape_error("event", e)),
            serde_json::Value::Array(_) => serde_json::from_value(value)
                .map(Self::Batch)
                .map_err(|e| shape_error("event", e)),
            _ => Err(ValidationError {
                what: "event",
                problems: vec![FieldProblem::new(
                    "event",
                    "expected a sign event, an array of sign events or a storage notification",
                )],
            }),
        }
    }

    /// Validate and flatten into records, in payload order.
    pub fn into_records(self) -> Result<Vec<SignRecord>, ValidationError> {
        let mut problems = Vec::new();
        let (what, records): (&'static str, Vec<Option<SignRecord>>) = match &self {
            Self::Direct(event) => ("sign event", vec![event.validate("", &mut problems)]),
            Self::Batch(events) => {
                if events.is_empty() {
                    problems.push(FieldProblem::new("event", "at least one sign event is required"));
                }
                let records = events
                    .iter()
                    .enumerate()
                    .map(|(i, event)| event.validate(&format!("[{i}]."), &mut problems))
                    .collect();
                ("sign event batch", records)
            }
            Self::Storage(event) => {
                if event.records.is_empty() {
                    problems.push(FieldProblem::new("Records", "at least one record is required"));
                }
                let records = event
                    .records
                    .iter()
                    .enumerate()
                    .map(|(i, record)| record.validate(&format!("Records[{i}]"), &mut problems))
                    .collect();
                ("storage event", records)
            }
        };

        ValidationError::check(what, problems)?;
        records
            .into_iter()
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| ValidationError {
                what,
                problems: vec![FieldProblem::new("event", "incomplete record")],
            })
    }
}

/// Parse and validate an invocation payload.
pub fn parse_invocation(text: &str) -> Result<Vec<SignRecord>, ValidationError> {
    Invocation::from_json(text)?.into_records()
}

/// Undo the percent-encoding storage notifications apply to keys.
///
/// `+` is left untouched.
pub fn decode_storage_key(raw: &str) -> Result<String, String> {
    percent_decode_str(raw)
        .decode_utf8()
        .map(|key| key.into_owned())
        .map_err(|e| format!("key is not valid UTF-8 after decoding: {e}"))
}

fn parse_source_url(raw: &str) -> Result<Url, String> {
    let url = Url::parse(raw).map_err(|e| format!("not a valid URL: {e}"))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(format!("unsupported scheme: {}", url.scheme()));
    }
    if url.host_str().is_none() {
        return Err("URL has no host".to_string());
    }
    Ok(url)
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.trim().is_empty())
}
