//! Hawk request authentication (header scheme, SHA-256 only).
//!
//! The MAC covers a newline-terminated normalized string:
//!
//! ```text
//! hawk.1.header
//! <ts>
//! <nonce>
//! <METHOD>
//! <path?query>
//! <host>
//! <port>
//! <payload hash or empty>
//! <ext or empty>
//! ```

use std::fmt;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use hmac::{Hmac, Mac};
use rand::distributions::Alphanumeric;
use rand::Rng;
use sha2::{Digest, Sha256};
use url::Url;

use crate::error::{SignError, SignResult};

type HmacSha256 = Hmac<Sha256>;

const NONCE_LEN: usize = 6;

/// Hawk id + shared secret.
#[derive(Clone)]
pub struct HawkCredentials {
    id: String,
    key: String,
}

impl HawkCredentials {
    pub fn new(id: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            key: key.into(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }
}

impl fmt::Debug for HawkCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HawkCredentials")
            .field("id", &self.id)
            .field("key", &"<redacted>")
            .finish()
    }
}

/// The parts of a request covered by the MAC.
#[derive(Debug, Clone, Copy)]
pub struct HawkRequest<'a> {
    pub method: &'a str,
    pub url: &'a Url,
    /// Content type and body, when the payload hash is sent.
    pub payload: Option<(&'a str, &'a [u8])>,
    pub ext: Option<&'a str>,
}

/// Base64 SHA-256 over `hawk.1.payload\n<content type>\n<payload>\n`.
///
/// Only the media type part of the content type is hashed.
pub fn payload_hash(content_type: &str, payload: &[u8]) -> String {
    let media_type = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();

    let mut hasher = Sha256::new();
    hasher.update(b"hawk.1.payload\n");
    hasher.update(media_type.as_bytes());
    hasher.update(b"\n");
    hasher.update(payload);
    hasher.update(b"\n");
    STANDARD.encode(hasher.finalize())
}

/// Random alphanumeric nonce.
pub fn generate_nonce() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(NONCE_LEN)
        .map(char::from)
        .collect()
}

impl HawkCredentials {
    /// `Authorization` header for a request sent now, with a fresh nonce.
    pub fn header(&self, request: &HawkRequest<'_>) -> SignResult<String> {
        self.header_at(request, chrono::Utc::now().timestamp(), &generate_nonce())
    }

    /// `Authorization` header for a fixed timestamp and nonce.
    pub fn header_at(&self, request: &HawkRequest<'_>, ts: i64, nonce: &str) -> SignResult<String> {
        let hash = request
            .payload
            .map(|(content_type, body)| payload_hash(content_type, body));
        let mac = self.mac(request, ts, nonce, hash.as_deref())?;

        let mut header = format!(r#"Hawk id="{}", ts="{ts}", nonce="{nonce}""#, self.id);
        if let Some(hash) = &hash {
            header.push_str(&format!(r#", hash="{hash}""#));
        }
        if let Some(ext) = request.ext {
            header.push_str(&format!(r#", ext="{}""#, escape_header_value(ext)));
        }
        header.push_str(&format!(r#", mac="{mac}""#));
        Ok(header)
    }

    fn mac(
        &self,
        request: &HawkRequest<'_>,
        ts: i64,
        nonce: &str,
        hash: Option<&str>,
    ) -> SignResult<String> {
        let normalized = normalized_string(request, ts, nonce, hash)?;
        let mut mac = HmacSha256::new_from_slice(self.key.as_bytes()).map_err(|e| {
            SignError::SigningService {
                status: None,
                message: format!("invalid Hawk key: {e}"),
            }
        })?;
        mac.update(normalized.as_bytes());
        Ok(STANDARD.encode(mac.finalize().into_bytes()))
    }
}

fn normalized_string(
    request: &HawkRequest<'_>,
    ts: i64,
    nonce: &str,
    hash: Option<&str>,
) -> SignResult<String> {
    let host = request
        .url
        .host_str()
        .ok_or_else(|| SignError::SigningService {
            status: None,
            message: format!("request URL has no host: {}", request.url),
        })?;
    let port = request
        .url
        .port_or_known_default()
        .ok_or_else(|| SignError::SigningService {
            status: None,
            message: format!("request URL has no port: {}", request.url),
        })?;

    let mut resource = request.url.path().to_string();
    if let Some(query) = request.url.query() {
        resource.push('?');
        resource.push_str(query);
    }

    Ok(format!(
        "hawk.1.header\n{ts}\n{nonce}\n{}\n{resource}\n{}\n{port}\n{}\n{}\n",
        request.method.to_ascii_uppercase(),
        host.to_ascii_lowercase(),
        hash.unwrap_or_default(),
        request
            .ext
            .map(|ext| ext.replace('\\', "\\\\").replace('\n', "\\n"))
            .unwrap_or_default(),
    ))
}

fn escape_header_value(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}
