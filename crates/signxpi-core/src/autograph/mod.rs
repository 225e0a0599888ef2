//! Client for the Autograph signing service.
//!
//! Only the `/sign/data` endpoint is used: the signing payload is sent
//! base64-encoded and the detached signature comes back base64-encoded.

pub mod hawk;

use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE, USER_AGENT};
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use crate::config::AutographSettings;
use crate::error::{SignError, SignResult};
use crate::identity::ExtensionId;

pub use hawk::{HawkCredentials, HawkRequest};

/// User agent for signing requests.
const USER_AGENT_VALUE: &str = concat!("signxpi/", env!("CARGO_PKG_VERSION"));

const SIGN_DATA_PATH: &str = "/sign/data";
const JSON: &str = "application/json";

/// One element of the `/sign/data` request array.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SigningRequest {
    /// Base64 signing payload.
    pub input: String,
    pub keyid: String,
    pub options: SigningOptions,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SigningOptions {
    /// Canonical extension id.
    pub id: String,
}

/// One element of the `/sign/data` response array.
#[derive(Debug, Clone, Deserialize)]
pub struct SignatureResponse {
    pub signature: String,
    #[serde(rename = "ref", default)]
    pub reference: Option<String>,
}

/// Signing service client.
#[derive(Debug, Clone)]
pub struct AutographClient {
    client: reqwest::Client,
    sign_url: Url,
    key_id: String,
    credentials: HawkCredentials,
}

impl AutographClient {
    /// Create a client from connection settings.
    pub fn new(settings: &AutographSettings) -> SignResult<Self> {
        let mut default_headers = HeaderMap::new();
        default_headers.insert(USER_AGENT, HeaderValue::from_static(USER_AGENT_VALUE));

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .default_headers(default_headers)
            .build()
            .map_err(|e| SignError::SigningService {
                status: None,
                message: format!("failed to create HTTP client: {e}"),
            })?;

        let sign_url =
            settings
                .server_url
                .join(SIGN_DATA_PATH)
                .map_err(|e| SignError::SigningService {
                    status: None,
                    message: format!("invalid server URL {}: {e}", settings.server_url),
                })?;

        Ok(Self {
            client,
            sign_url,
            key_id: settings.key_id.clone(),
            credentials: HawkCredentials::new(&settings.hawk_id, &settings.hawk_secret),
        })
    }

    /// The endpoint requests are posted to.
    pub fn sign_url(&self) -> &Url {
        &self.sign_url
    }

    /// Build the request body element for a payload.
    pub fn signing_request(&self, payload: &[u8], id: &ExtensionId) -> SigningRequest {
        SigningRequest {
            input: STANDARD.encode(payload),
            keyid: self.key_id.clone(),
            options: SigningOptions {
                id: id.as_str().to_string(),
            },
        }
    }

    /// Sign `payload` for extension `id`, returning the decoded signature.
    ///
    /// Single attempt: any failure is returned to the caller.
    pub async fn sign_data(&self, payload: &[u8], id: &ExtensionId) -> SignResult<Vec<u8>> {
        let body = serde_json::to_vec(&[self.signing_request(payload, id)]).map_err(|e| {
            SignError::SigningService {
                status: None,
                message: format!("failed to encode signing request: {e}"),
            }
        })?;

        let authorization = self.credentials.header(&HawkRequest {
            method: "POST",
            url: &self.sign_url,
            payload: Some((JSON, body.as_slice())),
            ext: None,
        })?;

        debug!(url = %self.sign_url, extension_id = %id, key_id = %self.key_id, "requesting signature");

        let response = self
            .client
            .post(self.sign_url.clone())
            .header(CONTENT_TYPE, JSON)
            .header(AUTHORIZATION, authorization)
            .body(body)
            .send()
            .await
            .map_err(|e| SignError::SigningService {
                status: None,
                message: format!("request failed: {e}"),
            })?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(SignError::SigningService {
                status: Some(status.as_u16()),
                message: if message.is_empty() {
                    status.to_string()
                } else {
                    message
                },
            });
        }

        let signatures: Vec<SignatureResponse> =
            response.json().await.map_err(|e| SignError::SigningService {
                status: Some(status.as_u16()),
                message: format!("invalid response body: {e}"),
            })?;

        let first = signatures
            .into_iter()
            .next()
            .ok_or_else(|| SignError::SigningService {
                status: Some(status.as_u16()),
                message: "empty signature list".to_string(),
            })?;

        STANDARD
            .decode(first.signature.trim())
            .map_err(|e| SignError::SigningService {
                status: Some(status.as_u16()),
                message: format!("signature is not valid base64: {e}"),
            })
    }
}
