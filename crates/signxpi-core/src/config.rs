//! Signer configuration.
//!
//! Built from environment variables or from the Lambda-style context block,
//! and validated all at once so that every offending field is reported.
//!
//! | Variable | Description |
//! |----------|-------------|
//! | `AUTOGRAPH_HAWK_ID` | Hawk id for the signing service (required) |
//! | `AUTOGRAPH_HAWK_SECRET` | Hawk secret for the signing service (required) |
//! | `AUTOGRAPH_SERVER_URL` | Signing service base URL (required) |
//! | `AUTOGRAPH_KEY_ID` | Signing key id (required) |
//! | `OUTPUT_BUCKET` | Bucket that receives signed archives (required) |
//! | `SIGNXPI_STORE` | Store spec: `s3`, `file:///path`, `memory://` (default: `s3`) |
//! | `SIGNXPI_CONCURRENCY` | Records processed in parallel (default: 4) |
//! | `SIGNXPI_FETCH_TIMEOUT` | Archive download timeout in seconds (default: 30) |
//! | `SIGNXPI_SIGN_TIMEOUT` | Signing request timeout in seconds (default: 30) |
//! | `SIGNXPI_PACKAGER` | External repackaging program |

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;

use serde::Deserialize;
use url::Url;

use crate::error::{FieldProblem, ValidationError};
use crate::store::StoreSpec;

pub const DEFAULT_CONCURRENCY: usize = 4;
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Connection settings for the signing service.
#[derive(Clone)]
pub struct AutographSettings {
    pub server_url: Url,
    pub hawk_id: String,
    pub hawk_secret: String,
    pub key_id: String,
    pub timeout_secs: u64,
}

impl fmt::Debug for AutographSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AutographSettings")
            .field("server_url", &self.server_url.as_str())
            .field("hawk_id", &self.hawk_id)
            .field("hawk_secret", &"<redacted>")
            .field("key_id", &self.key_id)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

/// Complete signer configuration.
#[derive(Debug, Clone)]
pub struct SignerConfig {
    pub autograph: AutographSettings,
    pub output_bucket: String,
    pub store: StoreSpec,
    pub concurrency: usize,
    pub fetch_timeout_secs: u64,
    pub packager: Option<PathBuf>,
}

impl SignerConfig {
    /// Load from the process environment.
    pub fn from_env() -> Result<Self, ValidationError> {
        Self::from_vars(std::env::vars())
    }

    /// Load from an explicit set of variables.
    pub fn from_vars<I, K, V>(vars: I) -> Result<Self, ValidationError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let vars: HashMap<String, String> = vars
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        let get = |name: &str| vars.get(name).map(String::as_str);

        let mut problems = Vec::new();

        let hawk_id = required(&mut problems, "AUTOGRAPH_HAWK_ID", get("AUTOGRAPH_HAWK_ID"));
        let hawk_secret = required(
            &mut problems,
            "AUTOGRAPH_HAWK_SECRET",
            get("AUTOGRAPH_HAWK_SECRET"),
        );
        let server_url = server_url(
            &mut problems,
            "AUTOGRAPH_SERVER_URL",
            get("AUTOGRAPH_SERVER_URL"),
        );
        let key_id = required(&mut problems, "AUTOGRAPH_KEY_ID", get("AUTOGRAPH_KEY_ID"));
        let output_bucket = required(&mut problems, "OUTPUT_BUCKET", get("OUTPUT_BUCKET"));

        let store = match get("SIGNXPI_STORE").filter(|s| !s.is_empty()) {
            None => Some(StoreSpec::default()),
            Some(spec) => match StoreSpec::parse(spec) {
                Ok(spec) => Some(spec),
                Err(e) => {
                    problems.push(FieldProblem::new("SIGNXPI_STORE", e.to_string()));
                    None
                }
            },
        };

        let concurrency = positive(
            &mut problems,
            "SIGNXPI_CONCURRENCY",
            get("SIGNXPI_CONCURRENCY"),
            DEFAULT_CONCURRENCY as u64,
        );
        let fetch_timeout_secs = positive(
            &mut problems,
            "SIGNXPI_FETCH_TIMEOUT",
            get("SIGNXPI_FETCH_TIMEOUT"),
            DEFAULT_TIMEOUT_SECS,
        );
        let sign_timeout_secs = positive(
            &mut problems,
            "SIGNXPI_SIGN_TIMEOUT",
            get("SIGNXPI_SIGN_TIMEOUT"),
            DEFAULT_TIMEOUT_SECS,
        );
        let packager = get("SIGNXPI_PACKAGER")
            .filter(|p| !p.is_empty())
            .map(PathBuf::from);

        ValidationError::check("configuration", problems)?;

        match (
            hawk_id,
            hawk_secret,
            server_url,
            key_id,
            output_bucket,
            store,
            concurrency,
            fetch_timeout_secs,
            sign_timeout_secs,
        ) {
            (
                Some(hawk_id),
                Some(hawk_secret),
                Some(server_url),
                Some(key_id),
                Some(output_bucket),
                Some(store),
                Some(concurrency),
                Some(fetch_timeout_secs),
                Some(sign_timeout_secs),
            ) => Ok(Self {
                autograph: AutographSettings {
                    server_url,
                    hawk_id,
                    hawk_secret,
                    key_id,
                    timeout_secs: sign_timeout_secs,
                },
                output_bucket,
                store,
                concurrency: concurrency as usize,
                fetch_timeout_secs,
                packager,
            }),
            _ => Err(ValidationError {
                what: "configuration",
                problems: vec![FieldProblem::new("*", "incomplete configuration")],
            }),
        }
    }

    /// Load from a Lambda-style context block:
    ///
    /// ```json
    /// {"autograph": {"hawkId": "..", "hawkSecret": "..", "serverUrl": "..", "keyId": ".."},
    ///  "outputBucket": ".."}
    /// ```
    ///
    /// Optional settings keep their defaults.
    pub fn from_context(context: &serde_json::Value) -> Result<Self, ValidationError> {
        let raw: RawContext =
            serde_json::from_value(context.clone()).map_err(|e| ValidationError {
                what: "context",
                problems: vec![FieldProblem::new("context", e.to_string())],
            })?;
        let autograph = raw.autograph.unwrap_or_default();

        let mut vars = Vec::new();
        let mut push = |name: &str, value: Option<String>| {
            if let Some(value) = value {
                vars.push((name.to_string(), value));
            }
        };
        push("AUTOGRAPH_HAWK_ID", autograph.hawk_id);
        push("AUTOGRAPH_HAWK_SECRET", autograph.hawk_secret);
        push("AUTOGRAPH_SERVER_URL", autograph.server_url);
        push("AUTOGRAPH_KEY_ID", autograph.key_id);
        push("OUTPUT_BUCKET", raw.output_bucket);

        Self::from_vars(vars).map_err(|mut e| {
            e.what = "context";
            for problem in &mut e.problems {
                problem.field = context_field_name(&problem.field).to_string();
            }
            e
        })
    }

    /// Set the store spec.
    pub fn with_store(mut self, store: StoreSpec) -> Self {
        self.store = store;
        self
    }

    /// Set the number of records processed in parallel.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Set the external packager program.
    pub fn with_packager(mut self, packager: impl Into<PathBuf>) -> Self {
        self.packager = Some(packager.into());
        self
    }

    /// Set the output bucket.
    pub fn with_output_bucket(mut self, bucket: impl Into<String>) -> Self {
        self.output_bucket = bucket.into();
        self
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawContext {
    #[serde(default)]
    autograph: Option<RawAutograph>,
    #[serde(default)]
    output_bucket: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawAutograph {
    #[serde(default)]
    hawk_id: Option<String>,
    #[serde(default)]
    hawk_secret: Option<String>,
    #[serde(default)]
    server_url: Option<String>,
    #[serde(default)]
    key_id: Option<String>,
}

fn context_field_name(var: &str) -> &str {
    match var {
        "AUTOGRAPH_HAWK_ID" => "autograph.hawkId",
        "AUTOGRAPH_HAWK_SECRET" => "autograph.hawkSecret",
        "AUTOGRAPH_SERVER_URL" => "autograph.serverUrl",
        "AUTOGRAPH_KEY_ID" => "autograph.keyId",
        "OUTPUT_BUCKET" => "outputBucket",
        other => other,
    }
}

fn required(problems: &mut Vec<FieldProblem>, name: &str, value: Option<&str>) -> Option<String> {
    match value.map(str::trim).filter(|v| !v.is_empty()) {
        Some(v) => Some(v.to_string()),
        None => {
            problems.push(FieldProblem::new(name, "required"));
            None
        }
    }
}

fn server_url(problems: &mut Vec<FieldProblem>, name: &str, value: Option<&str>) -> Option<Url> {
    let raw = required(problems, name, value)?;
    match Url::parse(&raw) {
        Ok(url) if matches!(url.scheme(), "http" | "https") => Some(url),
        Ok(url) => {
            problems.push(FieldProblem::new(
                name,
                format!("unsupported scheme: {}", url.scheme()),
            ));
            None
        }
        Err(e) => {
            problems.push(FieldProblem::new(name, format!("not a valid URL: {e}")));
            None
        }
    }
}

fn positive(
    problems: &mut Vec<FieldProblem>,
    name: &str,
    value: Option<&str>,
    default: u64,
) -> Option<u64> {
    match value.map(str::trim).filter(|v| !v.is_empty()) {
        None => Some(default),
        Some(v) => match v.parse::<u64>() {
            Ok(n) if n > 0 => Some(n),
            _ => {
                problems.push(FieldProblem::new(name, "must be a positive integer"));
                None
            }
        },
    }
}
