//! End-to-end pipeline tests: in-memory buckets, a mock Autograph and an
//! in-process packager.

use std::io::{Cursor, Write};
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bytes::Bytes;
use serde_json::json;
use signxpi_core::autograph::{HawkCredentials, HawkRequest};
use signxpi_core::{
    parse_invocation, sha256_hex_bytes, ArchivePackager, BlobStore, ObjectStoreBlobStore,
    RecordOutcome, RunStage, SignError, SignEvent, SignResult, Signer, SignerConfig, StoreSpec,
};
use url::Url;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Request, ResponseTemplate};
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

const HAWK_ID: &str = "alice";
const HAWK_SECRET: &str = "fs5wgcer9qj819kfptdlp8gm227ewxnzvsuj9ztycsx08hfhzu";
const INPUT: &str = "addon-sign-xpi-input";
const OUTPUT: &str = "addon-sign-xpi-output";
const ADDON_ID: &str = "hypothetical-addon@mozilla.org";

const INSTALL_RDF: &str = r#"<?xml version="1.0"?>
<RDF xmlns="http://www.w3.org/1999/02/22-rdf-syntax-ns#"
     xmlns:em="http://www.mozilla.org/2004/em-rdf#">
  <Description about="urn:mozilla:install-manifest">
    <em:id>hypothetical-addon@mozilla.org</em:id>
    <em:version>1.0</em:version>
    <em:targetApplication>
      <Description>
        <em:id>{ec8030f7-c20a-464f-9b0e-13a3a9e97384}</em:id>
        <em:minVersion>52.0</em:minVersion>
      </Description>
    </em:targetApplication>
  </Description>
</RDF>
"#;

fn build_xpi(entries: &[(&str, &str)]) -> Vec<u8> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    for (name, content) in entries {
        writer.start_file(*name, SimpleFileOptions::default()).unwrap();
        writer.write_all(content.as_bytes()).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

fn rdf_xpi() -> Vec<u8> {
    build_xpi(&[("install.rdf", INSTALL_RDF), ("bootstrap.js", "// empty")])
}

/// Payload is a digest of the archive; packaging appends the signature.
struct AppendingPackager;

#[async_trait]
impl ArchivePackager for AppendingPackager {
    async fn signing_payload(&self, archive: &Path) -> SignResult<Vec<u8>> {
        let bytes = tokio::fs::read(archive).await?;
        Ok(format!("Signature-Version: 1.0\nSHA256-Digest: {}\n", sha256_hex_bytes(&bytes)).into_bytes())
    }

    async fn package(
        &self,
        archive: &Path,
        _payload: &[u8],
        signature: &[u8],
        dest: &Path,
    ) -> SignResult<()> {
        let mut bytes = tokio::fs::read(archive).await?;
        bytes.extend_from_slice(b"|signed:");
        bytes.extend_from_slice(signature);
        tokio::fs::write(dest, bytes).await?;
        Ok(())
    }
}

struct Harness {
    autograph: MockServer,
    store: Arc<ObjectStoreBlobStore>,
    signer: Signer,
}

impl Harness {
    async fn start() -> Self {
        Self::with_store(ObjectStoreBlobStore::memory()).await
    }

    async fn with_store(store: ObjectStoreBlobStore) -> Self {
        let autograph = MockServer::start().await;
        let store = Arc::new(store);

        let config = SignerConfig::from_vars([
            ("AUTOGRAPH_SERVER_URL", autograph.uri()),
            ("AUTOGRAPH_HAWK_ID", HAWK_ID.to_string()),
            ("AUTOGRAPH_HAWK_SECRET", HAWK_SECRET.to_string()),
            ("AUTOGRAPH_KEY_ID", "extensions-ecdsa".to_string()),
            ("OUTPUT_BUCKET", OUTPUT.to_string()),
            ("SIGNXPI_STORE", "memory://".to_string()),
            ("SIGNXPI_CONCURRENCY", "2".to_string()),
        ])
        .unwrap();

        let signer = Signer::new(&config, store.clone(), Arc::new(AppendingPackager)).unwrap();
        Self {
            autograph,
            store,
            signer,
        }
    }

    async fn mount_signature(&self, signature: &[u8], expected_calls: u64) {
        Mock::given(method("POST"))
            .and(path("/sign/data"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!([{
                "signature": STANDARD.encode(signature),
                "ref": "7ca0ad7e",
            }])))
            .expect(expected_calls)
            .mount(&self.autograph)
            .await;
    }

    async fn upload(&self, key: &str, bytes: Vec<u8>) {
        self.store.put(INPUT, key, Bytes::from(bytes)).await.unwrap();
    }

    async fn signing_requests(&self) -> Vec<Request> {
        self.autograph.received_requests().await.unwrap_or_default()
    }
}

fn direct_event(key: &str, checksum: &str) -> String {
    serde_json::to_string(&SignEvent::for_object(INPUT, key, checksum)).unwrap()
}

fn storage_event(keys: &[&str]) -> String {
    let records: Vec<_> = keys
        .iter()
        .map(|key| json!({"s3": {"bucket": {"name": INPUT}, "object": {"key": key}}}))
        .collect();
    json!({ "Records": records }).to_string()
}

#[tokio::test]
async fn test_direct_event_signs_and_publishes() {
    let harness = Harness::start().await;
    harness.mount_signature(b"autograph-signature", 1).await;

    let xpi = rdf_xpi();
    let checksum = sha256_hex_bytes(&xpi);
    harness.upload("hypothetical-addon@mozilla.org/build.xpi", xpi.clone()).await;

    let records = parse_invocation(&direct_event(
        "hypothetical-addon@mozilla.org/build.xpi",
        &checksum,
    ))
    .unwrap();
    let report = harness.signer.run_batch(records).await;

    assert!(report.all_published(), "{report:?}");
    let artifact = report.published().next().unwrap();
    assert_eq!(artifact.bucket, OUTPUT);
    assert_eq!(artifact.key, "build.xpi");

    let published = harness.store.get(OUTPUT, "build.xpi").await.unwrap();
    let mut expected = xpi.clone();
    expected.extend_from_slice(b"|signed:autograph-signature");
    assert_eq!(published.as_ref(), expected.as_slice());

    let requests = harness.signing_requests().await;
    assert_eq!(requests.len(), 1);
    let body: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
    assert_eq!(body[0]["options"]["id"], ADDON_ID);
    assert_eq!(body[0]["keyid"], "extensions-ecdsa");

    let payload = STANDARD
        .decode(body[0]["input"].as_str().unwrap())
        .unwrap();
    assert_eq!(
        String::from_utf8(payload).unwrap(),
        format!("Signature-Version: 1.0\nSHA256-Digest: {checksum}\n")
    );
}

#[tokio::test]
async fn test_signing_request_carries_valid_hawk_header() {
    let harness = Harness::start().await;
    harness.mount_signature(b"sig", 1).await;

    let xpi = rdf_xpi();
    let checksum = sha256_hex_bytes(&xpi);
    harness.upload("anything.xpi", xpi).await;

    let records = parse_invocation(&direct_event("anything.xpi", &checksum)).unwrap();
    assert!(harness.signer.run_batch(records).await.all_published());

    let requests = harness.signing_requests().await;
    let received = &requests[0];
    let authorization = received.headers.get("authorization").unwrap().to_str().unwrap();
    let url = Url::parse(&format!("{}/sign/data", harness.autograph.uri())).unwrap();
    let request = HawkRequest {
        method: "POST",
        url: &url,
        payload: Some(("application/json", received.body.as_slice())),
        ext: None,
    };
    let ts: i64 = header_attribute(authorization, "ts").parse().unwrap();
    let nonce = header_attribute(authorization, "nonce");
    let expected = HawkCredentials::new(HAWK_ID, HAWK_SECRET)
        .header_at(&request, ts, nonce)
        .unwrap();
    assert_eq!(authorization, expected);
}

/// Value of `name="..."` in a Hawk header whose values carry no quotes.
fn header_attribute<'a>(header: &'a str, name: &str) -> &'a str {
    let start = header.find(&format!(r#"{name}=""#)).unwrap() + name.len() + 2;
    let len = header[start..].find('"').unwrap();
    &header[start..start + len]
}

#[tokio::test]
async fn test_storage_event_with_matching_key_is_published() {
    let harness = Harness::start().await;
    harness.mount_signature(b"sig", 1).await;
    harness.upload("hypothetical-addon@mozilla.org/build.xpi", rdf_xpi()).await;

    let records =
        parse_invocation(&storage_event(&["hypothetical-addon%40mozilla.org/build.xpi"])).unwrap();
    let report = harness.signer.run_batch(records).await;

    assert!(report.all_published(), "{report:?}");
    assert!(harness.store.get(OUTPUT, "build.xpi").await.is_ok());
}

#[tokio::test]
async fn test_checksum_mismatch_never_reaches_signing() {
    let harness = Harness::start().await;
    harness.mount_signature(b"sig", 0).await;

    harness.upload("hypothetical-addon@mozilla.org/build.xpi", rdf_xpi()).await;
    let wrong = sha256_hex_bytes(b"some other archive");

    let records = parse_invocation(&direct_event(
        "hypothetical-addon@mozilla.org/build.xpi",
        &wrong,
    ))
    .unwrap();
    let report = harness.signer.run_batch(records).await;

    let failure = report.failures().next().unwrap();
    assert_eq!(failure.stage, RunStage::Verifying);
    assert!(matches!(failure.error, SignError::ChecksumMismatch { .. }));
    assert_eq!(report.exit_code(), 4);

    assert!(harness.signing_requests().await.is_empty());
    let err = harness.store.get(OUTPUT, "build.xpi").await.unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn test_storage_key_for_other_extension_is_rejected() {
    let harness = Harness::start().await;
    harness.mount_signature(b"sig", 0).await;

    harness.upload("devtools@mozilla.org/build-1.xpi", rdf_xpi()).await;
    harness.upload("build-1.xpi", rdf_xpi()).await;

    let records = parse_invocation(&storage_event(&[
        "devtools%40mozilla.org/build-1.xpi",
        "build-1.xpi",
    ]))
    .unwrap();
    let report = harness.signer.run_batch(records).await;

    let failures: Vec<_> = report.failures().collect();
    assert_eq!(failures.len(), 2);
    assert!(failures.iter().all(|f| f.stage == RunStage::ValidatingIdentity));
    match &failures[0].error {
        SignError::IdentityMismatch { computed, asserted } => {
            assert_eq!(computed, ADDON_ID);
            assert_eq!(asserted, "devtools@mozilla.org");
        }
        other => panic!("expected IdentityMismatch, got {other:?}"),
    }
    assert!(matches!(
        failures[1].error,
        SignError::IdentityNotPresentInPath { .. }
    ));
    assert!(harness.signing_requests().await.is_empty());
}

#[tokio::test]
async fn test_failing_record_does_not_stop_the_batch() {
    let harness = Harness::start().await;
    harness.mount_signature(b"sig", 2).await;

    let first = rdf_xpi();
    let third = build_xpi(&[(
        "manifest.json",
        r#"{"manifest_version": 2, "applications": {"gecko": {"id": "third@example.com"}}}"#,
    )]);
    harness.upload("first.xpi", first.clone()).await;
    harness.upload("third.xpi", third.clone()).await;

    let events = json!([
        SignEvent::for_object(INPUT, "first.xpi", sha256_hex_bytes(&first)),
        SignEvent::for_object(INPUT, "missing.xpi", sha256_hex_bytes(b"")),
        SignEvent::for_object(INPUT, "third.xpi", sha256_hex_bytes(&third)),
    ]);
    let records = parse_invocation(&events.to_string()).unwrap();
    let report = harness.signer.run_batch(records).await;

    assert_eq!(report.outcomes.len(), 3);
    assert_eq!(report.outcomes[0].published().unwrap().key, "first.xpi");
    match &report.outcomes[1] {
        RecordOutcome::Failed(failure) => {
            assert_eq!(failure.stage, RunStage::Fetching);
            assert_eq!(failure.error.kind(), "SourceUnavailable");
        }
        other => panic!("expected failure, got {other:?}"),
    }
    assert_eq!(report.outcomes[2].published().unwrap().key, "third.xpi");
    assert!(!report.all_published());
    assert_eq!(report.exit_code(), 5);
}

#[tokio::test]
async fn test_url_source_uses_content_disposition_name() {
    let harness = Harness::start().await;
    harness.mount_signature(b"sig", 1).await;

    let origin = MockServer::start().await;
    let xpi = rdf_xpi();
    Mock::given(method("GET"))
        .and(path("/download"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header(
                    "content-disposition",
                    r#"attachment; filename="hypothetical-addon-1.0.xpi""#,
                )
                .set_body_bytes(xpi.clone()),
        )
        .mount(&origin)
        .await;

    let event = SignEvent::for_url(format!("{}/download?v=1", origin.uri()), sha256_hex_bytes(&xpi));
    let records = parse_invocation(&serde_json::to_string(&event).unwrap()).unwrap();
    let report = harness.signer.run_batch(records).await;

    assert!(report.all_published(), "{report:?}");
    assert_eq!(
        report.published().next().unwrap().key,
        "hypothetical-addon-1.0.xpi"
    );
}

#[tokio::test]
async fn test_signing_service_error_publishes_nothing() {
    let harness = Harness::start().await;
    Mock::given(method("POST"))
        .and(path("/sign/data"))
        .respond_with(ResponseTemplate::new(500).set_body_string("signer unavailable"))
        .expect(1)
        .mount(&harness.autograph)
        .await;

    let xpi = rdf_xpi();
    let checksum = sha256_hex_bytes(&xpi);
    harness.upload("build.xpi", xpi).await;

    let records = parse_invocation(&direct_event("build.xpi", &checksum)).unwrap();
    let report = harness.signer.run_batch(records).await;

    let failure = report.failures().next().unwrap();
    assert_eq!(failure.stage, RunStage::Signing);
    match &failure.error {
        SignError::SigningService { status, message } => {
            assert_eq!(*status, Some(500));
            assert_eq!(message, "signer unavailable");
        }
        other => panic!("expected SigningService, got {other:?}"),
    }
    assert!(harness.store.get(OUTPUT, "build.xpi").await.is_err());

    let output = serde_json::to_value(&report).unwrap();
    assert_eq!(output[0]["error"]["stage"], "signing");
    assert_eq!(output[0]["error"]["kind"], "SigningServiceError");
}

#[tokio::test]
async fn test_long_ids_are_canonicalized_before_signing() {
    let harness = Harness::start().await;
    harness.mount_signature(b"sig", 1).await;

    let long_id = format!("{}@example.com", "a".repeat(80));
    let manifest = json!({"applications": {"gecko": {"id": long_id}}}).to_string();
    let xpi = build_xpi(&[("manifest.json", manifest.as_str())]);
    let checksum = sha256_hex_bytes(&xpi);
    harness.upload("long.xpi", xpi).await;

    let records = parse_invocation(&direct_event("long.xpi", &checksum)).unwrap();
    assert!(harness.signer.run_batch(records).await.all_published());

    let requests = harness.signing_requests().await;
    let body: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
    assert_eq!(
        body[0]["options"]["id"],
        sha256_hex_bytes(long_id.as_bytes())
    );
}

#[tokio::test]
async fn test_archive_without_manifest_fails_extraction() {
    let harness = Harness::start().await;
    harness.mount_signature(b"sig", 0).await;

    let xpi = build_xpi(&[("README", "no manifest here")]);
    let checksum = sha256_hex_bytes(&xpi);
    harness.upload("bare.xpi", xpi).await;

    let records = parse_invocation(&direct_event("bare.xpi", &checksum)).unwrap();
    let report = harness.signer.run_batch(records).await;

    let failure = report.failures().next().unwrap();
    assert_eq!(failure.stage, RunStage::ExtractingIdentity);
    assert!(matches!(failure.error, SignError::ManifestMissing));
    assert_eq!(report.exit_code(), 1);
}

#[tokio::test]
async fn test_guid_extension_placed_on_disk_is_signed() {
    let guid = "{6fa3ad0c-1c5b-4c8a-9d3e-2a9f1b3c4d5e}";
    let root = tempfile::tempdir().unwrap();
    let harness = Harness::with_store(ObjectStoreBlobStore::new(StoreSpec::Local {
        root: root.path().to_path_buf(),
    }))
    .await;
    harness.mount_signature(b"sig", 1).await;

    let manifest = json!({"applications": {"gecko": {"id": guid}}}).to_string();
    let xpi = build_xpi(&[("manifest.json", &manifest)]);
    let uploaded = root.path().join(INPUT).join(guid).join("build.xpi");
    std::fs::create_dir_all(uploaded.parent().unwrap()).unwrap();
    std::fs::write(&uploaded, &xpi).unwrap();

    // Notification keys arrive percent-encoded.
    let encoded_key = "%7B6fa3ad0c-1c5b-4c8a-9d3e-2a9f1b3c4d5e%7D/build.xpi";
    let records = parse_invocation(&storage_event(&[encoded_key])).unwrap();
    let report = harness.signer.run_batch(records).await;
    assert!(report.all_published(), "{report:?}");

    let body: serde_json::Value =
        serde_json::from_slice(&harness.signing_requests().await[0].body).unwrap();
    assert_eq!(body[0]["options"]["id"], guid);

    let published = std::fs::read(root.path().join(OUTPUT).join("build.xpi")).unwrap();
    assert!(published.ends_with(b"|signed:sig"));
}
