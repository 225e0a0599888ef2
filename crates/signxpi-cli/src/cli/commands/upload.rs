use anyhow::Context;
use bytes::Bytes;
use signxpi_core::manifest;
use signxpi_core::source::key_filename;
use signxpi_core::{sha256_hex_bytes, BlobStore, ObjectStoreBlobStore, SignEvent, StoreSpec};

use crate::cli::args::UploadArgs;
use crate::exit_codes::{CONFIG_ERROR, SUCCESS};

pub async fn run(args: UploadArgs) -> anyhow::Result<i32> {
    let spec = match StoreSpec::parse(&args.store) {
        Ok(spec) => spec,
        Err(e) => {
            eprintln!("error: {e}");
            return Ok(CONFIG_ERROR);
        }
    };

    let contents = std::fs::read(&args.xpi)
        .with_context(|| format!("failed to read {}", args.xpi.display()))?;

    let key = match args.key {
        Some(key) => key,
        None => {
            let id = match manifest::extension_id(std::io::Cursor::new(contents.as_slice())) {
                Ok(id) => id,
                Err(e) => {
                    eprintln!("error: {e}");
                    return Ok(e.exit_code());
                }
            };
            let filename = args
                .xpi
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .context("XPI path has no file name")?;
            format!("{id}/{}", key_filename(&filename))
        }
    };

    let checksum = sha256_hex_bytes(&contents);
    let store = ObjectStoreBlobStore::new(spec);
    store
        .put(&args.bucket, &key, Bytes::from(contents))
        .await
        .with_context(|| format!("failed to upload to {}/{key}", args.bucket))?;

    tracing::info!(bucket = %args.bucket, key = %key, checksum = %checksum, "uploaded archive");

    let event = SignEvent::for_object(&args.bucket, &key, checksum);
    println!("{}", serde_json::to_string_pretty(&event)?);
    Ok(SUCCESS)
}
