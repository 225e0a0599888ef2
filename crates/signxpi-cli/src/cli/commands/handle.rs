use std::io::Read;
use std::path::Path;

use anyhow::Context;
use signxpi_core::{parse_invocation, Signer, SignerConfig, StoreSpec};

use crate::cli::args::HandleArgs;
use crate::exit_codes::CONFIG_ERROR;

pub async fn run(args: HandleArgs) -> anyhow::Result<i32> {
    let config = match load_config(&args)? {
        Ok(config) => config,
        Err(message) => {
            eprintln!("error: {message}");
            return Ok(CONFIG_ERROR);
        }
    };

    let payload = read_event(args.event.as_deref())?;
    let records = match parse_invocation(&payload) {
        Ok(records) => records,
        Err(e) => {
            eprintln!("error: {e}");
            return Ok(CONFIG_ERROR);
        }
    };

    let signer = match Signer::from_config(&config) {
        Ok(signer) => signer,
        Err(e) => {
            eprintln!("error: {e}");
            return Ok(CONFIG_ERROR);
        }
    };

    tracing::info!(
        records = records.len(),
        output_bucket = signer.output_bucket(),
        "handling invocation"
    );
    let report = signer.run_batch(records).await;

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(report.exit_code())
}

/// Outer error: I/O. Inner error: invalid configuration, reported to the user.
fn load_config(args: &HandleArgs) -> anyhow::Result<Result<SignerConfig, String>> {
    let loaded = match &args.context {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read context {}", path.display()))?;
            let value: serde_json::Value = match serde_json::from_str(&text) {
                Ok(value) => value,
                Err(e) => return Ok(Err(format!("{} is not valid JSON: {e}", path.display()))),
            };
            SignerConfig::from_context(&value)
        }
        None => SignerConfig::from_env(),
    };

    let mut config = match loaded {
        Ok(config) => config,
        Err(e) => return Ok(Err(e.to_string())),
    };

    if let Some(bucket) = &args.output_bucket {
        config = config.with_output_bucket(bucket);
    }
    if let Some(spec) = &args.store {
        match StoreSpec::parse(spec) {
            Ok(spec) => config = config.with_store(spec),
            Err(e) => return Ok(Err(e.to_string())),
        }
    }
    if let Some(concurrency) = args.concurrency {
        config = config.with_concurrency(concurrency);
    }
    if let Some(packager) = &args.packager {
        config = config.with_packager(packager);
    }

    Ok(Ok(config))
}

fn read_event(path: Option<&Path>) -> anyhow::Result<String> {
    match path {
        Some(path) if path != Path::new("-") => std::fs::read_to_string(path)
            .with_context(|| format!("failed to read event {}", path.display())),
        _ => {
            let mut payload = String::new();
            std::io::stdin()
                .read_to_string(&mut payload)
                .context("failed to read event from stdin")?;
            Ok(payload)
        }
    }
}
