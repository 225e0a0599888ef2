use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "signxpi",
    version,
    about = "Verify, identify and sign XPI extension archives with Autograph"
)]
pub struct Cli {
    /// Emit logs as JSON lines on stderr
    #[arg(long = "json", global = true)]
    pub json_logs: bool,

    #[command(subcommand)]
    pub cmd: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Process an invocation payload (sign event, event batch or storage notification)
    Handle(HandleArgs),
    /// Upload a local XPI to an input bucket and print the sign event for it
    Upload(UploadArgs),
    /// Print the canonical extension id of a local XPI
    Identity(IdentityArgs),
    Version,
}

#[derive(Args, Debug)]
pub struct HandleArgs {
    /// Invocation payload file; stdin when omitted or `-`
    #[arg(long)]
    pub event: Option<PathBuf>,

    /// Lambda-style context JSON (`{"autograph": {..}, "outputBucket": ..}`)
    /// used instead of the AUTOGRAPH_* / OUTPUT_BUCKET variables
    #[arg(long)]
    pub context: Option<PathBuf>,

    /// Output bucket
    #[arg(long)]
    pub output_bucket: Option<String>,

    /// Store spec: `s3`, `s3://?region=..`, `file:///path` or `memory://`
    #[arg(long)]
    pub store: Option<String>,

    /// Records processed in parallel
    #[arg(long)]
    pub concurrency: Option<usize>,

    /// Repackaging program
    #[arg(long)]
    pub packager: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct UploadArgs {
    /// XPI file to upload
    pub xpi: PathBuf,

    /// Input bucket
    #[arg(long, env = "SIGNXPI_INPUT_BUCKET")]
    pub bucket: String,

    /// Storage key; defaults to `<extension-id>/<file name>`
    #[arg(long)]
    pub key: Option<String>,

    /// Store spec
    #[arg(long, env = "SIGNXPI_STORE", default_value = "s3")]
    pub store: String,
}

#[derive(Args, Debug)]
pub struct IdentityArgs {
    /// XPI file to inspect
    pub xpi: PathBuf,
}
