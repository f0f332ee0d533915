//! drive_upload CLI - Upload a file to a path in Google Drive.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use drive_upload::client::DEFAULT_CHUNK_SIZE;
use drive_upload::{load_authenticator, DriveClient, Uploader, DRIVE_FILE_SCOPE};

const MIB: usize = 1024 * 1024;

/// Upload a local file to a folder path in Google Drive, creating missing folders.
#[derive(Parser)]
#[command(name = "drive_upload")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the file to upload.
    file_path: PathBuf,

    /// Destination path in Google Drive, e.g. backups/2024/db.sql.
    destination_path: String,

    /// Path to the OAuth client secrets or service account JSON file.
    #[arg(
        long = "credential_file",
        short = 'c',
        alias = "credential-file",
        env = "GOOGLE_CREDENTIALS_FILE",
        default_value = "credentials.json"
    )]
    credential_file: PathBuf,

    /// Where user tokens are cached between runs.
    #[arg(long, env = "DRIVE_TOKEN_FILE", default_value = "token.json")]
    token_file: PathBuf,

    /// OAuth scope to request.
    #[arg(long, default_value = DRIVE_FILE_SCOPE)]
    scope: String,

    /// Upload into this Shared Drive instead of My Drive.
    #[arg(long, env = "SHARED_DRIVE_ID")]
    drive_id: Option<String>,

    /// Chunk size for resumable uploads, in MiB (1-1024).
    #[arg(
        long,
        default_value_t = (DEFAULT_CHUNK_SIZE / MIB) as u64,
        value_parser = clap::value_parser!(u64).range(1..=1024)
    )]
    chunk_size_mib: u64,

    /// Verbose output (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup tracing
    let filter = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let auth = load_authenticator(&cli.credential_file, &cli.token_file, &cli.scope)
        .with_context(|| format!("Failed to load credentials from {:?}", cli.credential_file))?;

    let chunk_size = usize::try_from(cli.chunk_size_mib)
        .ok()
        .and_then(|mib| mib.checked_mul(MIB))
        .context("--chunk-size-mib is too large for this platform")?;
    let mut client = DriveClient::new(auth).with_chunk_size(chunk_size);
    if let Some(drive_id) = cli.drive_id {
        client = client.with_shared_drive(drive_id);
    }

    let mut uploader = Uploader::new(client);
    let file = uploader
        .upload(&cli.file_path, &cli.destination_path)
        .await
        .with_context(|| {
            format!(
                "Failed to upload {:?} to {}",
                cli.file_path, cli.destination_path
            )
        })?;

    println!("File uploaded with ID: {}", file.id);

    Ok(())
}
