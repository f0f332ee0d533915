//! drive_upload - Upload a local file to a path inside Google Drive.
//!
//! This library provides:
//! - OAuth2 user credentials with a persisted `token.json`, or service accounts
//! - Resolution of slash-delimited destination paths to Drive folder IDs,
//!   creating missing folders and memoizing what it has resolved
//! - Multipart and resumable uploads
//!
//! # Example
//!
//! ```no_run
//! use drive_upload::{load_authenticator, DriveClient, Uploader, DRIVE_FILE_SCOPE};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let auth = load_authenticator("credentials.json", "token.json", DRIVE_FILE_SCOPE)?;
//!     let mut uploader = Uploader::new(DriveClient::new(auth));
//!
//!     let file = uploader.upload("report.pdf", "reports/2024/report.pdf").await?;
//!     println!("{}", file.id);
//!
//!     Ok(())
//! }
//! ```

pub mod auth;
pub mod client;
pub mod error;
pub mod models;
pub mod path;
pub mod remote;
pub mod resolver;
pub mod uploader;
pub mod user_auth;

// Re-exports for convenience
pub use auth::{load_authenticator, TokenProvider, DRIVE_FILE_SCOPE};
pub use client::DriveClient;
pub use error::{DriveError, Result};
pub use models::FileMetadata;
pub use path::DestinationPath;
pub use remote::RemoteDirectory;
pub use resolver::PathResolver;
pub use uploader::Uploader;
