//! Google Drive API v3 client: folder lookup, folder creation and uploads.

use std::io::SeekFrom;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{Body, Client, Response, StatusCode};
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio_util::io::ReaderStream;
use tracing::{debug, info};

use crate::auth::TokenProvider;
use crate::error::{DriveError, Result};
use crate::models::{
    ApiErrorResponse, FileListResponse, FileMetadata, NewFile, FOLDER_MIME_TYPE,
};
use crate::remote::RemoteDirectory;

/// Base URL for Google Drive API v3.
const DRIVE_API_BASE: &str = "https://www.googleapis.com/drive/v3";

/// Upload URL for Google Drive API.
const UPLOAD_API_BASE: &str = "https://www.googleapis.com/upload/drive/v3";

/// Files up to this size go up in a single multipart request (5 MB).
const MULTIPART_THRESHOLD: u64 = 5 * 1024 * 1024;

/// Resumable chunks must be a multiple of this size.
pub const CHUNK_ALIGNMENT: usize = 256 * 1024;

/// Default resumable chunk size (8 MB).
pub const DEFAULT_CHUNK_SIZE: usize = 32 * CHUNK_ALIGNMENT;

/// Fields requested for uploaded files.
const FILE_FIELDS: &str = "id, name, size, mimeType, webViewLink";

/// Quote a value for use inside a Drive query string literal.
pub fn escape_query_value(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "\\'")
}

/// Build the files.list query matching a folder by name and parent.
pub fn folder_query(name: &str, parent: Option<&str>) -> String {
    let mut query = format!(
        "name = '{}' and mimeType = '{}' and trashed = false",
        escape_query_value(name),
        FOLDER_MIME_TYPE
    );
    if let Some(parent) = parent {
        query.push_str(&format!(" and '{}' in parents", escape_query_value(parent)));
    }
    query
}

/// Turn a non-success response into an `ApiError`, keeping Google's message when present.
async fn check_response(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let error_body = response.text().await.unwrap_or_default();
    if let Ok(api_error) = serde_json::from_str::<ApiErrorResponse>(&error_body) {
        return Err(DriveError::ApiError {
            status: api_error.error.code,
            message: api_error.error.message,
        });
    }
    Err(DriveError::ApiError {
        status: status.as_u16(),
        message: error_body,
    })
}

/// Client for Google Drive, either "My Drive" or a single Shared Drive.
pub struct DriveClient {
    auth: Arc<dyn TokenProvider>,
    http: Client,
    api_base: String,
    upload_base: String,
    drive_id: Option<String>,
    chunk_size: usize,
    multipart_threshold: u64,
}

impl DriveClient {
    /// Create a client for the user's own Drive.
    pub fn new(auth: Arc<dyn TokenProvider>) -> Self {
        Self {
            auth,
            http: Client::new(),
            api_base: DRIVE_API_BASE.to_string(),
            upload_base: UPLOAD_API_BASE.to_string(),
            drive_id: None,
            chunk_size: DEFAULT_CHUNK_SIZE,
            multipart_threshold: MULTIPART_THRESHOLD,
        }
    }

    /// Point the client at different API hosts.
    pub fn with_base_urls(mut self, api_base: impl Into<String>, upload_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self.upload_base = upload_base.into();
        self
    }

    /// Work inside a Shared Drive. Its root becomes the default parent.
    pub fn with_shared_drive(mut self, drive_id: impl Into<String>) -> Self {
        self.drive_id = Some(drive_id.into());
        self
    }

    /// Set the resumable chunk size, rounded down to a multiple of 256 KB.
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = (chunk_size / CHUNK_ALIGNMENT).max(1) * CHUNK_ALIGNMENT;
        self
    }

    /// Files larger than `threshold` bytes use a resumable session.
    pub fn with_multipart_threshold(mut self, threshold: u64) -> Self {
        self.multipart_threshold = threshold;
        self
    }

    /// Get the Shared Drive ID, if any.
    pub fn drive_id(&self) -> Option<&str> {
        self.drive_id.as_deref()
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Parent to use for a request: the explicit one, else the Shared Drive root.
    fn effective_parent<'a>(&'a self, parent: Option<&'a str>) -> Option<&'a str> {
        parent.or(self.drive_id.as_deref())
    }

    fn drive_params(&self) -> Vec<(&'static str, String)> {
        match &self.drive_id {
            Some(drive_id) => vec![
                ("driveId", drive_id.clone()),
                ("corpora", "drive".to_string()),
                ("includeItemsFromAllDrives", "true".to_string()),
                ("supportsAllDrives", "true".to_string()),
            ],
            None => Vec::new(),
        }
    }

    fn upload_params(&self) -> Vec<(&'static str, &'static str)> {
        if self.drive_id.is_some() {
            vec![("supportsAllDrives", "true")]
        } else {
            Vec::new()
        }
    }

    /// Search for folders named `name` under `parent`, first page only.
    pub async fn list_folders(&self, name: &str, parent: Option<&str>) -> Result<Vec<FileMetadata>> {
        let token = self.auth.access_token().await?;
        let query = folder_query(name, self.effective_parent(parent));
        debug!(%query, "Listing folders");

        let response = self
            .http
            .get(format!("{}/files", self.api_base))
            .bearer_auth(&token)
            .query(&[
                ("q", query.as_str()),
                ("spaces", "drive"),
                ("fields", "files(id, name)"),
                ("pageSize", "10"),
            ])
            .query(&self.drive_params())
            .send()
            .await?;

        let list_response: FileListResponse = check_response(response).await?.json().await?;
        Ok(list_response.files)
    }

    /// Upload a file using multipart upload (for smaller files).
    async fn upload_multipart(
        &self,
        local_path: &Path,
        metadata: &NewFile<'_>,
        mime_type: &str,
        file_size: u64,
    ) -> Result<FileMetadata> {
        let token = self.auth.access_token().await?;
        let file = File::open(local_path).await?;

        let metadata_part = Part::text(serde_json::to_string(metadata)?)
            .mime_str("application/json")?;

        let file_part = Part::stream_with_length(Body::wrap_stream(ReaderStream::new(file)), file_size)
            .file_name(metadata.name.to_string())
            .mime_str(mime_type)?;

        let form = Form::new()
            .part("metadata", metadata_part)
            .part("file", file_part);

        let response = self
            .http
            .post(format!("{}/files", self.upload_base))
            .bearer_auth(&token)
            .query(&[("uploadType", "multipart"), ("fields", FILE_FIELDS)])
            .query(&self.upload_params())
            .multipart(form)
            .send()
            .await?;

        let metadata: FileMetadata = check_response(response).await?.json().await?;
        Ok(metadata)
    }

    /// Upload a file in chunks through a resumable session (for larger files).
    async fn upload_resumable(
        &self,
        local_path: &Path,
        metadata: &NewFile<'_>,
        mime_type: &str,
        file_size: u64,
    ) -> Result<FileMetadata> {
        let token = self.auth.access_token().await?;

        // Step 1: Initiate resumable upload
        let init_response = self
            .http
            .post(format!("{}/files", self.upload_base))
            .bearer_auth(&token)
            .query(&[("uploadType", "resumable"), ("fields", FILE_FIELDS)])
            .query(&self.upload_params())
            .header("X-Upload-Content-Type", mime_type)
            .header("X-Upload-Content-Length", file_size.to_string())
            .json(metadata)
            .send()
            .await?;

        let init_response = check_response(init_response).await?;
        let upload_url = init_response
            .headers()
            .get("Location")
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| DriveError::ApiError {
                status: 500,
                message: "No upload URL in response".to_string(),
            })?
            .to_string();
        debug!(%upload_url, "Opened resumable upload session");

        // Step 2: Send the content chunk by chunk
        let mut file = File::open(local_path).await?;
        let mut offset: u64 = 0;

        loop {
            let remaining = file_size - offset;
            let len = remaining.min(self.chunk_size as u64);
            let mut chunk = Vec::with_capacity(len as usize);
            file.seek(SeekFrom::Start(offset)).await?;
            (&mut file).take(len).read_to_end(&mut chunk).await?;

            let end = offset + chunk.len() as u64;
            let content_range = if chunk.is_empty() {
                format!("bytes */{}", file_size)
            } else {
                format!("bytes {}-{}/{}", offset, end - 1, file_size)
            };
            debug!(%content_range, "Uploading chunk");

            let response = self
                .http
                .put(&upload_url)
                .header("Content-Range", content_range)
                .body(chunk)
                .send()
                .await?;

            if response.status() == StatusCode::PERMANENT_REDIRECT {
                // 308 Resume Incomplete: the Range header says what was persisted
                let acknowledged = response
                    .headers()
                    .get("Range")
                    .and_then(|v| v.to_str().ok())
                    .and_then(parse_range_end)
                    .map(|last| last + 1)
                    .unwrap_or(0);
                // Every 308 must move the session forward, or the loop never ends.
                if acknowledged <= offset || acknowledged > file_size {
                    return Err(DriveError::ApiError {
                        status: 308,
                        message: format!(
                            "Upload session stalled: server acknowledged {} of {} bytes after offset {}",
                            acknowledged, file_size, offset
                        ),
                    });
                }
                offset = acknowledged;
                continue;
            }

            let metadata: FileMetadata = check_response(response).await?.json().await?;
            return Ok(metadata);
        }
    }
}

/// Last byte index from a `Range: bytes=0-N` header.
fn parse_range_end(range: &str) -> Option<u64> {
    range
        .strip_prefix("bytes=")?
        .split('-')
        .nth(1)?
        .trim()
        .parse()
        .ok()
}

#[async_trait]
impl RemoteDirectory for DriveClient {
    async fn find_folder(&self, name: &str, parent: Option<&str>) -> Result<Option<String>> {
        let folders = self.list_folders(name, parent).await?;
        Ok(folders.into_iter().next().map(|f| f.id))
    }

    async fn create_folder(&self, name: &str, parent: Option<&str>) -> Result<String> {
        let token = self.auth.access_token().await?;
        let body = NewFile {
            name,
            mime_type: Some(FOLDER_MIME_TYPE),
            parents: self.effective_parent(parent).into_iter().collect(),
        };

        let response = self
            .http
            .post(format!("{}/files", self.api_base))
            .bearer_auth(&token)
            .query(&[("fields", "id")])
            .query(&self.upload_params())
            .json(&body)
            .send()
            .await?;

        let folder: FileMetadata = check_response(response).await?.json().await?;
        Ok(folder.id)
    }

    async fn create_file(
        &self,
        local_path: &Path,
        name: &str,
        parent: Option<&str>,
    ) -> Result<FileMetadata> {
        let file_size = match tokio::fs::metadata(local_path).await {
            Ok(meta) if meta.is_file() => meta.len(),
            Ok(_) => return Err(DriveError::FileNotFound(local_path.display().to_string())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(DriveError::FileNotFound(local_path.display().to_string()))
            }
            Err(e) => return Err(e.into()),
        };
        let mime_type = mime_guess::from_path(local_path)
            .first_or_octet_stream()
            .to_string();

        let metadata = NewFile {
            name,
            mime_type: None,
            parents: self.effective_parent(parent).into_iter().collect(),
        };

        info!(
            file = %local_path.display(),
            dest_name = %name,
            size = file_size,
            mime = %mime_type,
            "Uploading file"
        );

        let uploaded = if file_size > self.multipart_threshold {
            self.upload_resumable(local_path, &metadata, &mime_type, file_size)
                .await?
        } else {
            self.upload_multipart(local_path, &metadata, &mime_type, file_size)
                .await?
        };

        info!(id = %uploaded.id, "Upload complete");
        Ok(uploaded)
    }
}
