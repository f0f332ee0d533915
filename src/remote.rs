//! The remote operations the resolver and uploader depend on.

use std::path::Path;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::FileMetadata;

/// Folder lookup, folder creation and file creation against a Drive-like
/// store.
///
/// `parent` of `None` means the root scope. Implementations report
/// failures as-is; callers never retry.
#[async_trait]
pub trait RemoteDirectory: Send + Sync {
    /// Find a non-trashed folder called `name` under `parent`.
    ///
    /// When several folders match, whichever the listing returns first wins.
    async fn find_folder(&self, name: &str, parent: Option<&str>) -> Result<Option<String>>;

    /// Create a folder called `name` with `parent` as its only parent.
    async fn create_folder(&self, name: &str, parent: Option<&str>) -> Result<String>;

    /// Upload the contents of `local_path` as a new file called `name`.
    async fn create_file(
        &self,
        local_path: &Path,
        name: &str,
        parent: Option<&str>,
    ) -> Result<FileMetadata>;
}
