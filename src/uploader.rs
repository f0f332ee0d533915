//! Upload orchestration: resolve the destination folder chain, then upload.

use std::path::Path;

use tracing::debug;

use crate::error::Result;
use crate::models::FileMetadata;
use crate::path::DestinationPath;
use crate::remote::RemoteDirectory;
use crate::resolver::PathResolver;

/// Uploads local files to slash-delimited Drive paths.
///
/// Owns its [`PathResolver`], so folders resolved for one upload are reused
/// by the next one made through the same `Uploader`.
pub struct Uploader<D> {
    drive: D,
    resolver: PathResolver,
}

impl<D: RemoteDirectory> Uploader<D> {
    pub fn new(drive: D) -> Self {
        Self::with_resolver(drive, PathResolver::new())
    }

    /// Use an existing resolver and its cache.
    pub fn with_resolver(drive: D, resolver: PathResolver) -> Self {
        Self { drive, resolver }
    }

    /// Upload `local_path` to `destination`, creating missing folders.
    ///
    /// Nothing is uploaded if resolving the folders fails.
    pub async fn upload<P: AsRef<Path>>(
        &mut self,
        local_path: P,
        destination: &str,
    ) -> Result<FileMetadata> {
        let destination = DestinationPath::parse(destination)?;
        let parent = self.resolver.resolve(&self.drive, &destination).await?;
        debug!(destination = %destination, parent = ?parent, "Resolved destination folder");

        self.drive
            .create_file(local_path.as_ref(), destination.file_name(), parent.as_deref())
            .await
    }

    pub fn drive(&self) -> &D {
        &self.drive
    }
}
