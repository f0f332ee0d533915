//! Folder path resolution with a per-resolver memoization tree.

use std::collections::hash_map::Entry;
use std::collections::HashMap;

use tracing::{debug, info};

use crate::error::Result;
use crate::path::DestinationPath;
use crate::remote::RemoteDirectory;

/// One resolved folder and the folders resolved beneath it.
#[derive(Debug)]
pub struct FolderNode {
    id: String,
    children: HashMap<String, FolderNode>,
}

impl FolderNode {
    fn new(id: String) -> Self {
        Self {
            id,
            children: HashMap::new(),
        }
    }

    fn count(&self) -> usize {
        1 + self.children.values().map(FolderNode::count).sum::<usize>()
    }
}

/// Turns destination paths into the ID of their containing folder,
/// creating missing folders on the way.
///
/// Each resolver owns its cache. Entries are never invalidated, so a folder
/// renamed or deleted remotely while the resolver is alive stays cached.
/// Resolution is sequential; sharing one resolver between concurrent
/// uploads needs external locking.
#[derive(Debug, Default)]
pub struct PathResolver {
    root: HashMap<String, FolderNode>,
}

impl PathResolver {
    /// Create a resolver with an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve every folder segment of `destination`, returning the ID of
    /// the deepest one, or `None` when the file belongs in the root scope.
    ///
    /// Segments already cached under the same parent cost no remote calls.
    /// A failure leaves folders created so far in place, both remotely and
    /// in the cache.
    pub async fn resolve<D>(
        &mut self,
        drive: &D,
        destination: &DestinationPath,
    ) -> Result<Option<String>>
    where
        D: RemoteDirectory + ?Sized,
    {
        let mut parent: Option<String> = None;
        let mut scope = &mut self.root;

        for name in destination.folders() {
            let node = match scope.entry(name.clone()) {
                Entry::Occupied(entry) => {
                    debug!(folder = %name, id = %entry.get().id, "Folder cache hit");
                    entry.into_mut()
                }
                Entry::Vacant(entry) => {
                    let id = find_or_create_folder(drive, name, parent.as_deref()).await?;
                    entry.insert(FolderNode::new(id))
                }
            };

            parent = Some(node.id.clone());
            scope = &mut node.children;
        }

        Ok(parent)
    }

    /// Look up an already-resolved folder chain without touching the remote.
    pub fn cached_id<S: AsRef<str>>(&self, folders: &[S]) -> Option<&str> {
        let (first, rest) = folders.split_first()?;
        let mut node = self.root.get(first.as_ref())?;
        for name in rest {
            node = node.children.get(name.as_ref())?;
        }
        Some(&node.id)
    }

    /// Number of folders in the cache tree.
    pub fn len(&self) -> usize {
        self.root.values().map(FolderNode::count).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_empty()
    }
}

/// Find `name` under `parent`, creating it when the lookup comes back empty.
pub async fn find_or_create_folder<D>(drive: &D, name: &str, parent: Option<&str>) -> Result<String>
where
    D: RemoteDirectory + ?Sized,
{
    if let Some(id) = drive.find_folder(name, parent).await? {
        debug!(folder = %name, id = %id, "Found existing folder");
        return Ok(id);
    }

    let id = drive.create_folder(name, parent).await?;
    info!(folder = %name, id = %id, parent = ?parent, "Created folder");
    Ok(id)
}
