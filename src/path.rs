//! Parsing of slash-delimited Drive destination paths.

use std::fmt;
use std::str::FromStr;

use crate::error::{DriveError, Result};

/// Separator between destination path segments.
pub const SEPARATOR: char = '/';

/// A destination inside Drive: the folder chain plus the final file name.
///
/// Folder segments are resolved top-down from the Drive root. Empty
/// segments (a leading `/`, or `//`) are skipped.
///
/// # Examples
///
/// ```
/// use drive_upload::DestinationPath;
///
/// let dest: DestinationPath = "backups/2024/db.sql".parse().unwrap();
/// assert_eq!(dest.folders(), ["backups", "2024"]);
/// assert_eq!(dest.file_name(), "db.sql");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DestinationPath {
    folders: Vec<String>,
    file_name: String,
}

impl DestinationPath {
    /// Parse a destination path.
    pub fn parse(path: &str) -> Result<Self> {
        let mut segments: Vec<&str> = path.split(SEPARATOR).collect();

        // split() always yields at least one element
        let file_name = segments.pop().unwrap_or_default();
        if file_name.is_empty() {
            return Err(DriveError::InvalidDestination(format!(
                "'{}' does not end with a file name",
                path
            )));
        }

        let folders = segments
            .into_iter()
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();

        Ok(Self {
            folders,
            file_name: file_name.to_string(),
        })
    }

    /// Folder segments, outermost first.
    pub fn folders(&self) -> &[String] {
        &self.folders
    }

    /// Name the uploaded file gets in Drive.
    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    /// True when the file goes straight into the root scope.
    pub fn is_root_level(&self) -> bool {
        self.folders.is_empty()
    }
}

impl FromStr for DestinationPath {
    type Err = DriveError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for DestinationPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for folder in &self.folders {
            write!(f, "{}{}", folder, SEPARATOR)?;
        }
        write!(f, "{}", self.file_name)
    }
}
