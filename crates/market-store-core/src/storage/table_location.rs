use std::path::Path;

use crate::storage::StorageLocation;

/// Table root location with table-scoped semantics.
///
/// This wraps [`StorageLocation`] and is used wherever the location must be
/// treated as the root of one versioned table (log layout, segment paths).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableLocation(StorageLocation);

impl From<TableLocation> for StorageLocation {
    fn from(t: TableLocation) -> Self {
        t.0
    }
}

impl From<StorageLocation> for TableLocation {
    fn from(location: StorageLocation) -> Self {
        TableLocation(location)
    }
}

impl AsRef<StorageLocation> for TableLocation {
    fn as_ref(&self) -> &StorageLocation {
        &self.0
    }
}

impl TableLocation {
    /// Creates a new `TableLocation` for a local filesystem path.
    pub fn local(root: impl Into<std::path::PathBuf>) -> Self {
        TableLocation(StorageLocation::local(root))
    }

    /// Return the underlying `StorageLocation`.
    pub fn storage(&self) -> &StorageLocation {
        &self.0
    }

    /// Absolute path of the table root directory.
    pub fn root(&self) -> &Path {
        self.0.root()
    }
}
