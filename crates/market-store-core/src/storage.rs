//! Filesystem layout and path utilities.
//!
//! This module centralizes all filesystem- and path-related logic for
//! `market-store-core`. It is responsible for:
//!
//! - Resolving relative paths (commit files, `CURRENT`, data segments)
//!   against a storage root.
//! - Small helpers for atomic file operations used by the commit protocol
//!   (write-then-rename, create-new).
//! - Directory-level helpers used by namespaces: listing child tables,
//!   measuring on-disk size, and removing a table tree.
//!
//! Only the local filesystem is supported. Every helper takes a
//! [`StorageLocation`] so higher layers never concatenate paths by hand.

mod error;
mod table_location;

pub use error::StorageError;
use error::IoSnafu;
pub use table_location::TableLocation;

use snafu::prelude::*;
use std::{
    io,
    path::{Path, PathBuf},
};
use tokio::{
    fs::{self, OpenOptions},
    io::AsyncWriteExt,
};

/// General result type used by storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Root location of a storage area (connection root, namespace or table).
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StorageLocation {
    /// A directory on the local filesystem.
    Local(PathBuf),
}

impl StorageLocation {
    /// Creates a new `StorageLocation` for a local filesystem path.
    pub fn local(root: impl Into<PathBuf>) -> Self {
        StorageLocation::Local(root.into())
    }

    /// Location of a child directory below this one.
    pub fn join(&self, child: impl AsRef<Path>) -> Self {
        match self {
            StorageLocation::Local(root) => StorageLocation::Local(root.join(child)),
        }
    }

    /// Absolute path of the location root.
    pub fn root(&self) -> &Path {
        match self {
            StorageLocation::Local(root) => root,
        }
    }
}

fn join_local(location: &StorageLocation, rel: &Path) -> PathBuf {
    match location {
        StorageLocation::Local(root) => root.join(rel),
    }
}

fn classify(e: io::Error, path: &Path) -> StorageError {
    StorageError::from_io(e, path.display().to_string())
}

async fn create_parent_dir(abs: &Path) -> StorageResult<()> {
    if let Some(parent) = abs.parent() {
        fs::create_dir_all(parent)
            .await
            .context(IoSnafu {
                path: parent.display().to_string(),
            })?;
    }
    Ok(())
}

/// Guard that removes a temporary file on drop unless disarmed.
struct TempFileGuard {
    path: PathBuf,
    armed: bool,
}

impl TempFileGuard {
    fn new(path: PathBuf) -> Self {
        Self { path, armed: true }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for TempFileGuard {
    fn drop(&mut self) {
        if self.armed {
            let _ = std::fs::remove_file(&self.path);
        }
    }
}

/// Create the location root directory (and parents) if it does not exist.
pub async fn create_root(location: &StorageLocation) -> StorageResult<()> {
    let root = location.root();
    fs::create_dir_all(root)
        .await
        .map_err(|e| classify(e, root))
}

/// Write `contents` to `rel_path` inside `location` using an atomic write.
///
/// The payload goes to a temporary sibling file, is synced, and is then
/// renamed over the target, so readers observe either the old or the new
/// contents and never a torn file.
pub async fn write_atomic(
    location: &StorageLocation,
    rel_path: &Path,
    contents: &[u8],
) -> StorageResult<()> {
    let abs = join_local(location, rel_path);
    create_parent_dir(&abs).await?;

    let tmp_path = abs.with_extension("tmp");
    let mut guard = TempFileGuard::new(tmp_path.clone());

    {
        let mut file = fs::File::create(&tmp_path)
            .await
            .map_err(|e| classify(e, &tmp_path))?;
        file.write_all(contents)
            .await
            .map_err(|e| classify(e, &tmp_path))?;
        file.sync_all()
            .await
            .map_err(|e| classify(e, &tmp_path))?;
    }

    fs::rename(&tmp_path, &abs)
        .await
        .map_err(|e| classify(e, &abs))?;

    guard.disarm();
    Ok(())
}

/// Create a *new* file at `rel_path` and write `contents`, failing with
/// [`StorageError::AlreadyExists`] if the file already exists.
///
/// Used for commit files and data segments, which are immutable once written.
pub async fn write_new(
    location: &StorageLocation,
    rel_path: &Path,
    contents: &[u8],
) -> StorageResult<()> {
    let abs = join_local(location, rel_path);
    create_parent_dir(&abs).await?;

    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&abs)
        .await
        .map_err(|e| classify(e, &abs))?;

    file.write_all(contents)
        .await
        .map_err(|e| classify(e, &abs))?;
    file.sync_all().await.map_err(|e| classify(e, &abs))?;

    Ok(())
}

/// Read the file at `rel_path` within `location` as a `String`.
pub async fn read_to_string(location: &StorageLocation, rel_path: &Path) -> StorageResult<String> {
    let abs = join_local(location, rel_path);
    fs::read_to_string(&abs)
        .await
        .map_err(|e| classify(e, &abs))
}

/// Read the full contents of the file at `rel_path` within `location`.
pub async fn read_all_bytes(location: &StorageLocation, rel_path: &Path) -> StorageResult<Vec<u8>> {
    let abs = join_local(location, rel_path);
    fs::read(&abs).await.map_err(|e| classify(e, &abs))
}

/// Remove a single file. Returns `false` if it was already gone.
pub async fn remove_file(location: &StorageLocation, rel_path: &Path) -> StorageResult<bool> {
    let abs = join_local(location, rel_path);
    match fs::remove_file(&abs).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(classify(e, &abs)),
    }
}

/// Rename the child directory `from` to `to`, both relative to `location`.
pub async fn rename_dir(location: &StorageLocation, from: &Path, to: &Path) -> StorageResult<()> {
    let abs_from = join_local(location, from);
    let abs_to = join_local(location, to);
    fs::rename(&abs_from, &abs_to)
        .await
        .map_err(|e| classify(e, &abs_from))
}

/// Recursively remove the directory at `rel_path`. Missing directories are
/// not an error.
pub async fn remove_dir_all(location: &StorageLocation, rel_path: &Path) -> StorageResult<()> {
    let abs = join_local(location, rel_path);
    match fs::remove_dir_all(&abs).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(classify(e, &abs)),
    }
}

/// Names of the immediate child directories of `location`, sorted.
///
/// A missing root yields an empty list.
pub async fn list_child_dirs(location: &StorageLocation) -> StorageResult<Vec<String>> {
    let root = location.root();
    let mut entries = match fs::read_dir(root).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(classify(e, root)),
    };

    let mut names = Vec::new();
    while let Some(entry) = entries.next_entry().await.map_err(|e| classify(e, root))? {
        let file_type = entry
            .file_type()
            .await
            .map_err(|e| classify(e, &entry.path()))?;
        if !file_type.is_dir() {
            continue;
        }
        if let Some(name) = entry.file_name().to_str() {
            names.push(name.to_string());
        }
    }
    names.sort();
    Ok(names)
}

/// Total size in bytes of all regular files below `location`.
pub async fn tree_size(location: &StorageLocation) -> StorageResult<u64> {
    let mut total = 0u64;
    let mut pending = vec![location.root().to_path_buf()];

    while let Some(dir) = pending.pop() {
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
            Err(e) => return Err(classify(e, &dir)),
        };
        while let Some(entry) = entries.next_entry().await.map_err(|e| classify(e, &dir))? {
            let path = entry.path();
            // Entries can vanish under a concurrent delete or prune.
            let meta = match entry.metadata().await {
                Ok(meta) => meta,
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => return Err(classify(e, &path)),
            };
            if meta.is_dir() {
                pending.push(path);
            } else if meta.is_file() {
                total = total.saturating_add(meta.len());
            }
        }
    }

    Ok(total)
}
