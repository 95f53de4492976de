use std::io;

use snafu::{Backtrace, prelude::*};

/// Filesystem failures, classified by what callers branch on.
///
/// `NotFound` and `AlreadyExists` drive control flow (fresh tables, lost
/// commit races); everything else is `Io`.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum StorageError {
    /// Nothing exists at `path`.
    #[snafu(display("No such file or directory: {path}"))]
    NotFound {
        /// Absolute path that was accessed.
        path: String,
        /// OS error.
        source: io::Error,
        /// Captured backtrace.
        backtrace: Backtrace,
    },

    /// A create-new write found `path` already taken.
    #[snafu(display("Refusing to overwrite existing {path}"))]
    AlreadyExists {
        /// Absolute path that was accessed.
        path: String,
        /// OS error.
        source: io::Error,
        /// Captured backtrace.
        backtrace: Backtrace,
    },

    /// Any other filesystem failure.
    #[snafu(display("I/O error on {path}: {source}"))]
    Io {
        /// Absolute path that was accessed.
        path: String,
        /// OS error.
        source: io::Error,
        /// Captured backtrace.
        backtrace: Backtrace,
    },
}

impl StorageError {
    /// Sort an I/O error on `path` into its variant.
    pub(crate) fn from_io(source: io::Error, path: String) -> Self {
        let backtrace = Backtrace::capture();
        match source.kind() {
            io::ErrorKind::NotFound => StorageError::NotFound {
                path,
                source,
                backtrace,
            },
            io::ErrorKind::AlreadyExists => StorageError::AlreadyExists {
                path,
                source,
                backtrace,
            },
            _ => StorageError::Io {
                path,
                source,
                backtrace,
            },
        }
    }

    /// Whether the target path does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::NotFound { .. })
    }

    /// Whether a create-new write lost to an existing file.
    pub fn is_already_exists(&self) -> bool {
        matches!(self, StorageError::AlreadyExists { .. })
    }

    /// Path the failed operation touched.
    pub fn path(&self) -> &str {
        match self {
            StorageError::NotFound { path, .. }
            | StorageError::AlreadyExists { path, .. }
            | StorageError::Io { path, .. } => path,
        }
    }
}
