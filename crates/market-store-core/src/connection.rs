//! Connections: the root directory that owns every namespace.
//!
//! ```text
//! <root>/
//!   bar_data/                 # namespace
//!     IF2401@CFFEX@1m/        # versioned table
//!   tick_data/
//! ```
//!
//! A connection is opened once, handed to whoever needs namespaces, and torn
//! down explicitly with [`Connection::close`]. Namespace handles created from
//! it fail with `ConnectionClosed` afterwards.
use std::{
    fmt,
    path::PathBuf,
    str::FromStr,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use snafu::prelude::*;

use crate::{
    namespace::{self, Namespace, NamespaceError},
    storage::{self, StorageError, StorageLocation},
};

/// Errors returned while opening or using a connection.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ConnectionError {
    /// A size limit string could not be parsed.
    #[snafu(display("Invalid size limit {input:?}: expected e.g. \"5GB\", \"512MB\" or \"1024\""))]
    InvalidSizeLimit {
        /// The rejected input.
        input: String,
    },

    /// The namespace name is not usable.
    #[snafu(display("Invalid namespace: {source}"))]
    InvalidNamespace {
        /// Underlying name validation error.
        #[snafu(backtrace)]
        source: NamespaceError,
    },

    /// The connection was already closed.
    #[snafu(display("Connection is closed"))]
    Closed,

    /// Creating the root or a namespace directory failed.
    #[snafu(display("Connection storage error: {source}"))]
    Storage {
        /// Underlying storage error.
        #[snafu(backtrace)]
        source: StorageError,
    },
}

/// Result alias for connection operations.
pub type ConnectionResult<T> = Result<T, ConnectionError>;

/// Upper bound on the bytes a connection may hold on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SizeLimit {
    /// No limit.
    #[default]
    Unlimited,
    /// Limit in bytes.
    Bytes(u64),
}

impl SizeLimit {
    /// Limit in bytes, `None` when unlimited.
    pub fn bytes(&self) -> Option<u64> {
        match self {
            SizeLimit::Unlimited => None,
            SizeLimit::Bytes(n) => Some(*n),
        }
    }
}

impl FromStr for SizeLimit {
    type Err = ConnectionError;

    /// Parse `"5GB"`, `"512 MB"`, `"64k"` or a bare byte count.
    /// Units are binary (1KB = 1024 bytes); `"0"` and `"unlimited"` disable
    /// the limit.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.eq_ignore_ascii_case("unlimited") {
            return Ok(SizeLimit::Unlimited);
        }
        let split = trimmed
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(trimmed.len());
        let (digits, unit) = trimmed.split_at(split);
        let value: u64 = digits
            .parse()
            .ok()
            .context(InvalidSizeLimitSnafu { input: s })?;
        let shift = match unit.trim().to_ascii_uppercase().as_str() {
            "" | "B" => 0,
            "K" | "KB" | "KIB" => 10,
            "M" | "MB" | "MIB" => 20,
            "G" | "GB" | "GIB" => 30,
            "T" | "TB" | "TIB" => 40,
            _ => return InvalidSizeLimitSnafu { input: s }.fail(),
        };
        let bytes = value
            .checked_mul(1u64 << shift)
            .context(InvalidSizeLimitSnafu { input: s })?;
        Ok(if bytes == 0 {
            SizeLimit::Unlimited
        } else {
            SizeLimit::Bytes(bytes)
        })
    }
}

impl fmt::Display for SizeLimit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SizeLimit::Unlimited => write!(f, "unlimited"),
            SizeLimit::Bytes(n) => write!(f, "{n}B"),
        }
    }
}

/// State shared between a connection and the namespaces it hands out.
#[derive(Debug)]
pub(crate) struct Shared {
    pub(crate) root: StorageLocation,
    pub(crate) size_limit: SizeLimit,
    open: AtomicBool,
}

impl Shared {
    pub(crate) fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }
}

/// An open storage root.
#[derive(Debug)]
pub struct Connection {
    shared: Arc<Shared>,
}

impl Connection {
    /// Open (creating if needed) the storage root at `root`.
    pub async fn open(root: impl Into<PathBuf>, size_limit: SizeLimit) -> ConnectionResult<Self> {
        let root = StorageLocation::local(root);
        storage::create_root(&root).await.context(StorageSnafu)?;
        log::debug!(
            "opened connection at {} (size limit {size_limit})",
            root.root().display()
        );
        Ok(Self {
            shared: Arc::new(Shared {
                root,
                size_limit,
                open: AtomicBool::new(true),
            }),
        })
    }

    /// Root directory of this connection.
    pub fn root(&self) -> &StorageLocation {
        &self.shared.root
    }

    /// Configured size limit.
    pub fn size_limit(&self) -> SizeLimit {
        self.shared.size_limit
    }

    /// Get or create the namespace `name`.
    pub async fn namespace(&self, name: &str) -> ConnectionResult<Namespace> {
        ensure!(self.shared.is_open(), ClosedSnafu);
        namespace::validate_name(name).context(InvalidNamespaceSnafu)?;
        let location = self.shared.root.join(name);
        storage::create_root(&location).await.context(StorageSnafu)?;
        Ok(Namespace::new(
            name.to_string(),
            location,
            Arc::clone(&self.shared),
        ))
    }

    /// Names of existing namespaces, sorted.
    pub async fn list_namespaces(&self) -> ConnectionResult<Vec<String>> {
        ensure!(self.shared.is_open(), ClosedSnafu);
        let names = storage::list_child_dirs(&self.shared.root)
            .await
            .context(StorageSnafu)?;
        Ok(names.into_iter().filter(|n| !n.starts_with('.')).collect())
    }

    /// Close the connection. Namespaces obtained from it stop working.
    pub fn close(self) {
        self.shared.open.store(false, Ordering::Release);
        log::debug!("closed connection at {}", self.shared.root.root().display());
    }
}
