//! Namespaces: named groups of versioned tables under one connection.
//!
//! A namespace is a directory whose children are table directories, one per
//! key. Deleted tables are first renamed to a hidden tombstone so a listing
//! never observes a half-removed table.
use std::path::Path;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use arrow::array::RecordBatch;
use snafu::prelude::*;

use crate::{
    connection::Shared,
    storage::{self, StorageError, StorageLocation, TableLocation},
    table::{TableDescription, TableError, TimeRange, UpsertOutcome, VersionedTable},
    transaction_log::UserMetadata,
};

/// Errors returned by namespace operations.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum NamespaceError {
    /// The table or namespace name cannot be used as a directory name.
    #[snafu(display("Invalid name {name:?}: {reason}"))]
    InvalidName {
        /// The rejected name.
        name: String,
        /// Why it was rejected.
        reason: &'static str,
    },

    /// The operation requires an existing table.
    #[snafu(display("Table {name} not found in namespace {namespace}"))]
    TableNotFound {
        /// Namespace searched.
        namespace: String,
        /// Missing table name.
        name: String,
    },

    /// Writing would push the connection past its size limit.
    #[snafu(display(
        "Size limit exceeded: {used} bytes on disk + {incoming} incoming > limit {limit}"
    ))]
    SizeLimitExceeded {
        /// Configured limit in bytes.
        limit: u64,
        /// Bytes currently used below the connection root.
        used: u64,
        /// In-memory size of the rejected batch.
        incoming: u64,
    },

    /// The owning connection was closed.
    #[snafu(display("Connection is closed"))]
    ConnectionClosed,

    /// Error from the table layer.
    #[snafu(display("Table {name}: {source}"))]
    Table {
        /// Table the error occurred on.
        name: String,
        /// Underlying table error.
        #[snafu(source, backtrace)]
        source: TableError,
    },

    /// Storage error on the namespace directory itself.
    #[snafu(display("Namespace storage error: {source}"))]
    Storage {
        /// Underlying storage error.
        #[snafu(backtrace)]
        source: StorageError,
    },
}

/// Result alias for namespace operations.
pub type NamespaceResult<T> = Result<T, NamespaceError>;

/// Check that `name` is usable as a single, visible directory name.
pub(crate) fn validate_name(name: &str) -> NamespaceResult<()> {
    let reason = if name.is_empty() {
        Some("empty")
    } else if name == "." || name == ".." {
        Some("reserved")
    } else if name.starts_with('.') {
        Some("leading dot is reserved for tombstones")
    } else if name.contains(['/', '\\']) {
        Some("contains a path separator")
    } else if name.chars().any(char::is_control) {
        Some("contains a control character")
    } else {
        None
    };
    match reason {
        Some(reason) => InvalidNameSnafu { name, reason }.fail(),
        None => Ok(()),
    }
}

/// Handle on one namespace directory.
#[derive(Debug, Clone)]
pub struct Namespace {
    name: String,
    location: StorageLocation,
    shared: Arc<Shared>,
}

impl Namespace {
    pub(crate) fn new(name: String, location: StorageLocation, shared: Arc<Shared>) -> Self {
        Self {
            name,
            location,
            shared,
        }
    }

    /// Namespace name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Namespace directory.
    pub fn location(&self) -> &StorageLocation {
        &self.location
    }

    fn table(&self, key: &str) -> NamespaceResult<VersionedTable> {
        ensure!(self.shared.is_open(), ConnectionClosedSnafu);
        validate_name(key)?;
        Ok(VersionedTable::new(TableLocation::from(
            self.location.join(key),
        )))
    }

    /// Whether `key` names a table with at least one commit.
    pub async fn exists(&self, key: &str) -> NamespaceResult<bool> {
        let table = self.table(key)?;
        let version = table.current_version().await.context(TableSnafu { name: key })?;
        Ok(version > 0)
    }

    /// Merge `batch` into the table at `key`, creating it on first write.
    pub async fn upsert(
        &self,
        key: &str,
        batch: &RecordBatch,
        time_column: &str,
        prune_previous_versions: bool,
    ) -> NamespaceResult<UpsertOutcome> {
        let table = self.table(key)?;
        self.check_size(batch).await?;
        table
            .upsert(batch, time_column, prune_previous_versions)
            .await
            .context(TableSnafu { name: key })
    }

    async fn check_size(&self, batch: &RecordBatch) -> NamespaceResult<()> {
        let Some(limit) = self.shared.size_limit.bytes() else {
            return Ok(());
        };
        let used = storage::tree_size(&self.shared.root)
            .await
            .context(StorageSnafu)?;
        let incoming = batch.get_array_memory_size() as u64;
        ensure!(
            used.saturating_add(incoming) <= limit,
            SizeLimitExceededSnafu {
                limit,
                used,
                incoming,
            }
        );
        Ok(())
    }

    /// Read rows of `key` inside `range` (all rows if `None`).
    ///
    /// Returns `Ok(None)` for a missing table.
    pub async fn read(
        &self,
        key: &str,
        range: Option<TimeRange>,
    ) -> NamespaceResult<Option<RecordBatch>> {
        let table = self.table(key)?;
        table.read(range).await.context(TableSnafu { name: key })
    }

    /// Read rows of `key` as of an older `version`.
    ///
    /// Returns `Ok(None)` for a missing table.
    pub async fn read_as_of(
        &self,
        key: &str,
        version: u64,
        range: Option<TimeRange>,
    ) -> NamespaceResult<Option<RecordBatch>> {
        if !self.exists(key).await? {
            return Ok(None);
        }
        let table = self.table(key)?;
        table
            .read_as_of(version, range)
            .await
            .map(Some)
            .context(TableSnafu { name: key })
    }

    /// Describe the latest version of `key`; `None` for a missing table.
    pub async fn describe(&self, key: &str) -> NamespaceResult<Option<TableDescription>> {
        let table = self.table(key)?;
        table.describe().await.context(TableSnafu { name: key })
    }

    /// Replace the metadata map of an existing table.
    pub async fn write_metadata(&self, key: &str, metadata: UserMetadata) -> NamespaceResult<u64> {
        ensure!(
            self.exists(key).await?,
            TableNotFoundSnafu {
                namespace: self.name.as_str(),
                name: key,
            }
        );
        let table = self.table(key)?;
        table
            .write_user_metadata(metadata)
            .await
            .context(TableSnafu { name: key })
    }

    /// Metadata map of `key`.
    ///
    /// `None` when the table does not exist or no metadata was ever written.
    pub async fn read_metadata(&self, key: &str) -> NamespaceResult<Option<UserMetadata>> {
        let table = self.table(key)?;
        let metadata = table.user_metadata().await.context(TableSnafu { name: key })?;
        Ok(metadata.filter(|m| !m.is_empty()))
    }

    /// Remove the table at `key` with all versions and metadata.
    ///
    /// Returns whether a committed table was removed.
    pub async fn delete(&self, key: &str) -> NamespaceResult<bool> {
        let table = self.table(key)?;
        let existed = table
            .current_version()
            .await
            .context(TableSnafu { name: key })?
            > 0;

        let stamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or_default();
        let tombstone = format!(".{key}.deleted-{stamp}");

        match storage::rename_dir(&self.location, Path::new(key), Path::new(&tombstone)).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => return Ok(false),
            Err(source) => return Err(NamespaceError::Storage { source }),
        }
        if let Err(e) = storage::remove_dir_all(&self.location, Path::new(&tombstone)).await {
            // The table is already invisible; a later sweep can retry.
            log::warn!("failed to remove tombstone {tombstone}: {e}");
        }
        log::debug!("deleted table {key} from namespace {}", self.name);
        Ok(existed)
    }

    /// Names of committed tables in this namespace, sorted.
    pub async fn list_keys(&self) -> NamespaceResult<Vec<String>> {
        ensure!(self.shared.is_open(), ConnectionClosedSnafu);
        let mut keys = Vec::new();
        for name in storage::list_child_dirs(&self.location)
            .await
            .context(StorageSnafu)?
        {
            if name.starts_with('.') {
                continue;
            }
            let table = VersionedTable::new(TableLocation::from(self.location.join(&name)));
            match table.current_version().await {
                Ok(0) => {}
                Ok(_) => keys.push(name),
                Err(e) => log::warn!("skipping unreadable table {name}: {e}"),
            }
        }
        Ok(keys)
    }

    /// Remove tombstones left behind by interrupted deletes.
    pub async fn sweep_tombstones(&self) -> NamespaceResult<usize> {
        let mut removed = 0;
        for name in storage::list_child_dirs(&self.location)
            .await
            .context(StorageSnafu)?
        {
            if name.starts_with('.') && name.contains(".deleted-") {
                storage::remove_dir_all(&self.location, Path::new(&name))
                    .await
                    .context(StorageSnafu)?;
                removed += 1;
            }
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::{Connection, SizeLimit};
    use arrow::array::{Float64Array, TimestampMicrosecondArray};
    use arrow::datatypes::{DataType, Field, Schema, TimeUnit};
    use chrono::{TimeZone, Utc};
    use tempfile::TempDir;

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    fn batch(secs: &[i64]) -> RecordBatch {
        let schema = Schema::new(vec![
            Field::new(
                "datetime",
                DataType::Timestamp(TimeUnit::Microsecond, Some("UTC".into())),
                false,
            ),
            Field::new("close_price", DataType::Float64, false),
        ]);
        let micros: Vec<i64> = secs.iter().map(|s| s * 1_000_000).collect();
        RecordBatch::try_new(
            Arc::new(schema),
            vec![
                Arc::new(TimestampMicrosecondArray::from(micros).with_timezone("UTC")),
                Arc::new(Float64Array::from(vec![1.0; secs.len()])),
            ],
        )
        .unwrap()
    }

    async fn open(tmp: &TempDir, limit: SizeLimit) -> Result<Namespace, Box<dyn std::error::Error>> {
        let conn = Connection::open(tmp.path(), limit).await?;
        Ok(conn.namespace("bar_data").await?)
    }

    #[test]
    fn validate_name_rejects_unsafe_names() {
        for bad in ["", ".", "..", ".hidden", "a/b", "a\\b", "a\u{7}b"] {
            assert!(validate_name(bad).is_err(), "{bad:?} should be rejected");
        }
        assert!(validate_name("IF2401@CFFEX@1m").is_ok());
    }

    #[tokio::test]
    async fn upsert_list_describe_delete_lifecycle() -> TestResult {
        let tmp = TempDir::new()?;
        let ns = open(&tmp, SizeLimit::Unlimited).await?;

        ns.upsert("b", &batch(&[1, 2]), "datetime", true).await?;
        ns.upsert("a", &batch(&[5]), "datetime", true).await?;
        assert_eq!(ns.list_keys().await?, vec!["a", "b"]);

        let desc = ns.describe("b").await?.expect("b exists");
        assert_eq!(desc.row_count, 2);
        assert_eq!(
            desc.time_range,
            Some((
                Utc.timestamp_opt(1, 0).single().unwrap(),
                Utc.timestamp_opt(2, 0).single().unwrap()
            ))
        );

        assert!(ns.delete("b").await?);
        assert!(!ns.delete("b").await?);
        assert_eq!(ns.list_keys().await?, vec!["a"]);
        assert!(ns.read("b", None).await?.is_none());
        assert!(ns.describe("b").await?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn metadata_requires_existing_table() -> TestResult {
        let tmp = TempDir::new()?;
        let ns = open(&tmp, SizeLimit::Unlimited).await?;

        let mut meta = UserMetadata::new();
        meta.insert("count".to_string(), serde_json::json!(2));

        let err = ns.write_metadata("x", meta.clone()).await.unwrap_err();
        assert!(matches!(err, NamespaceError::TableNotFound { .. }));
        assert!(ns.read_metadata("x").await?.is_none());

        ns.upsert("x", &batch(&[1, 2]), "datetime", true).await?;
        assert!(ns.read_metadata("x").await?.is_none());

        ns.write_metadata("x", meta.clone()).await?;
        assert_eq!(ns.read_metadata("x").await?, Some(meta));
        Ok(())
    }

    #[tokio::test]
    async fn read_as_of_sees_history_until_pruned() -> TestResult {
        let tmp = TempDir::new()?;
        let ns = open(&tmp, SizeLimit::Unlimited).await?;

        ns.upsert("k", &batch(&[1]), "datetime", false).await?;
        ns.upsert("k", &batch(&[1, 2]), "datetime", false).await?;

        let v1 = ns.read_as_of("k", 1, None).await?.expect("k exists");
        assert_eq!(v1.num_rows(), 1);
        assert!(ns.read_as_of("missing", 1, None).await?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn size_limit_blocks_writes() -> TestResult {
        let tmp = TempDir::new()?;
        let ns = open(&tmp, SizeLimit::Bytes(16)).await?;

        let err = ns.upsert("k", &batch(&[1, 2, 3]), "datetime", true).await.unwrap_err();
        assert!(matches!(err, NamespaceError::SizeLimitExceeded { limit: 16, .. }));
        assert!(ns.list_keys().await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn tombstones_are_hidden_and_sweepable() -> TestResult {
        let tmp = TempDir::new()?;
        let ns = open(&tmp, SizeLimit::Unlimited).await?;
        ns.upsert("k", &batch(&[1]), "datetime", true).await?;

        // An interrupted delete leaves a renamed directory behind.
        tokio::fs::rename(
            ns.location().root().join("k"),
            ns.location().root().join(".k.deleted-1"),
        )
        .await?;
        assert!(ns.list_keys().await?.is_empty());
        assert_eq!(ns.sweep_tombstones().await?, 1);
        Ok(())
    }
}
