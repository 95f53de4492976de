//! Versioned time-series tables.
//!
//! A [`VersionedTable`] is one directory holding a commit log and immutable
//! Parquet segments. It supports:
//!
//! - upserts keyed by a timestamp column (see [`VersionedTable::upsert`]),
//! - inclusive range reads at the latest or an older version,
//! - a log-only [`TableDescription`] (row count, time span, columns),
//! - a user metadata map committed through the same log.
//!
//! The handle holds no cached state: every call replays the log, so several
//! handles on the same directory always observe the latest commit.
pub mod error;
mod merge;
mod scan;
mod time_column;
mod upsert;

pub use error::TableError;
pub use upsert::UpsertOutcome;

use chrono::{DateTime, Utc};
use snafu::prelude::*;

use crate::{
    storage::TableLocation,
    transaction_log::{LogAction, TableState, TransactionLogStore, UserMetadata},
};
use error::{EmptyTableSnafu, TransactionLogSnafu};

/// Inclusive time window `[start, end]` in UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeRange {
    /// First instant included.
    pub start: DateTime<Utc>,
    /// Last instant included.
    pub end: DateTime<Utc>,
}

impl TimeRange {
    /// Create a window; `start > end` is allowed and matches nothing.
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    /// Whether the window can match no instant at all.
    pub fn is_empty(&self) -> bool {
        self.start > self.end
    }

    /// Whether `t` lies inside the window.
    pub fn contains(&self, t: DateTime<Utc>) -> bool {
        self.start <= t && t <= self.end
    }

    /// Whether the whole span `[lo, hi]` lies inside the window.
    pub fn covers(&self, lo: DateTime<Utc>, hi: DateTime<Utc>) -> bool {
        self.contains(lo) && self.contains(hi)
    }
}

/// Summary of a table computed from its log alone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableDescription {
    /// Version the description was taken at.
    pub version: u64,
    /// Last version that changed rows or schema; metadata-only commits
    /// after it do not move it.
    pub data_version: u64,
    /// Number of rows (distinct timestamps).
    pub row_count: u64,
    /// First and last timestamp, `None` for a table without rows.
    pub time_range: Option<(DateTime<Utc>, DateTime<Utc>)>,
    /// Column names in schema order.
    pub columns: Vec<String>,
}

impl TableDescription {
    /// Describe a replayed table state.
    pub fn from_state(state: &TableState) -> Self {
        Self {
            version: state.version,
            data_version: state.data_version,
            row_count: state.row_count(),
            time_range: state.time_range(),
            columns: state
                .table_meta
                .logical_schema
                .columns()
                .iter()
                .map(|c| c.name.clone())
                .collect(),
        }
    }
}

/// Default cap on rows per segment written by an upsert.
pub const DEFAULT_MAX_SEGMENT_ROWS: usize = 4_096;

/// Handle on one versioned table directory.
#[derive(Debug, Clone)]
pub struct VersionedTable {
    location: TableLocation,
    log: TransactionLogStore,
    max_segment_rows: usize,
}

impl VersionedTable {
    /// Create a handle for the table rooted at `location`. Nothing is created
    /// on disk until the first upsert.
    pub fn new(location: TableLocation) -> Self {
        let log = TransactionLogStore::new(location.clone());
        Self {
            location,
            log,
            max_segment_rows: DEFAULT_MAX_SEGMENT_ROWS,
        }
    }

    /// Cap the number of rows per segment written by later upserts.
    /// Values below 1 are treated as 1.
    pub fn with_max_segment_rows(mut self, rows: usize) -> Self {
        self.max_segment_rows = rows.max(1);
        self
    }

    /// Largest number of rows an upsert puts in one segment.
    pub fn max_segment_rows(&self) -> usize {
        self.max_segment_rows
    }

    /// Table root location.
    pub fn location(&self) -> &TableLocation {
        &self.location
    }

    pub(crate) fn log(&self) -> &TransactionLogStore {
        &self.log
    }

    /// Latest committed version (0 for a table without commits).
    pub async fn current_version(&self) -> Result<u64, TableError> {
        self.log
            .load_current_version()
            .await
            .context(TransactionLogSnafu)
    }

    /// Replay the log up to CURRENT; `None` if the table has no commits.
    pub async fn load_state(&self) -> Result<Option<TableState>, TableError> {
        if self.current_version().await? == 0 {
            return Ok(None);
        }
        self.log
            .rebuild_table_state()
            .await
            .map(Some)
            .context(TransactionLogSnafu)
    }

    /// Replay the log up to `version`.
    pub async fn load_state_at(&self, version: u64) -> Result<TableState, TableError> {
        self.log
            .rebuild_table_state_at(version)
            .await
            .context(TransactionLogSnafu)
    }

    /// Describe the latest version; `None` if the table has no commits.
    pub async fn describe(&self) -> Result<Option<TableDescription>, TableError> {
        Ok(self
            .load_state()
            .await?
            .map(|state| TableDescription::from_state(&state)))
    }

    /// Describe the table as of `version`.
    pub async fn describe_as_of(&self, version: u64) -> Result<TableDescription, TableError> {
        Ok(TableDescription::from_state(&self.load_state_at(version).await?))
    }

    /// Latest user metadata; `None` if the table has no commits.
    pub async fn user_metadata(&self) -> Result<Option<UserMetadata>, TableError> {
        Ok(self.load_state().await?.map(|state| state.user_metadata))
    }

    /// Replace the user metadata map, committing a new version.
    ///
    /// The table must already exist.
    pub async fn write_user_metadata(&self, metadata: UserMetadata) -> Result<u64, TableError> {
        let current = self.current_version().await?;
        ensure!(
            current > 0,
            EmptyTableSnafu {
                path: self.location.root().display().to_string(),
            }
        );
        self.log
            .commit_with_expected_version(current, vec![LogAction::UpdateUserMetadata(metadata)])
            .await
            .context(TransactionLogSnafu)
    }
}
