//! Append-only metadata log and table state.
//!
//! Every versioned table keeps a small Delta-style commit log next to its
//! Parquet segments:
//!
//! - Commits are JSON files under `_timeseries_log/` (for example
//!   `_timeseries_log/0000000001.json`), each holding an ordered list of
//!   [`LogAction`] values.
//! - A `CURRENT` file records the latest committed version.
//! - Writers use optimistic concurrency: a commit names the version it was
//!   prepared against and fails with [`CommitError::Conflict`] if the table
//!   moved in the meantime.
//! - [`TableState`] is rebuilt by replaying commits, either up to `CURRENT`
//!   or up to an older version for time-travel reads.
//!
//! ## On-disk layout
//!
//! ```text
//! table_root/
//!   _timeseries_log/
//!     CURRENT                  # latest committed version (e.g. "3\n")
//!     0000000001.json          # table metadata + first segment
//!     0000000002.json          # segment replaced by a merged upsert
//!     0000000003.json          # user metadata update
//!   data/
//!     seg-<hash>.parquet
//! ```
//!
//! Commits never mutate existing files. Segment files referenced by old
//! versions stay on disk until a pruning write deletes them.
pub mod actions;
pub mod log_store;
pub mod segments;
pub mod table_metadata;
pub mod table_state;

pub use actions::{Commit, LogAction, UserMetadata};
pub use log_store::TransactionLogStore;
pub use segments::{FileFormat, SegmentId, SegmentMeta, segment_id_v1};
pub use table_metadata::{
    LogicalDataType, LogicalField, LogicalSchema, LogicalSchemaError, LogicalTimestampUnit,
    TableMeta,
};
pub use table_state::TableState;

use snafu::{Backtrace, prelude::*};

use crate::storage::StorageError;

/// Errors that can occur while reading or writing the commit log.
#[derive(Debug, Snafu)]
pub enum CommitError {
    /// The caller's expected_version does not match the CURRENT pointer.
    #[snafu(display("Commit conflict: expected version {expected}, but CURRENT is {found}"))]
    Conflict {
        /// The version the caller expected to be current.
        expected: u64,
        /// The actual current version found.
        found: u64,
        /// Backtrace for debugging.
        backtrace: Backtrace,
    },

    /// A historical version outside `1..=CURRENT` was requested.
    #[snafu(display("Unknown table version {requested} (CURRENT is {current})"))]
    UnknownVersion {
        /// The version that was asked for.
        requested: u64,
        /// The latest committed version.
        current: u64,
        /// Backtrace for debugging.
        backtrace: Backtrace,
    },

    /// Underlying storage error while working with the log or CURRENT file.
    #[snafu(display("Storage error while accessing commit log: {source}"))]
    Storage {
        /// Underlying storage error returned by the storage backend.
        #[snafu(backtrace)]
        source: StorageError,
    },

    /// The log or CURRENT file is in an unexpected / malformed state.
    #[snafu(display("Corrupt log state: {msg}"))]
    CorruptState {
        /// A description of the corrupt state.
        msg: String,
        /// Backtrace for debugging.
        backtrace: Backtrace,
    },
}

impl CommitError {
    /// Whether a retry against a freshly loaded version may succeed.
    pub fn is_lost_race(&self) -> bool {
        matches!(
            self,
            CommitError::Conflict { .. }
                | CommitError::Storage {
                    source: StorageError::AlreadyExists { .. }
                }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone, Utc};

    fn utc_datetime(year: i32, month: u32, day: u32, hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(year, month, day, hour, 0, 0)
            .single()
            .expect("valid UTC timestamp")
    }

    #[test]
    fn commit_json_roundtrip() {
        let ts0 = utc_datetime(2025, 1, 1, 0);
        let ts1 = utc_datetime(2025, 1, 1, 1);

        let schema = LogicalSchema::new(vec![
            LogicalField {
                name: "datetime".to_string(),
                data_type: LogicalDataType::Timestamp {
                    unit: LogicalTimestampUnit::Micros,
                    timezone: Some("UTC".to_string()),
                },
                nullable: false,
            },
            LogicalField {
                name: "close_price".to_string(),
                data_type: LogicalDataType::Float64,
                nullable: false,
            },
        ])
        .expect("valid logical schema");

        let seg_meta = SegmentMeta {
            segment_id: SegmentId("seg-0001".to_string()),
            path: "data/seg-0001.parquet".to_string(),
            format: FileFormat::Parquet,
            ts_min: ts0,
            ts_max: ts1,
            row_count: 2,
            file_size: Some(512),
        };

        let mut user = UserMetadata::new();
        user.insert("symbol".to_string(), serde_json::json!("IF2401"));

        let commit = Commit {
            version: 1,
            base_version: 0,
            timestamp: ts1,
            actions: vec![
                LogAction::UpdateTableMeta(TableMeta::new("datetime", schema)),
                LogAction::AddSegment(seg_meta),
                LogAction::UpdateUserMetadata(user),
            ],
        };

        let json = serde_json::to_string_pretty(&commit).expect("serialize commit");
        let decoded: Commit = serde_json::from_str(&json).expect("deserialize commit");
        assert_eq!(commit, decoded);
    }

    #[test]
    fn segment_id_transparent_serialization() {
        let id = SegmentId("my-segment".to_string());
        let json = serde_json::to_string(&id).expect("serialize");
        assert_eq!(json, r#""my-segment""#);
    }

    #[test]
    fn lost_race_classification() {
        let conflict = ConflictSnafu {
            expected: 1u64,
            found: 2u64,
        }
        .build();
        assert!(conflict.is_lost_race());

        let corrupt = CorruptStateSnafu { msg: "x" }.build();
        assert!(!corrupt.is_lost_race());
    }
}
