//! Reconstructing table state by replaying log commits.
//!
//! `TableState` materializes the metadata stored in `_timeseries_log/`. The
//! [`TransactionLogStore::rebuild_table_state`] helper walks all commits from
//! version 1 up to the `CURRENT` pointer and applies their actions in order;
//! [`TransactionLogStore::rebuild_table_state_at`] stops at an older version,
//! which is what time-travel reads are built on.
use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::transaction_log::segments::cmp_segment_meta_by_time;
use crate::transaction_log::*;

/// A table as of one version: its metadata plus the live segments.
///
/// Invariant: `table_meta`, `segments` and `user_metadata` are the result of
/// applying all commits from version 1 through `version` in order.
#[derive(Debug, Clone, PartialEq)]
pub struct TableState {
    /// Version this state was rebuilt at.
    pub version: u64,
    /// Last version that changed the schema or the set of segments.
    /// Commits touching only user metadata leave it unchanged.
    pub data_version: u64,
    /// Schema and time column.
    pub table_meta: TableMeta,
    /// Segments visible at `version`.
    pub segments: HashMap<SegmentId, SegmentMeta>,
    /// Latest user metadata map; empty until one is written.
    pub user_metadata: UserMetadata,
}

impl TableState {
    /// Live segments in deterministic time order.
    pub fn segments_sorted_by_time(&self) -> Vec<&SegmentMeta> {
        let mut segs: Vec<&SegmentMeta> = self.segments.values().collect();
        segs.sort_by(|a, b| cmp_segment_meta_by_time(a, b));
        segs
    }

    /// Live segments whose span intersects the inclusive range `[start, end]`.
    pub fn segments_for_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Vec<&SegmentMeta> {
        self.segments_sorted_by_time()
            .into_iter()
            .filter(|s| s.overlaps(start, end))
            .collect()
    }

    /// Total number of rows across live segments.
    ///
    /// Segments never overlap in time, so this is the exact row count.
    pub fn row_count(&self) -> u64 {
        self.segments.values().map(|s| s.row_count).sum()
    }

    /// Earliest and latest timestamps across live segments.
    pub fn time_range(&self) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        let min = self.segments.values().map(|s| s.ts_min).min()?;
        let max = self.segments.values().map(|s| s.ts_max).max()?;
        Some((min, max))
    }
}

impl TransactionLogStore {
    /// Replay every published commit.
    ///
    /// A table without commits has no state and is reported as
    /// `CorruptState`; callers check the version first.
    pub async fn rebuild_table_state(&self) -> Result<TableState, CommitError> {
        match self.load_current_version().await? {
            0 => CorruptStateSnafu {
                msg: "table has no commits to replay",
            }
            .fail(),
            current => self.replay_until(current).await,
        }
    }

    /// Rebuild the TableState as it was right after `version` was committed.
    ///
    /// Fails with `CommitError::UnknownVersion` if `version` is 0 or newer
    /// than CURRENT.
    pub async fn rebuild_table_state_at(&self, version: u64) -> Result<TableState, CommitError> {
        let current = self.load_current_version().await?;
        ensure!(
            version >= 1 && version <= current,
            UnknownVersionSnafu {
                requested: version,
                current,
            }
        );
        self.replay_until(version).await
    }

    async fn replay_until(&self, until: u64) -> Result<TableState, CommitError> {
        let mut table_meta = None;
        let mut segments = HashMap::new();
        let mut user_metadata = UserMetadata::new();
        let mut data_version = 0;

        for v in 1..=until {
            let commit = self.load_commit(v).await?;

            ensure!(
                commit.version == v,
                CorruptStateSnafu {
                    msg: format!("file {v} holds commit {}", commit.version),
                }
            );

            for action in commit.actions {
                match action {
                    LogAction::AddSegment(segment) => {
                        segments.insert(segment.segment_id.clone(), segment);
                        data_version = v;
                    }
                    LogAction::RemoveSegment { segment_id } => {
                        segments.remove(&segment_id);
                        data_version = v;
                    }
                    LogAction::UpdateTableMeta(meta) => {
                        table_meta = Some(meta);
                        data_version = v;
                    }
                    LogAction::UpdateUserMetadata(map) => user_metadata = map,
                }
            }
        }

        let table_meta = table_meta.context(CorruptStateSnafu {
            msg: format!("no table metadata in versions 1..={until}"),
        })?;

        Ok(TableState {
            version: until,
            data_version,
            table_meta,
            segments,
            user_metadata,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{StorageError, TableLocation};
    use crate::transaction_log::table_metadata::{LogicalDataType, LogicalField, LogicalTimestampUnit};
    use chrono::TimeZone;
    use tempfile::TempDir;

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    fn empty_log() -> (TempDir, TransactionLogStore) {
        let tmp = TempDir::new().expect("tempdir");
        let log = TransactionLogStore::new(TableLocation::local(tmp.path()));
        (tmp, log)
    }

    fn sample_table_meta() -> TableMeta {
        let schema = LogicalSchema::new(vec![LogicalField {
            name: "datetime".to_string(),
            data_type: LogicalDataType::Timestamp {
                unit: LogicalTimestampUnit::Micros,
                timezone: Some("UTC".to_string()),
            },
            nullable: false,
        }])
        .expect("valid schema");
        TableMeta::new("datetime", schema)
    }

    fn sample_segment(id: &str, start_hour: u32, end_hour: u32, rows: u64) -> SegmentMeta {
        SegmentMeta {
            segment_id: SegmentId(id.to_string()),
            path: format!("data/{id}.parquet"),
            format: FileFormat::Parquet,
            ts_min: Utc
                .with_ymd_and_hms(2025, 1, 1, start_hour, 0, 0)
                .single()
                .expect("valid ts_min"),
            ts_max: Utc
                .with_ymd_and_hms(2025, 1, 1, end_hour, 0, 0)
                .single()
                .expect("valid ts_max"),
            row_count: rows,
            file_size: None,
        }
    }

    #[tokio::test]
    async fn rebuild_table_state_happy_path() -> TestResult {
        let (_tmp, store) = empty_log();
        let meta = sample_table_meta();
        let seg1 = sample_segment("seg1", 0, 1, 2);
        let seg2 = sample_segment("seg2", 2, 3, 2);

        let v1 = store
            .commit_with_expected_version(0, vec![LogAction::UpdateTableMeta(meta.clone())])
            .await?;
        let v2 = store
            .commit_with_expected_version(
                v1,
                vec![
                    LogAction::AddSegment(seg1.clone()),
                    LogAction::AddSegment(seg2.clone()),
                ],
            )
            .await?;
        let v3 = store
            .commit_with_expected_version(
                v2,
                vec![LogAction::RemoveSegment {
                    segment_id: seg1.segment_id.clone(),
                }],
            )
            .await?;

        let state = store.rebuild_table_state().await?;
        assert_eq!(state.version, v3);
        assert_eq!(state.table_meta, meta);
        assert!(state.segments.contains_key(&seg2.segment_id));
        assert!(!state.segments.contains_key(&seg1.segment_id));
        assert_eq!(state.row_count(), 2);
        assert_eq!(state.time_range(), Some((seg2.ts_min, seg2.ts_max)));
        Ok(())
    }

    #[tokio::test]
    async fn rebuild_at_older_version_sees_removed_segments() -> TestResult {
        let (_tmp, store) = empty_log();
        let seg1 = sample_segment("seg1", 0, 1, 5);

        store
            .commit_with_expected_version(
                0,
                vec![
                    LogAction::UpdateTableMeta(sample_table_meta()),
                    LogAction::AddSegment(seg1.clone()),
                ],
            )
            .await?;
        store
            .commit_with_expected_version(
                1,
                vec![LogAction::RemoveSegment {
                    segment_id: seg1.segment_id.clone(),
                }],
            )
            .await?;

        let old = store.rebuild_table_state_at(1).await?;
        assert_eq!(old.version, 1);
        assert_eq!(old.row_count(), 5);

        let now = store.rebuild_table_state().await?;
        assert_eq!(now.row_count(), 0);
        assert_eq!(now.time_range(), None);
        Ok(())
    }

    #[tokio::test]
    async fn rebuild_at_rejects_unknown_versions() -> TestResult {
        let (_tmp, store) = empty_log();
        store
            .commit_with_expected_version(0, vec![LogAction::UpdateTableMeta(sample_table_meta())])
            .await?;

        for bad in [0, 2] {
            let err = store.rebuild_table_state_at(bad).await.unwrap_err();
            assert!(matches!(
                err,
                CommitError::UnknownVersion { requested, current: 1, .. } if requested == bad
            ));
        }
        Ok(())
    }

    #[tokio::test]
    async fn user_metadata_last_write_wins() -> TestResult {
        let (_tmp, store) = empty_log();
        let mut first = UserMetadata::new();
        first.insert("count".to_string(), serde_json::json!(1));
        let mut second = UserMetadata::new();
        second.insert("count".to_string(), serde_json::json!(2));

        store
            .commit_with_expected_version(
                0,
                vec![
                    LogAction::UpdateTableMeta(sample_table_meta()),
                    LogAction::UpdateUserMetadata(first),
                ],
            )
            .await?;
        store
            .commit_with_expected_version(1, vec![LogAction::UpdateUserMetadata(second.clone())])
            .await?;

        let state = store.rebuild_table_state().await?;
        assert_eq!(state.user_metadata, second);
        assert_eq!(state.version, 2);
        assert_eq!(state.data_version, 1);
        Ok(())
    }

    #[tokio::test]
    async fn segments_for_range_filters_and_orders() -> TestResult {
        let (_tmp, store) = empty_log();
        let late = sample_segment("late", 5, 6, 1);
        let early = sample_segment("early", 0, 1, 1);

        store
            .commit_with_expected_version(
                0,
                vec![
                    LogAction::UpdateTableMeta(sample_table_meta()),
                    LogAction::AddSegment(late.clone()),
                    LogAction::AddSegment(early.clone()),
                ],
            )
            .await?;

        let state = store.rebuild_table_state().await?;
        let all: Vec<_> = state
            .segments_for_range(early.ts_min, late.ts_max)
            .into_iter()
            .map(|s| s.segment_id.0.as_str())
            .collect();
        assert_eq!(all, vec!["early", "late"]);

        let only_late = state.segments_for_range(late.ts_min, late.ts_max);
        assert_eq!(only_late.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn rebuild_table_state_errors_when_current_zero() {
        let (_tmp, store) = empty_log();

        let err = store
            .rebuild_table_state()
            .await
            .expect_err("expected error");
        assert!(matches!(err, CommitError::CorruptState { .. }));
    }

    #[tokio::test]
    async fn rebuild_table_state_errors_when_no_table_meta() -> TestResult {
        let (_tmp, store) = empty_log();

        store
            .commit_with_expected_version(0, vec![LogAction::AddSegment(sample_segment("s", 0, 1, 1))])
            .await?;

        let err = store
            .rebuild_table_state()
            .await
            .expect_err("expected error");
        assert!(matches!(err, CommitError::CorruptState { .. }));
        Ok(())
    }

    #[tokio::test]
    async fn rebuild_table_state_fails_when_commit_missing() -> TestResult {
        let (tmp, store) = empty_log();

        store
            .commit_with_expected_version(0, vec![LogAction::UpdateTableMeta(sample_table_meta())])
            .await?;

        let commit_path = tmp
            .path()
            .join(TransactionLogStore::LOG_DIR_NAME)
            .join("0000000001.json");
        tokio::fs::remove_file(&commit_path).await?;

        let err = store
            .rebuild_table_state()
            .await
            .expect_err("expected error");
        match err {
            CommitError::Storage { source } => match source {
                StorageError::NotFound { .. } => {}
                other => panic!("unexpected storage error: {other:?}"),
            },
            other => panic!("expected storage error, got {other:?}"),
        }
        Ok(())
    }
}
