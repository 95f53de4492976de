//! Upsert: merge a batch into a versioned table and commit one new version.
//!
//! The write path is:
//!
//! 1. Validate the batch against the table schema (or adopt it for a new
//!    table) and sort/deduplicate it on the time column.
//! 2. Read the live segments whose span intersects the batch span and merge
//!    their rows with the batch; batch rows win on equal timestamps.
//! 3. Split the merged rows into chunks of at most
//!    [`VersionedTable::max_segment_rows`] rows and encode each as a Parquet
//!    file under `data/`, named by a content-derived segment ID, before
//!    anything is committed.
//! 4. Commit `RemoveSegment` for every merged segment plus one `AddSegment`
//!    per chunk in a single commit, guarded by the version read in step 1.
//! 5. Optionally delete the replaced segment files.
//!
//! Only the last chunk of a series is usually below the cap, so appending
//! writers keep rewriting one small segment instead of the whole table.
//! Readers see either the old version or the new one. A failed commit leaves
//! unreferenced data files, which are removed on a best-effort basis.
use std::path::Path;

use arrow::array::RecordBatch;
use arrow::datatypes::{SchemaRef, TimeUnit};
use parquet::arrow::ArrowWriter;
use parquet::basic::Compression;
use parquet::file::properties::WriterProperties;
use snafu::prelude::*;

use crate::{
    storage,
    table::{
        TableDescription, VersionedTable,
        error::{
            ArrowSnafu, ParquetWriteSnafu, SchemaMismatchSnafu, StorageSnafu, TableError,
            TransactionLogSnafu, UnsupportedSchemaSnafu,
        },
        merge::merge_by_time,
        scan::read_segment_all,
        time_column,
    },
    transaction_log::{
        FileFormat, LogAction, LogicalSchema, SegmentMeta, TableMeta, TableState, segment_id_v1,
    },
};

/// Result of a successful upsert.
#[derive(Debug, Clone, PartialEq)]
pub struct UpsertOutcome {
    /// Version committed by this upsert.
    pub version: u64,
    /// Table description right after the commit.
    pub description: TableDescription,
    /// Number of segments merged away by this upsert.
    pub replaced_segments: usize,
}

fn render_schema(schema: &LogicalSchema) -> String {
    schema
        .columns()
        .iter()
        .map(|c| c.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

fn encode_parquet(schema: &SchemaRef, batch: &RecordBatch) -> Result<Vec<u8>, TableError> {
    let props = WriterProperties::builder()
        .set_compression(Compression::SNAPPY)
        .build();
    let mut buf = Vec::new();
    let mut writer =
        ArrowWriter::try_new(&mut buf, schema.clone(), Some(props)).context(ParquetWriteSnafu)?;
    writer.write(batch).context(ParquetWriteSnafu)?;
    writer.close().context(ParquetWriteSnafu)?;
    Ok(buf)
}

impl VersionedTable {
    /// Merge `batch` into the table and commit a new version.
    ///
    /// The first upsert creates the table, recording the batch schema and
    /// `time_column`. Later upserts must use exactly the same schema.
    /// With `prune_previous_versions`, segment files replaced by this write
    /// are deleted after the commit, so older versions can no longer be read.
    ///
    /// A concurrent commit between loading state and committing surfaces as
    /// a `TransactionLog` conflict; nothing is retried here.
    pub async fn upsert(
        &self,
        batch: &RecordBatch,
        time_column: &str,
        prune_previous_versions: bool,
    ) -> Result<UpsertOutcome, TableError> {
        let state = self.load_state().await?;

        let incoming = LogicalSchema::from_arrow_schema(batch.schema().as_ref())
            .context(UnsupportedSchemaSnafu)?;
        time_column::time_column_index(batch, time_column)?;

        let (expected_version, table_meta, new_table) = match &state {
            Some(state) => {
                let meta = &state.table_meta;
                ensure!(
                    meta.logical_schema == incoming && meta.time_column == time_column,
                    SchemaMismatchSnafu {
                        expected: format!(
                            "{} (time column {})",
                            render_schema(&meta.logical_schema),
                            meta.time_column
                        ),
                        actual: format!("{} (time column {time_column})", render_schema(&incoming)),
                    }
                );
                (state.version, meta.clone(), false)
            }
            None => (0, TableMeta::new(time_column, incoming), true),
        };
        let schema = table_meta.arrow_schema_ref();

        // Align the batch to the recorded schema (drops batch-level metadata).
        let batch =
            RecordBatch::try_new(schema.clone(), batch.columns().to_vec()).context(ArrowSnafu)?;
        let deduped = merge_by_time(&schema, std::slice::from_ref(&batch), time_column)?;

        let Some((batch_min, batch_max)) = deduped.bounds else {
            // Nothing to merge: an empty batch only creates the table.
            return self.commit_empty(state, table_meta, expected_version).await;
        };

        let ts_idx = schema.index_of(time_column).map_err(|_| TableError::MissingTimeColumn {
            column: time_column.to_string(),
        })?;
        let unit = time_column::time_unit(schema.field(ts_idx), time_column)?;
        let span_start = time_column::to_datetime(batch_min, unit, time_column)?;
        let span_end = time_column::to_datetime(batch_max, unit, time_column)?;

        // 1) Gather overlapping segments and merge.
        let overlapping: Vec<SegmentMeta> = match &state {
            Some(state) => state
                .segments_for_range(span_start, span_end)
                .into_iter()
                .cloned()
                .collect(),
            None => Vec::new(),
        };

        let mut sources = Vec::new();
        for seg in &overlapping {
            sources.extend(read_segment_all(self.location(), &schema, seg).await?);
        }
        sources.push(deduped.batch);
        let merged = merge_by_time(&schema, &sources, time_column)?;

        // 2) Write the new segments before committing.
        let new_version = expected_version + 1;
        let raw = time_column::raw_values(&merged.batch, ts_idx, time_column)?;
        let mut written: Vec<SegmentMeta> = Vec::new();
        for offset in (0..raw.len()).step_by(self.max_segment_rows()) {
            let len = self.max_segment_rows().min(raw.len() - offset);
            let chunk = merged.batch.slice(offset, len);
            let bounds = (raw[offset], raw[offset + len - 1]);
            match self
                .write_segment(&schema, &chunk, bounds, unit, time_column, new_version)
                .await
            {
                Ok(segment) => written.push(segment),
                Err(e) => {
                    for seg in &written {
                        self.discard_uncommitted(&seg.path).await;
                    }
                    return Err(e);
                }
            }
        }

        // 3) Commit.
        let mut actions = Vec::with_capacity(overlapping.len() + written.len() + 1);
        if new_table {
            actions.push(LogAction::UpdateTableMeta(table_meta.clone()));
        }
        for seg in &overlapping {
            actions.push(LogAction::RemoveSegment {
                segment_id: seg.segment_id.clone(),
            });
        }
        actions.extend(written.iter().cloned().map(LogAction::AddSegment));

        let version = match self
            .log()
            .commit_with_expected_version(expected_version, actions)
            .await
        {
            Ok(v) => v,
            Err(source) => {
                for seg in &written {
                    self.discard_uncommitted(&seg.path).await;
                }
                return Err(TableError::TransactionLog { source });
            }
        };

        log::debug!(
            "upserted {} rows into {} at version {version} (merged {} segments into {}, {} rows)",
            batch.num_rows(),
            self.location().root().display(),
            overlapping.len(),
            written.len(),
            merged.batch.num_rows()
        );

        // 4) Prune replaced files.
        if prune_previous_versions {
            for seg in &overlapping {
                if let Err(e) =
                    storage::remove_file(self.location().as_ref(), Path::new(&seg.path)).await
                {
                    log::warn!("failed to prune segment {}: {e}", seg.path);
                }
            }
        }

        // 5) Describe the new state without touching storage again.
        let mut next = match state {
            Some(state) => state,
            None => TableState {
                version: 0,
                data_version: 0,
                table_meta,
                segments: Default::default(),
                user_metadata: Default::default(),
            },
        };
        next.version = version;
        next.data_version = version;
        for seg in &overlapping {
            next.segments.remove(&seg.segment_id);
        }
        for seg in written {
            next.segments.insert(seg.segment_id.clone(), seg);
        }

        Ok(UpsertOutcome {
            version,
            description: TableDescription::from_state(&next),
            replaced_segments: overlapping.len(),
        })
    }

    async fn commit_empty(
        &self,
        state: Option<TableState>,
        table_meta: TableMeta,
        expected_version: u64,
    ) -> Result<UpsertOutcome, TableError> {
        let state = match state {
            Some(state) => state,
            None => {
                let version = self
                    .log()
                    .commit_with_expected_version(
                        expected_version,
                        vec![LogAction::UpdateTableMeta(table_meta.clone())],
                    )
                    .await
                    .context(TransactionLogSnafu)?;
                TableState {
                    version,
                    data_version: version,
                    table_meta,
                    segments: Default::default(),
                    user_metadata: Default::default(),
                }
            }
        };
        Ok(UpsertOutcome {
            version: state.version,
            description: TableDescription::from_state(&state),
            replaced_segments: 0,
        })
    }

    /// Encode one sorted chunk whose raw time bounds are `(first, last)` and
    /// store it under `data/`, returning its uncommitted metadata.
    async fn write_segment(
        &self,
        schema: &SchemaRef,
        chunk: &RecordBatch,
        (first, last): (i64, i64),
        unit: TimeUnit,
        time_column: &str,
        version: u64,
    ) -> Result<SegmentMeta, TableError> {
        let bytes = encode_parquet(schema, chunk)?;
        let segment_id = segment_id_v1(version, &bytes);
        let rel_path = format!("data/{segment_id}.parquet");
        storage::write_new(self.location().as_ref(), Path::new(&rel_path), &bytes)
            .await
            .context(StorageSnafu)?;

        Ok(SegmentMeta {
            segment_id,
            path: rel_path,
            format: FileFormat::Parquet,
            ts_min: time_column::to_datetime(first, unit, time_column)?,
            ts_max: time_column::to_datetime(last, unit, time_column)?,
            row_count: chunk.num_rows() as u64,
            file_size: Some(bytes.len() as u64),
        })
    }

    async fn discard_uncommitted(&self, rel_path: &str) {
        if let Err(e) = storage::remove_file(self.location().as_ref(), Path::new(rel_path)).await {
            log::warn!("failed to remove uncommitted segment {rel_path}: {e}");
        }
    }
}
