//! Range reads over a versioned table.
//!
//! A read picks the live segments whose `[ts_min, ts_max]` intersects the
//! requested inclusive window, reads each Parquet file from storage, and
//! filters rows by the time column with Arrow's scalar comparison kernels.
//! Segments never overlap, so concatenating them in `ts_min` order yields a
//! globally sorted result.
use std::path::Path;

use arrow::array::{
    Array, RecordBatch, Scalar, TimestampMicrosecondArray, TimestampMillisecondArray,
    TimestampNanosecondArray, TimestampSecondArray,
};
use arrow::compute::kernels::{boolean as boolean_kernels, cmp as cmp_kernels};
use arrow::compute::{concat_batches, filter_record_batch};
use arrow::datatypes::{DataType, SchemaRef, TimeUnit};
use bytes::Bytes;
use futures::{StreamExt, TryStreamExt};
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use snafu::prelude::*;

use crate::{
    storage::{self, StorageError, TableLocation},
    table::{
        TimeRange, VersionedTable,
        error::{
            ArrowSnafu, ParquetReadSnafu, ReadRetriesExhaustedSnafu, StorageSnafu, TableError,
        },
        time_column,
    },
    transaction_log::{SegmentMeta, TableState},
};

/// Number of times a read reloads table state after a segment vanished.
const MAX_READ_ATTEMPTS: usize = 3;

/// Segment files read concurrently by one range read; results keep
/// segment order.
const SEGMENT_READ_CONCURRENCY: usize = 8;

/// Filter a `RecordBatch` by its timestamp column for the inclusive range
/// `[start, end]`.
///
/// The bounds are wrapped as 1-element arrays carrying the column's timezone,
/// so the comparison kernels see identical types and broadcast the scalar
/// instead of materializing full-length bound arrays. Null timestamps yield
/// null mask entries, which `filter_record_batch` drops.
macro_rules! filter_ts_batch {
    ($array_ty: ty,
    $batch:expr,
    $ts_idx:expr,
    $start_bound:expr,
    $end_bound:expr,
    $time_col:expr,
    $out:expr
) => {{
        let col = $batch.column($ts_idx);
        let ts_arr = col.as_any().downcast_ref::<$array_ty>().ok_or_else(|| {
            TableError::UnsupportedTimeType {
                column: $time_col.to_string(),
                datatype: col.data_type().clone(),
            }
        })?;

        let tz_opt = match ts_arr.data_type() {
            DataType::Timestamp(_, tz_opt) => tz_opt.clone(),
            _ => None,
        };

        let start_scalar =
            Scalar::new(<$array_ty>::from(vec![$start_bound]).with_timezone_opt(tz_opt.clone()));
        let end_scalar = Scalar::new(<$array_ty>::from(vec![$end_bound]).with_timezone_opt(tz_opt));

        let ge_mask = cmp_kernels::gt_eq(ts_arr, &start_scalar).context(ArrowSnafu)?;
        let le_mask = cmp_kernels::lt_eq(ts_arr, &end_scalar).context(ArrowSnafu)?;
        let mask = boolean_kernels::and(&ge_mask, &le_mask).context(ArrowSnafu)?;

        let filtered = filter_record_batch(&$batch, &mask).context(ArrowSnafu)?;
        if filtered.num_rows() > 0 {
            $out.push(filtered);
        }

        Ok::<(), TableError>(())
    }};
}

/// Read every row of a segment, aligned to the table schema.
pub(crate) async fn read_segment_all(
    location: &TableLocation,
    schema: &SchemaRef,
    segment: &SegmentMeta,
) -> Result<Vec<RecordBatch>, TableError> {
    let bytes = storage::read_all_bytes(location.as_ref(), Path::new(&segment.path))
        .await
        .context(StorageSnafu)?;

    let reader = ParquetRecordBatchReaderBuilder::try_new(Bytes::from(bytes))
        .context(ParquetReadSnafu)?
        .build()
        .context(ParquetReadSnafu)?;

    let mut out = Vec::new();
    for batch_res in reader {
        let batch = batch_res.context(ArrowSnafu)?;
        // Re-attach the table schema so field metadata from the file never
        // leaks into results.
        let batch = RecordBatch::try_new(schema.clone(), batch.columns().to_vec())
            .context(ArrowSnafu)?;
        out.push(batch);
    }
    Ok(out)
}

async fn read_segment_range(
    location: &TableLocation,
    schema: &SchemaRef,
    segment: &SegmentMeta,
    time_column: &str,
    range: TimeRange,
) -> Result<Vec<RecordBatch>, TableError> {
    let batches = read_segment_all(location, schema, segment).await?;
    if range.covers(segment.ts_min, segment.ts_max) {
        return Ok(batches);
    }

    let ts_idx = schema
        .index_of(time_column)
        .map_err(|_| TableError::MissingTimeColumn {
            column: time_column.to_string(),
        })?;
    let unit = time_column::time_unit(schema.field(ts_idx), time_column)?;
    let start_bound = time_column::to_raw_ceil(range.start, unit, time_column)?;
    let end_bound = time_column::to_raw(range.end, unit, time_column)?;

    let mut out = Vec::new();
    for batch in batches {
        match unit {
            TimeUnit::Second => filter_ts_batch!(
                TimestampSecondArray,
                batch,
                ts_idx,
                start_bound,
                end_bound,
                time_column,
                out
            )?,
            TimeUnit::Millisecond => filter_ts_batch!(
                TimestampMillisecondArray,
                batch,
                ts_idx,
                start_bound,
                end_bound,
                time_column,
                out
            )?,
            TimeUnit::Microsecond => filter_ts_batch!(
                TimestampMicrosecondArray,
                batch,
                ts_idx,
                start_bound,
                end_bound,
                time_column,
                out
            )?,
            TimeUnit::Nanosecond => filter_ts_batch!(
                TimestampNanosecondArray,
                batch,
                ts_idx,
                start_bound,
                end_bound,
                time_column,
                out
            )?,
        }
    }
    Ok(out)
}

/// Read the rows of `state` that fall in `range` (or all rows) as one batch.
async fn read_state(
    location: &TableLocation,
    state: &TableState,
    range: Option<TimeRange>,
) -> Result<RecordBatch, TableError> {
    let schema = state.table_meta.arrow_schema_ref();
    let time_column = state.table_meta.time_column.clone();

    let candidates: Vec<SegmentMeta> = match range {
        Some(r) => state.segments_for_range(r.start, r.end),
        None => state.segments_sorted_by_time(),
    }
    .into_iter()
    .cloned()
    .collect();

    let per_segment: Vec<Vec<RecordBatch>> = futures::stream::iter(candidates)
        .map(|seg| {
            let schema = schema.clone();
            let time_column = time_column.clone();
            async move {
                match range {
                    Some(r) => read_segment_range(location, &schema, &seg, &time_column, r).await,
                    None => read_segment_all(location, &schema, &seg).await,
                }
            }
        })
        .buffered(SEGMENT_READ_CONCURRENCY)
        .try_collect()
        .await?;
    let batches: Vec<RecordBatch> = per_segment.into_iter().flatten().collect();

    concat_batches(&schema, &batches).context(ArrowSnafu)
}

fn is_missing_segment(err: &TableError) -> bool {
    matches!(
        err,
        TableError::Storage {
            source: StorageError::NotFound { .. }
        }
    )
}

impl VersionedTable {
    /// Read rows whose timestamp lies in the inclusive `range`, or every row
    /// when `range` is `None`, sorted by time.
    ///
    /// Returns `Ok(None)` if the table has no commits. An inverted range
    /// yields an empty batch.
    pub async fn read(&self, range: Option<TimeRange>) -> Result<Option<RecordBatch>, TableError> {
        let mut attempts = 0;
        loop {
            attempts += 1;
            let Some(state) = self.load_state().await? else {
                return Ok(None);
            };
            if range.is_some_and(|r| r.is_empty()) {
                return Ok(Some(RecordBatch::new_empty(state.table_meta.arrow_schema_ref())));
            }

            match read_state(self.location(), &state, range).await {
                Ok(batch) => return Ok(Some(batch)),
                // A pruning writer may have replaced the segment after we
                // loaded state; a newer version will not reference it.
                Err(e) if is_missing_segment(&e) && attempts < MAX_READ_ATTEMPTS => {
                    log::debug!(
                        "segment vanished while reading {}; reloading state",
                        self.location().root().display()
                    );
                    let current = self.current_version().await?;
                    if current == state.version {
                        return Err(e);
                    }
                }
                Err(e) if is_missing_segment(&e) => {
                    return ReadRetriesExhaustedSnafu { attempts }.fail();
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Read rows as they were at `version`.
    ///
    /// Segments that a pruning write deleted after `version` surface as a
    /// storage `NotFound` error.
    pub async fn read_as_of(
        &self,
        version: u64,
        range: Option<TimeRange>,
    ) -> Result<RecordBatch, TableError> {
        let state = self.load_state_at(version).await?;
        if range.is_some_and(|r| r.is_empty()) {
            return Ok(RecordBatch::new_empty(state.table_meta.arrow_schema_ref()));
        }
        read_state(self.location(), &state, range).await
    }
}
