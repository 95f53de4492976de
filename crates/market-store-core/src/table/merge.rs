//! Timestamp-keyed merge of record batches.
//!
//! Used twice by an upsert: once to sort and deduplicate the incoming batch,
//! and once to fold it over the rows of the segments it overlaps. Later
//! sources win on equal timestamps, and within one source the later row wins.
use std::collections::BTreeMap;

use arrow::array::{Array, ArrayRef, RecordBatch};
use arrow::compute::interleave;
use arrow::datatypes::SchemaRef;
use snafu::prelude::*;

use crate::table::error::{ArrowSnafu, TableError};
use crate::table::time_column;

/// Result of a merge: the merged rows plus their first and last raw timestamps.
pub(crate) struct Merged {
    pub(crate) batch: RecordBatch,
    pub(crate) bounds: Option<(i64, i64)>,
}

/// Merge `sources` into one batch sorted by the time column with unique
/// timestamps. All sources must share `schema`.
pub(crate) fn merge_by_time(
    schema: &SchemaRef,
    sources: &[RecordBatch],
    time_column: &str,
) -> Result<Merged, TableError> {
    let mut winners: BTreeMap<i64, (usize, usize)> = BTreeMap::new();
    for (src, batch) in sources.iter().enumerate() {
        let idx = time_column::time_column_index(batch, time_column)?;
        let values = time_column::raw_values(batch, idx, time_column)?;
        for (row, ts) in values.into_iter().enumerate() {
            winners.insert(ts, (src, row));
        }
    }

    let bounds = match (winners.keys().next(), winners.keys().next_back()) {
        (Some(first), Some(last)) => Some((*first, *last)),
        _ => None,
    };
    let indices: Vec<(usize, usize)> = winners.into_values().collect();

    let mut columns: Vec<ArrayRef> = Vec::with_capacity(schema.fields().len());
    for col in 0..schema.fields().len() {
        let arrays: Vec<&dyn Array> = sources.iter().map(|b| b.column(col).as_ref()).collect();
        let merged = if arrays.is_empty() {
            arrow::array::new_empty_array(schema.field(col).data_type())
        } else {
            interleave(&arrays, &indices).context(ArrowSnafu)?
        };
        columns.push(merged);
    }

    let batch = RecordBatch::try_new(schema.clone(), columns).context(ArrowSnafu)?;
    Ok(Merged { batch, bounds })
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::{Float64Array, TimestampMicrosecondArray};
    use arrow::datatypes::{DataType, Field, Schema, TimeUnit};
    use std::sync::Arc;

    fn schema() -> SchemaRef {
        Arc::new(Schema::new(vec![
            Field::new(
                "ts",
                DataType::Timestamp(TimeUnit::Microsecond, Some("UTC".into())),
                false,
            ),
            Field::new("close", DataType::Float64, false),
        ]))
    }

    fn batch(ts: &[i64], close: &[f64]) -> RecordBatch {
        RecordBatch::try_new(
            schema(),
            vec![
                Arc::new(TimestampMicrosecondArray::from(ts.to_vec()).with_timezone("UTC")),
                Arc::new(Float64Array::from(close.to_vec())),
            ],
        )
        .unwrap()
    }

    fn closes(batch: &RecordBatch) -> Vec<f64> {
        batch
            .column(1)
            .as_any()
            .downcast_ref::<Float64Array>()
            .unwrap()
            .values()
            .to_vec()
    }

    #[test]
    fn single_source_is_sorted_and_last_duplicate_wins() {
        let merged = merge_by_time(&schema(), &[batch(&[3, 1, 3, 2], &[30.0, 10.0, 31.0, 20.0])], "ts")
            .unwrap();
        assert_eq!(merged.batch.num_rows(), 3);
        assert_eq!(closes(&merged.batch), vec![10.0, 20.0, 31.0]);
        assert_eq!(merged.bounds, Some((1, 3)));
    }

    #[test]
    fn later_source_overrides_earlier_on_shared_timestamps() {
        let old = batch(&[1, 2, 3], &[1.0, 2.0, 3.0]);
        let new = batch(&[3, 4], &[33.0, 4.0]);
        let merged = merge_by_time(&schema(), &[old, new], "ts").unwrap();
        assert_eq!(closes(&merged.batch), vec![1.0, 2.0, 33.0, 4.0]);
        assert_eq!(merged.bounds, Some((1, 4)));
    }

    #[test]
    fn empty_input_yields_empty_batch() {
        let merged = merge_by_time(&schema(), &[batch(&[], &[])], "ts").unwrap();
        assert_eq!(merged.batch.num_rows(), 0);
        assert_eq!(merged.bounds, None);
    }
}
