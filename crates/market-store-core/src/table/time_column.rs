//! Conversions between the Arrow time column and UTC instants.
use arrow::array::{Array, AsArray, RecordBatch};
use arrow::compute::cast;
use arrow::datatypes::{DataType, Field, Int64Type, TimeUnit};
use chrono::{DateTime, Utc};
use snafu::prelude::*;

use crate::table::error::{
    ArrowSnafu, MissingTimeColumnSnafu, NullTimestampsSnafu, TableError,
    TimeConversionOverflowSnafu, TimestampOutOfRangeSnafu, UnsupportedTimeTypeSnafu,
};

/// Locate the time column and check it is a timestamp type.
pub(crate) fn time_column_index(batch: &RecordBatch, column: &str) -> Result<usize, TableError> {
    let schema = batch.schema();
    let idx = schema
        .index_of(column)
        .ok()
        .context(MissingTimeColumnSnafu { column })?;
    time_unit(schema.field(idx), column)?;
    Ok(idx)
}

/// Unit of a timestamp field.
pub(crate) fn time_unit(field: &Field, column: &str) -> Result<TimeUnit, TableError> {
    match field.data_type() {
        DataType::Timestamp(unit, _) => Ok(*unit),
        other => UnsupportedTimeTypeSnafu {
            column,
            datatype: other.clone(),
        }
        .fail(),
    }
}

/// Raw time values of a batch in the column's own unit.
///
/// Nulls are rejected; every stored row must have a timestamp.
pub(crate) fn raw_values(
    batch: &RecordBatch,
    idx: usize,
    column: &str,
) -> Result<Vec<i64>, TableError> {
    let col = batch.column(idx);
    ensure!(
        col.null_count() == 0,
        NullTimestampsSnafu {
            column,
            null_count: col.null_count(),
        }
    );
    let ints = cast(col, &DataType::Int64).context(ArrowSnafu)?;
    Ok(ints.as_primitive::<Int64Type>().values().to_vec())
}

/// Convert a raw value in `unit` to a UTC instant.
pub(crate) fn to_datetime(value: i64, unit: TimeUnit, column: &str) -> Result<DateTime<Utc>, TableError> {
    let dt = match unit {
        TimeUnit::Second => DateTime::from_timestamp(value, 0),
        TimeUnit::Millisecond => DateTime::from_timestamp_millis(value),
        TimeUnit::Microsecond => DateTime::from_timestamp_micros(value),
        TimeUnit::Nanosecond => Some(DateTime::from_timestamp_nanos(value)),
    };
    dt.context(TimestampOutOfRangeSnafu { column, value })
}

/// Convert a UTC instant to a raw value in `unit`.
///
/// Sub-unit precision is truncated toward negative infinity, which is the
/// right rounding for an inclusive upper bound.
pub(crate) fn to_raw(dt: DateTime<Utc>, unit: TimeUnit, column: &str) -> Result<i64, TableError> {
    match unit {
        TimeUnit::Second => Ok(dt.timestamp()),
        TimeUnit::Millisecond => Ok(dt.timestamp_millis()),
        TimeUnit::Microsecond => Ok(dt.timestamp_micros()),
        TimeUnit::Nanosecond => dt
            .timestamp_nanos_opt()
            .context(TimeConversionOverflowSnafu {
                column,
                timestamp: dt,
            }),
    }
}

/// Like [`to_raw`], but rounds sub-unit precision up, for an inclusive lower
/// bound that must not admit values before `dt`.
pub(crate) fn to_raw_ceil(dt: DateTime<Utc>, unit: TimeUnit, column: &str) -> Result<i64, TableError> {
    let raw = to_raw(dt, unit, column)?;
    if to_datetime(raw, unit, column)? < dt {
        Ok(raw.saturating_add(1))
    } else {
        Ok(raw)
    }
}
