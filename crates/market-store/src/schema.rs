//! Columnar layouts of the stored record types.
//!
//! Each record type has a [`RecordSchema`] that fixes its namespace, its
//! Arrow schema and the conversion between typed records and
//! `RecordBatch`es. Every layout is indexed by [`TIME_COLUMN`], stored as
//! UTC microseconds; records are re-localized to the database timezone on
//! the way out.
use arrow::array::{Array, ArrayRef, Float64Array, RecordBatch, TimestampMicrosecondArray};
use arrow::datatypes::{DataType, Field, SchemaRef, TimeUnit};
use arrow::error::ArrowError;
use chrono::DateTime;
use chrono_tz::Tz;
use snafu::prelude::*;
use std::sync::Arc;

use crate::key::{KeyError, SeriesKey};

mod bar;
mod tick;

pub use bar::BarSchema;
pub use tick::TickSchema;

/// Name of the index column of every stored table.
pub const TIME_COLUMN: &str = "datetime";

/// Timezone attached to the stored index column.
pub(crate) const STORAGE_TZ: &str = "UTC";

/// Errors converting between records and Arrow batches.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum RecordError {
    /// A column the layout needs is absent from the batch.
    #[snafu(display("Missing column {column}"))]
    MissingColumn { column: String },

    /// A column has a different Arrow type than the layout declares.
    #[snafu(display("Column {column} has type {actual:?}, expected {expected:?}"))]
    ColumnType {
        column: String,
        expected: DataType,
        actual: DataType,
    },

    /// A non-nullable column holds a null.
    #[snafu(display("Null value in column {column} at row {row}"))]
    NullValue { column: String, row: usize },

    /// A stored timestamp cannot be represented as a date-time.
    #[snafu(display("Timestamp {micros}us in column {column} is out of range"))]
    TimestampOutOfRange { column: String, micros: i64 },

    /// Bar rows were requested for a key without an interval.
    #[snafu(display("Series {key} has no interval"))]
    MissingInterval { key: String },

    /// Arrow rejected the assembled columns.
    #[snafu(display("Arrow error: {source}"))]
    Arrow {
        source: ArrowError,
        backtrace: snafu::Backtrace,
    },
}

/// Typed record layout stored in one namespace.
pub trait RecordSchema: Send + Sync + 'static {
    /// The record type.
    type Record: Clone + Send + Sync + 'static;

    /// Namespace holding every series of this record type.
    const NAMESPACE: &'static str;

    /// Whether keys of this record type carry an interval.
    const HAS_INTERVAL: bool;

    /// Storage key of the series `record` belongs to.
    fn series_key(record: &Self::Record) -> Result<SeriesKey, KeyError>;

    /// Arrow schema of stored tables.
    fn arrow_schema() -> SchemaRef;

    /// One row per record, in input order.
    fn to_batch(records: &[Self::Record]) -> Result<RecordBatch, RecordError>;

    /// Rebuild records from stored rows, filling identity fields from `key`.
    fn from_batch(
        batch: &RecordBatch,
        key: &SeriesKey,
        tz: Tz,
    ) -> Result<Vec<Self::Record>, RecordError>;
}

/// A float column: its name plus how to read and write it on a record.
pub(crate) struct FloatField<R> {
    pub name: &'static str,
    pub get: fn(&R) -> f64,
    pub set: fn(&mut R, f64),
}

pub(crate) fn time_field() -> Field {
    Field::new(
        TIME_COLUMN,
        DataType::Timestamp(TimeUnit::Microsecond, Some(STORAGE_TZ.into())),
        false,
    )
}

pub(crate) fn float_fields<R>(fields: &[FloatField<R>]) -> impl Iterator<Item = Field> + '_ {
    fields
        .iter()
        .map(|f| Field::new(f.name, DataType::Float64, false))
}

pub(crate) fn time_array<R>(records: &[R], get: impl Fn(&R) -> DateTime<Tz>) -> ArrayRef {
    let values: Vec<i64> = records.iter().map(|r| get(r).timestamp_micros()).collect();
    Arc::new(TimestampMicrosecondArray::from(values).with_timezone(STORAGE_TZ))
}

pub(crate) fn float_arrays<R>(records: &[R], fields: &[FloatField<R>]) -> Vec<ArrayRef> {
    fields
        .iter()
        .map(|f| {
            let values: Vec<f64> = records.iter().map(f.get).collect();
            Arc::new(Float64Array::from(values)) as ArrayRef
        })
        .collect()
}

/// Typed view of column `name`.
pub(crate) fn column<'a, A: Array + 'static>(
    batch: &'a RecordBatch,
    name: &str,
    expected: DataType,
) -> Result<&'a A, RecordError> {
    let col = batch
        .column_by_name(name)
        .context(MissingColumnSnafu { column: name })?;
    col.as_any().downcast_ref::<A>().context(ColumnTypeSnafu {
        column: name,
        expected,
        actual: col.data_type().clone(),
    })
}

/// Typed view of a column that must not contain nulls.
pub(crate) fn required_column<'a, A: Array + 'static>(
    batch: &'a RecordBatch,
    name: &str,
    expected: DataType,
) -> Result<&'a A, RecordError> {
    let arr = column::<A>(batch, name, expected)?;
    if arr.null_count() > 0 {
        let row = (0..arr.len()).find(|&i| arr.is_null(i)).unwrap_or_default();
        return NullValueSnafu { column: name, row }.fail();
    }
    Ok(arr)
}

pub(crate) fn time_values(batch: &RecordBatch) -> Result<&TimestampMicrosecondArray, RecordError> {
    required_column(
        batch,
        TIME_COLUMN,
        DataType::Timestamp(TimeUnit::Microsecond, Some(STORAGE_TZ.into())),
    )
}

pub(crate) fn float_columns<'a, R>(
    batch: &'a RecordBatch,
    fields: &[FloatField<R>],
) -> Result<Vec<&'a Float64Array>, RecordError> {
    fields
        .iter()
        .map(|f| required_column(batch, f.name, DataType::Float64))
        .collect()
}

/// Convert stored UTC microseconds to a date-time in `tz`.
pub(crate) fn localize(column: &str, micros: i64, tz: Tz) -> Result<DateTime<Tz>, RecordError> {
    DateTime::from_timestamp_micros(micros)
        .map(|utc| utc.with_timezone(&tz))
        .context(TimestampOutOfRangeSnafu { column, micros })
}

#[cfg(test)]
pub(crate) mod test_support {
    use chrono::{DateTime, NaiveDate, TimeZone};
    use chrono_tz::Tz;

    use crate::constant::{Exchange, Interval};
    use crate::object::{BarData, TickData};

    pub fn shanghai(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Tz> {
        chrono_tz::Asia::Shanghai
            .with_ymd_and_hms(y, mo, d, h, mi, s)
            .single()
            .expect("unambiguous local time")
    }

    pub fn bar(dt: DateTime<Tz>, close: f64) -> BarData {
        BarData {
            symbol: "IF2401".into(),
            exchange: Exchange::Cffex,
            datetime: dt,
            interval: Interval::Minute,
            volume: 100.0,
            turnover: 1_000.0,
            open_interest: 50.0,
            open_price: close - 0.1,
            high_price: close + 0.2,
            low_price: close - 0.2,
            close_price: close,
            gateway_name: "CTP".into(),
        }
    }

    pub fn tick(dt: DateTime<Tz>, last: f64) -> TickData {
        TickData {
            symbol: "rb2405".into(),
            exchange: Exchange::Shfe,
            datetime: dt,
            name: "rebar".into(),
            volume: 10.0,
            turnover: 100.0,
            open_interest: 5.0,
            last_price: last,
            last_volume: 1.0,
            limit_up: last * 1.1,
            limit_down: last * 0.9,
            open_price: last,
            high_price: last,
            low_price: last,
            pre_close: last,
            bid_price_1: last - 1.0,
            bid_price_2: last - 2.0,
            bid_price_3: last - 3.0,
            bid_price_4: last - 4.0,
            bid_price_5: last - 5.0,
            ask_price_1: last + 1.0,
            ask_price_2: last + 2.0,
            ask_price_3: last + 3.0,
            ask_price_4: last + 4.0,
            ask_price_5: last + 5.0,
            bid_volume_1: 1.0,
            bid_volume_2: 2.0,
            bid_volume_3: 3.0,
            bid_volume_4: 4.0,
            bid_volume_5: 5.0,
            ask_volume_1: 6.0,
            ask_volume_2: 7.0,
            ask_volume_3: 8.0,
            ask_volume_4: 9.0,
            ask_volume_5: 10.0,
            localtime: NaiveDate::from_ymd_opt(2024, 1, 2)
                .and_then(|d| d.and_hms_milli_opt(9, 30, 0, 500)),
            gateway_name: "CTP".into(),
        }
    }
}
