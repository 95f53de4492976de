//! Bar layout: `datetime` plus seven float columns.
use std::sync::Arc;

use arrow::array::RecordBatch;
use arrow::datatypes::{Schema, SchemaRef};
use chrono_tz::Tz;
use snafu::prelude::*;

use crate::key::{KeyError, SeriesKey};
use crate::object::{BarData, DB_GATEWAY};
use crate::schema::{
    ArrowSnafu, FloatField, MissingIntervalSnafu, RecordError, RecordSchema, TIME_COLUMN,
    float_arrays, float_columns, float_fields, localize, time_array, time_field, time_values,
};

const BAR_FIELDS: &[FloatField<BarData>] = &[
    FloatField {
        name: "open_price",
        get: |b| b.open_price,
        set: |b, v| b.open_price = v,
    },
    FloatField {
        name: "high_price",
        get: |b| b.high_price,
        set: |b, v| b.high_price = v,
    },
    FloatField {
        name: "low_price",
        get: |b| b.low_price,
        set: |b, v| b.low_price = v,
    },
    FloatField {
        name: "close_price",
        get: |b| b.close_price,
        set: |b, v| b.close_price = v,
    },
    FloatField {
        name: "volume",
        get: |b| b.volume,
        set: |b, v| b.volume = v,
    },
    FloatField {
        name: "turnover",
        get: |b| b.turnover,
        set: |b, v| b.turnover = v,
    },
    FloatField {
        name: "open_interest",
        get: |b| b.open_interest,
        set: |b, v| b.open_interest = v,
    },
];

/// Layout of the `bar_data` namespace.
#[derive(Debug, Clone, Copy, Default)]
pub struct BarSchema;

impl RecordSchema for BarSchema {
    type Record = BarData;

    const NAMESPACE: &'static str = "bar_data";
    const HAS_INTERVAL: bool = true;

    fn series_key(record: &BarData) -> Result<SeriesKey, KeyError> {
        SeriesKey::bar(record.symbol.as_str(), record.exchange, record.interval)
    }

    fn arrow_schema() -> SchemaRef {
        let fields = std::iter::once(time_field()).chain(float_fields(BAR_FIELDS));
        Arc::new(Schema::new(fields.collect::<Vec<_>>()))
    }

    fn to_batch(records: &[BarData]) -> Result<RecordBatch, RecordError> {
        let mut columns = vec![time_array(records, |b| b.datetime)];
        columns.extend(float_arrays(records, BAR_FIELDS));
        RecordBatch::try_new(Self::arrow_schema(), columns).context(ArrowSnafu)
    }

    fn from_batch(
        batch: &RecordBatch,
        key: &SeriesKey,
        tz: Tz,
    ) -> Result<Vec<BarData>, RecordError> {
        let times = time_values(batch)?;
        let floats = float_columns(batch, BAR_FIELDS)?;
        let interval = key.interval().context(MissingIntervalSnafu {
            key: key.table_name(),
        })?;

        let mut bars = Vec::with_capacity(batch.num_rows());
        for row in 0..batch.num_rows() {
            let mut bar = BarData {
                symbol: key.symbol().to_string(),
                exchange: key.exchange(),
                datetime: localize(TIME_COLUMN, times.value(row), tz)?,
                interval,
                volume: 0.0,
                turnover: 0.0,
                open_interest: 0.0,
                open_price: 0.0,
                high_price: 0.0,
                low_price: 0.0,
                close_price: 0.0,
                gateway_name: DB_GATEWAY.to_string(),
            };
            for (field, values) in BAR_FIELDS.iter().zip(&floats) {
                (field.set)(&mut bar, values.value(row));
            }
            bars.push(bar);
        }
        Ok(bars)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constant::{Exchange, Interval};
    use crate::schema::test_support::{bar, shanghai};

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    #[test]
    fn batch_stores_utc_micros() -> TestResult {
        let bars = vec![bar(shanghai(2024, 1, 2, 9, 30, 0), 10.0)];
        let batch = BarSchema::to_batch(&bars)?;
        assert_eq!(batch.num_rows(), 1);
        assert_eq!(batch.schema().field(0).name(), TIME_COLUMN);

        let times = time_values(&batch)?;
        // 09:30 Shanghai is 01:30 UTC.
        let expected = chrono::DateTime::parse_from_rfc3339("2024-01-02T01:30:00Z")?;
        assert_eq!(times.value(0), expected.timestamp_micros());
        Ok(())
    }

    #[test]
    fn rows_rebuild_into_records() -> TestResult {
        let bars = vec![
            bar(shanghai(2024, 1, 2, 9, 30, 0), 10.0),
            bar(shanghai(2024, 1, 2, 9, 31, 0), 10.1),
        ];
        let batch = BarSchema::to_batch(&bars)?;
        let key = SeriesKey::bar("IF2401", Exchange::Cffex, Interval::Minute)?;
        let back = BarSchema::from_batch(&batch, &key, chrono_tz::Asia::Shanghai)?;

        assert_eq!(back.len(), 2);
        for (orig, got) in bars.iter().zip(&back) {
            assert_eq!(got.datetime, orig.datetime);
            assert_eq!(got.close_price, orig.close_price);
            assert_eq!(got.open_interest, orig.open_interest);
            assert_eq!(got.gateway_name, DB_GATEWAY);
        }
        Ok(())
    }

    #[test]
    fn missing_column_is_reported() -> TestResult {
        let batch = BarSchema::to_batch(&[bar(shanghai(2024, 1, 2, 9, 30, 0), 10.0)])?;
        let trimmed = batch.project(&[0, 1])?;
        let key = SeriesKey::bar("IF2401", Exchange::Cffex, Interval::Minute)?;
        let err = BarSchema::from_batch(&trimmed, &key, chrono_tz::UTC).unwrap_err();
        assert!(matches!(err, RecordError::MissingColumn { .. }));
        Ok(())
    }
}
