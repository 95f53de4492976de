//! Tick layout: `datetime`, the instrument name, 31 float columns and the
//! gateway's local receive time.
use std::sync::Arc;

use arrow::array::{Array, ArrayRef, RecordBatch, StringArray, TimestampMicrosecondArray};
use arrow::datatypes::{DataType, Field, Schema, SchemaRef, TimeUnit};
use chrono::DateTime;
use chrono_tz::Tz;
use snafu::prelude::*;

use crate::key::{KeyError, SeriesKey};
use crate::object::{DB_GATEWAY, TickData};
use crate::schema::{
    ArrowSnafu, FloatField, RecordError, RecordSchema, TIME_COLUMN, TimestampOutOfRangeSnafu,
    column, float_arrays, float_columns, float_fields, localize, required_column, time_array,
    time_field, time_values,
};

const NAME_COLUMN: &str = "name";
const LOCALTIME_COLUMN: &str = "localtime";

macro_rules! float_field {
    ($name:ident) => {
        FloatField {
            name: stringify!($name),
            get: |t: &TickData| t.$name,
            set: |t: &mut TickData, v| t.$name = v,
        }
    };
}

const TICK_FIELDS: &[FloatField<TickData>] = &[
    float_field!(volume),
    float_field!(turnover),
    float_field!(open_interest),
    float_field!(last_price),
    float_field!(last_volume),
    float_field!(limit_up),
    float_field!(limit_down),
    float_field!(open_price),
    float_field!(high_price),
    float_field!(low_price),
    float_field!(pre_close),
    float_field!(bid_price_1),
    float_field!(bid_price_2),
    float_field!(bid_price_3),
    float_field!(bid_price_4),
    float_field!(bid_price_5),
    float_field!(ask_price_1),
    float_field!(ask_price_2),
    float_field!(ask_price_3),
    float_field!(ask_price_4),
    float_field!(ask_price_5),
    float_field!(bid_volume_1),
    float_field!(bid_volume_2),
    float_field!(bid_volume_3),
    float_field!(bid_volume_4),
    float_field!(bid_volume_5),
    float_field!(ask_volume_1),
    float_field!(ask_volume_2),
    float_field!(ask_volume_3),
    float_field!(ask_volume_4),
    float_field!(ask_volume_5),
];

/// Layout of the `tick_data` namespace.
#[derive(Debug, Clone, Copy, Default)]
pub struct TickSchema;

impl RecordSchema for TickSchema {
    type Record = TickData;

    const NAMESPACE: &'static str = "tick_data";
    const HAS_INTERVAL: bool = false;

    fn series_key(record: &TickData) -> Result<SeriesKey, KeyError> {
        SeriesKey::tick(record.symbol.as_str(), record.exchange)
    }

    fn arrow_schema() -> SchemaRef {
        let mut fields = vec![time_field(), Field::new(NAME_COLUMN, DataType::Utf8, false)];
        fields.extend(float_fields(TICK_FIELDS));
        fields.push(Field::new(
            LOCALTIME_COLUMN,
            DataType::Timestamp(TimeUnit::Microsecond, None),
            true,
        ));
        Arc::new(Schema::new(fields))
    }

    fn to_batch(records: &[TickData]) -> Result<RecordBatch, RecordError> {
        let names: StringArray = records.iter().map(|t| Some(t.name.as_str())).collect();
        let localtimes: TimestampMicrosecondArray = records
            .iter()
            .map(|t| t.localtime.map(|lt| lt.and_utc().timestamp_micros()))
            .collect();

        let mut columns = vec![
            time_array(records, |t| t.datetime),
            Arc::new(names) as ArrayRef,
        ];
        columns.extend(float_arrays(records, TICK_FIELDS));
        columns.push(Arc::new(localtimes));
        RecordBatch::try_new(Self::arrow_schema(), columns).context(ArrowSnafu)
    }

    fn from_batch(
        batch: &RecordBatch,
        key: &SeriesKey,
        tz: Tz,
    ) -> Result<Vec<TickData>, RecordError> {
        let times = time_values(batch)?;
        let names = required_column::<StringArray>(batch, NAME_COLUMN, DataType::Utf8)?;
        let floats = float_columns(batch, TICK_FIELDS)?;
        let localtimes = column::<TimestampMicrosecondArray>(
            batch,
            LOCALTIME_COLUMN,
            DataType::Timestamp(TimeUnit::Microsecond, None),
        )?;

        let mut ticks = Vec::with_capacity(batch.num_rows());
        for row in 0..batch.num_rows() {
            let localtime = if localtimes.is_null(row) {
                None
            } else {
                let micros = localtimes.value(row);
                let lt = DateTime::from_timestamp_micros(micros).context(
                    TimestampOutOfRangeSnafu {
                        column: LOCALTIME_COLUMN,
                        micros,
                    },
                )?;
                Some(lt.naive_utc())
            };

            let mut tick = TickData {
                symbol: key.symbol().to_string(),
                exchange: key.exchange(),
                datetime: localize(TIME_COLUMN, times.value(row), tz)?,
                name: names.value(row).to_string(),
                volume: 0.0,
                turnover: 0.0,
                open_interest: 0.0,
                last_price: 0.0,
                last_volume: 0.0,
                limit_up: 0.0,
                limit_down: 0.0,
                open_price: 0.0,
                high_price: 0.0,
                low_price: 0.0,
                pre_close: 0.0,
                bid_price_1: 0.0,
                bid_price_2: 0.0,
                bid_price_3: 0.0,
                bid_price_4: 0.0,
                bid_price_5: 0.0,
                ask_price_1: 0.0,
                ask_price_2: 0.0,
                ask_price_3: 0.0,
                ask_price_4: 0.0,
                ask_price_5: 0.0,
                bid_volume_1: 0.0,
                bid_volume_2: 0.0,
                bid_volume_3: 0.0,
                bid_volume_4: 0.0,
                bid_volume_5: 0.0,
                ask_volume_1: 0.0,
                ask_volume_2: 0.0,
                ask_volume_3: 0.0,
                ask_volume_4: 0.0,
                ask_volume_5: 0.0,
                localtime,
                gateway_name: DB_GATEWAY.to_string(),
            };
            for (field, values) in TICK_FIELDS.iter().zip(&floats) {
                (field.set)(&mut tick, values.value(row));
            }
            ticks.push(tick);
        }
        Ok(ticks)
    }
}
