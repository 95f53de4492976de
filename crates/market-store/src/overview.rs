//! Overview metadata: the summary persisted next to every series.
//!
//! Metadata is a flat JSON map with `symbol`, `exchange`, optional
//! `interval`, `start`, `end`, `count` and `version`, the table version the
//! summary was computed at. Timestamps are written as
//! `YYYY-MM-DD HH:MM:SS[.ffffff]+HH:MM <IANA zone>`; the fraction only
//! appears when non-zero. The UTC offset pins wall-clock times that occur
//! twice when the zone leaves daylight saving time. Timestamps without an
//! offset are still accepted and resolve to the earlier instant.
use chrono::{DateTime, NaiveDateTime, TimeZone};
use chrono_tz::Tz;
use market_store_core::{TableDescription, UserMetadata};
use serde_json::Value;
use snafu::prelude::*;

use crate::constant::{Exchange, Interval, ParseCodeError};
use crate::key::SeriesKey;
use crate::object::SeriesOverview;

const SYMBOL: &str = "symbol";
const EXCHANGE: &str = "exchange";
const INTERVAL: &str = "interval";
const START: &str = "start";
const END: &str = "end";
const COUNT: &str = "count";
const VERSION: &str = "version";

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f%:z";
const ZONELESS_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

/// Why stored metadata could not be turned into an overview.
#[derive(Debug, Clone, PartialEq, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum OverviewError {
    #[snafu(display("Missing metadata field {field}"))]
    MissingField { field: &'static str },

    #[snafu(display("Metadata field {field} is not a {expected}"))]
    FieldType {
        field: &'static str,
        expected: &'static str,
    },

    #[snafu(display("Metadata field {field}: {source}"))]
    UnknownCode {
        field: &'static str,
        source: ParseCodeError,
    },

    #[snafu(display("Metadata field {field} has an unreadable timestamp {value:?}"))]
    BadTimestamp { field: &'static str, value: String },

    #[snafu(display("Metadata field {field} is {stored:?} but the table key says {expected:?}"))]
    KeyMismatch {
        field: &'static str,
        stored: String,
        expected: String,
    },
}

/// Render `dt` as a metadata timestamp, converted to `tz`.
pub fn format_timestamp<Z: TimeZone>(dt: &DateTime<Z>, tz: Tz) -> String {
    let local = dt.with_timezone(&tz);
    format!("{} {}", local.format(TIMESTAMP_FORMAT), tz.name())
}

/// Parse a metadata timestamp and express it in `tz`.
///
/// The offset, when present, fixes the instant. Otherwise the zone suffix
/// names the zone the wall-clock part was written in, so data saved under
/// another database timezone still reads back as the same instant.
pub fn parse_timestamp(
    field: &'static str,
    value: &str,
    tz: Tz,
) -> Result<DateTime<Tz>, OverviewError> {
    let bad = || BadTimestampSnafu { field, value }.build();
    let (wall, zone) = value.rsplit_once(' ').ok_or_else(bad)?;
    let zone: Tz = zone.parse().map_err(|_| bad())?;
    if let Ok(fixed) = DateTime::parse_from_str(wall, TIMESTAMP_FORMAT) {
        return Ok(fixed.with_timezone(&tz));
    }
    let naive =
        NaiveDateTime::parse_from_str(wall, ZONELESS_TIMESTAMP_FORMAT).map_err(|_| bad())?;
    let stored = zone.from_local_datetime(&naive).earliest().ok_or_else(bad)?;
    Ok(stored.with_timezone(&tz))
}

/// Summary of `key` from its table description; `None` when it has no rows.
pub fn from_description(
    key: &SeriesKey,
    description: &TableDescription,
    tz: Tz,
) -> Option<SeriesOverview> {
    let (start, end) = description.time_range?;
    Some(SeriesOverview {
        symbol: key.symbol().to_string(),
        exchange: key.exchange(),
        interval: key.interval(),
        start: start.with_timezone(&tz),
        end: end.with_timezone(&tz),
        count: description.row_count,
    })
}

/// Metadata map persisted for `overview`, computed at table `version`.
pub fn encode(overview: &SeriesOverview, version: u64, tz: Tz) -> UserMetadata {
    let mut metadata = UserMetadata::new();
    metadata.insert(SYMBOL.into(), Value::from(overview.symbol.as_str()));
    metadata.insert(EXCHANGE.into(), Value::from(overview.exchange.as_str()));
    if let Some(interval) = overview.interval {
        metadata.insert(INTERVAL.into(), Value::from(interval.as_str()));
    }
    metadata.insert(START.into(), Value::from(format_timestamp(&overview.start, tz)));
    metadata.insert(END.into(), Value::from(format_timestamp(&overview.end, tz)));
    metadata.insert(COUNT.into(), Value::from(overview.count));
    metadata.insert(VERSION.into(), Value::from(version));
    metadata
}

/// Whether `metadata` was written at or after the table's last data change.
///
/// Metadata without a readable `version` is never current.
pub fn is_current(metadata: &UserMetadata, data_version: u64) -> bool {
    metadata
        .get(VERSION)
        .and_then(Value::as_u64)
        .is_some_and(|version| version >= data_version)
}

fn str_field<'a>(metadata: &'a UserMetadata, field: &'static str) -> Result<&'a str, OverviewError> {
    metadata
        .get(field)
        .context(MissingFieldSnafu { field })?
        .as_str()
        .context(FieldTypeSnafu {
            field,
            expected: "string",
        })
}

fn ensure_matches(field: &'static str, stored: &str, expected: &str) -> Result<(), OverviewError> {
    ensure!(
        stored == expected,
        KeyMismatchSnafu {
            field,
            stored,
            expected,
        }
    );
    Ok(())
}

/// Read the overview of `key` back from its metadata.
///
/// Identity fields must agree with `key`; anything else is treated as
/// malformed so callers can fall back to the table description.
pub fn decode(
    key: &SeriesKey,
    metadata: &UserMetadata,
    tz: Tz,
) -> Result<SeriesOverview, OverviewError> {
    let symbol = str_field(metadata, SYMBOL)?;
    ensure_matches(SYMBOL, symbol, key.symbol())?;

    let exchange: Exchange = str_field(metadata, EXCHANGE)?
        .parse()
        .context(UnknownCodeSnafu { field: EXCHANGE })?;
    ensure_matches(EXCHANGE, exchange.as_str(), key.exchange().as_str())?;

    let interval = match key.interval() {
        Some(expected) => {
            let interval: Interval = str_field(metadata, INTERVAL)?
                .parse()
                .context(UnknownCodeSnafu { field: INTERVAL })?;
            ensure_matches(INTERVAL, interval.as_str(), expected.as_str())?;
            Some(interval)
        }
        None => None,
    };

    let start = parse_timestamp(START, str_field(metadata, START)?, tz)?;
    let end = parse_timestamp(END, str_field(metadata, END)?, tz)?;
    let count = metadata
        .get(COUNT)
        .context(MissingFieldSnafu { field: COUNT })?
        .as_u64()
        .context(FieldTypeSnafu {
            field: COUNT,
            expected: "non-negative integer",
        })?;

    Ok(SeriesOverview {
        symbol: symbol.to_string(),
        exchange,
        interval,
        start,
        end,
        count,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use chrono_tz::America::New_York;
    use chrono_tz::Asia::Shanghai;
    use serde_json::json;

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    fn bar_key() -> SeriesKey {
        SeriesKey::bar("IF2401", Exchange::Cffex, Interval::Minute).unwrap()
    }

    fn overview() -> SeriesOverview {
        SeriesOverview {
            symbol: "IF2401".into(),
            exchange: Exchange::Cffex,
            interval: Some(Interval::Minute),
            start: Shanghai.with_ymd_and_hms(2024, 1, 2, 9, 30, 0).unwrap(),
            end: Shanghai.with_ymd_and_hms(2024, 1, 2, 9, 32, 0).unwrap(),
            count: 3,
        }
    }

    #[test]
    fn timestamps_carry_offset_and_zone() {
        let dt = Shanghai.with_ymd_and_hms(2024, 1, 2, 9, 30, 0).unwrap();
        assert_eq!(format_timestamp(&dt, Shanghai), "2024-01-02 09:30:00+08:00 Asia/Shanghai");
    }

    #[test]
    fn timestamps_without_offset_still_parse() -> TestResult {
        let parsed = parse_timestamp(START, "2024-01-02 09:30:00 Asia/Shanghai", Shanghai)?;
        assert_eq!(parsed, Shanghai.with_ymd_and_hms(2024, 1, 2, 9, 30, 0).unwrap());
        Ok(())
    }

    #[test]
    fn repeated_wall_clock_hour_keeps_its_instant() -> TestResult {
        // 01:30 happens twice in New York on 2024-11-03: EDT, then EST.
        let edt = Utc.with_ymd_and_hms(2024, 11, 3, 5, 30, 0).unwrap();
        let est = Utc.with_ymd_and_hms(2024, 11, 3, 6, 30, 0).unwrap();

        let edt_text = format_timestamp(&edt, New_York);
        let est_text = format_timestamp(&est, New_York);
        assert_eq!(edt_text, "2024-11-03 01:30:00-04:00 America/New_York");
        assert_eq!(est_text, "2024-11-03 01:30:00-05:00 America/New_York");
        assert_eq!(parse_timestamp(END, &edt_text, New_York)?, edt);
        assert_eq!(parse_timestamp(END, &est_text, New_York)?, est);

        let mut summary = overview();
        summary.start = Utc.with_ymd_and_hms(2024, 11, 3, 5, 0, 0).unwrap().with_timezone(&New_York);
        summary.end = est.with_timezone(&New_York);
        let decoded = decode(&bar_key(), &encode(&summary, 1, New_York), New_York)?;
        assert_eq!(decoded.end, est);
        assert_eq!(decoded, summary);
        Ok(())
    }

    #[test]
    fn sub_second_timestamps_roundtrip() -> TestResult {
        let dt = Utc.timestamp_micros(1_704_159_000_250_000).unwrap();
        let text = format_timestamp(&dt, Shanghai);
        assert!(text.contains(".25"), "{text}");
        assert_eq!(parse_timestamp(START, &text, Shanghai)?, dt);
        Ok(())
    }

    #[test]
    fn foreign_zone_is_converted() -> TestResult {
        let parsed = parse_timestamp(START, "2024-01-02 01:30:00 UTC", Shanghai)?;
        assert_eq!(parsed, Shanghai.with_ymd_and_hms(2024, 1, 2, 9, 30, 0).unwrap());
        Ok(())
    }

    #[test]
    fn encode_then_decode() -> TestResult {
        let metadata = encode(&overview(), 4, Shanghai);
        assert_eq!(metadata.get(COUNT), Some(&json!(3)));
        assert_eq!(metadata.get(INTERVAL), Some(&json!("1m")));
        assert_eq!(metadata.get(VERSION), Some(&json!(4)));
        assert_eq!(decode(&bar_key(), &metadata, Shanghai)?, overview());
        Ok(())
    }

    #[test]
    fn tick_metadata_has_no_interval() -> TestResult {
        let key = SeriesKey::tick("IF2401", Exchange::Cffex)?;
        let mut tick = overview();
        tick.interval = None;
        let metadata = encode(&tick, 1, Shanghai);
        assert!(!metadata.contains_key(INTERVAL));
        assert_eq!(decode(&key, &metadata, Shanghai)?, tick);
        Ok(())
    }

    #[test]
    fn malformed_metadata_is_rejected() {
        let good = encode(&overview(), 1, Shanghai);

        let mut missing = good.clone();
        missing.remove(END);
        assert_eq!(
            decode(&bar_key(), &missing, Shanghai),
            Err(OverviewError::MissingField { field: END })
        );

        let mut garbled = good.clone();
        garbled.insert(START.into(), json!("yesterday"));
        assert!(matches!(
            decode(&bar_key(), &garbled, Shanghai),
            Err(OverviewError::BadTimestamp { .. })
        ));

        let mut negative = good.clone();
        negative.insert(COUNT.into(), json!(-1));
        assert!(matches!(
            decode(&bar_key(), &negative, Shanghai),
            Err(OverviewError::FieldType { .. })
        ));

        let mut other = good;
        other.insert(INTERVAL.into(), json!("d"));
        assert!(matches!(
            decode(&bar_key(), &other, Shanghai),
            Err(OverviewError::KeyMismatch { .. })
        ));
    }

    #[test]
    fn metadata_older_than_the_data_is_not_current() {
        let metadata = encode(&overview(), 3, Shanghai);
        assert!(is_current(&metadata, 3));
        assert!(is_current(&metadata, 2));
        assert!(!is_current(&metadata, 4));

        let mut unversioned = metadata;
        unversioned.remove(VERSION);
        assert!(!is_current(&unversioned, 1));
    }

    #[test]
    fn empty_description_has_no_overview() {
        let description = TableDescription {
            version: 1,
            data_version: 1,
            row_count: 0,
            time_range: None,
            columns: vec![],
        };
        assert!(from_description(&bar_key(), &description, Shanghai).is_none());
    }
}
