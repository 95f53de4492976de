//! End-to-end tests of connections, namespaces and versioned tables.
//!
//! These exercise the public engine surface only:
//! - upsert merge and version history when old segments are kept,
//! - metadata commits that leave row data untouched,
//! - deletes, listings and closed connections.
#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::sync::Arc;

use arrow::array::{Array, Float64Array, RecordBatch, TimestampMicrosecondArray};
use arrow::datatypes::{DataType, Field, Schema, TimeUnit};
use chrono::{DateTime, TimeZone, Utc};
use market_store_core::storage::TableLocation;
use market_store_core::{
    Connection, NamespaceError, SizeLimit, TimeRange, UserMetadata, VersionedTable,
};
use tempfile::TempDir;

type TestResult = Result<(), Box<dyn std::error::Error>>;

// =============================================================================
// Test Helpers
// =============================================================================

fn minute(m: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 1, 1, 9, m, 0).unwrap()
}

fn batch(rows: &[(u32, f64)]) -> RecordBatch {
    let schema = Arc::new(Schema::new(vec![
        Field::new(
            "ts",
            DataType::Timestamp(TimeUnit::Microsecond, Some("UTC".into())),
            false,
        ),
        Field::new("price", DataType::Float64, false),
    ]));
    let ts: Vec<i64> = rows.iter().map(|(m, _)| minute(*m).timestamp_micros()).collect();
    let price: Vec<f64> = rows.iter().map(|(_, p)| *p).collect();
    RecordBatch::try_new(
        schema,
        vec![
            Arc::new(TimestampMicrosecondArray::from(ts).with_timezone("UTC")),
            Arc::new(Float64Array::from(price)),
        ],
    )
    .unwrap()
}

fn prices(batch: &RecordBatch) -> Vec<f64> {
    let col = batch.column(1).as_any().downcast_ref::<Float64Array>().unwrap();
    (0..col.len()).map(|i| col.value(i)).collect()
}

fn data_files(tmp: &TempDir, namespace: &str, key: &str) -> usize {
    std::fs::read_dir(tmp.path().join(namespace).join(key).join("data"))
        .map(|dir| dir.count())
        .unwrap_or(0)
}

// =============================================================================
// Tests
// =============================================================================

#[tokio::test]
async fn history_is_readable_without_pruning() -> TestResult {
    let tmp = TempDir::new()?;
    let conn = Connection::open(tmp.path(), SizeLimit::Unlimited).await?;
    let ns = conn.namespace("prices").await?;

    let v1 = ns.upsert("AAA", &batch(&[(0, 1.0), (1, 1.1)]), "ts", false).await?;
    let v2 = ns.upsert("AAA", &batch(&[(1, 2.1), (2, 2.2)]), "ts", false).await?;
    assert_eq!((v1.version, v2.version), (1, 2));
    assert_eq!(v2.replaced_segments, 1);
    assert_eq!(data_files(&tmp, "prices", "AAA"), 2);

    let latest = ns.read("AAA", None).await?.expect("table exists");
    assert_eq!(prices(&latest), vec![1.0, 2.1, 2.2]);

    let old = ns.read_as_of("AAA", 1, None).await?.expect("table exists");
    assert_eq!(prices(&old), vec![1.0, 1.1]);

    let description = ns.describe("AAA").await?.expect("table exists");
    assert_eq!(description.row_count, 3);
    assert_eq!(description.time_range, Some((minute(0), minute(2))));
    assert_eq!(description.columns, vec!["ts".to_string(), "price".to_string()]);
    Ok(())
}

#[tokio::test]
async fn pruning_keeps_one_file_per_merged_span() -> TestResult {
    let tmp = TempDir::new()?;
    let conn = Connection::open(tmp.path(), SizeLimit::Unlimited).await?;
    let ns = conn.namespace("prices").await?;

    ns.upsert("AAA", &batch(&[(0, 1.0), (5, 1.5)]), "ts", true).await?;
    ns.upsert("AAA", &batch(&[(3, 1.3)]), "ts", true).await?;
    ns.upsert("AAA", &batch(&[(30, 3.0)]), "ts", true).await?;
    // The second write overlapped the first; the third is disjoint.
    assert_eq!(data_files(&tmp, "prices", "AAA"), 2);

    let window = TimeRange::new(minute(3), minute(5));
    let rows = ns.read("AAA", Some(window)).await?.expect("table exists");
    assert_eq!(prices(&rows), vec![1.3, 1.5]);
    Ok(())
}

#[tokio::test]
async fn metadata_commits_do_not_touch_rows() -> TestResult {
    let tmp = TempDir::new()?;
    let conn = Connection::open(tmp.path(), SizeLimit::Unlimited).await?;
    let ns = conn.namespace("prices").await?;

    let mut metadata = UserMetadata::new();
    metadata.insert("note".into(), serde_json::json!("hello"));
    let err = ns.write_metadata("AAA", metadata.clone()).await.unwrap_err();
    assert!(matches!(err, NamespaceError::TableNotFound { .. }));
    assert_eq!(ns.read_metadata("AAA").await?, None);

    ns.upsert("AAA", &batch(&[(0, 1.0)]), "ts", true).await?;
    assert_eq!(ns.read_metadata("AAA").await?, None);
    let version = ns.write_metadata("AAA", metadata.clone()).await?;
    assert_eq!(version, 2);
    assert_eq!(ns.read_metadata("AAA").await?, Some(metadata.clone()));

    // Later upserts carry the metadata forward.
    ns.upsert("AAA", &batch(&[(1, 1.1)]), "ts", true).await?;
    assert_eq!(ns.read_metadata("AAA").await?, Some(metadata));
    assert_eq!(ns.describe("AAA").await?.map(|d| d.row_count), Some(2));
    Ok(())
}

#[tokio::test]
async fn delete_and_listing() -> TestResult {
    let tmp = TempDir::new()?;
    let conn = Connection::open(tmp.path(), SizeLimit::Unlimited).await?;
    let ns = conn.namespace("prices").await?;

    for key in ["BBB", "AAA", "CCC"] {
        ns.upsert(key, &batch(&[(0, 1.0)]), "ts", true).await?;
    }
    assert_eq!(ns.list_keys().await?, vec!["AAA", "BBB", "CCC"]);
    assert_eq!(conn.list_namespaces().await?, vec!["prices"]);

    assert!(ns.delete("BBB").await?);
    assert!(!ns.delete("BBB").await?);
    assert!(!ns.exists("BBB").await?);
    assert_eq!(ns.read("BBB", None).await?, None);
    assert_eq!(ns.list_keys().await?, vec!["AAA", "CCC"]);
    assert_eq!(ns.sweep_tombstones().await?, 0);
    Ok(())
}

#[tokio::test]
async fn table_handles_work_without_a_connection() -> TestResult {
    let tmp = TempDir::new()?;
    let table = VersionedTable::new(TableLocation::local(tmp.path().join("t")));
    assert_eq!(table.current_version().await?, 0);
    assert!(table.describe().await?.is_none());

    table.upsert(&batch(&[(2, 2.0), (1, 1.0)]), "ts", true).await?;
    let rows = table.read(None).await?.expect("rows");
    assert_eq!(prices(&rows), vec![1.0, 2.0]);
    Ok(())
}

#[tokio::test]
async fn closed_connection_rejects_work() -> TestResult {
    let tmp = TempDir::new()?;
    let conn = Connection::open(tmp.path(), SizeLimit::Unlimited).await?;
    let ns = conn.namespace("prices").await?;
    conn.close();

    let err = ns.upsert("AAA", &batch(&[(0, 1.0)]), "ts", true).await.unwrap_err();
    assert!(matches!(err, NamespaceError::ConnectionClosed));
    assert!(matches!(
        ns.list_keys().await,
        Err(NamespaceError::ConnectionClosed)
    ));
    Ok(())
}
