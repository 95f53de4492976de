//! Series stores: typed records over one engine namespace.
//!
//! A [`SeriesStore`] owns the write path (derive key, upsert, refresh the
//! overview metadata), range loads, deletes and overview enumeration for
//! one record layout. [`BarStore`] and [`TickStore`] are its two
//! instantiations.
use std::marker::PhantomData;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use market_store_core::{Connection, Namespace, TimeRange};
use snafu::prelude::*;

use crate::error::{
    ConnectionSnafu, EmptyBatchSnafu, EngineSnafu, KeySnafu, MixedBatchSnafu, OverviewSnafu,
    PartialWriteFailureSnafu, RecordSnafu, StoreResult,
};
use crate::key::SeriesKey;
use crate::object::SeriesOverview;
use crate::overview;
use crate::schema::{BarSchema, RecordSchema, TIME_COLUMN, TickSchema};

/// Store of bar series.
pub type BarStore = SeriesStore<BarSchema>;
/// Store of tick series.
pub type TickStore = SeriesStore<TickSchema>;

/// Every series of one record layout.
#[derive(Debug, Clone)]
pub struct SeriesStore<S: RecordSchema> {
    namespace: Namespace,
    tz: Tz,
    _schema: PhantomData<fn() -> S>,
}

impl<S: RecordSchema> SeriesStore<S> {
    /// Open the store's namespace on `connection`, creating it if needed.
    ///
    /// Loaded records and overviews are expressed in `tz`.
    pub async fn open(connection: &Connection, tz: Tz) -> StoreResult<Self> {
        let namespace = connection
            .namespace(S::NAMESPACE)
            .await
            .context(ConnectionSnafu)?;
        Ok(Self {
            namespace,
            tz,
            _schema: PhantomData,
        })
    }

    pub fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    pub fn timezone(&self) -> Tz {
        self.tz
    }

    /// Upsert `records` into their series and refresh its overview.
    ///
    /// All records must belong to the same series. Rows with an existing
    /// timestamp replace the stored row; within the batch the later record
    /// wins. Replaced data files are pruned once the new version commits.
    pub async fn save(&self, records: &[S::Record]) -> StoreResult<bool> {
        let Some((first, rest)) = records.split_first() else {
            return EmptyBatchSnafu.fail();
        };
        let key = S::series_key(first).context(KeySnafu)?;
        for record in rest {
            let other = S::series_key(record).context(KeySnafu)?;
            ensure!(
                other == key,
                MixedBatchSnafu {
                    first: key.table_name(),
                    other: other.table_name(),
                }
            );
        }

        let table = key.table_name();
        let batch = S::to_batch(records).context(RecordSnafu { table: &table })?;
        let outcome = self
            .namespace
            .upsert(&table, &batch, TIME_COLUMN, true)
            .await
            .context(EngineSnafu)?;
        log::debug!(
            "saved {} rows to {}/{table} at version {} ({} segments replaced)",
            records.len(),
            S::NAMESPACE,
            outcome.version,
            outcome.replaced_segments,
        );

        // The description comes from the committed state, so the overview
        // covers every row of the series, not just this batch.
        let Some(summary) = overview::from_description(&key, &outcome.description, self.tz) else {
            return Ok(true);
        };
        let metadata = overview::encode(&summary, outcome.description.data_version, self.tz);
        self.namespace
            .write_metadata(&table, metadata)
            .await
            .context(PartialWriteFailureSnafu {
                table: &table,
                version: outcome.version,
            })?;
        Ok(true)
    }

    /// Records of `key` with `start <= datetime <= end`, sorted by time.
    ///
    /// A missing series or an inverted range yields no records.
    pub async fn load(
        &self,
        key: &SeriesKey,
        start: DateTime<Tz>,
        end: DateTime<Tz>,
    ) -> StoreResult<Vec<S::Record>> {
        if start > end {
            return Ok(Vec::new());
        }
        let range = TimeRange::new(start.with_timezone(&Utc), end.with_timezone(&Utc));
        let table = key.table_name();
        let Some(batch) = self
            .namespace
            .read(&table, Some(range))
            .await
            .context(EngineSnafu)?
        else {
            return Ok(Vec::new());
        };
        S::from_batch(&batch, key, self.tz).context(RecordSnafu { table })
    }

    /// Remove the series `key`; returns how many rows it held.
    pub async fn delete(&self, key: &SeriesKey) -> StoreResult<u64> {
        let table = key.table_name();
        let count = self
            .namespace
            .describe(&table)
            .await
            .context(EngineSnafu)?
            .map_or(0, |d| d.row_count);
        let removed = self.namespace.delete(&table).await.context(EngineSnafu)?;
        log::debug!("deleted {}/{table} ({count} rows)", S::NAMESPACE);
        Ok(if removed { count } else { 0 })
    }

    /// One overview per stored series.
    ///
    /// Stored metadata is used when it was written at or after the table's
    /// last data commit. Missing, unreadable or outdated metadata is
    /// replaced by a summary of the table description, which only replays
    /// the log. Tables that are not series of this store, or hold no rows,
    /// are left out.
    pub async fn get_overview(&self) -> StoreResult<Vec<SeriesOverview>> {
        let mut overviews = Vec::new();
        for table in self.namespace.list_keys().await.context(EngineSnafu)? {
            let key = match SeriesKey::parse_table_name(&table) {
                Ok(key) if key.interval().is_some() == S::HAS_INTERVAL => key,
                Ok(_) => {
                    log::warn!("skipping {table}: not a {} series", S::NAMESPACE);
                    continue;
                }
                Err(e) => {
                    log::warn!("skipping {table}: {e}");
                    continue;
                }
            };

            let Some(description) = self.namespace.describe(&table).await.context(EngineSnafu)?
            else {
                continue;
            };

            let stored = match self
                .namespace
                .read_metadata(&table)
                .await
                .context(EngineSnafu)?
            {
                Some(metadata) => match overview::decode(&key, &metadata, self.tz) {
                    Ok(summary) if overview::is_current(&metadata, description.data_version) => {
                        Some(summary)
                    }
                    Ok(_) => {
                        log::warn!(
                            "overview for {table} predates version {}, recomputing",
                            description.data_version
                        );
                        None
                    }
                    Err(e) => {
                        log::warn!("malformed overview for {table}, recomputing: {e}");
                        None
                    }
                },
                None => {
                    log::warn!("no overview stored for {table}, recomputing");
                    None
                }
            };

            let summary =
                stored.or_else(|| overview::from_description(&key, &description, self.tz));
            match summary {
                Some(summary) => overviews.push(summary),
                None => log::warn!("skipping {table}: no rows"),
            }
        }
        Ok(overviews)
    }

    /// The stored overview of `key`, without any fallback.
    ///
    /// `None` when the series or its metadata does not exist.
    pub async fn overview_for(&self, key: &SeriesKey) -> StoreResult<Option<SeriesOverview>> {
        let table = key.table_name();
        let Some(metadata) = self
            .namespace
            .read_metadata(&table)
            .await
            .context(EngineSnafu)?
        else {
            return Ok(None);
        };
        overview::decode(key, &metadata, self.tz)
            .map(Some)
            .context(OverviewSnafu { table })
    }

    /// Recompute the overview of `key` from its table and persist it.
    ///
    /// Used after a [`crate::StoreError::PartialWriteFailure`]. Returns the
    /// fresh overview, or `None` when the series is missing or empty.
    pub async fn repair_overview(&self, key: &SeriesKey) -> StoreResult<Option<SeriesOverview>> {
        let table = key.table_name();
        let Some(description) = self.namespace.describe(&table).await.context(EngineSnafu)? else {
            return Ok(None);
        };
        let Some(summary) = overview::from_description(key, &description, self.tz) else {
            return Ok(None);
        };
        let metadata = overview::encode(&summary, description.data_version, self.tz);
        let version = self
            .namespace
            .write_metadata(&table, metadata)
            .await
            .context(EngineSnafu)?;
        log::info!("repaired overview of {}/{table} at version {version}", S::NAMESPACE);
        Ok(Some(summary))
    }
}
