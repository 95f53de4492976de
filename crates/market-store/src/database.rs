//! Blocking database facade over the bar and tick stores.
use std::path::PathBuf;

use chrono::DateTime;
use chrono_tz::Tz;
use market_store_core::{Connection, SizeLimit};
use snafu::prelude::*;
use tokio::runtime::Runtime;

use crate::constant::{Exchange, Interval};
use crate::error::{
    ConnectionSnafu, EngineSnafu, KeySnafu, SettingsSnafu, StoreError, StoreResult,
};
use crate::key::SeriesKey;
use crate::object::{BarData, BarOverview, TickData, TickOverview};
use crate::runtime::{new_runtime, run_blocking};
use crate::settings::DatabaseSettings;
use crate::store::{BarStore, TickStore};

/// Synchronous market data persistence.
///
/// Implementations may be shared across threads; calls on different series
/// can run concurrently.
pub trait MarketDatabase: Send + Sync {
    /// Upsert bars of one series and refresh its overview.
    fn save_bar_data(&self, bars: &[BarData]) -> StoreResult<bool>;

    /// Upsert ticks of one series and refresh its overview.
    fn save_tick_data(&self, ticks: &[TickData]) -> StoreResult<bool>;

    /// Bars in `[start, end]`, sorted by time.
    fn load_bar_data(
        &self,
        symbol: &str,
        exchange: Exchange,
        interval: Interval,
        start: DateTime<Tz>,
        end: DateTime<Tz>,
    ) -> StoreResult<Vec<BarData>>;

    /// Ticks in `[start, end]`, sorted by time.
    fn load_tick_data(
        &self,
        symbol: &str,
        exchange: Exchange,
        start: DateTime<Tz>,
        end: DateTime<Tz>,
    ) -> StoreResult<Vec<TickData>>;

    /// Remove a bar series, returning its row count.
    fn delete_bar_data(&self, symbol: &str, exchange: Exchange, interval: Interval)
    -> StoreResult<u64>;

    /// Remove a tick series, returning its row count.
    fn delete_tick_data(&self, symbol: &str, exchange: Exchange) -> StoreResult<u64>;

    /// Summary of every stored bar series.
    fn get_bar_overview(&self) -> StoreResult<Vec<BarOverview>>;

    /// Summary of every stored tick series.
    fn get_tick_overview(&self) -> StoreResult<Vec<TickOverview>>;
}

/// The local market database: one storage connection holding the
/// `bar_data` and `tick_data` namespaces.
///
/// Owns a Tokio runtime, so it must be created, used and dropped outside
/// of any async context.
#[derive(Debug)]
pub struct Database {
    bars: BarStore,
    ticks: TickStore,
    connection: Connection,
    runtime: Runtime,
}

impl Database {
    /// Open the database described by `settings`.
    pub fn open(settings: &DatabaseSettings) -> StoreResult<Self> {
        let tz = settings.timezone().context(SettingsSnafu)?;
        let size_limit = settings.size_limit().context(SettingsSnafu)?;
        Self::open_at(settings.root(), size_limit, tz)
    }

    /// Open a database rooted at `root`.
    pub fn open_at(root: impl Into<PathBuf>, size_limit: SizeLimit, tz: Tz) -> StoreResult<Self> {
        let root = root.into();
        let runtime = new_runtime()?;
        let (connection, bars, ticks) = run_blocking(&runtime, async {
            let connection = Connection::open(root, size_limit)
                .await
                .context(ConnectionSnafu)?;
            let bars = BarStore::open(&connection, tz).await?;
            let ticks = TickStore::open(&connection, tz).await?;
            for namespace in [bars.namespace(), ticks.namespace()] {
                let swept = namespace.sweep_tombstones().await.context(EngineSnafu)?;
                if swept > 0 {
                    log::info!("removed {swept} leftover tombstones in {}", namespace.name());
                }
            }
            Ok::<_, StoreError>((connection, bars, ticks))
        })?;
        log::info!(
            "opened market database at {} (timezone {tz})",
            connection.root().root().display()
        );
        Ok(Self {
            bars,
            ticks,
            connection,
            runtime,
        })
    }

    pub fn bar_store(&self) -> &BarStore {
        &self.bars
    }

    pub fn tick_store(&self) -> &TickStore {
        &self.ticks
    }

    /// Timezone loaded records are expressed in.
    pub fn timezone(&self) -> Tz {
        self.bars.timezone()
    }

    /// Rebuild the stored overview of a bar series from its data.
    pub fn repair_bar_overview(
        &self,
        symbol: &str,
        exchange: Exchange,
        interval: Interval,
    ) -> StoreResult<Option<BarOverview>> {
        let key = SeriesKey::bar(symbol, exchange, interval).context(KeySnafu)?;
        run_blocking(&self.runtime, self.bars.repair_overview(&key))
    }

    /// Rebuild the stored overview of a tick series from its data.
    pub fn repair_tick_overview(
        &self,
        symbol: &str,
        exchange: Exchange,
    ) -> StoreResult<Option<TickOverview>> {
        let key = SeriesKey::tick(symbol, exchange).context(KeySnafu)?;
        run_blocking(&self.runtime, self.ticks.repair_overview(&key))
    }

    /// Close the storage connection and stop the runtime.
    pub fn close(self) {
        let Self {
            bars,
            ticks,
            connection,
            runtime,
        } = self;
        drop((bars, ticks));
        connection.close();
        drop(runtime);
    }
}

impl MarketDatabase for Database {
    fn save_bar_data(&self, bars: &[BarData]) -> StoreResult<bool> {
        run_blocking(&self.runtime, self.bars.save(bars))
    }

    fn save_tick_data(&self, ticks: &[TickData]) -> StoreResult<bool> {
        run_blocking(&self.runtime, self.ticks.save(ticks))
    }

    fn load_bar_data(
        &self,
        symbol: &str,
        exchange: Exchange,
        interval: Interval,
        start: DateTime<Tz>,
        end: DateTime<Tz>,
    ) -> StoreResult<Vec<BarData>> {
        let key = SeriesKey::bar(symbol, exchange, interval).context(KeySnafu)?;
        run_blocking(&self.runtime, self.bars.load(&key, start, end))
    }

    fn load_tick_data(
        &self,
        symbol: &str,
        exchange: Exchange,
        start: DateTime<Tz>,
        end: DateTime<Tz>,
    ) -> StoreResult<Vec<TickData>> {
        let key = SeriesKey::tick(symbol, exchange).context(KeySnafu)?;
        run_blocking(&self.runtime, self.ticks.load(&key, start, end))
    }

    fn delete_bar_data(
        &self,
        symbol: &str,
        exchange: Exchange,
        interval: Interval,
    ) -> StoreResult<u64> {
        let key = SeriesKey::bar(symbol, exchange, interval).context(KeySnafu)?;
        run_blocking(&self.runtime, self.bars.delete(&key))
    }

    fn delete_tick_data(&self, symbol: &str, exchange: Exchange) -> StoreResult<u64> {
        let key = SeriesKey::tick(symbol, exchange).context(KeySnafu)?;
        run_blocking(&self.runtime, self.ticks.delete(&key))
    }

    fn get_bar_overview(&self) -> StoreResult<Vec<BarOverview>> {
        run_blocking(&self.runtime, self.bars.get_overview())
    }

    fn get_tick_overview(&self) -> StoreResult<Vec<TickOverview>> {
        run_blocking(&self.runtime, self.ticks.get_overview())
    }
}
