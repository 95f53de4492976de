//! Market bar and tick persistence on versioned time-series tables.
//!
//! Records are grouped into series keyed by symbol, exchange and (for bars)
//! interval. Each series is one table in the `market-store-core` engine;
//! saves upsert by timestamp and refresh a small overview stored as table
//! metadata, so listing what is stored never scans row data.
//!
//! [`Database`] is the blocking entry point; [`store::SeriesStore`] exposes
//! the same operations asynchronously.

pub mod constant;
pub mod database;
pub mod error;
pub mod key;
pub mod object;
pub mod overview;
mod runtime;
pub mod schema;
pub mod settings;
pub mod store;

pub use constant::{Exchange, Interval};
pub use database::{Database, MarketDatabase};
pub use error::{StoreError, StoreResult};
pub use key::{KeyError, SeriesKey, derive_key};
pub use object::{BarData, BarOverview, SeriesOverview, TickData, TickOverview};
pub use settings::DatabaseSettings;
pub use store::{BarStore, SeriesStore, TickStore};
