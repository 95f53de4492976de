//! Market data records and series overviews.
use chrono::{DateTime, NaiveDateTime};
use chrono_tz::Tz;

use crate::constant::{Exchange, Interval};

/// Gateway name stamped on records loaded back from the database.
pub const DB_GATEWAY: &str = "DB";

/// One OHLCV candle.
#[derive(Debug, Clone, PartialEq)]
pub struct BarData {
    pub symbol: String,
    pub exchange: Exchange,
    pub datetime: DateTime<Tz>,
    pub interval: Interval,
    pub volume: f64,
    pub turnover: f64,
    pub open_interest: f64,
    pub open_price: f64,
    pub high_price: f64,
    pub low_price: f64,
    pub close_price: f64,
    pub gateway_name: String,
}

impl BarData {
    /// `symbol.EXCHANGE`, the identifier used across vn.py.
    pub fn vt_symbol(&self) -> String {
        format!("{}.{}", self.symbol, self.exchange)
    }
}

/// One order-book snapshot with five price levels.
#[derive(Debug, Clone, PartialEq)]
pub struct TickData {
    pub symbol: String,
    pub exchange: Exchange,
    pub datetime: DateTime<Tz>,
    pub name: String,
    pub volume: f64,
    pub turnover: f64,
    pub open_interest: f64,
    pub last_price: f64,
    pub last_volume: f64,
    pub limit_up: f64,
    pub limit_down: f64,
    pub open_price: f64,
    pub high_price: f64,
    pub low_price: f64,
    pub pre_close: f64,
    pub bid_price_1: f64,
    pub bid_price_2: f64,
    pub bid_price_3: f64,
    pub bid_price_4: f64,
    pub bid_price_5: f64,
    pub ask_price_1: f64,
    pub ask_price_2: f64,
    pub ask_price_3: f64,
    pub ask_price_4: f64,
    pub ask_price_5: f64,
    pub bid_volume_1: f64,
    pub bid_volume_2: f64,
    pub bid_volume_3: f64,
    pub bid_volume_4: f64,
    pub bid_volume_5: f64,
    pub ask_volume_1: f64,
    pub ask_volume_2: f64,
    pub ask_volume_3: f64,
    pub ask_volume_4: f64,
    pub ask_volume_5: f64,
    /// Wall-clock time the tick was received, as reported by the gateway.
    pub localtime: Option<NaiveDateTime>,
    pub gateway_name: String,
}

impl TickData {
    /// `symbol.EXCHANGE`, the identifier used across vn.py.
    pub fn vt_symbol(&self) -> String {
        format!("{}.{}", self.symbol, self.exchange)
    }
}

/// What is stored for one series: its identity, time span and row count.
///
/// Bar overviews carry an interval; tick overviews never do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeriesOverview {
    pub symbol: String,
    pub exchange: Exchange,
    pub interval: Option<Interval>,
    /// First stored timestamp, in the database timezone.
    pub start: DateTime<Tz>,
    /// Last stored timestamp, in the database timezone.
    pub end: DateTime<Tz>,
    pub count: u64,
}

/// Overview of a bar series.
pub type BarOverview = SeriesOverview;
/// Overview of a tick series.
pub type TickOverview = SeriesOverview;
