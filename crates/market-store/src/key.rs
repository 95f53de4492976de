//! Storage keys: the single mapping from (symbol, exchange, interval) to a
//! table name.
//!
//! Table names are `symbol@EXCHANGE` for ticks and `symbol@EXCHANGE@interval`
//! for bars. Exchange and interval codes never contain `@`, and symbols are
//! rejected when they do, so every name parses back to exactly one key.
use std::fmt;

use snafu::prelude::*;

use crate::constant::{Exchange, Interval, ParseCodeError};

/// Separator between the parts of a table name.
pub const KEY_DELIMITER: char = '@';

/// Reasons a symbol or table name cannot form a key.
#[derive(Debug, Clone, PartialEq, Eq, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum KeyError {
    /// The symbol would produce an ambiguous or unsafe table name.
    #[snafu(display("Invalid symbol {symbol:?}: {reason}"))]
    InvalidSymbol {
        symbol: String,
        reason: &'static str,
    },

    /// The table name does not have the `symbol@EXCHANGE[@interval]` shape.
    #[snafu(display("Malformed table name {name:?}"))]
    MalformedName { name: String },

    /// A code inside the table name is unknown.
    #[snafu(display("Table name {name:?}: {source}"))]
    UnknownCode {
        name: String,
        source: ParseCodeError,
    },
}

fn validate_symbol(symbol: &str) -> Result<(), KeyError> {
    let reason = if symbol.is_empty() {
        Some("empty")
    } else if symbol.trim_matches('.').is_empty() {
        Some("dot-only")
    } else if symbol.starts_with('.') {
        Some("leading dot")
    } else if symbol.contains(KEY_DELIMITER) {
        Some("contains the key delimiter '@'")
    } else if symbol.contains(['/', '\\']) {
        Some("contains a path separator")
    } else if symbol.chars().any(char::is_control) {
        Some("contains a control character")
    } else {
        None
    };
    match reason {
        Some(reason) => InvalidSymbolSnafu { symbol, reason }.fail(),
        None => Ok(()),
    }
}

/// Identity of one stored series.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SeriesKey {
    symbol: String,
    exchange: Exchange,
    interval: Option<Interval>,
}

impl SeriesKey {
    /// Build a key, validating the symbol.
    pub fn new(
        symbol: impl Into<String>,
        exchange: Exchange,
        interval: Option<Interval>,
    ) -> Result<Self, KeyError> {
        let symbol = symbol.into();
        validate_symbol(&symbol)?;
        Ok(Self {
            symbol,
            exchange,
            interval,
        })
    }

    /// Key of a bar series.
    pub fn bar(
        symbol: impl Into<String>,
        exchange: Exchange,
        interval: Interval,
    ) -> Result<Self, KeyError> {
        Self::new(symbol, exchange, Some(interval))
    }

    /// Key of a tick series.
    pub fn tick(symbol: impl Into<String>, exchange: Exchange) -> Result<Self, KeyError> {
        Self::new(symbol, exchange, None)
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn exchange(&self) -> Exchange {
        self.exchange
    }

    pub fn interval(&self) -> Option<Interval> {
        self.interval
    }

    /// Canonical table name of this key.
    pub fn table_name(&self) -> String {
        match self.interval {
            Some(interval) => format!(
                "{}{KEY_DELIMITER}{}{KEY_DELIMITER}{}",
                self.symbol, self.exchange, interval
            ),
            None => format!("{}{KEY_DELIMITER}{}", self.symbol, self.exchange),
        }
    }

    /// Inverse of [`SeriesKey::table_name`].
    pub fn parse_table_name(name: &str) -> Result<Self, KeyError> {
        let parts: Vec<&str> = name.split(KEY_DELIMITER).collect();
        let (symbol, exchange, interval) = match parts.as_slice() {
            [symbol, exchange] => (*symbol, *exchange, None),
            [symbol, exchange, interval] => (*symbol, *exchange, Some(*interval)),
            _ => return MalformedNameSnafu { name }.fail(),
        };
        let exchange = exchange
            .parse::<Exchange>()
            .context(UnknownCodeSnafu { name })?;
        let interval = interval
            .map(str::parse::<Interval>)
            .transpose()
            .context(UnknownCodeSnafu { name })?;
        Self::new(symbol, exchange, interval)
    }
}

impl fmt::Display for SeriesKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.table_name())
    }
}

/// Derive the storage key of a series.
pub fn derive_key(
    symbol: &str,
    exchange: Exchange,
    interval: Option<Interval>,
) -> Result<SeriesKey, KeyError> {
    SeriesKey::new(symbol, exchange, interval)
}
