//! Exchange and interval codes.
//!
//! Codes are the strings persisted in table names and overview metadata, so
//! they must round-trip exactly through `as_str` / `FromStr` / serde.
use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use snafu::prelude::*;

/// A string that is not a known exchange or interval code.
#[derive(Debug, Clone, PartialEq, Eq, Snafu)]
#[snafu(display("Unknown {kind} code: {code:?}"))]
pub struct ParseCodeError {
    /// What kind of code was being parsed.
    pub kind: &'static str,
    /// The rejected input.
    pub code: String,
}

macro_rules! code_enum {
    (
        $(#[$meta:meta])*
        $name:ident, $kind:literal {
            $( $(#[$vmeta:meta])* $variant:ident => $code:literal, )+
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub enum $name {
            $( $(#[$vmeta])* #[serde(rename = $code)] $variant, )+
        }

        impl $name {
            /// Every variant, in declaration order.
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            /// Persisted code of this value.
            pub fn as_str(&self) -> &'static str {
                match self {
                    $( $name::$variant => $code, )+
                }
            }
        }

        impl FromStr for $name {
            type Err = ParseCodeError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $( $code => Ok($name::$variant), )+
                    _ => ParseCodeSnafu { kind: $kind, code: s }.fail(),
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

code_enum! {
    /// Trading venue, identified by its vn.py exchange code.
    Exchange, "exchange" {
        /// China Financial Futures Exchange.
        Cffex => "CFFEX",
        /// Shanghai Futures Exchange.
        Shfe => "SHFE",
        /// Zhengzhou Commodity Exchange.
        Czce => "CZCE",
        /// Dalian Commodity Exchange.
        Dce => "DCE",
        /// Shanghai International Energy Exchange.
        Ine => "INE",
        /// Guangzhou Futures Exchange.
        Gfex => "GFEX",
        /// Shanghai Stock Exchange.
        Sse => "SSE",
        /// Shenzhen Stock Exchange.
        Szse => "SZSE",
        /// Beijing Stock Exchange.
        Bse => "BSE",
        /// Shanghai-Hong Kong Stock Connect.
        Shhk => "SHHK",
        /// Shenzhen-Hong Kong Stock Connect.
        Szhk => "SZHK",
        /// Shanghai Gold Exchange.
        Sge => "SGE",
        /// Wuxi Steel Exchange.
        Wxe => "WXE",
        /// China Foreign Exchange Trade System.
        Cfets => "CFETS",
        /// CFETS X-Bond.
        Xbond => "XBOND",
        /// Smart routing.
        Smart => "SMART",
        /// New York Stock Exchange.
        Nyse => "NYSE",
        /// Nasdaq.
        Nasdaq => "NASDAQ",
        /// NYSE Arca.
        Arca => "ARCA",
        /// Cboe EDGA.
        Edgea => "EDGEA",
        /// Nasdaq Island.
        Island => "ISLAND",
        /// Cboe BZX.
        Bats => "BATS",
        /// Investors Exchange.
        Iex => "IEX",
        /// NYSE American.
        Amex => "AMEX",
        /// Toronto Stock Exchange.
        Tse => "TSE",
        /// New York Mercantile Exchange.
        Nymex => "NYMEX",
        /// Commodity Exchange.
        Comex => "COMEX",
        /// CME Globex.
        Globex => "GLOBEX",
        /// Interactive Brokers FX.
        Idealpro => "IDEALPRO",
        /// Chicago Mercantile Exchange.
        Cme => "CME",
        /// Intercontinental Exchange.
        Ice => "ICE",
        /// Stock Exchange of Hong Kong.
        Sehk => "SEHK",
        /// Hong Kong Futures Exchange.
        Hkfe => "HKFE",
        /// Singapore Exchange.
        Sgx => "SGX",
        /// Chicago Board of Trade.
        Cbot => "CBOT",
        /// Chicago Board Options Exchange.
        Cboe => "CBOE",
        /// Cboe Futures Exchange.
        Cfe => "CFE",
        /// Eurex.
        Eurex => "EUREX",
        /// London Metal Exchange.
        Lme => "LME",
        /// Bursa Malaysia Derivatives.
        Bmd => "BMD",
        /// Tokyo Commodity Exchange.
        Tocom => "TOCOM",
        /// Euronext.
        Eunx => "EUNX",
        /// Korea Exchange.
        Krx => "KRX",
        /// Over the counter.
        Otc => "OTC",
        /// Binance.
        Binance => "BINANCE",
        /// OKX.
        Okx => "OKX",
        /// Locally generated data.
        Local => "LOCAL",
    }
}

code_enum! {
    /// Sampling interval of a bar series.
    Interval, "interval" {
        /// One minute.
        Minute => "1m",
        /// One hour.
        Hour => "1h",
        /// One trading day.
        Daily => "d",
        /// One week.
        Weekly => "w",
        /// Tick-by-tick.
        Tick => "tick",
    }
}
