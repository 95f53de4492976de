//! Database settings in the vn.py `vt_setting.json` style.
//!
//! Keys are dotted (`database.path`, `database.name`, ...) and live in one
//! flat JSON object next to unrelated application settings, which are
//! ignored. Missing keys and empty strings fall back to the defaults.
use std::path::{Path, PathBuf};

use chrono_tz::Tz;
use market_store_core::SizeLimit;
use serde::{Deserialize, Serialize};
use snafu::prelude::*;

pub const DEFAULT_PATH: &str = ".vntrader";
pub const DEFAULT_NAME: &str = "arcticdb";
pub const DEFAULT_MAP_SIZE: &str = "5GB";
pub const DEFAULT_TIMEZONE: &str = "Asia/Shanghai";

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum SettingsError {
    #[snafu(display("Failed to read settings file {}: {source}", path.display()))]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("Failed to parse settings file {}: {source}", path.display()))]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[snafu(display("Unknown timezone {value:?} in database.timezone"))]
    Timezone { value: String },

    #[snafu(display("Invalid database.map_size {value:?}: {source}"))]
    MapSize {
        value: String,
        source: market_store_core::ConnectionError,
    },
}

/// Where and how the database is stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseSettings {
    /// Directory holding all databases.
    #[serde(rename = "database.path")]
    pub path: String,
    /// Database directory name below `path`.
    #[serde(rename = "database.name")]
    pub name: String,
    /// Size cap, e.g. `5GB`; `0` or `unlimited` disables it.
    #[serde(rename = "database.map_size")]
    pub map_size: String,
    /// IANA zone records are localized to on load.
    #[serde(rename = "database.timezone")]
    pub timezone: String,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            path: DEFAULT_PATH.to_string(),
            name: DEFAULT_NAME.to_string(),
            map_size: DEFAULT_MAP_SIZE.to_string(),
            timezone: DEFAULT_TIMEZONE.to_string(),
        }
    }
}

fn or_default(value: &str, default: &'static str) -> String {
    let value = value.trim();
    if value.is_empty() {
        default.to_string()
    } else {
        value.to_string()
    }
}

impl DatabaseSettings {
    /// Settings rooted at `path` with every other value defaulted.
    pub fn at(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }

    /// Parse settings from JSON text.
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str::<Self>(text).map(Self::normalized)
    }

    /// Load settings from a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, SettingsError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).context(ReadSnafu { path })?;
        Self::from_json(&text).context(ParseSnafu { path })
    }

    fn normalized(self) -> Self {
        Self {
            path: or_default(&self.path, DEFAULT_PATH),
            name: or_default(&self.name, DEFAULT_NAME),
            map_size: or_default(&self.map_size, DEFAULT_MAP_SIZE),
            timezone: or_default(&self.timezone, DEFAULT_TIMEZONE),
        }
    }

    /// Storage root: `path/name`.
    pub fn root(&self) -> PathBuf {
        Path::new(&self.path).join(&self.name)
    }

    pub fn timezone(&self) -> Result<Tz, SettingsError> {
        self.timezone.parse::<Tz>().map_err(|_| {
            TimezoneSnafu {
                value: self.timezone.as_str(),
            }
            .build()
        })
    }

    pub fn size_limit(&self) -> Result<SizeLimit, SettingsError> {
        self.map_size.parse::<SizeLimit>().context(MapSizeSnafu {
            value: self.map_size.as_str(),
        })
    }
}
