//! Errors surfaced by the stores and the database facade.
use market_store_core::{ConnectionError, NamespaceError};
use snafu::prelude::*;

use crate::key::KeyError;
use crate::overview::OverviewError;
use crate::schema::RecordError;
use crate::settings::SettingsError;

/// Errors returned by [`crate::store::SeriesStore`] and [`crate::Database`].
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum StoreError {
    /// `save` was called without records.
    #[snafu(display("Refusing to save an empty batch"))]
    EmptyBatch,

    /// A batch spans more than one series.
    #[snafu(display("Batch mixes series {first} and {other}"))]
    MixedBatch { first: String, other: String },

    /// The symbol cannot form a storage key.
    #[snafu(display("{source}"))]
    Key { source: KeyError },

    /// Records could not be converted to or from columns.
    #[snafu(display("Record conversion failed for {table}: {source}"))]
    Record { table: String, source: RecordError },

    /// Rows were committed but the overview metadata was not refreshed.
    ///
    /// The data at `version` is durable; run `repair_overview` for the key
    /// to bring the metadata back in line.
    #[snafu(display(
        "Data for {table} committed at version {version}, but its overview was not updated: {source}"
    ))]
    PartialWriteFailure {
        table: String,
        version: u64,
        #[snafu(source(from(NamespaceError, Box::new)))]
        source: Box<NamespaceError>,
    },

    /// The storage engine failed.
    #[snafu(display("Storage engine error: {source}"))]
    Engine {
        #[snafu(source(from(NamespaceError, Box::new)))]
        source: Box<NamespaceError>,
    },

    /// The storage connection could not be opened or used.
    #[snafu(display("Connection error: {source}"))]
    Connection { source: ConnectionError },

    /// Database settings are invalid.
    #[snafu(display("Invalid settings: {source}"))]
    Settings { source: SettingsError },

    /// The blocking runtime could not be started.
    #[snafu(display("Failed to start runtime: {source}"))]
    Runtime { source: std::io::Error },

    /// A blocking call was made from inside an async runtime.
    #[snafu(display("Blocking database call made from within an async runtime"))]
    BlockingInRuntime,

    /// Stored overview metadata is unreadable.
    #[snafu(display("Malformed overview metadata for {table}: {source}"))]
    Overview { table: String, source: OverviewError },
}

impl StoreError {
    /// Whether the error left committed rows with a stale overview.
    pub fn is_partial_write(&self) -> bool {
        matches!(self, StoreError::PartialWriteFailure { .. })
    }
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
