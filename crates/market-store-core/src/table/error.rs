//! Error types and SNAFU context selectors for versioned tables.
//!
//! Context selectors are exposed as `pub(crate)` so the upsert, merge and
//! scan modules can attach context without re-exporting them from the crate.

use arrow::{datatypes::DataType, error::ArrowError};
use chrono::{DateTime, Utc};
use parquet::errors::ParquetError;
use snafu::prelude::*;

use crate::{
    storage::StorageError,
    transaction_log::{CommitError, LogicalSchemaError},
};

/// Errors from versioned table operations.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum TableError {
    /// Any error coming from the transaction log / commit machinery
    /// (for example OCC conflicts, storage failures, or corrupt commits).
    #[snafu(display("Transaction log error: {source}"))]
    TransactionLog {
        /// Underlying transaction log / commit error.
        #[snafu(source, backtrace)]
        source: CommitError,
    },

    /// The operation needs a table that has at least one commit.
    #[snafu(display("Table at {path} has no commits"))]
    EmptyTable {
        /// Table root path.
        path: String,
    },

    /// Storage error while accessing table data.
    #[snafu(display("Storage error while accessing table data: {source}"))]
    Storage {
        /// Underlying storage error while reading or writing table data.
        source: StorageError,
    },

    /// The incoming batch does not match the schema recorded for the table.
    #[snafu(display("Schema mismatch: table has [{expected}], batch has [{actual}]"))]
    SchemaMismatch {
        /// Schema recorded in the table metadata, rendered as text.
        expected: String,
        /// Schema of the rejected batch, rendered as text.
        actual: String,
    },

    /// The batch schema cannot be stored.
    #[snafu(display("Unsupported batch schema: {source}"))]
    UnsupportedSchema {
        /// Underlying logical schema error.
        source: LogicalSchemaError,
    },

    /// Batch or segment is missing the time column.
    #[snafu(display("Missing time column {column}"))]
    MissingTimeColumn {
        /// Name of the expected time column.
        column: String,
    },

    /// Time column exists but has an unsupported Arrow type.
    #[snafu(display("Unsupported time column {column} with type {datatype:?}"))]
    UnsupportedTimeType {
        /// Name of the time column with an unsupported type.
        column: String,
        /// Arrow data type encountered for the time column.
        datatype: DataType,
    },

    /// The time column of an incoming batch contains nulls.
    #[snafu(display("Time column {column} contains {null_count} null values"))]
    NullTimestamps {
        /// Name of the time column.
        column: String,
        /// Number of null entries found.
        null_count: usize,
    },

    /// A stored or requested timestamp cannot be represented.
    #[snafu(display("Timestamp out of range for column {column}: {value}"))]
    TimestampOutOfRange {
        /// Name of the time column.
        column: String,
        /// Raw value in the column's unit.
        value: i64,
    },

    /// Converting a timestamp to the column unit would overflow `i64`.
    #[snafu(display("Timestamp conversion overflow for column {column} (value: {timestamp})"))]
    TimeConversionOverflow {
        /// Name of the time column being converted.
        column: String,
        /// The timestamp value that could not be represented.
        timestamp: DateTime<Utc>,
    },

    /// Parquet error while reading a segment.
    #[snafu(display("Parquet read error: {source}"))]
    ParquetRead {
        /// Underlying Parquet error.
        source: ParquetError,
    },

    /// Parquet error while encoding a new segment.
    #[snafu(display("Parquet write error: {source}"))]
    ParquetWrite {
        /// Underlying Parquet error.
        source: ParquetError,
    },

    /// Arrow compute or conversion error.
    #[snafu(display("Arrow error: {source}"))]
    Arrow {
        /// Underlying Arrow error.
        source: ArrowError,
    },

    /// Segments kept disappearing while reading (a concurrent pruning writer).
    #[snafu(display("Segments changed underneath the reader {attempts} times; giving up"))]
    ReadRetriesExhausted {
        /// Number of attempts made.
        attempts: usize,
    },
}

impl TableError {
    /// Whether this error is an optimistic-concurrency loss against another writer.
    pub fn is_conflict(&self) -> bool {
        matches!(self, TableError::TransactionLog { source } if source.is_lost_race())
    }
}
