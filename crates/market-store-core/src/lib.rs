//! Core engine for market-store: a log-structured, versioned time-series
//! table format on the local filesystem.
//!
//! This crate provides:
//!
//! - A Delta-inspired, append-only metadata log with version-guard
//!   optimistic concurrency control (`transaction_log` module).
//! - [`table::VersionedTable`], which merges timestamp-keyed upserts into
//!   immutable Parquet segments, serves inclusive range reads (including
//!   reads of older versions) and describes itself from the log alone.
//! - [`namespace::Namespace`] and [`connection::Connection`], which group
//!   tables under one root directory with per-table user metadata, listing,
//!   deletion and a connection-wide size limit.
//! - Filesystem helpers for atomic writes and directory management
//!   (`storage` module).
//!
//! Domain crates (bars, ticks, overviews) depend on this crate rather than
//! re-implementing storage and metadata logic.
#![deny(missing_docs)]
pub mod connection;
pub mod namespace;
pub mod storage;
pub mod table;
pub mod transaction_log;

pub use connection::{Connection, ConnectionError, SizeLimit};
pub use namespace::{Namespace, NamespaceError};
pub use table::{TableDescription, TableError, TimeRange, UpsertOutcome, VersionedTable};
pub use transaction_log::UserMetadata;
