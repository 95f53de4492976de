//! What a commit file contains.
//!
//! A [`Commit`] is a list of [`LogAction`]s applied in order on top of the
//! state at `base_version`.
use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::transaction_log::{
    segments::{SegmentId, SegmentMeta},
    table_metadata::TableMeta,
};

/// Free-form metadata attached to a table by its owner.
pub type UserMetadata = BTreeMap<String, serde_json::Value>;

/// One state change inside a commit.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub enum LogAction {
    /// Add or replace a segment.
    AddSegment(SegmentMeta),

    /// Drop a segment from the live set. Its file may outlive the commit.
    RemoveSegment {
        /// Segment to drop.
        segment_id: SegmentId,
    },

    /// Replace table-level metadata (schema and time column).
    UpdateTableMeta(TableMeta),

    /// Replace the user metadata map wholesale.
    UpdateUserMetadata(UserMetadata),
}

/// Contents of `_timeseries_log/<version>.json`.
///
/// `version` always equals the number in the file name and
/// `base_version + 1`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Commit {
    /// Version claimed by this commit, starting at 1.
    pub version: u64,

    /// Version the writer planned against.
    pub base_version: u64,

    /// Wall-clock time of the commit.
    pub timestamp: DateTime<Utc>,

    /// Changes, in application order.
    pub actions: Vec<LogAction>,
}
