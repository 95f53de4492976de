//! Segment identifiers, formats, and per-file metadata recorded in the log.
//!
//! A segment is one immutable Parquet file under `data/`. The log records
//! which segments are live at each version together with their time span, so
//! range reads can skip files without opening them.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identifier for a physical segment file.
///
/// The file path is stored separately in [`SegmentMeta`]; the newtype keeps
/// segment IDs from being mixed up with other strings.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct SegmentId(pub String);

impl fmt::Display for SegmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Supported on-disk file formats for segments.
///
/// JSON layout example: `"format": "parquet"`
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FileFormat {
    /// Apache Parquet columnar format.
    #[default]
    Parquet,
}

/// Metadata about a single physical segment.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct SegmentMeta {
    /// Logical identifier for this segment.
    pub segment_id: SegmentId,

    /// File path relative to the table root (for example `"data/seg-ab12.parquet"`).
    pub path: String,

    /// File format for this segment.
    #[serde(default)]
    pub format: FileFormat,

    /// Minimum timestamp contained in this segment (inclusive).
    pub ts_min: DateTime<Utc>,

    /// Maximum timestamp contained in this segment (inclusive).
    pub ts_max: DateTime<Utc>,

    /// Number of rows in this segment.
    pub row_count: u64,

    /// File size in bytes at the time the segment was written.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_size: Option<u64>,
}

impl SegmentMeta {
    /// Whether this segment's span intersects the inclusive range `[start, end]`.
    pub fn overlaps(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
        self.ts_max >= start && self.ts_min <= end
    }
}

/// Deterministic segment ID derived from the version it is written at and
/// the encoded file bytes.
///
/// Two writers racing for the same version with different payloads get
/// different IDs, so neither can clobber the other's data file.
pub fn segment_id_v1(version: u64, data: &[u8]) -> SegmentId {
    let mut h = blake3::Hasher::new();
    h.update(b"segment-id-v1");
    h.update(b"\0");
    h.update(&version.to_le_bytes());
    h.update(b"\0");
    h.update(data);
    let hex = h.finalize().to_hex();
    SegmentId(format!("seg-{}", &hex[..32]))
}

/// Deterministic ordering for segments by time.
///
/// Ordering is by `ts_min`, then `ts_max`, then `segment_id` as a tie-breaker.
pub(crate) fn cmp_segment_meta_by_time(a: &SegmentMeta, b: &SegmentMeta) -> std::cmp::Ordering {
    a.ts_min
        .cmp(&b.ts_min)
        .then_with(|| a.ts_max.cmp(&b.ts_max))
        .then_with(|| a.segment_id.cmp(&b.segment_id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn seg(id: &str, ts_min: i64, ts_max: i64) -> SegmentMeta {
        SegmentMeta {
            segment_id: SegmentId(id.to_string()),
            path: format!("data/{id}.parquet"),
            format: FileFormat::Parquet,
            ts_min: Utc.timestamp_opt(ts_min, 0).single().unwrap(),
            ts_max: Utc.timestamp_opt(ts_max, 0).single().unwrap(),
            row_count: 1,
            file_size: None,
        }
    }

    #[test]
    fn overlaps_is_inclusive_on_both_ends() {
        let s = seg("a", 100, 200);
        let at = |secs| Utc.timestamp_opt(secs, 0).single().unwrap();

        assert!(s.overlaps(at(200), at(300)));
        assert!(s.overlaps(at(0), at(100)));
        assert!(s.overlaps(at(150), at(160)));
        assert!(!s.overlaps(at(201), at(300)));
        assert!(!s.overlaps(at(0), at(99)));
    }

    #[test]
    fn segment_id_depends_on_version_and_bytes() {
        let a = segment_id_v1(1, b"PAR1 payload");
        let b = segment_id_v1(2, b"PAR1 payload");
        let c = segment_id_v1(1, b"PAR1 other");

        assert_eq!(a, segment_id_v1(1, b"PAR1 payload"));
        assert_ne!(a, b);
        assert_ne!(a, c);
        assert!(a.0.starts_with("seg-"));
        assert_eq!(a.0.len(), 4 + 32);
    }

    #[test]
    fn cmp_by_time_breaks_ties_on_id() {
        let mut segs = vec![seg("b", 10, 20), seg("a", 10, 20), seg("c", 0, 5)];
        segs.sort_by(cmp_segment_meta_by_time);
        let ids: Vec<_> = segs.iter().map(|s| s.segment_id.0.as_str()).collect();
        assert_eq!(ids, vec!["c", "a", "b"]);
    }

    #[test]
    fn file_size_is_omitted_when_absent() {
        let json = serde_json::to_string(&seg("a", 0, 1)).unwrap();
        assert!(!json.contains("file_size"));
    }
}
