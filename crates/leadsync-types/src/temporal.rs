use std::fmt;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Hybrid Logical Clock timestamp assigned by the canonical store at commit.
///
/// Combines a physical wall-clock component with a logical counter and a
/// node identifier, so two commits on the same node never share a timestamp
/// even within one millisecond.
///
/// Ordering: `physical_ms` → `logical` → `node_id` (total order).
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SyncTimestamp {
    /// Wall-clock milliseconds since UNIX epoch.
    pub physical_ms: u64,
    /// Logical counter for commits at the same physical time.
    pub logical: u32,
    /// Node identifier to break ties between nodes.
    pub node_id: u16,
}

impl SyncTimestamp {
    pub fn new(physical_ms: u64, logical: u32, node_id: u16) -> Self {
        Self {
            physical_ms,
            logical,
            node_id,
        }
    }

    /// The zero timestamp.
    pub const fn zero() -> Self {
        Self {
            physical_ms: 0,
            logical: 0,
            node_id: 0,
        }
    }

    /// Returns `true` if this timestamp is strictly after `other`.
    pub fn is_after(&self, other: &Self) -> bool {
        self > other
    }

    /// Wall-clock view of the physical component.
    pub fn to_datetime(&self) -> DateTime<Utc> {
        i64::try_from(self.physical_ms)
            .ok()
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// RFC 3339 rendering with millisecond precision, as written into
    /// canonical documents.
    pub fn to_rfc3339(&self) -> String {
        self.to_datetime()
            .to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
    }
}

impl PartialOrd for SyncTimestamp {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SyncTimestamp {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.physical_ms
            .cmp(&other.physical_ms)
            .then(self.logical.cmp(&other.logical))
            .then(self.node_id.cmp(&other.node_id))
    }
}

impl fmt::Debug for SyncTimestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "SyncTimestamp({}ms.{}.n{})",
            self.physical_ms, self.logical, self.node_id
        )
    }
}

impl fmt::Display for SyncTimestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.n{}", self.physical_ms, self.logical, self.node_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordering_physical_first() {
        let a = SyncTimestamp::new(100, 5, 1);
        let b = SyncTimestamp::new(200, 0, 0);
        assert!(a < b);
    }

    #[test]
    fn ordering_logical_then_node() {
        assert!(SyncTimestamp::new(100, 1, 9) < SyncTimestamp::new(100, 2, 0));
        assert!(SyncTimestamp::new(100, 1, 1) < SyncTimestamp::new(100, 1, 2));
    }

    #[test]
    fn zero_is_smallest() {
        assert!(SyncTimestamp::zero() < SyncTimestamp::new(1, 0, 0));
        assert!(SyncTimestamp::new(1, 0, 0).is_after(&SyncTimestamp::zero()));
    }

    #[test]
    fn rfc3339_rendering() {
        let ts = SyncTimestamp::new(1_700_000_000_123, 4, 1);
        assert_eq!(ts.to_rfc3339(), "2023-11-14T22:13:20.123Z");
    }

    #[test]
    fn display_format() {
        let ts = SyncTimestamp::new(1000, 5, 3);
        assert_eq!(format!("{ts}"), "1000.5.n3");
    }
}
