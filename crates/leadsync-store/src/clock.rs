use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use leadsync_types::SyncTimestamp;

fn wall_clock_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Source of `synced_at` stamps.
///
/// Every call returns a [`SyncTimestamp`] strictly after the previous one from
/// the same clock: the wall clock is used while it moves forward, and the
/// logical counter breaks ties when it stalls or steps back.
pub struct HybridLogicalClock {
    node_id: u16,
    last: Mutex<SyncTimestamp>,
}

impl HybridLogicalClock {
    pub fn new(node_id: u16) -> Self {
        Self {
            node_id,
            last: Mutex::new(SyncTimestamp::new(0, 0, node_id)),
        }
    }

    pub fn now(&self) -> SyncTimestamp {
        let wall = wall_clock_ms();
        let mut last = self.last.lock().expect("HLC mutex poisoned");
        let next = if wall > last.physical_ms {
            SyncTimestamp::new(wall, 0, self.node_id)
        } else {
            match last.logical.checked_add(1) {
                Some(logical) => SyncTimestamp::new(last.physical_ms, logical, self.node_id),
                // Counter exhausted: borrow the next millisecond.
                None => SyncTimestamp::new(last.physical_ms.saturating_add(1), 0, self.node_id),
            }
        };
        *last = next;
        next
    }

    pub fn node_id(&self) -> u16 {
        self.node_id
    }
}

impl std::fmt::Debug for HybridLogicalClock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HybridLogicalClock")
            .field("node_id", &self.node_id)
            .finish()
    }
}
