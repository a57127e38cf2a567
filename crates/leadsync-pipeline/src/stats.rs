use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use leadsync_types::SourceId;

/// Lock-free per-source counters, shared between a pipeline's tasks and
/// whoever reports on them.
#[derive(Debug, Default)]
pub struct PipelineStats {
    received: AtomicU64,
    synced: AtomicU64,
    dropped: AtomicU64,
    ignored: AtomicU64,
    dead_lettered: AtomicU64,
    abandoned: AtomicU64,
    retries: AtomicU64,
    failed: AtomicU64,
}

impl PipelineStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_received(&self) {
        self.received.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_synced(&self) {
        self.synced.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_ignored(&self) {
        self.ignored.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_dead_lettered(&self) {
        self.dead_lettered.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_abandoned(&self) {
        self.abandoned.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_retries(&self, n: u32) {
        if n > 0 {
            self.retries.fetch_add(u64::from(n), Ordering::Relaxed);
        }
    }

    pub(crate) fn record_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            received: self.received.load(Ordering::Relaxed),
            synced: self.synced.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            ignored: self.ignored.load(Ordering::Relaxed),
            dead_lettered: self.dead_lettered.load(Ordering::Relaxed),
            abandoned: self.abandoned.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`PipelineStats`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    /// Events delivered to the pipeline.
    pub received: u64,
    /// Events whose candidate was committed to the canonical store.
    pub synced: u64,
    /// Malformed events rejected by the adapter.
    pub dropped: u64,
    /// Update/delete events skipped by the adapter.
    pub ignored: u64,
    pub dead_lettered: u64,
    /// Sync goals given up at shutdown before their next retry.
    pub abandoned: u64,
    /// Physical write attempts beyond the first, summed over all goals.
    pub retries: u64,
    /// Processing tasks that ended in an internal error or panic.
    pub failed: u64,
}

impl StatsSnapshot {
    /// Events that reached a terminal outcome.
    pub fn completed(&self) -> u64 {
        self.synced + self.dropped + self.ignored + self.dead_lettered + self.abandoned + self.failed
    }

    /// Received events still being processed.
    pub fn in_progress(&self) -> u64 {
        self.received.saturating_sub(self.completed())
    }
}

impl std::ops::Add for StatsSnapshot {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self {
            received: self.received + rhs.received,
            synced: self.synced + rhs.synced,
            dropped: self.dropped + rhs.dropped,
            ignored: self.ignored + rhs.ignored,
            dead_lettered: self.dead_lettered + rhs.dead_lettered,
            abandoned: self.abandoned + rhs.abandoned,
            retries: self.retries + rhs.retries,
            failed: self.failed + rhs.failed,
        }
    }
}

impl std::iter::Sum for StatsSnapshot {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::default(), |acc, s| acc + s)
    }
}

/// Read-only view over the counters of every registered source.
///
/// Cheap to clone; the key set is fixed when the registry is built, so it
/// doubles as the list of sources the service accepts events for.
#[derive(Clone, Debug, Default)]
pub struct SourceStats {
    sources: Arc<BTreeMap<SourceId, Arc<PipelineStats>>>,
}

impl SourceStats {
    pub fn new(sources: BTreeMap<SourceId, Arc<PipelineStats>>) -> Self {
        Self {
            sources: Arc::new(sources),
        }
    }

    pub fn contains(&self, source: &SourceId) -> bool {
        self.sources.contains_key(source)
    }

    pub fn sources(&self) -> impl Iterator<Item = &SourceId> {
        self.sources.keys()
    }

    pub fn get(&self, source: &SourceId) -> Option<StatsSnapshot> {
        self.sources.get(source).map(|s| s.snapshot())
    }

    pub fn snapshot(&self) -> BTreeMap<SourceId, StatsSnapshot> {
        self.sources
            .iter()
            .map(|(id, stats)| (id.clone(), stats.snapshot()))
            .collect()
    }

    pub fn total(&self) -> StatsSnapshot {
        self.sources.values().map(|s| s.snapshot()).sum()
    }
}
