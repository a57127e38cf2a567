use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use chrono::Utc;
use tokio::sync::mpsc;
use tracing::{debug, info};

use leadsync_types::SourceId;

use crate::error::{FabricError, Result};
use crate::event::{EventKind, SourceEvent};
use crate::wal::{WalConfig, WriteAheadLog};

/// Filter for subscribing to a subset of source events.
#[derive(Clone, Debug, Default)]
pub struct EventFilter {
    /// If set, only events from these sources are delivered.
    pub sources: Option<Vec<SourceId>>,
    /// If set, only events of these kinds are delivered.
    pub kinds: Option<Vec<EventKind>>,
}

impl EventFilter {
    /// Everything one source publishes.
    pub fn source(source: SourceId) -> Self {
        Self {
            sources: Some(vec![source]),
            kinds: None,
        }
    }

    /// Returns `true` if the given event matches this filter.
    pub fn matches(&self, event: &SourceEvent) -> bool {
        if let Some(ref sources) = self.sources {
            if !sources.contains(&event.source) {
                return false;
            }
        }
        if let Some(ref kinds) = self.kinds {
            if !kinds.contains(&event.kind) {
                return false;
            }
        }
        true
    }
}

/// Receiving end of a subscription.
///
/// Unbounded, so a slow subscriber only grows its own queue: it never makes
/// `publish` block and never loses events.
pub type EventStream = mpsc::UnboundedReceiver<SourceEvent>;

struct Subscriber {
    filter: EventFilter,
    sender: mpsc::UnboundedSender<SourceEvent>,
}

/// Fan-out router that delivers events to matching subscribers.
struct EventRouter {
    subscribers: RwLock<Vec<Subscriber>>,
}

impl EventRouter {
    fn new() -> Self {
        Self {
            subscribers: RwLock::new(Vec::new()),
        }
    }

    fn subscribe(&self, filter: EventFilter) -> EventStream {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers
            .write()
            .expect("router lock poisoned")
            .push(Subscriber { filter, sender: tx });
        rx
    }

    /// Route an event to all matching subscribers, pruning closed ones.
    /// Returns the number of subscribers the event was delivered to.
    fn route(&self, event: &SourceEvent) -> usize {
        let mut delivered = 0;
        let mut subs = self.subscribers.write().expect("router lock poisoned");
        subs.retain(|sub| {
            if sub.sender.is_closed() {
                return false;
            }
            if sub.filter.matches(event) && sub.sender.send(event.clone()).is_ok() {
                delivered += 1;
            }
            true
        });
        delivered
    }

    fn subscriber_count(&self) -> usize {
        self.subscribers
            .read()
            .expect("router lock poisoned")
            .iter()
            .filter(|s| !s.sender.is_closed())
            .count()
    }
}

/// Cloneable handle consumers use to mark events as finished.
///
/// An acknowledged event is never recovered from the WAL again. Without a
/// WAL acknowledging is a no-op.
#[derive(Clone, Default)]
pub struct Acknowledger {
    wal: Option<Arc<WriteAheadLog>>,
}

impl Acknowledger {
    pub fn ack(&self, sequence: u64) -> Result<()> {
        match &self.wal {
            Some(wal) => wal.acknowledge(sequence),
            None => Ok(()),
        }
    }
}

impl std::fmt::Debug for Acknowledger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Acknowledger")
            .field("durable", &self.wal.is_some())
            .finish()
    }
}

/// Central event fabric: the host event layer sources publish into.
///
/// Each published event gets the next sequence number, is appended to the
/// WAL (when one is configured), and is then routed to matching subscribers.
/// Events stay recoverable until a consumer acknowledges them through an
/// [`Acknowledger`], so anything not known to be finished is redelivered
/// after a restart.
pub struct EventFabric {
    wal: Option<Arc<WriteAheadLog>>,
    router: EventRouter,
    next_sequence: AtomicU64,
    closed: AtomicBool,
}

impl EventFabric {
    /// Open a durable fabric, creating or reusing the WAL at `wal_path`.
    ///
    /// Sequence numbering continues after the highest sequence in the log,
    /// acknowledged or not, so a new event never inherits an old ack.
    pub fn open(wal_path: &Path, config: WalConfig) -> Result<Self> {
        let wal = WriteAheadLog::open(wal_path, config)?;
        let next = wal.last_sequence()?.map_or(1, |last| last + 1);

        info!(wal_path = %wal_path.display(), next_sequence = next, "fabric opened");

        Ok(Self {
            wal: Some(Arc::new(wal)),
            router: EventRouter::new(),
            next_sequence: AtomicU64::new(next),
            closed: AtomicBool::new(false),
        })
    }

    /// A fabric without a WAL. Events are only held by subscriber queues.
    pub fn in_memory() -> Self {
        Self {
            wal: None,
            router: EventRouter::new(),
            next_sequence: AtomicU64::new(1),
            closed: AtomicBool::new(false),
        }
    }

    /// Publish an event on behalf of a source.
    pub fn publish(
        &self,
        source: SourceId,
        kind: EventKind,
        record_id: impl Into<String>,
        body: Vec<u8>,
    ) -> Result<SourceEvent> {
        if self.closed.load(Ordering::Acquire) {
            return Err(FabricError::Shutdown);
        }

        let sequence = self.next_sequence.fetch_add(1, Ordering::SeqCst);
        let event = SourceEvent::new(sequence, source, kind, record_id, body, Utc::now());

        // Persist first (write-ahead guarantee).
        if let Some(wal) = &self.wal {
            wal.append(&event)?;
        }

        let delivered = self.router.route(&event);
        debug!(
            id = %event.id(),
            sequence,
            source = %event.source,
            kind = %event.kind,
            delivered,
            "event published"
        );
        Ok(event)
    }

    /// Deliver an already-published event again, without re-logging it.
    ///
    /// Used to replay recovered events and by hosts that retry deliveries.
    pub fn redeliver(&self, event: &SourceEvent) -> usize {
        let delivered = self.router.route(event);
        debug!(id = %event.id(), sequence = event.sequence, delivered, "event redelivered");
        delivered
    }

    /// Subscribe to events matching the given filter.
    pub fn subscribe(&self, filter: EventFilter) -> EventStream {
        self.router.subscribe(filter)
    }

    pub fn acknowledger(&self) -> Acknowledger {
        Acknowledger {
            wal: self.wal.clone(),
        }
    }

    /// Unacknowledged events still held in the WAL, oldest first.
    pub fn recover(&self) -> Result<Vec<SourceEvent>> {
        let Some(wal) = &self.wal else {
            return Ok(Vec::new());
        };
        let events = wal.recover()?;
        info!(count = events.len(), "recovered events from WAL");
        Ok(events)
    }

    /// Compact the WAL down to its unacknowledged events. Returns how many
    /// were kept.
    pub fn checkpoint(&self) -> Result<usize> {
        let Some(wal) = &self.wal else {
            return Ok(0);
        };
        let kept = wal.compact()?;
        info!(kept, "fabric checkpointed");
        Ok(kept)
    }

    /// Stop accepting new events. Subscribers keep what is already queued.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Current number of active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.router.subscriber_count()
    }
}

impl std::fmt::Debug for EventFabric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventFabric")
            .field("durable", &self.wal.is_some())
            .field("next_sequence", &self.next_sequence.load(Ordering::Relaxed))
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source(s: &str) -> SourceId {
        SourceId::new(s).unwrap()
    }

    fn temp_fabric() -> (tempfile::TempDir, EventFabric) {
        let dir = tempfile::tempdir().unwrap();
        let fabric = EventFabric::open(&dir.path().join("fabric.wal"), WalConfig::default()).unwrap();
        (dir, fabric)
    }

    #[test]
    fn publish_and_recover() {
        let (dir, fabric) = temp_fabric();
        fabric
            .publish(source("sourceA"), EventKind::Created, "L1", b"{}".to_vec())
            .unwrap();
        fabric
            .publish(source("sourceA"), EventKind::Updated, "L1", b"{}".to_vec())
            .unwrap();

        let reopened = EventFabric::open(&dir.path().join("fabric.wal"), WalConfig::default()).unwrap();
        let recovered = reopened.recover().unwrap();
        assert_eq!(recovered.len(), 2);
        assert_eq!(recovered[0].kind, EventKind::Created);
        assert_eq!(recovered[1].kind, EventKind::Updated);
        assert!(recovered.iter().all(SourceEvent::verify_integrity));
    }

    #[test]
    fn sequence_continues_after_reopen() {
        let (dir, fabric) = temp_fabric();
        let a = fabric
            .publish(source("sourceA"), EventKind::Created, "L1", b"{}".to_vec())
            .unwrap();
        let b = fabric
            .publish(source("sourceA"), EventKind::Created, "L2", b"{}".to_vec())
            .unwrap();
        assert!(b.sequence > a.sequence);
        drop(fabric);

        let reopened = EventFabric::open(&dir.path().join("fabric.wal"), WalConfig::default()).unwrap();
        let c = reopened
            .publish(source("sourceA"), EventKind::Created, "L3", b"{}".to_vec())
            .unwrap();
        assert!(c.sequence > b.sequence);
    }

    #[test]
    fn subscribers_only_see_their_source() {
        let fabric = EventFabric::in_memory();
        let mut a = fabric.subscribe(EventFilter::source(source("sourceA")));
        let mut b = fabric.subscribe(EventFilter::source(source("sourceB")));
        assert_eq!(fabric.subscriber_count(), 2);

        fabric
            .publish(source("sourceA"), EventKind::Created, "L1", b"{}".to_vec())
            .unwrap();

        assert_eq!(a.try_recv().unwrap().record_id, "L1");
        assert!(a.try_recv().is_err());
        assert!(b.try_recv().is_err());
    }

    #[test]
    fn kind_filter() {
        let fabric = EventFabric::in_memory();
        let mut created_only = fabric.subscribe(EventFilter {
            kinds: Some(vec![EventKind::Created]),
            ..Default::default()
        });

        fabric
            .publish(source("sourceA"), EventKind::Deleted, "L1", b"{}".to_vec())
            .unwrap();
        fabric
            .publish(source("sourceA"), EventKind::Created, "L2", b"{}".to_vec())
            .unwrap();

        assert_eq!(created_only.try_recv().unwrap().record_id, "L2");
        assert!(created_only.try_recv().is_err());
    }

    #[test]
    fn dropped_subscribers_are_pruned() {
        let fabric = EventFabric::in_memory();
        let stream = fabric.subscribe(EventFilter::default());
        assert_eq!(fabric.subscriber_count(), 1);
        drop(stream);
        fabric
            .publish(source("sourceA"), EventKind::Created, "L1", b"{}".to_vec())
            .unwrap();
        assert_eq!(fabric.subscriber_count(), 0);
    }

    #[test]
    fn redeliver_duplicates_without_logging() {
        let (_dir, fabric) = temp_fabric();
        let mut stream = fabric.subscribe(EventFilter::default());

        let event = fabric
            .publish(source("sourceA"), EventKind::Created, "L1", b"{}".to_vec())
            .unwrap();
        assert_eq!(fabric.redeliver(&event), 1);

        assert_eq!(stream.try_recv().unwrap(), event);
        assert_eq!(stream.try_recv().unwrap(), event);
        assert_eq!(fabric.recover().unwrap().len(), 1);
    }

    #[test]
    fn acknowledged_events_are_not_redelivered_after_reopen() {
        let (dir, fabric) = temp_fabric();
        let done = fabric
            .publish(source("sourceA"), EventKind::Created, "L1", b"{}".to_vec())
            .unwrap();
        let pending = fabric
            .publish(source("sourceA"), EventKind::Created, "L2", b"{}".to_vec())
            .unwrap();
        fabric.acknowledger().ack(done.sequence).unwrap();
        drop(fabric);

        let reopened = EventFabric::open(&dir.path().join("fabric.wal"), WalConfig::default()).unwrap();
        assert_eq!(reopened.recover().unwrap(), vec![pending.clone()]);

        let next = reopened
            .publish(source("sourceA"), EventKind::Created, "L3", b"{}".to_vec())
            .unwrap();
        assert!(next.sequence > pending.sequence);
        assert_eq!(reopened.recover().unwrap().len(), 2);
    }

    #[test]
    fn checkpoint_keeps_unacknowledged_events() {
        let (dir, fabric) = temp_fabric();
        let done = fabric
            .publish(source("sourceA"), EventKind::Created, "L1", b"{}".to_vec())
            .unwrap();
        let pending = fabric
            .publish(source("sourceB"), EventKind::Created, "L1", b"{}".to_vec())
            .unwrap();
        fabric.acknowledger().ack(done.sequence).unwrap();
        assert_eq!(fabric.checkpoint().unwrap(), 1);

        let reopened = EventFabric::open(&dir.path().join("fabric.wal"), WalConfig::default()).unwrap();
        assert_eq!(reopened.recover().unwrap(), vec![pending.clone()]);
        reopened.acknowledger().ack(pending.sequence).unwrap();
        assert_eq!(reopened.checkpoint().unwrap(), 0);
        assert!(reopened.recover().unwrap().is_empty());
    }

    #[test]
    fn in_memory_acknowledger_is_a_no_op() {
        let fabric = EventFabric::in_memory();
        assert!(fabric.acknowledger().ack(42).is_ok());
        assert_eq!(fabric.checkpoint().unwrap(), 0);
    }

    #[test]
    fn closed_fabric_rejects_publish() {
        let fabric = EventFabric::in_memory();
        fabric.close();
        assert!(fabric.is_closed());
        let err = fabric
            .publish(source("sourceA"), EventKind::Created, "L1", b"{}".to_vec())
            .unwrap_err();
        assert!(matches!(err, FabricError::Shutdown));
    }

    #[test]
    fn concurrent_publish_is_safe() {
        use std::sync::Arc;
        use std::thread;

        let dir = tempfile::tempdir().unwrap();
        let wal_path = dir.path().join("concurrent.wal");
        let fabric = Arc::new(EventFabric::open(&wal_path, WalConfig::default()).unwrap());

        let mut handles = Vec::new();
        for i in 0..4 {
            let fabric = Arc::clone(&fabric);
            handles.push(thread::spawn(move || {
                let src = source(&format!("source{i}"));
                for n in 0..25 {
                    fabric
                        .publish(src.clone(), EventKind::Created, format!("L{n}"), b"{}".to_vec())
                        .unwrap();
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }

        let recovered = EventFabric::open(&wal_path, WalConfig::default())
            .unwrap()
            .recover()
            .unwrap();
        assert_eq!(recovered.len(), 100);
        let mut seqs: Vec<u64> = recovered.iter().map(|e| e.sequence).collect();
        seqs.sort_unstable();
        seqs.dedup();
        assert_eq!(seqs.len(), 100);
    }
}
