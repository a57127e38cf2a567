use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use leadsync_types::SourceId;

/// Content-derived identifier of a published event.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventId {
    pub hash: [u8; 32],
}

impl EventId {
    pub fn from_hash(hash: [u8; 32]) -> Self {
        Self { hash }
    }

    /// Short hex representation (first 8 hex chars).
    pub fn short_hex(&self) -> String {
        hex::encode(&self.hash[..4])
    }
}

impl std::fmt::Display for EventId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "evt:{}", self.short_hex())
    }
}

/// Kind of change a source reports for one of its records.
///
/// Sources may publish all three; only [`EventKind::Created`] is consumed by
/// the sync pipelines.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Created,
    Updated,
    Deleted,
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Created => "created",
            Self::Updated => "updated",
            Self::Deleted => "deleted",
        };
        f.write_str(s)
    }
}

/// A single source event flowing through the fabric.
///
/// `record_id` and `body` are carried exactly as the source delivered them.
/// Structural validation is the source adapter's job, so a malformed body
/// still makes it into the log and to the pipeline, where it is dropped.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceEvent {
    /// Fabric-assigned, monotonically increasing publish sequence.
    pub sequence: u64,
    /// The source store that produced the event.
    pub source: SourceId,
    pub kind: EventKind,
    /// The record's id in its source store.
    pub record_id: String,
    /// The full document body as raw JSON bytes.
    pub body: Vec<u8>,
    /// When the fabric accepted the event.
    pub received_at: DateTime<Utc>,
    /// BLAKE3 hash over (sequence, source, kind, record_id, body).
    pub integrity_hash: [u8; 32],
}

impl SourceEvent {
    /// Build a new event, computing its integrity hash.
    pub fn new(
        sequence: u64,
        source: SourceId,
        kind: EventKind,
        record_id: impl Into<String>,
        body: Vec<u8>,
        received_at: DateTime<Utc>,
    ) -> Self {
        let record_id = record_id.into();
        let integrity_hash = Self::compute_integrity(sequence, &source, kind, &record_id, &body);
        Self {
            sequence,
            source,
            kind,
            record_id,
            body,
            received_at,
            integrity_hash,
        }
    }

    pub fn id(&self) -> EventId {
        EventId::from_hash(self.integrity_hash)
    }

    /// Verify the integrity hash matches the event's content.
    pub fn verify_integrity(&self) -> bool {
        let expected = Self::compute_integrity(
            self.sequence,
            &self.source,
            self.kind,
            &self.record_id,
            &self.body,
        );
        self.integrity_hash == expected
    }

    fn compute_integrity(
        sequence: u64,
        source: &SourceId,
        kind: EventKind,
        record_id: &str,
        body: &[u8],
    ) -> [u8; 32] {
        let mut hasher = blake3::Hasher::new();
        hasher.update(b"leadsync-source-event-v1:");
        hasher.update(&sequence.to_le_bytes());
        for part in [source.as_str().as_bytes(), record_id.as_bytes(), body] {
            hasher.update(&(part.len() as u64).to_le_bytes());
            hasher.update(part);
        }
        hasher.update(&[kind as u8]);
        *hasher.finalize().as_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(kind: EventKind, body: &[u8]) -> SourceEvent {
        SourceEvent::new(
            7,
            SourceId::new("sourceA").unwrap(),
            kind,
            "L1",
            body.to_vec(),
            Utc::now(),
        )
    }

    #[test]
    fn integrity_roundtrip() {
        assert!(event(EventKind::Created, br#"{"name":"Asha"}"#).verify_integrity());
    }

    #[test]
    fn tampering_is_detected() {
        let mut e = event(EventKind::Created, br#"{"name":"Asha"}"#);
        e.body = br#"{"name":"Mallory"}"#.to_vec();
        assert!(!e.verify_integrity());
    }

    #[test]
    fn kinds_produce_different_ids() {
        let a = event(EventKind::Created, b"{}");
        let b = event(EventKind::Deleted, b"{}");
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn display_forms() {
        assert_eq!(EventKind::Created.to_string(), "created");
        let id = EventId::from_hash([0xab; 32]);
        assert_eq!(format!("{id}"), "evt:abababab");
    }

    #[test]
    fn bincode_roundtrip() {
        let e = event(EventKind::Updated, b"not json at all");
        let bytes = bincode::serialize(&e).unwrap();
        let decoded: SourceEvent = bincode::deserialize(&bytes).unwrap();
        assert_eq!(e, decoded);
        assert!(decoded.verify_integrity());
    }
}
