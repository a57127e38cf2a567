use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::identity::{CanonicalId, OriginalId, SourceId};
use crate::temporal::SyncTimestamp;

/// A JSON object: the normalized field map of a record.
pub type Document = serde_json::Map<String, Value>;

/// Field names owned by provenance tagging. Source payloads can never set them.
pub const RESERVED_FIELDS: [&str; 4] = [
    "original_id",
    "source_database",
    "synced_at",
    "sync_attempt_count",
];

/// Normalized, per-delivery view of a source record.
///
/// Created by a source adapter for every delivered creation event and
/// discarded once the delivery has been processed.
#[derive(Clone, Debug, PartialEq)]
pub struct SyncEnvelope {
    pub source_id: SourceId,
    pub original_id: OriginalId,
    pub payload: Document,
    pub received_at: DateTime<Utc>,
}

/// A provenance-tagged record, ready to be written to the canonical store.
///
/// `synced_at` is deliberately absent: the store stamps it at commit time.
#[derive(Clone, Debug, PartialEq)]
pub struct LeadCandidate {
    pub canonical_id: CanonicalId,
    pub fields: Document,
    pub original_id: OriginalId,
    pub source_database: SourceId,
}

/// A document in the canonical store.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CanonicalLead {
    pub id: CanonicalId,
    pub fields: Document,
    pub original_id: OriginalId,
    pub source_database: SourceId,
    pub synced_at: SyncTimestamp,
    /// Attempt number of the write that produced this version.
    pub sync_attempt_count: u32,
}

impl CanonicalLead {
    /// Materialize a candidate as committed by the store.
    pub fn from_candidate(candidate: &LeadCandidate, synced_at: SyncTimestamp, attempt: u32) -> Self {
        Self {
            id: candidate.canonical_id,
            fields: candidate.fields.clone(),
            original_id: candidate.original_id.clone(),
            source_database: candidate.source_database.clone(),
            synced_at,
            sync_attempt_count: attempt,
        }
    }

    /// The external document shape:
    /// `{...fields, original_id, source_database, synced_at, sync_attempt_count}`.
    pub fn to_document(&self) -> Document {
        let mut doc = self.fields.clone();
        doc.insert(
            "original_id".into(),
            Value::String(self.original_id.to_string()),
        );
        doc.insert(
            "source_database".into(),
            Value::String(self.source_database.to_string()),
        );
        doc.insert("synced_at".into(), Value::String(self.synced_at.to_rfc3339()));
        doc.insert(
            "sync_attempt_count".into(),
            Value::from(self.sync_attempt_count),
        );
        doc
    }
}

/// Terminal record of a sync goal that will not be retried automatically.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeadLetterEntry {
    pub id: Uuid,
    pub original_id: OriginalId,
    pub source_id: SourceId,
    pub canonical_id: CanonicalId,
    pub error: String,
    pub failed_at: DateTime<Utc>,
    pub attempts: u32,
}

impl DeadLetterEntry {
    pub fn new(candidate: &LeadCandidate, error: impl Into<String>, attempts: u32) -> Self {
        Self {
            id: Uuid::now_v7(),
            original_id: candidate.original_id.clone(),
            source_id: candidate.source_database.clone(),
            canonical_id: candidate.canonical_id,
            error: error.into(),
            failed_at: Utc::now(),
            attempts,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn candidate() -> LeadCandidate {
        let source = SourceId::new("sourceA").unwrap();
        let original = OriginalId::new("L1").unwrap();
        let mut fields = Document::new();
        fields.insert("name".into(), json!("Asha"));
        fields.insert("phone".into(), json!("9999900000"));
        LeadCandidate {
            canonical_id: CanonicalId::derive(&source, &original),
            fields,
            original_id: original,
            source_database: source,
        }
    }

    #[test]
    fn document_carries_fields_and_provenance() {
        let lead = CanonicalLead::from_candidate(
            &candidate(),
            SyncTimestamp::new(1_700_000_000_000, 0, 1),
            3,
        );
        let doc = lead.to_document();
        assert_eq!(doc["name"], json!("Asha"));
        assert_eq!(doc["phone"], json!("9999900000"));
        assert_eq!(doc["original_id"], json!("L1"));
        assert_eq!(doc["source_database"], json!("sourceA"));
        assert_eq!(doc["synced_at"], json!("2023-11-14T22:13:20.000Z"));
        assert_eq!(doc["sync_attempt_count"], json!(3));
    }

    #[test]
    fn dead_letter_entry_copies_provenance() {
        let c = candidate();
        let entry = DeadLetterEntry::new(&c, "permission denied", 1);
        assert_eq!(entry.original_id, c.original_id);
        assert_eq!(entry.source_id, c.source_database);
        assert_eq!(entry.canonical_id, c.canonical_id);
        assert_eq!(entry.attempts, 1);
    }

    #[test]
    fn dead_letter_entry_serde_roundtrip() {
        let entry = DeadLetterEntry::new(&candidate(), "timeout", 5);
        let json = serde_json::to_string(&entry).unwrap();
        let parsed: DeadLetterEntry = serde_json::from_str(&json).unwrap();
        assert_eq!(entry, parsed);
    }
}
