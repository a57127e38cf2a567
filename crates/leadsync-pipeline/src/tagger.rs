use leadsync_types::{CanonicalId, LeadCandidate, SyncEnvelope, RESERVED_FIELDS};
use tracing::debug;

/// Attach provenance to an envelope and compute its canonical address.
///
/// Pure: the same envelope always yields the same candidate. Payload keys
/// that collide with provenance fields are discarded, so a source can never
/// spoof another record's origin. `synced_at` is left to the store.
pub fn tag(envelope: SyncEnvelope) -> LeadCandidate {
    let SyncEnvelope {
        source_id,
        original_id,
        mut payload,
        ..
    } = envelope;

    for key in RESERVED_FIELDS {
        if payload.remove(key).is_some() {
            debug!(source = %source_id, original_id = %original_id, field = key, "reserved field stripped");
        }
    }

    LeadCandidate {
        canonical_id: CanonicalId::derive(&source_id, &original_id),
        fields: payload,
        original_id,
        source_database: source_id,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use leadsync_types::{Document, OriginalId, SourceId};
    use serde_json::json;

    fn envelope(source: &str, original: &str, payload: serde_json::Value) -> SyncEnvelope {
        let serde_json::Value::Object(payload) = payload else {
            panic!("payload must be an object");
        };
        SyncEnvelope {
            source_id: SourceId::new(source).unwrap(),
            original_id: OriginalId::new(original).unwrap(),
            payload,
            received_at: Utc::now(),
        }
    }

    #[test]
    fn adds_provenance_and_canonical_id() {
        let c = tag(envelope("sourceA", "L1", json!({"name": "Asha"})));
        assert_eq!(c.original_id.as_str(), "L1");
        assert_eq!(c.source_database.as_str(), "sourceA");
        assert_eq!(
            c.canonical_id,
            CanonicalId::derive(&c.source_database, &c.original_id)
        );
        assert_eq!(c.fields["name"], json!("Asha"));
    }

    #[test]
    fn is_deterministic_across_redeliveries() {
        let a = tag(envelope("sourceA", "L1", json!({"name": "Asha"})));
        let b = tag(envelope("sourceA", "L1", json!({"name": "Asha"})));
        assert_eq!(a, b);
    }

    #[test]
    fn same_original_id_in_two_sources_is_two_records() {
        let a = tag(envelope("sourceA", "123", json!({})));
        let b = tag(envelope("sourceB", "123", json!({})));
        assert_ne!(a.canonical_id, b.canonical_id);
    }

    #[test]
    fn provenance_cannot_be_spoofed() {
        let c = tag(envelope(
            "sourceA",
            "L1",
            json!({
                "name": "Asha",
                "source_database": "sourceZ",
                "original_id": "other",
                "synced_at": "1999-01-01T00:00:00Z",
                "sync_attempt_count": 99
            }),
        ));
        let mut expected = Document::new();
        expected.insert("name".into(), json!("Asha"));
        assert_eq!(c.fields, expected);
        assert_eq!(c.source_database.as_str(), "sourceA");
    }
}
