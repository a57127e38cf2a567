use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use leadsync_fabric::{EventKind, SourceEvent};
use leadsync_types::{Document, OriginalId, SourceId, SyncEnvelope};

use crate::error::AdapterError;

/// How a source's record body maps onto canonical fields.
///
/// This is the only per-source logic in a pipeline. Normalization is purely
/// structural: fields are extracted and renamed, never validated.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum NormalizationRule {
    /// The body object is used as-is.
    #[default]
    Passthrough,
    /// Source field names are mapped to canonical names.
    Rename {
        /// `source field -> canonical field`.
        fields: BTreeMap<String, String>,
        /// Keep fields that have no mapping under their source name.
        #[serde(default)]
        keep_unmapped: bool,
    },
    /// The record lives in a nested object addressed by a JSON pointer
    /// (e.g. `/data/lead`).
    Nested { pointer: String },
}

impl NormalizationRule {
    /// Apply this rule to a parsed body.
    pub fn apply(&self, body: Value) -> Result<Document, AdapterError> {
        match self {
            Self::Passthrough => into_object(body),
            Self::Rename {
                fields,
                keep_unmapped,
            } => {
                let source = into_object(body)?;
                let mut mapped = Document::new();
                let mut renamed = Vec::new();
                for (name, value) in source {
                    match fields.get(&name) {
                        Some(target) => renamed.push((target.clone(), value)),
                        None if *keep_unmapped => {
                            mapped.insert(name, value);
                        }
                        None => {}
                    }
                }
                // Explicit mappings take precedence over unmapped names.
                mapped.extend(renamed);
                Ok(mapped)
            }
            Self::Nested { pointer } => {
                let mut body = body;
                let nested = body.pointer_mut(pointer).map(Value::take).ok_or_else(|| {
                    AdapterError::MalformedBody(format!("no value at pointer {pointer:?}"))
                })?;
                into_object(nested)
            }
        }
    }
}

fn into_object(value: Value) -> Result<Document, AdapterError> {
    match value {
        Value::Object(map) => Ok(map),
        other => Err(AdapterError::MalformedBody(format!(
            "expected a JSON object, found {}",
            json_type(&other)
        ))),
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Turns delivered creation events of one source into [`SyncEnvelope`]s.
#[derive(Clone, Debug)]
pub struct SourceAdapter {
    source: SourceId,
    rule: NormalizationRule,
}

impl SourceAdapter {
    pub fn new(source: SourceId, rule: NormalizationRule) -> Self {
        Self { source, rule }
    }

    pub fn source(&self) -> &SourceId {
        &self.source
    }

    /// Normalize one delivered event. The event itself is left untouched.
    ///
    /// May be called any number of times for the same logical record.
    pub fn on_create(&self, event: &SourceEvent) -> Result<SyncEnvelope, AdapterError> {
        if event.source != self.source {
            return Err(AdapterError::SourceMismatch {
                expected: self.source.clone(),
                actual: event.source.clone(),
            });
        }
        if event.kind != EventKind::Created {
            return Err(AdapterError::UnsupportedKind(event.kind));
        }

        let original_id =
            OriginalId::new(event.record_id.clone()).map_err(AdapterError::InvalidRecordId)?;
        let body: Value = serde_json::from_slice(&event.body)
            .map_err(|e| AdapterError::MalformedBody(e.to_string()))?;
        let payload = self.rule.apply(body)?;

        Ok(SyncEnvelope {
            source_id: self.source.clone(),
            original_id,
            payload,
            received_at: event.received_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;

    fn source(s: &str) -> SourceId {
        SourceId::new(s).unwrap()
    }

    fn event(kind: EventKind, record_id: &str, body: &str) -> SourceEvent {
        SourceEvent::new(
            1,
            source("sourceA"),
            kind,
            record_id,
            body.as_bytes().to_vec(),
            Utc::now(),
        )
    }

    #[test]
    fn passthrough_extracts_body() {
        let adapter = SourceAdapter::new(source("sourceA"), NormalizationRule::Passthrough);
        let env = adapter
            .on_create(&event(
                EventKind::Created,
                "L1",
                r#"{"name":"Asha","phone":"9999900000"}"#,
            ))
            .unwrap();
        assert_eq!(env.source_id.as_str(), "sourceA");
        assert_eq!(env.original_id.as_str(), "L1");
        assert_eq!(env.payload["name"], json!("Asha"));
        assert_eq!(env.payload["phone"], json!("9999900000"));
    }

    #[test]
    fn rename_maps_and_drops_unmapped() {
        let rule = NormalizationRule::Rename {
            fields: BTreeMap::from([
                ("full_name".to_string(), "name".to_string()),
                ("mobile".to_string(), "phone".to_string()),
            ]),
            keep_unmapped: false,
        };
        let doc = rule
            .apply(json!({"full_name": "Asha", "mobile": "99", "utm": "x"}))
            .unwrap();
        assert_eq!(doc.len(), 2);
        assert_eq!(doc["name"], json!("Asha"));
        assert_eq!(doc["phone"], json!("99"));
    }

    #[test]
    fn rename_mapping_wins_over_kept_field() {
        let rule = NormalizationRule::Rename {
            fields: BTreeMap::from([("mobile".to_string(), "phone".to_string())]),
            keep_unmapped: true,
        };
        let doc = rule
            .apply(json!({"phone": "old", "mobile": "new", "city": "Pune"}))
            .unwrap();
        assert_eq!(doc["phone"], json!("new"));
        assert_eq!(doc["city"], json!("Pune"));
    }

    #[test]
    fn nested_pointer() {
        let rule = NormalizationRule::Nested {
            pointer: "/data/lead".into(),
        };
        let doc = rule
            .apply(json!({"data": {"lead": {"name": "Asha"}}, "meta": 1}))
            .unwrap();
        assert_eq!(doc.len(), 1);
        assert_eq!(doc["name"], json!("Asha"));

        let err = rule.apply(json!({"data": {}})).unwrap_err();
        assert!(matches!(err, AdapterError::MalformedBody(_)));
    }

    #[test]
    fn malformed_bodies_are_rejected() {
        let adapter = SourceAdapter::new(source("sourceA"), NormalizationRule::Passthrough);
        for body in ["not json", "[1,2,3]", "\"Asha\"", "null"] {
            let err = adapter
                .on_create(&event(EventKind::Created, "L1", body))
                .unwrap_err();
            assert!(err.is_malformed(), "{body} should be malformed, got {err:?}");
        }
    }

    #[test]
    fn empty_record_id_is_rejected() {
        let adapter = SourceAdapter::new(source("sourceA"), NormalizationRule::Passthrough);
        let err = adapter
            .on_create(&event(EventKind::Created, "", "{}"))
            .unwrap_err();
        assert!(matches!(err, AdapterError::InvalidRecordId(_)));
    }

    #[test]
    fn updates_and_deletes_are_not_consumed() {
        let adapter = SourceAdapter::new(source("sourceA"), NormalizationRule::Passthrough);
        for kind in [EventKind::Updated, EventKind::Deleted] {
            let err = adapter.on_create(&event(kind, "L1", "{}")).unwrap_err();
            assert_eq!(err, AdapterError::UnsupportedKind(kind));
            assert!(!err.is_malformed());
        }
    }

    #[test]
    fn foreign_source_is_rejected() {
        let adapter = SourceAdapter::new(source("sourceB"), NormalizationRule::Passthrough);
        let err = adapter
            .on_create(&event(EventKind::Created, "L1", "{}"))
            .unwrap_err();
        assert!(matches!(err, AdapterError::SourceMismatch { .. }));
    }

    #[test]
    fn adapter_does_not_mutate_event() {
        let adapter = SourceAdapter::new(
            source("sourceA"),
            NormalizationRule::Nested {
                pointer: "/lead".into(),
            },
        );
        let e = event(EventKind::Created, "L1", r#"{"lead":{"name":"Asha"}}"#);
        let before = e.clone();
        adapter.on_create(&e).unwrap();
        assert_eq!(e, before);
        assert!(e.verify_integrity());
    }

    #[test]
    fn rule_deserializes_from_toml() {
        let rule: NormalizationRule = toml::from_str(
            r#"
            rule = "rename"
            [fields]
            full_name = "name"
            "#,
        )
        .unwrap();
        assert_eq!(
            rule,
            NormalizationRule::Rename {
                fields: BTreeMap::from([("full_name".to_string(), "name".to_string())]),
                keep_unmapped: false,
            }
        );
        let rule: NormalizationRule = toml::from_str(r#"rule = "passthrough""#).unwrap();
        assert_eq!(rule, NormalizationRule::Passthrough);
    }
}
