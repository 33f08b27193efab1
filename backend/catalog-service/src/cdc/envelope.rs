//! Change envelope codec.
//!
//! Turns a raw transport payload into a [`ChangeEnvelope`]. Pure and strict:
//! the snapshot required by the declared operation (`before` for deletes,
//! `after` for creates/updates) must be present and carry an id, otherwise
//! decoding fails with a [`DecodeError`], which callers treat as permanent.
//!
//! Both envelope shapes emitted by Debezium are accepted:
//! - with the schema wrapper: `{"schema": ..., "payload": {"before", "after", "op"}}`
//! - without it (`value.converter.schemas.enable = false`): `{"before", "after", "op"}`
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::operation::{Operation, OperationClassifier};
use crate::models::deserialize_id;

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("payload is not well-formed JSON: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("envelope is not a JSON object")]
    NotAnObject,

    #[error("envelope has no payload")]
    MissingPayload,

    #[error("envelope payload has no operation code")]
    MissingOperation,

    #[error("{operation} envelope requires a non-null '{field}' snapshot")]
    MissingSnapshot {
        operation: Operation,
        field: &'static str,
    },

    #[error("'{field}' snapshot is invalid: {reason}")]
    InvalidSnapshot { field: &'static str, reason: String },
}

/// Row image carried by a change event: the id plus whatever columns the
/// source projected. Treated as possibly partial.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeSnapshot {
    #[serde(deserialize_with = "deserialize_id")]
    pub id: String,
    #[serde(flatten)]
    pub attributes: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChangePayload {
    pub before: Option<ChangeSnapshot>,
    pub after: Option<ChangeSnapshot>,
    /// Source-specific operation code, as received
    pub operation: String,
}

/// Decoded change event.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEnvelope {
    pub payload: ChangePayload,
    operation: Operation,
}

impl ChangeEnvelope {
    pub fn operation(&self) -> Operation {
        self.operation
    }

    pub fn raw_operation(&self) -> &str {
        &self.payload.operation
    }

    /// Id the operation applies to: `before.id` for deletes, `after.id`
    /// otherwise (falling back to `before` for unknown operations).
    pub fn entity_id(&self) -> Option<&str> {
        let snapshot = match self.operation {
            Operation::Delete => self.payload.before.as_ref(),
            Operation::Create | Operation::Update => self.payload.after.as_ref(),
            Operation::Unknown => self.payload.after.as_ref().or(self.payload.before.as_ref()),
        };
        snapshot.map(|s| s.id.as_str())
    }
}

/// True when the transport delivered no value (tombstone / heartbeat).
pub fn is_empty_payload(raw: Option<&[u8]>) -> bool {
    match raw {
        None => true,
        Some(bytes) => bytes.iter().all(|b| b.is_ascii_whitespace()),
    }
}

#[derive(Debug, Clone, Default)]
pub struct EnvelopeCodec {
    classifier: OperationClassifier,
}

impl EnvelopeCodec {
    pub fn new(classifier: OperationClassifier) -> Self {
        Self { classifier }
    }

    pub fn decode(&self, raw: &[u8]) -> Result<ChangeEnvelope, DecodeError> {
        let value: Value = serde_json::from_slice(raw)?;
        let Value::Object(mut root) = value else {
            return Err(DecodeError::NotAnObject);
        };

        let mut payload = match root.remove("payload") {
            Some(Value::Object(payload)) => payload,
            Some(_) => return Err(DecodeError::MissingPayload),
            None if root.contains_key("op") || root.contains_key("operation") => root,
            None => return Err(DecodeError::MissingPayload),
        };

        let code = match payload.remove("operation").or_else(|| payload.remove("op")) {
            Some(Value::String(code)) => code,
            _ => return Err(DecodeError::MissingOperation),
        };
        let operation = self.classifier.classify(&code);

        let before = payload.remove("before").filter(|v| !v.is_null());
        let after = payload.remove("after").filter(|v| !v.is_null());

        let (before, after) = match operation {
            Operation::Delete => (
                Some(required_snapshot(before, operation, "before")?),
                optional_snapshot(after),
            ),
            Operation::Create | Operation::Update => (
                optional_snapshot(before),
                Some(required_snapshot(after, operation, "after")?),
            ),
            Operation::Unknown => (optional_snapshot(before), optional_snapshot(after)),
        };

        Ok(ChangeEnvelope {
            payload: ChangePayload {
                before,
                after,
                operation: code,
            },
            operation,
        })
    }
}

fn required_snapshot(
    value: Option<Value>,
    operation: Operation,
    field: &'static str,
) -> Result<ChangeSnapshot, DecodeError> {
    let value = value.ok_or(DecodeError::MissingSnapshot { operation, field })?;
    serde_json::from_value(value).map_err(|e| DecodeError::InvalidSnapshot {
        field,
        reason: e.to_string(),
    })
}

fn optional_snapshot(value: Option<Value>) -> Option<ChangeSnapshot> {
    value.and_then(|v| serde_json::from_value(v).ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn decode(value: Value) -> Result<ChangeEnvelope, DecodeError> {
        EnvelopeCodec::default().decode(value.to_string().as_bytes())
    }

    #[test]
    fn test_decode_create() {
        let envelope = decode(json!({
            "payload": {
                "before": null,
                "after": {"id": "42", "name": "Drama"},
                "operation": "c"
            }
        }))
        .unwrap();

        assert_eq!(envelope.operation(), Operation::Create);
        assert_eq!(envelope.raw_operation(), "c");
        assert_eq!(envelope.entity_id(), Some("42"));
        assert_eq!(
            envelope.payload.after.as_ref().unwrap().attributes.get("name"),
            Some(&json!("Drama"))
        );
    }

    #[test]
    fn test_decode_delete_uses_before() {
        let envelope = decode(json!({
            "payload": {"before": {"id": "42"}, "after": null, "operation": "d"}
        }))
        .unwrap();

        assert_eq!(envelope.operation(), Operation::Delete);
        assert_eq!(envelope.entity_id(), Some("42"));
        assert!(envelope.payload.after.is_none());
    }

    #[test]
    fn test_debezium_op_alias_and_numeric_id() {
        let envelope = decode(json!({
            "schema": {"type": "struct"},
            "payload": {"before": null, "after": {"id": 9, "name": "Horror"}, "op": "r", "ts_ms": 1}
        }))
        .unwrap();

        assert_eq!(envelope.operation(), Operation::Create);
        assert_eq!(envelope.entity_id(), Some("9"));
    }

    #[test]
    fn test_schemaless_envelope() {
        let envelope = decode(json!({
            "before": {"id": "1"},
            "after": {"id": "1", "name": "Comedy"},
            "op": "u"
        }))
        .unwrap();

        assert_eq!(envelope.operation(), Operation::Update);
        assert_eq!(envelope.entity_id(), Some("1"));
        assert!(envelope.payload.before.is_some());
    }

    #[test]
    fn test_create_without_after_is_rejected() {
        let err = decode(json!({
            "payload": {"before": null, "after": null, "operation": "c"}
        }))
        .unwrap_err();

        assert!(matches!(
            err,
            DecodeError::MissingSnapshot {
                operation: Operation::Create,
                field: "after"
            }
        ));
    }

    #[test]
    fn test_delete_without_before_is_rejected() {
        let err = decode(json!({
            "payload": {"before": null, "after": {"id": "1"}, "operation": "d"}
        }))
        .unwrap_err();

        assert!(matches!(
            err,
            DecodeError::MissingSnapshot {
                operation: Operation::Delete,
                field: "before"
            }
        ));
    }

    #[test]
    fn test_required_snapshot_without_id_is_rejected() {
        let err = decode(json!({
            "payload": {"before": null, "after": {"name": "No id"}, "operation": "u"}
        }))
        .unwrap_err();

        assert!(matches!(err, DecodeError::InvalidSnapshot { field: "after", .. }));
    }

    #[test]
    fn test_unknown_operation_decodes_without_snapshots() {
        let envelope = decode(json!({
            "payload": {"before": null, "after": null, "operation": "t"}
        }))
        .unwrap();

        assert_eq!(envelope.operation(), Operation::Unknown);
        assert_eq!(envelope.entity_id(), None);
    }

    #[test]
    fn test_structural_failures() {
        let codec = EnvelopeCodec::default();

        assert!(matches!(
            codec.decode(b"{not json"),
            Err(DecodeError::Malformed(_))
        ));
        assert!(matches!(codec.decode(b"[1,2]"), Err(DecodeError::NotAnObject)));
        assert!(matches!(
            codec.decode(br#"{"payload": null}"#),
            Err(DecodeError::MissingPayload)
        ));
        assert!(matches!(
            codec.decode(br#"{"something": "else"}"#),
            Err(DecodeError::MissingPayload)
        ));
        assert!(matches!(
            codec.decode(br#"{"payload": {"after": {"id": "1"}}}"#),
            Err(DecodeError::MissingOperation)
        ));
    }

    #[test]
    fn test_empty_payload_detection() {
        assert!(is_empty_payload(None));
        assert!(is_empty_payload(Some(b"")));
        assert!(is_empty_payload(Some(b"  \n")));
        assert!(!is_empty_payload(Some(b"{}")));
    }
}
