use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::timestamp;

const FIELD_ID: &str = "MessageId";
const FIELD_BODY: &str = "Content";
const FIELD_CREATED: &str = "CreatedOn";
const FIELD_SENDER: &str = "Sender";

/// The payload is missing a field the core cannot work without. Such
/// records are dropped by the caller, counted, and never retried.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RecordError {
    #[error("record is not a JSON object")]
    NotAnObject,

    #[error("record has no message id")]
    MissingId,

    #[error("record has no body")]
    MissingBody,
}

/// A decoded chat message. Immutable once decoded.
#[derive(Debug, Clone)]
pub struct MessageRecord {
    /// Server-assigned unique message id, the dedup key.
    pub id: String,

    /// Sender identity, when the payload names one.
    pub sender: Option<String>,

    /// Plain-text message body.
    pub body: String,

    /// Creation time, when the wire timestamp parsed. Records without one
    /// keep their payload but contribute nothing to catch-up ordering.
    pub created_on: Option<DateTime<Utc>>,

    /// The wire form of the creation time, persisted verbatim as the
    /// watermark.
    pub created_on_text: Option<String>,

    /// The raw payload the record was decoded from.
    pub raw: Value,
}

impl MessageRecord {
    /// Decode a wire record. Fails on a missing id or body; an absent or
    /// unparsable creation time is kept as `None`.
    pub fn decode(payload: &Value) -> Result<Self, RecordError> {
        let object = payload.as_object().ok_or(RecordError::NotAnObject)?;

        let id = object
            .get(FIELD_ID)
            .and_then(Value::as_str)
            .ok_or(RecordError::MissingId)?
            .to_string();
        let body = object
            .get(FIELD_BODY)
            .and_then(Value::as_str)
            .ok_or(RecordError::MissingBody)?
            .to_string();
        let sender = object
            .get(FIELD_SENDER)
            .and_then(Value::as_str)
            .map(str::to_string);
        let created_on_text = object
            .get(FIELD_CREATED)
            .and_then(Value::as_str)
            .map(str::to_string);
        let created_on = created_on_text
            .as_deref()
            .and_then(|text| timestamp::parse(text).ok());

        Ok(Self {
            id,
            sender,
            body,
            created_on,
            created_on_text,
            raw: payload.clone(),
        })
    }
}

/// Push envelopes wrap the message as `{"record": {...}}`. Returns `None`
/// for envelopes carrying no record, which are silently ignored.
pub fn record_payload(event: &Value) -> Option<&Value> {
    event.get("record")
}
