//! Decoding of queue message bodies into lifecycle events.
//!
//! A body is either the lifecycle payload itself (hook targets the queue
//! directly) or a pub/sub notification whose `Message` field holds the
//! payload as a JSON string (hook targets a topic the queue subscribes to).

use serde_json::Value;

use crate::{EventError, LifecycleEvent};

const NOTIFICATION_TYPE: &str = "Notification";

/// Decode a raw message body into a validated lifecycle event.
///
/// Decoding is pure: calling it twice on the same body yields the same result.
pub fn decode_notification(body: &str) -> Result<LifecycleEvent, EventError> {
    let body = body.trim();
    if body.is_empty() {
        return Err(EventError::InvalidPayload("empty body".to_string()));
    }

    let value: Value = serde_json::from_str(body)?;
    let value = unwrap_envelope(value)?;

    if !value.is_object() {
        return Err(EventError::InvalidPayload(format!(
            "expected a JSON object, got {}",
            json_kind(&value)
        )));
    }

    let event: LifecycleEvent = serde_json::from_value(value)?;
    event.validate()?;

    Ok(event)
}

fn unwrap_envelope(value: Value) -> Result<Value, EventError> {
    let is_envelope = value
        .get("Type")
        .and_then(Value::as_str)
        .is_some_and(|t| t == NOTIFICATION_TYPE);
    if !is_envelope {
        return Ok(value);
    }

    match value.get("Message") {
        Some(Value::String(inner)) => Ok(serde_json::from_str(inner)?),
        Some(other) => Err(EventError::InvalidPayload(format!(
            "notification Message must be a string, got {}",
            json_kind(other)
        ))),
        None => Err(EventError::InvalidPayload(
            "notification envelope has no Message".to_string(),
        )),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
