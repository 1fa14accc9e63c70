//! Typed events received on the Orion event stream.
//!
//! Frames arrive as loosely-shaped JSON objects tagged by `event_type`. They
//! are decoded once, at the transport boundary, into [`InboundEvent`]. Fields
//! the platform sends that are not modelled here are kept in `extra` so that
//! [`InboundEvent::to_value`] hands downstream consumers the full payload.
//!
//! The kind is decided by `event_type` alone. A known field carrying an
//! unexpected type is left untyped in `extra` instead of demoting the event.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};

use crate::error::OrionError;

/// Event types that carry a multimedia reference and may be encrypted.
pub const MULTIMEDIA_KINDS: [&str; 3] = ["text", "image", "multimedia"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct PttEvent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender: Option<String>,
    /// Only present on direct (targeted) transmissions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ts: Option<Number>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct UserStatusEvent {
    /// The user the status belongs to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct MultimediaEvent {
    pub event_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_user_id: Option<String>,
    /// Set when the payload is encrypted with a stream key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream_key: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, JsonSchema)]
pub struct PingEvent {
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum InboundEvent {
    Ptt(PttEvent),
    UserStatus(UserStatusEvent),
    Multimedia(MultimediaEvent),
    Ping(PingEvent),
    Other(Value),
}

impl InboundEvent {
    /// Decode a raw text frame.
    pub fn decode(raw: &str) -> Result<Self, OrionError> {
        let value: Value = serde_json::from_str(raw)?;
        Self::from_value(value)
    }

    /// Classify a JSON object by its `event_type`.
    pub fn from_value(value: Value) -> Result<Self, OrionError> {
        let Value::Object(mut map) = value else {
            return Err(OrionError::Decode("event is not a JSON object".into()));
        };
        let kind = map
            .get("event_type")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_default();

        let event = match kind.as_str() {
            "ptt" => {
                map.remove("event_type");
                InboundEvent::Ptt(PttEvent {
                    sender: take_str(&mut map, "sender"),
                    target_user_id: take_str(&mut map, "target_user_id"),
                    media: take_str(&mut map, "media"),
                    ts: take_number(&mut map, "ts"),
                    extra: map,
                })
            }
            "userstatus" => {
                map.remove("event_type");
                InboundEvent::UserStatus(UserStatusEvent { id: take_str(&mut map, "id"), extra: map })
            }
            "ping" => {
                map.remove("event_type");
                InboundEvent::Ping(PingEvent { extra: map })
            }
            k if MULTIMEDIA_KINDS.contains(&k) => {
                map.remove("event_type");
                InboundEvent::Multimedia(MultimediaEvent {
                    event_type: kind.clone(),
                    sender: take_str(&mut map, "sender"),
                    target_user_id: take_str(&mut map, "target_user_id"),
                    stream_key: take_str(&mut map, "stream_key"),
                    extra: map,
                })
            }
            _ => InboundEvent::Other(Value::Object(map)),
        };
        Ok(event)
    }

    /// The `event_type` tag, preserved through any transformation.
    pub fn kind(&self) -> &str {
        match self {
            InboundEvent::Ptt(_) => "ptt",
            InboundEvent::UserStatus(_) => "userstatus",
            InboundEvent::Multimedia(e) => &e.event_type,
            InboundEvent::Ping(_) => "ping",
            InboundEvent::Other(v) => v.get("event_type").and_then(Value::as_str).unwrap_or("unknown"),
        }
    }

    /// Re-assemble the full JSON payload including `event_type`.
    pub fn to_value(&self) -> Value {
        let (tag, body) = match self {
            InboundEvent::Ptt(e) => ("ptt", serde_json::to_value(e)),
            InboundEvent::UserStatus(e) => ("userstatus", serde_json::to_value(e)),
            InboundEvent::Ping(e) => ("ping", serde_json::to_value(e)),
            InboundEvent::Multimedia(e) => return serde_json::to_value(e).unwrap_or(Value::Null),
            InboundEvent::Other(v) => return v.clone(),
        };
        match body {
            Ok(Value::Object(mut map)) => {
                map.insert("event_type".into(), Value::String(tag.into()));
                Value::Object(map)
            }
            _ => Value::Null,
        }
    }
}

/// Remove `key` when it holds a string; anything else stays in `map`.
fn take_str(map: &mut Map<String, Value>, key: &str) -> Option<String> {
    if !map.get(key).is_some_and(Value::is_string) {
        return None;
    }
    match map.remove(key) {
        Some(Value::String(s)) => Some(s),
        _ => None,
    }
}

fn take_number(map: &mut Map<String, Value>, key: &str) -> Option<Number> {
    if !map.get(key).is_some_and(Value::is_number) {
        return None;
    }
    match map.remove(key) {
        Some(Value::Number(n)) => Some(n),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_ptt_keeps_unknown_fields() {
        let raw = r#"{"event_type":"ptt","sender":"u1","target_user_id":"u2","media":"https://m/1.ov","ts":1.5,"group_id":"g1"}"#;
        let event = InboundEvent::decode(raw).unwrap();
        let InboundEvent::Ptt(ptt) = &event else { panic!("expected ptt, got {event:?}") };
        assert_eq!(ptt.sender.as_deref(), Some("u1"));
        assert_eq!(ptt.target_user_id.as_deref(), Some("u2"));
        assert_eq!(ptt.extra.get("group_id"), Some(&json!("g1")));
        assert_eq!(event.to_value(), serde_json::from_str::<Value>(raw).unwrap());
    }

    #[test]
    fn test_decode_classifies_kinds() {
        let cases = [
            (json!({"event_type":"userstatus","id":"u1"}), "userstatus"),
            (json!({"event_type":"ping"}), "ping"),
            (json!({"event_type":"text","sender":"u1","stream_key":"k"}), "text"),
            (json!({"event_type":"image"}), "image"),
            (json!({"event_type":"weather","temp":3}), "weather"),
        ];
        for (value, kind) in cases {
            let event = InboundEvent::from_value(value.clone()).unwrap();
            assert_eq!(event.kind(), kind);
            assert_eq!(event.to_value(), value);
        }
    }

    #[test]
    fn test_off_type_fields_keep_the_kind() {
        let value = json!({"event_type":"ptt","sender":"bob","ts":"1700000000.5","target_user_id":"u-self"});
        let event = InboundEvent::from_value(value.clone()).unwrap();
        let InboundEvent::Ptt(ptt) = &event else { panic!("expected ptt, got {event:?}") };
        assert_eq!(ptt.sender.as_deref(), Some("bob"));
        assert_eq!(ptt.target_user_id.as_deref(), Some("u-self"));
        assert!(ptt.ts.is_none());
        assert_eq!(event.to_value(), value);

        let value = json!({"event_type":"userstatus","id":7,"status":"busy"});
        let event = InboundEvent::from_value(value.clone()).unwrap();
        assert!(matches!(&event, InboundEvent::UserStatus(s) if s.id.is_none()));
        assert_eq!(event.to_value(), value);

        let value = json!({"event_type":"text","stream_key":false});
        let event = InboundEvent::from_value(value.clone()).unwrap();
        assert_eq!(event.kind(), "text");
        assert_eq!(event.to_value(), value);
    }

    #[test]
    fn test_non_object_is_an_error() {
        assert!(InboundEvent::decode("[1,2]").is_err());
        assert!(InboundEvent::decode("not json").is_err());
    }
}
