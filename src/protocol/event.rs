//! Inbound server messages.
//!
//! Both transports reduce what they receive to an [`Envelope`]: a type tag plus
//! a JSON payload. The socket transport reads the tag from the `type` field;
//! the push transport uses the SSE event name. [`Envelope::parse`] then turns
//! the envelope into a typed [`ParsedEvent`].
//!
//! # Tags
//!
//! | Tags | Event |
//! |------|-------|
//! | `telemetry`, `robot_status` | [`ParsedEvent::Telemetry`] |
//! | `new_image`, `image`, `vision`, `snapshot` | [`ParsedEvent::Perception`] |
//! | `obstacle_detected`, `obstacle`, `hazard` | [`ParsedEvent::Obstacle`] |
//! | `log_event`, `log`, `ack` | [`ParsedEvent::Log`] |
//! | `pong`, `heartbeat` | [`ParsedEvent::HeartbeatReply`] |
//! | `ping` | [`ParsedEvent::Keepalive`] |
//! | anything else | [`ParsedEvent::Unknown`] |

// ============================================================================
// Imports
// ============================================================================

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Error, Result};
use crate::identifiers::CorrelationId;

// ============================================================================
// Constants
// ============================================================================

/// SSE event name used when the server sends untyped `data:` lines.
const SSE_DEFAULT_EVENT: &str = "message";

/// Field carrying the type tag in socket messages.
const TAG_FIELD: &str = "type";

// ============================================================================
// Envelope
// ============================================================================

/// A raw inbound message: type tag plus payload.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    /// Type tag as sent by the backend.
    pub tag: String,
    /// Message body.
    pub payload: Value,
}

impl Envelope {
    /// Creates an envelope.
    #[inline]
    #[must_use]
    pub fn new(tag: impl Into<String>, payload: Value) -> Self {
        Self {
            tag: tag.into(),
            payload,
        }
    }

    /// Decodes a socket text frame (`{"type": ..., ...}`).
    ///
    /// # Errors
    ///
    /// Returns [`Error::MalformedMessage`] if the frame is not a JSON object
    /// with a string `type` field.
    pub fn from_text(text: &str) -> Result<Self> {
        let value: Value =
            serde_json::from_str(text).map_err(|e| Error::malformed(format!("invalid JSON: {e}")))?;

        let tag = value
            .get(TAG_FIELD)
            .and_then(Value::as_str)
            .ok_or_else(|| Error::malformed("missing string 'type' field"))?
            .to_string();

        Ok(Self { tag, payload: value })
    }

    /// Decodes one SSE event.
    ///
    /// Untyped events (`message`) are decoded like socket frames. Empty data
    /// becomes `null`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MalformedMessage`] if the data is not valid JSON.
    pub fn from_sse(event: &str, data: &str) -> Result<Self> {
        if event.is_empty() || event == SSE_DEFAULT_EVENT {
            return Self::from_text(data);
        }

        let payload = if data.trim().is_empty() {
            Value::Null
        } else {
            serde_json::from_str(data)
                .map_err(|e| Error::malformed(format!("invalid JSON in '{event}' event: {e}")))?
        };

        Ok(Self::new(event, payload))
    }

    /// Returns the event class for this tag.
    #[must_use]
    pub fn kind(&self) -> EventKind {
        EventKind::from_tag(&self.tag)
    }

    /// Parses the envelope into a typed event.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MalformedMessage`] when a known tag carries a payload
    /// of the wrong shape. Unknown tags are not an error.
    pub fn parse(&self) -> Result<ParsedEvent> {
        match self.kind() {
            EventKind::Telemetry => self.parse_telemetry(),
            EventKind::Perception => Ok(ParsedEvent::Perception(PerceptionPayload::from_value(
                &self.payload,
            ))),
            EventKind::Obstacle => Ok(ParsedEvent::Obstacle(self.payload.clone())),
            EventKind::Log => Ok(ParsedEvent::Log(LogPayload::from_envelope(self))),
            EventKind::HeartbeatReply => self.parse_heartbeat_reply(),
            EventKind::Keepalive => Ok(ParsedEvent::Keepalive),
            EventKind::Unknown => Ok(ParsedEvent::Unknown {
                tag: self.tag.clone(),
                payload: self.payload.clone(),
            }),
        }
    }

    fn parse_telemetry(&self) -> Result<ParsedEvent> {
        let Value::Object(fields) = &self.payload else {
            return Err(Error::malformed(format!(
                "'{}' payload is not an object",
                self.tag
            )));
        };

        let mut fields = fields.clone();
        fields.remove(TAG_FIELD);
        Ok(ParsedEvent::Telemetry(fields))
    }

    fn parse_heartbeat_reply(&self) -> Result<ParsedEvent> {
        ["t0", "echoedTimestamp", "timestamp"]
            .iter()
            .find_map(|key| self.payload.get(*key).and_then(Value::as_i64))
            .map(|echoed_ms| ParsedEvent::HeartbeatReply { echoed_ms })
            .ok_or_else(|| Error::malformed("heartbeat reply without echoed timestamp"))
    }
}

// ============================================================================
// EventKind
// ============================================================================

/// Coarse event class, used to key subscriber handlers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// Partial robot state.
    Telemetry,
    /// New captured image.
    Perception,
    /// Hazard notification.
    Obstacle,
    /// Log line or command acknowledgement.
    Log,
    /// Heartbeat reply.
    HeartbeatReply,
    /// Server keepalive; carries nothing.
    Keepalive,
    /// Unrecognized tag.
    Unknown,
}

impl EventKind {
    /// Classifies a type tag.
    #[must_use]
    pub fn from_tag(tag: &str) -> Self {
        match tag {
            "telemetry" | "robot_status" => Self::Telemetry,
            "new_image" | "image" | "vision" | "snapshot" => Self::Perception,
            "obstacle_detected" | "obstacle" | "hazard" => Self::Obstacle,
            "log_event" | "log" | "ack" => Self::Log,
            "pong" | "heartbeat" => Self::HeartbeatReply,
            "ping" => Self::Keepalive,
            _ => Self::Unknown,
        }
    }
}

// ============================================================================
// ParsedEvent
// ============================================================================

/// Typed inbound event.
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedEvent {
    /// Partial telemetry fields (tag field removed).
    Telemetry(Map<String, Value>),
    /// New image notification.
    Perception(PerceptionPayload),
    /// Free-form hazard payload.
    Obstacle(Value),
    /// Log line or acknowledgement.
    Log(LogPayload),
    /// Heartbeat reply echoing the probe timestamp (ms since epoch).
    HeartbeatReply {
        /// Echoed client timestamp.
        echoed_ms: i64,
    },
    /// Server keepalive.
    Keepalive,
    /// Unknown tag.
    Unknown {
        /// Tag as received.
        tag: String,
        /// Payload as received.
        payload: Value,
    },
}

// ============================================================================
// PerceptionPayload
// ============================================================================

/// Fields of a new-image event. The URL may be absent when the backend only
/// announces that an image exists.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerceptionPayload {
    /// Image location.
    pub url: Option<String>,
    /// Human-readable description.
    pub description: Option<String>,
    /// Capture time, when the backend sent one.
    pub captured_at: Option<DateTime<Utc>>,
}

impl PerceptionPayload {
    /// Extracts perception fields from any of the known payload spellings.
    #[must_use]
    pub fn from_value(value: &Value) -> Self {
        let url = ["url", "snapshotUrl", "imageUrl"]
            .iter()
            .find_map(|key| value.get(*key).and_then(Value::as_str))
            .map(str::to_string);

        let description = value
            .get("description")
            .and_then(Value::as_str)
            .filter(|d| !d.is_empty())
            .map(str::to_string);

        let captured_at = ["timestamp", "ts", "capturedAt"]
            .iter()
            .find_map(|key| value.get(*key).and_then(parse_timestamp));

        Self {
            url,
            description,
            captured_at,
        }
    }
}

/// Accepts epoch milliseconds or an RFC 3339 string.
pub(crate) fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single()),
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|dt| dt.with_timezone(&Utc)),
        _ => None,
    }
}

// ============================================================================
// LogPayload
// ============================================================================

/// Severity/class of a log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogKind {
    /// Informational.
    Info,
    /// Something worth attention.
    Warning,
    /// Failure reported by the backend.
    Error,
    /// Command acknowledgement.
    Ack,
}

impl LogKind {
    fn from_label(label: &str) -> Option<Self> {
        match label.to_ascii_lowercase().as_str() {
            "info" | "debug" => Some(Self::Info),
            "warn" | "warning" => Some(Self::Warning),
            "error" | "fail" | "failed" | "rejected" => Some(Self::Error),
            "ack" | "ok" | "accepted" => Some(Self::Ack),
            _ => None,
        }
    }
}

/// Fields of a log/ack event.
#[derive(Debug, Clone, PartialEq)]
pub struct LogPayload {
    /// Entry class.
    pub kind: LogKind,
    /// Message text (may be empty).
    pub message: String,
    /// Correlation id of the command this acknowledges, if any.
    pub correlation_id: Option<CorrelationId>,
}

impl LogPayload {
    fn from_envelope(envelope: &Envelope) -> Self {
        let payload = &envelope.payload;
        let is_ack = envelope.tag == "ack";

        let labelled = ["kind", "level", "status"]
            .iter()
            .find_map(|key| payload.get(*key).and_then(Value::as_str))
            .and_then(LogKind::from_label);

        let refused = payload.get("ok").and_then(Value::as_bool) == Some(false);

        let kind = match (labelled, refused) {
            (_, true) => LogKind::Error,
            (Some(kind), false) => kind,
            (None, false) if is_ack => LogKind::Ack,
            (None, false) => LogKind::Info,
        };

        let message = ["message", "msg", "detail"]
            .iter()
            .find_map(|key| payload.get(*key).and_then(Value::as_str))
            .unwrap_or_default()
            .to_string();

        let correlation_id = ["correlationId", "correlation_id", "commandId"]
            .iter()
            .find_map(|key| payload.get(*key).and_then(Value::as_str))
            .map(CorrelationId::from);

        Self {
            kind,
            message,
            correlation_id,
        }
    }

    /// Returns `true` if this entry reports a refused command.
    #[inline]
    #[must_use]
    pub fn is_refusal(&self) -> bool {
        self.kind == LogKind::Error
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;

    #[test]
    fn test_from_text_reads_type_tag() {
        let env = Envelope::from_text(r#"{"type":"telemetry","battery":80}"#).expect("decode");
        assert_eq!(env.tag, "telemetry");
        assert_eq!(env.kind(), EventKind::Telemetry);
    }

    #[test]
    fn test_from_text_rejects_garbage() {
        assert!(Envelope::from_text("not json").is_err());
        assert!(Envelope::from_text(r#"{"battery":80}"#).is_err());
        assert!(Envelope::from_text(r#"[1,2]"#).is_err());
    }

    #[test]
    fn test_from_sse_named_event() {
        let env = Envelope::from_sse("obstacle_detected", r#"{"distance":0.4}"#).expect("decode");
        assert_eq!(env.kind(), EventKind::Obstacle);
        assert_eq!(env.payload["distance"], 0.4);
    }

    #[test]
    fn test_from_sse_empty_data_is_null() {
        let env = Envelope::from_sse("new_image", "").expect("decode");
        assert_eq!(env.payload, Value::Null);
    }

    #[test]
    fn test_from_sse_default_event_uses_type_field() {
        let env = Envelope::from_sse("message", r#"{"type":"pong","t0":5}"#).expect("decode");
        assert_eq!(env.kind(), EventKind::HeartbeatReply);
    }

    #[test]
    fn test_image_aliases_share_a_kind() {
        for tag in ["new_image", "image", "vision", "snapshot"] {
            assert_eq!(EventKind::from_tag(tag), EventKind::Perception);
        }
    }

    #[test]
    fn test_telemetry_drops_tag_field() {
        let env = Envelope::new("robot_status", json!({"type":"robot_status","mode":"auto"}));
        let ParsedEvent::Telemetry(fields) = env.parse().expect("parse") else {
            panic!("expected telemetry");
        };
        assert_eq!(fields.len(), 1);
        assert_eq!(fields["mode"], "auto");
    }

    #[test]
    fn test_telemetry_non_object_is_malformed() {
        let env = Envelope::new("telemetry", json!(42));
        assert!(env.parse().is_err());
    }

    #[test]
    fn test_perception_spellings() {
        let p = PerceptionPayload::from_value(&json!({
            "snapshotUrl": "https://img/1.jpg",
            "ts": 1_700_000_000_000_i64,
        }));
        assert_eq!(p.url.as_deref(), Some("https://img/1.jpg"));
        assert_eq!(p.captured_at.map(|t| t.timestamp()), Some(1_700_000_000));

        let p = PerceptionPayload::from_value(&json!({
            "url": "u",
            "timestamp": "2025-01-02T03:04:05Z",
            "description": "pallet rack B",
        }));
        assert_eq!(p.description.as_deref(), Some("pallet rack B"));
        assert!(p.captured_at.is_some());
    }

    #[test]
    fn test_perception_reencode_keeps_capture_time() {
        let captured_at = DateTime::parse_from_rfc3339("2026-03-04T05:06:07.250Z")
            .expect("time")
            .with_timezone(&Utc);
        let original = PerceptionPayload {
            url: Some("/img/9.jpg".into()),
            description: None,
            captured_at: Some(captured_at),
        };

        let encoded = serde_json::to_value(&original).expect("encode");
        assert!(encoded.get("capturedAt").is_some());
        assert_eq!(PerceptionPayload::from_value(&encoded), original);
    }

    #[test]
    fn test_heartbeat_reply() {
        let env = Envelope::new("pong", json!({"type":"pong","t0":1234}));
        assert_eq!(
            env.parse().expect("parse"),
            ParsedEvent::HeartbeatReply { echoed_ms: 1234 }
        );
        let env = Envelope::new("pong", json!({"type":"pong"}));
        assert!(env.parse().is_err());
    }

    #[test]
    fn test_ack_kinds() {
        let env = Envelope::new("ack", json!({"correlationId":"c1"}));
        let ParsedEvent::Log(log) = env.parse().expect("parse") else {
            panic!("expected log");
        };
        assert_eq!(log.kind, LogKind::Ack);
        assert_eq!(log.correlation_id, Some(CorrelationId::from("c1")));
        assert!(!log.is_refusal());

        let env = Envelope::new("ack", json!({"correlationId":"c2","ok":false,"message":"bad"}));
        let ParsedEvent::Log(log) = env.parse().expect("parse") else {
            panic!("expected log");
        };
        assert!(log.is_refusal());
        assert_eq!(log.message, "bad");
    }

    #[test]
    fn test_log_event_level() {
        let env = Envelope::new("log_event", json!({"level":"warn","msg":"low battery"}));
        let ParsedEvent::Log(log) = env.parse().expect("parse") else {
            panic!("expected log");
        };
        assert_eq!(log.kind, LogKind::Warning);
        assert_eq!(log.message, "low battery");
    }

    #[test]
    fn test_unknown_tag_is_not_an_error() {
        let env = Envelope::new("steps", json!({"items":[]}));
        assert!(matches!(env.parse(), Ok(ParsedEvent::Unknown { .. })));
    }
}
