//! Outbound messages and command outcomes.
//!
//! # Format
//!
//! Heartbeat probe (socket transport):
//! ```json
//! { "type": "ping", "t0": 1700000000000 }
//! ```
//!
//! Socket-routed command (any variant body, tagged and correlated):
//! ```json
//! { "type": "command", "correlationId": "uuid", "robotId": "...", "task": "lift_up", ... }
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;

use serde::Serialize;
use serde_json::{Value, json};

use crate::identifiers::CorrelationId;

// ============================================================================
// OutboundMessage
// ============================================================================

/// A message handed to a transport session.
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundMessage {
    /// Heartbeat probe carrying the client send time (ms since epoch).
    Ping {
        /// Send timestamp; echoed back as the correlation token.
        t0: i64,
    },
    /// Encoded command body.
    Command {
        /// Body produced by a protocol variant encoder.
        body: Value,
        /// Id the backend echoes in its `ack`.
        correlation_id: CorrelationId,
    },
}

impl OutboundMessage {
    /// Renders the socket frame for this message.
    #[must_use]
    pub fn to_frame(&self) -> Value {
        match self {
            Self::Ping { t0 } => json!({ "type": "ping", "t0": t0 }),
            Self::Command {
                body,
                correlation_id,
            } => {
                let mut frame = match body {
                    Value::Object(map) => map.clone(),
                    other => {
                        let mut map = serde_json::Map::new();
                        map.insert("body".into(), other.clone());
                        map
                    }
                };
                frame
                    .entry("type")
                    .or_insert_with(|| Value::from("command"));
                frame.insert(
                    "correlationId".into(),
                    Value::from(correlation_id.as_str()),
                );
                Value::Object(frame)
            }
        }
    }

    /// Short name for logs.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Ping { .. } => "ping",
            Self::Command { .. } => "command",
        }
    }
}

// ============================================================================
// CommandOutcome
// ============================================================================

/// Backend verdict on one encoded command.
///
/// Network failures are not outcomes; they surface as connection-class
/// errors so they can never be mistaken for a refusal.
#[derive(Debug, Clone, PartialEq)]
pub enum CommandOutcome {
    /// Backend accepted the body.
    Accepted(Value),
    /// Backend answered and refused the body.
    Rejected {
        /// HTTP status, if the refusal came over HTTP.
        status: Option<u16>,
        /// Backend message, possibly empty.
        message: String,
    },
}

impl CommandOutcome {
    /// Returns `true` for [`CommandOutcome::Accepted`].
    #[inline]
    #[must_use]
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted(_))
    }
}

// ============================================================================
// CommandReceipt
// ============================================================================

/// Returned to callers when a command was accepted.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandReceipt {
    /// Variant that the backend accepted.
    pub variant: crate::protocol::ProtocolVariant,
    /// Number of requests issued for this invocation.
    pub attempts: usize,
    /// Response body (or `null`).
    pub response: Value,
}

impl fmt::Display for CommandReceipt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "accepted as {} after {} attempt(s)", self.variant, self.attempts)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ping_frame() {
        let frame = OutboundMessage::Ping { t0: 42 }.to_frame();
        assert_eq!(frame, json!({ "type": "ping", "t0": 42 }));
    }

    #[test]
    fn test_command_frame_adds_type_and_correlation() {
        let msg = OutboundMessage::Command {
            body: json!({ "robotId": "r1", "task": "stop" }),
            correlation_id: CorrelationId::from("c-1"),
        };
        let frame = msg.to_frame();
        assert_eq!(frame["type"], "command");
        assert_eq!(frame["correlationId"], "c-1");
        assert_eq!(frame["task"], "stop");
    }

    #[test]
    fn test_command_frame_keeps_existing_type() {
        let msg = OutboundMessage::Command {
            body: json!({ "type": "mode", "value": "auto" }),
            correlation_id: CorrelationId::from("c-2"),
        };
        assert_eq!(msg.to_frame()["type"], "mode");
    }

    #[test]
    fn test_outcome_predicate() {
        assert!(CommandOutcome::Accepted(Value::Null).is_accepted());
        let rejected = CommandOutcome::Rejected {
            status: Some(400),
            message: String::new(),
        };
        assert!(!rejected.is_accepted());
    }
}
