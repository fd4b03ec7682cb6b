//! Inbound event dispatch.
//!
//! The [`EventRouter`] classifies every decoded envelope, updates the
//! client-side state it owns (telemetry, perception, log ring, pending
//! acknowledgements), and publishes a [`LinkEvent`] to subscribers.
//!
//! | Inbound class | State effect | Published |
//! |---------------|--------------|-----------|
//! | telemetry | field-wise merge | `Telemetry` |
//! | perception | snapshot replaced, info log entry | `Perception`, `Log` |
//! | obstacle | warning log entry | `Obstacle`, `Log` |
//! | log / ack | log entry, pending ack resolved | `Log` |
//! | heartbeat reply | none (handed back to the supervisor) | none |
//! | keepalive / unknown | none | none |
//!
//! Subscribers either register a callback per [`LinkEventKind`] with
//! [`EventRouter::on`] or take a broadcast receiver from
//! [`EventRouter::subscribe`]. Callbacks run synchronously on the supervisor
//! task and must not block or register further callbacks.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::{debug, trace, warn};

use crate::negotiation::AckRegistry;
use crate::protocol::{Envelope, LogKind, ParsedEvent, PerceptionPayload};
use crate::state::{LogEntry, LogRing, PerceptionSnapshot, TelemetrySnapshot, TelemetryStore};
use crate::transport::ConnectionState;

// ============================================================================
// Constants
// ============================================================================

/// Default broadcast buffer per subscriber.
pub const DEFAULT_EVENT_BUFFER: usize = 256;

// ============================================================================
// LinkEvent
// ============================================================================

/// Event published to application subscribers.
#[derive(Debug, Clone, PartialEq)]
pub enum LinkEvent {
    /// Connection state changed.
    Connection(ConnectionState),
    /// Heartbeat latency changed (`None` = unknown).
    Latency(Option<Duration>),
    /// Telemetry merged; carries the full merged snapshot.
    Telemetry(TelemetrySnapshot),
    /// New perception snapshot.
    Perception(PerceptionSnapshot),
    /// Obstacle reported by the robot.
    Obstacle(Value),
    /// Entry appended to the log ring.
    Log(LogEntry),
}

impl LinkEvent {
    /// Kind used for handler registration.
    #[must_use]
    pub fn kind(&self) -> LinkEventKind {
        match self {
            Self::Connection(_) => LinkEventKind::Connection,
            Self::Latency(_) => LinkEventKind::Latency,
            Self::Telemetry(_) => LinkEventKind::Telemetry,
            Self::Perception(_) => LinkEventKind::Perception,
            Self::Obstacle(_) => LinkEventKind::Obstacle,
            Self::Log(_) => LinkEventKind::Log,
        }
    }
}

/// Discriminant of [`LinkEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LinkEventKind {
    /// [`LinkEvent::Connection`].
    Connection,
    /// [`LinkEvent::Latency`].
    Latency,
    /// [`LinkEvent::Telemetry`].
    Telemetry,
    /// [`LinkEvent::Perception`].
    Perception,
    /// [`LinkEvent::Obstacle`].
    Obstacle,
    /// [`LinkEvent::Log`].
    Log,
}

/// Event handler callback type.
pub type EventHandler = Box<dyn Fn(&LinkEvent) + Send + Sync>;

// ============================================================================
// Routed
// ============================================================================

/// What the router did with an envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Routed {
    /// State updated and/or subscribers notified.
    Handled,
    /// Heartbeat reply; the supervisor owns heartbeat state.
    HeartbeatReply {
        /// Echoed probe timestamp (ms since epoch).
        echoed_ms: i64,
    },
    /// Ignored (unknown tag, malformed payload, keepalive).
    Dropped,
}

// ============================================================================
// EventRouter
// ============================================================================

/// Dispatches inbound envelopes to client state and subscribers.
pub struct EventRouter {
    store: Arc<TelemetryStore>,
    log: Arc<LogRing>,
    acks: Arc<AckRegistry>,
    handlers: RwLock<FxHashMap<LinkEventKind, Vec<EventHandler>>>,
    events_tx: broadcast::Sender<LinkEvent>,
}

impl EventRouter {
    /// Creates a router over the given state.
    #[must_use]
    pub fn new(
        store: Arc<TelemetryStore>,
        log: Arc<LogRing>,
        acks: Arc<AckRegistry>,
        buffer: usize,
    ) -> Self {
        let (events_tx, _) = broadcast::channel(buffer.max(1));
        Self {
            store,
            log,
            acks,
            handlers: RwLock::new(FxHashMap::default()),
            events_tx,
        }
    }

    /// Telemetry store.
    #[inline]
    #[must_use]
    pub fn store(&self) -> &Arc<TelemetryStore> {
        &self.store
    }

    /// Log ring.
    #[inline]
    #[must_use]
    pub fn log(&self) -> &Arc<LogRing> {
        &self.log
    }

    /// Registers a callback for one event kind.
    pub fn on(&self, kind: LinkEventKind, handler: EventHandler) {
        self.handlers.write().entry(kind).or_default().push(handler);
    }

    /// Removes every callback for `kind`.
    pub fn clear_handlers(&self, kind: LinkEventKind) {
        self.handlers.write().remove(&kind);
    }

    /// Returns a receiver of every published event.
    ///
    /// A receiver that falls more than the buffer size behind skips ahead
    /// (`RecvError::Lagged`) rather than holding memory.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<LinkEvent> {
        self.events_tx.subscribe()
    }

    /// Delivers an event to callbacks and broadcast subscribers.
    pub fn publish(&self, event: LinkEvent) {
        if let Some(handlers) = self.handlers.read().get(&event.kind()) {
            for handler in handlers {
                handler(&event);
            }
        }
        // No receivers is fine.
        let _ = self.events_tx.send(event);
    }

    /// Routes one envelope.
    pub fn route(&self, envelope: &Envelope) -> Routed {
        let parsed = match envelope.parse() {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!(tag = %envelope.tag, error = %e, "Dropping malformed event");
                return Routed::Dropped;
            }
        };

        match parsed {
            ParsedEvent::Telemetry(fields) => {
                if self.store.apply_partial(fields) > 0 {
                    self.publish(LinkEvent::Telemetry(self.store.current()));
                }
                Routed::Handled
            }

            ParsedEvent::Perception(payload) => self.route_perception(payload),

            ParsedEvent::Obstacle(payload) => {
                let entry = self.log.push(LogKind::Warning, obstacle_message(&payload), None);
                self.publish(LinkEvent::Obstacle(payload));
                self.publish(LinkEvent::Log(entry));
                Routed::Handled
            }

            ParsedEvent::Log(payload) => {
                if self.acks.resolve(&payload) {
                    trace!(correlation_id = ?payload.correlation_id, "Command acknowledged");
                }
                let entry = self
                    .log
                    .push(payload.kind, payload.message, payload.correlation_id);
                self.publish(LinkEvent::Log(entry));
                Routed::Handled
            }

            ParsedEvent::HeartbeatReply { echoed_ms } => Routed::HeartbeatReply { echoed_ms },

            ParsedEvent::Keepalive => {
                trace!("Server keepalive");
                Routed::Dropped
            }

            ParsedEvent::Unknown { tag, .. } => {
                debug!(%tag, "Dropping event with unknown tag");
                Routed::Dropped
            }
        }
    }

    fn route_perception(&self, payload: PerceptionPayload) -> Routed {
        let Some(image_url) = payload.url else {
            debug!("Image announced without a location");
            return Routed::Dropped;
        };

        let snapshot = PerceptionSnapshot {
            image_url,
            description: payload.description,
            captured_at: payload.captured_at.unwrap_or_else(Utc::now),
        };
        self.store.replace_perception(snapshot.clone());

        let message = match &snapshot.description {
            Some(description) => format!("New image: {description}"),
            None => "New image available".to_string(),
        };
        let entry = self.log.push(LogKind::Info, message, None);

        self.publish(LinkEvent::Perception(snapshot));
        self.publish(LinkEvent::Log(entry));
        Routed::Handled
    }
}

impl fmt::Debug for EventRouter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventRouter")
            .field("subscribers", &self.events_tx.receiver_count())
            .field("pending_acks", &self.acks.len())
            .finish_non_exhaustive()
    }
}

/// Log line for an obstacle payload.
fn obstacle_message(payload: &Value) -> String {
    let detail = ["message", "description", "type"]
        .iter()
        .find_map(|key| payload.get(*key).and_then(Value::as_str))
        .filter(|s| *s != "obstacle_detected");
    let distance = payload.get("distance").and_then(Value::as_f64);

    match (detail, distance) {
        (Some(detail), Some(distance)) => format!("Obstacle detected: {detail} at {distance} m"),
        (Some(detail), None) => format!("Obstacle detected: {detail}"),
        (None, Some(distance)) => format!("Obstacle detected at {distance} m"),
        (None, None) => "Obstacle detected".to_string(),
    }
}

// ============================================================================
// Tests
// ============================================================================
