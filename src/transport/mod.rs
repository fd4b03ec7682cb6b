//! Transport sessions.
//!
//! A [`TransportSession`] is exactly one attempt at a live channel to the
//! backend. It is created (and starts opening) through a [`Connector`], emits
//! lifecycle [`SessionEvent`]s into an [`EventSink`], and once closed it is
//! inert for good. Reconnecting always means a new session.
//!
//! # Realizations
//!
//! ```text
//! ┌──────────────────┐    WebSocket (duplex)     ┌──────────────────┐
//! │  SocketSession   │◄─────────────────────────►│                  │
//! └──────────────────┘                           │     Backend      │
//! ┌──────────────────┐    SSE  /api/stream       │                  │
//! │   PushSession    │◄──────────────────────────│                  │
//! │                  │─── HTTP /health, /api/* ─►│                  │
//! └──────────────────┘                           └──────────────────┘
//! ```
//!
//! # Lifecycle
//!
//! 1. `Connector::connect` constructs the session in `Connecting`
//! 2. Exactly one `Opened` when the channel is up
//! 3. `Message` per decoded inbound envelope (malformed input is dropped here)
//! 4. Exactly one `Closed` on failure or `close()`; nothing after it
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `socket` | WebSocket session |
//! | `push` | SSE + HTTP session |
//! | `http` | Shared HTTP API client |

// ============================================================================
// Submodules
// ============================================================================

/// Shared HTTP API client.
pub mod http;

/// Server-Sent-Events session paired with HTTP requests.
pub mod push;

/// WebSocket session.
pub mod socket;

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::{Mutex as AsyncMutex, mpsc};
use tracing::{debug, trace};

use crate::identifiers::SessionId;
use crate::protocol::{Envelope, OutboundMessage};

// ============================================================================
// Re-exports
// ============================================================================

pub use http::HttpApi;
pub use push::{PushConnector, PushSession};
pub use socket::{SocketConnector, SocketSession};

// ============================================================================
// ConnectionState
// ============================================================================

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionState {
    /// No session, or the session is finished.
    #[default]
    Disconnected,
    /// Session constructed, channel not up yet.
    Connecting,
    /// Channel up.
    Open,
    /// Close requested, waiting for the channel to wind down.
    Closing,
    /// Waiting for the backoff timer before the next attempt.
    Reconnecting,
}

impl ConnectionState {
    /// Returns `true` when commands and probes can flow.
    #[inline]
    #[must_use]
    pub fn is_open(self) -> bool {
        self == Self::Open
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Open => "open",
            Self::Closing => "closing",
            Self::Reconnecting => "reconnecting",
        };
        f.write_str(label)
    }
}

// ============================================================================
// TransportKind
// ============================================================================

/// Which session realization to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TransportKind {
    /// Bidirectional WebSocket.
    Socket,
    /// SSE push channel plus HTTP requests.
    #[default]
    Push,
}

impl std::str::FromStr for TransportKind {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "socket" | "ws" | "websocket" => Ok(Self::Socket),
            "push" | "sse" | "http" => Ok(Self::Push),
            other => Err(crate::error::Error::config(format!(
                "unknown transport '{other}' (expected 'socket' or 'push')"
            ))),
        }
    }
}

// ============================================================================
// Session Events
// ============================================================================

/// Lifecycle event emitted by a session.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// Channel is up. Emitted at most once.
    Opened,
    /// Decoded inbound message.
    Message(Envelope),
    /// Non-terminal diagnostic; a `Closed` follows if the error was fatal.
    Error(String),
    /// Session finished. Emitted exactly once, last.
    Closed,
}

/// A session event tagged with its origin.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSignal {
    /// Emitting session.
    pub session_id: SessionId,
    /// The event.
    pub event: SessionEvent,
}

/// Channel sessions emit into. Bounded, so a stalled consumer backs pressure
/// onto the session task instead of growing memory.
pub type EventSink = mpsc::Sender<SessionSignal>;

// ============================================================================
// TransportSession
// ============================================================================

/// One attempt at a live channel to the backend.
pub trait TransportSession: Send + Sync {
    /// Session id.
    fn id(&self) -> SessionId;

    /// Current lifecycle state.
    fn state(&self) -> ConnectionState;

    /// Queues a message. Fire-and-forget: dropped silently unless open.
    fn send(&self, message: OutboundMessage);

    /// Requests close. Idempotent and infallible.
    fn close(&self);
}

/// Constructs sessions. The constructed session starts opening immediately.
pub trait Connector: Send + Sync {
    /// Creates a session that reports into `sink`.
    fn connect(&self, sink: EventSink) -> Arc<dyn TransportSession>;
}

// ============================================================================
// SessionSlot
// ============================================================================

/// Holder of the current session, shared by the supervisor (writer) and the
/// socket command route (reader).
#[derive(Clone, Default)]
pub struct SessionSlot {
    inner: Arc<RwLock<Option<Arc<dyn TransportSession>>>>,
}

impl SessionSlot {
    /// Creates an empty slot.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the current session.
    #[must_use]
    pub fn get(&self) -> Option<Arc<dyn TransportSession>> {
        self.inner.read().clone()
    }

    /// Returns the current session only if it is open.
    #[must_use]
    pub fn open(&self) -> Option<Arc<dyn TransportSession>> {
        self.get().filter(|s| s.state().is_open())
    }

    /// Returns the id of the current session.
    #[must_use]
    pub fn current_id(&self) -> Option<SessionId> {
        self.inner.read().as_ref().map(|s| s.id())
    }

    /// Installs a session, returning the previous one.
    pub fn replace(&self, session: Arc<dyn TransportSession>) -> Option<Arc<dyn TransportSession>> {
        self.inner.write().replace(session)
    }

    /// Removes and returns the current session.
    pub fn take(&self) -> Option<Arc<dyn TransportSession>> {
        self.inner.write().take()
    }
}

impl fmt::Debug for SessionSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionSlot")
            .field("current", &self.current_id())
            .finish()
    }
}

// ============================================================================
// Lifecycle (shared by both realizations)
// ============================================================================

/// Enforces the exactly-once `Opened`/`Closed` contract for one session.
///
/// Every emission goes through `gate`, so no event can overtake `Closed`.
pub(crate) struct Lifecycle {
    id: SessionId,
    state: RwLock<ConnectionState>,
    gate: AsyncMutex<()>,
    sink: EventSink,
}

impl Lifecycle {
    pub(crate) fn new(sink: EventSink) -> Arc<Self> {
        Arc::new(Self {
            id: SessionId::next(),
            state: RwLock::new(ConnectionState::Connecting),
            gate: AsyncMutex::new(()),
            sink,
        })
    }

    #[inline]
    pub(crate) fn id(&self) -> SessionId {
        self.id
    }

    #[inline]
    pub(crate) fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    /// Marks the close as requested. Returns `false` if already closing or
    /// closed.
    pub(crate) fn begin_close(&self) -> bool {
        let mut state = self.state.write();
        match *state {
            ConnectionState::Connecting | ConnectionState::Open => {
                *state = ConnectionState::Closing;
                true
            }
            _ => false,
        }
    }

    /// Emits `Opened`. Returns `false` if a close was requested meanwhile.
    pub(crate) async fn opened(&self) -> bool {
        let _gate = self.gate.lock().await;
        {
            let mut state = self.state.write();
            if *state != ConnectionState::Connecting {
                return false;
            }
            *state = ConnectionState::Open;
        }
        debug!(session_id = %self.id, "Session open");
        self.emit(SessionEvent::Opened).await;
        true
    }

    /// Emits a decoded message while open.
    pub(crate) async fn message(&self, envelope: Envelope) {
        let _gate = self.gate.lock().await;
        if self.state() != ConnectionState::Open {
            trace!(session_id = %self.id, tag = %envelope.tag, "Dropping message after close");
            return;
        }
        self.emit(SessionEvent::Message(envelope)).await;
    }

    /// Emits a diagnostic while not yet closed.
    pub(crate) async fn error(&self, message: impl Into<String>) {
        let _gate = self.gate.lock().await;
        if self.state() == ConnectionState::Disconnected {
            return;
        }
        self.emit(SessionEvent::Error(message.into())).await;
    }

    /// Emits `Closed` once and makes the session inert.
    pub(crate) async fn closed(&self) {
        let _gate = self.gate.lock().await;
        {
            let mut state = self.state.write();
            if *state == ConnectionState::Disconnected {
                return;
            }
            *state = ConnectionState::Disconnected;
        }
        debug!(session_id = %self.id, "Session closed");
        self.emit(SessionEvent::Closed).await;
    }

    async fn emit(&self, event: SessionEvent) {
        let signal = SessionSignal {
            session_id: self.id,
            event,
        };
        if self.sink.send(signal).await.is_err() {
            trace!(session_id = %self.id, "Event sink gone");
        }
    }
}

/// Internal commands for a session task.
pub(crate) enum SessionCommand {
    /// Deliver a message.
    Send(OutboundMessage),
    /// Shut the channel down.
    Close,
}

/// Drains commands until a close request (or the handle is dropped).
///
/// Used while a session is still connecting: sends are dropped, matching the
/// fire-and-forget contract.
pub(crate) async fn wait_for_close(rx: &mut mpsc::UnboundedReceiver<SessionCommand>) {
    while let Some(command) = rx.recv().await {
        match command {
            SessionCommand::Close => return,
            SessionCommand::Send(message) => {
                trace!(kind = message.label(), "Dropping send while connecting");
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;

    async fn drain(rx: &mut mpsc::Receiver<SessionSignal>) -> Vec<SessionEvent> {
        let mut events = Vec::new();
        while let Ok(signal) = rx.try_recv() {
            events.push(signal.event);
        }
        events
    }

    #[tokio::test]
    async fn test_lifecycle_exactly_once() {
        let (tx, mut rx) = mpsc::channel(16);
        let lifecycle = Lifecycle::new(tx);

        assert!(lifecycle.opened().await);
        assert!(!lifecycle.opened().await);
        lifecycle
            .message(Envelope::new("telemetry", json!({"battery": 1})))
            .await;
        lifecycle.closed().await;
        lifecycle.closed().await;
        lifecycle
            .message(Envelope::new("telemetry", json!({"battery": 2})))
            .await;
        lifecycle.error("late").await;

        let events = drain(&mut rx).await;
        assert_eq!(events.len(), 3);
        assert_eq!(events[0], SessionEvent::Opened);
        assert!(matches!(events[1], SessionEvent::Message(_)));
        assert_eq!(events[2], SessionEvent::Closed);
        assert_eq!(lifecycle.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_close_before_open_suppresses_opened() {
        let (tx, mut rx) = mpsc::channel(16);
        let lifecycle = Lifecycle::new(tx);

        assert!(lifecycle.begin_close());
        assert!(!lifecycle.begin_close());
        assert!(!lifecycle.opened().await);
        lifecycle.closed().await;

        assert_eq!(drain(&mut rx).await, vec![SessionEvent::Closed]);
    }

    #[test]
    fn test_transport_kind_parse() {
        assert_eq!("ws".parse::<TransportKind>().ok(), Some(TransportKind::Socket));
        assert_eq!("SSE".parse::<TransportKind>().ok(), Some(TransportKind::Push));
        assert!("carrier-pigeon".parse::<TransportKind>().is_err());
    }

    #[test]
    fn test_state_display() {
        assert_eq!(ConnectionState::Reconnecting.to_string(), "reconnecting");
        assert!(ConnectionState::Open.is_open());
        assert!(!ConnectionState::Closing.is_open());
    }
}
