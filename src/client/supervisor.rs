//! Connection supervisor task.
//!
//! Owns the current session, the reconnection controller and the heartbeat
//! monitor, and runs one select loop over:
//!
//! - session events (tagged with their session id; events from a session
//!   that is no longer current are ignored)
//! - the backoff deadline
//! - the heartbeat deadline
//! - control messages from the [`Link`](super::Link) handle
//!
//! Everything that mutates connection state happens on this task, so no
//! transition ever races another.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, sleep_until};
use tracing::{debug, info, trace, warn};

use crate::identifiers::SessionId;
use crate::negotiation::AckRegistry;
use crate::router::{EventRouter, LinkEvent, Routed};
use crate::session::{
    BackoffState, HeartbeatMonitor, ReconnectAction, ReconnectionController, now_ms,
};
use crate::transport::{
    ConnectionState, Connector, EventSink, SessionEvent, SessionSignal, SessionSlot,
};

// ============================================================================
// Constants
// ============================================================================

/// Capacity of the session → supervisor event channel.
const SESSION_EVENT_BUFFER: usize = 256;

// ============================================================================
// LinkStatus
// ============================================================================

/// Connection status visible to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LinkStatus {
    /// Connection state.
    pub state: ConnectionState,
    /// Last measured heartbeat round trip.
    pub latency: Option<Duration>,
    /// Backoff progress.
    pub backoff: BackoffState,
    /// Current session, if any.
    pub session_id: Option<SessionId>,
}

// ============================================================================
// Control
// ============================================================================

/// Messages from the link handle to the supervisor.
pub(crate) enum Control {
    /// Tear everything down; ack on the sender once done.
    Shutdown(Option<oneshot::Sender<()>>),
}

// ============================================================================
// Supervisor
// ============================================================================

/// State owned by the supervisor task.
pub(crate) struct Supervisor {
    connector: Arc<dyn Connector>,
    controller: ReconnectionController,
    heartbeat: HeartbeatMonitor,
    router: Arc<EventRouter>,
    acks: Arc<AckRegistry>,
    slot: SessionSlot,
    status: Arc<RwLock<LinkStatus>>,
    sink: EventSink,
    backoff_deadline: Option<Instant>,
    heartbeat_deadline: Option<Instant>,
}

/// Everything the supervisor shares with the link handle.
pub(crate) struct SupervisorParts {
    pub connector: Arc<dyn Connector>,
    pub controller: ReconnectionController,
    pub heartbeat: HeartbeatMonitor,
    pub router: Arc<EventRouter>,
    pub acks: Arc<AckRegistry>,
    pub slot: SessionSlot,
    pub status: Arc<RwLock<LinkStatus>>,
}

impl Supervisor {
    /// Spawns the supervisor and returns its control channel.
    pub(crate) fn spawn(
        parts: SupervisorParts,
    ) -> (
        mpsc::UnboundedSender<Control>,
        tokio::task::JoinHandle<()>,
    ) {
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let (sink, events_rx) = mpsc::channel(SESSION_EVENT_BUFFER);

        let supervisor = Self {
            connector: parts.connector,
            controller: parts.controller,
            heartbeat: parts.heartbeat,
            router: parts.router,
            acks: parts.acks,
            slot: parts.slot,
            status: parts.status,
            sink,
            backoff_deadline: None,
            heartbeat_deadline: None,
        };

        let handle = tokio::spawn(supervisor.run(events_rx, control_rx));
        (control_tx, handle)
    }

    async fn run(
        mut self,
        mut events_rx: mpsc::Receiver<SessionSignal>,
        mut control_rx: mpsc::UnboundedReceiver<Control>,
    ) {
        let action = self.controller.start();
        self.apply(action);

        loop {
            let backoff = self.backoff_deadline;
            let heartbeat = self.heartbeat_deadline;

            tokio::select! {
                biased;

                control = control_rx.recv() => {
                    let done = match control {
                        Some(Control::Shutdown(done)) => done,
                        None => None,
                    };
                    self.teardown();
                    if let Some(done) = done {
                        let _ = done.send(());
                    }
                    break;
                }

                Some(signal) = events_rx.recv() => {
                    self.on_signal(signal);
                }

                () = sleep_until(backoff.unwrap_or_else(Instant::now)), if backoff.is_some() => {
                    self.backoff_deadline = None;
                    let action = self.controller.on_timer();
                    self.apply(action);
                }

                () = sleep_until(heartbeat.unwrap_or_else(Instant::now)), if heartbeat.is_some() => {
                    self.on_heartbeat_tick();
                }
            }
        }

        debug!("Supervisor terminated");
    }

    // ========================================================================
    // Session Events
    // ========================================================================

    fn on_signal(&mut self, signal: SessionSignal) {
        let SessionSignal { session_id, event } = signal;

        if self.slot.current_id() != Some(session_id) {
            trace!(%session_id, "Ignoring event from superseded session");
            return;
        }

        match event {
            SessionEvent::Opened => self.on_opened(session_id),

            SessionEvent::Message(envelope) => {
                if let Routed::HeartbeatReply { echoed_ms } = self.router.route(&envelope)
                    && let Some(latency) = self.heartbeat.on_reply(echoed_ms, now_ms())
                {
                    self.status.write().latency = Some(latency);
                    self.router.publish(LinkEvent::Latency(Some(latency)));
                }
            }

            SessionEvent::Error(message) => {
                warn!(%session_id, %message, "Session error");
            }

            SessionEvent::Closed => self.on_closed(session_id),
        }
    }

    fn on_opened(&mut self, session_id: SessionId) {
        self.controller.on_open();
        info!(%session_id, "Connection open");

        let probe = self.heartbeat.on_open(now_ms());
        if let Some(session) = self.slot.get() {
            session.send(probe);
        }
        self.heartbeat_deadline = Some(Instant::now() + self.heartbeat.interval());

        self.set_state(ConnectionState::Open);
    }

    fn on_closed(&mut self, session_id: SessionId) {
        self.slot.take();
        self.acks.fail_all();
        self.heartbeat.on_close();
        self.heartbeat_deadline = None;
        self.clear_latency();

        let was_open = self.controller.state() == ConnectionState::Open;
        let action = self.controller.on_close();
        if was_open {
            info!(%session_id, "Connection lost");
        } else {
            debug!(%session_id, "Connection attempt failed");
        }
        self.apply(action);
    }

    fn on_heartbeat_tick(&mut self) {
        let Some(session) = self.slot.open() else {
            self.heartbeat_deadline = None;
            return;
        };

        let (probe, went_stale) = self.heartbeat.on_tick(now_ms());
        if went_stale {
            self.clear_latency();
        }
        session.send(probe);
        self.heartbeat_deadline = Some(Instant::now() + self.heartbeat.interval());
    }

    // ========================================================================
    // Actions
    // ========================================================================

    fn apply(&mut self, action: ReconnectAction) {
        match action {
            ReconnectAction::Connect => self.connect(),
            ReconnectAction::Schedule(delay) => {
                self.backoff_deadline = Some(Instant::now() + delay);
                self.set_state(ConnectionState::Reconnecting);
            }
            ReconnectAction::Idle => {}
        }
    }

    fn connect(&mut self) {
        // Never two live sessions.
        if let Some(previous) = self.slot.take() {
            previous.close();
        }

        let session = self.connector.connect(self.sink.clone());
        debug!(session_id = %session.id(), "Session created");
        self.slot.replace(session);
        self.set_state(ConnectionState::Connecting);
    }

    fn teardown(&mut self) {
        self.controller.stop();
        self.backoff_deadline = None;
        self.heartbeat_deadline = None;

        if let Some(session) = self.slot.take() {
            self.set_state(ConnectionState::Closing);
            session.close();
        }

        self.acks.fail_all();
        self.heartbeat.on_close();
        self.clear_latency();
        self.set_state(ConnectionState::Disconnected);
        info!("Link shut down");
    }

    // ========================================================================
    // Status
    // ========================================================================

    fn set_state(&self, state: ConnectionState) {
        let changed = {
            let mut status = self.status.write();
            let changed = status.state != state;
            status.state = state;
            status.backoff = self.controller.backoff();
            status.session_id = self.slot.current_id();
            changed
        };
        if changed {
            self.router.publish(LinkEvent::Connection(state));
        }
    }

    fn clear_latency(&self) {
        let had = self.status.write().latency.take().is_some();
        if had {
            self.router.publish(LinkEvent::Latency(None));
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
