//! Server-Sent-Events session paired with HTTP requests.
//!
//! The backend pushes events on `GET /api/stream`; everything client-bound
//! travels as ordinary HTTP requests. To look like a duplex channel to the
//! layers above, the session translates:
//!
//! | Outbound | Realized as |
//! |----------|-------------|
//! | `Ping { t0 }` | `GET /health`, answered locally with a `pong` echoing `t0` |
//! | `Command { .. }` | fire-and-forget `POST /api/robot/command` |
//!
//! While open the session also polls `GET /api/status` and injects the
//! result as a `telemetry` message. The newest entry of `GET /api/images` is
//! fetched once on open and again for every image announcement that carries
//! no URL; a failed fetch becomes an `error` log event.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::time::Duration;

use eventsource_stream::Eventsource;
use futures_util::StreamExt;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio::time::{Interval, MissedTickBehavior, interval};
use tracing::{debug, trace, warn};

use crate::identifiers::SessionId;
use crate::protocol::{Envelope, EventKind, OutboundMessage, PerceptionPayload};

use super::http::HttpApi;
use super::{
    ConnectionState, Connector, EventSink, Lifecycle, SessionCommand, TransportSession,
    wait_for_close,
};

// ============================================================================
// Constants
// ============================================================================

/// Default interval of the `/api/status` poll.
pub const DEFAULT_STATUS_POLL: Duration = Duration::from_secs(3);

/// Tag of image envelopes produced by a fetch.
const IMAGE_TAG: &str = "new_image";

/// Tag of log envelopes produced locally.
const LOG_TAG: &str = "log_event";

// ============================================================================
// PushConnector
// ============================================================================

/// Creates [`PushSession`]s against one backend.
#[derive(Debug, Clone)]
pub struct PushConnector {
    api: HttpApi,
    status_poll: Option<Duration>,
}

impl PushConnector {
    /// Creates a connector. Status polling defaults to every 3 seconds.
    #[must_use]
    pub fn new(api: HttpApi) -> Self {
        Self {
            api,
            status_poll: Some(DEFAULT_STATUS_POLL),
        }
    }

    /// Sets the status poll interval; `None` disables polling.
    #[must_use]
    pub fn with_status_poll(mut self, status_poll: Option<Duration>) -> Self {
        self.status_poll = status_poll.filter(|d| !d.is_zero());
        self
    }
}

impl Connector for PushConnector {
    fn connect(&self, sink: EventSink) -> Arc<dyn TransportSession> {
        Arc::new(PushSession::spawn(self.api.clone(), self.status_poll, sink))
    }
}

// ============================================================================
// PushSession
// ============================================================================

/// A single SSE connection attempt plus its side-channel requests.
pub struct PushSession {
    command_tx: mpsc::UnboundedSender<SessionCommand>,
    lifecycle: Arc<Lifecycle>,
}

impl PushSession {
    /// Constructs the session and starts opening the stream.
    ///
    /// Must be called within a Tokio runtime.
    pub fn spawn(api: HttpApi, status_poll: Option<Duration>, sink: EventSink) -> Self {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let lifecycle = Lifecycle::new(sink);

        tokio::spawn(Self::run(
            api,
            status_poll,
            command_rx,
            Arc::clone(&lifecycle),
        ));

        Self {
            command_tx,
            lifecycle,
        }
    }

    async fn run(
        api: HttpApi,
        status_poll: Option<Duration>,
        mut command_rx: mpsc::UnboundedReceiver<SessionCommand>,
        lifecycle: Arc<Lifecycle>,
    ) {
        let session_id = lifecycle.id();
        debug!(%session_id, base = %api.base(), "Opening event stream");

        let response = tokio::select! {
            result = api.open_stream() => match result {
                Ok(response) => response,
                Err(e) => {
                    lifecycle.error(format!("stream open failed: {e}")).await;
                    lifecycle.closed().await;
                    return;
                }
            },
            () = wait_for_close(&mut command_rx) => {
                debug!(%session_id, "Closed while connecting");
                lifecycle.closed().await;
                return;
            }
        };

        if !lifecycle.opened().await {
            lifecycle.closed().await;
            return;
        }

        Self::fetch_image(&api, &lifecycle, IMAGE_TAG.to_string());

        let mut events = response.bytes_stream().eventsource();
        let mut poll = status_poll.map(|period| {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker
        });

        loop {
            tokio::select! {
                event = events.next() => {
                    match event {
                        Some(Ok(event)) => {
                            match Envelope::from_sse(&event.event, &event.data) {
                                Ok(envelope) => Self::deliver(&api, &lifecycle, envelope).await,
                                Err(e) => warn!(%session_id, error = %e, "Dropping malformed event"),
                            }
                        }

                        Some(Err(e)) => {
                            lifecycle.error(format!("stream failed: {e}")).await;
                            break;
                        }

                        None => {
                            debug!(%session_id, "Event stream ended");
                            break;
                        }
                    }
                }

                () = next_tick(poll.as_mut()) => {
                    Self::poll_status(&api, &lifecycle).await;
                }

                command = command_rx.recv() => {
                    match command {
                        Some(SessionCommand::Send(message)) => {
                            Self::dispatch(&api, &lifecycle, message);
                        }

                        Some(SessionCommand::Close) | None => {
                            debug!(%session_id, "Closing event stream");
                            break;
                        }
                    }
                }
            }
        }

        lifecycle.closed().await;
    }

    /// Emits an envelope; URL-less image announcements are resolved first.
    async fn deliver(api: &HttpApi, lifecycle: &Arc<Lifecycle>, envelope: Envelope) {
        if envelope.kind() == EventKind::Perception
            && PerceptionPayload::from_value(&envelope.payload).url.is_none()
        {
            Self::fetch_image(api, lifecycle, envelope.tag);
            return;
        }

        lifecycle.message(envelope).await;
    }

    /// Fetches the newest image off the stream task and emits it under `tag`.
    fn fetch_image(api: &HttpApi, lifecycle: &Arc<Lifecycle>, tag: String) {
        let api = api.clone();
        let lifecycle = Arc::clone(lifecycle);

        tokio::spawn(async move {
            let session_id = lifecycle.id();
            match api.last_image().await {
                Ok(Some(image)) => {
                    let payload = serde_json::to_value(&image).unwrap_or(Value::Null);
                    lifecycle.message(Envelope::new(tag, payload)).await;
                }
                Ok(None) => debug!(%session_id, "No image listed"),
                Err(e) => {
                    warn!(%session_id, error = %e, "Image lookup failed");
                    let entry = json!({
                        "level": "error",
                        "message": format!("Could not fetch the latest image: {e}"),
                    });
                    lifecycle.message(Envelope::new(LOG_TAG, entry)).await;
                }
            }
        });
    }

    async fn poll_status(api: &HttpApi, lifecycle: &Lifecycle) {
        match api.status().await {
            Ok(Some(robot)) => {
                lifecycle
                    .message(Envelope::new("telemetry", Value::Object(robot)))
                    .await;
            }
            Ok(None) => trace!(session_id = %lifecycle.id(), "Status without robot"),
            Err(e) => debug!(session_id = %lifecycle.id(), error = %e, "Status poll failed"),
        }
    }

    /// Realizes an outbound message as an HTTP request off the stream task.
    fn dispatch(api: &HttpApi, lifecycle: &Arc<Lifecycle>, message: OutboundMessage) {
        let api = api.clone();
        let lifecycle = Arc::clone(lifecycle);

        match message {
            OutboundMessage::Ping { t0 } => {
                tokio::spawn(async move {
                    match api.health().await {
                        Ok(_) => {
                            lifecycle
                                .message(Envelope::new("pong", json!({ "t0": t0 })))
                                .await;
                        }
                        Err(e) => debug!(session_id = %lifecycle.id(), error = %e, "Health probe failed"),
                    }
                });
            }

            OutboundMessage::Command {
                body,
                correlation_id,
            } => {
                tokio::spawn(async move {
                    match api.post_command(&body).await {
                        Ok(outcome) => trace!(
                            session_id = %lifecycle.id(),
                            %correlation_id,
                            accepted = outcome.is_accepted(),
                            "Command posted"
                        ),
                        Err(e) => warn!(
                            session_id = %lifecycle.id(),
                            %correlation_id,
                            error = %e,
                            "Command post failed"
                        ),
                    }
                });
            }
        }
    }
}

impl TransportSession for PushSession {
    fn id(&self) -> SessionId {
        self.lifecycle.id()
    }

    fn state(&self) -> ConnectionState {
        self.lifecycle.state()
    }

    fn send(&self, message: OutboundMessage) {
        if !self.lifecycle.state().is_open() {
            trace!(session_id = %self.id(), kind = message.label(), "Dropping send, session not open");
            return;
        }
        let _ = self.command_tx.send(SessionCommand::Send(message));
    }

    fn close(&self) {
        if self.lifecycle.begin_close() {
            let _ = self.command_tx.send(SessionCommand::Close);
        }
    }
}

impl Drop for PushSession {
    fn drop(&mut self) {
        self.close();
    }
}

/// Waits for the next poll tick, or forever when polling is off.
async fn next_tick(poll: Option<&mut Interval>) {
    match poll {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}

// ============================================================================
// Tests
// ============================================================================
