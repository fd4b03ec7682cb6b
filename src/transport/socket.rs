//! WebSocket session.
//!
//! One [`SocketSession`] per connection attempt. The session spawns a task
//! that connects, then runs a select loop over the socket read half and a
//! command channel fed by [`TransportSession::send`] and
//! [`TransportSession::close`].
//!
//! Text frames are decoded into [`Envelope`]s. Frames that are not JSON
//! objects with a string `type` are logged and dropped; they never tear the
//! session down.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, trace, warn};
use url::Url;

use crate::identifiers::SessionId;
use crate::protocol::{Envelope, OutboundMessage};

use super::{
    ConnectionState, Connector, EventSink, Lifecycle, SessionCommand, TransportSession,
    wait_for_close,
};

// ============================================================================
// Constants
// ============================================================================

/// Default time allowed for the WebSocket handshake.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

// ============================================================================
// SocketConnector
// ============================================================================

/// Creates [`SocketSession`]s against a fixed endpoint.
#[derive(Debug, Clone)]
pub struct SocketConnector {
    url: Url,
    connect_timeout: Duration,
}

impl SocketConnector {
    /// Creates a connector for `url` (`ws://` or `wss://`).
    #[must_use]
    pub fn new(url: Url) -> Self {
        Self {
            url,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    /// Sets the handshake timeout.
    #[must_use]
    pub fn with_connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }

    /// Endpoint URL.
    #[inline]
    #[must_use]
    pub fn url(&self) -> &Url {
        &self.url
    }
}

impl Connector for SocketConnector {
    fn connect(&self, sink: EventSink) -> Arc<dyn TransportSession> {
        Arc::new(SocketSession::spawn(
            self.url.clone(),
            self.connect_timeout,
            sink,
        ))
    }
}

// ============================================================================
// SocketSession
// ============================================================================

/// A single WebSocket connection attempt.
///
/// Dropping the handle closes the channel.
pub struct SocketSession {
    command_tx: mpsc::UnboundedSender<SessionCommand>,
    lifecycle: Arc<Lifecycle>,
}

impl SocketSession {
    /// Constructs the session and starts connecting.
    ///
    /// Must be called within a Tokio runtime.
    pub fn spawn(url: Url, connect_timeout: Duration, sink: EventSink) -> Self {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let lifecycle = Lifecycle::new(sink);

        tokio::spawn(Self::run(
            url,
            connect_timeout,
            command_rx,
            Arc::clone(&lifecycle),
        ));

        Self {
            command_tx,
            lifecycle,
        }
    }

    /// Session task: connect, then pump frames until closed.
    async fn run(
        url: Url,
        connect_timeout: Duration,
        mut command_rx: mpsc::UnboundedReceiver<SessionCommand>,
        lifecycle: Arc<Lifecycle>,
    ) {
        let session_id = lifecycle.id();
        debug!(%session_id, %url, "Connecting WebSocket");

        let ws_stream = tokio::select! {
            result = timeout(connect_timeout, connect_async(url.as_str())) => match result {
                Ok(Ok((stream, _response))) => stream,
                Ok(Err(e)) => {
                    lifecycle.error(format!("connect failed: {e}")).await;
                    lifecycle.closed().await;
                    return;
                }
                Err(_) => {
                    lifecycle
                        .error(format!("connect timed out after {}ms", connect_timeout.as_millis()))
                        .await;
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

        let (mut ws_write, mut ws_read) = ws_stream.split();

        if !lifecycle.opened().await {
            let _ = ws_write.close().await;
            lifecycle.closed().await;
            return;
        }

        loop {
            tokio::select! {
                message = ws_read.next() => {
                    match message {
                        Some(Ok(Message::Text(text))) => {
                            match Envelope::from_text(&text) {
                                Ok(envelope) => lifecycle.message(envelope).await,
                                Err(e) => warn!(%session_id, error = %e, "Dropping malformed frame"),
                            }
                        }

                        Some(Ok(Message::Close(frame))) => {
                            debug!(%session_id, ?frame, "WebSocket closed by remote");
                            break;
                        }

                        Some(Err(e)) => {
                            lifecycle.error(format!("read failed: {e}")).await;
                            break;
                        }

                        None => {
                            debug!(%session_id, "WebSocket stream ended");
                            break;
                        }

                        // Binary, Ping, Pong (tungstenite answers pings itself)
                        Some(Ok(_)) => {}
                    }
                }

                command = command_rx.recv() => {
                    match command {
                        Some(SessionCommand::Send(message)) => {
                            let frame = message.to_frame().to_string();
                            trace!(%session_id, kind = message.label(), "Sending frame");
                            if let Err(e) = ws_write.send(Message::Text(frame.into())).await {
                                lifecycle.error(format!("write failed: {e}")).await;
                                break;
                            }
                        }

                        Some(SessionCommand::Close) | None => {
                            debug!(%session_id, "Closing WebSocket");
                            let _ = ws_write.close().await;
                            break;
                        }
                    }
                }
            }
        }

        lifecycle.closed().await;
    }
}

impl TransportSession for SocketSession {
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

impl Drop for SocketSession {
    fn drop(&mut self) {
        self.close();
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::Value;
    use tokio::net::TcpListener;
    use tokio_tungstenite::accept_async;

    use crate::transport::{SessionEvent, SessionSignal};

    /// Accepts one client, pushes `frames`, then echoes every text frame back
    /// until the client leaves.
    async fn serve_once(frames: Vec<String>) -> Url {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");

        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.expect("accept");
            let mut ws = accept_async(stream).await.expect("handshake");
            for frame in frames {
                ws.send(Message::Text(frame.into())).await.expect("push");
            }
            while let Some(Ok(message)) = ws.next().await {
                if let Message::Text(text) = message {
                    let _ = ws.send(Message::Text(text)).await;
                }
            }
        });

        Url::parse(&format!("ws://{addr}")).expect("url")
    }

    async fn next_event(rx: &mut mpsc::Receiver<SessionSignal>) -> SessionEvent {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("event in time")
            .expect("sink open")
            .event
    }

    #[tokio::test]
    async fn test_open_message_close() {
        let url = serve_once(vec![
            r#"{"type":"telemetry","battery":77}"#.to_string(),
            "not json".to_string(),
            r#"{"type":"log_event","message":"hello"}"#.to_string(),
        ])
        .await;
        let (tx, mut rx) = mpsc::channel(16);
        let session = SocketConnector::new(url).connect(tx);

        assert_eq!(next_event(&mut rx).await, SessionEvent::Opened);
        assert_eq!(session.state(), ConnectionState::Open);

        match next_event(&mut rx).await {
            SessionEvent::Message(envelope) => {
                assert_eq!(envelope.tag, "telemetry");
                assert_eq!(envelope.payload.get("battery"), Some(&Value::from(77)));
            }
            other => panic!("unexpected {other:?}"),
        }

        // The malformed frame is skipped, not fatal.
        match next_event(&mut rx).await {
            SessionEvent::Message(envelope) => assert_eq!(envelope.tag, "log_event"),
            other => panic!("unexpected {other:?}"),
        }

        session.close();
        session.close();
        assert_eq!(next_event(&mut rx).await, SessionEvent::Closed);
        assert_eq!(session.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_ping_round_trip() {
        let url = serve_once(Vec::new()).await;
        let (tx, mut rx) = mpsc::channel(16);
        let session = SocketConnector::new(url).connect(tx);

        assert_eq!(next_event(&mut rx).await, SessionEvent::Opened);
        session.send(OutboundMessage::Ping { t0: 1234 });

        // Echo server reflects the probe; the tag is classified upstream.
        match next_event(&mut rx).await {
            SessionEvent::Message(envelope) => {
                assert_eq!(envelope.tag, "ping");
                assert_eq!(envelope.payload.get("t0"), Some(&Value::from(1234)));
            }
            other => panic!("unexpected {other:?}"),
        }
        session.close();
    }

    #[tokio::test]
    async fn test_refused_connection_closes_once() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        drop(listener);

        let (tx, mut rx) = mpsc::channel(16);
        let url = Url::parse(&format!("ws://{addr}")).expect("url");
        let session = SocketConnector::new(url).connect(tx);

        assert!(matches!(next_event(&mut rx).await, SessionEvent::Error(_)));
        assert_eq!(next_event(&mut rx).await, SessionEvent::Closed);
        assert_eq!(session.state(), ConnectionState::Disconnected);

        session.close();
        assert!(
            tokio::time::timeout(Duration::from_millis(100), rx.recv())
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn test_send_before_open_is_dropped() {
        let url = serve_once(Vec::new()).await;
        let (tx, mut rx) = mpsc::channel(16);
        let session = SocketConnector::new(url).connect(tx);

        session.send(OutboundMessage::Ping { t0: 1 });
        assert_eq!(next_event(&mut rx).await, SessionEvent::Opened);
        session.close();
        assert_eq!(next_event(&mut rx).await, SessionEvent::Closed);
    }
}
