//! Command delivery routes.
//!
//! A [`CommandChannel`] submits one encoded body and reports the backend's
//! verdict. Two routes exist:
//!
//! - [`HttpCommandChannel`]: `POST /api/robot/command`, verdict from the HTTP
//!   status
//! - [`SocketCommandChannel`]: a correlated frame on the open WebSocket,
//!   verdict from the matching `ack`/error event
//!
//! Either way a network problem is an `Err`, never a
//! [`CommandOutcome::Rejected`].

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde_json::{Value, json};
use tokio::sync::oneshot;
use tokio::time::timeout;
use tracing::{debug, trace, warn};

use crate::error::{Error, Result};
use crate::identifiers::CorrelationId;
use crate::protocol::{CommandOutcome, LogKind, LogPayload, OutboundMessage};
use crate::transport::{HttpApi, SessionSlot};

// ============================================================================
// Constants
// ============================================================================

/// Default time to wait for a socket acknowledgement.
pub const DEFAULT_ACK_TIMEOUT: Duration = Duration::from_secs(5);

/// Maximum unacknowledged socket commands.
const MAX_PENDING_ACKS: usize = 100;

// ============================================================================
// CommandChannel
// ============================================================================

/// Submits encoded command bodies.
#[async_trait]
pub trait CommandChannel: Send + Sync {
    /// Sends `body` and waits for the verdict.
    ///
    /// # Errors
    ///
    /// Connection-class errors when the backend could not be reached or did
    /// not answer.
    async fn submit(&self, body: Value) -> Result<CommandOutcome>;
}

// ============================================================================
// HttpCommandChannel
// ============================================================================

/// Command route over HTTP.
#[derive(Debug, Clone)]
pub struct HttpCommandChannel {
    api: HttpApi,
}

impl HttpCommandChannel {
    /// Creates the route.
    #[must_use]
    pub fn new(api: HttpApi) -> Self {
        Self { api }
    }
}

#[async_trait]
impl CommandChannel for HttpCommandChannel {
    async fn submit(&self, body: Value) -> Result<CommandOutcome> {
        self.api.post_command(&body).await
    }
}

// ============================================================================
// AckRegistry
// ============================================================================

/// Map of correlation ids to waiting submitters.
type AckMap = FxHashMap<CorrelationId, oneshot::Sender<CommandOutcome>>;

/// Pending socket commands awaiting an acknowledgement.
///
/// Resolved by the event router; drained by the supervisor when the session
/// closes so nobody waits on a dead channel.
#[derive(Debug, Default)]
pub struct AckRegistry {
    pending: Mutex<AckMap>,
}

impl AckRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `id` and returns the receiver for its verdict.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Protocol`] when too many commands are pending.
    pub fn register(&self, id: CorrelationId) -> Result<oneshot::Receiver<CommandOutcome>> {
        let mut pending = self.pending.lock();
        if pending.len() >= MAX_PENDING_ACKS {
            warn!(pending = pending.len(), max = MAX_PENDING_ACKS, "Too many pending commands");
            return Err(Error::protocol(format!(
                "Too many pending commands: {}/{}",
                pending.len(),
                MAX_PENDING_ACKS
            )));
        }

        let (tx, rx) = oneshot::channel();
        pending.insert(id, tx);
        Ok(rx)
    }

    /// Resolves a pending command from a log/ack payload.
    ///
    /// Returns `true` if a submitter was waiting.
    pub fn resolve(&self, payload: &LogPayload) -> bool {
        let Some(id) = &payload.correlation_id else {
            return false;
        };

        let outcome = match payload.kind {
            LogKind::Ack | LogKind::Info => CommandOutcome::Accepted(json!({
                "message": payload.message,
            })),
            LogKind::Error => CommandOutcome::Rejected {
                status: None,
                message: payload.message.clone(),
            },
            LogKind::Warning => return false,
        };

        let Some(tx) = self.pending.lock().remove(id) else {
            trace!(correlation_id = %id, "Ack for unknown command");
            return false;
        };

        let _ = tx.send(outcome);
        true
    }

    /// Drops a pending entry (timed out).
    pub fn cancel(&self, id: &CorrelationId) {
        self.pending.lock().remove(id);
    }

    /// Fails every pending command; their submitters see `ConnectionClosed`.
    pub fn fail_all(&self) {
        let drained: Vec<_> = self.pending.lock().drain().collect();
        if !drained.is_empty() {
            debug!(count = drained.len(), "Failing pending commands");
        }
    }

    /// Number of pending commands.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    /// Returns `true` if nothing is pending.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ============================================================================
// SocketCommandChannel
// ============================================================================

/// Command route over the open WebSocket session.
#[derive(Debug, Clone)]
pub struct SocketCommandChannel {
    slot: SessionSlot,
    acks: Arc<AckRegistry>,
    ack_timeout: Duration,
}

impl SocketCommandChannel {
    /// Creates the route over whatever session `slot` currently holds.
    #[must_use]
    pub fn new(slot: SessionSlot, acks: Arc<AckRegistry>) -> Self {
        Self {
            slot,
            acks,
            ack_timeout: DEFAULT_ACK_TIMEOUT,
        }
    }

    /// Sets how long to wait for an acknowledgement.
    #[must_use]
    pub fn with_ack_timeout(mut self, ack_timeout: Duration) -> Self {
        self.ack_timeout = ack_timeout;
        self
    }
}

#[async_trait]
impl CommandChannel for SocketCommandChannel {
    async fn submit(&self, body: Value) -> Result<CommandOutcome> {
        let session = self.slot.open().ok_or(Error::ConnectionClosed)?;

        let correlation_id = CorrelationId::generate();
        let rx = self.acks.register(correlation_id.clone())?;

        session.send(OutboundMessage::Command {
            body,
            correlation_id: correlation_id.clone(),
        });

        match timeout(self.ack_timeout, rx).await {
            Ok(Ok(outcome)) => Ok(outcome),
            Ok(Err(_)) => Err(Error::ConnectionClosed),
            Err(_) => {
                self.acks.cancel(&correlation_id);
                Err(Error::request_timeout(correlation_id, self.ack_timeout))
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
