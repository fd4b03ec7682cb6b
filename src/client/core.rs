//! The link handle.
//!
//! A [`Link`] owns one supervised connection to the backend, the client-side
//! robot state, and the command negotiator. Clones share everything.
//!
//! # Example
//!
//! ```no_run
//! use liftcore_link::{Link, LinkEvent, LinkEventKind, TransportKind};
//!
//! # async fn example() -> liftcore_link::Result<()> {
//! let link = Link::builder()
//!     .api_url("http://localhost:3000")
//!     .transport(TransportKind::Push)
//!     .build()?;
//!
//! link.on(LinkEventKind::Obstacle, |event| {
//!     if let LinkEvent::Obstacle(payload) = event {
//!         eprintln!("obstacle: {payload}");
//!     }
//! });
//!
//! let receipt = link.lift_up().await?;
//! println!("{receipt}");
//!
//! link.shutdown().await;
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::negotiation::{AckRegistry, CommandChannel, CommandNegotiator, VariantCache};
use crate::protocol::{
    Command, CommandReceipt, DriveMode, TravelDirection, TurnDirection, VerticalDirection,
};
use crate::router::{EventRouter, LinkEvent, LinkEventKind};
use crate::session::{
    BackoffState, HeartbeatMonitor, JitterSource, RandomJitter, ReconnectionController,
};
use crate::state::{LogEntry, LogRing, PerceptionSnapshot, TelemetrySnapshot, TelemetryStore};
use crate::transport::{ConnectionState, Connector, HttpApi, SessionSlot};

use super::builder::LinkBuilder;
use super::options::LinkOptions;
use super::supervisor::{Control, LinkStatus, Supervisor, SupervisorParts};

// ============================================================================
// Types
// ============================================================================

/// Internal shared state for the link.
pub(crate) struct LinkInner {
    /// Effective configuration.
    pub options: LinkOptions,

    /// REST client (health probe).
    pub api: HttpApi,

    /// Inbound dispatch and subscriber fan-out.
    pub router: Arc<EventRouter>,

    /// Command delivery with variant negotiation.
    pub negotiator: CommandNegotiator,

    /// Status published by the supervisor.
    pub status: Arc<RwLock<LinkStatus>>,

    /// Control channel to the supervisor.
    control_tx: mpsc::UnboundedSender<Control>,

    /// Supervisor task, taken on shutdown.
    task: Mutex<Option<JoinHandle<()>>>,

    /// Set once [`Link::shutdown`] began; commands are refused afterwards.
    shut_down: AtomicBool,
}

impl Drop for LinkInner {
    fn drop(&mut self) {
        let _ = self.control_tx.send(Control::Shutdown(None));
    }
}

/// Pieces assembled by [`LinkBuilder`].
pub(crate) struct LinkParts {
    pub options: LinkOptions,
    pub api: HttpApi,
    pub connector: Arc<dyn Connector>,
    pub channel: Arc<dyn CommandChannel>,
    pub slot: SessionSlot,
    pub acks: Arc<AckRegistry>,
    pub jitter: Option<Box<dyn JitterSource>>,
}

// ============================================================================
// Link
// ============================================================================

/// Supervised realtime link to one robot backend.
#[derive(Clone)]
pub struct Link {
    /// Shared inner state.
    pub(crate) inner: Arc<LinkInner>,
}

impl fmt::Debug for Link {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Link")
            .field("api_url", &self.inner.options.api_url)
            .field("transport", &self.inner.options.transport)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Link - Construction
// ============================================================================

impl Link {
    /// Creates a configuration builder.
    #[inline]
    #[must_use]
    pub fn builder() -> LinkBuilder {
        LinkBuilder::new()
    }

    /// Wires the parts together and starts the supervisor.
    pub(crate) fn start(parts: LinkParts) -> Self {
        let LinkParts {
            options,
            api,
            connector,
            channel,
            slot,
            acks,
            jitter,
        } = parts;

        let store = Arc::new(TelemetryStore::new());
        let log = Arc::new(LogRing::new(options.log_capacity));
        let router = Arc::new(EventRouter::new(
            store,
            log,
            Arc::clone(&acks),
            options.event_buffer,
        ));
        let cache = Arc::new(VariantCache::new());
        let negotiator = CommandNegotiator::new(channel, cache, options.robot_id.clone());
        let status = Arc::new(RwLock::new(LinkStatus::default()));

        let controller = ReconnectionController::with_jitter(
            options.backoff,
            jitter.unwrap_or_else(|| Box::new(RandomJitter)),
        );

        let (control_tx, task) = Supervisor::spawn(SupervisorParts {
            connector,
            controller,
            heartbeat: HeartbeatMonitor::new(options.heartbeat_interval),
            router: Arc::clone(&router),
            acks,
            slot,
            status: Arc::clone(&status),
        });

        info!(
            api_url = %options.api_url,
            transport = ?options.transport,
            route = ?options.resolved_command_route(),
            "Link started"
        );

        Self {
            inner: Arc::new(LinkInner {
                options,
                api,
                router,
                negotiator,
                status,
                control_tx,
                task: Mutex::new(Some(task)),
                shut_down: AtomicBool::new(false),
            }),
        }
    }
}

// ============================================================================
// Link - State
// ============================================================================

impl Link {
    /// Effective configuration.
    #[inline]
    #[must_use]
    pub fn options(&self) -> &LinkOptions {
        &self.inner.options
    }

    /// Connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.inner.status.read().state
    }

    /// Full status snapshot.
    #[must_use]
    pub fn status(&self) -> LinkStatus {
        *self.inner.status.read()
    }

    /// Last heartbeat round trip; `None` when unknown or stale.
    #[must_use]
    pub fn latency(&self) -> Option<Duration> {
        self.inner.status.read().latency
    }

    /// Reconnection backoff progress.
    #[must_use]
    pub fn backoff(&self) -> BackoffState {
        self.inner.status.read().backoff
    }

    /// Merged telemetry.
    #[must_use]
    pub fn telemetry(&self) -> TelemetrySnapshot {
        self.inner.router.store().current()
    }

    /// Latest perception snapshot.
    #[must_use]
    pub fn perception(&self) -> Option<PerceptionSnapshot> {
        self.inner.router.store().perception()
    }

    /// Retained log entries, oldest first.
    #[must_use]
    pub fn logs(&self) -> Vec<LogEntry> {
        self.inner.router.log().entries()
    }

    /// Up to `n` most recent log entries, newest first.
    #[must_use]
    pub fn recent_logs(&self, n: usize) -> Vec<LogEntry> {
        self.inner.router.log().latest(n)
    }

    /// Variant cache shared by every command.
    #[inline]
    #[must_use]
    pub fn protocol_cache(&self) -> &Arc<VariantCache> {
        self.inner.negotiator.cache()
    }

    /// Forgets every confirmed protocol variant.
    pub fn reset_protocol_cache(&self) {
        self.protocol_cache().reset();
    }
}

// ============================================================================
// Link - Subscriptions
// ============================================================================

impl Link {
    /// Registers a callback for one kind of event.
    ///
    /// Callbacks run on the supervisor task; keep them short.
    pub fn on<F>(&self, kind: LinkEventKind, handler: F)
    where
        F: Fn(&LinkEvent) + Send + Sync + 'static,
    {
        self.inner.router.on(kind, Box::new(handler));
    }

    /// Removes every callback for `kind`.
    pub fn clear_handlers(&self, kind: LinkEventKind) {
        self.inner.router.clear_handlers(kind);
    }

    /// Receiver of every published event.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<LinkEvent> {
        self.inner.router.subscribe()
    }
}

// ============================================================================
// Link - Commands
// ============================================================================

impl Link {
    /// Delivers a command, negotiating the wire variant.
    ///
    /// # Errors
    ///
    /// - connection-class errors when the backend is unreachable
    /// - [`Error::ConnectionClosed`] once [`Link::shutdown`] was called
    /// - [`Error::NegotiationExhausted`] when every variant was refused
    pub async fn send(&self, command: Command) -> Result<CommandReceipt> {
        if self.inner.shut_down.load(Ordering::Acquire) {
            debug!(%command, "Link shut down, command refused");
            return Err(Error::ConnectionClosed);
        }
        debug!(%command, "Sending command");
        self.inner.negotiator.execute(command).await
    }

    /// Drives forward.
    ///
    /// # Errors
    ///
    /// See [`Link::send`].
    pub async fn move_forward(&self) -> Result<CommandReceipt> {
        self.send(Command::Move(TravelDirection::Forward)).await
    }

    /// Drives backward.
    ///
    /// # Errors
    ///
    /// See [`Link::send`].
    pub async fn move_backward(&self) -> Result<CommandReceipt> {
        self.send(Command::Move(TravelDirection::Backward)).await
    }

    /// Turns left.
    ///
    /// # Errors
    ///
    /// See [`Link::send`].
    pub async fn turn_left(&self) -> Result<CommandReceipt> {
        self.send(Command::Turn(TurnDirection::Left)).await
    }

    /// Turns right.
    ///
    /// # Errors
    ///
    /// See [`Link::send`].
    pub async fn turn_right(&self) -> Result<CommandReceipt> {
        self.send(Command::Turn(TurnDirection::Right)).await
    }

    /// Raises the mast.
    ///
    /// # Errors
    ///
    /// See [`Link::send`].
    pub async fn lift_up(&self) -> Result<CommandReceipt> {
        self.send(Command::Lift(VerticalDirection::Up)).await
    }

    /// Lowers the mast.
    ///
    /// # Errors
    ///
    /// See [`Link::send`].
    pub async fn lift_down(&self) -> Result<CommandReceipt> {
        self.send(Command::Lift(VerticalDirection::Down)).await
    }

    /// Tilts up.
    ///
    /// # Errors
    ///
    /// See [`Link::send`].
    pub async fn tilt_up(&self) -> Result<CommandReceipt> {
        self.send(Command::Tilt(VerticalDirection::Up)).await
    }

    /// Tilts down.
    ///
    /// # Errors
    ///
    /// See [`Link::send`].
    pub async fn tilt_down(&self) -> Result<CommandReceipt> {
        self.send(Command::Tilt(VerticalDirection::Down)).await
    }

    /// Switches between automatic and manual operation.
    ///
    /// # Errors
    ///
    /// See [`Link::send`].
    pub async fn set_mode(&self, mode: DriveMode) -> Result<CommandReceipt> {
        self.send(Command::Mode(mode)).await
    }

    /// Starts the automatic route.
    ///
    /// # Errors
    ///
    /// See [`Link::send`].
    pub async fn start_auto(&self) -> Result<CommandReceipt> {
        self.send(Command::Start).await
    }

    /// Stops everything.
    ///
    /// # Errors
    ///
    /// See [`Link::send`].
    pub async fn stop(&self) -> Result<CommandReceipt> {
        self.send(Command::Stop).await
    }

    /// Captures an image.
    ///
    /// # Errors
    ///
    /// See [`Link::send`].
    pub async fn take_photo(&self) -> Result<CommandReceipt> {
        self.send(Command::TakePhoto).await
    }

    /// Measures `GET /health` round trip, independent of the live session.
    ///
    /// # Errors
    ///
    /// Connection-class errors when the backend is unreachable.
    pub async fn probe_health(&self) -> Result<Duration> {
        self.inner.api.health().await
    }
}

// ============================================================================
// Link - Lifecycle
// ============================================================================

impl Link {
    /// Tears the link down: no further reconnects, session closed, timers
    /// cancelled. Idempotent.
    pub async fn shutdown(&self) {
        self.inner.shut_down.store(true, Ordering::Release);

        let (done_tx, done_rx) = oneshot::channel();
        if self
            .inner
            .control_tx
            .send(Control::Shutdown(Some(done_tx)))
            .is_ok()
        {
            let _ = done_rx.await;
        }

        let task = self.inner.task.lock().take();
        if let Some(task) = task {
            let _ = task.await;
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
