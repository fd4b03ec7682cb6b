//! LiftCore Link - realtime connection and command layer for the LiftCore
//! teleoperation client.
//!
//! This library keeps a live channel to the robot backend, reconnects it
//! when it drops, measures its latency, merges the telemetry it pushes, and
//! delivers operator commands in whatever wire format the backend accepts.
//!
//! # Architecture
//!
//! One supervisor task per [`Link`] owns the connection:
//!
//! - **Transport session**: one connection attempt, either a WebSocket or an
//!   SSE stream paired with HTTP requests ([`TransportKind`])
//! - **Reconnection**: exponential backoff with jitter, reset on every
//!   successful open
//! - **Heartbeat**: periodic probe, latency from the echoed timestamp
//! - **Router**: tagged inbound events → telemetry, perception, log ring,
//!   subscribers
//! - **Negotiator**: tries candidate command encodings per family and caches
//!   the one the backend accepts
//!
//! # Quick Start
//!
//! ```no_run
//! use liftcore_link::{Link, LinkEvent, Result};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let link = Link::builder()
//!         .api_url("http://localhost:3000")
//!         .build()?;
//!
//!     let mut events = link.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             if let LinkEvent::Telemetry(snapshot) = event {
//!                 println!("battery: {:?}", snapshot.battery());
//!             }
//!         }
//!     });
//!
//!     link.move_forward().await?;
//!     link.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`client`] | [`Link`], [`LinkBuilder`], [`LinkOptions`] |
//! | [`error`] | Error types and [`Result`] alias |
//! | [`identifiers`] | Type-safe ID wrappers |
//! | [`negotiation`] | Command routes and variant negotiation |
//! | [`protocol`] | Wire message types |
//! | [`router`] | Inbound dispatch and subscriber events |
//! | [`session`] | Backoff and heartbeat state machines |
//! | [`state`] | Telemetry store and log ring |
//! | [`transport`] | WebSocket and SSE sessions |

// ============================================================================
// Modules
// ============================================================================

/// Link construction and supervision.
///
/// Use [`Link::builder()`] to create a configured link.
pub mod client;

/// Error types and result aliases.
///
/// All fallible operations return [`Result<T>`] which uses [`Error`].
pub mod error;

/// Type-safe identifiers for sessions, log entries and commands.
pub mod identifiers;

/// Command delivery with wire-format negotiation.
pub mod negotiation;

/// Wire message types.
pub mod protocol;

/// Inbound event dispatch.
pub mod router;

/// Reconnection and heartbeat policies.
pub mod session;

/// Client-side robot state.
pub mod state;

/// Transport sessions.
pub mod transport;

// ============================================================================
// Re-exports
// ============================================================================

// Client types
pub use client::{CommandRoute, Link, LinkBuilder, LinkOptions, LinkStatus};

// Error types
pub use error::{Error, Result};

// Identifier types
pub use identifiers::{CorrelationId, LogEntryId, SessionId};

// Negotiation types
pub use negotiation::{CommandChannel, CommandNegotiator, Rejection, VariantCache};

// Protocol types
pub use protocol::{
    Command, CommandFamily, CommandReceipt, DriveMode, Envelope, LogKind, ProtocolVariant,
    TravelDirection, TurnDirection, VerticalDirection,
};

// Router types
pub use router::{LinkEvent, LinkEventKind};

// Session types
pub use session::{BackoffPolicy, BackoffState};

// State types
pub use state::{LogEntry, PerceptionSnapshot, TelemetrySnapshot};

// Transport types
pub use transport::{ConnectionState, Connector, TransportKind, TransportSession};
