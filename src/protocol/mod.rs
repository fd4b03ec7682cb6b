//! Wire message types.
//!
//! # Protocol Overview
//!
//! | Message Type | Direction | Purpose |
//! |--------------|-----------|---------|
//! | [`Command`] + [`ProtocolVariant`] | Client → Backend | Operator command, encoded per variant |
//! | [`OutboundMessage`] | Client → Backend | Heartbeat probe or socket-routed command |
//! | [`Envelope`] | Backend → Client | Tagged server push |
//! | [`CommandOutcome`] | Backend → Client | Verdict on one command body |
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `command` | Logical commands, families and encoders |
//! | `event` | Inbound envelope classification |
//! | `request` | Outbound frames and command outcomes |

// ============================================================================
// Submodules
// ============================================================================

/// Logical commands and their wire encodings.
pub mod command;

/// Inbound message types.
pub mod event;

/// Outbound message types and command outcomes.
pub mod request;

// ============================================================================
// Re-exports
// ============================================================================

pub use command::{
    COMMAND_SOURCE, Command, CommandFamily, DriveMode, Encoder, ProtocolVariant, TravelDirection,
    TurnDirection, VerticalDirection,
};
pub use event::{Envelope, EventKind, LogKind, LogPayload, ParsedEvent, PerceptionPayload};
pub use request::{CommandOutcome, CommandReceipt, OutboundMessage};
