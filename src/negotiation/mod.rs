//! Command delivery with wire-format negotiation.
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `cache` | Confirmed variant per command family |
//! | `channel` | HTTP and socket delivery routes |
//! | `negotiator` | Fallback walk over candidate variants |

// ============================================================================
// Submodules
// ============================================================================

/// Confirmed variant cache.
pub mod cache;

/// Delivery routes.
pub mod channel;

/// Variant negotiation.
pub mod negotiator;

// ============================================================================
// Re-exports
// ============================================================================

pub use cache::VariantCache;
pub use channel::{
    AckRegistry, CommandChannel, DEFAULT_ACK_TIMEOUT, HttpCommandChannel, SocketCommandChannel,
};
pub use negotiator::{CommandNegotiator, PendingCommand, Rejection};
