//! Session supervision policies.
//!
//! Both types here are synchronous state machines with no I/O; the
//! supervisor task drives them and owns the timers.
//!
//! | Module | Description |
//! |--------|-------------|
//! | `reconnect` | Exponential backoff with jitter |
//! | `heartbeat` | Probe/reply latency tracking |

// ============================================================================
// Submodules
// ============================================================================

/// Probe/reply latency tracking.
pub mod heartbeat;

/// Reconnection backoff.
pub mod reconnect;

// ============================================================================
// Re-exports
// ============================================================================

pub use heartbeat::{DEFAULT_HEARTBEAT_INTERVAL, HeartbeatMonitor, now_ms};
pub use reconnect::{
    BackoffPolicy, BackoffState, JitterSource, NoJitter, RandomJitter, ReconnectAction,
    ReconnectionController,
};
