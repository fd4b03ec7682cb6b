//! Client-side views of robot state.
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `telemetry` | Merged telemetry and latest perception snapshot |
//! | `log` | Bounded ring of recent log/ack events |
//!
//! Both are written only by the event router and read by everyone else.

// ============================================================================
// Submodules
// ============================================================================

/// Bounded log ring.
pub mod log;

/// Telemetry merge and perception snapshot.
pub mod telemetry;

// ============================================================================
// Re-exports
// ============================================================================

pub use log::{DEFAULT_LOG_CAPACITY, LogEntry, LogRing};
pub use telemetry::{PerceptionSnapshot, TelemetrySnapshot, TelemetryStore};
