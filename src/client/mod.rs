//! Link construction and supervision.
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `core` | [`Link`] handle and public API |
//! | `builder` | Fluent [`LinkBuilder`] |
//! | `options` | [`LinkOptions`] and environment loading |
//! | `supervisor` | Connection supervisor task |

// ============================================================================
// Submodules
// ============================================================================

/// Link builder.
pub mod builder;

/// Link handle.
pub mod core;

/// Link configuration.
pub mod options;

/// Supervisor task.
pub mod supervisor;

// ============================================================================
// Re-exports
// ============================================================================

pub use builder::LinkBuilder;
pub use self::core::Link;
pub use options::{CommandRoute, DEFAULT_API_URL, DEFAULT_ROBOT_ID, LinkOptions};
pub use supervisor::LinkStatus;
