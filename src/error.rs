//! Error types for the LiftCore link layer.
//!
//! This module defines all error types used throughout the crate.
//!
//! # Usage
//!
//! All fallible operations return [`Result<T>`] which uses [`Error`]:
//!
//! ```ignore
//! use liftcore_link::{Link, Result};
//!
//! async fn example(link: &Link) -> Result<()> {
//!     link.move_forward().await?;
//!     link.stop().await?;
//!     Ok(())
//! }
//! ```
//!
//! # Error Categories
//!
//! | Category | Variants |
//! |----------|----------|
//! | Configuration | [`Error::Config`] |
//! | Connection | [`Error::Connection`], [`Error::ConnectionTimeout`], [`Error::ConnectionClosed`], [`Error::Unavailable`] |
//! | Command | [`Error::RequestTimeout`], [`Error::NegotiationExhausted`] |
//! | Protocol | [`Error::Protocol`], [`Error::MalformedMessage`] |
//! | External | [`Error::Io`], [`Error::Json`], [`Error::WebSocket`], [`Error::Http`], [`Error::Url`] |
//!
//! Transient failures (connection class) are retried by the reconnection
//! machinery and never poison the protocol cache. Only
//! [`Error::NegotiationExhausted`] reports an explicit backend refusal.

// ============================================================================
// Imports
// ============================================================================

use std::io::Error as IoError;
use std::result::Result as StdResult;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::oneshot::error::RecvError;
use tokio_tungstenite::tungstenite::Error as WsError;

use crate::identifiers::CorrelationId;
use crate::negotiation::Rejection;
use crate::protocol::CommandFamily;

// ============================================================================
// Result Alias
// ============================================================================

/// Result type alias using crate [`enum@Error`].
pub type Result<T> = StdResult<T, Error>;

// ============================================================================
// Error Enum
// ============================================================================

/// Main error type for the crate.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Configuration error.
    ///
    /// Returned when link options are missing or invalid.
    #[error("Configuration error: {message}")]
    Config {
        /// Description of the configuration error.
        message: String,
    },

    // ========================================================================
    // Connection Errors
    // ========================================================================
    /// Connection to the backend failed.
    #[error("Connection failed: {message}")]
    Connection {
        /// Description of the connection error.
        message: String,
    },

    /// Connection attempt did not complete in time.
    #[error("Connection timeout after {timeout_ms}ms")]
    ConnectionTimeout {
        /// Milliseconds waited before timeout.
        timeout_ms: u64,
    },

    /// No open session, or the session closed while a request was pending.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Backend answered with a gateway-class status while restarting.
    ///
    /// Treated like a network failure: never used to pick a protocol variant.
    #[error("Backend unavailable (HTTP {status})")]
    Unavailable {
        /// HTTP status returned by the proxy in front of the backend.
        status: u16,
    },

    // ========================================================================
    // Command Errors
    // ========================================================================
    /// A socket-routed command was not acknowledged in time.
    #[error("Command {correlation_id} not acknowledged after {timeout_ms}ms")]
    RequestTimeout {
        /// Correlation id stamped on the command.
        correlation_id: CorrelationId,
        /// Milliseconds waited before timeout.
        timeout_ms: u64,
    },

    /// Every candidate wire variant of a command family was rejected.
    #[error("No protocol variant accepted for '{family}' ({} rejected)", .rejections.len())]
    NegotiationExhausted {
        /// Command family that could not be delivered.
        family: CommandFamily,
        /// One entry per rejected attempt, in attempt order.
        rejections: Vec<Rejection>,
    },

    // ========================================================================
    // Protocol Errors
    // ========================================================================
    /// Protocol violation or unexpected response shape.
    #[error("Protocol error: {message}")]
    Protocol {
        /// Description of the protocol violation.
        message: String,
    },

    /// Inbound payload could not be decoded.
    #[error("Malformed message: {message}")]
    MalformedMessage {
        /// Decoder diagnostic.
        message: String,
    },

    // ========================================================================
    // External Errors
    // ========================================================================
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] IoError),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] WsError),

    /// HTTP client error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// URL parse error.
    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),

    /// Channel receive error.
    #[error("Channel closed")]
    ChannelClosed(#[from] RecvError),
}

// ============================================================================
// Error Constructors
// ============================================================================

impl Error {
    /// Creates a configuration error.
    #[inline]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates a connection error.
    #[inline]
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    /// Creates a connection timeout error.
    #[inline]
    pub fn connection_timeout(timeout_ms: u64) -> Self {
        Self::ConnectionTimeout { timeout_ms }
    }

    /// Creates a backend-unavailable error.
    #[inline]
    pub fn unavailable(status: u16) -> Self {
        Self::Unavailable { status }
    }

    /// Creates a request timeout error. Waits beyond `u64::MAX` ms saturate.
    #[inline]
    pub fn request_timeout(correlation_id: CorrelationId, waited: Duration) -> Self {
        Self::RequestTimeout {
            correlation_id,
            timeout_ms: u64::try_from(waited.as_millis()).unwrap_or(u64::MAX),
        }
    }

    /// Creates an exhausted-negotiation error.
    #[inline]
    pub fn negotiation_exhausted(family: CommandFamily, rejections: Vec<Rejection>) -> Self {
        Self::NegotiationExhausted { family, rejections }
    }

    /// Creates a protocol error.
    #[inline]
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Creates a malformed message error.
    #[inline]
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::MalformedMessage {
            message: message.into(),
        }
    }
}

// ============================================================================
// Error Predicates
// ============================================================================

impl Error {
    /// Returns `true` if this is a timeout error.
    #[inline]
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        match self {
            Self::ConnectionTimeout { .. } | Self::RequestTimeout { .. } => true,
            Self::Http(e) => e.is_timeout(),
            _ => false,
        }
    }

    /// Returns `true` if this is a connection-class (transient) error.
    #[inline]
    #[must_use]
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::Connection { .. }
                | Self::ConnectionTimeout { .. }
                | Self::ConnectionClosed
                | Self::Unavailable { .. }
                | Self::RequestTimeout { .. }
                | Self::WebSocket(_)
                | Self::Http(_)
        )
    }

    /// Returns `true` if the backend explicitly refused every encoding.
    #[inline]
    #[must_use]
    pub fn is_rejection(&self) -> bool {
        matches!(self, Self::NegotiationExhausted { .. })
    }

    /// Returns `true` if this error may succeed on retry.
    ///
    /// Rejections are not recoverable by retrying the same command.
    #[inline]
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        self.is_connection_error()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::io::ErrorKind;

    use crate::protocol::ProtocolVariant;

    #[test]
    fn test_error_display() {
        let err = Error::connection("refused");
        assert_eq!(err.to_string(), "Connection failed: refused");
    }

    #[test]
    fn test_unavailable_display() {
        let err = Error::unavailable(503);
        assert_eq!(err.to_string(), "Backend unavailable (HTTP 503)");
    }

    #[test]
    fn test_negotiation_exhausted_display() {
        let err = Error::negotiation_exhausted(
            CommandFamily::Move,
            vec![
                Rejection::new(ProtocolVariant::Structured, Some(400), "bad body"),
                Rejection::new(ProtocolVariant::TaskArgs, Some(422), "unknown task"),
            ],
        );
        assert_eq!(
            err.to_string(),
            "No protocol variant accepted for 'move' (2 rejected)"
        );
        assert!(err.is_rejection());
        assert!(!err.is_recoverable());
    }

    #[test]
    fn test_is_connection_error() {
        assert!(Error::connection("x").is_connection_error());
        assert!(Error::ConnectionClosed.is_connection_error());
        assert!(Error::unavailable(502).is_connection_error());
        assert!(
            Error::request_timeout(CorrelationId::generate(), Duration::from_millis(10))
                .is_connection_error()
        );
        assert!(!Error::config("x").is_connection_error());
        assert!(!Error::protocol("x").is_connection_error());
    }

    #[test]
    fn test_request_timeout_millis() {
        let id = CorrelationId::from("c1");
        let err = Error::request_timeout(id.clone(), Duration::from_millis(1500));
        assert_eq!(err.to_string(), "Command c1 not acknowledged after 1500ms");

        let err = Error::request_timeout(id, Duration::MAX);
        assert!(matches!(
            err,
            Error::RequestTimeout { timeout_ms: u64::MAX, .. }
        ));
    }

    #[test]
    fn test_is_timeout() {
        assert!(Error::connection_timeout(5000).is_timeout());
        assert!(!Error::ConnectionClosed.is_timeout());
    }

    #[test]
    fn test_from_io_error() {
        let io_err = IoError::new(ErrorKind::ConnectionReset, "reset");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn test_from_json_error() {
        let json_err = serde_json::from_str::<String>("invalid").unwrap_err();
        let err: Error = json_err.into();
        assert!(matches!(err, Error::Json(_)));
    }

    #[test]
    fn test_from_url_error() {
        let url_err = url::Url::parse("not a url").unwrap_err();
        let err: Error = url_err.into();
        assert!(matches!(err, Error::Url(_)));
    }
}
