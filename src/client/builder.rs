//! Builder pattern for link configuration.
//!
//! # Example
//!
//! ```no_run
//! use liftcore_link::{Link, TransportKind};
//!
//! # async fn example() -> liftcore_link::Result<()> {
//! let link = Link::builder()
//!     .api_url("http://robot.local:3000")
//!     .robot_id("507f1f77bcf86cd799439011")
//!     .transport(TransportKind::Socket)
//!     .build()?;
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::negotiation::{AckRegistry, CommandChannel, HttpCommandChannel, SocketCommandChannel};
use crate::session::{BackoffPolicy, JitterSource};
use crate::transport::{Connector, HttpApi, PushConnector, SessionSlot, SocketConnector, TransportKind};

use super::core::{Link, LinkParts};
use super::options::{CommandRoute, LinkOptions};

// ============================================================================
// LinkBuilder
// ============================================================================

/// Builder for a [`Link`].
///
/// Use [`Link::builder()`] to create one.
#[derive(Default)]
pub struct LinkBuilder {
    /// Configuration.
    options: LinkOptions,
    /// Replacement session factory.
    connector: Option<Arc<dyn Connector>>,
    /// Replacement command route.
    channel: Option<Arc<dyn CommandChannel>>,
    /// Replacement jitter source.
    jitter: Option<Box<dyn JitterSource>>,
}

impl fmt::Debug for LinkBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LinkBuilder")
            .field("options", &self.options)
            .field("custom_connector", &self.connector.is_some())
            .field("custom_channel", &self.channel.is_some())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// LinkBuilder Implementation
// ============================================================================

impl LinkBuilder {
    /// Creates a builder with default options.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces all options.
    #[inline]
    #[must_use]
    pub fn options(mut self, options: LinkOptions) -> Self {
        self.options = options;
        self
    }

    /// Sets the HTTP API root.
    #[inline]
    #[must_use]
    pub fn api_url(mut self, url: impl Into<String>) -> Self {
        self.options.api_url = url.into();
        self
    }

    /// Sets the WebSocket endpoint.
    #[inline]
    #[must_use]
    pub fn ws_url(mut self, url: impl Into<String>) -> Self {
        self.options.ws_url = Some(url.into());
        self
    }

    /// Sets the robot id.
    #[inline]
    #[must_use]
    pub fn robot_id(mut self, robot_id: impl Into<String>) -> Self {
        self.options.robot_id = robot_id.into();
        self
    }

    /// Selects the session realization.
    #[inline]
    #[must_use]
    pub fn transport(mut self, transport: TransportKind) -> Self {
        self.options.transport = transport;
        self
    }

    /// Forces a command route.
    #[inline]
    #[must_use]
    pub fn command_route(mut self, route: CommandRoute) -> Self {
        self.options.command_route = Some(route);
        self
    }

    /// Sets the heartbeat interval.
    #[inline]
    #[must_use]
    pub fn heartbeat_interval(mut self, interval: Duration) -> Self {
        self.options.heartbeat_interval = interval;
        self
    }

    /// Sets the backoff policy.
    #[inline]
    #[must_use]
    pub fn backoff(mut self, policy: BackoffPolicy) -> Self {
        self.options.backoff = policy;
        self
    }

    /// Sets the log ring capacity.
    #[inline]
    #[must_use]
    pub fn log_capacity(mut self, capacity: usize) -> Self {
        self.options.log_capacity = capacity;
        self
    }

    /// Uses a custom session factory instead of the configured transport.
    #[inline]
    #[must_use]
    pub fn connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = Some(connector);
        self
    }

    /// Uses a custom command route.
    #[inline]
    #[must_use]
    pub fn command_channel(mut self, channel: Arc<dyn CommandChannel>) -> Self {
        self.channel = Some(channel);
        self
    }

    /// Uses a custom jitter source for reconnect delays.
    #[inline]
    #[must_use]
    pub fn jitter(mut self, jitter: Box<dyn JitterSource>) -> Self {
        self.jitter = Some(jitter);
        self
    }

    /// Validates the configuration and starts the link.
    ///
    /// The first connection attempt begins immediately.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] if the options are invalid
    /// - [`Error::Config`] if called outside a Tokio runtime
    /// - [`Error::Http`] if the HTTP client cannot be initialized
    pub fn build(self) -> Result<Link> {
        if tokio::runtime::Handle::try_current().is_err() {
            return Err(Error::config(
                "Link::builder().build() must be called within a Tokio runtime",
            ));
        }

        let options = self.options;
        options.validate()?;

        let api = HttpApi::new(
            options.resolved_api_url()?,
            options.connect_timeout,
            options.request_timeout,
        )?;
        let slot = SessionSlot::new();
        let acks = Arc::new(AckRegistry::new());

        let connector = match self.connector {
            Some(connector) => connector,
            None => Self::default_connector(&options, &api)?,
        };

        let channel: Arc<dyn CommandChannel> = match self.channel {
            Some(channel) => channel,
            None => match options.resolved_command_route() {
                CommandRoute::Http => Arc::new(HttpCommandChannel::new(api.clone())),
                CommandRoute::Socket => Arc::new(
                    SocketCommandChannel::new(slot.clone(), Arc::clone(&acks))
                        .with_ack_timeout(options.ack_timeout),
                ),
            },
        };

        Ok(Link::start(LinkParts {
            options,
            api,
            connector,
            channel,
            slot,
            acks,
            jitter: self.jitter,
        }))
    }
}

// ============================================================================
// Defaults
// ============================================================================

impl LinkBuilder {
    fn default_connector(options: &LinkOptions, api: &HttpApi) -> Result<Arc<dyn Connector>> {
        let connector: Arc<dyn Connector> = match options.transport {
            TransportKind::Socket => Arc::new(
                SocketConnector::new(options.resolved_ws_url()?)
                    .with_connect_timeout(options.connect_timeout),
            ),
            TransportKind::Push => Arc::new(
                PushConnector::new(api.clone()).with_status_poll(options.status_poll_interval),
            ),
        };
        Ok(connector)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_uses_defaults() {
        let builder = LinkBuilder::new();
        assert_eq!(builder.options, LinkOptions::default());
        assert!(builder.connector.is_none());
        assert!(builder.channel.is_none());
    }

    #[test]
    fn test_setters() {
        let builder = LinkBuilder::new()
            .api_url("http://h:1")
            .ws_url("ws://h:2/ws")
            .robot_id("r")
            .transport(TransportKind::Socket)
            .heartbeat_interval(Duration::from_secs(3))
            .log_capacity(7);

        assert_eq!(builder.options.api_url, "http://h:1");
        assert_eq!(builder.options.ws_url.as_deref(), Some("ws://h:2/ws"));
        assert_eq!(builder.options.robot_id, "r");
        assert_eq!(builder.options.transport, TransportKind::Socket);
        assert_eq!(builder.options.heartbeat_interval, Duration::from_secs(3));
        assert_eq!(builder.options.log_capacity, 7);
    }

    #[test]
    fn test_build_outside_runtime_fails() {
        let err = LinkBuilder::new().build().expect_err("no runtime");
        assert!(matches!(err, Error::Config { .. }));
    }

    #[tokio::test]
    async fn test_build_rejects_invalid_url() {
        let err = LinkBuilder::new()
            .api_url("localhost:3000")
            .build()
            .expect_err("invalid");
        assert!(matches!(err, Error::Config { .. }));
    }
}
