//! Link configuration.
//!
//! # Example
//!
//! ```ignore
//! use std::time::Duration;
//! use liftcore_link::{LinkOptions, TransportKind};
//!
//! let options = LinkOptions::new()
//!     .with_api_url("http://robot.local:3000")
//!     .with_transport(TransportKind::Socket)
//!     .with_heartbeat_interval(Duration::from_secs(5));
//! ```
//!
//! # Environment
//!
//! [`LinkOptions::from_env`] starts from the defaults and overrides:
//!
//! | Variable | Field |
//! |----------|-------|
//! | `LIFTCORE_API_URL` | `api_url` |
//! | `LIFTCORE_WS_URL` | `ws_url` |
//! | `LIFTCORE_ROBOT_ID` | `robot_id` |
//! | `LIFTCORE_TRANSPORT` | `transport` (`socket` / `push`) |
//! | `LIFTCORE_HEARTBEAT_MS` | `heartbeat_interval` |
//! | `LIFTCORE_STATUS_POLL_MS` | `status_poll_interval` (`0` disables) |
//! | `LIFTCORE_BACKOFF_BASE_MS` | `backoff.base_delay` |
//! | `LIFTCORE_BACKOFF_MAX_MS` | `backoff.max_delay` |
//! | `LIFTCORE_LOG_CAPACITY` | `log_capacity` |

// ============================================================================
// Imports
// ============================================================================

use std::env;
use std::str::FromStr;
use std::time::Duration;

use tracing::warn;
use url::Url;

use crate::error::{Error, Result};
use crate::negotiation::DEFAULT_ACK_TIMEOUT;
use crate::router::DEFAULT_EVENT_BUFFER;
use crate::session::{BackoffPolicy, DEFAULT_HEARTBEAT_INTERVAL};
use crate::state::DEFAULT_LOG_CAPACITY;
use crate::transport::TransportKind;
use crate::transport::http::{DEFAULT_CONNECT_TIMEOUT, DEFAULT_REQUEST_TIMEOUT};
use crate::transport::push::DEFAULT_STATUS_POLL;

// ============================================================================
// Constants
// ============================================================================

/// Default backend API root.
pub const DEFAULT_API_URL: &str = "http://localhost:3000";

/// Robot addressed when none is configured.
pub const DEFAULT_ROBOT_ID: &str = "507f1f77bcf86cd799439011";

/// Path of the WebSocket endpoint derived from the API URL.
const DEFAULT_WS_PATH: &str = "ws";

// ============================================================================
// CommandRoute
// ============================================================================

/// How commands reach the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandRoute {
    /// `POST /api/robot/command`.
    Http,
    /// Correlated frame on the WebSocket session.
    Socket,
}

// ============================================================================
// LinkOptions
// ============================================================================

/// Everything needed to build a [`Link`](crate::Link).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkOptions {
    /// HTTP API root.
    pub api_url: String,

    /// WebSocket endpoint; derived from `api_url` when `None`.
    pub ws_url: Option<String>,

    /// Robot the commands are addressed to.
    pub robot_id: String,

    /// Session realization.
    pub transport: TransportKind,

    /// Command route; follows the transport when `None`.
    pub command_route: Option<CommandRoute>,

    /// Heartbeat probe interval.
    pub heartbeat_interval: Duration,

    /// `/api/status` poll interval on the push transport; `None` disables.
    pub status_poll_interval: Option<Duration>,

    /// Reconnection backoff.
    pub backoff: BackoffPolicy,

    /// Retained log entries.
    pub log_capacity: usize,

    /// Broadcast buffer per subscriber.
    pub event_buffer: usize,

    /// TCP/WebSocket connect timeout.
    pub connect_timeout: Duration,

    /// Timeout of one-shot HTTP requests.
    pub request_timeout: Duration,

    /// How long a socket-routed command waits for its ack.
    pub ack_timeout: Duration,
}

impl Default for LinkOptions {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            ws_url: None,
            robot_id: DEFAULT_ROBOT_ID.to_string(),
            transport: TransportKind::default(),
            command_route: None,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            status_poll_interval: Some(DEFAULT_STATUS_POLL),
            backoff: BackoffPolicy::default(),
            log_capacity: DEFAULT_LOG_CAPACITY,
            event_buffer: DEFAULT_EVENT_BUFFER,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            ack_timeout: DEFAULT_ACK_TIMEOUT,
        }
    }
}

// ============================================================================
// Constructors
// ============================================================================

impl LinkOptions {
    /// Creates options with default settings.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates options from `LIFTCORE_*` environment variables.
    ///
    /// Unparseable values are logged and ignored.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Creates options from an arbitrary key lookup.
    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut options = Self::default();

        if let Some(url) = lookup("LIFTCORE_API_URL") {
            options.api_url = url;
        }
        if let Some(url) = lookup("LIFTCORE_WS_URL") {
            options.ws_url = Some(url);
        }
        if let Some(id) = lookup("LIFTCORE_ROBOT_ID") {
            options.robot_id = id;
        }
        if let Some(kind) = parsed::<TransportKind>(&lookup, "LIFTCORE_TRANSPORT") {
            options.transport = kind;
        }
        if let Some(ms) = parsed::<u64>(&lookup, "LIFTCORE_HEARTBEAT_MS") {
            options.heartbeat_interval = Duration::from_millis(ms);
        }
        if let Some(ms) = parsed::<u64>(&lookup, "LIFTCORE_STATUS_POLL_MS") {
            options.status_poll_interval = (ms > 0).then(|| Duration::from_millis(ms));
        }
        if let Some(ms) = parsed::<u64>(&lookup, "LIFTCORE_BACKOFF_BASE_MS") {
            options.backoff.base_delay = Duration::from_millis(ms);
        }
        if let Some(ms) = parsed::<u64>(&lookup, "LIFTCORE_BACKOFF_MAX_MS") {
            options.backoff.max_delay = Duration::from_millis(ms);
        }
        if let Some(capacity) = parsed::<usize>(&lookup, "LIFTCORE_LOG_CAPACITY") {
            options.log_capacity = capacity;
        }

        options
    }
}

/// Reads and parses one variable, warning on garbage.
fn parsed<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(key, value = %raw, error = %e, "Ignoring invalid environment value");
            None
        }
    }
}

// ============================================================================
// Builder Methods
// ============================================================================

impl LinkOptions {
    /// Sets the HTTP API root.
    #[inline]
    #[must_use]
    pub fn with_api_url(mut self, url: impl Into<String>) -> Self {
        self.api_url = url.into();
        self
    }

    /// Sets the WebSocket endpoint explicitly.
    #[inline]
    #[must_use]
    pub fn with_ws_url(mut self, url: impl Into<String>) -> Self {
        self.ws_url = Some(url.into());
        self
    }

    /// Sets the robot id.
    #[inline]
    #[must_use]
    pub fn with_robot_id(mut self, robot_id: impl Into<String>) -> Self {
        self.robot_id = robot_id.into();
        self
    }

    /// Selects the session realization.
    #[inline]
    #[must_use]
    pub fn with_transport(mut self, transport: TransportKind) -> Self {
        self.transport = transport;
        self
    }

    /// Forces a command route.
    #[inline]
    #[must_use]
    pub fn with_command_route(mut self, route: CommandRoute) -> Self {
        self.command_route = Some(route);
        self
    }

    /// Sets the heartbeat interval.
    #[inline]
    #[must_use]
    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    /// Sets (or disables) status polling.
    #[inline]
    #[must_use]
    pub fn with_status_poll_interval(mut self, interval: Option<Duration>) -> Self {
        self.status_poll_interval = interval;
        self
    }

    /// Sets the backoff policy.
    #[inline]
    #[must_use]
    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    /// Sets the log ring capacity.
    #[inline]
    #[must_use]
    pub fn with_log_capacity(mut self, capacity: usize) -> Self {
        self.log_capacity = capacity;
        self
    }

    /// Sets the broadcast buffer size.
    #[inline]
    #[must_use]
    pub fn with_event_buffer(mut self, buffer: usize) -> Self {
        self.event_buffer = buffer;
        self
    }

    /// Sets the connect timeout.
    #[inline]
    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Sets the one-shot HTTP request timeout.
    #[inline]
    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Sets the socket ack timeout.
    #[inline]
    #[must_use]
    pub fn with_ack_timeout(mut self, timeout: Duration) -> Self {
        self.ack_timeout = timeout;
        self
    }
}

// ============================================================================
// Resolution
// ============================================================================

impl LinkOptions {
    /// Effective command route.
    #[must_use]
    pub fn resolved_command_route(&self) -> CommandRoute {
        self.command_route.unwrap_or(match self.transport {
            TransportKind::Socket => CommandRoute::Socket,
            TransportKind::Push => CommandRoute::Http,
        })
    }

    /// Parses the API root.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the URL is invalid or not http(s).
    pub fn resolved_api_url(&self) -> Result<Url> {
        let url = Url::parse(&self.api_url)
            .map_err(|e| Error::config(format!("invalid API URL '{}': {e}", self.api_url)))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(Error::config(format!(
                "API URL must use http or https, got '{}'",
                self.api_url
            )));
        }
        Ok(url)
    }

    /// Effective WebSocket endpoint.
    ///
    /// Derived as `ws(s)://<api host>/ws` when not set explicitly.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the URL is invalid or not ws(s).
    pub fn resolved_ws_url(&self) -> Result<Url> {
        let url = match &self.ws_url {
            Some(raw) => Url::parse(raw)
                .map_err(|e| Error::config(format!("invalid WebSocket URL '{raw}': {e}")))?,
            None => {
                let mut url = self.resolved_api_url()?;
                let scheme = if url.scheme() == "https" { "wss" } else { "ws" };
                url.set_scheme(scheme)
                    .map_err(|()| Error::config("cannot derive WebSocket URL from API URL"))?;
                url.set_path(DEFAULT_WS_PATH);
                url
            }
        };

        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(Error::config(format!(
                "WebSocket URL must use ws or wss, got '{url}'"
            )));
        }
        Ok(url)
    }

    /// Checks every field.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] describing the first problem found.
    pub fn validate(&self) -> Result<()> {
        self.resolved_api_url()?;
        if self.transport == TransportKind::Socket
            || self.resolved_command_route() == CommandRoute::Socket
        {
            self.resolved_ws_url()?;
        }
        if self.transport == TransportKind::Push
            && self.resolved_command_route() == CommandRoute::Socket
        {
            return Err(Error::config(
                "socket command route requires the socket transport",
            ));
        }
        if self.robot_id.trim().is_empty() {
            return Err(Error::config("robot id must not be empty"));
        }
        if self.heartbeat_interval.is_zero() {
            return Err(Error::config("heartbeat interval must be positive"));
        }
        if self.backoff.base_delay.is_zero() {
            return Err(Error::config("backoff base delay must be positive"));
        }
        if self.backoff.max_delay < self.backoff.base_delay {
            return Err(Error::config(
                "backoff max delay must not be below the base delay",
            ));
        }
        if self.log_capacity == 0 {
            return Err(Error::config("log capacity must be at least 1"));
        }
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use rustc_hash::FxHashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: FxHashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let options = LinkOptions::new();
        assert_eq!(options.robot_id, DEFAULT_ROBOT_ID);
        assert_eq!(options.heartbeat_interval, Duration::from_secs(10));
        assert_eq!(options.status_poll_interval, Some(Duration::from_secs(3)));
        assert_eq!(options.log_capacity, 50);
        assert_eq!(options.transport, TransportKind::Push);
        assert_eq!(options.resolved_command_route(), CommandRoute::Http);
        assert!(options.validate().is_ok());
    }

    #[test]
    fn test_from_lookup() {
        let options = LinkOptions::from_lookup(lookup(&[
            ("LIFTCORE_API_URL", "https://robot.example:8443"),
            ("LIFTCORE_TRANSPORT", "ws"),
            ("LIFTCORE_HEARTBEAT_MS", "2500"),
            ("LIFTCORE_STATUS_POLL_MS", "0"),
            ("LIFTCORE_BACKOFF_BASE_MS", "250"),
            ("LIFTCORE_LOG_CAPACITY", "many"),
        ]));

        assert_eq!(options.api_url, "https://robot.example:8443");
        assert_eq!(options.transport, TransportKind::Socket);
        assert_eq!(options.heartbeat_interval, Duration::from_millis(2500));
        assert_eq!(options.status_poll_interval, None);
        assert_eq!(options.backoff.base_delay, Duration::from_millis(250));
        assert_eq!(options.log_capacity, DEFAULT_LOG_CAPACITY);
        assert_eq!(options.resolved_command_route(), CommandRoute::Socket);
    }

    #[test]
    fn test_ws_url_derived_from_api() {
        let options = LinkOptions::new().with_api_url("https://robot.example:8443/base");
        assert_eq!(
            options.resolved_ws_url().expect("ws url").as_str(),
            "wss://robot.example:8443/ws"
        );

        let options = LinkOptions::new().with_ws_url("ws://10.0.0.5:9000/live");
        assert_eq!(
            options.resolved_ws_url().expect("ws url").as_str(),
            "ws://10.0.0.5:9000/live"
        );
    }

    #[test]
    fn test_validation_failures() {
        assert!(LinkOptions::new().with_api_url("not a url").validate().is_err());
        assert!(LinkOptions::new().with_api_url("ftp://h").validate().is_err());
        assert!(LinkOptions::new().with_robot_id("  ").validate().is_err());
        assert!(LinkOptions::new().with_heartbeat_interval(Duration::ZERO).validate().is_err());
        assert!(LinkOptions::new().with_log_capacity(0).validate().is_err());
        assert!(
            LinkOptions::new()
                .with_command_route(CommandRoute::Socket)
                .validate()
                .is_err()
        );
        assert!(
            LinkOptions::new()
                .with_transport(TransportKind::Socket)
                .with_ws_url("http://wrong")
                .validate()
                .is_err()
        );
    }

    #[test]
    fn test_socket_transport_with_http_route() {
        let options = LinkOptions::new()
            .with_transport(TransportKind::Socket)
            .with_command_route(CommandRoute::Http);
        assert!(options.validate().is_ok());
        assert_eq!(options.resolved_command_route(), CommandRoute::Http);
    }
}
