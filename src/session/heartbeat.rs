//! Heartbeat latency tracking.
//!
//! While a session is open the supervisor sends a probe every interval. Each
//! probe carries the client send time, which the backend echoes back; the
//! echoed value is both the correlation token and the start of the
//! measurement. Only the most recent probe counts:
//!
//! - a reply to an older probe is ignored
//! - a probe still unanswered when the next one is due marks the latency
//!   unknown (`None`) until a fresh reply arrives
//!
//! Timestamps are milliseconds since the Unix epoch, so probes must not be
//! sent faster than once per millisecond.

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use chrono::Utc;
use tracing::{debug, trace};

use crate::protocol::OutboundMessage;

// ============================================================================
// Constants
// ============================================================================

/// Default probe interval.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(10);

/// Wall-clock milliseconds since the Unix epoch.
#[inline]
#[must_use]
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

// ============================================================================
// HeartbeatMonitor
// ============================================================================

/// Tracks the outstanding probe and the last measured round trip.
#[derive(Debug, Clone)]
pub struct HeartbeatMonitor {
    interval: Duration,
    outstanding: Option<i64>,
    latency: Option<Duration>,
}

impl Default for HeartbeatMonitor {
    fn default() -> Self {
        Self::new(DEFAULT_HEARTBEAT_INTERVAL)
    }
}

impl HeartbeatMonitor {
    /// Creates a monitor probing every `interval`.
    #[must_use]
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            outstanding: None,
            latency: None,
        }
    }

    /// Probe interval.
    #[inline]
    #[must_use]
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Last measured round trip, `None` when unknown or stale.
    #[inline]
    #[must_use]
    pub fn latency(&self) -> Option<Duration> {
        self.latency
    }

    /// Send time of the probe awaiting a reply.
    #[inline]
    #[must_use]
    pub fn outstanding(&self) -> Option<i64> {
        self.outstanding
    }

    /// Session opened: forget the previous session and probe immediately.
    pub fn on_open(&mut self, now_ms: i64) -> OutboundMessage {
        self.latency = None;
        self.outstanding = Some(now_ms);
        trace!(t0 = now_ms, "Initial heartbeat probe");
        OutboundMessage::Ping { t0: now_ms }
    }

    /// Interval elapsed: issue the next probe.
    ///
    /// Returns the probe and whether the latency just became unknown.
    pub fn on_tick(&mut self, now_ms: i64) -> (OutboundMessage, bool) {
        let went_stale = self.outstanding.is_some() && self.latency.is_some();
        if self.outstanding.is_some() {
            debug!(missed_t0 = self.outstanding, "Heartbeat reply missed");
            self.latency = None;
        }
        self.outstanding = Some(now_ms);
        (OutboundMessage::Ping { t0: now_ms }, went_stale)
    }

    /// Reply received. Returns the new latency if it answered the current
    /// probe.
    pub fn on_reply(&mut self, echoed_ms: i64, now_ms: i64) -> Option<Duration> {
        if self.outstanding != Some(echoed_ms) {
            trace!(echoed_ms, outstanding = self.outstanding, "Ignoring stale heartbeat reply");
            return None;
        }

        let elapsed = u64::try_from(now_ms.saturating_sub(echoed_ms)).unwrap_or(0);
        let latency = Duration::from_millis(elapsed);
        self.outstanding = None;
        self.latency = Some(latency);
        trace!(latency_ms = elapsed, "Heartbeat reply");
        Some(latency)
    }

    /// Session closed: nothing outstanding, latency unknown.
    pub fn on_close(&mut self) {
        self.outstanding = None;
        self.latency = None;
    }
}

// ============================================================================
// Tests
// ============================================================================
