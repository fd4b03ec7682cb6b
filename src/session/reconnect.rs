//! Reconnection policy.
//!
//! [`ReconnectionController`] is a pure state machine: it never touches the
//! network or a clock. The supervisor feeds it session lifecycle transitions
//! and acts on the [`ReconnectAction`] it returns (construct a session, arm a
//! timer, or nothing).
//!
//! # Delay
//!
//! For the n-th consecutive failure (n starting at 1):
//!
//! ```text
//! delay = min(max_delay, base_delay * 2^min(n, max_exponent)) + jitter
//! jitter ∈ [0, max_jitter]
//! ```
//!
//! With the defaults (500 ms, exponent cap 6, 32 s, 300 ms) the first retry
//! waits about one second and the ceiling is 32.3 seconds.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::time::Duration;

use rand::Rng;
use tracing::{debug, trace};

use crate::transport::ConnectionState;

// ============================================================================
// Constants
// ============================================================================

/// Default base delay.
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(500);

/// Default delay ceiling (before jitter).
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(32);

/// Default cap on the exponent.
pub const DEFAULT_MAX_EXPONENT: u32 = 6;

/// Default upper bound of the random jitter.
pub const DEFAULT_MAX_JITTER: Duration = Duration::from_millis(300);

// ============================================================================
// BackoffPolicy
// ============================================================================

/// Exponential backoff parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    /// Delay unit multiplied by `2^exponent`.
    pub base_delay: Duration,
    /// Ceiling applied before jitter.
    pub max_delay: Duration,
    /// Exponent cap; the attempt counter itself keeps counting.
    pub max_exponent: u32,
    /// Upper bound of the random jitter added to every delay.
    pub max_jitter: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            max_exponent: DEFAULT_MAX_EXPONENT,
            max_jitter: DEFAULT_MAX_JITTER,
        }
    }
}

impl BackoffPolicy {
    /// Deterministic part of the delay for `attempt` (1-based).
    #[must_use]
    pub fn base_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.min(self.max_exponent).min(31);
        self.base_delay
            .saturating_mul(1u32 << exponent)
            .min(self.max_delay)
    }

    /// Full delay for `attempt` with `jitter` added (clamped to `max_jitter`).
    #[must_use]
    pub fn delay_for(&self, attempt: u32, jitter: Duration) -> Duration {
        self.base_for(attempt) + jitter.min(self.max_jitter)
    }

    /// Largest delay this policy can produce.
    #[must_use]
    pub fn ceiling(&self) -> Duration {
        self.max_delay + self.max_jitter
    }
}

// ============================================================================
// Jitter
// ============================================================================

/// Source of the random jitter term.
pub trait JitterSource: Send {
    /// Returns a value in `[0, max]`.
    fn jitter(&mut self, max: Duration) -> Duration;
}

/// Uniform jitter from the thread-local RNG.
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomJitter;

impl JitterSource for RandomJitter {
    fn jitter(&mut self, max: Duration) -> Duration {
        let max_ms = u64::try_from(max.as_millis()).unwrap_or(u64::MAX);
        if max_ms == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::rng().random_range(0..=max_ms))
    }
}

/// No jitter at all. Useful for deterministic schedules.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoJitter;

impl JitterSource for NoJitter {
    fn jitter(&mut self, _max: Duration) -> Duration {
        Duration::ZERO
    }
}

// ============================================================================
// BackoffState
// ============================================================================

/// Observable backoff progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BackoffState {
    /// Consecutive failed attempts since the last successful open.
    pub attempt: u32,
    /// Delay scheduled for the pending retry, or the base delay when idle.
    pub next_delay: Duration,
}

// ============================================================================
// ReconnectAction
// ============================================================================

/// What the supervisor should do after a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectAction {
    /// Construct a new session now.
    Connect,
    /// Arm a timer; call [`ReconnectionController::on_timer`] when it fires.
    Schedule(Duration),
    /// Nothing to do.
    Idle,
}

// ============================================================================
// ReconnectionController
// ============================================================================

/// Decides when to open a new session after one is lost.
pub struct ReconnectionController {
    policy: BackoffPolicy,
    state: ConnectionState,
    backoff: BackoffState,
    stopped: bool,
    jitter: Box<dyn JitterSource>,
}

impl ReconnectionController {
    /// Creates a controller with random jitter.
    #[must_use]
    pub fn new(policy: BackoffPolicy) -> Self {
        Self::with_jitter(policy, Box::new(RandomJitter))
    }

    /// Creates a controller with a custom jitter source.
    #[must_use]
    pub fn with_jitter(policy: BackoffPolicy, jitter: Box<dyn JitterSource>) -> Self {
        Self {
            policy,
            state: ConnectionState::Disconnected,
            backoff: BackoffState {
                attempt: 0,
                next_delay: policy.base_delay,
            },
            stopped: false,
            jitter,
        }
    }

    /// Current connection state as tracked by the controller.
    #[inline]
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Current backoff progress.
    #[inline]
    #[must_use]
    pub fn backoff(&self) -> BackoffState {
        self.backoff
    }

    /// Policy in use.
    #[inline]
    #[must_use]
    pub fn policy(&self) -> &BackoffPolicy {
        &self.policy
    }

    /// Returns `true` once [`stop`](Self::stop) was called.
    #[inline]
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    /// First connection. Only acts from `Disconnected`.
    pub fn start(&mut self) -> ReconnectAction {
        if self.stopped || self.state != ConnectionState::Disconnected {
            return ReconnectAction::Idle;
        }
        self.state = ConnectionState::Connecting;
        ReconnectAction::Connect
    }

    /// Session opened: the failure streak is over.
    pub fn on_open(&mut self) {
        if self.stopped {
            return;
        }
        if self.backoff.attempt > 0 {
            debug!(attempts = self.backoff.attempt, "Reconnected, backoff reset");
        }
        self.state = ConnectionState::Open;
        self.backoff = BackoffState {
            attempt: 0,
            next_delay: self.policy.base_delay,
        };
    }

    /// Session closed (failed to open, or dropped after opening).
    pub fn on_close(&mut self) -> ReconnectAction {
        if self.stopped {
            self.state = ConnectionState::Disconnected;
            return ReconnectAction::Idle;
        }

        let attempt = self.backoff.attempt.saturating_add(1);
        let jitter = self.jitter.jitter(self.policy.max_jitter);
        let delay = self.policy.delay_for(attempt, jitter);

        self.backoff = BackoffState {
            attempt,
            next_delay: delay,
        };
        self.state = ConnectionState::Reconnecting;

        debug!(attempt, ?delay, "Reconnect scheduled");
        ReconnectAction::Schedule(delay)
    }

    /// Backoff timer fired.
    pub fn on_timer(&mut self) -> ReconnectAction {
        if self.stopped || self.state != ConnectionState::Reconnecting {
            trace!(state = %self.state, "Ignoring stale backoff timer");
            return ReconnectAction::Idle;
        }
        self.state = ConnectionState::Connecting;
        ReconnectAction::Connect
    }

    /// Teardown: no further connection attempts, ever.
    pub fn stop(&mut self) {
        self.stopped = true;
        self.state = ConnectionState::Disconnected;
    }
}

impl fmt::Debug for ReconnectionController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReconnectionController")
            .field("policy", &self.policy)
            .field("state", &self.state)
            .field("backoff", &self.backoff)
            .field("stopped", &self.stopped)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use proptest::prelude::*;

    /// Always returns the maximum jitter.
    struct MaxJitter;

    impl JitterSource for MaxJitter {
        fn jitter(&mut self, max: Duration) -> Duration {
            max
        }
    }

    fn deterministic() -> ReconnectionController {
        ReconnectionController::with_jitter(BackoffPolicy::default(), Box::new(NoJitter))
    }

    #[test]
    fn test_first_retry_is_about_one_second() {
        let mut controller = deterministic();
        assert_eq!(controller.start(), ReconnectAction::Connect);
        assert_eq!(
            controller.on_close(),
            ReconnectAction::Schedule(Duration::from_millis(1000))
        );
        assert_eq!(controller.state(), ConnectionState::Reconnecting);
    }

    #[test]
    fn test_three_failures_strictly_increase() {
        let mut controller = ReconnectionController::new(BackoffPolicy::default());
        controller.start();

        let mut delays = Vec::new();
        for _ in 0..3 {
            match controller.on_close() {
                ReconnectAction::Schedule(delay) => delays.push(delay),
                other => panic!("unexpected {other:?}"),
            }
            assert_eq!(controller.on_timer(), ReconnectAction::Connect);
        }

        assert!(delays[0] < delays[1] && delays[1] < delays[2]);
        assert!(delays.iter().all(|d| *d <= BackoffPolicy::default().ceiling()));
    }

    #[test]
    fn test_delay_is_capped() {
        let mut controller =
            ReconnectionController::with_jitter(BackoffPolicy::default(), Box::new(MaxJitter));
        controller.start();

        let mut last = Duration::ZERO;
        for _ in 0..20 {
            let ReconnectAction::Schedule(delay) = controller.on_close() else {
                panic!("expected schedule");
            };
            assert!(delay >= last);
            assert!(delay <= Duration::from_millis(32_300));
            last = delay;
            controller.on_timer();
        }
        assert_eq!(last, Duration::from_millis(32_300));
        assert_eq!(controller.backoff().attempt, 20);
    }

    #[test]
    fn test_open_resets_backoff() {
        let mut controller = deterministic();
        controller.start();
        controller.on_close();
        controller.on_timer();
        controller.on_close();
        assert_eq!(controller.backoff().attempt, 2);

        controller.on_timer();
        controller.on_open();
        assert_eq!(controller.backoff().attempt, 0);
        assert_eq!(controller.backoff().next_delay, DEFAULT_BASE_DELAY);

        assert_eq!(
            controller.on_close(),
            ReconnectAction::Schedule(Duration::from_millis(1000))
        );
    }

    #[test]
    fn test_stop_suppresses_everything() {
        let mut controller = deterministic();
        controller.start();
        controller.on_close();
        controller.stop();

        assert_eq!(controller.on_timer(), ReconnectAction::Idle);
        assert_eq!(controller.on_close(), ReconnectAction::Idle);
        assert_eq!(controller.start(), ReconnectAction::Idle);
        assert_eq!(controller.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_stale_timer_is_ignored() {
        let mut controller = deterministic();
        controller.start();
        controller.on_open();
        assert_eq!(controller.on_timer(), ReconnectAction::Idle);
        assert_eq!(controller.state(), ConnectionState::Open);
    }

    #[test]
    fn test_random_jitter_in_range() {
        let mut jitter = RandomJitter;
        for _ in 0..100 {
            assert!(jitter.jitter(Duration::from_millis(300)) <= Duration::from_millis(300));
        }
        assert_eq!(jitter.jitter(Duration::ZERO), Duration::ZERO);
    }

    proptest! {
        #[test]
        fn prop_delays_non_decreasing_without_jitter(failures in 1usize..40) {
            let mut controller = deterministic();
            controller.start();
            let mut last = Duration::ZERO;
            for _ in 0..failures {
                if let ReconnectAction::Schedule(delay) = controller.on_close() {
                    prop_assert!(delay >= last);
                    prop_assert!(delay <= DEFAULT_MAX_DELAY);
                    last = delay;
                }
                controller.on_timer();
            }
        }

        #[test]
        fn prop_delay_bounded(attempt in 0u32..u32::MAX, jitter_ms in 0u64..10_000) {
            let policy = BackoffPolicy::default();
            let delay = policy.delay_for(attempt, Duration::from_millis(jitter_ms));
            prop_assert!(delay <= policy.ceiling());
        }
    }
}
