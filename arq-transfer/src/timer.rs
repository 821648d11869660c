//! Retransmission timers and RTO policy.
//!
//! Reliable delivery requires that unacknowledged packets are re-sent if no
//! ACK arrives within a bounded time.  This module provides:
//! - [`RtoPolicy`] — where the retransmission timeout comes from.  Only a
//!   fixed RTO ([`FixedRto`]) ships; an estimator (e.g. RFC 6298 SRTT/RTTVAR)
//!   can be dropped in later without touching the state machines.
//! - [`RetransmitTimer`] — a deadline that is armed, restarted, cancelled and
//!   polled against a caller-supplied [`Instant`].
//!
//! Go-Back-N owns exactly one [`RetransmitTimer`] (for the oldest unacked
//! packet); Selective Repeat owns one per in-flight record.  Neither spawns
//! tasks: the transfer loop checks [`RetransmitTimer::is_expired`] on every
//! iteration, so timers are only as precise as the loop's poll bound.

use std::time::{Duration, Instant};

/// Source of the retransmission timeout.
pub trait RtoPolicy {
    /// Timeout to use for the next (re)transmission.
    fn rto(&self) -> Duration;

    /// Round-trip sample from a packet acknowledged on its first transmission.
    fn on_rtt_sample(&mut self, _sample: Duration) {}

    /// A retransmission timer fired.
    fn on_timeout(&mut self) {}
}

/// Constant RTO supplied per transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedRto(pub Duration);

impl RtoPolicy for FixedRto {
    fn rto(&self) -> Duration {
        self.0
    }
}

/// A single logical retransmission timer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetransmitTimer {
    deadline: Option<Instant>,
}

impl RetransmitTimer {
    /// A timer that is not running.
    pub fn new() -> Self {
        Self { deadline: None }
    }

    /// Start (or restart) the timer to fire `rto` after `now`.
    pub fn arm(&mut self, now: Instant, rto: Duration) {
        self.deadline = Some(now + rto);
    }

    /// Start the timer only if it is not already running.
    pub fn arm_if_idle(&mut self, now: Instant, rto: Duration) {
        if self.deadline.is_none() {
            self.arm(now, rto);
        }
    }

    pub fn cancel(&mut self) {
        self.deadline = None;
    }

    pub fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }

    /// `true` when the timer is running and its deadline has passed.
    pub fn is_expired(&self, now: Instant) -> bool {
        self.deadline.is_some_and(|d| now >= d)
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }
}

/// Earliest of two optional deadlines.
pub fn earliest(a: Option<Instant>, b: Option<Instant>) -> Option<Instant> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, None) => a,
        (None, b) => b,
    }
}
