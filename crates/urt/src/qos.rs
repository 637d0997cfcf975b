// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Real-time QoS bookkeeping shared by subscribers and requests.
//!
//! - **Deadline**: a latency larger than the deadline offset is a violation.
//!   An offset of `0` means "no deadline".
//! - **Jitter**: latencies are tracked in a window `[min, max]` whose width
//!   must not exceed the maximum jitter. The window only grows with latencies
//!   that keep it valid; anything outside the window is a violation.
//!   A maximum jitter of `0` means "no jitter constraint".
//!
//! ```text
//!   min ──────────── max
//!    |<- max_jitter ->|      lat outside [min, max] after tracking => violation
//! ```

use crate::primitives::{Delay, ProfilingCounter, Status, DELAY_INFINITE};

/// Recovery callback of an HRT subscriber or request, called with the
/// violation code.
pub type Recovery = Box<dyn Fn(Status) + Send + Sync>;

/// Whether `latency` violates the deadline offset `deadline`.
#[inline]
pub(crate) fn deadline_violated(deadline: Delay, latency: Delay) -> bool {
    deadline != 0 && latency > deadline
}

/// Sliding latency window for jitter checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JitterWindow {
    max_jitter: Delay,
    min_latency: Delay,
    max_latency: Delay,
}

impl JitterWindow {
    /// Empty window for the given maximum jitter.
    pub const fn new(max_jitter: Delay) -> Self {
        Self {
            max_jitter,
            min_latency: DELAY_INFINITE,
            max_latency: 0,
        }
    }

    /// Maximum allowed jitter (0 = unconstrained).
    pub const fn max_jitter(&self) -> Delay {
        self.max_jitter
    }

    /// Smallest tracked latency, if any was tracked.
    pub fn min_latency(&self) -> Option<Delay> {
        self.is_initialized().then_some(self.min_latency)
    }

    /// Largest tracked latency, if any was tracked.
    pub fn max_latency(&self) -> Option<Delay> {
        self.is_initialized().then_some(self.max_latency)
    }

    #[inline]
    fn is_initialized(&self) -> bool {
        self.min_latency <= self.max_latency
    }

    /// Tracks `latency` and reports whether it violates the jitter constraint.
    pub fn track(&mut self, latency: Delay) -> bool {
        if self.max_jitter == 0 {
            return false;
        }
        if !self.is_initialized()
            || (latency < self.min_latency && self.max_latency - latency <= self.max_jitter)
        {
            self.min_latency = latency;
        }
        if !self.is_initialized()
            || (latency > self.max_latency && latency - self.min_latency <= self.max_jitter)
        {
            self.max_latency = latency;
        }
        latency < self.min_latency || latency > self.max_latency
    }

    /// Whether `latency` would keep the window valid (without tracking it).
    pub fn admits(&self, latency: Delay) -> bool {
        if self.max_jitter == 0 || !self.is_initialized() {
            return true;
        }
        let above = latency > self.min_latency && latency - self.min_latency > self.max_jitter;
        let below = latency < self.max_latency && self.max_latency - latency > self.max_jitter;
        !(above || below)
    }

    /// Delay after origin at which a not yet consumed message (or unanswered
    /// request) becomes a violation, and the kind of that violation.
    ///
    /// Returns `None` when neither deadline nor jitter constrain the delay.
    pub fn critical_delay(&self, deadline: Delay) -> Option<(Delay, Status)> {
        let jitter_bound = (self.max_jitter != 0 && self.is_initialized())
            .then(|| self.min_latency.saturating_add(self.max_jitter));
        match (deadline, jitter_bound) {
            (0, None) => None,
            (0, Some(bound)) => Some((bound, Status::JitterViolation)),
            (deadline, Some(bound)) if bound < deadline => Some((bound, Status::JitterViolation)),
            (deadline, _) => Some((deadline, Status::DeadlineViolation)),
        }
    }
}

/// Latency statistics collected with `profiling` enabled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LatencyProfile {
    /// Smallest observed latency.
    pub min: Delay,
    /// Largest observed latency.
    pub max: Delay,
    /// Sum of all observed latencies.
    pub sum: u64,
    /// Number of observed latencies.
    pub count: ProfilingCounter,
}

impl LatencyProfile {
    pub(crate) fn track(&mut self, latency: Delay) {
        if self.count == 0 || latency < self.min {
            self.min = latency;
        }
        if self.count == 0 || latency > self.max {
            self.max = latency;
        }
        self.sum = self.sum.saturating_add(latency as u64);
        self.count += 1;
    }

    /// Mean latency, if any was observed.
    pub fn mean(&self) -> Option<Delay> {
        (self.count > 0).then(|| (self.sum / self.count) as Delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deadline_zero_is_unconstrained() {
        assert!(!deadline_violated(0, DELAY_INFINITE));
        assert!(deadline_violated(10, 11));
        assert!(!deadline_violated(10, 10));
    }

    #[test]
    fn test_jitter_window_grows_within_bounds() {
        let mut window = JitterWindow::new(10);
        assert!(!window.track(100));
        assert!(!window.track(105));
        assert!(!window.track(95));
        assert_eq!(window.min_latency(), Some(95));
        assert_eq!(window.max_latency(), Some(105));
        // 95..=105 is full width; 120 is outside.
        assert!(window.track(120));
        assert_eq!(window.max_latency(), Some(105));
    }

    #[test]
    fn test_unconstrained_jitter_never_violates() {
        let mut window = JitterWindow::new(0);
        assert!(!window.track(1));
        assert!(!window.track(1_000_000));
        assert!(window.admits(5));
    }

    #[test]
    fn test_admits_matches_track() {
        let mut window = JitterWindow::new(10);
        window.track(50);
        assert!(window.admits(58));
        assert!(!window.admits(61));
        assert!(!window.admits(39));
    }

    #[test]
    fn test_critical_delay_picks_tighter_bound() {
        let mut window = JitterWindow::new(10);
        assert_eq!(window.critical_delay(0), None);
        assert_eq!(window.critical_delay(50), Some((50, Status::DeadlineViolation)));
        window.track(20);
        assert_eq!(window.critical_delay(50), Some((30, Status::JitterViolation)));
        assert_eq!(window.critical_delay(25), Some((25, Status::DeadlineViolation)));
        assert_eq!(window.critical_delay(0), Some((30, Status::JitterViolation)));
    }

    #[test]
    fn test_latency_profile() {
        let mut profile = LatencyProfile::default();
        assert_eq!(profile.mean(), None);
        profile.track(10);
        profile.track(30);
        assert_eq!(profile.min, 10);
        assert_eq!(profile.max, 30);
        assert_eq!(profile.mean(), Some(20));
    }
}
