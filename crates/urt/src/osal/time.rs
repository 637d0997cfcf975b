// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Monotonic system time in microseconds.

use crate::primitives::Delay;
use std::sync::OnceLock;
use std::time::{Duration, Instant};

static EPOCH: OnceLock<Instant> = OnceLock::new();

fn epoch() -> Instant {
    *EPOCH.get_or_init(Instant::now)
}

/// Absolute point in time, microseconds since the process-wide epoch.
///
/// `Time::ZERO` is never returned by [`Time::now`], so it can mark
/// "never happened" in bookkeeping fields.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Time(u64);

impl Time {
    /// The epoch itself.
    pub const ZERO: Time = Time(0);

    /// Current monotonic time.
    #[inline]
    pub fn now() -> Self {
        let micros = epoch().elapsed().as_micros();
        Time((micros as u64).saturating_add(1))
    }

    /// Time from raw microseconds.
    #[inline]
    pub const fn from_micros(micros: u64) -> Self {
        Time(micros)
    }

    /// Raw microseconds since the epoch.
    #[inline]
    pub const fn as_micros(self) -> u64 {
        self.0
    }

    /// `self + delay`, saturating.
    #[inline]
    pub const fn add(self, delay: Delay) -> Self {
        Time(self.0.saturating_add(delay as u64))
    }

    /// Delay elapsed from `earlier` to `self`; zero if `earlier` is later.
    #[inline]
    pub fn delay_since(self, earlier: Time) -> Delay {
        let diff = self.0.saturating_sub(earlier.0);
        Delay::try_from(diff).unwrap_or(Delay::MAX)
    }

    /// The next representable point in time.
    #[inline]
    pub(crate) const fn successor(self) -> Self {
        Time(self.0.saturating_add(1))
    }

    pub(crate) fn to_instant(self) -> Instant {
        epoch() + Duration::from_micros(self.0)
    }
}
