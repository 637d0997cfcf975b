// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Operating system abstraction layer.
//!
//! Host implementation of the scheduling substrate µRT runs on, built from
//! std threads and `parking_lot` primitives:
//!
//! - [`Time`]: monotonic microsecond clock
//! - [`ThreadEvents`]: per-thread event masks and termination requests
//! - [`EventSource`] / [`EventListener`]: flag broadcasting
//! - [`Timer`]: one-shot callbacks

mod event;
mod time;
mod timer;

pub use event::{
    EventFlags, EventListener, EventMask, EventSource, Termination, ThreadEvents, WaitMode,
    EVENTMASK_ALL, EVENTMASK_MAXPRIO,
};
pub use time::Time;
pub use timer::Timer;
