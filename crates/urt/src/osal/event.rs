// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Thread events, event sources and listeners.
//!
//! Every thread owns a [`ThreadEvents`] object holding a bit mask of pending
//! events. Event sources ([`EventSource`]) carry additional flags to each
//! registered [`EventListener`] and signal the listener's mask on the
//! listening thread.
//!
//! ```text
//!  EventSource ──broadcast(flags)──► listener.flags |= flags
//!                                    listener.thread.signal(listener.mask)
//!
//!  ThreadEvents::wait(mask, Any)  ──► returns pending & mask, clears them
//! ```
//!
//! Waiting follows the classic RTOS semantics:
//! - [`WaitMode::One`]: returns (and clears) the lowest pending bit of the mask
//! - [`WaitMode::Any`]: returns (and clears) all pending bits of the mask
//! - [`WaitMode::All`]: blocks until every bit of the mask is pending

use parking_lot::{Condvar, Mutex};
use std::cell::RefCell;
use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Bit mask of thread events.
pub type EventMask = u32;

/// Flags transported by an event source to its listeners.
pub type EventFlags = u32;

/// Mask matching every event.
pub const EVENTMASK_ALL: EventMask = !0;

/// Event bit with the highest priority (bit 0).
pub const EVENTMASK_MAXPRIO: EventMask = 1;

/// Wait semantics of [`ThreadEvents::wait`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitMode {
    /// Wake on a single event (lowest bit first).
    One,
    /// Wake on any event of the mask.
    Any,
    /// Wake only when all events of the mask are pending.
    All,
}

/// Termination request of a thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// Graceful termination.
    Request,
    /// Immediate termination after an emergency.
    Kill,
}

const TERMINATE_NONE: u8 = 0;
const TERMINATE_REQUEST: u8 = 1;
const TERMINATE_KILL: u8 = 2;

/// Per-thread pending events and termination state.
#[derive(Debug)]
pub struct ThreadEvents {
    name: String,
    pending: Mutex<EventMask>,
    condvar: Condvar,
    terminate: AtomicU8,
}

thread_local! {
    static CURRENT: RefCell<Option<Arc<ThreadEvents>>> = const { RefCell::new(None) };
}

impl ThreadEvents {
    /// Creates the event object for a (not yet running) thread.
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            pending: Mutex::new(0),
            condvar: Condvar::new(),
            terminate: AtomicU8::new(TERMINATE_NONE),
        })
    }

    /// Event object of the calling thread.
    ///
    /// Threads not started by µRT get one lazily on first use.
    pub fn current() -> Arc<Self> {
        CURRENT.with(|current| {
            let mut current = current.borrow_mut();
            if let Some(events) = current.as_ref() {
                return Arc::clone(events);
            }
            let name = std::thread::current()
                .name()
                .unwrap_or("unnamed")
                .to_string();
            let events = ThreadEvents::new(name);
            *current = Some(Arc::clone(&events));
            events
        })
    }

    /// Binds `self` as the event object of the calling thread.
    pub(crate) fn bind_current(self: &Arc<Self>) {
        CURRENT.with(|current| *current.borrow_mut() = Some(Arc::clone(self)));
    }

    /// Thread name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Marks `mask` as pending and wakes the thread if it waits for it.
    pub fn signal(&self, mask: EventMask) {
        if mask == 0 {
            return;
        }
        let mut pending = self.pending.lock();
        *pending |= mask;
        self.condvar.notify_all();
    }

    /// Currently pending events (without consuming them).
    pub fn pending(&self) -> EventMask {
        *self.pending.lock()
    }

    /// Consumes pending events of `mask` without waiting.
    pub fn clear(&self, mask: EventMask) -> EventMask {
        let mut pending = self.pending.lock();
        let cleared = *pending & mask;
        *pending &= !mask;
        cleared
    }

    /// Waits for events of `mask` and consumes them.
    ///
    /// Returns the consumed events, or `0` if `timeout` elapsed first.
    pub fn wait(&self, mask: EventMask, mode: WaitMode, timeout: Option<Duration>) -> EventMask {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut pending = self.pending.lock();
        loop {
            let matched = *pending & mask;
            let ready = match mode {
                WaitMode::One | WaitMode::Any => matched != 0,
                WaitMode::All => matched == mask,
            };
            if ready {
                let taken = match mode {
                    WaitMode::One => matched & matched.wrapping_neg(),
                    WaitMode::Any | WaitMode::All => matched,
                };
                *pending &= !taken;
                return taken;
            }
            match deadline {
                Some(deadline) => {
                    if self.condvar.wait_until(&mut pending, deadline).timed_out() {
                        // Re-check once: a signal may have raced with the timeout.
                        let matched = *pending & mask;
                        let ready = match mode {
                            WaitMode::One | WaitMode::Any => matched != 0,
                            WaitMode::All => matched == mask,
                        };
                        if !ready {
                            return 0;
                        }
                    }
                }
                None => self.condvar.wait(&mut pending),
            }
        }
    }

    /// Requests termination of the thread.
    ///
    /// A kill request is never downgraded to a graceful one.
    pub fn request_termination(&self, how: Termination) {
        let value = match how {
            Termination::Request => TERMINATE_REQUEST,
            Termination::Kill => TERMINATE_KILL,
        };
        self.terminate.fetch_max(value, Ordering::AcqRel);
    }

    /// Pending termination request, if any.
    pub fn termination(&self) -> Option<Termination> {
        match self.terminate.load(Ordering::Acquire) {
            TERMINATE_REQUEST => Some(Termination::Request),
            TERMINATE_KILL => Some(Termination::Kill),
            _ => None,
        }
    }

    /// Whether the thread was asked to terminate.
    #[inline]
    pub fn should_terminate(&self) -> bool {
        self.terminate.load(Ordering::Acquire) != TERMINATE_NONE
    }
}

#[derive(Debug)]
struct ListenerSlot {
    thread: Arc<ThreadEvents>,
    mask: EventMask,
    flags: AtomicU32,
}

/// Source of events that listeners register to.
///
/// Cloning yields another handle to the same source.
#[derive(Debug, Clone, Default)]
pub struct EventSource {
    listeners: Arc<Mutex<Vec<Arc<ListenerSlot>>>>,
}

impl EventSource {
    /// Creates a source without listeners.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `listener` for the calling thread, signalled with `mask`.
    ///
    /// A listener that is already registered is moved to this source.
    pub fn register(&self, listener: &mut EventListener, mask: EventMask) {
        self.register_thread(listener, ThreadEvents::current(), mask);
    }

    /// Registers `listener` for an explicit thread.
    pub fn register_thread(
        &self,
        listener: &mut EventListener,
        thread: Arc<ThreadEvents>,
        mask: EventMask,
    ) {
        if let Some(source) = listener.source.take() {
            source.remove(listener);
        }
        let slot = Arc::new(ListenerSlot {
            thread,
            mask,
            flags: AtomicU32::new(0),
        });
        self.listeners.lock().push(Arc::clone(&slot));
        listener.slot = Some(slot);
        listener.source = Some(self.clone());
    }

    /// Removes `listener` from this source. Unknown listeners are ignored.
    pub fn unregister(&self, listener: &mut EventListener) {
        self.remove(listener);
        listener.slot = None;
        listener.source = None;
    }

    fn remove(&self, listener: &EventListener) {
        if let Some(slot) = listener.slot.as_ref() {
            self.listeners.lock().retain(|s| !Arc::ptr_eq(s, slot));
        }
    }

    /// ORs `flags` into every listener and signals the listening threads.
    pub fn broadcast(&self, flags: EventFlags) {
        let listeners = self.listeners.lock();
        for slot in listeners.iter() {
            slot.flags.fetch_or(flags, Ordering::AcqRel);
            slot.thread.signal(slot.mask);
        }
    }

    /// Number of registered listeners.
    pub fn listener_count(&self) -> usize {
        self.listeners.lock().len()
    }
}

/// Listener of an [`EventSource`].
#[derive(Debug, Default)]
pub struct EventListener {
    slot: Option<Arc<ListenerSlot>>,
    source: Option<EventSource>,
}

impl EventListener {
    /// Creates an unregistered listener.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the listener is registered to a source.
    pub fn is_registered(&self) -> bool {
        self.slot.is_some()
    }

    /// Mask signalled on broadcasts (0 if unregistered).
    pub fn mask(&self) -> EventMask {
        self.slot.as_ref().map_or(0, |slot| slot.mask)
    }

    /// Thread signalled on broadcasts.
    pub fn thread(&self) -> Option<&Arc<ThreadEvents>> {
        self.slot.as_ref().map(|slot| &slot.thread)
    }

    /// Current flags without clearing them.
    pub fn flags(&self) -> EventFlags {
        self.slot
            .as_ref()
            .map_or(0, |slot| slot.flags.load(Ordering::Acquire))
    }

    /// Returns the flags of `mask` and clears them.
    pub fn clear_flags(&self, mask: EventFlags) -> EventFlags {
        self.slot
            .as_ref()
            .map_or(0, |slot| slot.flags.fetch_and(!mask, Ordering::AcqRel) & mask)
    }
}

impl Drop for EventListener {
    fn drop(&mut self) {
        if let Some(source) = self.source.take() {
            source.remove(self);
        }
    }
}
