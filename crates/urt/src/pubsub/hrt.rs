// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Hard real-time subscribers.
//!
//! HRT subscribers pin every message they have not fetched yet: the topic
//! refuses to reuse such a slot. Timing constraints are monitored actively:
//!
//! - a per-subscriber timer fires when the oldest unread message exceeds the
//!   deadline (or the jitter bound, whichever is tighter);
//! - a per-topic timer fires when the most rate-critical subscriber did not
//!   see new information within its expected rate.
//!
//! On expiry the subscriber's recovery callback runs once per violation, or,
//! without a recovery callback, the core performs an emergency shutdown.

use super::subscriber::{BaseSubscriber, Fetched, Subscriber, SubscriberProfile};
use super::topic::{Topic, TopicState};
use crate::config;
use crate::core::Core;
use crate::osal::{EventListener, EventMask, Time, Timer};
use crate::primitives::{Delay, Result, RtClass, Status};
use crate::qos::{JitterWindow, Recovery};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

/// Timing constraints of an HRT subscriber; `0` disables a constraint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HrtConstraints {
    /// Maximum latency of a message.
    pub deadline: Delay,
    /// Maximum jitter of latencies.
    pub jitter: Delay,
    /// Maximum interval between two new pieces of information.
    pub rate: Delay,
}

impl HrtConstraints {
    /// Drops constraints whose checks are disabled in this build.
    fn effective(self) -> Self {
        Self {
            deadline: if config::PUBSUB_QOS_DEADLINE_CHECKS { self.deadline } else { 0 },
            jitter: if config::PUBSUB_QOS_JITTER_CHECKS { self.jitter } else { 0 },
            rate: if config::PUBSUB_QOS_RATE_CHECKS { self.rate } else { 0 },
        }
    }

    /// Ordering key within a topic's HRT list; unconstrained sorts last.
    fn criticality(&self) -> Delay {
        let key = if config::PUBSUB_QOS_RATE_CHECKS {
            self.rate
        } else if config::PUBSUB_QOS_DEADLINE_CHECKS {
            self.deadline
        } else {
            self.jitter
        };
        if key == 0 {
            Delay::MAX
        } else {
            key
        }
    }
}

static NEXT_KEY: AtomicU64 = AtomicU64::new(1);

/// Violation handling shared between a subscriber and its timers.
pub(crate) struct HrtQos {
    timer: Timer,
    recovery: Option<Recovery>,
    violation: Mutex<Status>,
}

impl HrtQos {
    fn new(recovery: Option<Recovery>) -> Self {
        Self {
            timer: Timer::new(),
            recovery,
            violation: Mutex::new(Status::Ok),
        }
    }
}

/// An HRT subscriber's slot in its topic.
pub(crate) struct HrtEntry {
    key: u64,
    criticality: Delay,
    deadline: Delay,
    pub(crate) window: JitterWindow,
    rate: Delay,
    /// Message the deadline/jitter timer is armed for.
    pub(crate) timer_message: Option<usize>,
    qos: Arc<HrtQos>,
}

impl std::fmt::Debug for HrtEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HrtEntry")
            .field("key", &self.key)
            .field("deadline", &self.deadline)
            .field("window", &self.window)
            .field("rate", &self.rate)
            .field("timer_message", &self.timer_message)
            .finish_non_exhaustive()
    }
}

/// Reports a violation: recovery callback (once) or core emergency.
fn escalate(core: &Weak<Core>, qos: &HrtQos, reason: Status) {
    match &qos.recovery {
        None => {
            if let Some(core) = core.upgrade() {
                core.emergency(reason);
            }
        }
        Some(recovery) => {
            {
                let mut violation = qos.violation.lock();
                if !violation.is_ok() {
                    return;
                }
                *violation = reason;
            }
            log::warn!("[HrtSubscriber] {}, running recovery", reason);
            recovery(reason);
        }
    }
}

/// Arms the deadline/jitter timer of `entry` for a message from `origin`.
///
/// Returns false if the subscriber has no timing constraints. If the timer
/// cannot be armed the core performs an emergency shutdown.
pub(crate) fn arm_qos_timer(entry: &HrtEntry, origin: Time, core: &Weak<Core>) -> bool {
    let Some((delay, reason)) = entry.window.critical_delay(entry.deadline) else {
        return false;
    };
    let qos = Arc::downgrade(&entry.qos);
    let callback_core = core.clone();
    let armed = entry.qos.timer.set(origin.add(delay), move || {
        if let Some(qos) = qos.upgrade() {
            escalate(&callback_core, &qos, reason);
        }
    });
    if armed.is_err() {
        // Unsupervised constraint.
        if let Some(core) = core.upgrade() {
            core.emergency(reason);
        }
        return false;
    }
    true
}

/// Arms the topic's rate timer for the HRT entry at `position`.
///
/// Returns false if there is no such entry or it expects no rate. If the
/// timer cannot be armed the core performs an emergency shutdown.
pub(crate) fn arm_rate_timer(topic: &Topic, state: &TopicState, position: usize, origin: Time) -> bool {
    let Some(entry) = state.hrt.get(position).filter(|e| e.rate != 0) else {
        return false;
    };
    let key = entry.key;
    let weak = topic.weak().clone();
    let armed = topic.rate_timer().set(origin.add(entry.rate), move || {
        if let Some(topic) = weak.upgrade() {
            rate_expired(&topic, key);
        }
    });
    if armed.is_err() {
        if let Some(core) = topic.core().upgrade() {
            core.emergency(Status::RateViolation);
        }
        return false;
    }
    true
}

fn rate_expired(topic: &Topic, key: u64) {
    let state = topic.lock();
    let Some(position) = state.hrt.iter().position(|e| e.key == key) else {
        return;
    };
    let qos = Arc::clone(&state.hrt[position].qos);
    if qos.recovery.is_some() {
        if let Some(origin) = state.information_time(topic.buffer_order()) {
            arm_rate_timer(topic, &state, position + 1, origin);
        }
    }
    drop(state);
    escalate(topic.core(), &qos, Status::RateViolation);
}

/// Hard real-time subscriber.
#[derive(Debug, Default)]
pub struct HrtSubscriber {
    base: BaseSubscriber,
    key: u64,
    constraints: HrtConstraints,
    qos: Option<Arc<HrtQos>>,
}

impl std::fmt::Debug for HrtQos {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HrtQos")
            .field("timer", &self.timer)
            .field("recovery", &self.recovery.is_some())
            .field("violation", &*self.violation.lock())
            .finish()
    }
}

impl HrtSubscriber {
    /// Creates an unsubscribed HRT subscriber.
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribes to `topic` without recovery: violations cause an emergency.
    pub fn subscribe(&mut self, topic: &Arc<Topic>, mask: EventMask, constraints: HrtConstraints) -> Result<()> {
        self.attach(topic, mask, constraints, None)
    }

    /// Subscribes to `topic`; violations are reported to `recovery` once until
    /// acknowledged with [`HrtSubscriber::take_violation`].
    pub fn subscribe_with_recovery<F>(
        &mut self,
        topic: &Arc<Topic>,
        mask: EventMask,
        constraints: HrtConstraints,
        recovery: F,
    ) -> Result<()>
    where
        F: Fn(Status) + Send + Sync + 'static,
    {
        self.attach(topic, mask, constraints, Some(Box::new(recovery)))
    }

    fn attach(
        &mut self,
        topic: &Arc<Topic>,
        mask: EventMask,
        constraints: HrtConstraints,
        recovery: Option<Recovery>,
    ) -> Result<()> {
        debug_assert!(self.base.topic().is_none(), "subscriber already subscribed");
        let constraints = constraints.effective();
        let key = NEXT_KEY.fetch_add(1, Ordering::Relaxed);
        let qos = Arc::new(HrtQos::new(recovery));
        let entry = HrtEntry {
            key,
            criticality: constraints.criticality(),
            deadline: constraints.deadline,
            window: JitterWindow::new(constraints.jitter),
            rate: constraints.rate,
            timer_message: None,
            qos: Arc::clone(&qos),
        };

        self.base.attach(topic, mask, |state| {
            // Stable insertion: equal criticality keeps registration order.
            let position = state
                .hrt
                .iter()
                .position(|e| e.criticality > entry.criticality)
                .unwrap_or(state.hrt.len());
            state.hrt.insert(position, entry);
            state.num_hrt += 1;
        })?;

        self.key = key;
        self.constraints = constraints;
        self.qos = Some(qos);
        Ok(())
    }

    /// Effective constraints (disabled checks read as `0`).
    pub fn constraints(&self) -> HrtConstraints {
        self.constraints
    }

    /// Pending violation reported to the recovery callback; resets it so the
    /// next violation triggers recovery again.
    pub fn take_violation(&self) -> Status {
        self.qos
            .as_ref()
            .map_or(Status::Ok, |qos| std::mem::replace(&mut *qos.violation.lock(), Status::Ok))
    }

    /// Listener registered on the topic's event source.
    pub fn listener(&self) -> &EventListener {
        self.base.listener()
    }

    /// Profiling data (all zero without `profiling`).
    pub fn profile(&self) -> SubscriberProfile {
        self.base.profile()
    }

    /// Consumes every message from `start` through the latest one.
    ///
    /// Returns the latest index, whether any slot was released and the first
    /// jitter violation encountered.
    fn consume(
        &mut self,
        state: &mut TopicState,
        start: usize,
        payload: &mut [u8],
        now: Time,
    ) -> (usize, bool, Option<Status>) {
        let mut released = false;
        let mut violation = None;
        let chain: Vec<usize> = state.chain_to_latest(start).collect();
        let latest = state.latest;
        let Some(entry) = state.hrt.iter_mut().find(|e| e.key == self.key) else {
            return (latest, false, None);
        };
        for index in chain {
            let slot = &mut state.messages[index];
            debug_assert!(slot.hrt_consumers_left > 0, "HRT message consumed twice");
            slot.hrt_consumers_left = slot.hrt_consumers_left.saturating_sub(1);
            released |= slot.hrt_consumers_left == 0;
            let latency = now.delay_since(slot.time);
            if index == latest {
                self.base.record(index, slot, payload);
            }
            if config::PUBSUB_PROFILING {
                slot.profile.consumers_left = slot.profile.consumers_left.saturating_sub(1);
                self.base.count_received();
                self.base.track_latency(latency);
            }
            if entry.window.track(latency) && violation.is_none() {
                violation = Some(Status::JitterViolation);
            }
        }
        entry.qos.timer.reset();
        entry.timer_message = None;
        (latest, released, violation)
    }
}

impl Subscriber for HrtSubscriber {
    fn rt_class(&self) -> RtClass {
        RtClass::Hrt
    }

    fn topic(&self) -> Option<&Arc<Topic>> {
        self.base.topic()
    }

    fn fetch_next(&mut self, payload: &mut [u8]) -> Result<Fetched> {
        let Some(topic) = self.base.topic().cloned() else {
            debug_assert!(false, "fetch on unsubscribed subscriber");
            return Err(Status::FetchNoMessage);
        };
        let mut guard = topic.lock();
        let state = &mut *guard;
        let index = self.base.next_unread(state).ok_or(Status::FetchNoMessage)?;

        let slot = &mut state.messages[index];
        debug_assert!(slot.hrt_consumers_left > 0, "HRT message consumed twice");
        let size = self.base.record(index, slot, payload);
        let time = slot.time;
        slot.hrt_consumers_left = slot.hrt_consumers_left.saturating_sub(1);
        let released = slot.hrt_consumers_left == 0;
        let latency = Time::now().delay_since(time);
        if config::PUBSUB_PROFILING {
            slot.profile.consumers_left = slot.profile.consumers_left.saturating_sub(1);
            self.base.count_received();
            self.base.track_latency(latency);
        }

        let mut violation = None;
        if let Some(position) = state.hrt.iter().position(|e| e.key == self.key) {
            // Next message the deadline/jitter timer has to watch, if any.
            let rearm = (state.hrt[position].timer_message == Some(index)).then(|| {
                (index != state.latest).then(|| {
                    let start = state.messages[index].next;
                    match topic.buffer_order() {
                        config::BufferOrder::MessageTime => start,
                        config::BufferOrder::PublishTime => state
                            .chain_to_latest(start)
                            .min_by_key(|&candidate| state.messages[candidate].time)
                            .unwrap_or(start),
                    }
                })
            });
            let entry = &mut state.hrt[position];
            match rearm {
                Some(Some(critical)) => {
                    let origin = state.messages[critical].time;
                    entry.timer_message = arm_qos_timer(entry, origin, topic.core()).then_some(critical);
                }
                Some(None) => {
                    entry.qos.timer.reset();
                    entry.timer_message = None;
                }
                None => {}
            }
            if entry.window.track(latency) {
                violation = Some(Status::JitterViolation);
            }
        }
        drop(guard);

        if released {
            topic.release_hrt();
        }
        if let (Some(reason), Some(qos)) = (violation, self.qos.as_ref()) {
            escalate(topic.core(), qos, reason);
        }
        Ok(Fetched {
            size,
            time,
            latency,
            violation,
        })
    }

    fn fetch_latest(&mut self, payload: &mut [u8]) -> Result<Fetched> {
        let Some(topic) = self.base.topic().cloned() else {
            debug_assert!(false, "fetch on unsubscribed subscriber");
            return Err(Status::FetchNoMessage);
        };
        let mut guard = topic.lock();
        let state = &mut *guard;
        let start = self.base.next_unread(state).ok_or(Status::FetchNoMessage)?;
        let now = Time::now();
        let (latest, released, violation) = self.consume(state, start, payload, now);
        let size = state.messages[latest].size;
        let time = state.messages[latest].time;
        drop(guard);

        if released {
            topic.release_hrt();
        }
        if let (Some(reason), Some(qos)) = (violation, self.qos.as_ref()) {
            escalate(topic.core(), qos, reason);
        }
        Ok(Fetched {
            size,
            time,
            latency: now.delay_since(time),
            violation,
        })
    }

    fn unsubscribe(&mut self) -> bool {
        let Some(topic) = self.base.topic().cloned() else {
            return false;
        };
        let key = self.key;
        let mut released = false;
        self.base.detach(|state, pending| {
            if let Some(position) = state.hrt.iter().position(|e| e.key == key) {
                let entry = state.hrt.remove(position);
                entry.qos.timer.reset();
                if config::PUBSUB_QOS_RATE_CHECKS && position == 0 {
                    let origin = state.information_time(topic.buffer_order());
                    let armed = origin.is_some_and(|t| arm_rate_timer(&topic, state, 0, t));
                    if !armed {
                        topic.rate_timer().reset();
                    }
                }
            }
            for index in pending {
                let slot = &mut state.messages[index];
                debug_assert!(slot.hrt_consumers_left > 0, "HRT message consumed twice");
                slot.hrt_consumers_left = slot.hrt_consumers_left.saturating_sub(1);
                released |= slot.hrt_consumers_left == 0;
            }
            state.num_hrt -= 1;
        });
        if released {
            topic.release_hrt();
        }
        self.qos = None;
        self.key = 0;
        true
    }
}

impl Drop for HrtSubscriber {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}
