// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Topics: lock-guarded circular message buffers.
//!
//! The buffer is an arena of message slots linked by index into a single
//! cycle. `latest` always points into the cycle; the slot after it is the
//! oldest one and the next to be reused.
//!
//! ```text
//!            ┌──────────────────────────────────────────┐
//!            ▼                                          │
//!   [oldest] ──► [ ... ] ──► [latest] ──► (next write) ─┘
//! ```
//!
//! HRT subscribers pin messages: a slot whose `hrt_consumers_left` is not
//! zero is never overwritten. Publishers either abort (`Lazy`,
//! `Determined`) or wait on the topic's release condition (`Enforcing`).

use super::hrt::{self, HrtEntry};
use super::message::{Message, MessageId, MessageInfo, MessageSlot, MESSAGEID_INVALID};
use super::publisher::PublishPolicy;
use crate::config::{self, BufferOrder, TopicId};
use crate::core::Core;
use crate::osal::{EventSource, Time, Timer};
use crate::primitives::{ProfilingCounter, Result, Status};
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

/// Index of the mandatory message in the arena.
const MANDATORY: usize = 0;

/// Profiling data of a topic.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TopicProfile {
    /// Successfully published messages.
    pub published: ProfilingCounter,
    /// Messages overwritten before every subscriber consumed them.
    pub discarded: ProfilingCounter,
    /// Currently subscribed subscribers of all classes.
    pub subscribers: usize,
}

/// Buffer and subscriber bookkeeping, guarded by the topic lock.
#[derive(Debug)]
pub(crate) struct TopicState {
    pub(crate) messages: Vec<MessageSlot>,
    pub(crate) latest: usize,
    counter: MessageId,
    /// Slot holding the newest information (publish-time ordering).
    latest_information: usize,
    pub(crate) num_hrt: usize,
    /// HRT subscribers, most critical first.
    pub(crate) hrt: Vec<HrtEntry>,
    pub(crate) profile: TopicProfile,
}

impl TopicState {
    fn new(capacity: usize) -> Self {
        Self {
            messages: vec![Message::new(capacity).into_slot(MANDATORY)],
            latest: MANDATORY,
            counter: MESSAGEID_INVALID,
            latest_information: MANDATORY,
            num_hrt: 0,
            hrt: Vec::new(),
            profile: TopicProfile::default(),
        }
    }

    /// Oldest valid message. Requires at least one published message.
    pub(crate) fn oldest(&self) -> usize {
        let mut index = self.messages[self.latest].next;
        while !self.messages[index].is_valid() {
            index = self.messages[index].next;
        }
        index
    }

    /// First message a subscriber positioned at `(last, last_id)` has not seen.
    pub(crate) fn next_unread(&self, last: usize, last_id: MessageId) -> Option<usize> {
        if !self.messages[self.latest].is_valid() {
            return None;
        }
        if self.messages[last].id != last_id {
            // The last read message was reused meanwhile.
            return Some(self.oldest());
        }
        if last == self.latest {
            return None;
        }
        let mut index = self.messages[last].next;
        while !self.messages[index].is_valid() {
            index = self.messages[index].next;
        }
        Some(index)
    }

    /// Indices from `start` up to and including `latest`.
    pub(crate) fn chain_to_latest(&self, start: usize) -> ChainToLatest<'_> {
        ChainToLatest {
            state: self,
            next: Some(start),
        }
    }

    /// Origin time of the newest information in the buffer, if any.
    pub(crate) fn information_time(&self, order: BufferOrder) -> Option<Time> {
        let index = match order {
            BufferOrder::MessageTime => self.latest,
            BufferOrder::PublishTime => self.latest_information,
        };
        let slot = &self.messages[index];
        slot.is_valid().then_some(slot.time)
    }

    fn next_id(&mut self, order: BufferOrder) -> MessageId {
        match order {
            BufferOrder::MessageTime => {
                self.counter = next_valid_id(self.counter);
                self.counter
            }
            BufferOrder::PublishTime => next_valid_id(self.messages[self.latest].id),
        }
    }
}

fn next_valid_id(id: MessageId) -> MessageId {
    match id.wrapping_add(1) {
        MESSAGEID_INVALID => MESSAGEID_INVALID + 1,
        next => next,
    }
}

/// Iterator over buffer indices up to `latest`.
pub(crate) struct ChainToLatest<'a> {
    state: &'a TopicState,
    next: Option<usize>,
}

impl Iterator for ChainToLatest<'_> {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        let current = self.next?;
        self.next = (current != self.state.latest).then(|| self.state.messages[current].next);
        Some(current)
    }
}

/// A topic.
pub struct Topic {
    id: TopicId,
    order: BufferOrder,
    state: Mutex<TopicState>,
    hrt_released: Condvar,
    events: EventSource,
    rate_timer: Timer,
    core: Weak<Core>,
    this: Weak<Topic>,
}

impl std::fmt::Debug for Topic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Topic")
            .field("id", &self.id)
            .field("order", &self.order)
            .finish_non_exhaustive()
    }
}

impl Topic {
    /// Creates a topic with one mandatory message of `capacity` payload bytes
    /// and registers it with `core`, using the configured buffer order.
    pub fn new(core: &Arc<Core>, id: TopicId, capacity: usize) -> Result<Arc<Self>> {
        Self::with_order(core, id, capacity, config::TOPIC_BUFFER_ORDER)
    }

    /// Like [`Topic::new`] with an explicit buffer order.
    pub fn with_order(
        core: &Arc<Core>,
        id: TopicId,
        capacity: usize,
        order: BufferOrder,
    ) -> Result<Arc<Self>> {
        debug_assert!(id <= config::TOPIC_ID_MAX, "topic id exceeds TOPIC_ID_MAX");
        let topic = Arc::new_cyclic(|this| Self {
            id,
            order,
            state: Mutex::new(TopicState::new(capacity)),
            hrt_released: Condvar::new(),
            events: EventSource::new(),
            rate_timer: Timer::new(),
            core: Arc::downgrade(core),
            this: this.clone(),
        });
        core.add_topic(Arc::clone(&topic)).map_err(|e| {
            log::warn!("[Topic::new] topic {} already registered", id);
            e
        })?;
        Ok(topic)
    }

    /// Topic identifier.
    pub fn id(&self) -> TopicId {
        self.id
    }

    /// Buffer ordering of this topic.
    pub fn buffer_order(&self) -> BufferOrder {
        self.order
    }

    /// Event source broadcasting new messages to subscribers.
    pub fn event_source(&self) -> &EventSource {
        &self.events
    }

    /// Splices additional message slots into the buffer right after the
    /// latest message. Added slots are never removed.
    pub fn add_messages(&self, messages: impl IntoIterator<Item = Message>) {
        let mut state = self.state.lock();
        let latest = state.latest;
        let resume = state.messages[latest].next;
        let mut tail = latest;
        for message in messages {
            let index = state.messages.len();
            state.messages.push(message.into_slot(resume));
            state.messages[tail].next = index;
            tail = index;
        }
    }

    /// Number of slots in the circular buffer.
    pub fn buffer_size(&self) -> usize {
        let state = self.state.lock();
        let mut size = 1;
        let mut index = state.messages[state.latest].next;
        while index != state.latest {
            size += 1;
            index = state.messages[index].next;
        }
        size
    }

    /// Retained (published) messages from oldest to newest.
    pub fn buffer_snapshot(&self) -> Vec<MessageInfo> {
        let state = self.state.lock();
        if !state.messages[state.latest].is_valid() {
            return Vec::new();
        }
        let start = state.messages[state.latest].next;
        state
            .chain_to_latest(start)
            .map(|index| &state.messages[index])
            .filter(|slot| slot.is_valid())
            .map(MessageSlot::info)
            .collect()
    }

    /// Information about the latest message, if any was published.
    pub fn latest(&self) -> Option<MessageInfo> {
        let state = self.state.lock();
        let latest = &state.messages[state.latest];
        latest.is_valid().then(|| latest.info())
    }

    /// Number of registered HRT subscribers.
    pub fn num_hrt_subscribers(&self) -> usize {
        self.state.lock().num_hrt
    }

    /// Profiling data (all zero without `profiling`).
    pub fn profile(&self) -> TopicProfile {
        self.state.lock().profile
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, TopicState> {
        self.state.lock()
    }

    pub(crate) fn core(&self) -> &Weak<Core> {
        &self.core
    }

    pub(crate) fn weak(&self) -> &Weak<Topic> {
        &self.this
    }

    pub(crate) fn rate_timer(&self) -> &Timer {
        &self.rate_timer
    }

    /// Wakes publishers waiting for HRT subscribers.
    pub(crate) fn release_hrt(&self) {
        self.hrt_released.notify_all();
    }

    pub(crate) fn publish(
        &self,
        payload: &[u8],
        time: Time,
        policy: PublishPolicy,
        timeout: Option<Duration>,
    ) -> Result<()> {
        let mut state = match policy {
            PublishPolicy::Lazy => self.state.try_lock().ok_or(Status::PublishLocked)?,
            PublishPolicy::Determined | PublishPolicy::Enforcing => self.state.lock(),
        };

        let mut target = state.messages[state.latest].next;
        if state.messages[target].hrt_consumers_left > 0 {
            if policy != PublishPolicy::Enforcing {
                return Err(Status::PublishBlocked);
            }
            let deadline = timeout.map(|t| Instant::now() + t);
            loop {
                let timed_out = match deadline {
                    Some(deadline) => self.hrt_released.wait_until(&mut state, deadline).timed_out(),
                    None => {
                        self.hrt_released.wait(&mut state);
                        false
                    }
                };
                // Another publisher may have used the slot meanwhile.
                target = state.messages[state.latest].next;
                if state.messages[target].hrt_consumers_left == 0 {
                    break;
                }
                if timed_out {
                    return Err(Status::PublishTimeout);
                }
            }
        }

        if payload.len() > state.messages[target].payload.len() {
            log::debug!(
                "[Topic::publish] topic {}: {} byte payload exceeds slot capacity {}",
                self.id,
                payload.len(),
                state.messages[target].payload.len()
            );
            return Err(Status::PublishInvalidSize);
        }

        if self.order == BufferOrder::MessageTime {
            let slot = &state.messages[target];
            if slot.is_valid() && time < slot.time {
                log::debug!(
                    "[Topic::publish] topic {}: message at {:?} older than buffer",
                    self.id,
                    time
                );
                return Err(Status::PublishObsolete);
            }
        }

        let became_latest = self.store(&mut state, target, payload, time);
        self.update_qos(&mut state, target, time, became_latest);

        if config::PUBSUB_PROFILING {
            state.profile.published += 1;
        }
        drop(state);
        self.events.broadcast(0);
        Ok(())
    }

    /// Writes the message into `target` and links it into the buffer.
    ///
    /// Returns whether the message holds the newest information.
    fn store(&self, state: &mut TopicState, target: usize, payload: &[u8], time: Time) -> bool {
        let id = state.next_id(self.order);
        let mut became_latest = true;

        match self.order {
            BufferOrder::MessageTime => {
                let latest = state.latest;
                if !state.messages[latest].is_valid() || time >= state.messages[latest].time {
                    state.latest = target;
                } else {
                    became_latest = false;
                    // Detach the target and insert it in time order.
                    state.messages[latest].next = state.messages[target].next;
                    let mut cursor = latest;
                    loop {
                        let next = state.messages[cursor].next;
                        if state.messages[next].is_valid() && time < state.messages[next].time {
                            break;
                        }
                        cursor = next;
                    }
                    state.messages[target].next = state.messages[cursor].next;
                    state.messages[cursor].next = target;
                }
            }
            BufferOrder::PublishTime => {
                let info = state.latest_information;
                if !state.messages[info].is_valid()
                    || info == target
                    || time >= state.messages[info].time
                {
                    state.latest_information = target;
                } else {
                    became_latest = false;
                }
                state.latest = target;
            }
        }

        let hrt_consumers = if self.order == BufferOrder::MessageTime && !became_latest {
            let next = state.messages[target].next;
            state.messages[next].hrt_consumers_left
        } else {
            state.num_hrt
        };
        let subscribers = state.profile.subscribers;

        let slot = &mut state.messages[target];
        slot.write(payload);
        slot.time = time;
        slot.id = id;
        slot.hrt_consumers_left = hrt_consumers;
        if config::PUBSUB_PROFILING {
            slot.profile.utilizations += 1;
            if slot.profile.consumers_left > 0 {
                state.profile.discarded += 1;
            }
            state.messages[target].profile.consumers_left = subscribers;
        }
        became_latest
    }

    /// Arms rate and deadline/jitter timers of HRT subscribers.
    fn update_qos(&self, state: &mut TopicState, target: usize, time: Time, new_information: bool) {
        if config::PUBSUB_QOS_RATE_CHECKS && new_information {
            hrt::arm_rate_timer(self, state, 0, time);
        }
        if config::PUBSUB_QOS_DEADLINE_CHECKS || config::PUBSUB_QOS_JITTER_CHECKS {
            for entry in state.hrt.iter_mut() {
                let armed_earlier = entry
                    .timer_message
                    .is_some_and(|index| state.messages[index].time <= time);
                if armed_earlier {
                    continue;
                }
                if hrt::arm_qos_timer(entry, time, &self.core) {
                    entry.timer_message = Some(target);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(micros: u64) -> Time {
        Time::from_micros(micros)
    }

    fn topic_with(order: BufferOrder, slots: usize) -> Arc<Topic> {
        let core = Core::new(None);
        let topic = Topic::with_order(&core, 1, 4, order).expect("topic");
        topic.add_messages((1..slots).map(|_| Message::new(4)));
        topic
    }

    #[test]
    fn test_duplicate_topic_rejected() {
        let core = Core::new(None);
        let _a = Topic::new(&core, 7, 1).expect("first");
        assert_eq!(Topic::new(&core, 7, 1).err(), Some(Status::TopicDuplicate));
        assert!(core.topic(7).is_some());
        assert!(core.topic(8).is_none());
    }

    #[test]
    fn test_add_messages_grows_cycle() {
        let topic = topic_with(BufferOrder::MessageTime, 1);
        assert_eq!(topic.buffer_size(), 1);
        topic.add_messages(vec![Message::new(4), Message::new(4)]);
        assert_eq!(topic.buffer_size(), 3);
        topic.add_messages(std::iter::empty());
        assert_eq!(topic.buffer_size(), 3);
    }

    #[test]
    fn test_publish_fills_then_overwrites_oldest() {
        let topic = topic_with(BufferOrder::PublishTime, 3);
        for i in 1..=4u64 {
            topic
                .publish(&[i as u8], t(i * 10), PublishPolicy::Lazy, None)
                .expect("publish");
        }
        let times: Vec<u64> = topic
            .buffer_snapshot()
            .iter()
            .map(|m| m.time.as_micros())
            .collect();
        assert_eq!(times, vec![20, 30, 40]);
        assert_eq!(topic.latest().map(|m| m.id), Some(4));
    }

    #[test]
    fn test_message_time_inserts_in_order() {
        let topic = topic_with(BufferOrder::MessageTime, 4);
        topic.publish(&[1], t(100), PublishPolicy::Lazy, None).expect("1");
        topic.publish(&[2], t(300), PublishPolicy::Lazy, None).expect("2");
        topic.publish(&[3], t(200), PublishPolicy::Lazy, None).expect("3");
        let times: Vec<u64> = topic
            .buffer_snapshot()
            .iter()
            .map(|m| m.time.as_micros())
            .collect();
        assert_eq!(times, vec![100, 200, 300]);
        assert_eq!(topic.latest().map(|m| m.time), Some(t(300)));
    }

    #[test]
    fn test_obsolete_message_leaves_buffer_untouched() {
        let topic = topic_with(BufferOrder::MessageTime, 2);
        topic.publish(&[1], t(100), PublishPolicy::Lazy, None).expect("1");
        topic.publish(&[2], t(200), PublishPolicy::Lazy, None).expect("2");
        let before = topic.buffer_snapshot();
        assert_eq!(
            topic.publish(&[3], t(50), PublishPolicy::Determined, None),
            Err(Status::PublishObsolete)
        );
        assert_eq!(topic.buffer_snapshot(), before);
    }

    #[test]
    fn test_lazy_publish_fails_on_locked_topic() {
        let topic = topic_with(BufferOrder::MessageTime, 1);
        let guard = topic.lock();
        assert_eq!(
            topic.publish(&[1], t(1), PublishPolicy::Lazy, None),
            Err(Status::PublishLocked)
        );
        drop(guard);
        assert_eq!(topic.publish(&[1], t(1), PublishPolicy::Lazy, None), Ok(()));
    }

    #[test]
    fn test_oversized_payload_rejected_without_mutation() {
        let topic = topic_with(BufferOrder::MessageTime, 2);
        topic.publish(&[1, 2], t(10), PublishPolicy::Lazy, None).expect("fits");
        let before = topic.buffer_snapshot();
        assert_eq!(
            topic.publish(&[0; 5], t(20), PublishPolicy::Lazy, None),
            Err(Status::PublishInvalidSize)
        );
        assert_eq!(topic.buffer_snapshot(), before);
        assert_eq!(topic.publish(&[0; 4], t(20), PublishPolicy::Lazy, None), Ok(()));
    }

    #[test]
    fn test_message_ids_skip_invalid() {
        assert_eq!(next_valid_id(MessageId::MAX), 1);
        assert_eq!(next_valid_id(5), 6);
    }
}
