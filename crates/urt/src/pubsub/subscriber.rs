// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Subscribers of the four real-time classes.
//!
//! | class | fetch semantics                                  | QoS                         |
//! |-------|--------------------------------------------------|-----------------------------|
//! | NRT   | plain                                            | none                        |
//! | SRT   | plain                                            | usefulness callback         |
//! | FRT   | plain                                            | deadline/jitter at fetch    |
//! | HRT   | pins unread messages (see [`super::hrt`])        | timers, recovery, emergency |
//!
//! QoS violations never fail a fetch: the payload is delivered and the
//! violation is reported in [`Fetched::violation`].

use super::message::{MessageId, MessageSlot, MESSAGEID_INVALID};
use super::topic::{Topic, TopicState};
use crate::config;
use crate::core::check_event_mask;
use crate::osal::{EventListener, EventMask, Time};
use crate::primitives::{Delay, ProfilingCounter, Result, RtClass, Status};
use crate::qos::{deadline_violated, JitterWindow, LatencyProfile};
use std::sync::Arc;

/// Result of a successful fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fetched {
    /// Payload size of the message (may exceed the output buffer).
    pub size: usize,
    /// Origin time of the message.
    pub time: Time,
    /// Delay between origin and fetch.
    pub latency: Delay,
    /// QoS violation detected by this fetch.
    pub violation: Option<Status>,
}

/// Profiling data of a subscriber.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SubscriberProfile {
    /// Latencies of fetched messages.
    pub latency: LatencyProfile,
    /// Messages received (including skipped ones on fetch-latest).
    pub received: ProfilingCounter,
}

/// Common interface of all subscriber classes.
pub trait Subscriber {
    /// Real-time class of the subscriber.
    fn rt_class(&self) -> RtClass;

    /// Topic the subscriber is attached to.
    fn topic(&self) -> Option<&Arc<Topic>>;

    /// Fetches the oldest message not read yet.
    ///
    /// Fails with `FetchNoMessage` when caught up.
    fn fetch_next(&mut self, payload: &mut [u8]) -> Result<Fetched>;

    /// Fetches the latest message, skipping older unread ones.
    ///
    /// Fails with `FetchNoMessage` when the latest message was already read.
    fn fetch_latest(&mut self, payload: &mut [u8]) -> Result<Fetched>;

    /// Detaches from the topic. Returns false if not subscribed.
    fn unsubscribe(&mut self) -> bool;
}

/// Topic binding and read position shared by all classes.
#[derive(Debug, Default)]
pub(crate) struct BaseSubscriber {
    topic: Option<Arc<Topic>>,
    listener: EventListener,
    last: usize,
    last_id: MessageId,
    profile: SubscriberProfile,
}

impl BaseSubscriber {
    pub(crate) fn topic(&self) -> Option<&Arc<Topic>> {
        self.topic.as_ref()
    }

    pub(crate) fn listener(&self) -> &EventListener {
        &self.listener
    }

    pub(crate) fn profile(&self) -> SubscriberProfile {
        self.profile
    }

    /// Binds to `topic`; `register` runs under the topic lock.
    pub(crate) fn attach(
        &mut self,
        topic: &Arc<Topic>,
        mask: EventMask,
        register: impl FnOnce(&mut TopicState),
    ) -> Result<()> {
        check_event_mask(mask)?;
        debug_assert!(self.topic.is_none(), "subscriber already subscribed");
        let mut state = topic.lock();
        register(&mut *state);
        self.last = state.latest;
        self.last_id = state.messages[state.latest].id;
        topic.event_source().register(&mut self.listener, mask);
        if config::PUBSUB_PROFILING {
            state.profile.subscribers += 1;
        }
        drop(state);
        self.topic = Some(Arc::clone(topic));
        self.profile = SubscriberProfile::default();
        Ok(())
    }

    /// Unbinds from the topic; `release` runs under the topic lock with the
    /// indices of all messages not read yet.
    pub(crate) fn detach(&mut self, release: impl FnOnce(&mut TopicState, Vec<usize>)) -> bool {
        let Some(topic) = self.topic.take() else {
            return false;
        };
        topic.event_source().unregister(&mut self.listener);
        let mut guard = topic.lock();
        let state = &mut *guard;
        let pending: Vec<usize> = match self.next_unread(state) {
            Some(start) => state.chain_to_latest(start).collect(),
            None => Vec::new(),
        };
        if config::PUBSUB_PROFILING {
            state.profile.subscribers = state.profile.subscribers.saturating_sub(1);
            for &index in &pending {
                let profile = &mut state.messages[index].profile;
                profile.consumers_left = profile.consumers_left.saturating_sub(1);
            }
        }
        release(state, pending);
        drop(guard);
        self.last = 0;
        self.last_id = MESSAGEID_INVALID;
        true
    }

    pub(crate) fn next_unread(&self, state: &TopicState) -> Option<usize> {
        state.next_unread(self.last, self.last_id)
    }

    /// Marks `slot` as read and copies its payload.
    pub(crate) fn record(&mut self, index: usize, slot: &MessageSlot, payload: &mut [u8]) -> usize {
        self.last = index;
        self.last_id = slot.id;
        slot.read(payload)
    }

    pub(crate) fn count_received(&mut self) {
        self.profile.received += 1;
    }

    pub(crate) fn track_latency(&mut self, latency: Delay) {
        self.profile.latency.track(latency);
    }

    fn fetch_next(&mut self, payload: &mut [u8]) -> Result<Fetched> {
        let Some(topic) = self.topic.clone() else {
            debug_assert!(false, "fetch on unsubscribed subscriber");
            return Err(Status::FetchNoMessage);
        };
        let mut state = topic.lock();
        let index = self.next_unread(&state).ok_or(Status::FetchNoMessage)?;
        let slot = &mut state.messages[index];
        let size = self.record(index, slot, payload);
        let time = slot.time;
        if config::PUBSUB_PROFILING {
            slot.profile.consumers_left = slot.profile.consumers_left.saturating_sub(1);
        }
        drop(state);

        let latency = Time::now().delay_since(time);
        if config::PUBSUB_PROFILING {
            self.count_received();
            self.track_latency(latency);
        }
        Ok(Fetched {
            size,
            time,
            latency,
            violation: None,
        })
    }

    fn fetch_latest(&mut self, payload: &mut [u8]) -> Result<Fetched> {
        let Some(topic) = self.topic.clone() else {
            debug_assert!(false, "fetch on unsubscribed subscriber");
            return Err(Status::FetchNoMessage);
        };
        let mut guard = topic.lock();
        let state = &mut *guard;
        let latest = state.latest;
        if !state.messages[latest].is_valid() || self.last_id == state.messages[latest].id {
            return Err(Status::FetchNoMessage);
        }
        if config::PUBSUB_PROFILING {
            if let Some(start) = self.next_unread(state) {
                let skipped: Vec<usize> = state.chain_to_latest(start).collect();
                for index in skipped {
                    let profile = &mut state.messages[index].profile;
                    profile.consumers_left = profile.consumers_left.saturating_sub(1);
                    self.count_received();
                }
            }
        }
        let slot = &state.messages[latest];
        let size = self.record(latest, slot, payload);
        let time = slot.time;
        drop(guard);

        let latency = Time::now().delay_since(time);
        if config::PUBSUB_PROFILING {
            self.track_latency(latency);
        }
        Ok(Fetched {
            size,
            time,
            latency,
            violation: None,
        })
    }
}

/// Non-real-time subscriber.
#[derive(Debug, Default)]
pub struct NrtSubscriber {
    base: BaseSubscriber,
}

impl NrtSubscriber {
    /// Creates an unsubscribed subscriber.
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribes to `topic`, registering the calling thread for `mask`.
    pub fn subscribe(&mut self, topic: &Arc<Topic>, mask: EventMask) -> Result<()> {
        self.base.attach(topic, mask, |_| {})
    }

    /// Listener registered on the topic's event source.
    pub fn listener(&self) -> &EventListener {
        self.base.listener()
    }

    /// Profiling data (all zero without `profiling`).
    pub fn profile(&self) -> SubscriberProfile {
        self.base.profile()
    }
}

impl Subscriber for NrtSubscriber {
    fn rt_class(&self) -> RtClass {
        RtClass::Nrt
    }

    fn topic(&self) -> Option<&Arc<Topic>> {
        self.base.topic()
    }

    fn fetch_next(&mut self, payload: &mut [u8]) -> Result<Fetched> {
        self.base.fetch_next(payload)
    }

    fn fetch_latest(&mut self, payload: &mut [u8]) -> Result<Fetched> {
        self.base.fetch_latest(payload)
    }

    fn unsubscribe(&mut self) -> bool {
        self.base.detach(|_, _| {})
    }
}

impl Drop for NrtSubscriber {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

type Usefulness = Box<dyn Fn(Delay) -> f32 + Send>;

/// Soft real-time subscriber with a usefulness function.
#[derive(Default)]
pub struct SrtSubscriber {
    base: BaseSubscriber,
    usefulness: Option<Usefulness>,
}

impl std::fmt::Debug for SrtSubscriber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SrtSubscriber")
            .field("base", &self.base)
            .field("usefulness", &self.usefulness.is_some())
            .finish()
    }
}

impl SrtSubscriber {
    /// Creates an unsubscribed subscriber.
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribes to `topic`; `usefulness` maps a latency to `[0, 1]`.
    pub fn subscribe<F>(&mut self, topic: &Arc<Topic>, mask: EventMask, usefulness: F) -> Result<()>
    where
        F: Fn(Delay) -> f32 + Send + 'static,
    {
        self.base.attach(topic, mask, |_| {})?;
        self.usefulness = Some(Box::new(usefulness));
        Ok(())
    }

    /// Usefulness of a message with the given latency (0 if unsubscribed).
    pub fn calculate_usefulness(&self, latency: Delay) -> f32 {
        self.usefulness.as_ref().map_or(0.0, |f| f(latency))
    }

    /// Listener registered on the topic's event source.
    pub fn listener(&self) -> &EventListener {
        self.base.listener()
    }

    /// Profiling data (all zero without `profiling`).
    pub fn profile(&self) -> SubscriberProfile {
        self.base.profile()
    }
}

impl Subscriber for SrtSubscriber {
    fn rt_class(&self) -> RtClass {
        RtClass::Srt
    }

    fn topic(&self) -> Option<&Arc<Topic>> {
        self.base.topic()
    }

    fn fetch_next(&mut self, payload: &mut [u8]) -> Result<Fetched> {
        self.base.fetch_next(payload)
    }

    fn fetch_latest(&mut self, payload: &mut [u8]) -> Result<Fetched> {
        self.base.fetch_latest(payload)
    }

    fn unsubscribe(&mut self) -> bool {
        self.usefulness = None;
        self.base.detach(|_, _| {})
    }
}

impl Drop for SrtSubscriber {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

/// Firm real-time subscriber with deadline and jitter checks at fetch time.
#[derive(Debug)]
pub struct FrtSubscriber {
    base: BaseSubscriber,
    deadline: Delay,
    window: JitterWindow,
}

impl Default for FrtSubscriber {
    fn default() -> Self {
        Self {
            base: BaseSubscriber::default(),
            deadline: 0,
            window: JitterWindow::new(0),
        }
    }
}

impl FrtSubscriber {
    /// Creates an unsubscribed subscriber.
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribes to `topic`; `0` disables the deadline or jitter check.
    pub fn subscribe(
        &mut self,
        topic: &Arc<Topic>,
        mask: EventMask,
        deadline: Delay,
        jitter: Delay,
    ) -> Result<()> {
        self.base.attach(topic, mask, |_| {})?;
        self.deadline = if config::PUBSUB_QOS_DEADLINE_CHECKS { deadline } else { 0 };
        self.window = JitterWindow::new(if config::PUBSUB_QOS_JITTER_CHECKS { jitter } else { 0 });
        Ok(())
    }

    /// Whether a message with `latency` would satisfy deadline and jitter,
    /// without tracking it.
    pub fn calculate_validity(&self, latency: Delay) -> bool {
        !deadline_violated(self.deadline, latency) && self.window.admits(latency)
    }

    /// Current jitter window.
    pub fn jitter_window(&self) -> &JitterWindow {
        &self.window
    }

    /// Listener registered on the topic's event source.
    pub fn listener(&self) -> &EventListener {
        self.base.listener()
    }

    /// Profiling data (all zero without `profiling`).
    pub fn profile(&self) -> SubscriberProfile {
        self.base.profile()
    }

    fn check(&mut self, mut fetched: Fetched) -> Fetched {
        fetched.violation = if deadline_violated(self.deadline, fetched.latency) {
            Some(Status::DeadlineViolation)
        } else if self.window.track(fetched.latency) {
            Some(Status::JitterViolation)
        } else {
            None
        };
        fetched
    }
}

impl Subscriber for FrtSubscriber {
    fn rt_class(&self) -> RtClass {
        RtClass::Frt
    }

    fn topic(&self) -> Option<&Arc<Topic>> {
        self.base.topic()
    }

    fn fetch_next(&mut self, payload: &mut [u8]) -> Result<Fetched> {
        let fetched = self.base.fetch_next(payload)?;
        Ok(self.check(fetched))
    }

    fn fetch_latest(&mut self, payload: &mut [u8]) -> Result<Fetched> {
        let fetched = self.base.fetch_latest(payload)?;
        Ok(self.check(fetched))
    }

    fn unsubscribe(&mut self) -> bool {
        self.base.detach(|_, _| {})
    }
}

impl Drop for FrtSubscriber {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BufferOrder;
    use crate::core::{Core, CORE_EVENT_MASK};
    use crate::pubsub::{Message, PublishPolicy, Publisher};

    fn setup(slots: usize) -> (Arc<Core>, Arc<Topic>, Publisher) {
        let core = Core::new(None);
        let topic = Topic::with_order(&core, 9, 8, BufferOrder::MessageTime).expect("topic");
        topic.add_messages((1..slots).map(|_| Message::new(8)));
        let publisher = Publisher::new(&topic);
        (core, topic, publisher)
    }

    #[test]
    fn test_subscribe_rejects_core_mask() {
        let (_core, topic, _publisher) = setup(1);
        let mut sub = NrtSubscriber::new();
        assert_eq!(sub.subscribe(&topic, 0), Err(Status::NodeInvalidEventMask));
        assert_eq!(
            sub.subscribe(&topic, CORE_EVENT_MASK | 1 << 3),
            Err(Status::NodeInvalidEventMask)
        );
        assert!(sub.topic().is_none());
        assert!(sub.subscribe(&topic, 1 << 3).is_ok());
    }

    #[test]
    fn test_fetch_next_drains_in_order() {
        let (_core, topic, mut publisher) = setup(4);
        let mut sub = NrtSubscriber::new();
        sub.subscribe(&topic, 1 << 1).expect("subscribe");
        let mut buf = [0u8; 8];
        assert_eq!(sub.fetch_next(&mut buf).err(), Some(Status::FetchNoMessage));

        for i in 1..=3u8 {
            publisher
                .publish(&[i], Time::from_micros(i as u64), PublishPolicy::Lazy)
                .expect("publish");
        }
        let mut seen = Vec::new();
        while let Ok(fetched) = sub.fetch_next(&mut buf) {
            assert_eq!(fetched.size, 1);
            seen.push(buf[0]);
        }
        assert_eq!(seen, vec![1, 2, 3]);
    }

    #[test]
    fn test_overrun_subscriber_restarts_at_oldest() {
        let (_core, topic, mut publisher) = setup(2);
        let mut sub = NrtSubscriber::new();
        sub.subscribe(&topic, 1 << 1).expect("subscribe");
        let mut buf = [0u8; 8];
        publisher.publish(&[1], Time::from_micros(1), PublishPolicy::Lazy).expect("1");
        sub.fetch_next(&mut buf).expect("fetch 1");
        for i in 2..=5u8 {
            publisher
                .publish(&[i], Time::from_micros(i as u64), PublishPolicy::Lazy)
                .expect("publish");
        }
        sub.fetch_next(&mut buf).expect("oldest");
        assert_eq!(buf[0], 4);
        sub.fetch_next(&mut buf).expect("latest");
        assert_eq!(buf[0], 5);
    }

    #[test]
    fn test_fetch_latest_skips() {
        let (_core, topic, mut publisher) = setup(3);
        let mut sub = SrtSubscriber::new();
        sub.subscribe(&topic, 1 << 1, |latency| if latency < 1_000 { 1.0 } else { 0.5 })
            .expect("subscribe");
        for i in 1..=3u8 {
            publisher
                .publish(&[i], Time::from_micros(i as u64), PublishPolicy::Lazy)
                .expect("publish");
        }
        let mut buf = [0u8; 8];
        sub.fetch_latest(&mut buf).expect("latest");
        assert_eq!(buf[0], 3);
        assert_eq!(sub.fetch_latest(&mut buf).err(), Some(Status::FetchNoMessage));
        assert_eq!(sub.calculate_usefulness(10), 1.0);
        if config::PUBSUB_PROFILING {
            assert_eq!(sub.profile().received, 3);
        }
    }

    #[test]
    fn test_srt_usefulness_follows_fetched_latency() {
        let (_core, topic, mut publisher) = setup(2);
        let mut sub = SrtSubscriber::new();
        sub.subscribe(&topic, 1 << 1, |latency| if latency < 5_000 { 1.0 } else { 0.5 })
            .expect("subscribe");
        let mut buf = [0u8; 8];

        publisher.publish(&[1], Time::now(), PublishPolicy::Lazy).expect("fresh");
        let fresh = sub.fetch_next(&mut buf).expect("fetch fresh");
        assert!(fresh.latency < 5_000);
        assert_eq!(sub.calculate_usefulness(fresh.latency), 1.0);

        publisher.publish(&[2], Time::now(), PublishPolicy::Lazy).expect("stale");
        std::thread::sleep(std::time::Duration::from_millis(10));
        let stale = sub.fetch_next(&mut buf).expect("fetch stale");
        assert_eq!(buf[0], 2);
        assert!(stale.latency >= 10_000);
        assert_eq!(sub.calculate_usefulness(stale.latency), 0.5);

        assert!(sub.unsubscribe());
        assert_eq!(sub.calculate_usefulness(stale.latency), 0.0);
    }

    #[test]
    fn test_frt_reports_deadline_violation() {
        if !config::PUBSUB_QOS_DEADLINE_CHECKS {
            return;
        }
        let (_core, topic, mut publisher) = setup(1);
        let mut sub = FrtSubscriber::new();
        sub.subscribe(&topic, 1 << 1, 1_000, 0).expect("subscribe");
        let sent = Time::now();
        publisher.publish(&[7], sent, PublishPolicy::Lazy).expect("publish");
        std::thread::sleep(std::time::Duration::from_millis(5));
        let mut buf = [0u8; 8];
        let fetched = sub.fetch_latest(&mut buf).expect("payload still delivered");
        assert_eq!(buf[0], 7);
        assert_eq!(fetched.violation, Some(Status::DeadlineViolation));
        assert!(!sub.calculate_validity(fetched.latency));
        assert!(sub.calculate_validity(10));
    }

    #[test]
    fn test_unsubscribe_updates_profile() {
        let (_core, topic, mut publisher) = setup(2);
        let mut a = NrtSubscriber::new();
        let mut b = FrtSubscriber::new();
        a.subscribe(&topic, 1 << 1).expect("a");
        b.subscribe(&topic, 1 << 2, 0, 0).expect("b");
        publisher.publish(&[1], Time::from_micros(5), PublishPolicy::Lazy).expect("publish");
        if config::PUBSUB_PROFILING {
            assert_eq!(topic.profile().subscribers, 2);
        }
        assert!(b.unsubscribe());
        drop(a);
        if config::PUBSUB_PROFILING {
            assert_eq!(topic.profile().subscribers, 0);
        }
        assert_eq!(topic.event_source().listener_count(), 0);
    }
}
