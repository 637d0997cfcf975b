// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Publishers.

use super::topic::Topic;
use crate::config;
use crate::osal::Time;
use crate::primitives::{ProfilingCounter, Result};
use std::sync::Arc;

#[cfg(feature = "condvar-timeout")]
use crate::primitives::{Delay, DELAY_INFINITE};

/// How hard a publisher tries to get a message out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PublishPolicy {
    /// Abort if the topic is locked or the next slot is pinned by an HRT
    /// subscriber.
    Lazy,
    /// Wait for the topic lock, abort if the next slot is pinned.
    Determined,
    /// Wait for the lock and for HRT subscribers to release the slot.
    Enforcing,
}

/// Profiling data of a publisher.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublisherProfile {
    /// Publish calls.
    pub attempts: ProfilingCounter,
    /// Publish calls that did not publish.
    pub fails: ProfilingCounter,
}

/// Writes messages to one topic.
#[derive(Debug)]
pub struct Publisher {
    topic: Arc<Topic>,
    profile: PublisherProfile,
}

impl Publisher {
    /// Creates a publisher for `topic`.
    pub fn new(topic: &Arc<Topic>) -> Self {
        Self {
            topic: Arc::clone(topic),
            profile: PublisherProfile::default(),
        }
    }

    /// Topic this publisher writes to.
    pub fn topic(&self) -> &Arc<Topic> {
        &self.topic
    }

    /// Publishes `payload` with origin time `time`.
    ///
    /// # Errors
    ///
    /// - `PublishLocked`: topic locked (`Lazy` only)
    /// - `PublishBlocked`: next slot still pinned by an HRT subscriber
    ///   (`Lazy`, `Determined`)
    /// - `PublishObsolete`: message older than the oldest retained one
    ///   (message-time ordering)
    /// - `PublishInvalidSize`: payload larger than the next message slot
    pub fn publish(&mut self, payload: &[u8], time: Time, policy: PublishPolicy) -> Result<()> {
        let result = self.topic.publish(payload, time, policy, None);
        self.track(result)
    }

    /// Like [`Publisher::publish`], but an `Enforcing` wait for HRT
    /// subscribers gives up after `timeout` with `PublishTimeout`.
    #[cfg(feature = "condvar-timeout")]
    pub fn publish_timeout(
        &mut self,
        payload: &[u8],
        time: Time,
        policy: PublishPolicy,
        timeout: Delay,
    ) -> Result<()> {
        let timeout = (timeout != DELAY_INFINITE)
            .then(|| std::time::Duration::from_micros(timeout as u64));
        let result = self.topic.publish(payload, time, policy, timeout);
        self.track(result)
    }

    /// Profiling data (all zero without `profiling`).
    pub fn profile(&self) -> PublisherProfile {
        self.profile
    }

    fn track(&mut self, result: Result<()>) -> Result<()> {
        if config::PUBSUB_PROFILING {
            self.profile.attempts += 1;
            if result.is_err() {
                self.profile.fails += 1;
            }
        }
        result
    }
}
