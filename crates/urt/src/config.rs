// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! µRT build-time configuration.
//!
//! Every switch of the middleware is selected by a Cargo feature and exposed
//! here as a `const`, so that disabled checks fold away at compile time.
//!
//! | Feature                | Constant(s)                                   |
//! |------------------------|-----------------------------------------------|
//! | `profiling`            | [`PUBSUB_PROFILING`], [`RPC_PROFILING`], [`NODE_PROFILING`] |
//! | `qos-deadline`         | [`PUBSUB_QOS_DEADLINE_CHECKS`], [`RPC_QOS_DEADLINE_CHECKS`] |
//! | `qos-jitter`           | [`PUBSUB_QOS_JITTER_CHECKS`], [`RPC_QOS_JITTER_CHECKS`] |
//! | `qos-rate`             | [`PUBSUB_QOS_RATE_CHECKS`]                    |
//! | `condvar-timeout`      | [`CONDVAR_TIMEOUT`]                           |
//! | `buffer-order-pubtime` | [`TOPIC_BUFFER_ORDER`]                        |
//!
//! Inconsistent values are rejected by `const` assertions at the bottom of
//! this file, so a bad configuration is a build failure, never a runtime one.

// =======================================================================
// Identifiers
// =======================================================================

/// Topic identifier.
pub type TopicId = u16;

/// Number of significant bits of a [`TopicId`].
pub const TOPIC_ID_WIDTH: u32 = 16;

/// Largest valid topic id.
pub const TOPIC_ID_MAX: TopicId = max_for_width(TOPIC_ID_WIDTH) as TopicId;

/// Service identifier.
pub type ServiceId = u16;

/// Number of significant bits of a [`ServiceId`].
pub const SERVICE_ID_WIDTH: u32 = 16;

/// Largest valid service id.
pub const SERVICE_ID_MAX: ServiceId = max_for_width(SERVICE_ID_WIDTH) as ServiceId;

const fn max_for_width(width: u32) -> u64 {
    if width >= 64 {
        u64::MAX
    } else {
        (1u64 << width) - 1
    }
}

// =======================================================================
// Profiling
// =======================================================================

/// Collect pub-sub profiling data (topics, messages, publishers, subscribers).
pub const PUBSUB_PROFILING: bool = cfg!(all(feature = "pubsub", feature = "profiling"));

/// Collect RPC profiling data (services, requests).
pub const RPC_PROFILING: bool = cfg!(all(feature = "rpc", feature = "profiling"));

/// Count node loop iterations.
pub const NODE_PROFILING: bool = cfg!(feature = "profiling");

// =======================================================================
// QoS
// =======================================================================

/// Check deadlines of FRT/HRT subscribers.
pub const PUBSUB_QOS_DEADLINE_CHECKS: bool = cfg!(all(feature = "pubsub", feature = "qos-deadline"));

/// Check jitter of FRT/HRT subscribers.
pub const PUBSUB_QOS_JITTER_CHECKS: bool = cfg!(all(feature = "pubsub", feature = "qos-jitter"));

/// Check expected publish rates of HRT subscribers.
pub const PUBSUB_QOS_RATE_CHECKS: bool = cfg!(all(feature = "pubsub", feature = "qos-rate"));

/// Check deadlines of FRT/HRT requests.
pub const RPC_QOS_DEADLINE_CHECKS: bool = cfg!(all(feature = "rpc", feature = "qos-deadline"));

/// Check jitter of FRT/HRT requests.
pub const RPC_QOS_JITTER_CHECKS: bool = cfg!(all(feature = "rpc", feature = "qos-jitter"));

/// Condition variable waits support timeouts (`Publisher::publish_timeout`).
pub const CONDVAR_TIMEOUT: bool = cfg!(feature = "condvar-timeout");

// =======================================================================
// Topic buffers
// =======================================================================

/// Ordering of messages within a topic buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferOrder {
    /// Sorted by origin timestamp. Late messages are inserted in place;
    /// messages older than the oldest retained one are rejected.
    MessageTime,
    /// Sorted by arrival. O(1) insertion, no causal ordering.
    PublishTime,
}

/// Default buffer order of newly created topics.
pub const TOPIC_BUFFER_ORDER: BufferOrder = if cfg!(feature = "buffer-order-pubtime") {
    BufferOrder::PublishTime
} else {
    BufferOrder::MessageTime
};

/// Initial capacity of a service's request queues.
pub const SERVICE_QUEUE_CAPACITY: usize = 16;

// =======================================================================
// Build-time validation
// =======================================================================

const _: () = assert!(
    TOPIC_ID_WIDTH >= 1 && TOPIC_ID_WIDTH <= TopicId::BITS,
    "TOPIC_ID_WIDTH must fit into TopicId"
);
const _: () = assert!(
    SERVICE_ID_WIDTH >= 1 && SERVICE_ID_WIDTH <= ServiceId::BITS,
    "SERVICE_ID_WIDTH must fit into ServiceId"
);
const _: () = assert!(SERVICE_QUEUE_CAPACITY > 0, "service queues need capacity");
