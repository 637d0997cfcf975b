// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Publish-subscribe.
//!
//! A [`Topic`] is a circular buffer of pre-allocated [`Message`] slots.
//! [`Publisher`]s write into it under a [`PublishPolicy`]; subscribers of the
//! four real-time classes read from it and are woken through the topic's
//! event source.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use urt::pubsub::{Message, NrtSubscriber, PublishPolicy, Publisher, Subscriber, Topic};
//! use urt::{Core, Time};
//!
//! let core = Core::new(None);
//! let topic = Topic::new(&core, 1, 4).unwrap();
//! topic.add_messages([Message::new(4), Message::new(4)]);
//!
//! let mut subscriber = NrtSubscriber::new();
//! subscriber.subscribe(&topic, 1 << 1).unwrap();
//!
//! let mut publisher = Publisher::new(&topic);
//! publisher.publish(&42u32.to_le_bytes(), Time::now(), PublishPolicy::Lazy).unwrap();
//!
//! let mut buf = [0u8; 4];
//! let fetched = subscriber.fetch_next(&mut buf).unwrap();
//! assert_eq!(u32::from_le_bytes(buf), 42);
//! assert_eq!(fetched.size, 4);
//! ```

mod hrt;
mod message;
mod publisher;
mod subscriber;
mod topic;

pub use crate::qos::Recovery;
pub use hrt::{HrtConstraints, HrtSubscriber};
pub use message::{Message, MessageId, MessageInfo, MessageProfile, MESSAGEID_INVALID};
pub use publisher::{PublishPolicy, Publisher, PublisherProfile};
pub use subscriber::{
    Fetched, FrtSubscriber, NrtSubscriber, SrtSubscriber, Subscriber, SubscriberProfile,
};
pub use topic::{Topic, TopicProfile};
