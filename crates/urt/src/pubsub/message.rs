// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Messages: timestamped payload slots recycled within a topic buffer.

use crate::osal::Time;
use crate::primitives::ProfilingCounter;

/// Message identifier; [`MESSAGEID_INVALID`] marks never published slots.
pub type MessageId = u64;

/// Identifier of a message that was never published.
pub const MESSAGEID_INVALID: MessageId = 0;

/// A pre-allocated message slot handed to [`Topic::add_messages`].
///
/// [`Topic::add_messages`]: super::Topic::add_messages
#[derive(Debug, Clone)]
pub struct Message {
    payload: Box<[u8]>,
}

impl Message {
    /// Allocates a slot with room for `capacity` payload bytes.
    pub fn new(capacity: usize) -> Self {
        Self {
            payload: vec![0u8; capacity].into_boxed_slice(),
        }
    }

    /// Payload capacity in bytes.
    pub fn capacity(&self) -> usize {
        self.payload.len()
    }

    pub(crate) fn into_slot(self, next: usize) -> MessageSlot {
        MessageSlot {
            next,
            id: MESSAGEID_INVALID,
            time: Time::ZERO,
            payload: self.payload,
            size: 0,
            hrt_consumers_left: 0,
            profile: MessageProfile::default(),
        }
    }
}

/// Profiling data of one message slot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MessageProfile {
    /// How often the slot was (re)used for publishing.
    pub utilizations: ProfilingCounter,
    /// Subscribers that did not consume the current content yet.
    pub consumers_left: usize,
}

/// Snapshot of a retained message, see [`Topic::buffer_snapshot`].
///
/// [`Topic::buffer_snapshot`]: super::Topic::buffer_snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageInfo {
    /// Message identifier.
    pub id: MessageId,
    /// Origin time.
    pub time: Time,
    /// Payload size in bytes.
    pub size: usize,
    /// HRT subscribers that still have to fetch the message.
    pub hrt_consumers_left: usize,
}

/// A message slot linked into a topic's circular buffer.
#[derive(Debug)]
pub(crate) struct MessageSlot {
    pub(crate) next: usize,
    pub(crate) id: MessageId,
    pub(crate) time: Time,
    pub(crate) payload: Box<[u8]>,
    pub(crate) size: usize,
    pub(crate) hrt_consumers_left: usize,
    pub(crate) profile: MessageProfile,
}

impl MessageSlot {
    #[inline]
    pub(crate) fn is_valid(&self) -> bool {
        self.id != MESSAGEID_INVALID
    }

    /// Copies `payload` into the slot; returns the stored size.
    pub(crate) fn write(&mut self, payload: &[u8]) -> usize {
        debug_assert!(
            payload.len() <= self.payload.len(),
            "payload exceeds message capacity"
        );
        let size = payload.len().min(self.payload.len());
        self.payload[..size].copy_from_slice(&payload[..size]);
        self.size = size;
        size
    }

    /// Copies the stored payload into `out`; returns the stored size.
    pub(crate) fn read(&self, out: &mut [u8]) -> usize {
        let n = self.size.min(out.len());
        out[..n].copy_from_slice(&self.payload[..n]);
        self.size
    }

    pub(crate) fn info(&self) -> MessageInfo {
        MessageInfo {
            id: self.id,
            time: self.time,
            size: self.size,
            hrt_consumers_left: self.hrt_consumers_left,
        }
    }
}
