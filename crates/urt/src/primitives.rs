// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Primitive types shared by every µRT subsystem.
//!
//! - [`Delay`]: relative time in microseconds (32 or 64 bit, see `delay-64`)
//! - [`NodeStage`]: node synchronisation stage counter
//! - [`ProfilingCounter`]: counters collected when `profiling` is enabled
//! - [`Status`]: the single flat status enumeration returned by all operations
//! - [`RtClass`]: real-time class of subscribers and requests

use std::fmt;

/// Relative time in microseconds.
#[cfg(not(feature = "delay-64"))]
pub type Delay = u32;

/// Relative time in microseconds.
#[cfg(feature = "delay-64")]
pub type Delay = u64;

/// Zero delay. As a QoS constraint this means "no constraint".
pub const DELAY_IMMEDIATE: Delay = 0;

/// Maximum representable delay.
pub const DELAY_INFINITE: Delay = Delay::MAX;

/// Stage counter used by the startup barrier.
pub type NodeStage = u16;

/// Counter type for profiling data.
pub type ProfilingCounter = u64;

/// Status codes of µRT.
///
/// Numeric codes are grouped by subsystem: QoS violations (0x1x),
/// synchronisation and node (0x2x), pub-sub (0xEx) and RPC (0xFx).
/// Operations return `Result<T>`; [`Status::Ok`] never appears as an error
/// but is used as "no violation" inside QoS bookkeeping and as the core status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Status {
    /// Success.
    Ok = 0x00,

    // QoS
    /// A deadline was violated.
    DeadlineViolation = 0x10,
    /// A jitter constraint was violated.
    JitterViolation = 0x11,
    /// An expected publish rate was violated.
    RateViolation = 0x12,

    // Sync / node
    /// Synchronisation has not completed yet.
    SyncPending = 0x20,
    /// Synchronisation failed.
    SyncError = 0x21,
    /// Event mask overlaps the core event mask or is empty.
    NodeInvalidEventMask = 0x22,

    // Pub-sub
    /// A topic with the same id is already registered.
    TopicDuplicate = 0xE0,
    /// Topic lock was held (lazy publish).
    PublishLocked = 0xE1,
    /// Oldest message is still blocked by HRT subscribers.
    PublishBlocked = 0xE2,
    /// Waiting for HRT subscribers timed out.
    PublishTimeout = 0xE3,
    /// Message is older than the oldest retained message.
    PublishObsolete = 0xE4,
    /// No new message available.
    FetchNoMessage = 0xE5,
    /// Payload does not fit into the message slot.
    PublishInvalidSize = 0xE6,

    // RPC
    /// A service with the same id is already registered.
    ServiceDuplicate = 0xF0,
    /// Request is owned by a (different) service.
    RequestBadOwner = 0xF1,
    /// Request lock was held.
    RequestLocked = 0xF2,
    /// Request awaits an answer.
    RequestPending = 0xF3,
    /// Request was retrieved and resubmitted since dispatch.
    RequestObsolete = 0xF4,
}

impl Status {
    /// Numeric status code.
    pub const fn code(self) -> u8 {
        self as u8
    }

    /// Returns `true` for [`Status::Ok`].
    pub const fn is_ok(self) -> bool {
        matches!(self, Status::Ok)
    }

    /// Returns `true` for QoS violation codes.
    pub const fn is_violation(self) -> bool {
        matches!(
            self,
            Status::DeadlineViolation | Status::JitterViolation | Status::RateViolation
        )
    }

    /// Looks up a status by its numeric code.
    pub const fn from_code(code: u8) -> Option<Status> {
        let status = match code {
            0x00 => Status::Ok,
            0x10 => Status::DeadlineViolation,
            0x11 => Status::JitterViolation,
            0x12 => Status::RateViolation,
            0x20 => Status::SyncPending,
            0x21 => Status::SyncError,
            0x22 => Status::NodeInvalidEventMask,
            0xE0 => Status::TopicDuplicate,
            0xE1 => Status::PublishLocked,
            0xE2 => Status::PublishBlocked,
            0xE3 => Status::PublishTimeout,
            0xE4 => Status::PublishObsolete,
            0xE5 => Status::FetchNoMessage,
            0xE6 => Status::PublishInvalidSize,
            0xF0 => Status::ServiceDuplicate,
            0xF1 => Status::RequestBadOwner,
            0xF2 => Status::RequestLocked,
            0xF3 => Status::RequestPending,
            0xF4 => Status::RequestObsolete,
            _ => return None,
        };
        Some(status)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Status::Ok => "ok",
            Status::DeadlineViolation => "deadline violated",
            Status::JitterViolation => "jitter violated",
            Status::RateViolation => "publish rate violated",
            Status::SyncPending => "synchronization pending",
            Status::SyncError => "synchronization failed",
            Status::NodeInvalidEventMask => "event mask overlaps core event mask",
            Status::TopicDuplicate => "duplicate topic id",
            Status::PublishLocked => "topic locked",
            Status::PublishBlocked => "message blocked by HRT subscriber",
            Status::PublishTimeout => "publish timed out",
            Status::PublishObsolete => "message older than buffer",
            Status::FetchNoMessage => "no new message",
            Status::PublishInvalidSize => "payload exceeds message capacity",
            Status::ServiceDuplicate => "duplicate service id",
            Status::RequestBadOwner => "request owned by another service",
            Status::RequestLocked => "request locked",
            Status::RequestPending => "request pending",
            Status::RequestObsolete => "request obsolete",
        };
        write!(f, "{} (0x{:02X})", text, self.code())
    }
}

impl std::error::Error for Status {}

/// Result type for µRT operations.
pub type Result<T> = core::result::Result<T, Status>;

/// Real-time class of subscribers and requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RtClass {
    /// Non real-time.
    Nrt,
    /// Soft real-time.
    Srt,
    /// Firm real-time.
    Frt,
    /// Hard real-time.
    Hrt,
}

impl fmt::Display for RtClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RtClass::Nrt => write!(f, "NRT"),
            RtClass::Srt => write!(f, "SRT"),
            RtClass::Frt => write!(f, "FRT"),
            RtClass::Hrt => write!(f, "HRT"),
        }
    }
}
