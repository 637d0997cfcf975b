// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Synchronisation barriers.
//!
//! [`ExternalSync`] wraps a two-stage callback that synchronises with parties
//! outside of this process (e.g. other devices on a bus):
//!
//! ```text
//!            start() / INITIAL                finalize() / FINAL
//!  IDLE ─────────────────────────► PENDING ─────────────────────────► IDLE
//!    │   callback: PENDING | ERROR     │   callback: OK | PENDING | ERROR
//!    └──────── ERROR ──► FAILED ◄──────┘
//! ```
//!
//! - INITIAL: the callback must not broadcast; it answers `SyncPending` or
//!   `SyncError`.
//! - FINAL: the callback broadcasts the success or error flags on the given
//!   source once synchronisation completed or failed. It may return
//!   `SyncPending` and broadcast later from another context.
//!
//! The optional [`group`] module implements reusable barriers for multiple
//! nodes within the process.

#[cfg(feature = "syncgroups")]
pub mod group;

#[cfg(feature = "syncgroups")]
pub use group::{SyncGroup, SyncNode, SyncNodeState, SYNC_EVENTFLAG_FAILED, SYNC_EVENTFLAG_PROCEED};

use crate::osal::{EventFlags, EventSource};
use crate::primitives::{Result, Status};
use parking_lot::Mutex;

/// Stage of an external synchronisation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStage {
    /// First local party arrived.
    Initial,
    /// All local parties arrived.
    Final,
}

/// State of an [`ExternalSync`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    /// No synchronisation in progress.
    Idle,
    /// Synchronisation in progress.
    Pending,
    /// Synchronisation failed.
    Failed,
}

/// Progress of a synchronisation call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// All parties arrived.
    Synced,
    /// Waiting for other parties.
    Pending,
}

impl SyncOutcome {
    fn from_status(status: Status) -> Result<Self> {
        match status {
            Status::Ok => Ok(SyncOutcome::Synced),
            Status::SyncPending => Ok(SyncOutcome::Pending),
            other => Err(other),
        }
    }
}

/// External synchronisation callback.
///
/// Implemented for closures with the matching signature.
pub trait Synchronize: Send + Sync {
    /// Runs one synchronisation stage.
    ///
    /// `source`, `success` and `error` are only meaningful for
    /// [`SyncStage::Final`].
    fn synchronize(
        &self,
        stage: SyncStage,
        source: &EventSource,
        success: EventFlags,
        error: EventFlags,
    ) -> Status;
}

impl<F> Synchronize for F
where
    F: Fn(SyncStage, &EventSource, EventFlags, EventFlags) -> Status + Send + Sync,
{
    fn synchronize(
        &self,
        stage: SyncStage,
        source: &EventSource,
        success: EventFlags,
        error: EventFlags,
    ) -> Status {
        self(stage, source, success, error)
    }
}

/// Two-stage external synchronisation.
pub struct ExternalSync {
    callback: Box<dyn Synchronize>,
    state: Mutex<SyncState>,
}

impl std::fmt::Debug for ExternalSync {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExternalSync")
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl ExternalSync {
    /// Wraps `callback`; the initial state is idle.
    pub fn new(callback: impl Synchronize + 'static) -> Self {
        Self {
            callback: Box::new(callback),
            state: Mutex::new(SyncState::Idle),
        }
    }

    /// Current state.
    pub fn state(&self) -> SyncState {
        *self.state.lock()
    }

    /// Starts a synchronisation (INITIAL stage).
    ///
    /// On failure `error_flags` are broadcast on `source`.
    pub fn start(&self, source: &EventSource, error_flags: EventFlags) -> Result<SyncOutcome> {
        debug_assert_eq!(self.state(), SyncState::Idle);
        let status = self.callback.synchronize(SyncStage::Initial, source, 0, 0);
        debug_assert!(matches!(status, Status::SyncPending | Status::SyncError));
        if status == Status::SyncPending {
            *self.state.lock() = SyncState::Pending;
            Ok(SyncOutcome::Pending)
        } else {
            log::warn!("[ExternalSync::start] initial stage failed: {}", status);
            *self.state.lock() = SyncState::Failed;
            source.broadcast(error_flags);
            Err(Status::SyncError)
        }
    }

    /// Completes a synchronisation (FINAL stage).
    pub fn finalize(
        &self,
        source: &EventSource,
        success_flags: EventFlags,
        error_flags: EventFlags,
    ) -> Result<SyncOutcome> {
        debug_assert_ne!(self.state(), SyncState::Failed);
        debug_assert!(success_flags != error_flags || success_flags == 0);
        let status = self
            .callback
            .synchronize(SyncStage::Final, source, success_flags, error_flags);
        debug_assert!(matches!(
            status,
            Status::Ok | Status::SyncPending | Status::SyncError
        ));
        *self.state.lock() = match status {
            Status::Ok => SyncState::Idle,
            Status::SyncPending => SyncState::Pending,
            _ => SyncState::Failed,
        };
        if !matches!(status, Status::Ok | Status::SyncPending) {
            log::warn!("[ExternalSync::finalize] final stage failed: {}", status);
        }
        SyncOutcome::from_status(status).map_err(|_| Status::SyncError)
    }
}
