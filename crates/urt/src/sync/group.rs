// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Reusable barriers for groups of nodes.
//!
//! A [`SyncNode`] joins exactly one [`SyncGroup`] at a time. Calling
//! [`SyncNode::synchronize`] marks the node pending; the call of the last
//! pending member completes the barrier, resets every member to synced and
//! broadcasts [`SYNC_EVENTFLAG_PROCEED`] (or finalises the outer
//! [`ExternalSync`] which broadcasts on its own).
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use urt::sync::{SyncGroup, SyncNode};
//!
//! let group = Arc::new(SyncGroup::new(None));
//! let mut node = SyncNode::new();
//! node.join(&group, 1 << 4).unwrap();
//! node.barrier().unwrap(); // returns once all members arrived
//! node.leave();
//! ```

use super::{ExternalSync, SyncOutcome, SyncState};
use crate::osal::{EventFlags, EventListener, EventMask, EventSource, ThreadEvents, WaitMode};
use crate::primitives::{Result, Status};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Barrier completed.
pub const SYNC_EVENTFLAG_PROCEED: EventFlags = 1 << 0;

/// Barrier failed.
pub const SYNC_EVENTFLAG_FAILED: EventFlags = 1 << 1;

static NEXT_SYNCNODE_ID: AtomicU64 = AtomicU64::new(1);

/// Local barrier state of a member.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncNodeState {
    /// Not waiting at the barrier.
    Synced,
    /// Waiting for other members.
    Pending,
}

#[derive(Debug)]
struct Member {
    id: u64,
    state: SyncNodeState,
}

/// Group of synchronising nodes.
#[derive(Debug)]
pub struct SyncGroup {
    members: Mutex<Vec<Member>>,
    source: EventSource,
    sync: Option<Arc<ExternalSync>>,
}

impl SyncGroup {
    /// Creates an empty group, optionally nested into an external sync.
    pub fn new(sync: Option<Arc<ExternalSync>>) -> Self {
        Self {
            members: Mutex::new(Vec::new()),
            source: EventSource::new(),
            sync,
        }
    }

    /// Event source members listen to.
    pub fn event_source(&self) -> &EventSource {
        &self.source
    }

    /// Number of members.
    pub fn len(&self) -> usize {
        self.members.lock().len()
    }

    /// Whether the group has no members.
    pub fn is_empty(&self) -> bool {
        self.members.lock().is_empty()
    }

    /// Whether no member is pending and the external sync (if any) is idle.
    pub fn is_synchronized(&self) -> bool {
        let members = self.members.lock();
        if let Some(sync) = self.sync.as_ref() {
            if sync.state() != SyncState::Idle {
                return false;
            }
        }
        members.iter().all(|m| m.state == SyncNodeState::Synced)
    }

    fn state_of(&self, id: u64) -> Option<SyncNodeState> {
        self.members
            .lock()
            .iter()
            .find(|m| m.id == id)
            .map(|m| m.state)
    }

    /// Broadcasts completion, either directly or via the external sync.
    ///
    /// Must be called with the member lock held.
    fn complete(&self) -> Result<SyncOutcome> {
        match self.sync.as_ref() {
            Some(sync) => {
                sync.finalize(&self.source, SYNC_EVENTFLAG_PROCEED, SYNC_EVENTFLAG_FAILED)
            }
            None => {
                self.source.broadcast(SYNC_EVENTFLAG_PROCEED);
                Ok(SyncOutcome::Synced)
            }
        }
    }
}

/// Member of a [`SyncGroup`].
#[derive(Debug)]
pub struct SyncNode {
    id: u64,
    group: Option<Arc<SyncGroup>>,
    listener: EventListener,
}

impl Default for SyncNode {
    fn default() -> Self {
        Self::new()
    }
}

impl SyncNode {
    /// Creates a node that is not part of any group.
    pub fn new() -> Self {
        Self {
            id: NEXT_SYNCNODE_ID.fetch_add(1, Ordering::Relaxed),
            group: None,
            listener: EventListener::new(),
        }
    }

    /// Group this node belongs to.
    pub fn group(&self) -> Option<&Arc<SyncGroup>> {
        self.group.as_ref()
    }

    /// Local barrier state; detached nodes are synced.
    pub fn state(&self) -> SyncNodeState {
        self.group
            .as_ref()
            .and_then(|group| group.state_of(self.id))
            .unwrap_or(SyncNodeState::Synced)
    }

    /// Joins `group`; the calling thread is signalled with `mask`.
    ///
    /// If a barrier is in progress the node joins it as pending.
    pub fn join(&mut self, group: &Arc<SyncGroup>, mask: EventMask) -> Result<SyncOutcome> {
        debug_assert!(self.group.is_none(), "syncnode already joined a group");
        if mask == 0 {
            return Err(Status::NodeInvalidEventMask);
        }
        let mut members = group.members.lock();
        group.source.register(&mut self.listener, mask);
        let pending = members.iter().any(|m| m.state == SyncNodeState::Pending);
        let state = if pending {
            SyncNodeState::Pending
        } else {
            SyncNodeState::Synced
        };
        members.insert(0, Member { id: self.id, state });
        drop(members);
        self.group = Some(Arc::clone(group));
        Ok(if pending {
            SyncOutcome::Pending
        } else {
            SyncOutcome::Synced
        })
    }

    /// Leaves the current group.
    ///
    /// If every remaining member is pending, the barrier completes.
    pub fn leave(&mut self) {
        let Some(group) = self.group.take() else {
            return;
        };
        let mut members = group.members.lock();
        let before = members.len();
        members.retain(|m| m.id != self.id);
        debug_assert_eq!(before, members.len() + 1, "syncnode not found in group");
        group.source.unregister(&mut self.listener);
        let all_pending =
            !members.is_empty() && members.iter().all(|m| m.state == SyncNodeState::Pending);
        if all_pending {
            for member in members.iter_mut() {
                member.state = SyncNodeState::Synced;
            }
            if let Err(e) = group.complete() {
                log::warn!("[SyncNode::leave] completing barrier failed: {}", e);
            }
        }
    }

    /// Arrives at the barrier without blocking.
    ///
    /// Returns [`SyncOutcome::Synced`] if this call completed the barrier,
    /// [`SyncOutcome::Pending`] if other members have yet to arrive (or this
    /// node already waits).
    pub fn synchronize(&mut self) -> Result<SyncOutcome> {
        let Some(group) = self.group.as_ref() else {
            debug_assert!(false, "syncnode is not part of a group");
            return Ok(SyncOutcome::Synced);
        };
        let mut members = group.members.lock();
        let Some(index) = members.iter().position(|m| m.id == self.id) else {
            debug_assert!(false, "syncnode not found in group");
            return Ok(SyncOutcome::Synced);
        };
        if members[index].state == SyncNodeState::Pending {
            return Ok(SyncOutcome::Pending);
        }
        members[index].state = SyncNodeState::Pending;

        if members.iter().all(|m| m.state == SyncNodeState::Pending) {
            for member in members.iter_mut() {
                member.state = SyncNodeState::Synced;
            }
            group.complete()
        } else {
            match group.sync.as_ref() {
                Some(sync) if sync.state() == SyncState::Idle => {
                    sync.start(&group.source, SYNC_EVENTFLAG_FAILED)
                }
                _ => Ok(SyncOutcome::Pending),
            }
        }
    }

    /// Arrives at the barrier and blocks until it completes.
    pub fn barrier(&mut self) -> Result<()> {
        let outcome = self.synchronize()?;
        let Some(thread) = self.listener.thread().cloned() else {
            return Ok(());
        };
        let mask = self.listener.mask();
        if outcome == SyncOutcome::Synced {
            // Consume our own completion broadcast.
            self.listener
                .clear_flags(SYNC_EVENTFLAG_PROCEED | SYNC_EVENTFLAG_FAILED);
            thread.clear(mask);
            return Ok(());
        }
        wait_for_barrier(&thread, &self.listener, mask)
    }
}

impl Drop for SyncNode {
    fn drop(&mut self) {
        self.leave();
    }
}

fn wait_for_barrier(thread: &ThreadEvents, listener: &EventListener, mask: EventMask) -> Result<()> {
    loop {
        thread.wait(mask, WaitMode::Any, None);
        let flags = listener.clear_flags(SYNC_EVENTFLAG_PROCEED | SYNC_EVENTFLAG_FAILED);
        if flags & SYNC_EVENTFLAG_FAILED != 0 {
            return Err(Status::SyncError);
        }
        if flags & SYNC_EVENTFLAG_PROCEED != 0 {
            return Ok(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_member_completes_immediately() {
        let group = Arc::new(SyncGroup::new(None));
        let mut node = SyncNode::new();
        assert_eq!(node.join(&group, 1 << 5), Ok(SyncOutcome::Synced));
        assert_eq!(node.synchronize(), Ok(SyncOutcome::Synced));
        assert_eq!(node.state(), SyncNodeState::Synced);
        assert!(group.is_synchronized());
        node.leave();
        assert!(group.is_empty());
    }

    #[test]
    fn test_two_members_pending_until_last_arrives() {
        let group = Arc::new(SyncGroup::new(None));
        let mut a = SyncNode::new();
        let mut b = SyncNode::new();
        a.join(&group, 1 << 5).ok();
        b.join(&group, 1 << 6).ok();
        assert_eq!(a.synchronize(), Ok(SyncOutcome::Pending));
        assert_eq!(a.synchronize(), Ok(SyncOutcome::Pending));
        assert_eq!(a.state(), SyncNodeState::Pending);
        assert!(!group.is_synchronized());
        assert_eq!(b.synchronize(), Ok(SyncOutcome::Synced));
        assert_eq!(a.state(), SyncNodeState::Synced);
        assert!(group.is_synchronized());
        assert_eq!(a.listener.clear_flags(!0), SYNC_EVENTFLAG_PROCEED);
    }

    #[test]
    fn test_leave_releases_pending_members() {
        let group = Arc::new(SyncGroup::new(None));
        let mut a = SyncNode::new();
        let mut b = SyncNode::new();
        a.join(&group, 1 << 5).ok();
        b.join(&group, 1 << 6).ok();
        a.synchronize().ok();
        b.leave();
        assert_eq!(a.state(), SyncNodeState::Synced);
        assert_eq!(a.listener.clear_flags(!0), SYNC_EVENTFLAG_PROCEED);
        assert_eq!(group.len(), 1);
    }

    #[test]
    fn test_join_during_barrier_is_pending() {
        let group = Arc::new(SyncGroup::new(None));
        let mut a = SyncNode::new();
        let mut b = SyncNode::new();
        let mut c = SyncNode::new();
        a.join(&group, 1 << 5).ok();
        b.join(&group, 1 << 6).ok();
        a.synchronize().ok();
        assert_eq!(c.join(&group, 1 << 7), Ok(SyncOutcome::Pending));
        assert_eq!(b.synchronize(), Ok(SyncOutcome::Synced));
    }

    #[test]
    fn test_zero_mask_is_rejected() {
        let group = Arc::new(SyncGroup::new(None));
        let mut node = SyncNode::new();
        assert_eq!(node.join(&group, 0), Err(Status::NodeInvalidEventMask));
        assert!(node.group().is_none());
    }
}
