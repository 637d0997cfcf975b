// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

#![allow(clippy::uninlined_format_args)] // Test/bench code readability over pedantic
#![allow(clippy::cast_possible_truncation)] // Test parameters
#![allow(clippy::cast_sign_loss)] // Test data conversions
#![allow(clippy::missing_panics_doc)] // Tests/examples panic on failure
#![allow(clippy::items_after_statements)] // Test helpers
#![allow(clippy::too_many_lines)] // Example/test code
#![allow(clippy::similar_names)] // Test variable naming

//! Sync group barrier integration tests.
//!
//! With N members, the first N-1 arrivals stay pending and the N-th arrival
//! releases all of them at once. The group is reusable afterwards.

#![cfg(feature = "syncgroups")]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use urt::sync::{SyncGroup, SyncNode, SyncNodeState};
use urt::{EventFlags, EventSource, ExternalSync, Status, SyncOutcome, SyncStage};

const SYNC_MASK: urt::EventMask = 1 << 4;

#[test]
fn test_last_arrival_releases_everyone() {
    const N: usize = 5;
    let group = Arc::new(SyncGroup::new(None));
    let mut nodes: Vec<SyncNode> = (0..N).map(|_| SyncNode::new()).collect();
    for (i, node) in nodes.iter_mut().enumerate() {
        node.join(&group, 1 << (i + 1)).expect("join");
    }
    assert_eq!(group.len(), N);

    for round in 0..3 {
        for node in nodes.iter_mut().take(N - 1) {
            assert_eq!(node.synchronize(), Ok(SyncOutcome::Pending), "round {}", round);
            assert_eq!(node.state(), SyncNodeState::Pending);
        }
        assert!(!group.is_synchronized());

        let last = nodes.last_mut().expect("members");
        assert_eq!(last.synchronize(), Ok(SyncOutcome::Synced));
        assert!(nodes.iter().all(|n| n.state() == SyncNodeState::Synced));
        assert!(group.is_synchronized());
    }

    for node in nodes.iter_mut() {
        node.leave();
    }
    assert!(group.is_empty());
    urt::ThreadEvents::current().clear(!0);
}

#[test]
fn test_threaded_barrier_blocks_until_all_arrive() {
    const N: usize = 4;
    const ROUNDS: usize = 20;
    let group = Arc::new(SyncGroup::new(None));
    let joined = Arc::new(Barrier::new(N));
    let arrived = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..N)
        .map(|_| {
            let group = Arc::clone(&group);
            let joined = Arc::clone(&joined);
            let arrived = Arc::clone(&arrived);
            thread::spawn(move || {
                let mut node = SyncNode::new();
                node.join(&group, SYNC_MASK).expect("join");
                joined.wait();
                for round in 0..ROUNDS {
                    arrived.fetch_add(1, Ordering::SeqCst);
                    node.barrier().expect("barrier");
                    // Nobody passes round r before all N arrived in round r.
                    assert!(arrived.load(Ordering::SeqCst) >= (round + 1) * N);
                }
                joined.wait();
                node.leave();
            })
        })
        .collect();

    for handle in handles {
        handle.join().expect("member thread");
    }
    assert_eq!(arrived.load(Ordering::SeqCst), N * ROUNDS);
    assert!(group.is_empty());
}

#[test]
fn test_external_sync_completes_group_barrier() {
    let finals = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&finals);
    let sync = Arc::new(ExternalSync::new(
        move |stage: SyncStage, source: &EventSource, ok: EventFlags, _err: EventFlags| match stage {
            SyncStage::Initial => Status::SyncPending,
            SyncStage::Final => {
                counter.fetch_add(1, Ordering::SeqCst);
                source.broadcast(ok);
                Status::Ok
            }
        },
    ));
    let group = Arc::new(SyncGroup::new(Some(sync)));
    let mut a = SyncNode::new();
    let mut b = SyncNode::new();
    a.join(&group, 1 << 5).expect("join");
    b.join(&group, 1 << 6).expect("join");

    assert_eq!(a.synchronize(), Ok(SyncOutcome::Pending));
    assert_eq!(finals.load(Ordering::SeqCst), 0);
    assert_eq!(b.synchronize(), Ok(SyncOutcome::Synced));
    assert_eq!(finals.load(Ordering::SeqCst), 1);
    assert!(group.is_synchronized());

    a.leave();
    b.leave();
    urt::ThreadEvents::current().clear(!0);
}

#[test]
fn test_failing_external_sync_is_reported() {
    let sync = Arc::new(ExternalSync::new(
        |_: SyncStage, _: &EventSource, _: EventFlags, _: EventFlags| Status::SyncError,
    ));
    let group = Arc::new(SyncGroup::new(Some(sync)));
    let mut a = SyncNode::new();
    let mut b = SyncNode::new();
    a.join(&group, 1 << 5).expect("join");
    b.join(&group, 1 << 6).expect("join");
    assert_eq!(a.synchronize(), Err(Status::SyncError));
    assert!(!group.is_synchronized());
    a.leave();
    b.leave();
    urt::ThreadEvents::current().clear(!0);
}
