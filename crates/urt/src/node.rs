// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Nodes: one thread running a standard event-driven loop.
//!
//! ```text
//!  SETUP ──► BARRIER ──► LOOP ──► OUTRO ──► TERMINATED
//!              │           ▲ │
//!              │           └─┘ wait(ANY of waitmask | core mask)
//!              └── skipped if the core is not OK
//! ```
//!
//! Application logic plugs in through [`NodeBehavior`]; only
//! [`NodeBehavior::on_loop`] is mandatory.
//!
//! # Example
//!
//! ```no_run
//! use urt::{Core, Node, NodeBehavior, NodeContext, EventMask};
//!
//! struct Blinker;
//!
//! impl NodeBehavior for Blinker {
//!     fn on_setup(&mut self, _ctx: &NodeContext<'_>) -> EventMask {
//!         1 << 1
//!     }
//!     fn on_loop(&mut self, _ctx: &NodeContext<'_>, _events: EventMask) -> EventMask {
//!         1 << 1
//!     }
//! }
//!
//! let core = Core::new(None);
//! let node = Node::new(&core, "blinker", Blinker);
//! core.start_nodes().unwrap();
//! node.thread().signal(1 << 1);
//! ```

use crate::config;
use crate::core::{
    Core, CORE_EVENTFLAG_EMERGENCY, CORE_EVENTFLAG_PROCEED, CORE_EVENTFLAG_TERMINATE,
    CORE_EVENT_MASK,
};
use crate::osal::{
    EventListener, EventMask, Termination, ThreadEvents, WaitMode, EVENTMASK_ALL,
};
use crate::primitives::{NodeStage, ProfilingCounter, Status};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU16, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Application callbacks of a node.
pub trait NodeBehavior: Send + 'static {
    /// Called once in the node thread before the startup barrier.
    ///
    /// Returns the events to wait for in the first loop iteration.
    fn on_setup(&mut self, _ctx: &NodeContext<'_>) -> EventMask {
        EVENTMASK_ALL
    }

    /// Called for every received non-core event.
    ///
    /// Returns the events to wait for in the next iteration.
    fn on_loop(&mut self, ctx: &NodeContext<'_>, events: EventMask) -> EventMask;

    /// Called once before the node thread exits, with the core status.
    fn on_shutdown(&mut self, _ctx: &NodeContext<'_>, _reason: Status) {}
}

/// Access to the environment of a running node.
#[derive(Debug)]
pub struct NodeContext<'a> {
    node: &'a Arc<Node>,
    core: &'a Arc<Core>,
}

impl<'a> NodeContext<'a> {
    /// The running node.
    pub fn node(&self) -> &'a Arc<Node> {
        self.node
    }

    /// Core the node belongs to.
    pub fn core(&self) -> &'a Arc<Core> {
        self.core
    }

    /// Event object of the node thread.
    pub fn thread(&self) -> &'a Arc<ThreadEvents> {
        &self.node.thread
    }
}

/// Lifecycle state of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum NodeState {
    /// Thread not started.
    Created = 0,
    /// Running the setup callback.
    Setup = 1,
    /// Waiting at the startup barrier.
    Barrier = 2,
    /// Running the loop.
    Loop = 3,
    /// Shutting down.
    Outro = 4,
    /// Thread exited.
    Terminated = 5,
}

impl NodeState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => NodeState::Setup,
            2 => NodeState::Barrier,
            3 => NodeState::Loop,
            4 => NodeState::Outro,
            5 => NodeState::Terminated,
            _ => NodeState::Created,
        }
    }
}

/// A µRT node.
pub struct Node {
    name: String,
    thread: Arc<ThreadEvents>,
    stage: AtomicU16,
    state: AtomicU8,
    loops: AtomicU64,
    behavior: Mutex<Option<Box<dyn NodeBehavior>>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("name", &self.name)
            .field("state", &self.state())
            .field("stage", &self.stage())
            .finish_non_exhaustive()
    }
}

impl Node {
    /// Creates a node and registers it with `core`.
    ///
    /// The thread is started by [`Core::start_nodes`].
    pub fn new(core: &Arc<Core>, name: impl Into<String>, behavior: impl NodeBehavior) -> Arc<Self> {
        let name = name.into();
        let node = Arc::new(Self {
            thread: ThreadEvents::new(name.clone()),
            name,
            stage: AtomicU16::new(0),
            state: AtomicU8::new(NodeState::Created as u8),
            loops: AtomicU64::new(0),
            behavior: Mutex::new(Some(Box::new(behavior))),
            handle: Mutex::new(None),
        });
        core.add_node(Arc::clone(&node));
        node
    }

    /// Node name (also the thread name).
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Event object of the node thread; signal it to wake the loop.
    pub fn thread(&self) -> &Arc<ThreadEvents> {
        &self.thread
    }

    /// Current lifecycle state.
    pub fn state(&self) -> NodeState {
        NodeState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Startup barrier stage.
    pub fn stage(&self) -> NodeStage {
        self.stage.load(Ordering::Acquire)
    }

    /// Number of loop callback invocations (0 without `profiling`).
    pub fn loops(&self) -> ProfilingCounter {
        self.loops.load(Ordering::Relaxed)
    }

    pub(crate) fn advance_stage(&self) -> NodeStage {
        self.stage.fetch_add(1, Ordering::AcqRel).wrapping_add(1)
    }

    fn set_state(&self, state: NodeState) {
        self.state.store(state as u8, Ordering::Release);
    }

    pub(crate) fn start(self: &Arc<Self>, core: Arc<Core>) -> std::io::Result<()> {
        let mut handle = self.handle.lock();
        if handle.is_some() || self.state() != NodeState::Created {
            return Ok(());
        }
        let node = Arc::clone(self);
        *handle = Some(
            thread::Builder::new()
                .name(self.name.clone())
                .spawn(move || run(core, node))?,
        );
        Ok(())
    }

    /// Waits for the node thread to exit (no-op if it was never started).
    pub fn join(&self) {
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                log::error!("[Node::join] node '{}' panicked", self.name);
            }
        }
    }
}

fn run(core: Arc<Core>, node: Arc<Node>) {
    let thread = Arc::clone(&node.thread);
    thread.bind_current();

    let mut listener = EventListener::new();
    core.event_source().register(&mut listener, CORE_EVENT_MASK);

    let Some(mut behavior) = node.behavior.lock().take() else {
        debug_assert!(false, "node behavior missing");
        core.event_source().unregister(&mut listener);
        node.set_state(NodeState::Terminated);
        return;
    };
    let ctx = NodeContext {
        node: &node,
        core: &core,
    };

    log::debug!("[Node::run] '{}' setup", node.name);
    node.set_state(NodeState::Setup);
    let mut waitmask = CORE_EVENT_MASK | behavior.on_setup(&ctx);

    if core.status().is_ok() {
        node.set_state(NodeState::Barrier);
        // Errors are escalated by the core itself.
        let _ = core.synchronize_nodes(&node);
        thread.wait(CORE_EVENT_MASK, WaitMode::All, None);
        listener.clear_flags(CORE_EVENTFLAG_PROCEED);
        if listener.flags() & (CORE_EVENTFLAG_EMERGENCY | CORE_EVENTFLAG_TERMINATE) != 0 {
            // Lifecycle flags arrived together with the barrier wake-up.
            thread.signal(CORE_EVENT_MASK);
        }
    } else {
        log::warn!(
            "[Node::run] '{}' skips loop, core status is {}",
            node.name,
            core.status()
        );
        thread.request_termination(Termination::Request);
    }

    node.set_state(NodeState::Loop);
    while !thread.should_terminate() {
        let events = thread.wait(waitmask, WaitMode::Any, None);
        if events & CORE_EVENT_MASK != 0 {
            let flags = listener.clear_flags(EVENTMASK_ALL);
            if flags & CORE_EVENTFLAG_EMERGENCY != 0 {
                thread.request_termination(Termination::Kill);
            } else if flags & CORE_EVENTFLAG_TERMINATE != 0 {
                thread.request_termination(Termination::Request);
            }
        } else {
            waitmask = CORE_EVENT_MASK | behavior.on_loop(&ctx, events);
            if config::NODE_PROFILING {
                node.loops.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    node.set_state(NodeState::Outro);
    thread.request_termination(Termination::Request);
    let reason = core.status();
    log::debug!("[Node::run] '{}' shutdown ({})", node.name, reason);
    behavior.on_shutdown(&ctx, reason);
    core.event_source().unregister(&mut listener);
    node.set_state(NodeState::Terminated);
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Idle;

    impl NodeBehavior for Idle {
        fn on_loop(&mut self, _ctx: &NodeContext<'_>, _events: EventMask) -> EventMask {
            0
        }
    }

    #[test]
    fn test_new_node_registers_with_core() {
        let core = Core::new(None);
        let node = Node::new(&core, "idle", Idle);
        assert_eq!(core.node_count(), 1);
        assert_eq!(node.state(), NodeState::Created);
        assert_eq!(node.stage(), 0);
        assert_eq!(node.thread().name(), "idle");
    }

    #[test]
    fn test_single_node_runs_and_stops() {
        let core = Core::new(None);
        let node = Node::new(&core, "single", Idle);
        core.start_nodes().expect("spawn");
        while node.state() != NodeState::Loop {
            thread::yield_now();
        }
        assert_eq!(node.stage(), 1);
        core.stop_nodes(Status::Ok).expect("stop");
        core.join_nodes();
        assert_eq!(node.state(), NodeState::Terminated);
    }

    #[test]
    fn test_node_started_after_emergency_exits() {
        let core = Core::new(None);
        core.emergency(Status::SyncError);
        let node = Node::new(&core, "late", Idle);
        core.start_nodes().expect("spawn");
        core.join_nodes();
        assert_eq!(node.state(), NodeState::Terminated);
        assert_eq!(node.loops(), 0);
    }
}
