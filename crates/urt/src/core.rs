// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! µRT core: registries and the global lifecycle protocol.
//!
//! A [`Core`] owns the lists of nodes, topics and services of one µRT
//! instance and the event source every node listens to. It is created once,
//! shared by `Arc`, and handed to every constructor.
//!
//! # Lifecycle
//!
//! ```text
//!  Core::new ─► Node::new/Topic::new/Service::new ─► start_nodes
//!      │                                                  │
//!      │       synchronize_nodes (startup barrier) ◄──────┘
//!      │                   │ all nodes arrived
//!      │                   ▼
//!      │            broadcast PROCEED ──► nodes run their loops
//!      │
//!      ├── stop_nodes(reason) ──► broadcast TERMINATE (graceful)
//!      └── emergency(reason)  ──► broadcast EMERGENCY (kill)
//! ```

use crate::node::Node;
use crate::osal::{EventFlags, EventMask, EventSource, EVENTMASK_MAXPRIO};
use crate::primitives::{Result, Status};
use crate::sync::{ExternalSync, SyncOutcome, SyncState};
use parking_lot::Mutex;
use std::sync::Arc;

#[cfg(feature = "pubsub")]
use crate::config::TopicId;
#[cfg(feature = "pubsub")]
use crate::pubsub::Topic;

#[cfg(feature = "rpc")]
use crate::config::ServiceId;
#[cfg(feature = "rpc")]
use crate::rpc::Service;

/// Emergency shutdown of all nodes.
pub const CORE_EVENTFLAG_EMERGENCY: EventFlags = 1 << 0;

/// Graceful termination of all nodes.
pub const CORE_EVENTFLAG_TERMINATE: EventFlags = 1 << 1;

/// Startup barrier completed.
pub const CORE_EVENTFLAG_PROCEED: EventFlags = 1 << 2;

/// Event mask reserved for core events (highest priority).
pub const CORE_EVENT_MASK: EventMask = EVENTMASK_MAXPRIO;

/// Checks that an application event mask is usable next to the core mask.
pub(crate) fn check_event_mask(mask: EventMask) -> Result<()> {
    if mask == 0 || mask & CORE_EVENT_MASK != 0 {
        log::debug!("[Core] invalid application event mask {:#x}", mask);
        return Err(Status::NodeInvalidEventMask);
    }
    Ok(())
}

#[derive(Default)]
struct Registry {
    nodes: Vec<Arc<Node>>,
    #[cfg(feature = "pubsub")]
    topics: Vec<Arc<Topic>>,
    #[cfg(feature = "rpc")]
    services: Vec<Arc<Service>>,
}

/// Registry and lifecycle controller of one µRT instance.
pub struct Core {
    registry: Mutex<Registry>,
    status: Mutex<Status>,
    events: EventSource,
    sync: Option<Arc<ExternalSync>>,
}

impl std::fmt::Debug for Core {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Core")
            .field("status", &self.status())
            .field("nodes", &self.node_count())
            .finish_non_exhaustive()
    }
}

impl Core {
    /// Creates a core, optionally synchronising startup with an external party.
    pub fn new(sync: Option<Arc<ExternalSync>>) -> Arc<Self> {
        Arc::new(Self {
            registry: Mutex::new(Registry::default()),
            status: Mutex::new(Status::Ok),
            events: EventSource::new(),
            sync,
        })
    }

    /// Current core status; anything but `Ok` means the system is stopping.
    pub fn status(&self) -> Status {
        *self.status.lock()
    }

    /// Event source broadcasting the core event flags.
    pub fn event_source(&self) -> &EventSource {
        &self.events
    }

    /// Event mask reserved for core events.
    pub const fn event_mask(&self) -> EventMask {
        CORE_EVENT_MASK
    }

    /// Number of registered nodes.
    pub fn node_count(&self) -> usize {
        self.registry.lock().nodes.len()
    }

    pub(crate) fn add_node(&self, node: Arc<Node>) {
        self.registry.lock().nodes.insert(0, node);
    }

    /// Starts the thread of every registered node that is not running yet.
    pub fn start_nodes(self: &Arc<Self>) -> std::io::Result<()> {
        let nodes = self.registry.lock().nodes.clone();
        log::info!("[Core::start_nodes] starting {} node(s)", nodes.len());
        for node in nodes {
            node.start(Arc::clone(self))?;
        }
        Ok(())
    }

    /// Blocks until the threads of all started nodes have exited.
    pub fn join_nodes(&self) {
        let nodes = self.registry.lock().nodes.clone();
        for node in nodes {
            node.join();
        }
    }

    /// Startup barrier: advances the stage of `node` and checks all nodes.
    ///
    /// - `Synced`: every node reached the stage (PROCEED is broadcast, or the
    ///   external sync is finalised)
    /// - `Pending`: some nodes are one stage behind
    /// - `Err(SyncError)`: inconsistent stages; an emergency is raised
    pub fn synchronize_nodes(&self, node: &Node) -> Result<SyncOutcome> {
        let registry = self.registry.lock();
        let stage = node.advance_stage();

        let straggler = registry.nodes.iter().find(|n| n.stage() != stage);
        let mut result = match straggler {
            None => Ok(SyncOutcome::Synced),
            Some(n) if n.stage() == stage.wrapping_sub(1) => Ok(SyncOutcome::Pending),
            Some(n) => {
                log::error!(
                    "[Core::synchronize_nodes] node '{}' at stage {} while '{}' reached {}",
                    n.name(),
                    n.stage(),
                    node.name(),
                    stage
                );
                self.emergency(Status::SyncError);
                Err(Status::SyncError)
            }
        };

        match (self.sync.as_ref(), result) {
            (Some(sync), Ok(SyncOutcome::Pending)) if sync.state() == SyncState::Idle => {
                result = sync.start(&self.events, CORE_EVENTFLAG_EMERGENCY);
            }
            (Some(sync), Ok(SyncOutcome::Synced)) => {
                result = sync.finalize(
                    &self.events,
                    CORE_EVENTFLAG_PROCEED,
                    CORE_EVENTFLAG_EMERGENCY,
                );
            }
            (None, Ok(SyncOutcome::Synced)) => {
                log::debug!("[Core::synchronize_nodes] all nodes reached stage {}", stage);
                self.events.broadcast(CORE_EVENTFLAG_PROCEED);
            }
            _ => {}
        }

        if self.sync.is_some() && result == Err(Status::SyncError) {
            // Emergency flags were already broadcast by the external sync.
            let mut status = self.status.lock();
            if status.is_ok() {
                *status = Status::SyncError;
            }
        }
        drop(registry);
        result
    }

    /// Requests all nodes to terminate gracefully.
    ///
    /// Ignored if the core already left the `Ok` state; the current status is
    /// returned as error in that case.
    pub fn stop_nodes(&self, reason: Status) -> Result<()> {
        {
            let mut status = self.status.lock();
            if !status.is_ok() {
                return Err(*status);
            }
            *status = reason;
        }
        log::info!("[Core::stop_nodes] stopping nodes (reason: {})", reason);
        self.events.broadcast(CORE_EVENTFLAG_TERMINATE);
        Ok(())
    }

    /// Emergency shutdown of all nodes.
    ///
    /// Only the first reason is kept as core status.
    pub fn emergency(&self, reason: Status) {
        debug_assert!(!reason.is_ok(), "emergency requires an error reason");
        {
            let mut status = self.status.lock();
            if status.is_ok() {
                *status = reason;
            }
        }
        log::error!("[Core::emergency] emergency shutdown: {}", reason);
        self.events.broadcast(CORE_EVENTFLAG_EMERGENCY);
    }

    #[cfg(feature = "pubsub")]
    pub(crate) fn add_topic(&self, topic: Arc<Topic>) -> Result<()> {
        let mut registry = self.registry.lock();
        match registry.topics.binary_search_by_key(&topic.id(), |t| t.id()) {
            Ok(_) => Err(Status::TopicDuplicate),
            Err(index) => {
                registry.topics.insert(index, topic);
                Ok(())
            }
        }
    }

    /// Looks up a registered topic.
    #[cfg(feature = "pubsub")]
    pub fn topic(&self, id: TopicId) -> Option<Arc<Topic>> {
        let registry = self.registry.lock();
        registry
            .topics
            .binary_search_by_key(&id, |t| t.id())
            .ok()
            .map(|index| Arc::clone(&registry.topics[index]))
    }

    /// Ids of all registered topics in increasing order.
    #[cfg(feature = "pubsub")]
    pub fn topic_ids(&self) -> Vec<TopicId> {
        self.registry.lock().topics.iter().map(|t| t.id()).collect()
    }

    #[cfg(feature = "rpc")]
    pub(crate) fn add_service(&self, service: Arc<Service>) -> Result<()> {
        let mut registry = self.registry.lock();
        match registry
            .services
            .binary_search_by_key(&service.id(), |s| s.id())
        {
            Ok(_) => Err(Status::ServiceDuplicate),
            Err(index) => {
                registry.services.insert(index, service);
                Ok(())
            }
        }
    }

    /// Looks up a registered service.
    #[cfg(feature = "rpc")]
    pub fn service(&self, id: ServiceId) -> Option<Arc<Service>> {
        let registry = self.registry.lock();
        registry
            .services
            .binary_search_by_key(&id, |s| s.id())
            .ok()
            .map(|index| Arc::clone(&registry.services[index]))
    }

    /// Ids of all registered services in increasing order.
    #[cfg(feature = "rpc")]
    pub fn service_ids(&self) -> Vec<ServiceId> {
        self.registry.lock().services.iter().map(|s| s.id()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::osal::{EventListener, ThreadEvents, WaitMode};

    #[test]
    fn test_stop_nodes_only_once() {
        let core = Core::new(None);
        let mut listener = EventListener::new();
        core.event_source().register(&mut listener, CORE_EVENT_MASK);
        assert_eq!(core.stop_nodes(Status::Ok), Ok(()));
        assert_eq!(listener.clear_flags(!0), CORE_EVENTFLAG_TERMINATE);

        core.emergency(Status::RateViolation);
        assert_eq!(core.status(), Status::RateViolation);
        assert_eq!(core.stop_nodes(Status::Ok), Err(Status::RateViolation));
        assert_eq!(listener.clear_flags(!0), CORE_EVENTFLAG_EMERGENCY);
        ThreadEvents::current().clear(CORE_EVENT_MASK);
    }

    #[test]
    fn test_event_mask_partition() {
        assert_eq!(check_event_mask(0), Err(Status::NodeInvalidEventMask));
        assert_eq!(check_event_mask(CORE_EVENT_MASK), Err(Status::NodeInvalidEventMask));
        assert_eq!(check_event_mask(1 << 4), Ok(()));
    }

    #[test]
    fn test_emergency_keeps_first_reason() {
        let core = Core::new(None);
        core.emergency(Status::DeadlineViolation);
        core.emergency(Status::JitterViolation);
        assert_eq!(core.status(), Status::DeadlineViolation);
    }

    #[test]
    fn test_event_mask_is_reserved_bit() {
        let core = Core::new(None);
        assert_eq!(core.event_mask(), 1);
        let me = ThreadEvents::current();
        let mut listener = EventListener::new();
        core.event_source().register(&mut listener, core.event_mask());
        core.event_source().broadcast(CORE_EVENTFLAG_PROCEED);
        assert_eq!(me.wait(core.event_mask(), WaitMode::All, None), CORE_EVENT_MASK);
    }
}
