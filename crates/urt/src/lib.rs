// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! # µRT - real-time middleware kernel
//!
//! Publish-subscribe and RPC between threads of one process, with explicit
//! real-time classes and active timing supervision.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use urt::{Core, EventMask, Node, NodeBehavior, NodeContext};
//!
//! struct Worker;
//!
//! impl NodeBehavior for Worker {
//!     fn on_loop(&mut self, _ctx: &NodeContext<'_>, _events: EventMask) -> EventMask {
//!         1 << 1
//!     }
//! }
//!
//! fn main() -> std::io::Result<()> {
//!     let core = Core::new(None);
//!     Node::new(&core, "worker", Worker);
//!     core.start_nodes()?;
//!     // ... run ...
//!     let _ = core.stop_nodes(urt::Status::Ok);
//!     core.join_nodes();
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! +---------------------------------------------------------------------+
//! |                         Application nodes                           |
//! |        NodeBehavior: on_setup -> on_loop* -> on_shutdown            |
//! +---------------------------------------------------------------------+
//! |      Pub-sub (Topic, Publisher,       |   RPC (Service, Request)    |
//! |      NRT/SRT/FRT/HRT subscribers)     |   two-band dispatch queue   |
//! +---------------------------------------------------------------------+
//! |   Core: registries, startup barrier, stop/emergency broadcasting    |
//! +---------------------------------------------------------------------+
//! |   osal: Time | ThreadEvents | EventSource/Listener | Timer          |
//! +---------------------------------------------------------------------+
//! ```
//!
//! ## Real-time classes
//!
//! | Class | Guarantees |
//! |-------|------------|
//! | NRT | none |
//! | SRT | usefulness of late data is rated by the application |
//! | FRT | deadline/jitter violations are reported, data is still delivered |
//! | HRT | data is never lost; violations run recovery or stop the system |
//!
//! ## Features
//!
//! - `pubsub`, `rpc`: the two communication models (independent)
//! - `syncgroups`: reusable barriers for groups of nodes
//! - `profiling`: counters and latency statistics
//! - `qos-deadline`, `qos-jitter`, `qos-rate`: timing checks
//! - `condvar-timeout`: bounded waits for enforcing publishers
//! - `buffer-order-pubtime`: order topic buffers by publish time
//! - `delay-64`: 64-bit delays

/// Build-time configuration derived from Cargo features.
pub mod config;
/// Registries and the global lifecycle protocol.
pub mod core;
/// Nodes and their run loop.
pub mod node;
/// Host implementation of the OS substrate.
pub mod osal;
/// Primitive types and the status enumeration.
pub mod primitives;
/// Deadline and jitter bookkeeping.
pub mod qos;
/// Synchronisation barriers.
pub mod sync;

/// Publish-subscribe.
#[cfg(feature = "pubsub")]
pub mod pubsub;

/// Remote procedure calls.
#[cfg(feature = "rpc")]
pub mod rpc;

pub use crate::core::{
    Core, CORE_EVENTFLAG_EMERGENCY, CORE_EVENTFLAG_PROCEED, CORE_EVENTFLAG_TERMINATE,
    CORE_EVENT_MASK,
};
pub use node::{Node, NodeBehavior, NodeContext, NodeState};
pub use osal::{EventFlags, EventListener, EventMask, EventSource, ThreadEvents, Time, Timer, WaitMode};
pub use primitives::{Delay, Result, RtClass, Status, DELAY_IMMEDIATE, DELAY_INFINITE};
pub use qos::{JitterWindow, Recovery};
pub use sync::{ExternalSync, SyncOutcome, SyncStage, SyncState, Synchronize};

#[cfg(feature = "syncgroups")]
pub use sync::{SyncGroup, SyncNode, SyncNodeState};

#[cfg(feature = "pubsub")]
pub use pubsub::{Publisher, Topic};

#[cfg(feature = "rpc")]
pub use rpc::{Request, Service};
